//! Hand-written instruction semantics.
//!
//! The handler is a table from [`Mnemonic`] to a list of semantic functions
//! tagged with the number of operands they take. Building a circuit looks up
//! the entry matching the instruction's arity, reads every operand from the
//! pre-state and passes operands, values and state to the function.
//! Immediates arrive at their encoded width; functions widen them with
//! [`fit`] as the instruction requires.
//!
//! Functions are grouped by family:
//!
//! - [`transfer`] - moves, stack operations and accumulator sign extension
//! - [`arith`] - addition, subtraction, multiplication and division
//! - [`logic`] - bitwise logic, bit tests and bit scans
//! - [`shift`] - shifts and rotates
//! - [`cond`] - conditional moves and sets, carry flag operations
//! - [`vector`] - SSE and AVX moves, integer lanes and scalar floating point

mod arith;
mod cond;
mod logic;
mod shift;
mod transfer;
mod vector;

use rustc_hash::FxHashMap;

use crate::{
    handlers::{Handler, SupportLevel},
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Instruction, Mnemonic, Operand},
    Result,
};

type Nullary = fn(&Instruction, &mut SymState) -> Result<()>;
type Unary = fn(&Instruction, &Operand, SymExpr, &mut SymState) -> Result<()>;
type Binary = fn(&Instruction, [&Operand; 2], [SymExpr; 2], &mut SymState) -> Result<()>;
type Ternary = fn(&Instruction, [&Operand; 3], [SymExpr; 3], &mut SymState) -> Result<()>;

/// A semantic function tagged with its arity.
#[derive(Clone, Copy)]
pub(crate) enum Semantics {
    Arity0(Nullary),
    Arity1(Unary),
    Arity2(Binary),
    Arity3(Ternary),
}

impl Semantics {
    fn arity(&self) -> usize {
        match self {
            Semantics::Arity0(_) => 0,
            Semantics::Arity1(_) => 1,
            Semantics::Arity2(_) => 2,
            Semantics::Arity3(_) => 3,
        }
    }
}

/// The table-driven handler.
pub struct SimpleHandler {
    table: FxHashMap<Mnemonic, Vec<Semantics>>,
}

impl SimpleHandler {
    /// Creates the handler with every supported mnemonic registered.
    #[must_use]
    pub fn new() -> Self {
        let mut handler = Self {
            table: FxHashMap::default(),
        };
        transfer::register(&mut handler);
        arith::register(&mut handler);
        logic::register(&mut handler);
        shift::register(&mut handler);
        cond::register(&mut handler);
        vector::register(&mut handler);
        handler
    }

    pub(crate) fn add(&mut self, mnemonic: Mnemonic, semantics: Semantics) {
        self.table.entry(mnemonic).or_default().push(semantics);
    }

    pub(crate) fn add_all(&mut self, mnemonics: &[Mnemonic], semantics: Semantics) {
        for m in mnemonics {
            self.add(*m, semantics);
        }
    }

    fn lookup(&self, instr: &Instruction) -> Option<Semantics> {
        self.table
            .get(&instr.mnemonic())?
            .iter()
            .find(|s| s.arity() == instr.arity())
            .copied()
    }

    /// Every mnemonic with at least one registered arity.
    #[must_use]
    pub fn mnemonics(&self) -> Vec<Mnemonic> {
        let mut out: Vec<Mnemonic> = self.table.keys().copied().collect();
        out.sort();
        out
    }
}

impl Default for SimpleHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Control transfers and label definitions; their effect is carried by the
/// path the checker follows.
fn is_control(instr: &Instruction) -> bool {
    instr.is_label_defn() || instr.is_jump() || instr.is_ret()
}

impl Handler for SimpleHandler {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn get_support(&self, instr: &Instruction) -> SupportLevel {
        if is_control(instr) || instr.mnemonic() == Mnemonic::Nop {
            return SupportLevel::FULL;
        }
        if !instr.operands().iter().all(Operand::is_modelable) {
            return SupportLevel::NONE;
        }
        match self.lookup(instr) {
            Some(_) => SupportLevel::FULL,
            None => SupportLevel::NONE,
        }
    }

    fn build_circuit(&mut self, instr: &Instruction, state: &mut SymState) -> Result<()> {
        if is_control(instr) || instr.mnemonic() == Mnemonic::Nop {
            return Ok(());
        }
        if let Some(bad) = instr.operands().iter().find(|o| !o.is_modelable()) {
            return Err(unsupported!("operand {} of {}", bad, instr));
        }
        let semantics = self
            .lookup(instr)
            .ok_or_else(|| unsupported!("{} with {} operands", instr.mnemonic(), instr.arity()))?;

        let ops = instr.operands();
        let mut values = Vec::with_capacity(ops.len());
        for op in ops {
            values.push(match (instr.mnemonic(), op) {
                (Mnemonic::Lea, Operand::Mem(m)) => state.address(m)?,
                _ => state.read(op)?,
            });
        }

        match semantics {
            Semantics::Arity0(f) => f(instr, state),
            Semantics::Arity1(f) => {
                let [v0] = take(values)?;
                f(instr, &ops[0], v0, state)
            }
            Semantics::Arity2(f) => f(instr, [&ops[0], &ops[1]], take(values)?, state),
            Semantics::Arity3(f) => f(instr, [&ops[0], &ops[1], &ops[2]], take(values)?, state),
        }
    }
}

fn take<const N: usize>(values: Vec<SymExpr>) -> Result<[SymExpr; N]> {
    let count = values.len();
    values
        .try_into()
        .map_err(|_| validator_error!("expected {} operand values, got {}", N, count))
}

/// Widens (sign extension) or truncates `value` to `width` bits.
pub(crate) fn fit(value: &SymExpr, width: u16) -> Result<SymExpr> {
    match value.width().cmp(&width) {
        std::cmp::Ordering::Equal => Ok(value.clone()),
        std::cmp::Ordering::Less => value.sign_extend(width),
        std::cmp::Ordering::Greater => value.low(width),
    }
}

/// A `width`-bit constant.
pub(crate) fn constant(value: u128, width: u16) -> SymExpr {
    SymExpr::constant(value, width)
}

/// Zero extends or truncates `value` to `width` bits.
pub(crate) fn resize_unsigned(value: &SymExpr, width: u16) -> Result<SymExpr> {
    if value.width() >= width {
        value.low(width)
    } else {
        value.zero_extend(width)
    }
}

/// Splits `value` into `lane`-bit lanes, lowest lane first.
pub(crate) fn lanes(value: &SymExpr, lane: u16) -> Result<Vec<SymExpr>> {
    (0..value.width() / lane)
        .map(|i| value.extract(lane * i + lane - 1, lane * i))
        .collect()
}

/// Joins lanes given lowest first.
pub(crate) fn join(lanes: &[SymExpr]) -> Result<SymExpr> {
    let mut iter = lanes.iter().rev();
    let first = iter
        .next()
        .ok_or_else(|| validator_error!("joining zero lanes"))?;
    iter.try_fold(first.clone(), |acc, l| acc.concat(l))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Concrete execution helpers for the family tests.

    use super::*;
    use crate::{
        symbolic::{simplify, BitValue, Evaluator, Model},
        symstate::{memory::FaultPolicy, MemoryModel},
        x64::{CpuState, Flag, GpRegister, SseRegister},
    };

    /// Runs `code` on `cpu` through the symbolic state and a model of `cpu`.
    pub(crate) fn run(code: &str, cpu: &CpuState) -> CpuState {
        let (mut state, model) = SymState::from_cpu(cpu, "T");
        let mut handler = SimpleHandler::new();
        for instr in code.parse::<crate::x64::Code>().unwrap().iter() {
            handler.build_circuit(instr, &mut state).unwrap();
        }
        let mut eval = Evaluator::new(&model);
        let mut out = state
            .concretize(&mut eval, crate::symstate::Cells::Current)
            .unwrap();
        for (addr, byte) in &cpu.memory {
            out.memory.entry(*addr).or_insert(*byte);
        }
        out
    }

    pub(crate) fn gp(cpu: &CpuState, name: &str) -> u64 {
        cpu.get_gp(GpRegister::from_name(name).unwrap())
    }

    pub(crate) fn with_gp(pairs: &[(&str, u64)]) -> CpuState {
        let mut cpu = CpuState::new();
        for (name, value) in pairs {
            cpu.set_gp(GpRegister::from_name(name).unwrap(), *value);
        }
        cpu
    }

    pub(crate) fn flag(cpu: &CpuState, flag: Flag) -> bool {
        cpu.get_flag(flag)
    }

    pub(crate) fn xmm(cpu: &CpuState, index: u8) -> [u64; 4] {
        cpu.get_sse(SseRegister::ymm(index))
    }

    /// A fresh symbolic state after running `code`, plus the instruction list.
    pub(crate) fn symbolic(code: &str) -> SymState {
        let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
        let mut handler = SimpleHandler::new();
        for instr in code.parse::<crate::x64::Code>().unwrap().iter() {
            handler.build_circuit(instr, &mut state).unwrap();
        }
        state
    }

    /// Evaluates `expr` after simplification with an empty model.
    pub(crate) fn constant_of(expr: &SymExpr) -> Option<BitValue> {
        simplify(expr).ok()?.as_constant()
    }

    pub(crate) fn model() -> Model {
        Model::new()
    }
}
