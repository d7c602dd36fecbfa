//! Symbolic machine states.
//!
//! A [`SymState`] maps every register, flag and memory byte to a symbolic
//! expression. A fresh state holds one variable per location, named after
//! the location plus a per-state suffix (`%rax_T0`, `%zf_T0`, `MEM_T0`), so
//! the start states of two programs never share variables by accident.
//!
//! Handlers mutate a state instruction by instruction. Register writes
//! follow x86-64 rules: 32-bit writes zero the upper half, 8 and 16-bit
//! writes preserve the remaining bits, legacy SSE writes preserve the upper
//! 128 bits of the `ymm` register and VEX writes zero them. Memory accesses
//! go through the configured [`memory::SymMemory`] and accumulate their fault
//! conditions into [`SymState::sigsegv`].

pub mod memory;

use std::fmt;

use crate::{
    symbolic::{ArrayValue, BitValue, Evaluator, Model, SymExpr},
    x64::{CpuState, Flag, GpRegister, Memory, Operand, RegSet, SseRegister, RSP},
    Result,
};

use memory::{ByteCell, FaultPolicy, FlatMemory, SegmentedMemory, SymMemory};

/// Which memory model new states use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryModel {
    /// One byte array for the whole address space.
    #[default]
    Flat,
    /// Stack frames relative to the initial `%rsp` plus a heap.
    Segmented {
        /// Frame size in bytes
        frame_size: u64,
    },
}

/// Which memory content [`SymState::concretize`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cells {
    /// The bytes as they were when the state was created
    Start,
    /// The bytes as they are now
    Current,
}

/// Read access to a satisfying assignment.
///
/// Implemented by the concrete [`Evaluator`] and by the solver bridge, so
/// states can be turned into [`CpuState`]s either way.
pub trait ModelView {
    /// Value of a bit-vector expression.
    ///
    /// # Errors
    ///
    /// Whatever the backing model reports for expressions it cannot evaluate.
    fn bv(&mut self, expr: &SymExpr) -> Result<BitValue>;

    /// Value of a boolean expression.
    ///
    /// # Errors
    ///
    /// Whatever the backing model reports for expressions it cannot evaluate.
    fn boolean(&mut self, expr: &SymExpr) -> Result<bool>;
}

impl ModelView for Evaluator<'_> {
    fn bv(&mut self, expr: &SymExpr) -> Result<BitValue> {
        self.eval_bv(expr)
    }

    fn boolean(&mut self, expr: &SymExpr) -> Result<bool> {
        self.eval_bool(expr)
    }
}

/// A symbolic register file, flag set and memory.
#[derive(Debug, Clone)]
pub struct SymState {
    gp: [SymExpr; 16],
    sse: [SymExpr; 16],
    flags: [SymExpr; 6],
    memory: Box<dyn SymMemory>,
    constraints: Vec<SymExpr>,
    sigsegv: SymExpr,
    sigfpe: SymExpr,
    written: RegSet,
    memory_written: bool,
    suffix: String,
}

impl SymState {
    /// Creates a state with a fresh variable for every location.
    ///
    /// # Arguments
    ///
    /// * `suffix` - Appended to every variable name, must be unique per program
    /// * `model` - The memory model
    /// * `policy` - Fault reporting of the memory model
    #[must_use]
    pub fn new(suffix: &str, model: MemoryModel, policy: FaultPolicy) -> Self {
        let name = |base: String| format!("{}_{}", base, suffix);
        let gp: [SymExpr; 16] =
            std::array::from_fn(|i| SymExpr::var(name(GpRegister::r64(i as u8).to_string()), 64));
        let sse: [SymExpr; 16] =
            std::array::from_fn(|i| SymExpr::var(name(SseRegister::ymm(i as u8).to_string()), 256));
        let flags: [SymExpr; 6] = std::array::from_fn(|i| {
            let flag = Flag::all().nth(i).unwrap_or(Flag::Cf);
            SymExpr::bool_var(name(format!("%{}", flag)))
        });

        let memory: Box<dyn SymMemory> = match model {
            MemoryModel::Flat => Box::new(
                FlatMemory::new(&name("MEM".to_string()), policy)
                    .with_stack_pointer(gp[RSP as usize].clone()),
            ),
            MemoryModel::Segmented { frame_size } => Box::new(SegmentedMemory::new(
                &name("MEM".to_string()),
                gp[RSP as usize].clone(),
                frame_size,
                policy,
            )),
        };

        Self {
            gp,
            sse,
            flags,
            memory,
            constraints: Vec::new(),
            sigsegv: SymExpr::bool(false),
            sigfpe: SymExpr::bool(false),
            written: RegSet::empty(),
            memory_written: false,
            suffix: suffix.to_string(),
        }
    }

    /// Creates a state holding the values of `cpu`.
    ///
    /// Registers and flags become constants; memory becomes a flat array
    /// variable whose content is fixed by the returned [`Model`].
    #[must_use]
    pub fn from_cpu(cpu: &CpuState, suffix: &str) -> (Self, Model) {
        let mut state = Self::new(suffix, MemoryModel::Flat, FaultPolicy::Suppress);
        for i in 0..16 {
            state.gp[i] = SymExpr::constant(u128::from(cpu.gp[i]), 64);
            state.sse[i] = SymExpr::bits(BitValue::from_words(&cpu.sse[i], 256));
        }
        for flag in Flag::all() {
            state.flags[flag.index()] = SymExpr::bool(cpu.get_flag(flag));
        }

        let mut image = ArrayValue::filled(BitValue::zero(8));
        for (addr, byte) in &cpu.memory {
            image
                .entries
                .insert(u128::from(*addr), BitValue::new(u128::from(*byte), 8));
        }
        let mut model = Model::new();
        model.set_array(format!("MEM_{}", suffix), image);
        (state, model)
    }

    /// The variable name suffix of this state.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    // ====================================================================
    // Registers and flags
    // ====================================================================

    /// The full 64-bit value of general purpose register `index`.
    #[must_use]
    pub fn gp_full(&self, index: u8) -> &SymExpr {
        &self.gp[usize::from(index & 15)]
    }

    /// Reads a general purpose register view.
    ///
    /// # Errors
    ///
    /// Only on internal sort errors.
    pub fn gp(&self, reg: GpRegister) -> Result<SymExpr> {
        let full = self.gp_full(reg.index());
        if reg.width() == 64 {
            return Ok(full.clone());
        }
        full.extract(reg.offset() + reg.width() - 1, reg.offset())
    }

    /// Writes a general purpose register view with x86-64 merge rules.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] if `value` is not as wide as `reg`.
    pub fn set_gp(&mut self, reg: GpRegister, value: &SymExpr) -> Result<()> {
        if value.width() != reg.width() {
            return Err(crate::Error::WidthMismatch {
                op: "register write",
                left: value.sort().to_string(),
                right: reg.to_string(),
            });
        }
        let slot = usize::from(reg.index() & 15);
        let full = &self.gp[slot];
        let (lo, hi) = (reg.offset(), reg.offset() + reg.width());
        let merged = match reg.width() {
            64 => value.clone(),
            32 => value.zero_extend(64)?,
            _ => {
                let mut out = value.clone();
                if hi < 64 {
                    out = full.extract(63, hi)?.concat(&out)?;
                }
                if lo > 0 {
                    out = out.concat(&full.extract(lo - 1, 0)?)?;
                }
                out
            }
        };
        self.gp[slot] = merged;
        let written = if reg.width() == 32 { reg.full() } else { reg };
        self.written = std::mem::take(&mut self.written).with_gp(written);
        Ok(())
    }

    /// The full 256-bit value of vector register `index`.
    #[must_use]
    pub fn sse_full(&self, index: u8) -> &SymExpr {
        &self.sse[usize::from(index & 15)]
    }

    /// Reads a vector register view.
    ///
    /// # Errors
    ///
    /// Only on internal sort errors.
    pub fn sse(&self, reg: SseRegister) -> Result<SymExpr> {
        let full = self.sse_full(reg.index());
        if reg.width() == 256 {
            return Ok(full.clone());
        }
        full.extract(reg.width() - 1, 0)
    }

    /// Writes a vector register view.
    ///
    /// A value narrower than the view is written to its low bits; the rest
    /// of the view is kept. With `zero_upper` every bit above the value is
    /// cleared instead, the VEX behaviour.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] if `value` is wider than `reg`.
    pub fn set_sse(&mut self, reg: SseRegister, value: &SymExpr, zero_upper: bool) -> Result<()> {
        let width = value.width();
        if width == 0 || width > reg.width() {
            return Err(crate::Error::WidthMismatch {
                op: "vector register write",
                left: value.sort().to_string(),
                right: reg.to_string(),
            });
        }
        let slot = usize::from(reg.index() & 15);
        self.sse[slot] = if zero_upper {
            value.zero_extend(256)?
        } else if width == 256 {
            value.clone()
        } else {
            self.sse[slot].extract(255, width)?.concat(value)?
        };
        let written = if zero_upper { reg.full() } else { reg };
        self.written = std::mem::take(&mut self.written).with_sse(written);
        Ok(())
    }

    /// Reads a flag.
    #[must_use]
    pub fn flag(&self, flag: Flag) -> &SymExpr {
        &self.flags[flag.index()]
    }

    /// Writes a flag.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] if `value` is not boolean.
    pub fn set_flag(&mut self, flag: Flag, value: &SymExpr) -> Result<()> {
        if !value.is_bool() {
            return Err(crate::Error::WidthMismatch {
                op: "flag write",
                left: value.sort().to_string(),
                right: format!("%{}", flag),
            });
        }
        self.flags[flag.index()] = value.clone();
        self.written = std::mem::take(&mut self.written).with_flag(flag);
        Ok(())
    }

    /// Gives a flag a fresh, unconstrained value.
    pub fn set_flag_undefined(&mut self, flag: Flag) {
        self.flags[flag.index()] = SymExpr::tmp_bool();
        self.written = std::mem::take(&mut self.written).with_flag(flag);
    }

    // ====================================================================
    // Memory
    // ====================================================================

    /// Computes the effective address of a memory operand.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Unsupported`] for addressing forms other than 64-bit
    /// base and index registers.
    pub fn address(&self, mem: &Memory) -> Result<SymExpr> {
        if !mem.is_typical() {
            return Err(unsupported!("memory operand {}", mem));
        }
        let mut address = SymExpr::constant(u128::from(mem.disp as u64), 64);
        if let Some(index) = mem.index {
            let scaled = self
                .gp_full(index.index())
                .mul(&SymExpr::constant(u128::from(mem.scale), 64))?;
            address = scaled.add(&address)?;
        }
        if let Some(base) = mem.base {
            address = self.gp_full(base.index()).add(&address)?;
        }
        Ok(address)
    }

    /// Reads `size` bits at `address`, accumulating the fault condition.
    ///
    /// # Errors
    ///
    /// Whatever the memory model reports.
    pub fn read_at(&mut self, address: &SymExpr, size: u16) -> Result<SymExpr> {
        let (value, fault) = self.memory.read(address, size)?;
        self.sigsegv = self.sigsegv.or(&fault)?;
        Ok(value)
    }

    /// Writes `value` at `address`, accumulating the fault condition.
    ///
    /// # Errors
    ///
    /// Whatever the memory model reports.
    pub fn write_at(&mut self, address: &SymExpr, value: &SymExpr) -> Result<()> {
        let fault = self.memory.write(address, value, value.width())?;
        self.sigsegv = self.sigsegv.or(&fault)?;
        self.memory_written = true;
        Ok(())
    }

    /// Reads the memory operand `mem`.
    ///
    /// # Errors
    ///
    /// See [`SymState::address`] and [`SymState::read_at`].
    pub fn read_memory(&mut self, mem: &Memory) -> Result<SymExpr> {
        let address = self.address(mem)?;
        self.read_at(&address, mem.size)
    }

    /// Writes the memory operand `mem`.
    ///
    /// # Errors
    ///
    /// See [`SymState::address`] and [`SymState::write_at`].
    pub fn write_memory(&mut self, mem: &Memory, value: &SymExpr) -> Result<()> {
        let address = self.address(mem)?;
        self.write_at(&address, value)
    }

    /// The memory model.
    #[must_use]
    pub fn memory(&self) -> &dyn SymMemory {
        self.memory.as_ref()
    }

    // ====================================================================
    // Operands
    // ====================================================================

    /// Reads an operand. Immediates are sign-extended to their encoded width.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Unsupported`] for labels and unmodeled memory forms.
    pub fn read(&mut self, operand: &Operand) -> Result<SymExpr> {
        match operand {
            Operand::Gp(r) => self.gp(*r),
            Operand::Sse(r) => self.sse(*r),
            Operand::Mem(m) => self.read_memory(m),
            Operand::Imm(i) => Ok(SymExpr::constant(
                u128::from(i.value as u64) & width_mask(i.width),
                i.width,
            )),
            Operand::Label(l) => Err(unsupported!("label operand {}", l)),
        }
    }

    /// Writes an operand; vector registers keep their upper bits.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Unsupported`] for immediates and labels,
    /// [`crate::Error::WidthMismatch`] on a value of the wrong width.
    pub fn write(&mut self, operand: &Operand, value: &SymExpr) -> Result<()> {
        match operand {
            Operand::Gp(r) => self.set_gp(*r, value),
            Operand::Sse(r) => self.set_sse(*r, value, false),
            Operand::Mem(m) => {
                if value.width() != m.size {
                    return Err(crate::Error::WidthMismatch {
                        op: "memory operand write",
                        left: value.sort().to_string(),
                        right: format!("{} bits", m.size),
                    });
                }
                self.write_memory(m, value)
            }
            Operand::Imm(_) | Operand::Label(_) => {
                Err(unsupported!("write to operand {}", operand))
            }
        }
    }

    // ====================================================================
    // Constraints and signals
    // ====================================================================

    /// Adds a side constraint.
    pub fn add_constraint(&mut self, constraint: SymExpr) {
        self.constraints.push(constraint);
    }

    /// Side constraints of the state and its memory model.
    #[must_use]
    pub fn constraints(&self) -> Vec<SymExpr> {
        let mut out = self.constraints.clone();
        out.extend(self.memory.constraints());
        out
    }

    /// Condition under which some access so far faulted.
    #[must_use]
    pub fn sigsegv(&self) -> &SymExpr {
        &self.sigsegv
    }

    /// Condition under which some division so far raised a divide error.
    #[must_use]
    pub fn sigfpe(&self) -> &SymExpr {
        &self.sigfpe
    }

    /// Adds a divide error condition.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] if `condition` is not boolean.
    pub fn raise_sigfpe(&mut self, condition: &SymExpr) -> Result<()> {
        self.sigfpe = self.sigfpe.or(condition)?;
        Ok(())
    }

    /// Registers and flags written since creation.
    #[must_use]
    pub fn written(&self) -> &RegSet {
        &self.written
    }

    /// `true` if memory was written since creation.
    #[must_use]
    pub fn memory_written(&self) -> bool {
        self.memory_written
    }

    // ====================================================================
    // Concretization
    // ====================================================================

    /// Reads a concrete machine state out of a model.
    ///
    /// Memory holds the bytes accessed so far, as selected by `cells`.
    ///
    /// # Errors
    ///
    /// Whatever `view` reports.
    pub fn concretize(&self, view: &mut dyn ModelView, cells: Cells) -> Result<CpuState> {
        let mut cpu = CpuState::new();
        for i in 0..16 {
            cpu.gp[i] = view.bv(&self.gp[i])?.as_u64();
            let words = view.bv(&self.sse[i])?.words();
            cpu.sse[i] = words;
        }
        for flag in Flag::all() {
            cpu.set_flag(flag, view.boolean(&self.flags[flag.index()])?);
        }
        let bytes: Vec<ByteCell> = match cells {
            Cells::Start => self.memory.start_cells()?,
            Cells::Current => self.memory.current_cells()?,
        };
        for cell in bytes {
            let address = view.bv(&cell.address)?.as_u64();
            let value = view.bv(&cell.value)?.as_u64() as u8;
            cpu.memory.insert(address, value);
        }
        Ok(cpu)
    }
}

fn width_mask(width: u16) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

impl fmt::Display for SymState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.gp.iter().enumerate() {
            writeln!(f, "{} = {}", GpRegister::r64(i as u8), value)?;
        }
        for flag in Flag::all() {
            writeln!(f, "%{} = {}", flag, self.flags[flag.index()])?;
        }
        write!(f, "sigsegv = {}", self.sigsegv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::simplify;

    fn eval(state_expr: &SymExpr, model: &Model) -> u128 {
        Evaluator::new(model).eval_bv(state_expr).unwrap().low()
    }

    #[test]
    fn test_fresh_state_names() {
        let state = SymState::new("T0", MemoryModel::Flat, FaultPolicy::Suppress);
        assert_eq!(state.gp_full(0).as_variable(), Some("%rax_T0"));
        assert_eq!(state.flag(Flag::Zf).as_variable(), Some("%zf_T0"));
        assert_eq!(state.sse_full(3).width(), 256);
        assert!(state.sigsegv().is_false());
        assert!(state.written().is_empty());
    }

    #[test]
    fn test_register_merge_rules() {
        let mut cpu = CpuState::new();
        cpu.gp[0] = 0x1122_3344_5566_7788;
        let (mut state, model) = SymState::from_cpu(&cpu, "C");

        state
            .set_gp(GpRegister::from_name("ah").unwrap(), &SymExpr::constant(0xaa, 8))
            .unwrap();
        assert_eq!(eval(state.gp_full(0), &model), 0x1122_3344_5566_aa88);

        state
            .set_gp(GpRegister::from_name("ax").unwrap(), &SymExpr::constant(0xbeef, 16))
            .unwrap();
        assert_eq!(eval(state.gp_full(0), &model), 0x1122_3344_5566_beef);

        state
            .set_gp(GpRegister::from_name("eax").unwrap(), &SymExpr::constant(1, 32))
            .unwrap();
        assert_eq!(eval(state.gp_full(0), &model), 1);
        assert!(state.written().contains_gp(GpRegister::r64(0)));
    }

    #[test]
    fn test_sse_upper_bits() {
        let mut cpu = CpuState::new();
        cpu.sse[1] = [1, 2, 3, 4];
        let (mut state, model) = SymState::from_cpu(&cpu, "C");
        let xmm1 = SseRegister::xmm(1);
        state.set_sse(xmm1, &SymExpr::constant(9, 128), false).unwrap();
        let full = Evaluator::new(&model).eval_bv(state.sse_full(1)).unwrap();
        assert_eq!(full.words(), [9, 0, 3, 4]);

        state.set_sse(xmm1, &SymExpr::constant(7, 64), true).unwrap();
        let full = Evaluator::new(&model).eval_bv(state.sse_full(1)).unwrap();
        assert_eq!(full.words(), [7, 0, 0, 0]);
    }

    #[test]
    fn test_memory_operand_round_trip() {
        let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
        let slot = Operand::Mem(Memory::base_disp(GpRegister::r64(RSP), -8, 64));
        let rdx = state.gp(GpRegister::r64(2)).unwrap();
        state.write(&slot, &rdx).unwrap();
        let back = state.read(&slot).unwrap();
        assert_eq!(simplify(&back).unwrap(), rdx);
        assert!(state.memory_written());
        assert_eq!(state.memory().access_list().len(), 2);
    }

    #[test]
    fn test_segmented_state_uses_initial_rsp() {
        let model = MemoryModel::Segmented { frame_size: 64 };
        let mut state = SymState::new("R", model, FaultPolicy::Explicit);
        let slot = Operand::Mem(Memory::base_disp(GpRegister::r64(RSP), 16, 32));
        state.write(&slot, &SymExpr::constant(5, 32)).unwrap();
        assert!(simplify(state.sigsegv()).unwrap().is_false());
        let value = state.read(&slot).unwrap();
        assert_eq!(simplify(&value).unwrap().as_constant().unwrap().low(), 5);
    }

    #[test]
    fn test_concretize_start_memory() {
        let mut cpu = CpuState::new();
        cpu.gp[usize::from(RSP)] = 0x1000;
        cpu.write_u64(0x1000, 0xdead_beef, 4);
        let (mut state, model) = SymState::from_cpu(&cpu, "C");
        let slot = Operand::Mem(Memory::base_disp(GpRegister::r64(RSP), 0, 32));
        state.write(&slot, &SymExpr::constant(0, 32)).unwrap();

        let mut view = Evaluator::new(&model);
        let start = state.concretize(&mut view, Cells::Start).unwrap();
        assert_eq!(start.read_u64(0x1000, 4), 0xdead_beef);
        let now = state.concretize(&mut view, Cells::Current).unwrap();
        assert_eq!(now.read_u64(0x1000, 4), 0);
        assert_eq!(now.gp[usize::from(RSP)], 0x1000);
    }

    #[test]
    fn test_immediates_keep_encoded_width() {
        let mut state = SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress);
        let imm = Operand::Imm(crate::x64::Immediate { value: -1, width: 8 });
        let v = state.read(&imm).unwrap();
        assert_eq!(v.as_constant().unwrap(), BitValue::new(0xff, 8));
    }
}
