//! Instruction semantics composed from learned formulas.
//!
//! A formula directory holds one AT&T listing per learned opcode, named after
//! the opcode: `andn_r64_r64_r64.s`, or `pshufd_xmm_xmm_imm8_27.s` for opcodes
//! whose behaviour depends on an 8-bit control immediate. A listing is a
//! label, a body and `retq`. The body computes the effect of the opcode on
//! its canonical operands:
//!
//! | operand class | 1st | 2nd | 3rd | 4th |
//! |---------------|-----|-----|-----|-----|
//! | general purpose | `%rbx` | `%rcx` | `%rsi` | `%rdi` |
//! | vector | `%xmm1` | `%xmm2` | `%xmm3` | `%xmm4` |
//!
//! (at the width of the operand kind). Everything the body writes is an
//! output of the opcode.
//!
//! Opcodes without a file of their own are mapped onto a learned register
//! form when they differ only in operand form:
//!
//! - [`SupportReason::GeneralizeSame`] - a mnemonic with identical register
//!   semantics, or a memory operand of the same width as the register
//! - [`SupportReason::GeneralizeShrink`] - a 32 or 64-bit memory operand in
//!   place of a vector register
//! - [`SupportReason::GeneralizeExtend`] - an immediate in place of a wider
//!   general purpose register
//!
//! The learned formula is then instantiated for the real instruction: the
//! canonical operands are renamed into the real ones, values are truncated
//! or sign-extended to the real widths and written into the real state.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use rustc_hash::FxHashMap;
use strum::Display;

use crate::{
    handlers::{simple::fit, Handler, SimpleHandler, SupportLevel},
    symbolic::{simplify, variables, Sort, Substitution, SymExpr},
    symstate::{memory::FaultPolicy, MemoryModel, SymState},
    x64::{
        Code, Flag, GpRegister, Immediate, Instruction, Mnemonic, Opcode, Operand, OperandKind,
        SseRegister,
    },
    Error, Result,
};

/// Register indices of the canonical general purpose operands.
const CANONICAL_GP: [u8; 4] = [3, 1, 6, 7];

/// Nesting limit for formulas whose bodies use other learned formulas.
const MAX_DEPTH: usize = 8;

/// Mnemonics sharing the register semantics of another mnemonic.
const DUPLICATES: [(Mnemonic, Mnemonic); 5] = [
    (Mnemonic::Movups, Mnemonic::Movaps),
    (Mnemonic::Movapd, Mnemonic::Movaps),
    (Mnemonic::Movupd, Mnemonic::Movaps),
    (Mnemonic::Movdqa, Mnemonic::Movaps),
    (Mnemonic::Movdqu, Mnemonic::Movaps),
];

/// Why the strata handler supports an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportReason {
    /// A formula was learned for the opcode itself
    Learned,
    /// Same operand widths as a learned register opcode
    GeneralizeSame,
    /// A scalar memory operand where the learned opcode has a vector register
    GeneralizeShrink,
    /// An immediate where the learned opcode has a wider register
    GeneralizeExtend,
}

/// A learned opcode together with its control immediate, if any.
type FormulaKey = (Opcode, Option<u8>);

/// The outputs of a learned listing, over the variables of a fresh state.
#[derive(Debug, Clone)]
struct Formula {
    instr: Instruction,
    suffix: String,
    gp: Vec<(GpRegister, SymExpr)>,
    sse: Vec<(SseRegister, SymExpr)>,
    flags: Vec<(Flag, SymExpr)>,
    sigfpe: SymExpr,
}

fn controls_by_imm8(mnemonic: Mnemonic) -> bool {
    matches!(
        mnemonic,
        Mnemonic::Pshufd | Mnemonic::Shufps | Mnemonic::Palignr
    )
}

fn is_register_only(opcode: &Opcode) -> bool {
    opcode.kinds.iter().all(|k| {
        k.is_reg() || (*k == OperandKind::Imm8 && controls_by_imm8(opcode.mnemonic))
    })
}

fn is_gp_kind(kind: OperandKind) -> bool {
    matches!(
        kind,
        OperandKind::R8 | OperandKind::R16 | OperandKind::R32 | OperandKind::R64
    )
}

fn memory_kind(width: u16) -> Option<OperandKind> {
    match width {
        8 => Some(OperandKind::M8),
        16 => Some(OperandKind::M16),
        32 => Some(OperandKind::M32),
        64 => Some(OperandKind::M64),
        128 => Some(OperandKind::M128),
        256 => Some(OperandKind::M256),
        _ => None,
    }
}

/// Immediate kinds that can stand in for a general purpose register.
fn immediate_kinds(width: u16) -> impl Iterator<Item = OperandKind> {
    [
        OperandKind::Imm8,
        OperandKind::Imm16,
        OperandKind::Imm32,
        OperandKind::Imm64,
    ]
    .into_iter()
    .filter(move |k| k.width() <= width)
}

/// Parses a formula file stem into an opcode and control immediate.
fn parse_formula_name(stem: &str) -> Option<FormulaKey> {
    if let Ok(opcode) = Opcode::from_str(stem) {
        return Some((opcode, None));
    }
    let (head, imm) = stem.rsplit_once('_')?;
    let opcode = Opcode::from_str(head).ok()?;
    if !(opcode.has_imm8() && controls_by_imm8(opcode.mnemonic)) {
        return None;
    }
    Some((opcode, Some(imm.parse().ok()?)))
}

fn formula_name((opcode, imm): &FormulaKey) -> String {
    match imm {
        Some(imm) => format!("{}_{}", opcode, imm),
        None => opcode.to_string(),
    }
}

/// The control immediate of an instruction, always its last operand.
fn control_imm(instr: &Instruction) -> Option<u8> {
    instr.operands().last()?.as_imm().map(|v| v as u8)
}

/// Builds the instruction a listing for `key` implements.
fn canonical_instruction((opcode, imm): &FormulaKey) -> Result<Instruction> {
    let (mut gp, mut sse) = (0usize, 0u8);
    let mut operands = Vec::with_capacity(opcode.kinds.len());
    for kind in &opcode.kinds {
        let operand = match kind {
            k if is_gp_kind(*k) => {
                let index = CANONICAL_GP
                    .get(gp)
                    .ok_or_else(|| Error::Strata(format!("too many operands in {}", opcode)))?;
                gp += 1;
                Operand::Gp(GpRegister::new(*index, k.width()))
            }
            OperandKind::Xmm => {
                sse += 1;
                Operand::Sse(SseRegister::xmm(sse))
            }
            OperandKind::Ymm => {
                sse += 1;
                Operand::Sse(SseRegister::ymm(sse))
            }
            OperandKind::Imm8 => {
                let value = imm.ok_or_else(|| {
                    Error::Strata(format!("{} needs a control immediate", opcode))
                })?;
                Operand::Imm(Immediate {
                    value: i64::from(value),
                    width: 8,
                })
            }
            k => return Err(Error::Strata(format!("no canonical {} operand", k))),
        };
        operands.push(operand);
    }
    Ok(match opcode.condition {
        Some(condition) => Instruction::conditional(opcode.mnemonic, condition, operands),
        None => Instruction::new(opcode.mnemonic, operands),
    })
}

/// The learned formulas of one directory and the opcodes they cover.
///
/// The registry is computed once when the context is created; formulas are
/// parsed on first use and kept for the lifetime of the context.
#[derive(Debug, Default)]
pub struct StrataContext {
    dir: Option<PathBuf>,
    learned: FxHashMap<FormulaKey, PathBuf>,
    registry: FxHashMap<Opcode, (Opcode, SupportReason)>,
    cache: FxHashMap<FormulaKey, Formula>,
}

impl StrataContext {
    /// Loads the formula directory `dir`.
    ///
    /// Files that do not name a register-only opcode are skipped with a
    /// warning. Their contents are not read until needed.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding `<opcode>.s` listings
    ///
    /// # Errors
    ///
    /// [`crate::Error::Io`] if the directory cannot be listed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut learned = FxHashMap::default();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "s") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match parse_formula_name(stem) {
                Some(key) if is_register_only(&key.0) => {
                    learned.insert(key, path.clone());
                }
                Some(_) => log::warn!("formula {} is not register-only, skipped", path.display()),
                None => log::warn!("{} does not name an opcode, skipped", path.display()),
            }
        }

        let mut context = Self {
            dir: Some(dir.to_path_buf()),
            learned,
            ..Self::default()
        };
        context.build_registry();
        log::debug!(
            "strata: {} formulas in {} cover {} opcodes",
            context.learned.len(),
            dir.display(),
            context.registry.len()
        );
        Ok(context)
    }

    /// The formula directory, `None` for an empty context.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn build_registry(&mut self) {
        let mut learned: Vec<Opcode> = self.learned.keys().map(|(op, _)| op.clone()).collect();
        learned.sort();
        learned.dedup();

        let mut registry = FxHashMap::default();
        let mut add = |opcode: Opcode, canonical: &Opcode, reason: SupportReason| {
            registry
                .entry(opcode)
                .or_insert_with(|| (canonical.clone(), reason));
        };

        // register forms: the learned opcodes and their duplicates
        let mut forms = Vec::new();
        for op in &learned {
            add(op.clone(), op, SupportReason::Learned);
            forms.push((op.clone(), op.clone()));
        }
        for op in &learned {
            for (duplicate, base) in DUPLICATES {
                if base == op.mnemonic {
                    let form = Opcode {
                        mnemonic: duplicate,
                        ..op.clone()
                    };
                    add(form.clone(), op, SupportReason::GeneralizeSame);
                    forms.push((form, op.clone()));
                }
            }
        }

        for (form, canonical) in &forms {
            for (i, kind) in form.kinds.iter().enumerate() {
                if let Some(mem) = kind.is_reg().then(|| memory_kind(kind.width())).flatten() {
                    add(form.with_kind(i, mem), canonical, SupportReason::GeneralizeSame);
                }
            }
        }
        for (form, canonical) in &forms {
            for (i, kind) in form.kinds.iter().enumerate().skip(1) {
                if !is_gp_kind(*kind) {
                    continue;
                }
                for imm in immediate_kinds(kind.width()) {
                    let extended = form.with_kind(i, imm);
                    add(extended.clone(), canonical, SupportReason::GeneralizeExtend);
                    for (j, other) in form.kinds.iter().enumerate() {
                        if let Some(mem) = (j != i && other.is_reg())
                            .then(|| memory_kind(other.width()))
                            .flatten()
                        {
                            add(
                                extended.with_kind(j, mem),
                                canonical,
                                SupportReason::GeneralizeExtend,
                            );
                        }
                    }
                }
            }
        }
        for (form, canonical) in &forms {
            for (i, kind) in form.kinds.iter().enumerate() {
                if matches!(kind, OperandKind::Xmm | OperandKind::Ymm) {
                    for mem in [OperandKind::M32, OperandKind::M64] {
                        add(form.with_kind(i, mem), canonical, SupportReason::GeneralizeShrink);
                    }
                }
            }
        }

        self.registry = registry;
    }

    /// Finds the learned formula for `instr` and the way it applies.
    fn resolve(&self, instr: &Instruction) -> Option<(FormulaKey, SupportReason)> {
        let (canonical, reason) = self.registry.get(&instr.opcode())?;
        let imm = if canonical.has_imm8() && controls_by_imm8(canonical.mnemonic) {
            Some(control_imm(instr)?)
        } else {
            None
        };
        let key = (canonical.clone(), imm);
        self.learned.contains_key(&key).then_some((key, *reason))
    }

    /// Why `instr` is supported, `None` if it is not.
    #[must_use]
    pub fn support_reason(&self, instr: &Instruction) -> Option<SupportReason> {
        self.resolve(instr).map(|(_, reason)| reason)
    }

    /// Every opcode the registry covers, sorted.
    #[must_use]
    pub fn supported_opcodes(&self) -> Vec<Opcode> {
        let mut out: Vec<Opcode> = self.registry.keys().cloned().collect();
        out.sort();
        out
    }

    /// Number of other opcodes that reuse the formula of `opcode`.
    #[must_use]
    pub fn used_for(&self, opcode: &Opcode) -> usize {
        self.registry
            .iter()
            .filter(|(k, (canonical, _))| canonical == opcode && *k != opcode)
            .count()
    }
}

/// Builds circuits from the formulas of a [`StrataContext`].
///
/// Listing bodies are executed with a [`SimpleHandler`]; body instructions
/// it does not cover are resolved through the context again.
pub struct StrataHandler {
    context: StrataContext,
    base: SimpleHandler,
}

impl StrataHandler {
    /// Creates a handler over `context`.
    #[must_use]
    pub fn new(context: StrataContext) -> Self {
        Self {
            context,
            base: SimpleHandler::new(),
        }
    }

    /// The formula context.
    #[must_use]
    pub fn context(&self) -> &StrataContext {
        &self.context
    }

    fn formula(&mut self, key: &FormulaKey, depth: usize) -> Result<Formula> {
        if let Some(formula) = self.context.cache.get(key) {
            return Ok(formula.clone());
        }
        let path = self
            .context
            .learned
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Strata(format!("no formula for {}", formula_name(key))))?;
        let code: Code = fs::read_to_string(&path)?.parse()?;
        let body = match code.as_slice() {
            [first, body @ .., last] if first.is_label_defn() && last.is_ret() => body,
            _ => {
                return Err(Error::Strata(format!(
                    "{}: expected a label, a body and retq",
                    path.display()
                )))
            }
        };

        let suffix = formula_name(key);
        let mut tmp = SymState::new(&suffix, MemoryModel::Flat, FaultPolicy::Suppress);
        for instr in body {
            if !self.base.get_support(instr).is_empty() {
                self.base.build_circuit(instr, &mut tmp)?;
            } else if self.context.resolve(instr).is_some() {
                self.apply(instr, &mut tmp, depth + 1)?;
            } else {
                return Err(Error::Strata(format!(
                    "{}: {} is not supported",
                    path.display(),
                    instr
                )));
            }
        }
        if !tmp.memory().access_list().is_empty() {
            return Err(Error::Strata(format!(
                "{}: formulas must not access memory",
                path.display()
            )));
        }

        let written = tmp.written().clone();
        let formula = Formula {
            instr: canonical_instruction(key)?,
            gp: written
                .gp_registers()
                .map(|r| Ok((r, tmp.gp(r)?)))
                .collect::<Result<_>>()?,
            sse: written
                .sse_registers()
                .map(|r| Ok((r, tmp.sse(r)?)))
                .collect::<Result<_>>()?,
            flags: written.flags().map(|f| (f, tmp.flag(f).clone())).collect(),
            sigfpe: tmp.sigfpe().clone(),
            suffix,
        };
        log::debug!("strata: loaded {}", path.display());
        self.context.cache.insert(key.clone(), formula.clone());
        Ok(formula)
    }

    /// Instantiates the formula for `instr` in `state`.
    fn apply(&mut self, instr: &Instruction, state: &mut SymState, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::Strata(format!("formulas for {} nest too deeply", instr)));
        }
        let (key, reason) = self
            .context
            .resolve(instr)
            .ok_or_else(|| unsupported!("no learned formula for {}", instr.opcode()))?;
        let formula = self.formula(&key, depth)?;
        log::trace!("strata: {} via {} ({})", instr, formula.instr, reason);

        let mut rename = renaming(&formula, instr, state)?;
        let canonical = &formula.instr;
        let real = instr.operands();

        let mut outputs = Vec::new();
        for (view, value) in &formula.gp {
            let value = simplify(&rename.apply(value)?)?;
            let target = translate(canonical, real, |op| {
                let reg = op.as_gp()?;
                (reg.index() == view.index()).then_some(reg == *view)
            });
            outputs.push((target.unwrap_or(Target::Gp(*view)), value));
        }
        for (view, value) in &formula.sse {
            let value = simplify(&rename.apply(value)?)?;
            let target = translate(canonical, real, |op| {
                let reg = op.as_sse()?;
                (reg.index() == view.index()).then_some(reg == *view)
            });
            outputs.push((target.unwrap_or(Target::Sse(*view)), value));
        }
        let flags = formula
            .flags
            .iter()
            .map(|(flag, value)| Ok((*flag, simplify(&rename.apply(value)?)?)))
            .collect::<Result<Vec<_>>>()?;
        let sigfpe = simplify(&rename.apply(&formula.sigfpe)?)?;

        for (target, value) in outputs {
            match target {
                Target::Gp(reg) => state.set_gp(reg, &fit(&value, reg.width())?)?,
                Target::Sse(reg) => state.set_sse(reg, &fit(&value, reg.width())?, false)?,
                Target::Operand(op) => state.write(op, &fit(&value, op.width())?)?,
            }
        }
        for (flag, value) in flags {
            state.set_flag(flag, &value)?;
        }
        if !sigfpe.is_false() {
            state.raise_sigfpe(&sigfpe)?;
        }
        Ok(())
    }
}

/// Maps the start variables of the formula to start values of `state`.
fn renaming(
    formula: &Formula,
    instr: &Instruction,
    state: &mut SymState,
) -> Result<Substitution> {
    let canonical = formula.instr.operands();
    let real = instr.operands();
    let values = real
        .iter()
        .map(|op| state.read(op))
        .collect::<Result<Vec<_>>>()?;
    let position = |matches: &dyn Fn(&Operand) -> bool| canonical.iter().position(matches);

    let mut rename = Substitution::new();
    for k in 0..16u8 {
        let name = format!("{}_{}", GpRegister::r64(k), formula.suffix);
        let value = match position(&|op| op.as_gp().is_some_and(|r| r.index() == k)) {
            Some(i) => match &real[i] {
                Operand::Gp(r) => state.gp_full(r.index()).clone(),
                _ => fit(&values[i], 64)?,
            },
            None => state.gp_full(k).clone(),
        };
        rename.insert(name, value);

        let name = format!("{}_{}", SseRegister::ymm(k), formula.suffix);
        let value = match position(&|op| op.as_sse().is_some_and(|r| r.index() == k)) {
            Some(i) => match &real[i] {
                Operand::Sse(r) => state.sse_full(r.index()).clone(),
                _ => fit(&values[i], 256)?,
            },
            None => state.sse_full(k).clone(),
        };
        rename.insert(name, value);
    }
    for flag in Flag::all() {
        rename.insert(
            format!("%{}_{}", flag, formula.suffix),
            state.flag(flag).clone(),
        );
    }

    let outputs = formula
        .gp
        .iter()
        .map(|(_, v)| v)
        .chain(formula.sse.iter().map(|(_, v)| v))
        .chain(formula.flags.iter().map(|(_, v)| v))
        .chain([&formula.sigfpe]);
    for var in variables(outputs) {
        let Some(name) = var.as_variable().filter(|n| n.starts_with("TMP_")) else {
            continue;
        };
        let fresh = match var.sort() {
            Sort::Bool => SymExpr::tmp_bool(),
            Sort::Bv(width) => SymExpr::tmp_var(width),
            Sort::Array { key, value } => SymExpr::tmp_array(key, value),
        };
        rename.insert(name.to_string(), fresh);
    }
    Ok(rename)
}

/// Where a formula output lands in the real state.
enum Target<'a> {
    Gp(GpRegister),
    Sse(SseRegister),
    Operand(&'a Operand),
}

/// Finds the real location of a canonical output register.
///
/// `same_register` returns `None` for canonical operands on another
/// register, `Some(true)` for the exact view and `Some(false)` for another
/// view of the same register, which maps to the whole real register.
fn translate<'a>(
    canonical: &Instruction,
    real: &'a [Operand],
    same_register: impl Fn(&Operand) -> Option<bool>,
) -> Option<Target<'a>> {
    canonical
        .operands()
        .iter()
        .zip(real)
        .find_map(|(c, r)| same_register(c).map(|exact| (exact, r)))
        .map(|(exact, r)| match (r, exact) {
            (Operand::Gp(reg), true) => Target::Gp(*reg),
            (Operand::Gp(reg), false) => Target::Gp(reg.full()),
            (Operand::Sse(reg), true) => Target::Sse(*reg),
            (Operand::Sse(reg), false) => Target::Sse(reg.full()),
            (other, _) => Target::Operand(other),
        })
}

impl Handler for StrataHandler {
    fn name(&self) -> &'static str {
        "strata"
    }

    fn get_support(&self, instr: &Instruction) -> SupportLevel {
        let operands_ok = instr.operands().iter().all(|op| match op {
            Operand::Gp(r) => !r.is_high(),
            op => op.is_modelable(),
        });
        if operands_ok && self.context.resolve(instr).is_some() {
            SupportLevel::CHECKABLE
        } else {
            SupportLevel::NONE
        }
    }

    fn build_circuit(&mut self, instr: &Instruction, state: &mut SymState) -> Result<()> {
        if self.get_support(instr).is_empty() {
            return Err(unsupported!("no learned formula for {}", instr));
        }
        self.apply(instr, state, 0)
    }
}
