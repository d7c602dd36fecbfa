//! The invariant language.
//!
//! An [`Invariant`] relates a target state and a rewrite state at a cut
//! point of the dual automaton. Every invariant can be turned into a
//! boolean formula over a pair of [`SymState`]s, for proof obligations, and
//! checked on a pair of [`CpuState`]s, for filtering learned candidates
//! against test-case data.
//!
//! # Example
//!
//! ```rust
//! use x64verify::{
//!     validator::{Invariant, Side, Variable},
//!     x64::{CpuState, GpRegister},
//! };
//!
//! let rax = GpRegister::r64(0);
//! let inv = Invariant::equal(Variable::new(Side::Target, rax), Variable::new(Side::Rewrite, rax));
//!
//! let mut target = CpuState::new();
//! let mut rewrite = CpuState::new();
//! target.set_gp(rax, 7);
//! rewrite.set_gp(rax, 7);
//! assert!(inv.check(&target, &rewrite)?);
//! rewrite.set_gp(rax, 8);
//! assert!(!inv.check(&target, &rewrite)?);
//! # Ok::<(), x64verify::Error>(())
//! ```

use std::fmt;

use crate::{
    handlers::flags::condition,
    symbolic::{Evaluator, SymExpr},
    symstate::SymState,
    x64::{Condition, CpuState, GpRegister, RegSet, RSP},
    Result,
};

/// Which program a variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// The reference program
    Target,
    /// The candidate program
    Rewrite,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Target => write!(f, "T"),
            Side::Rewrite => write!(f, "R"),
        }
    }
}

/// A general purpose register view of one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    /// The program
    pub side: Side,
    /// The register view; narrower views are zero extended
    pub reg: GpRegister,
}

impl Variable {
    /// Creates a variable.
    #[must_use]
    pub const fn new(side: Side, reg: GpRegister) -> Self {
        Self { side, reg }
    }

    /// The value as a 64-bit expression.
    ///
    /// # Errors
    ///
    /// [`crate::Error::WidthMismatch`] on malformed register views.
    pub fn formula(&self, target: &SymState, rewrite: &SymState) -> Result<SymExpr> {
        let value = pick(self.side, target, rewrite).gp(self.reg)?;
        value.zero_extend(64)
    }

    /// The value in a concrete state pair.
    #[must_use]
    pub fn value(&self, target: &CpuState, rewrite: &CpuState) -> u64 {
        pick(self.side, target, rewrite).get_gp(self.reg)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.reg, self.side)
    }
}

/// `coefficient * variable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term {
    /// The variable
    pub var: Variable,
    /// Its coefficient
    pub coefficient: i64,
}

/// Invariants over a (target, rewrite) state pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invariant {
    /// Always holds.
    True,
    /// Never holds.
    False,
    /// All members hold; empty is true.
    Conjunction(Vec<Invariant>),
    /// Some member holds; empty is false.
    Disjunction(Vec<Invariant>),
    /// The second holds whenever the first does.
    Implication(Box<Invariant>, Box<Invariant>),
    /// `sum(coefficient * var) == constant`, modulo 2^64.
    Equality {
        /// The left-hand side
        terms: Vec<Term>,
        /// The right-hand side
        constant: i64,
    },
    /// The jump condition evaluates as `taken` on the flags of one side.
    Flag {
        /// Whose flags
        side: Side,
        /// The condition code of the jump
        condition: Condition,
        /// `true` for "jump taken", `false` for "falls through"
        taken: bool,
    },
    /// The variable is non-negative (or negative) as a signed value of its width.
    Sign {
        /// The variable
        var: Variable,
        /// Which sign
        nonnegative: bool,
    },
    /// The variable is not zero.
    NonZero(Variable),
    /// Both programs see the same memory.
    MemoryEquality,
    /// Both programs leave the same memory to their caller: bytes below the
    /// entry stack pointer are ignored where the memory model separates them.
    ReturnMemoryEquality,
    /// Neither program has raised a signal.
    NoSignals,
    /// Both programs agree on every location of the set.
    StateEquality(RegSet),
}

impl Invariant {
    /// `a == b`.
    #[must_use]
    pub fn equal(a: Variable, b: Variable) -> Self {
        Self::offset(a, b, 0)
    }

    /// `a - b == constant`.
    #[must_use]
    pub fn offset(a: Variable, b: Variable, constant: i64) -> Self {
        Invariant::Equality {
            terms: vec![
                Term {
                    var: a,
                    coefficient: 1,
                },
                Term {
                    var: b,
                    coefficient: -1,
                },
            ],
            constant,
        }
    }

    /// `a == constant`.
    #[must_use]
    pub fn constant(a: Variable, constant: i64) -> Self {
        Invariant::Equality {
            terms: vec![Term {
                var: a,
                coefficient: 1,
            }],
            constant,
        }
    }

    /// The members of a conjunction, or the invariant itself.
    #[must_use]
    pub fn conjuncts(&self) -> Vec<Invariant> {
        match self {
            Invariant::Conjunction(members) => members.clone(),
            Invariant::True => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// The formula of this invariant over a state pair.
    ///
    /// # Arguments
    ///
    /// * `target` - State of the target program
    /// * `rewrite` - State of the rewrite at the same cut point
    ///
    /// # Errors
    ///
    /// [`crate::Error::Validator`] if the memory models of the two states
    /// cannot be compared, [`crate::Error::WidthMismatch`] on malformed terms.
    pub fn formula(&self, target: &SymState, rewrite: &SymState) -> Result<SymExpr> {
        match self {
            Invariant::True => Ok(SymExpr::bool(true)),
            Invariant::False => Ok(SymExpr::bool(false)),
            Invariant::Conjunction(members) => {
                let parts = members
                    .iter()
                    .map(|m| m.formula(target, rewrite))
                    .collect::<Result<Vec<_>>>()?;
                SymExpr::and_all(&parts)
            }
            Invariant::Disjunction(members) => {
                let parts = members
                    .iter()
                    .map(|m| m.formula(target, rewrite))
                    .collect::<Result<Vec<_>>>()?;
                SymExpr::or_all(&parts)
            }
            Invariant::Implication(a, b) => a
                .formula(target, rewrite)?
                .implies(&b.formula(target, rewrite)?),
            Invariant::Equality { terms, constant } => {
                let mut sum = SymExpr::constant(0, 64);
                for term in terms {
                    let coefficient = SymExpr::constant(u128::from(term.coefficient as u64), 64);
                    sum = sum.add(&coefficient.mul(&term.var.formula(target, rewrite)?)?)?;
                }
                sum.eq(&SymExpr::constant(u128::from(*constant as u64), 64))
            }
            Invariant::Flag {
                side,
                condition: cc,
                taken,
            } => {
                let holds = condition(pick(*side, target, rewrite), *cc)?;
                if *taken {
                    Ok(holds)
                } else {
                    holds.not()
                }
            }
            Invariant::Sign { var, nonnegative } => {
                let value = pick(var.side, target, rewrite).gp(var.reg)?;
                let negative = value.msb()?.eq(&SymExpr::constant(1, 1))?;
                if *nonnegative {
                    negative.not()
                } else {
                    Ok(negative)
                }
            }
            Invariant::NonZero(var) => {
                let value = pick(var.side, target, rewrite).gp(var.reg)?;
                value.ne(&SymExpr::constant(0, value.width()))
            }
            Invariant::MemoryEquality => target.memory().equality_constraint(rewrite.memory()),
            Invariant::ReturnMemoryEquality => {
                target.memory().return_equality_constraint(rewrite.memory())
            }
            Invariant::NoSignals => {
                let signals = [
                    target.sigsegv(),
                    target.sigfpe(),
                    rewrite.sigsegv(),
                    rewrite.sigfpe(),
                ];
                SymExpr::or_all(signals)?.not()
            }
            Invariant::StateEquality(regs) => {
                let mut parts = Vec::new();
                for reg in regs.gp_registers() {
                    parts.push(target.gp(reg)?.eq(&rewrite.gp(reg)?)?);
                }
                for reg in regs.sse_registers() {
                    parts.push(target.sse(reg)?.eq(&rewrite.sse(reg)?)?);
                }
                for flag in regs.flags() {
                    parts.push(target.flag(flag).iff(rewrite.flag(flag))?);
                }
                SymExpr::and_all(&parts)
            }
        }
    }

    /// Checks the invariant on concrete states.
    ///
    /// Signals are never part of a concrete state, so [`Invariant::NoSignals`]
    /// always holds here.
    ///
    /// # Errors
    ///
    /// Only if evaluating a jump condition fails, which is not expected.
    pub fn check(&self, target: &CpuState, rewrite: &CpuState) -> Result<bool> {
        Ok(match self {
            Invariant::True | Invariant::NoSignals => true,
            Invariant::False => false,
            Invariant::Conjunction(members) => {
                for m in members {
                    if !m.check(target, rewrite)? {
                        return Ok(false);
                    }
                }
                true
            }
            Invariant::Disjunction(members) => {
                for m in members {
                    if m.check(target, rewrite)? {
                        return Ok(true);
                    }
                }
                false
            }
            Invariant::Implication(a, b) => {
                !a.check(target, rewrite)? || b.check(target, rewrite)?
            }
            Invariant::Equality { terms, constant } => {
                let sum = terms.iter().fold(0u64, |acc, t| {
                    acc.wrapping_add(
                        (t.coefficient as u64).wrapping_mul(t.var.value(target, rewrite)),
                    )
                });
                sum == *constant as u64
            }
            Invariant::Flag {
                side,
                condition: cc,
                taken,
            } => {
                let (state, model) = SymState::from_cpu(pick(*side, target, rewrite), "F");
                let holds = Evaluator::new(&model).eval_bool(&condition(&state, *cc)?)?;
                holds == *taken
            }
            Invariant::Sign { var, nonnegative } => {
                let value = var.value(target, rewrite);
                let negative = (value >> (var.reg.width() - 1)) & 1 == 1;
                negative != *nonnegative
            }
            Invariant::NonZero(var) => var.value(target, rewrite) != 0,
            Invariant::MemoryEquality => target
                .first_difference(rewrite, &RegSet::empty(), true)
                .is_none(),
            Invariant::ReturnMemoryEquality => {
                let floor = target.get_gp(GpRegister::r64(RSP));
                target.first_memory_difference(rewrite, floor).is_none()
            }
            Invariant::StateEquality(regs) => {
                target.first_difference(rewrite, regs, false).is_none()
            }
        })
    }
}

/// Maps every conjunct `A` of `conj` to `assume => A`.
#[must_use]
pub fn transform_with_assumption(assume: &Invariant, conj: &[Invariant]) -> Invariant {
    Invariant::Conjunction(
        conj.iter()
            .map(|a| Invariant::Implication(Box::new(assume.clone()), Box::new(a.clone())))
            .collect(),
    )
}

fn pick<T>(side: Side, target: T, rewrite: T) -> T {
    match side {
        Side::Target => target,
        Side::Rewrite => rewrite,
    }
}

fn join(f: &mut fmt::Formatter<'_>, members: &[Invariant], sep: &str) -> fmt::Result {
    for (i, m) in members.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", sep)?;
        }
        write!(f, "({})", m)?;
    }
    Ok(())
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::True => write!(f, "true"),
            Invariant::False => write!(f, "false"),
            Invariant::Conjunction(m) if m.is_empty() => write!(f, "true"),
            Invariant::Conjunction(m) => join(f, m, "&&"),
            Invariant::Disjunction(m) if m.is_empty() => write!(f, "false"),
            Invariant::Disjunction(m) => join(f, m, "||"),
            Invariant::Implication(a, b) => write!(f, "({}) => ({})", a, b),
            Invariant::Equality { terms, constant } => {
                for (i, t) in terms.iter().enumerate() {
                    match (i, t.coefficient) {
                        (0, 1) => write!(f, "{}", t.var)?,
                        (0, c) => write!(f, "{}*{}", c, t.var)?,
                        (_, 1) => write!(f, " + {}", t.var)?,
                        (_, -1) => write!(f, " - {}", t.var)?,
                        (_, c) if c < 0 => write!(f, " - {}*{}", c.unsigned_abs(), t.var)?,
                        (_, c) => write!(f, " + {}*{}", c, t.var)?,
                    }
                }
                write!(f, " = {}", constant)
            }
            Invariant::Flag {
                side,
                condition,
                taken,
            } => {
                let verb = if *taken { "taken" } else { "not taken" };
                write!(f, "j{}_{} {}", condition, side, verb)
            }
            Invariant::Sign { var, nonnegative } => {
                write!(f, "{} {} 0", var, if *nonnegative { ">=" } else { "<" })
            }
            Invariant::NonZero(var) => write!(f, "{} != 0", var),
            Invariant::MemoryEquality => write!(f, "mem_T = mem_R"),
            Invariant::ReturnMemoryEquality => write!(f, "mem_T = mem_R above %rsp"),
            Invariant::NoSignals => write!(f, "no signals"),
            Invariant::StateEquality(regs) => write!(f, "state_T = state_R on {}", regs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        symbolic::{Evaluator, Model},
        symstate::{memory::FaultPolicy, MemoryModel},
        x64::Flag,
    };

    fn rax() -> GpRegister {
        GpRegister::r64(0)
    }

    fn pair() -> (SymState, SymState) {
        (
            SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress),
            SymState::new("R", MemoryModel::Flat, FaultPolicy::Suppress),
        )
    }

    #[test]
    fn test_offset_formula_and_check() {
        let inv = Invariant::offset(
            Variable::new(Side::Target, rax()),
            Variable::new(Side::Rewrite, GpRegister::r64(1)),
            -3,
        );
        let (t, r) = pair();
        let formula = inv.formula(&t, &r).unwrap();

        let mut model = Model::new();
        model.set_bv("%rax_T", crate::symbolic::BitValue::new(2, 64));
        model.set_bv("%rcx_R", crate::symbolic::BitValue::new(5, 64));
        assert!(Evaluator::new(&model).eval_bool(&formula).unwrap());

        let mut target = CpuState::new();
        let mut rewrite = CpuState::new();
        target.gp[0] = 2;
        rewrite.gp[1] = 5;
        assert!(inv.check(&target, &rewrite).unwrap());
        rewrite.gp[1] = 6;
        assert!(!inv.check(&target, &rewrite).unwrap());
    }

    #[test]
    fn test_narrow_view() {
        let eax = GpRegister::new(0, 32);
        let inv = Invariant::equal(
            Variable::new(Side::Target, eax),
            Variable::new(Side::Rewrite, eax),
        );
        let mut target = CpuState::new();
        let mut rewrite = CpuState::new();
        target.gp[0] = 0xffff_ffff_0000_0001;
        rewrite.gp[0] = 1;
        assert!(inv.check(&target, &rewrite).unwrap());
    }

    #[test]
    fn test_sign_and_nonzero() {
        let v = Variable::new(Side::Rewrite, GpRegister::new(2, 32));
        let mut rewrite = CpuState::new();
        let target = CpuState::new();
        rewrite.gp[2] = 0x8000_0000;
        assert!(Invariant::Sign { var: v, nonnegative: false }.check(&target, &rewrite).unwrap());
        assert!(!Invariant::Sign { var: v, nonnegative: true }.check(&target, &rewrite).unwrap());
        assert!(Invariant::NonZero(v).check(&target, &rewrite).unwrap());
        rewrite.gp[2] = 0x1_0000_0000;
        assert!(!Invariant::NonZero(v).check(&target, &rewrite).unwrap());
    }

    #[test]
    fn test_flag_invariant() {
        let inv = Invariant::Flag {
            side: Side::Target,
            condition: Condition::E,
            taken: true,
        };
        let mut target = CpuState::new();
        let rewrite = CpuState::new();
        assert!(!inv.check(&target, &rewrite).unwrap());
        target.set_flag(Flag::Zf, true);
        assert!(inv.check(&target, &rewrite).unwrap());

        let (t, r) = pair();
        let formula = inv.formula(&t, &r).unwrap();
        let mut model = Model::new();
        model.set_bool("%zf_T", true);
        assert!(Evaluator::new(&model).eval_bool(&formula).unwrap());
    }

    #[test]
    fn test_state_and_memory_equality() {
        let regs = RegSet::empty().with_gp(rax()).with_flag(Flag::Cf);
        let mut target = CpuState::new();
        let mut rewrite = CpuState::new();
        target.gp[3] = 9;
        assert!(Invariant::StateEquality(regs.clone()).check(&target, &rewrite).unwrap());
        rewrite.set_flag(Flag::Cf, true);
        assert!(!Invariant::StateEquality(regs).check(&target, &rewrite).unwrap());

        target.write_u64(0x100, 0xab, 1);
        assert!(!Invariant::MemoryEquality.check(&target, &rewrite).unwrap());
        rewrite.write_u64(0x100, 0xab, 1);
        assert!(Invariant::MemoryEquality.check(&target, &rewrite).unwrap());

        target.set_gp(GpRegister::r64(RSP), 0x1000);
        target.write_u64(0xff8, 7, 8);
        assert!(!Invariant::MemoryEquality.check(&target, &rewrite).unwrap());
        assert!(Invariant::ReturnMemoryEquality.check(&target, &rewrite).unwrap());
    }

    #[test]
    fn test_connectives() {
        let t = CpuState::new();
        let r = CpuState::new();
        assert!(Invariant::Conjunction(vec![]).check(&t, &r).unwrap());
        assert!(!Invariant::Disjunction(vec![]).check(&t, &r).unwrap());
        assert!(Invariant::Disjunction(vec![Invariant::False, Invariant::True])
            .check(&t, &r)
            .unwrap());
        let imp = Invariant::Implication(Box::new(Invariant::False), Box::new(Invariant::False));
        assert!(imp.check(&t, &r).unwrap());

        let (ts, rs) = pair();
        assert!(Invariant::Conjunction(vec![]).formula(&ts, &rs).unwrap().is_true());
        assert!(Invariant::NoSignals.formula(&ts, &rs).unwrap().is_true());
    }

    #[test]
    fn test_transform_with_assumption() {
        let assume = Invariant::NonZero(Variable::new(Side::Target, rax()));
        let out = transform_with_assumption(&assume, &[Invariant::True, Invariant::MemoryEquality]);
        let Invariant::Conjunction(members) = out else {
            panic!("expected a conjunction");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[1],
            Invariant::Implication(Box::new(assume), Box::new(Invariant::MemoryEquality))
        );
    }

    #[test]
    fn test_display() {
        let inv = Invariant::offset(
            Variable::new(Side::Target, rax()),
            Variable::new(Side::Rewrite, rax()),
            4,
        );
        assert_eq!(inv.to_string(), "%rax_T - %rax_R = 4");
    }
}
