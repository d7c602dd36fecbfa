//! Status flag formulas shared by the handlers and the obligation checker.
//!
//! # Condition codes
//!
//! | Condition | Formula |
//! |-----------|---------|
//! | E/NE | ZF |
//! | L/GE | SF != OF |
//! | LE/G | ZF or SF != OF |
//! | B/AE | CF |
//! | BE/A | CF or ZF |
//! | S/NS | SF |
//! | O/NO | OF |
//! | P/NP | PF |

use crate::{
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Condition, Flag},
    Result,
};

/// The boolean value of `condition` over the flags of `state`.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn condition(state: &SymState, condition: Condition) -> Result<SymExpr> {
    let cf = state.flag(Flag::Cf);
    let zf = state.flag(Flag::Zf);
    let sf = state.flag(Flag::Sf);
    let of = state.flag(Flag::Of);
    let pf = state.flag(Flag::Pf);
    let less = || sf.iff(of)?.not();

    match condition {
        Condition::E => Ok(zf.clone()),
        Condition::Ne => zf.not(),
        Condition::L => less(),
        Condition::Ge => sf.iff(of),
        Condition::Le => zf.or(&less()?),
        Condition::G => zf.not()?.and(&sf.iff(of)?),
        Condition::B => Ok(cf.clone()),
        Condition::Ae => cf.not(),
        Condition::Be => cf.or(zf),
        Condition::A => cf.not()?.and(&zf.not()?),
        Condition::S => Ok(sf.clone()),
        Condition::Ns => sf.not(),
        Condition::O => Ok(of.clone()),
        Condition::No => of.not(),
        Condition::P => Ok(pf.clone()),
        Condition::Np => pf.not(),
    }
}

/// Even parity of the low byte of `value`, the x86 PF.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn parity(value: &SymExpr) -> Result<SymExpr> {
    let mut acc = value.extract(0, 0)?;
    for i in 1..8.min(value.width()) {
        acc = acc.xor(&value.extract(i, i)?)?;
    }
    acc.is_zero()
}

/// Sets SF, ZF and PF from `result`.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn set_szp(state: &mut SymState, result: &SymExpr) -> Result<()> {
    state.set_flag(Flag::Sf, &result.msb()?)?;
    state.set_flag(Flag::Zf, &result.is_zero()?)?;
    state.set_flag(Flag::Pf, &parity(result)?)
}

/// Flags for `a + b + carry_in`, the x86 `add`/`adc` rules.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn set_add_flags(
    state: &mut SymState,
    a: &SymExpr,
    b: &SymExpr,
    carry_in: Option<&SymExpr>,
    result: &SymExpr,
) -> Result<()> {
    let w = a.width();
    let mut wide = a.zero_extend(w + 1)?.add(&b.zero_extend(w + 1)?)?;
    if let Some(c) = carry_in {
        wide = wide.add(&c.to_bit()?.zero_extend(w + 1)?)?;
    }
    state.set_flag(Flag::Cf, &wide.bit(w)?)?;

    let same_sign = a.msb()?.iff(&b.msb()?)?;
    let flipped = a.msb()?.iff(&result.msb()?)?.not()?;
    state.set_flag(Flag::Of, &same_sign.and(&flipped)?)?;

    state.set_flag(Flag::Af, &nibble_carry(a, b, result)?)?;
    set_szp(state, result)
}

/// Flags for `a - b - borrow_in`, the x86 `sub`/`sbb`/`cmp` rules.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn set_sub_flags(
    state: &mut SymState,
    a: &SymExpr,
    b: &SymExpr,
    borrow_in: Option<&SymExpr>,
    result: &SymExpr,
) -> Result<()> {
    let w = a.width();
    let mut wide = a.zero_extend(w + 1)?.sub(&b.zero_extend(w + 1)?)?;
    if let Some(c) = borrow_in {
        wide = wide.sub(&c.to_bit()?.zero_extend(w + 1)?)?;
    }
    state.set_flag(Flag::Cf, &wide.bit(w)?)?;

    let differ = a.msb()?.iff(&b.msb()?)?.not()?;
    let flipped = a.msb()?.iff(&result.msb()?)?.not()?;
    state.set_flag(Flag::Of, &differ.and(&flipped)?)?;

    state.set_flag(Flag::Af, &nibble_carry(a, b, result)?)?;
    set_szp(state, result)
}

/// Flags of the bitwise logic instructions: CF and OF cleared, AF undefined.
///
/// # Errors
///
/// Only on internal sort errors.
pub fn set_logic_flags(state: &mut SymState, result: &SymExpr) -> Result<()> {
    state.set_flag(Flag::Cf, &SymExpr::bool(false))?;
    state.set_flag(Flag::Of, &SymExpr::bool(false))?;
    state.set_flag_undefined(Flag::Af);
    set_szp(state, result)
}

/// Gives every flag a fresh value.
pub fn set_all_undefined(state: &mut SymState) {
    for flag in Flag::all() {
        state.set_flag_undefined(flag);
    }
}

/// Bit 4 of `a ^ b ^ result`: carry or borrow out of the low nibble.
fn nibble_carry(a: &SymExpr, b: &SymExpr, result: &SymExpr) -> Result<SymExpr> {
    if a.width() < 5 {
        return Ok(SymExpr::bool(false));
    }
    a.xor(b)?.xor(result)?.bit(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        symbolic::{Evaluator, Model},
        symstate::{memory::FaultPolicy, MemoryModel},
    };

    fn state() -> SymState {
        SymState::new("T", MemoryModel::Flat, FaultPolicy::Suppress)
    }

    fn eval(expr: &SymExpr) -> bool {
        Evaluator::new(&Model::new()).eval_bool(expr).unwrap()
    }

    #[test]
    fn test_parity() {
        assert!(eval(&parity(&SymExpr::constant(0b11, 8)).unwrap()));
        assert!(!eval(&parity(&SymExpr::constant(0b111, 8)).unwrap()));
        // only the low byte counts
        assert!(eval(&parity(&SymExpr::constant(0x100, 16)).unwrap()));
    }

    #[test]
    fn test_sub_flags_unsigned_below() {
        let mut s = state();
        let a = SymExpr::constant(1, 32);
        let b = SymExpr::constant(2, 32);
        let r = a.sub(&b).unwrap();
        set_sub_flags(&mut s, &a, &b, None, &r).unwrap();
        assert!(eval(&condition(&s, Condition::B).unwrap()));
        assert!(eval(&condition(&s, Condition::L).unwrap()));
        assert!(!eval(&condition(&s, Condition::E).unwrap()));
        assert!(eval(&condition(&s, Condition::S).unwrap()));
    }

    #[test]
    fn test_add_flags_signed_overflow() {
        let mut s = state();
        let a = SymExpr::constant(0x7f, 8);
        let b = SymExpr::constant(1, 8);
        let r = a.add(&b).unwrap();
        set_add_flags(&mut s, &a, &b, None, &r).unwrap();
        assert!(eval(&condition(&s, Condition::O).unwrap()));
        assert!(!eval(&condition(&s, Condition::B).unwrap()));
        assert!(eval(s.flag(Flag::Af)));
    }

    #[test]
    fn test_adc_carry_out() {
        let mut s = state();
        let a = SymExpr::constant(0xff, 8);
        let b = SymExpr::constant(0, 8);
        let carry = SymExpr::bool(true);
        let r = a.add(&b).unwrap().add(&SymExpr::constant(1, 8)).unwrap();
        set_add_flags(&mut s, &a, &b, Some(&carry), &r).unwrap();
        assert!(eval(s.flag(Flag::Cf)));
        assert!(eval(s.flag(Flag::Zf)));
    }

    #[test]
    fn test_negated_conditions_are_complements() {
        let mut s = state();
        let a = SymExpr::constant(5, 64);
        let b = SymExpr::constant(5, 64);
        let r = a.sub(&b).unwrap();
        set_sub_flags(&mut s, &a, &b, None, &r).unwrap();
        for c in [Condition::E, Condition::L, Condition::Be, Condition::G, Condition::P] {
            let pos = eval(&condition(&s, c).unwrap());
            let neg = eval(&condition(&s, c.negate()).unwrap());
            assert_ne!(pos, neg, "{}", c);
        }
    }
}
