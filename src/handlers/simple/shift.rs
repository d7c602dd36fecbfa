//! Shifts and rotates.
//!
//! The count is masked to five bits (six for 64-bit operands). A masked
//! count of zero leaves every flag unchanged; OF is only defined for a
//! count of one and otherwise gets a fresh value.

use crate::{
    handlers::{
        flags::parity,
        simple::{constant, resize_unsigned, Semantics, SimpleHandler},
    },
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Flag, Instruction, Mnemonic, Operand},
    Result,
};

const SHIFTS: [Mnemonic; 5] = [
    Mnemonic::Shl,
    Mnemonic::Shr,
    Mnemonic::Sar,
    Mnemonic::Rol,
    Mnemonic::Ror,
];

pub(super) fn register(h: &mut SimpleHandler) {
    h.add_all(&SHIFTS, Semantics::Arity1(shift_by_one));
    h.add_all(&SHIFTS, Semantics::Arity2(shift));
    h.add_all(&[Mnemonic::Shld, Mnemonic::Shrd], Semantics::Arity3(double_shift));
}

/// Masks a raw count operand and widens it to `width` bits.
fn masked_count(raw: &SymExpr, width: u16) -> Result<SymExpr> {
    let limit = if width == 64 { 0x3f } else { 0x1f };
    let masked = resize_unsigned(raw, 8)?.and(&constant(limit, 8))?;
    resize_unsigned(&masked, width)
}

/// Writes `value` to `flag` unless the count is zero.
fn set_unless_zero(
    state: &mut SymState,
    zero: &SymExpr,
    flag: Flag,
    value: &SymExpr,
) -> Result<()> {
    let kept = zero.ite(state.flag(flag), value)?;
    state.set_flag(flag, &kept)
}

/// OF for a count of one, fresh otherwise, unchanged for zero.
fn set_overflow(state: &mut SymState, count: &SymExpr, value: &SymExpr) -> Result<()> {
    let w = count.width();
    let one = count.eq(&constant(1, w))?;
    let defined = one.ite(value, &SymExpr::tmp_bool())?;
    set_unless_zero(state, &count.is_zero()?, Flag::Of, &defined)
}

fn shift_by_one(
    instr: &Instruction,
    op: &Operand,
    value: SymExpr,
    state: &mut SymState,
) -> Result<()> {
    apply(instr, op, value, &constant(1, 8), state)
}

fn shift(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [value, count]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    apply(instr, dst, value, &count, state)
}

fn apply(
    instr: &Instruction,
    dst: &Operand,
    a: SymExpr,
    raw_count: &SymExpr,
    state: &mut SymState,
) -> Result<()> {
    let w = a.width();
    let count = masked_count(raw_count, w)?;
    let zero = count.is_zero()?;
    let one = constant(1, w);
    let width = constant(u128::from(w), w);

    let (result, cf, of) = match instr.mnemonic() {
        Mnemonic::Shl => {
            let r = a.shl(&count)?;
            let cf = a.lshr(&width.sub(&count)?)?.bit(0)?;
            let of = r.msb()?.xor(&cf)?;
            (r, cf, of)
        }
        Mnemonic::Shr => {
            let r = a.lshr(&count)?;
            let cf = a.lshr(&count.sub(&one)?)?.bit(0)?;
            (r, cf, a.msb()?)
        }
        Mnemonic::Sar => {
            let r = a.ashr(&count)?;
            let cf = a.ashr(&count.sub(&one)?)?.bit(0)?;
            (r, cf, SymExpr::bool(false))
        }
        Mnemonic::Rol => {
            let r = a.rotl(&count)?;
            let cf = r.bit(0)?;
            let of = r.msb()?.xor(&cf)?;
            (r, cf, of)
        }
        _ => {
            let r = a.rotr(&count)?;
            let cf = r.msb()?;
            let of = if w >= 2 {
                r.msb()?.xor(&r.bit(w - 2)?)?
            } else {
                SymExpr::bool(false)
            };
            (r, cf, of)
        }
    };

    set_unless_zero(state, &zero, Flag::Cf, &cf)?;
    set_overflow(state, &count, &of)?;
    if matches!(instr.mnemonic(), Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar) {
        set_result_flags(state, &zero, &result)?;
    }
    state.write(dst, &result)
}

/// SF, ZF, PF from `result` and a fresh AF, all unless the count is zero.
fn set_result_flags(state: &mut SymState, zero: &SymExpr, result: &SymExpr) -> Result<()> {
    set_unless_zero(state, zero, Flag::Sf, &result.msb()?)?;
    set_unless_zero(state, zero, Flag::Zf, &result.is_zero()?)?;
    set_unless_zero(state, zero, Flag::Pf, &parity(result)?)?;
    set_unless_zero(state, zero, Flag::Af, &SymExpr::tmp_bool())
}

/// `shld` shifts bits of the source in from the right, `shrd` from the left.
fn double_shift(
    instr: &Instruction,
    [dst, _, _]: [&Operand; 3],
    [a, fill, raw_count]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let w = a.width();
    let count = masked_count(&raw_count, w)?;
    let zero = count.is_zero()?;
    let wide_count = count.zero_extend(2 * w)?;
    let one = constant(1, w);

    let (result, cf) = if instr.mnemonic() == Mnemonic::Shld {
        let joined = a.concat(&fill)?.shl(&wide_count)?;
        let r = joined.extract(2 * w - 1, w)?;
        let cf = a
            .lshr(&constant(u128::from(w), w).sub(&count)?)?
            .bit(0)?;
        (r, cf)
    } else {
        let joined = fill.concat(&a)?.lshr(&wide_count)?;
        let r = joined.low(w)?;
        let cf = a.lshr(&count.sub(&one)?)?.bit(0)?;
        (r, cf)
    };

    let sign_changed = a.msb()?.xor(&result.msb()?)?;
    set_unless_zero(state, &zero, Flag::Cf, &cf)?;
    set_overflow(state, &count, &sign_changed)?;
    set_result_flags(state, &zero, &result)?;
    state.write(dst, &result)
}

#[cfg(test)]
mod tests {
    use crate::{
        handlers::simple::testing::{flag, gp, run, with_gp},
        x64::Flag,
    };

    #[test]
    fn test_shift_left_carry() {
        let cpu = with_gp(&[("rax", 0x8000_0000_0000_0001)]);
        let out = run("shlq %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 2);
        assert!(flag(&out, Flag::Cf));
        assert!(flag(&out, Flag::Of));

        let out = run("salq $4, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x10);
    }

    #[test]
    fn test_shift_right_forms() {
        let cpu = with_gp(&[("rax", 0x8000_0000_0000_0003), ("rcx", 1)]);
        let out = run("shrq %cl, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x4000_0000_0000_0001);
        assert!(flag(&out, Flag::Cf));
        assert!(flag(&out, Flag::Of));
        let out = run("sarq %cl, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0xc000_0000_0000_0001);
        assert!(!flag(&out, Flag::Of));
    }

    #[test]
    fn test_count_is_masked() {
        let cpu = with_gp(&[("rax", 1), ("rcx", 65)]);
        assert_eq!(gp(&run("shlq %cl, %rax", &cpu), "rax"), 2);
        let cpu = with_gp(&[("rax", 1), ("rcx", 33)]);
        assert_eq!(gp(&run("shll %cl, %eax", &cpu), "rax"), 2);
    }

    #[test]
    fn test_zero_count_keeps_flags() {
        let mut cpu = with_gp(&[("rax", 0), ("rcx", 64)]);
        cpu.set_flag(Flag::Cf, true);
        cpu.set_flag(Flag::Zf, false);
        let out = run("shlq %cl, %rax", &cpu);
        assert!(flag(&out, Flag::Cf));
        assert!(!flag(&out, Flag::Zf));
    }

    #[test]
    fn test_rotates() {
        let cpu = with_gp(&[("rax", 0x81)]);
        let out = run("rolb $1, %al", &cpu);
        assert_eq!(gp(&out, "rax"), 0x03);
        assert!(flag(&out, Flag::Cf));
        let out = run("rorb $1, %al", &cpu);
        assert_eq!(gp(&out, "rax"), 0xc0);
        assert!(flag(&out, Flag::Cf));
    }

    #[test]
    fn test_double_shifts() {
        let cpu = with_gp(&[("rax", 0x1234), ("rbx", 0xf000_0000_0000_0000)]);
        let out = run("shldq $4, %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x1234f);
        let cpu = with_gp(&[("rax", 0x1234), ("rbx", 0xf)]);
        let out = run("shrdq $4, %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0xf000_0000_0000_0123);
    }
}
