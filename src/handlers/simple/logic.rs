//! Bitwise logic, bit tests, bit scans and the BMI1 instructions.

use crate::{
    handlers::{
        flags::set_logic_flags,
        simple::{constant, fit, resize_unsigned, Semantics, SimpleHandler},
    },
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Flag, Instruction, Mnemonic, Operand},
    Result,
};

pub(super) fn register(h: &mut SimpleHandler) {
    h.add_all(
        &[Mnemonic::And, Mnemonic::Or, Mnemonic::Xor, Mnemonic::Test],
        Semantics::Arity2(bitwise),
    );
    h.add(Mnemonic::Not, Semantics::Arity1(not));
    h.add(Mnemonic::Andn, Semantics::Arity3(andn));
    h.add_all(
        &[Mnemonic::Bt, Mnemonic::Bts, Mnemonic::Btr, Mnemonic::Btc],
        Semantics::Arity2(bit_test),
    );
    h.add_all(&[Mnemonic::Bsf, Mnemonic::Bsr], Semantics::Arity2(bit_scan));
    h.add(Mnemonic::Popcnt, Semantics::Arity2(popcnt));
    h.add(Mnemonic::Bextr, Semantics::Arity3(bextr));
    h.add_all(
        &[Mnemonic::Blsr, Mnemonic::Blsi, Mnemonic::Blsmsk],
        Semantics::Arity2(lowest_set_bit),
    );
}

fn bitwise(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let b = fit(&b, a.width())?;
    let result = match instr.mnemonic() {
        Mnemonic::Or => a.or(&b)?,
        Mnemonic::Xor => a.xor(&b)?,
        _ => a.and(&b)?,
    };
    set_logic_flags(state, &result)?;
    if instr.mnemonic() == Mnemonic::Test {
        return Ok(());
    }
    state.write(dst, &result)
}

fn not(_: &Instruction, op: &Operand, a: SymExpr, state: &mut SymState) -> Result<()> {
    state.write(op, &a.not()?)
}

fn andn(
    _: &Instruction,
    [dst, _, _]: [&Operand; 3],
    [_, a, b]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let result = a.not()?.and(&b)?;
    state.set_flag(Flag::Sf, &result.msb()?)?;
    state.set_flag(Flag::Zf, &result.is_zero()?)?;
    state.set_flag(Flag::Cf, &SymExpr::bool(false))?;
    state.set_flag(Flag::Of, &SymExpr::bool(false))?;
    state.set_flag_undefined(Flag::Af);
    state.set_flag_undefined(Flag::Pf);
    state.write(dst, &result)
}

/// `bt` and friends. A register base, or an immediate offset, takes the
/// offset modulo the operand width. A memory base with a register offset
/// addresses the byte `offset >> 3` away, with the offset signed.
fn bit_test(
    instr: &Instruction,
    [base, _]: [&Operand; 2],
    [value, offset]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let (target, word, index) = match base {
        Operand::Mem(mem) if !offset_is_immediate(instr) => {
            let address = state
                .address(mem)?
                .add(&fit(&offset, 64)?.ashr(&constant(3, 64))?)?;
            let byte = state.read_at(&address, 8)?;
            let index = resize_unsigned(&offset, 8)?.and(&constant(7, 8))?;
            (Some(address), byte, index)
        }
        _ => {
            let w = value.width();
            let index = resize_unsigned(&offset, w)?.and(&constant(u128::from(w - 1), w))?;
            (None, value, index)
        }
    };

    let selected = word.lshr(&index)?.extract(0, 0)?;
    state.set_flag(Flag::Cf, &selected.eq(&constant(1, 1))?)?;
    for f in [Flag::Of, Flag::Sf, Flag::Af, Flag::Pf] {
        state.set_flag_undefined(f);
    }

    let mask = constant(1, word.width()).shl(&index)?;
    let updated = match instr.mnemonic() {
        Mnemonic::Bts => word.or(&mask)?,
        Mnemonic::Btr => word.and(&mask.not()?)?,
        Mnemonic::Btc => word.xor(&mask)?,
        _ => return Ok(()),
    };
    match target {
        Some(address) => state.write_at(&address, &updated),
        None => state.write(base, &updated),
    }
}

fn offset_is_immediate(instr: &Instruction) -> bool {
    instr.operand(1).is_some_and(Operand::is_imm)
}

/// `bsf` and `bsr`. A zero source sets ZF and leaves the destination as it
/// was.
fn bit_scan(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [old, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let w = src.width();
    let positions: Vec<u16> = if instr.mnemonic() == Mnemonic::Bsf {
        (0..w).rev().collect()
    } else {
        (0..w).collect()
    };
    let mut result = old;
    for i in positions {
        result = src.bit(i)?.ite(&constant(u128::from(i), w), &result)?;
    }
    state.set_flag(Flag::Zf, &src.is_zero()?)?;
    for f in [Flag::Cf, Flag::Of, Flag::Sf, Flag::Af, Flag::Pf] {
        state.set_flag_undefined(f);
    }
    state.write(dst, &result)
}

fn popcnt(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let w = src.width();
    let mut count = constant(0, w);
    for i in 0..w {
        count = count.add(&src.extract(i, i)?.zero_extend(w)?)?;
    }
    state.set_flag(Flag::Zf, &src.is_zero()?)?;
    for f in [Flag::Cf, Flag::Of, Flag::Sf, Flag::Af, Flag::Pf] {
        state.set_flag(f, &SymExpr::bool(false))?;
    }
    state.write(dst, &count)
}

/// `bextr`: start in bits 7:0 of the control operand, length in 15:8.
fn bextr(
    _: &Instruction,
    [dst, _, _]: [&Operand; 3],
    [_, src, control]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let w = src.width();
    let limit = constant(u128::from(w), w);
    let start = control.extract(7, 0)?.zero_extend(w)?;
    let length = control.extract(15, 8)?.zero_extend(w)?;

    let shifted = start
        .uge(&limit)?
        .ite(&constant(0, w), &src.lshr(&start)?)?;
    let ones = constant(0, w).not()?;
    let mask = length.uge(&limit)?.ite(
        &ones,
        &constant(1, w).shl(&length)?.sub(&constant(1, w))?,
    )?;
    let result = shifted.and(&mask)?;

    state.set_flag(Flag::Zf, &result.is_zero()?)?;
    state.set_flag(Flag::Cf, &SymExpr::bool(false))?;
    state.set_flag(Flag::Of, &SymExpr::bool(false))?;
    for f in [Flag::Sf, Flag::Af, Flag::Pf] {
        state.set_flag_undefined(f);
    }
    state.write(dst, &result)
}

/// `blsr`, `blsi` and `blsmsk`.
fn lowest_set_bit(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let w = src.width();
    let minus_one = src.sub(&constant(1, w))?;
    let src_zero = src.is_zero()?;
    let (result, cf) = match instr.mnemonic() {
        Mnemonic::Blsr => (src.and(&minus_one)?, src_zero),
        Mnemonic::Blsi => (src.and(&src.neg()?)?, src_zero.not()?),
        _ => (src.xor(&minus_one)?, src_zero),
    };

    state.set_flag(Flag::Cf, &cf)?;
    state.set_flag(Flag::Of, &SymExpr::bool(false))?;
    state.set_flag(Flag::Sf, &result.msb()?)?;
    let zf = if instr.mnemonic() == Mnemonic::Blsmsk {
        SymExpr::bool(false)
    } else {
        result.is_zero()?
    };
    state.set_flag(Flag::Zf, &zf)?;
    state.set_flag_undefined(Flag::Af);
    state.set_flag_undefined(Flag::Pf);
    state.write(dst, &result)
}
