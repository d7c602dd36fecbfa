//! Integer arithmetic.
//!
//! Division uses the uninterpreted functions `div_quotient_{int,uint}N`
//! and `div_remainder_{int,uint}N` over a `2N`-bit dividend and an `N`-bit
//! divisor, and raises the divide-error signal when the divisor is zero or
//! the quotient does not fit `N` bits.

use crate::{
    handlers::{
        flags::{set_add_flags, set_all_undefined, set_sub_flags, set_szp},
        simple::{constant, fit, Semantics, SimpleHandler},
    },
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Flag, GpRegister, Instruction, Mnemonic, Operand},
    Result,
};

const RAX: u8 = 0;
const RDX: u8 = 2;

pub(super) fn register(h: &mut SimpleHandler) {
    h.add_all(
        &[
            Mnemonic::Add,
            Mnemonic::Adc,
            Mnemonic::Sub,
            Mnemonic::Sbb,
            Mnemonic::Cmp,
        ],
        Semantics::Arity2(add_sub),
    );
    h.add_all(&[Mnemonic::Inc, Mnemonic::Dec], Semantics::Arity1(inc_dec));
    h.add(Mnemonic::Neg, Semantics::Arity1(neg));
    h.add(Mnemonic::Imul, Semantics::Arity1(widening_multiply));
    h.add(Mnemonic::Imul, Semantics::Arity2(imul2));
    h.add(Mnemonic::Imul, Semantics::Arity3(imul3));
    h.add(Mnemonic::Mul, Semantics::Arity1(widening_multiply));
    h.add_all(&[Mnemonic::Div, Mnemonic::Idiv], Semantics::Arity1(divide));
}

fn add_sub(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let b = fit(&b, a.width())?;
    let carry = match instr.mnemonic() {
        Mnemonic::Adc | Mnemonic::Sbb => Some(state.flag(Flag::Cf).clone()),
        _ => None,
    };
    let carry_bits = match &carry {
        Some(c) => c.to_bit()?.zero_extend(a.width())?,
        None => constant(0, a.width()),
    };

    let result = match instr.mnemonic() {
        Mnemonic::Add | Mnemonic::Adc => {
            let r = a.add(&b)?.add(&carry_bits)?;
            set_add_flags(state, &a, &b, carry.as_ref(), &r)?;
            r
        }
        _ => {
            let r = a.sub(&b)?.sub(&carry_bits)?;
            set_sub_flags(state, &a, &b, carry.as_ref(), &r)?;
            r
        }
    };

    if instr.mnemonic() == Mnemonic::Cmp {
        return Ok(());
    }
    state.write(dst, &result)
}

/// `inc` and `dec` leave CF alone.
fn inc_dec(instr: &Instruction, op: &Operand, a: SymExpr, state: &mut SymState) -> Result<()> {
    let one = constant(1, a.width());
    let result = if instr.mnemonic() == Mnemonic::Inc {
        let r = a.add(&one)?;
        state.set_flag(Flag::Of, &a.msb()?.not()?.and(&r.msb()?)?)?;
        r
    } else {
        let r = a.sub(&one)?;
        state.set_flag(Flag::Of, &a.msb()?.and(&r.msb()?.not()?)?)?;
        r
    };
    state.set_flag(Flag::Af, &a.xor(&one)?.xor(&result)?.bit(4)?)?;
    set_szp(state, &result)?;
    state.write(op, &result)
}

fn neg(_: &Instruction, op: &Operand, a: SymExpr, state: &mut SymState) -> Result<()> {
    let zero = constant(0, a.width());
    let result = a.neg()?;
    set_sub_flags(state, &zero, &a, None, &result)?;
    state.write(op, &result)
}

/// Full product of two `w`-bit values as `2w` bits.
fn full_product(a: &SymExpr, b: &SymExpr, signed: bool) -> Result<SymExpr> {
    let w = a.width() * 2;
    if signed {
        a.sign_extend(w)?.mul(&b.sign_extend(w)?)
    } else {
        a.zero_extend(w)?.mul(&b.zero_extend(w)?)
    }
}

/// CF and OF for the truncating `imul` forms; SF follows the result.
fn set_imul_flags(state: &mut SymState, full: &SymExpr, width: u16) -> Result<()> {
    let low = full.low(width)?;
    let overflow = low.sign_extend(full.width())?.ne(full)?;
    state.set_flag(Flag::Cf, &overflow)?;
    state.set_flag(Flag::Of, &overflow)?;
    state.set_flag(Flag::Sf, &low.msb()?)?;
    for f in [Flag::Zf, Flag::Af, Flag::Pf] {
        state.set_flag_undefined(f);
    }
    Ok(())
}

/// One-operand `mul` and `imul`: the accumulator times the operand into
/// `%ax`, `%dx:%ax`, `%edx:%eax` or `%rdx:%rax`.
fn widening_multiply(
    instr: &Instruction,
    _: &Operand,
    src: SymExpr,
    state: &mut SymState,
) -> Result<()> {
    let w = src.width();
    let signed = instr.mnemonic() == Mnemonic::Imul;
    let acc = state.gp(GpRegister::new(RAX, w))?;
    let full = full_product(&acc, &src, signed)?;

    if signed {
        set_imul_flags(state, &full, w)?;
    } else {
        let overflow = full.extract(2 * w - 1, w)?.is_zero()?.not()?;
        state.set_flag(Flag::Cf, &overflow)?;
        state.set_flag(Flag::Of, &overflow)?;
        for f in [Flag::Sf, Flag::Zf, Flag::Af, Flag::Pf] {
            state.set_flag_undefined(f);
        }
    }

    if w == 8 {
        return state.set_gp(GpRegister::new(RAX, 16), &full);
    }
    state.set_gp(GpRegister::new(RAX, w), &full.low(w)?)?;
    state.set_gp(GpRegister::new(RDX, w), &full.extract(2 * w - 1, w)?)
}

fn imul2(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let b = fit(&b, a.width())?;
    let full = full_product(&a, &b, true)?;
    set_imul_flags(state, &full, a.width())?;
    state.write(dst, &full.low(a.width())?)
}

fn imul3(
    _: &Instruction,
    [dst, _, _]: [&Operand; 3],
    [_, a, b]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let b = fit(&b, a.width())?;
    let full = full_product(&a, &b, true)?;
    set_imul_flags(state, &full, a.width())?;
    state.write(dst, &full.low(a.width())?)
}

fn divide(instr: &Instruction, _: &Operand, divisor: SymExpr, state: &mut SymState) -> Result<()> {
    let w = divisor.width();
    let signed = instr.mnemonic() == Mnemonic::Idiv;
    let dividend = if w == 8 {
        state.gp(GpRegister::new(RAX, 16))?
    } else {
        state
            .gp(GpRegister::new(RDX, w))?
            .concat(&state.gp(GpRegister::new(RAX, w))?)?
    };

    let kind = if signed { "int" } else { "uint" };
    let args = [dividend.clone(), divisor.clone()];
    let quotient = SymExpr::uf(&format!("div_quotient_{}{}", kind, w), w, &args)?;
    let remainder = SymExpr::uf(&format!("div_remainder_{}{}", kind, w), w, &args)?;

    let by_zero = divisor.is_zero()?;
    let too_large = if signed {
        let q = dividend.sdiv(&divisor.sign_extend(2 * w)?)?;
        q.low(w)?.sign_extend(2 * w)?.ne(&q)?
    } else {
        dividend.extract(2 * w - 1, w)?.uge(&divisor)?
    };
    state.raise_sigfpe(&by_zero.or(&too_large)?)?;
    set_all_undefined(state);

    if w == 8 {
        state.set_gp(GpRegister::new(RAX, 8), &quotient)?;
        return state.set_gp(GpRegister::high_byte(RAX), &remainder);
    }
    state.set_gp(GpRegister::new(RAX, w), &quotient)?;
    state.set_gp(GpRegister::new(RDX, w), &remainder)
}

#[cfg(test)]
mod tests {
    use crate::{
        handlers::simple::testing::{flag, gp, model, run, symbolic, with_gp},
        symbolic::Evaluator,
        x64::{CpuState, Flag},
    };

    #[test]
    fn test_add_and_carry() {
        let cpu = with_gp(&[("rax", u64::MAX), ("rbx", 1)]);
        let out = run("addq %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0);
        assert!(flag(&out, Flag::Cf));
        assert!(flag(&out, Flag::Zf));
        assert!(!flag(&out, Flag::Of));

        let out = run("addq %rbx, %rax\nadcq $0, %rcx", &cpu);
        assert_eq!(gp(&out, "rcx"), 1);
    }

    #[test]
    fn test_sub_and_cmp() {
        let cpu = with_gp(&[("rax", 3), ("rbx", 5)]);
        let out = run("subl %ebx, %eax", &cpu);
        assert_eq!(gp(&out, "rax"), 0xffff_fffe);
        assert!(flag(&out, Flag::Cf));
        assert!(flag(&out, Flag::Sf));

        let out = run("cmpq $3, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 3);
        assert!(flag(&out, Flag::Zf));
    }

    #[test]
    fn test_sbb_borrows() {
        let mut cpu = with_gp(&[("rax", 10), ("rbx", 4)]);
        cpu.set_flag(Flag::Cf, true);
        let out = run("sbbq %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 5);
    }

    #[test]
    fn test_inc_keeps_carry() {
        let mut cpu = with_gp(&[("rax", 0x7f)]);
        cpu.set_flag(Flag::Cf, true);
        let out = run("incb %al", &cpu);
        assert_eq!(gp(&out, "rax"), 0x80);
        assert!(flag(&out, Flag::Cf));
        assert!(flag(&out, Flag::Of));
        let out = run("decq %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x7e);
    }

    #[test]
    fn test_neg() {
        let cpu = with_gp(&[("rax", 5)]);
        let out = run("negq %rax", &cpu);
        assert_eq!(gp(&out, "rax"), (-5i64) as u64);
        assert!(flag(&out, Flag::Cf));
        let out = run("negq %rax", &CpuState::new());
        assert!(!flag(&out, Flag::Cf));
    }

    #[test]
    fn test_multiplication_forms() {
        let cpu = with_gp(&[("rax", 1 << 40), ("rbx", 1 << 30)]);
        let out = run("mulq %rbx", &cpu);
        assert_eq!(gp(&out, "rax"), 0);
        assert_eq!(gp(&out, "rdx"), 1 << 6);
        assert!(flag(&out, Flag::Cf));

        let cpu = with_gp(&[("rbx", (-3i64) as u64)]);
        let out = run("imulq $7, %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), (-21i64) as u64);
        assert!(!flag(&out, Flag::Of));

        let cpu = with_gp(&[("rax", 0x10), ("rbx", 0x10)]);
        let out = run("imulb %bl", &cpu);
        assert_eq!(gp(&out, "rax"), 0x100);
        assert!(flag(&out, Flag::Of));
    }

    #[test]
    fn test_unsigned_division() {
        let cpu = with_gp(&[("rax", 100), ("rdx", 0), ("rcx", 7)]);
        let out = run("divq %rcx", &cpu);
        assert_eq!(gp(&out, "rax"), 14);
        assert_eq!(gp(&out, "rdx"), 2);

        let cpu = with_gp(&[("rax", 0x0107), ("rcx", 2)]);
        let out = run("divb %cl", &cpu);
        assert_eq!(gp(&out, "rax") & 0xffff, 0x0183);
    }

    #[test]
    fn test_signed_division() {
        let cpu = with_gp(&[("rax", (-7i64) as u64), ("rdx", u64::MAX), ("rcx", 2)]);
        let out = run("idivq %rcx", &cpu);
        assert_eq!(gp(&out, "rax"), (-3i64) as u64);
        assert_eq!(gp(&out, "rdx"), (-1i64) as u64);
    }

    #[test]
    fn test_division_signals() {
        let state = symbolic("divq %rcx");
        let model = model();
        // all-zero model: the divisor is zero
        assert!(Evaluator::new(&model).eval_bool(state.sigfpe()).unwrap());

        let state = symbolic("movq $1, %rdx\nmovq $1, %rcx\ndivq %rcx");
        assert!(Evaluator::new(&model).eval_bool(state.sigfpe()).unwrap());

        let state = symbolic("movq $0, %rdx\nmovq $3, %rcx\ndivq %rcx");
        assert!(!Evaluator::new(&model).eval_bool(state.sigfpe()).unwrap());
    }
}
