//! SSE and AVX instructions.
//!
//! Integer lane operations are modeled exactly. Floating point arithmetic is
//! expressed through uninterpreted functions named `<op>_single` and
//! `<op>_double`; the evaluator and the solver bridge agree on their names.
//! Legacy encodings keep bits 255:128 of the destination, VEX encodings
//! (`vbroadcast*`, `vfmadd*`) clear them.

use crate::{
    handlers::simple::{constant, join, lanes, Semantics, SimpleHandler},
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Instruction, Mnemonic, Operand, SseRegister},
    Result,
};

pub(super) fn register(h: &mut SimpleHandler) {
    h.add_all(
        &[Mnemonic::Movd, Mnemonic::MovqSse],
        Semantics::Arity2(move_scalar_int),
    );
    h.add_all(
        &[
            Mnemonic::Movaps,
            Mnemonic::Movups,
            Mnemonic::Movapd,
            Mnemonic::Movupd,
            Mnemonic::Movdqa,
            Mnemonic::Movdqu,
        ],
        Semantics::Arity2(move_packed),
    );
    h.add_all(
        &[Mnemonic::Pand, Mnemonic::Pandn, Mnemonic::Por, Mnemonic::Pxor],
        Semantics::Arity2(packed_logic),
    );
    h.add_all(
        &[
            Mnemonic::Paddb,
            Mnemonic::Paddw,
            Mnemonic::Paddd,
            Mnemonic::Paddq,
            Mnemonic::Psubb,
            Mnemonic::Psubw,
            Mnemonic::Psubd,
            Mnemonic::Psubq,
        ],
        Semantics::Arity2(packed_arith),
    );
    h.add(Mnemonic::Pshufd, Semantics::Arity3(pshufd));
    h.add(Mnemonic::Shufps, Semantics::Arity3(shufps));
    h.add(Mnemonic::Palignr, Semantics::Arity3(palignr));
    h.add(Mnemonic::Pmovmskb, Semantics::Arity2(pmovmskb));
    h.add_all(
        &[Mnemonic::Movss, Mnemonic::Movsd],
        Semantics::Arity2(move_scalar_float),
    );
    h.add_all(
        &[
            Mnemonic::Addss,
            Mnemonic::Addsd,
            Mnemonic::Subss,
            Mnemonic::Subsd,
            Mnemonic::Mulss,
            Mnemonic::Mulsd,
            Mnemonic::Divss,
            Mnemonic::Divsd,
            Mnemonic::Minss,
            Mnemonic::Maxss,
            Mnemonic::Minsd,
            Mnemonic::Maxsd,
        ],
        Semantics::Arity2(scalar_float),
    );
    h.add_all(
        &[Mnemonic::Vzeroall, Mnemonic::Vzeroupper],
        Semantics::Arity0(zero_vectors),
    );
    h.add_all(
        &[Mnemonic::Vbroadcastss, Mnemonic::Vbroadcastsd],
        Semantics::Arity2(broadcast),
    );
    h.add_all(
        &[
            Mnemonic::Vfmadd132ss,
            Mnemonic::Vfmadd213ss,
            Mnemonic::Vfmadd231ss,
            Mnemonic::Vfmadd132sd,
            Mnemonic::Vfmadd213sd,
            Mnemonic::Vfmadd231sd,
        ],
        Semantics::Arity3(fused_multiply_add),
    );
}

fn sse_operand(op: &Operand) -> Result<SseRegister> {
    op.as_sse()
        .ok_or_else(|| unsupported!("operand {} is not a vector register", op))
}

fn immediate(instr: &Instruction, op: &Operand) -> Result<u8> {
    op.as_imm()
        .map(|v| v as u8)
        .ok_or_else(|| unsupported!("{} needs an immediate control byte", instr))
}

/// Name suffix of the floating point functions for a scalar width.
fn precision(width: u16) -> &'static str {
    if width == 32 {
        "single"
    } else {
        "double"
    }
}

/// Scalar width of a mnemonic (32 for `ss` forms, 64 for `sd` forms).
fn scalar_width(instr: &Instruction) -> Result<u16> {
    instr
        .mnemonic()
        .scalar_width()
        .ok_or_else(|| validator_error!("{} has no scalar width", instr))
}

/// `movd`/`movq` between a vector register and a general purpose register
/// or memory.
fn move_scalar_int(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    match dst.as_sse() {
        Some(reg) => {
            let value = src.low(src.width().min(64))?.zero_extend(128)?;
            state.set_sse(SseRegister::xmm(reg.index()), &value, false)
        }
        None => state.write(dst, &src.low(dst.width())?),
    }
}

fn move_packed(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(dst, &src)
}

fn packed_logic(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let result = match instr.mnemonic() {
        Mnemonic::Pand => a.and(&b)?,
        Mnemonic::Pandn => a.not()?.and(&b)?,
        Mnemonic::Por => a.or(&b)?,
        _ => a.xor(&b)?,
    };
    state.write(dst, &result)
}

fn packed_arith(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let (lane, subtract) = match instr.mnemonic() {
        Mnemonic::Paddb => (8, false),
        Mnemonic::Paddw => (16, false),
        Mnemonic::Paddd => (32, false),
        Mnemonic::Paddq => (64, false),
        Mnemonic::Psubb => (8, true),
        Mnemonic::Psubw => (16, true),
        Mnemonic::Psubd => (32, true),
        _ => (64, true),
    };
    let result = lanes(&a, lane)?
        .iter()
        .zip(lanes(&b, lane)?)
        .map(|(x, y)| if subtract { x.sub(&y) } else { x.add(&y) })
        .collect::<Result<Vec<_>>>()?;
    state.write(dst, &join(&result)?)
}

/// Each 128-bit half is shuffled on its own.
fn pshufd(
    instr: &Instruction,
    [dst, _, control]: [&Operand; 3],
    [_, src, _]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let imm = immediate(instr, control)?;
    let mut out = Vec::new();
    for half in lanes(&src, 128)? {
        let dwords = lanes(&half, 32)?;
        for i in 0..4 {
            out.push(dwords[usize::from((imm >> (2 * i)) & 3)].clone());
        }
    }
    state.write(dst, &join(&out)?)
}

/// The low two result lanes come from the destination, the high two from
/// the source.
fn shufps(
    instr: &Instruction,
    [dst, _, control]: [&Operand; 3],
    [a, b, _]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let imm = immediate(instr, control)?;
    let (first, second) = (lanes(&a, 32)?, lanes(&b, 32)?);
    let pick = |from: &[SymExpr], i: u8| from[usize::from((imm >> (2 * i)) & 3)].clone();
    let out = [
        pick(&first, 0),
        pick(&first, 1),
        pick(&second, 2),
        pick(&second, 3),
    ];
    state.write(dst, &join(&out)?)
}

fn palignr(
    instr: &Instruction,
    [dst, _, control]: [&Operand; 3],
    [a, b, _]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let bytes = immediate(instr, control)?;
    let result = if bytes >= 32 {
        constant(0, 128)
    } else {
        a.concat(&b)?
            .lshr(&constant(u128::from(bytes) * 8, 256))?
            .low(128)?
    };
    state.write(dst, &result)
}

fn pmovmskb(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let bits = lanes(&src, 8)?
        .iter()
        .map(|byte| byte.msb()?.to_bit())
        .collect::<Result<Vec<_>>>()?;
    state.write(dst, &join(&bits)?.zero_extend(dst.width())?)
}

/// Register to register moves merge the low element, loads clear the rest
/// of the `xmm` view and stores write only the element.
fn move_scalar_float(
    instr: &Instruction,
    [dst, src_op]: [&Operand; 2],
    [old, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let width = scalar_width(instr)?;
    let element = src.low(width)?;
    let value = match dst.as_sse() {
        Some(_) if src_op.is_mem() => element.zero_extend(dst.width())?,
        Some(_) => old.extract(old.width() - 1, width)?.concat(&element)?,
        None => element,
    };
    state.write(dst, &value)
}

fn scalar_float(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [a, b]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let width = scalar_width(instr)?;
    let (x, y) = (a.low(width)?, b.low(width)?);
    let args = [x.clone(), y.clone()];
    let op = match instr.mnemonic() {
        Mnemonic::Addss | Mnemonic::Addsd => "add",
        Mnemonic::Subss | Mnemonic::Subsd => "sub",
        Mnemonic::Mulss | Mnemonic::Mulsd => "mul",
        Mnemonic::Divss | Mnemonic::Divsd => "div",
        Mnemonic::Minss | Mnemonic::Minsd => "mincmp",
        _ => "maxcmp",
    };
    let name = format!("{}_{}", op, precision(width));
    let result = if op.ends_with("cmp") {
        let first = SymExpr::uf(&name, 1, &args)?.eq(&constant(1, 1))?;
        first.ite(&x, &y)?
    } else {
        SymExpr::uf(&name, width, &args)?
    };
    state.write(dst, &a.extract(a.width() - 1, width)?.concat(&result)?)
}

fn zero_vectors(instr: &Instruction, state: &mut SymState) -> Result<()> {
    for index in 0..16 {
        if instr.mnemonic() == Mnemonic::Vzeroall {
            state.set_sse(SseRegister::ymm(index), &constant(0, 256), false)?;
        } else {
            let low = state.sse(SseRegister::xmm(index))?;
            state.set_sse(SseRegister::xmm(index), &low, true)?;
        }
    }
    Ok(())
}

fn broadcast(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let reg = sse_operand(dst)?;
    let width = scalar_width(instr)?;
    let element = src.low(width)?;
    let copies = vec![element; usize::from(reg.width() / width)];
    state.set_sse(reg, &join(&copies)?, true)
}

/// Operands are numbered in Intel order: 1 is the destination.
fn fused_multiply_add(
    instr: &Instruction,
    [dst, _, _]: [&Operand; 3],
    [first, second, third]: [SymExpr; 3],
    state: &mut SymState,
) -> Result<()> {
    let reg = sse_operand(dst)?;
    let width = scalar_width(instr)?;
    let (a, b, c) = (first.low(width)?, second.low(width)?, third.low(width)?);
    let args = match instr.mnemonic() {
        Mnemonic::Vfmadd132ss | Mnemonic::Vfmadd132sd => [a, c, b],
        Mnemonic::Vfmadd213ss | Mnemonic::Vfmadd213sd => [b, a, c],
        _ => [b, c, a],
    };
    let result = SymExpr::uf(&format!("fma_{}", precision(width)), width, &args)?;
    let low = first.low(128)?;
    let merged = low.extract(127, width)?.concat(&result)?;
    state.set_sse(SseRegister::xmm(reg.index()), &merged, true)
}

#[cfg(test)]
mod tests {
    use crate::{
        handlers::simple::testing::{gp, run, with_gp, xmm},
        x64::{CpuState, SseRegister},
    };

    fn with_xmm(pairs: &[(u8, [u64; 4])]) -> CpuState {
        let mut cpu = CpuState::new();
        for (index, lanes) in pairs {
            cpu.set_sse(SseRegister::ymm(*index), *lanes);
        }
        cpu
    }

    #[test]
    fn test_pxor_clears_low_half_only() {
        let cpu = with_xmm(&[(0, [1, 2, 3, 4])]);
        let out = run("pxor %xmm0, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0), [0, 0, 3, 4]);
    }

    #[test]
    fn test_packed_add_wraps_per_lane() {
        let cpu = with_xmm(&[
            (0, [0xffff_ffff_0000_0001, 0, 0, 0]),
            (1, [0x0000_0001_0000_0002, 5, 0, 0]),
        ]);
        let out = run("paddd %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[..2], [3, 5]);
        let out = run("psubq %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[..2], [0xfffffffd_ffff_ffff, (-5i64) as u64]);
    }

    #[test]
    fn test_shuffles() {
        let cpu = with_xmm(&[
            (0, [0x1111_1111_0000_0000, 0x3333_3333_2222_2222, 0, 0]),
            (1, [0x5555_5555_4444_4444, 0x7777_7777_6666_6666, 0, 0]),
        ]);
        let out = run("pshufd $0x1b, %xmm1, %xmm0", &cpu);
        assert_eq!(
            xmm(&out, 0)[..2],
            [0x6666_6666_7777_7777, 0x4444_4444_5555_5555]
        );
        let out = run("shufps $0x44, %xmm1, %xmm0", &cpu);
        assert_eq!(
            xmm(&out, 0)[..2],
            [0x1111_1111_0000_0000, 0x5555_5555_4444_4444]
        );
        let out = run("palignr $8, %xmm1, %xmm0", &cpu);
        assert_eq!(
            xmm(&out, 0)[..2],
            [0x7777_7777_6666_6666, 0x1111_1111_0000_0000]
        );
    }

    #[test]
    fn test_movemask() {
        let cpu = with_xmm(&[(3, [0x8000_0000_0000_0080, 0x80, 0, 0])]);
        let out = run("pmovmskb %xmm3, %eax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x0181);
    }

    #[test]
    fn test_movd_and_movq() {
        let mut cpu = with_gp(&[("rax", 0xdead_beef_1234_5678)]);
        cpu.set_sse(SseRegister::ymm(0), [9, 9, 9, 9]);
        let out = run("movd %eax, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0), [0x1234_5678, 0, 9, 9]);
        let out = run("movq %rax, %xmm0\nmovq %xmm0, %rbx", &cpu);
        assert_eq!(gp(&out, "rbx"), 0xdead_beef_1234_5678);
    }

    #[test]
    fn test_scalar_moves() {
        let mut cpu = with_gp(&[("rdi", 0x100)]);
        cpu.set_sse(SseRegister::ymm(0), [1, 2, 0, 0]);
        cpu.set_sse(SseRegister::ymm(1), [3, 4, 0, 0]);
        let out = run("movsd %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[..2], [3, 2]);
        cpu.write_u64(0x100, 0xaaaa_bbbb, 4);
        let out = run("movss (%rdi), %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[..2], [0xaaaa_bbbb, 0]);
    }

    #[test]
    fn test_scalar_arithmetic() {
        let cpu = with_xmm(&[
            (0, [1.5f64.to_bits(), 7, 0, 0]),
            (1, [2.25f64.to_bits(), 0, 0, 0]),
        ]);
        let out = run("addsd %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[..2], [3.75f64.to_bits(), 7]);
        let out = run("minsd %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[0], 1.5f64.to_bits());
        let out = run("maxsd %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[0], 2.25f64.to_bits());
    }

    #[test]
    fn test_fused_multiply_add() {
        let cpu = with_xmm(&[
            (0, [1.0f64.to_bits(), 5, 6, 7]),
            (1, [2.0f64.to_bits(), 0, 0, 0]),
            (2, [3.0f64.to_bits(), 0, 0, 0]),
        ]);
        let out = run("vfmadd231sd %xmm2, %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0), [7.0f64.to_bits(), 5, 0, 0]);
        let out = run("vfmadd132sd %xmm2, %xmm1, %xmm0", &cpu);
        assert_eq!(xmm(&out, 0)[0], 5.0f64.to_bits());
    }

    #[test]
    fn test_vzero_and_broadcast() {
        let cpu = with_xmm(&[(0, [1, 2, 3, 4]), (1, [0x3f80_0000, 0, 0, 0])]);
        let out = run("vzeroupper", &cpu);
        assert_eq!(xmm(&out, 0), [1, 2, 0, 0]);
        let out = run("vzeroall", &cpu);
        assert_eq!(xmm(&out, 0), [0; 4]);
        let out = run("vbroadcastss %xmm1, %ymm0", &cpu);
        assert_eq!(xmm(&out, 0), [0x3f80_0000_3f80_0000; 4]);
    }
}
