//! Data movement, stack operations and accumulator sign extension.

use crate::{
    handlers::simple::{constant, fit, Semantics, SimpleHandler},
    symbolic::SymExpr,
    symstate::SymState,
    x64::{GpRegister, Instruction, Mnemonic, Operand, RBP, RSP},
    Result,
};

pub(super) fn register(h: &mut SimpleHandler) {
    h.add(Mnemonic::Mov, Semantics::Arity2(mov));
    h.add(Mnemonic::Movzx, Semantics::Arity2(movzx));
    h.add_all(&[Mnemonic::Movsx, Mnemonic::Movsxd], Semantics::Arity2(movsx));
    h.add(Mnemonic::Lea, Semantics::Arity2(lea));
    h.add(Mnemonic::Xchg, Semantics::Arity2(xchg));
    h.add(Mnemonic::Push, Semantics::Arity1(push));
    h.add(Mnemonic::Pop, Semantics::Arity1(pop));
    h.add(Mnemonic::Leave, Semantics::Arity0(leave));
    h.add_all(
        &[
            Mnemonic::Cbw,
            Mnemonic::Cwde,
            Mnemonic::Cdqe,
            Mnemonic::Cwd,
            Mnemonic::Cdq,
            Mnemonic::Cqo,
        ],
        Semantics::Arity0(extend_accumulator),
    );
}

fn mov(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(dst, &fit(&src, dst.width())?)
}

fn movzx(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(dst, &src.zero_extend(dst.width())?)
}

fn movsx(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(dst, &src.sign_extend(dst.width())?)
}

/// The handler passes the effective address in place of the memory value.
fn lea(
    _: &Instruction,
    [dst, _]: [&Operand; 2],
    [_, address]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(dst, &address.low(dst.width())?)
}

fn xchg(
    _: &Instruction,
    [a, b]: [&Operand; 2],
    [va, vb]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    state.write(a, &vb)?;
    state.write(b, &va)
}

fn rsp(state: &SymState) -> SymExpr {
    state.gp_full(RSP).clone()
}

fn push(_: &Instruction, op: &Operand, value: SymExpr, state: &mut SymState) -> Result<()> {
    let width = if op.is_imm() { 64 } else { op.width() };
    let value = fit(&value, width)?;
    let top = rsp(state).sub(&constant(u128::from(width / 8), 64))?;
    state.write_at(&top, &value)?;
    state.set_gp(GpRegister::r64(RSP), &top)
}

/// `pop` writes the destination after the stack pointer moved, so
/// `pop %rsp` loads the popped value and `pop 8(%rsp)` addresses the
/// incremented pointer.
fn pop(_: &Instruction, op: &Operand, _: SymExpr, state: &mut SymState) -> Result<()> {
    let width = op.width();
    let top = rsp(state);
    let value = state.read_at(&top, width)?;
    state.set_gp(
        GpRegister::r64(RSP),
        &top.add(&constant(u128::from(width / 8), 64))?,
    )?;
    state.write(op, &value)
}

fn leave(_: &Instruction, state: &mut SymState) -> Result<()> {
    let frame = state.gp_full(RBP).clone();
    let saved = state.read_at(&frame, 64)?;
    state.set_gp(GpRegister::r64(RSP), &frame.add(&constant(8, 64))?)?;
    state.set_gp(GpRegister::r64(RBP), &saved)
}

fn extend_accumulator(instr: &Instruction, state: &mut SymState) -> Result<()> {
    const RAX: u8 = 0;
    const RDX: u8 = 2;
    let (from, into_rdx) = match instr.mnemonic() {
        Mnemonic::Cbw => (8, false),
        Mnemonic::Cwde => (16, false),
        Mnemonic::Cdqe => (32, false),
        Mnemonic::Cwd => (16, true),
        Mnemonic::Cdq => (32, true),
        Mnemonic::Cqo => (64, true),
        m => return Err(unsupported!("{} is not an accumulator extension", m)),
    };
    let source = state.gp(GpRegister::new(RAX, from))?;
    if into_rdx {
        let wide = source.sign_extend(from * 2)?;
        state.set_gp(
            GpRegister::new(RDX, from),
            &wide.extract(from * 2 - 1, from)?,
        )
    } else {
        state.set_gp(GpRegister::new(RAX, from * 2), &source.sign_extend(from * 2)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        handlers::simple::testing::{gp, run, with_gp},
        x64::CpuState,
    };

    #[test]
    fn test_mov_immediate_sign_extends() {
        let out = run("movq $-1, %rax", &CpuState::new());
        assert_eq!(gp(&out, "rax"), u64::MAX);
        let out = run("movl $-1, %eax", &with_gp(&[("rax", 0x1234_5678_0000_0000)]));
        assert_eq!(gp(&out, "rax"), 0xffff_ffff);
    }

    #[test]
    fn test_partial_register_moves() {
        let cpu = with_gp(&[("rax", 0x1111_1111_1111_1111), ("rbx", 0xaabb)]);
        let out = run("movb %bh, %al", &cpu);
        assert_eq!(gp(&out, "rax"), 0x1111_1111_1111_11aa);
        let out = run("movzbl %bl, %eax", &cpu);
        assert_eq!(gp(&out, "rax"), 0xbb);
        let out = run("movsbq %bl, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0xffff_ffff_ffff_ffbb);
    }

    #[test]
    fn test_lea_does_not_touch_memory() {
        let cpu = with_gp(&[("rdi", 0x1000), ("rsi", 3)]);
        let out = run("leaq 8(%rdi,%rsi,4), %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 0x1000 + 12 + 8);
        assert!(out.memory.is_empty());
    }

    #[test]
    fn test_push_pop_round_trip() {
        let cpu = with_gp(&[("rsp", 0x8000), ("rbx", 0xdead_beef)]);
        let out = run("pushq %rbx\npopq %rcx", &cpu);
        assert_eq!(gp(&out, "rcx"), 0xdead_beef);
        assert_eq!(gp(&out, "rsp"), 0x8000);
        assert_eq!(out.read_u64(0x7ff8, 8), 0xdead_beef);
    }

    #[test]
    fn test_push_immediate_is_quadword() {
        let cpu = with_gp(&[("rsp", 0x8000)]);
        let out = run("pushq $-2", &cpu);
        assert_eq!(gp(&out, "rsp"), 0x7ff8);
        assert_eq!(out.read_u64(0x7ff8, 8), (-2i64) as u64);
    }

    #[test]
    fn test_pop_into_rsp() {
        let mut cpu = with_gp(&[("rsp", 0x8000)]);
        cpu.write_u64(0x8000, 0x4242, 8);
        let out = run("popq %rsp", &cpu);
        assert_eq!(gp(&out, "rsp"), 0x4242);
    }

    #[test]
    fn test_leave_restores_frame() {
        let mut cpu = with_gp(&[("rsp", 0x7000), ("rbp", 0x8000)]);
        cpu.write_u64(0x8000, 0x9000, 8);
        let out = run("leave", &cpu);
        assert_eq!(gp(&out, "rsp"), 0x8008);
        assert_eq!(gp(&out, "rbp"), 0x9000);
    }

    #[test]
    fn test_xchg_swaps() {
        let cpu = with_gp(&[("rax", 1), ("rbx", 2)]);
        let out = run("xchgq %rax, %rbx", &cpu);
        assert_eq!(gp(&out, "rax"), 2);
        assert_eq!(gp(&out, "rbx"), 1);
    }

    #[test]
    fn test_accumulator_extension() {
        let cpu = with_gp(&[("rax", 0x8000_0000)]);
        assert_eq!(gp(&run("cltq", &cpu), "rax"), 0xffff_ffff_8000_0000);
        assert_eq!(gp(&run("cltd", &cpu), "rdx"), 0xffff_ffff);
        let cpu = with_gp(&[("rax", 0x80)]);
        assert_eq!(gp(&run("cbtw", &cpu), "rax"), 0xff80);
        let cpu = with_gp(&[("rax", 0x7fff_ffff_ffff_ffff), ("rdx", 5)]);
        assert_eq!(gp(&run("cqto", &cpu), "rdx"), 0);
    }
}
