//! Conditional moves and sets, carry flag manipulation.

use crate::{
    handlers::{
        flags::condition,
        simple::{constant, Semantics, SimpleHandler},
    },
    symbolic::SymExpr,
    symstate::SymState,
    x64::{Condition, Flag, Instruction, Mnemonic, Operand},
    Result,
};

pub(super) fn register(h: &mut SimpleHandler) {
    h.add(Mnemonic::Setcc, Semantics::Arity1(setcc));
    h.add(Mnemonic::Cmovcc, Semantics::Arity2(cmovcc));
    h.add_all(
        &[Mnemonic::Clc, Mnemonic::Stc, Mnemonic::Cmc],
        Semantics::Arity0(carry),
    );
}

fn condition_of(instr: &Instruction) -> Result<Condition> {
    instr
        .condition()
        .ok_or_else(|| validator_error!("{} has no condition code", instr))
}

fn setcc(instr: &Instruction, op: &Operand, _: SymExpr, state: &mut SymState) -> Result<()> {
    let taken = condition(state, condition_of(instr)?)?;
    state.write(op, &taken.ite(&constant(1, 8), &constant(0, 8))?)
}

/// The destination is written either way, so a 32-bit `cmov` always clears
/// the upper half.
fn cmovcc(
    instr: &Instruction,
    [dst, _]: [&Operand; 2],
    [old, src]: [SymExpr; 2],
    state: &mut SymState,
) -> Result<()> {
    let taken = condition(state, condition_of(instr)?)?;
    state.write(dst, &taken.ite(&src, &old)?)
}

fn carry(instr: &Instruction, state: &mut SymState) -> Result<()> {
    let value = match instr.mnemonic() {
        Mnemonic::Clc => SymExpr::bool(false),
        Mnemonic::Stc => SymExpr::bool(true),
        _ => state.flag(Flag::Cf).not()?,
    };
    state.set_flag(Flag::Cf, &value)
}

#[cfg(test)]
mod tests {
    use crate::{
        handlers::simple::testing::{flag, gp, run, with_gp},
        x64::Flag,
    };

    #[test]
    fn test_setcc_after_compare() {
        let cpu = with_gp(&[("rax", 3), ("rbx", 5), ("rcx", 0xff00)]);
        let out = run("cmpq %rbx, %rax\nsetl %cl", &cpu);
        assert_eq!(gp(&out, "rcx"), 0xff01);
        let out = run("cmpq %rbx, %rax\nsetae %cl", &cpu);
        assert_eq!(gp(&out, "rcx"), 0xff00);
    }

    #[test]
    fn test_cmov() {
        let cpu = with_gp(&[("rax", 0xffff_ffff_0000_0001), ("rbx", 9)]);
        let out = run("testq %rbx, %rbx\ncmovel %ebx, %eax", &cpu);
        assert_eq!(gp(&out, "rax"), 1);
        let out = run("testq %rbx, %rbx\ncmovneq %rbx, %rax", &cpu);
        assert_eq!(gp(&out, "rax"), 9);
    }

    #[test]
    fn test_carry_operations() {
        let cpu = with_gp(&[]);
        assert!(flag(&run("stc", &cpu), Flag::Cf));
        assert!(!flag(&run("stc\ncmc", &cpu), Flag::Cf));
        assert!(!flag(&run("stc\nclc", &cpu), Flag::Cf));
    }
}
