//! Test-case verification through the public [`Verifier`] interface.

use x64verify::{
    cfg::Cfg,
    sandbox::Sandbox,
    verifier::{compare_outputs, HoldOutVerifier, Verifier},
    x64::{CpuState, GpRegister, RegSet},
    Error, Result,
};

/// A graph over `%rdi` and `%rsi` with `%rax` live out.
fn build(text: &str) -> Result<Cfg> {
    let def_ins = RegSet::empty()
        .with_gp(GpRegister::r64(7))
        .with_gp(GpRegister::r64(6));
    let rax = RegSet::empty().with_gp(GpRegister::r64(0));
    Cfg::new(text.parse()?, def_ins, rax)
}

/// A verifier seeded with the given `(rdi, rsi)` pairs.
fn holdout(inputs: &[(u64, u64)]) -> HoldOutVerifier {
    let mut sandbox = Sandbox::default();
    for (rdi, rsi) in inputs {
        let mut cpu = CpuState::new();
        cpu.set_gp(GpRegister::r64(7), *rdi);
        cpu.set_gp(GpRegister::r64(6), *rsi);
        sandbox.insert_input(cpu);
    }
    HoldOutVerifier::new(sandbox)
}

#[test]
fn test_equivalent_rewrites_pass() -> Result<()> {
    let target = build("movq %rdi, %rax\naddq %rsi, %rax\nretq")?;
    let rewrite = build("leaq (%rdi,%rsi), %rax\nretq")?;
    let mut verifier = holdout(&[(0, 0), (1, 2), (u64::MAX, 1), (1 << 63, 1 << 63)]);

    assert!(verifier.verify(&target, &rewrite));
    assert!(!verifier.has_error());
    assert_eq!(verifier.counter_examples_available(), 0);
    Ok(())
}

#[test]
fn test_dead_register_differences_are_ignored() -> Result<()> {
    let target = build("movq %rdi, %rax\nretq")?;
    let rewrite = build("movq %rdi, %rax\nmovq $7, %rsi\nretq")?;
    let mut verifier = holdout(&[(3, 4)]);
    assert!(verifier.verify(&target, &rewrite));
    Ok(())
}

#[test]
fn test_differing_inputs_are_reported() -> Result<()> {
    let target = build("movq %rdi, %rax\nimulq %rsi, %rax\nretq")?;
    let rewrite = build("movq %rdi, %rax\nshlq $1, %rax\nretq")?;
    let mut verifier = holdout(&[(5, 2), (5, 3), (0, 9)]);

    assert!(!verifier.verify(&target, &rewrite));
    assert!(!verifier.has_error());
    let counter_examples = verifier.get_counter_examples();
    assert_eq!(counter_examples.len(), 1);
    assert_eq!(counter_examples[0].get_gp(GpRegister::r64(6)), 3);

    // a later call starts from scratch
    assert!(verifier.verify(&target, &target));
    assert_eq!(verifier.counter_examples_available(), 0);
    Ok(())
}

#[test]
fn test_unsupported_code_is_an_error() -> Result<()> {
    let target = build("callq elsewhere\nretq")?;
    let mut verifier = holdout(&[(1, 1)]);
    assert!(!verifier.verify(&target, &target));
    assert!(matches!(verifier.get_error(), Some(Error::Unsupported(_))));
    Ok(())
}

#[test]
fn test_memory_is_compared() -> Result<()> {
    let target = build("movq %rsi, (%rdi)\nretq")?;
    let rewrite = build("movl %esi, (%rdi)\nretq")?;
    let mut input = CpuState::new();
    input.set_gp(GpRegister::r64(7), 0x1000);
    input.set_gp(GpRegister::r64(6), 0x1_0000_0001);

    let mut sandbox = Sandbox::default();
    let difference = compare_outputs(&mut sandbox, &target, &rewrite, &input)?;
    assert!(difference.is_some());

    input.set_gp(GpRegister::r64(6), 1);
    assert_eq!(compare_outputs(&mut sandbox, &target, &rewrite, &input)?, None);
    Ok(())
}
