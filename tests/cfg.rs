//! Control flow graph integration tests.
//!
//! Checks the structural properties the validators rely on: dominance from
//! the entry, the SCC partition, bounded paths and inlining.

use rustc_hash::FxHashMap;
use x64verify::{
    cfg::{inline_functions, Cfg, CfgDominators, CfgPaths, CfgSccs},
    sandbox::Sandbox,
    x64::{CpuState, GpRegister, RegSet},
    Result,
};

const DIAMOND: &str = "testq %rdi, %rdi\nje .L1\nincq %rax\n.L1:\nretq";
const LOOP: &str = "xorl %eax, %eax\n.L1:\naddq $3, %rax\ndecq %rdi\njne .L1\nretq";
const NESTED: &str = "\
movl $4, %ecx
.L1:
movl $4, %edx
.L2:
incq %rax
decl %edx
jne .L2
decl %ecx
jne .L1
retq";

/// Builds a graph reading `%rdi` and producing `%rax`.
fn build(text: &str) -> Result<Cfg> {
    let rdi = RegSet::empty().with_gp(GpRegister::r64(7));
    let rax = RegSet::empty().with_gp(GpRegister::r64(0));
    Cfg::new(text.parse()?, rdi, rax)
}

#[test]
fn test_entry_dominates_reachable_blocks() -> Result<()> {
    for text in [DIAMOND, LOOP, NESTED] {
        let cfg = build(text)?;
        let doms = CfgDominators::new(&cfg);
        for block in cfg.reachable_blocks() {
            assert!(doms.dominates(cfg.get_entry(), block), "{} in {:?}", block, text);
            assert!(doms.dominates(block, block));
        }
    }
    Ok(())
}

#[test]
fn test_sccs_partition_reachable_blocks() -> Result<()> {
    for text in [DIAMOND, LOOP, NESTED] {
        let cfg = build(text)?;
        let sccs = CfgSccs::new(&cfg);

        let mut seen: Vec<usize> = (0..sccs.count())
            .flat_map(|i| sccs.get_blocks(i).to_vec())
            .collect();
        seen.sort_unstable();
        let reachable: Vec<usize> = cfg.reachable_blocks().collect();
        assert_eq!(seen, reachable);
    }
    Ok(())
}

#[test]
fn test_loops_detected() -> Result<()> {
    let loops = |text: &str| -> Result<usize> {
        let cfg = build(text)?;
        let sccs = CfgSccs::new(&cfg);
        Ok((0..sccs.count()).filter(|i| sccs.is_loop(&cfg, *i)).count())
    };
    assert_eq!(loops(DIAMOND)?, 0);
    assert_eq!(loops(LOOP)?, 1);
    // The inner loop lives inside the outer component.
    assert_eq!(loops(NESTED)?, 1);
    assert!(build(NESTED)?.has_loops());
    assert!(!build(DIAMOND)?.has_loops());
    Ok(())
}

#[test]
fn test_bounded_paths() -> Result<()> {
    let cfg = build(DIAMOND)?;
    let paths = CfgPaths::enumerate_all(&cfg, 1);
    assert_eq!(paths.len(), 2);
    for path in &paths {
        assert_eq!(path.first(), Some(&cfg.get_entry()));
        assert_eq!(path.last(), Some(&cfg.get_exit()));
    }

    let cfg = build(LOOP)?;
    assert_eq!(CfgPaths::enumerate_all(&cfg, 1).len(), 1);
    assert_eq!(CfgPaths::enumerate_all(&cfg, 3).len(), 3);
    let loop_paths = CfgPaths::enumerate_paths(&cfg, 1, 2, 2);
    assert_eq!(loop_paths, vec![vec![2, 2]]);
    Ok(())
}

#[test]
fn test_inlined_call_matches_direct_code() -> Result<()> {
    let mut library = FxHashMap::default();
    library.insert("triple".to_string(), "leaq (%rdi,%rdi,2), %rax\nretq".parse()?);

    let caller = build("callq triple\naddq $1, %rax\nretq")?;
    let inlined = inline_functions(&caller, &library)?;
    assert!(inlined.get_code().iter().all(|i| !i.is_call()));
    let direct = build("leaq 1(%rdi,%rdi,2), %rax\nretq")?;

    let mut sandbox = Sandbox::default();
    let mut input = CpuState::new();
    input.set_gp(GpRegister::r64(4), 0x7fff_0000);
    input.set_gp(GpRegister::r64(7), 14);

    let a = sandbox.run(&inlined, &input)?;
    let b = sandbox.run(&direct, &input)?;
    assert!(a.outcome.is_completed());
    assert_eq!(a.last.get_gp(GpRegister::r64(0)), 43);
    assert_eq!(b.last.get_gp(GpRegister::r64(0)), 43);
    assert_eq!(a.last.get_gp(GpRegister::r64(4)), 0x7fff_0000);
    Ok(())
}
