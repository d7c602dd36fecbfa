//! Dominator sets per basic block.

use std::collections::BTreeSet;

use crate::{
    cfg::{BlockId, Cfg},
    utils::graph::{algorithms, NodeId},
};

/// Dominator sets for every block of a [`Cfg`].
///
/// Derived from the dominator tree rooted at the entry block. Unreachable
/// blocks have an empty dominator set.
#[derive(Debug, Clone)]
pub struct CfgDominators {
    sets: Vec<BTreeSet<BlockId>>,
}

impl CfgDominators {
    /// Computes the dominators of every block.
    #[must_use]
    pub fn new(cfg: &Cfg) -> Self {
        let tree = algorithms::compute_dominators(cfg, NodeId::new(cfg.get_entry()));
        let sets = (0..cfg.num_blocks())
            .map(|b| tree.dominators(NodeId::new(b)).map(NodeId::index).collect())
            .collect();
        Self { sets }
    }

    /// The blocks dominating `block` (including itself).
    #[must_use]
    pub fn get_dominators(&self, block: BlockId) -> &BTreeSet<BlockId> {
        static EMPTY: BTreeSet<BlockId> = BTreeSet::new();
        self.sets.get(block).unwrap_or(&EMPTY)
    }

    /// `true` if `a` dominates `b`.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.get_dominators(b).contains(&a)
    }
}

/// Restricts `blocks` to those that dominate every block in `blocks`.
///
/// Used to pick a common cut point for a set of loop blocks: the result is
/// the intersection of the blocks' dominator sets with the blocks themselves,
/// sorted by index.
#[must_use]
pub fn dominator_intersect(cfg: &Cfg, blocks: &[BlockId]) -> Vec<BlockId> {
    let dominators = CfgDominators::new(cfg);
    let mut all: BTreeSet<BlockId> = blocks.iter().copied().collect();
    for b in blocks {
        let doms = dominators.get_dominators(*b);
        all.retain(|x| doms.contains(x));
    }
    all.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::RegSet;

    #[test]
    fn test_loop_dominators() {
        let code = "movl $3, %ecx\n.L1:\ndecl %ecx\ntestl %ecx, %ecx\njne .L2\njmp .L3\n\
                    .L2:\nnop\njmp .L1\n.L3:\nretq";
        let cfg = Cfg::new(code.parse().unwrap(), RegSet::empty(), RegSet::empty()).unwrap();
        let doms = CfgDominators::new(&cfg);
        for b in cfg.reachable_blocks() {
            assert!(doms.dominates(cfg.get_entry(), b));
        }
        // blocks: 0 entry, 1 movl, 2 .L1 loop head, 3 jmp .L3, 4 .L2 body, 5 .L3 ret, 6 exit
        assert!(doms.dominates(2, 4));
        assert!(!doms.dominates(4, 2));
        assert_eq!(dominator_intersect(&cfg, &[2, 4]), vec![2]);
    }
}
