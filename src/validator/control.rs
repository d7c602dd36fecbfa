//! Inductive path pairs.
//!
//! For every pair of loops, one per program, and every pair of blocks of
//! those loops, the learner looks for pairs of loop paths the two programs
//! can take in lockstep. Any block of a loop may serve as its cut point, so
//! a loop whose test was rotated to the bottom still pairs with one testing
//! at the top. Paths are enumerated at growing bounds, and the search at a
//! block pair stops at the first bound that yields a pair.

use crate::{
    cfg::{BlockId, Cfg, CfgPath, CfgPaths, CfgSccs},
    validator::{
        dual::{DualEdge, DualState},
        obligation::{is_jump, JumpType},
    },
};

/// Finds loop path pairs of two programs.
pub struct ControlLearner<'a> {
    target: &'a Cfg,
    rewrite: &'a Cfg,
}

impl<'a> ControlLearner<'a> {
    /// Creates a learner for two programs.
    #[must_use]
    pub fn new(target: &'a Cfg, rewrite: &'a Cfg) -> Self {
        Self { target, rewrite }
    }

    /// `true` if both paths are non-empty and return to their first block
    /// the same way (both by a taken jump, both by falling through, or both
    /// unconditionally).
    ///
    /// # Arguments
    ///
    /// * `tp` - Target loop path without its final, repeated block
    /// * `rp` - Rewrite loop path without its final, repeated block
    #[must_use]
    pub fn inductive_pair_feasible(&self, tp: &[BlockId], rp: &[BlockId]) -> bool {
        match (back_edge(self.target, tp), back_edge(self.rewrite, rp)) {
            (Some(t), Some(r)) => t == r,
            _ => false,
        }
    }

    /// The blocks of every loop of `cfg`, sorted, one list per loop.
    #[must_use]
    pub fn loops(cfg: &Cfg) -> Vec<Vec<BlockId>> {
        let sccs = CfgSccs::new(cfg);
        (0..sccs.count())
            .filter(|i| sccs.is_loop(cfg, *i))
            .map(|i| {
                let mut blocks = sccs.get_blocks(i).to_vec();
                blocks.sort_unstable();
                blocks
            })
            .collect()
    }

    /// Searches inductive pairs for every pair of blocks of every pair of
    /// loops.
    ///
    /// # Arguments
    ///
    /// * `bounds` - Path bounds to try, smallest first
    ///
    /// # Returns
    ///
    /// One self-loop edge of the dual automaton per pair found.
    #[must_use]
    pub fn learn_inductive_paths(&self, bounds: &[usize]) -> Vec<DualEdge> {
        let mut out = Vec::new();
        let rewrite_loops = Self::loops(self.rewrite);
        for target_loop in Self::loops(self.target) {
            for rewrite_loop in &rewrite_loops {
                for &ts in &target_loop {
                    for &rs in rewrite_loop {
                        out.extend(self.learn_at(ts, rs, bounds));
                    }
                }
            }
        }
        log::info!("found {} inductive path pairs", out.len());
        out
    }

    fn learn_at(&self, ts: BlockId, rs: BlockId, bounds: &[usize]) -> Vec<DualEdge> {
        let state = DualState::new(ts, rs);
        for &bound in bounds {
            let target_paths = loop_paths(self.target, bound, ts);
            let rewrite_paths = loop_paths(self.rewrite, bound, rs);

            let mut found = Vec::new();
            for tp in &target_paths {
                for rp in &rewrite_paths {
                    if self.inductive_pair_feasible(tp, rp) {
                        log::debug!("inductive pair {:?} / {:?}", tp, rp);
                        found.push(DualEdge {
                            from: state,
                            to: state,
                            te: tp.clone(),
                            re: rp.clone(),
                        });
                    }
                }
            }
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// Loop paths through `head`, each without its final return to `head`.
fn loop_paths(cfg: &Cfg, bound: usize, head: BlockId) -> Vec<CfgPath> {
    let mut paths = CfgPaths::enumerate_paths(cfg, bound, head, head);
    for path in &mut paths {
        path.pop();
    }
    paths
}

/// How a loop path returns to its first block.
fn back_edge(cfg: &Cfg, path: &[BlockId]) -> Option<JumpType> {
    let head = *path.first()?;
    let mut closed = path.to_vec();
    closed.push(head);
    Some(is_jump(cfg, head, &closed, path.len() - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::RegSet;

    fn cfg(text: &str) -> Cfg {
        Cfg::new(text.parse().unwrap(), RegSet::empty(), RegSet::empty()).unwrap()
    }

    #[test]
    fn test_loops() {
        let c = cfg("xorl %eax, %eax\n.L1:\nincq %rax\ndecq %rdi\njne .L1\nretq");
        assert_eq!(ControlLearner::loops(&c), vec![vec![2]]);
        let rotated = cfg("jmp .L2\n.L1:\nincq %rax\n.L2:\ndecq %rdi\njne .L1\nretq");
        assert_eq!(ControlLearner::loops(&rotated), vec![vec![2, 3]]);
        let straight = cfg("movq %rdi, %rax\nretq");
        assert!(ControlLearner::loops(&straight).is_empty());
    }

    #[test]
    fn test_rotated_loop_pairs_at_inner_block() {
        // The rewrite enters its loop at the test (block 3), which closes by
        // falling through; only the body block 2 closes with a taken jump.
        let target = cfg(".L1:\nincq %rax\ndecq %rdi\njne .L1\nretq");
        let rewrite = cfg("jmp .L2\n.L1:\nincq %rax\n.L2:\ndecq %rdi\njne .L1\nretq");
        let learner = ControlLearner::new(&target, &rewrite);
        assert!(!learner.inductive_pair_feasible(&[1], &[3, 2]));

        let pairs = learner.learn_inductive_paths(&[1, 2, 4, 8]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].from, DualState::new(1, 2));
        assert_eq!(pairs[0].te, vec![1]);
        assert_eq!(pairs[0].re, vec![2, 3]);
        assert!(pairs[0].follows(&target, &rewrite));
    }

    #[test]
    fn test_pairs_at_first_bound() {
        let target = cfg(".L1:\ndecq %rdi\njne .L1\nretq");
        let rewrite = cfg("nop\n.L2:\nsubq $1, %rdi\njne .L2\nretq");
        let learner = ControlLearner::new(&target, &rewrite);
        let pairs = learner.learn_inductive_paths(&[1, 2, 4, 8]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].from, DualState::new(1, 2));
        assert_eq!(pairs[0].te, vec![1]);
        assert_eq!(pairs[0].re, vec![2]);
        assert!(pairs[0].follows(&target, &rewrite));
    }

    #[test]
    fn test_mismatched_back_edges() {
        // The first loop closes with a taken jump, the second with an
        // unconditional one.
        let target = cfg(".L1:\ndecq %rdi\njne .L1\nretq");
        let rewrite = cfg(".L1:\ndecq %rdi\nje .L2\njmp .L1\n.L2:\nretq");
        let learner = ControlLearner::new(&target, &rewrite);
        assert!(!learner.inductive_pair_feasible(&[1], &[1, 2]));
        assert!(!learner.inductive_pair_feasible(&[], &[1]));
        assert!(learner.learn_inductive_paths(&[1, 2]).is_empty());
    }
}
