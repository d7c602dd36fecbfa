//! Bounded path enumeration.

use crate::cfg::{BlockId, Cfg};

/// A sequence of blocks following control flow edges.
pub type CfgPath = Vec<BlockId>;

/// Path enumeration over a [`Cfg`].
pub struct CfgPaths;

impl CfgPaths {
    /// Enumerates every path from `start` to `end` in which no block occurs
    /// more than `bound` times.
    ///
    /// The final `end` block does not count against the bound, so with
    /// `start == end` the result holds the loop paths `[start, ..., start]`
    /// of length at least two. A path stops at its first arrival at `end`.
    ///
    /// # Arguments
    ///
    /// * `cfg` - The graph
    /// * `bound` - Maximum occurrences of any block (at least 1)
    /// * `start` - First block of every path
    /// * `end` - Last block of every path
    ///
    /// # Returns
    ///
    /// The paths in depth-first order (fall-through successors first).
    #[must_use]
    pub fn enumerate_paths(cfg: &Cfg, bound: usize, start: BlockId, end: BlockId) -> Vec<CfgPath> {
        let mut out = Vec::new();
        if start >= cfg.num_blocks() || end >= cfg.num_blocks() || bound == 0 {
            return out;
        }
        let mut counts = vec![0usize; cfg.num_blocks()];
        let mut path = vec![start];
        counts[start] = 1;
        Self::extend(cfg, bound, end, &mut path, &mut counts, &mut out);
        out
    }

    fn extend(
        cfg: &Cfg,
        bound: usize,
        end: BlockId,
        path: &mut CfgPath,
        counts: &mut [usize],
        out: &mut Vec<CfgPath>,
    ) {
        let Some(&current) = path.last() else {
            return;
        };
        for &next in cfg.successors(current) {
            if next == end {
                path.push(next);
                out.push(path.clone());
                path.pop();
                continue;
            }
            if counts[next] >= bound {
                continue;
            }
            counts[next] += 1;
            path.push(next);
            Self::extend(cfg, bound, end, path, counts, out);
            path.pop();
            counts[next] -= 1;
        }
    }

    /// Enumerates every entry-to-exit path with the given bound.
    #[must_use]
    pub fn enumerate_all(cfg: &Cfg, bound: usize) -> Vec<CfgPath> {
        Self::enumerate_paths(cfg, bound, cfg.get_entry(), cfg.get_exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::RegSet;

    fn build(text: &str) -> Cfg {
        Cfg::new(text.parse().unwrap(), RegSet::empty(), RegSet::empty()).unwrap()
    }

    #[test]
    fn test_diamond_paths() {
        let cfg = build("testq %rdi, %rdi\nje .L1\nincq %rax\n.L1:\nretq");
        // 0 entry, 1 test/je, 2 inc, 3 .L1 ret, 4 exit
        let paths = CfgPaths::enumerate_all(&cfg, 1);
        assert_eq!(paths, vec![vec![0, 1, 2, 3, 4], vec![0, 1, 3, 4]]);
    }

    #[test]
    fn test_loop_paths() {
        let cfg = build(".L1:\ndecq %rdi\njne .L1\nretq");
        assert_eq!(CfgPaths::enumerate_paths(&cfg, 1, 1, 1), vec![vec![1, 1]]);
        let all = CfgPaths::enumerate_all(&cfg, 2);
        assert_eq!(all, vec![vec![0, 1, 2, 3], vec![0, 1, 1, 2, 3]]);
    }

    #[test]
    fn test_bound_terminates_on_nested_loops() {
        let cfg = build(".L1:\n.L2:\ndecq %rsi\njne .L2\ndecq %rdi\njne .L1\nretq");
        for bound in 1..4 {
            let paths = CfgPaths::enumerate_all(&cfg, bound);
            assert!(!paths.is_empty());
            for p in &paths {
                for b in 0..cfg.num_blocks() {
                    assert!(p.iter().filter(|x| **x == b).count() <= bound);
                }
            }
        }
    }
}
