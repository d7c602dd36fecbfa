//! Control flow graphs over x86-64 code and their decomposition.
//!
//! A [`Cfg`] splits a [`Code`] listing into basic blocks at label
//! definitions and after jumps and returns. Block 0 is a synthetic, empty
//! entry block and the last block is a synthetic, empty exit block; every
//! `ret` and the fall-through off the end of the listing lead to the exit.
//!
//! The submodules compute what the equivalence checker needs from the graph:
//!
//! - [`CfgDominators`] - dominator sets per block
//! - [`CfgSccs`] - loop detection through strongly connected components
//! - [`CfgPaths`] - bounded path enumeration
//! - [`inline_functions`] - call inlining from a function library
//!
//! # Example
//!
//! ```rust
//! use x64verify::{cfg::Cfg, x64::{Code, RegSet}};
//!
//! let code: Code = "movl $10, %ecx\n.L1:\ndecl %ecx\njne .L1\nretq".parse()?;
//! let cfg = Cfg::new(code, RegSet::empty(), RegSet::empty())?;
//! assert_eq!(cfg.num_blocks(), 5);
//! assert_eq!(cfg.jump_target(2), Some(2));
//! assert_eq!(cfg.fallthrough_target(2), Some(3));
//! # Ok::<(), x64verify::Error>(())
//! ```

mod dominators;
mod inline;
mod paths;
mod sccs;

use std::{fmt, ops::Range};

use rustc_hash::FxHashMap;

use crate::{
    utils::graph::{algorithms, GraphBase, NodeId, Predecessors, RootedGraph, Successors},
    x64::{Code, Instruction, RegSet},
    Error, Result,
};

pub use dominators::{dominator_intersect, CfgDominators};
pub use inline::inline_functions;
pub use paths::{CfgPath, CfgPaths};
pub use sccs::CfgSccs;

/// Index of a basic block.
pub type BlockId = usize;

/// An instruction position: `(block, offset within the block)`.
pub type Location = (BlockId, usize);

/// A control flow graph over a code listing.
#[derive(Debug, Clone)]
pub struct Cfg {
    code: Code,
    def_ins: RegSet,
    live_outs: RegSet,
    /// Instruction range per block; entry and exit are empty
    ranges: Vec<Range<usize>>,
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
    fallthrough: Vec<Option<BlockId>>,
    jump: Vec<Option<BlockId>>,
    reachable: Vec<bool>,
}

impl Cfg {
    /// Builds the graph for `code`.
    ///
    /// # Arguments
    ///
    /// * `code` - The instruction listing
    /// * `def_ins` - Locations defined on entry
    /// * `live_outs` - Locations observable on exit
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if a jump references an undefined label.
    pub fn new(code: Code, def_ins: RegSet, live_outs: RegSet) -> Result<Self> {
        let mut ranges = vec![0..0];
        let mut start = 0;
        for (i, instr) in code.iter().enumerate() {
            let open = code.as_slice()[start..i].iter().any(|x| !x.is_label_defn());
            if instr.is_label_defn() && open {
                ranges.push(start..i);
                start = i;
            }
            if instr.is_terminator() {
                ranges.push(start..i + 1);
                start = i + 1;
            }
        }
        if start < code.len() {
            ranges.push(start..code.len());
        }
        ranges.push(code.len()..code.len());

        let n = ranges.len();
        let exit = n - 1;

        let mut labels: FxHashMap<&str, BlockId> = FxHashMap::default();
        for (b, range) in ranges.iter().enumerate() {
            for instr in &code.as_slice()[range.clone()] {
                if !instr.is_label_defn() {
                    break;
                }
                if let Some(name) = instr.target_label() {
                    labels.insert(name, b);
                }
            }
        }

        let mut fallthrough = vec![None; n];
        let mut jump = vec![None; n];
        for b in 0..exit {
            let last = ranges[b].clone().last().map(|i| &code[i]);
            let next = b + 1;
            match last {
                Some(instr) if instr.is_ret() => fallthrough[b] = Some(exit),
                Some(instr) if instr.is_jump() => {
                    let name = instr.target_label().unwrap_or_default();
                    let target = labels.get(name).copied().ok_or_else(|| {
                        Error::GraphError(format!("jump to undefined label {}", name))
                    })?;
                    jump[b] = Some(target);
                    if instr.is_jcc() {
                        fallthrough[b] = Some(next);
                    }
                }
                _ => fallthrough[b] = Some(next),
            }
        }

        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for b in 0..n {
            for t in fallthrough[b].iter().chain(jump[b].iter()) {
                if !succs[b].contains(t) {
                    succs[b].push(*t);
                    preds[*t].push(b);
                }
            }
        }

        let mut cfg = Self {
            code,
            def_ins,
            live_outs,
            ranges,
            succs,
            preds,
            fallthrough,
            jump,
            reachable: Vec::new(),
        };
        cfg.reachable = algorithms::reachable_from(&cfg, NodeId::new(0));
        Ok(cfg)
    }

    /// The entry block (always 0).
    #[must_use]
    pub fn get_entry(&self) -> BlockId {
        0
    }

    /// The exit block (always the last block).
    #[must_use]
    pub fn get_exit(&self) -> BlockId {
        self.ranges.len() - 1
    }

    /// Number of blocks including entry and exit.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.ranges.len()
    }

    /// Number of instructions in `block` (label definitions included).
    #[must_use]
    pub fn num_instrs(&self, block: BlockId) -> usize {
        self.ranges.get(block).map_or(0, ExactSizeIterator::len)
    }

    /// The underlying code listing.
    #[must_use]
    pub fn get_code(&self) -> &Code {
        &self.code
    }

    /// Maps a location to an index into [`Cfg::get_code`].
    #[must_use]
    pub fn get_index(&self, loc: Location) -> Option<usize> {
        let range = self.ranges.get(loc.0)?;
        let index = range.start + loc.1;
        (index < range.end).then_some(index)
    }

    /// Instruction range of `block` within the code.
    #[must_use]
    pub fn block_range(&self, block: BlockId) -> Range<usize> {
        self.ranges.get(block).cloned().unwrap_or(0..0)
    }

    /// Instructions of `block`.
    #[must_use]
    pub fn instructions(&self, block: BlockId) -> &[Instruction] {
        &self.code.as_slice()[self.block_range(block)]
    }

    /// The last instruction of `block`, if any.
    #[must_use]
    pub fn last_instr(&self, block: BlockId) -> Option<&Instruction> {
        self.instructions(block).last()
    }

    /// Successor blocks: the fall-through target first, then the jump target.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(block).map_or(&[], Vec::as_slice)
    }

    /// Predecessor blocks.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.preds.get(block).map_or(&[], Vec::as_slice)
    }

    /// Where control goes when `block` does not jump.
    #[must_use]
    pub fn fallthrough_target(&self, block: BlockId) -> Option<BlockId> {
        self.fallthrough.get(block).copied().flatten()
    }

    /// Where control goes when `block` ends in a taken jump.
    #[must_use]
    pub fn jump_target(&self, block: BlockId) -> Option<BlockId> {
        self.jump.get(block).copied().flatten()
    }

    /// Locations defined on entry.
    #[must_use]
    pub fn def_ins(&self) -> &RegSet {
        &self.def_ins
    }

    /// Locations observable on exit.
    #[must_use]
    pub fn live_outs(&self) -> &RegSet {
        &self.live_outs
    }

    /// `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.get(block).copied().unwrap_or(false)
    }

    /// Reachable blocks in index order.
    pub fn reachable_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.num_blocks()).filter(|b| self.is_reachable(*b))
    }

    /// `true` if the code contains a loop (a reachable SCC that is a loop).
    #[must_use]
    pub fn has_loops(&self) -> bool {
        let sccs = CfgSccs::new(self);
        (0..sccs.count()).any(|i| sccs.is_loop(self, i))
    }
}

impl GraphBase for Cfg {
    fn node_count(&self) -> usize {
        self.num_blocks()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.num_blocks()).map(NodeId::new)
    }
}

impl Successors for Cfg {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        Cfg::successors(self, node.index())
            .iter()
            .map(|b| NodeId::new(*b))
    }
}

impl Predecessors for Cfg {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        Cfg::predecessors(self, node.index())
            .iter()
            .map(|b| NodeId::new(*b))
    }
}

impl RootedGraph for Cfg {
    fn entry(&self) -> NodeId {
        NodeId::new(self.get_entry())
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in 0..self.num_blocks() {
            let succs: Vec<String> = self.successors(b).iter().map(ToString::to_string).collect();
            writeln!(f, "bb{} -> [{}]", b, succs.join(", "))?;
            for instr in self.instructions(b) {
                writeln!(f, "    {}", instr)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(text: &str) -> Cfg {
        Cfg::new(text.parse().unwrap(), RegSet::empty(), RegSet::empty()).unwrap()
    }

    #[test]
    fn test_straight_line() {
        let cfg = build("movq %rax, %rbx\naddq $1, %rbx");
        assert_eq!(cfg.num_blocks(), 3);
        assert_eq!(cfg.num_instrs(1), 2);
        assert_eq!(cfg.successors(0), &[1]);
        assert_eq!(cfg.successors(1), &[2]);
        assert_eq!(cfg.get_index((1, 1)), Some(1));
        assert_eq!(cfg.get_index((1, 2)), None);
        assert!(cfg.is_reachable(cfg.get_exit()));
    }

    #[test]
    fn test_empty_code() {
        let cfg = build("");
        assert_eq!(cfg.num_blocks(), 2);
        assert_eq!(cfg.successors(0), &[1]);
    }

    #[test]
    fn test_branches_and_returns() {
        let cfg = build("cmpq $0, %rdi\nje .L1\nmovq $1, %rax\nretq\n.L1:\nmovq $2, %rax\nretq");
        // entry, [cmp je], [mov ret], [.L1 mov ret], exit
        assert_eq!(cfg.num_blocks(), 5);
        assert_eq!(cfg.fallthrough_target(1), Some(2));
        assert_eq!(cfg.jump_target(1), Some(3));
        assert_eq!(cfg.successors(2), &[4]);
        assert_eq!(cfg.predecessors(4), &[2, 3]);
        assert!(!cfg.has_loops());
    }

    #[test]
    fn test_unreachable_block() {
        let cfg = build("jmp .L1\nmovq $1, %rax\n.L1:\nretq");
        assert!(!cfg.is_reachable(2));
        assert!(cfg.is_reachable(3));
        assert_eq!(cfg.reachable_blocks().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_undefined_label() {
        let code: Code = "jmp .nowhere".parse().unwrap();
        assert!(matches!(
            Cfg::new(code, RegSet::empty(), RegSet::empty()),
            Err(Error::GraphError(_))
        ));
    }
}
