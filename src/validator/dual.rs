//! The dual automaton.
//!
//! A state `(ts, rs)` means "the target is about to execute block `ts`
//! and the rewrite block `rs`". An edge says that from such a state the
//! target may run path `te` while the rewrite runs `re`, arriving at the
//! destination state. Paths begin with the source state's block and
//! exclude the destination's. Every state carries a conjunction of
//! invariants that must hold whenever both programs are there.

use std::{collections::BTreeMap, fmt};

use crate::{
    cfg::{BlockId, Cfg, CfgPath},
    validator::invariants::Invariant,
};

/// A pair of blocks, one per program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DualState {
    /// Target block
    pub ts: BlockId,
    /// Rewrite block
    pub rs: BlockId,
}

impl DualState {
    /// Creates a state.
    #[must_use]
    pub const fn new(ts: BlockId, rs: BlockId) -> Self {
        Self { ts, rs }
    }
}

impl fmt::Display for DualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ts, self.rs)
    }
}

/// A pair of paths between two dual states.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DualEdge {
    /// Source state
    pub from: DualState,
    /// Destination state
    pub to: DualState,
    /// Target path, starting at `from.ts`, excluding `to.ts`
    pub te: CfgPath,
    /// Rewrite path, starting at `from.rs`, excluding `to.rs`
    pub re: CfgPath,
}

impl DualEdge {
    /// The target path followed by the destination block.
    #[must_use]
    pub fn target_path(&self) -> CfgPath {
        let mut path = self.te.clone();
        path.push(self.to.ts);
        path
    }

    /// The rewrite path followed by the destination block.
    #[must_use]
    pub fn rewrite_path(&self) -> CfgPath {
        let mut path = self.re.clone();
        path.push(self.to.rs);
        path
    }

    /// `true` if the paths begin at the source state and only follow
    /// edges of the two graphs.
    #[must_use]
    pub fn follows(&self, target: &Cfg, rewrite: &Cfg) -> bool {
        let valid = |cfg: &Cfg, start: BlockId, path: &[BlockId]| {
            path.first().is_none_or(|b| *b == start)
                && path.windows(2).all(|w| cfg.successors(w[0]).contains(&w[1]))
        };
        valid(target, self.from.ts, &self.target_path())
            && valid(rewrite, self.from.rs, &self.rewrite_path())
    }
}

impl fmt::Display for DualEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} via {:?} / {:?}", self.from, self.to, self.te, self.re)
    }
}

/// States, edges and per-state invariants.
#[derive(Debug, Clone)]
pub struct DualAutomaton {
    start: DualState,
    exit: DualState,
    edges: Vec<DualEdge>,
    invariants: BTreeMap<DualState, Invariant>,
}

impl DualAutomaton {
    /// An automaton holding only the start and exit states.
    #[must_use]
    pub fn new(target: &Cfg, rewrite: &Cfg) -> Self {
        Self {
            start: DualState::new(target.get_entry(), rewrite.get_entry()),
            exit: DualState::new(target.get_exit(), rewrite.get_exit()),
            edges: Vec::new(),
            invariants: BTreeMap::new(),
        }
    }

    /// The state where both programs begin.
    #[must_use]
    pub fn start_state(&self) -> DualState {
        self.start
    }

    /// The state where both programs have finished.
    #[must_use]
    pub fn exit_state(&self) -> DualState {
        self.exit
    }

    /// Adds an edge; returns `false` if an identical edge exists.
    pub fn add_edge(&mut self, edge: DualEdge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        log::debug!("dual edge {}", edge);
        self.edges.push(edge);
        true
    }

    /// All edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[DualEdge] {
        &self.edges
    }

    /// Number of edges.
    #[must_use]
    pub fn count_edges(&self) -> usize {
        self.edges.len()
    }

    /// Edges leaving `state`.
    pub fn next_edges(&self, state: DualState) -> impl Iterator<Item = &DualEdge> + '_ {
        self.edges.iter().filter(move |e| e.from == state)
    }

    /// Distinct destinations of the edges leaving `state`.
    #[must_use]
    pub fn next_states(&self, state: DualState) -> Vec<DualState> {
        let mut out: Vec<DualState> = Vec::new();
        for edge in self.next_edges(state) {
            if !out.contains(&edge.to) {
                out.push(edge.to);
            }
        }
        out
    }

    /// States reachable from the start state, in breadth-first order.
    #[must_use]
    pub fn get_reachable_states(&self) -> Vec<DualState> {
        let mut seen = vec![self.start];
        let mut i = 0;
        while i < seen.len() {
            for next in self.next_states(seen[i]) {
                if !seen.contains(&next) {
                    seen.push(next);
                }
            }
            i += 1;
        }
        seen
    }

    /// The invariant of `state`; `true` if none was set.
    #[must_use]
    pub fn get_invariant(&self, state: DualState) -> Invariant {
        self.invariants
            .get(&state)
            .cloned()
            .unwrap_or(Invariant::True)
    }

    /// Sets the invariant of `state`.
    pub fn set_invariant(&mut self, state: DualState, invariant: Invariant) {
        self.invariants.insert(state, invariant);
    }

    /// States that carry an invariant.
    pub fn states(&self) -> impl Iterator<Item = DualState> + '_ {
        self.invariants.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::RegSet;

    fn cfg(text: &str) -> Cfg {
        Cfg::new(text.parse().unwrap(), RegSet::empty(), RegSet::empty()).unwrap()
    }

    #[test]
    fn test_reachability() {
        let c = cfg(".L1:\ndecq %rdi\njne .L1\nretq");
        let mut dual = DualAutomaton::new(&c, &c);
        let head = DualState::new(1, 1);
        assert!(dual.add_edge(DualEdge {
            from: dual.start_state(),
            to: head,
            te: vec![0],
            re: vec![0],
        }));
        assert!(dual.add_edge(DualEdge {
            from: head,
            to: head,
            te: vec![1],
            re: vec![1],
        }));
        assert!(!dual.add_edge(dual.edges()[1].clone()));
        assert!(dual.add_edge(DualEdge {
            from: head,
            to: dual.exit_state(),
            te: vec![1, 2],
            re: vec![1, 2],
        }));

        assert_eq!(dual.count_edges(), 3);
        assert_eq!(
            dual.get_reachable_states(),
            vec![dual.start_state(), head, dual.exit_state()]
        );
        assert_eq!(dual.next_states(head), vec![head, dual.exit_state()]);
        assert!(dual.edges().iter().all(|e| e.follows(&c, &c)));
    }

    #[test]
    fn test_follows() {
        let c = cfg(".L1:\ndecq %rdi\njne .L1\nretq");
        let bad = DualEdge {
            from: DualState::new(0, 0),
            to: DualState::new(3, 3),
            te: vec![0, 2],
            re: vec![0, 1, 2],
        };
        assert!(!bad.follows(&c, &c));
    }

    #[test]
    fn test_invariants_default_true() {
        let c = cfg("retq");
        let mut dual = DualAutomaton::new(&c, &c);
        assert_eq!(dual.get_invariant(dual.start_state()), Invariant::True);
        dual.set_invariant(dual.exit_state(), Invariant::MemoryEquality);
        assert_eq!(dual.get_invariant(dual.exit_state()), Invariant::MemoryEquality);
        assert_eq!(dual.states().count(), 1);
    }
}
