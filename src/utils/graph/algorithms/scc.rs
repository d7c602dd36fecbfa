//! Strongly connected components using Tarjan's algorithm.
//!
//! A strongly connected component is a maximal set of nodes such that every
//! node reaches every other node. In a control flow graph, a component with
//! more than one block (or a block with a self edge) is a loop.

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of the nodes reachable from
/// `roots` (or of the whole graph when `roots` is `None`).
///
/// # Returns
///
/// Components in reverse topological order: if an edge leads from component
/// A to component B, B appears first. Nodes within a component are sorted by
/// index.
pub fn strongly_connected_components<G>(graph: &G, roots: Option<&[NodeId]>) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);

    let starts: Vec<NodeId> = match roots {
        Some(r) => r.to_vec(),
        None => (0..node_count).map(NodeId::new).collect(),
    };
    for node in starts {
        if node.index() < node_count && state.index[node.index()] == UNVISITED {
            state.strongconnect(graph, node);
        }
    }

    state.sccs
}

const UNVISITED: usize = usize::MAX;

struct TarjanState {
    /// Discovery index per node
    index: Vec<usize>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    current_index: usize,
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![UNVISITED; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn strongconnect<G: Successors>(&mut self, graph: &G, v: NodeId) {
        let vi = v.index();
        self.index[vi] = self.current_index;
        self.lowlink[vi] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[vi] = true;

        let successors: Vec<NodeId> = graph.successors(v).collect();
        for w in successors {
            let wi = w.index();
            if self.index[wi] == UNVISITED {
                self.strongconnect(graph, w);
                self.lowlink[vi] = self.lowlink[vi].min(self.lowlink[wi]);
            } else if self.on_stack[wi] {
                self.lowlink[vi] = self.lowlink[vi].min(self.index[wi]);
            }
        }

        if self.lowlink[vi] == self.index[vi] {
            let mut scc = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w.index()] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            scc.sort();
            self.sccs.push(scc);
        }
    }
}
