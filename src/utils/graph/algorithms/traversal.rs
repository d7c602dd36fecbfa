//! Graph traversal orders.

use crate::utils::graph::{NodeId, Predecessors, Successors};

/// Computes the postorder traversal of nodes reachable from the start.
///
/// In postorder, a node is visited after all its descendants have been
/// visited. Successors are explored in iteration order.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
///
/// # Returns
///
/// A vector of `NodeId` in postorder; empty if `start` is out of range.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Computes the reverse postorder of nodes reachable from the start.
///
/// A node comes before all of its successors except along back edges, which
/// is the iteration order the dominator computation converges fastest in.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

/// Marks every node reachable from `start` by following successors.
#[must_use]
pub fn reachable_from<G: Successors>(graph: &G, start: NodeId) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    if start.index() >= seen.len() {
        return seen;
    }
    let mut stack = vec![start];
    seen[start.index()] = true;
    while let Some(node) = stack.pop() {
        for succ in graph.successors(node) {
            if !seen[succ.index()] {
                seen[succ.index()] = true;
                stack.push(succ);
            }
        }
    }
    seen
}

/// Marks every node that can reach `target` by following predecessors.
#[must_use]
pub fn reaching<G: Predecessors>(graph: &G, target: NodeId) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    if target.index() >= seen.len() {
        return seen;
    }
    let mut stack = vec![target];
    seen[target.index()] = true;
    while let Some(node) = stack.pop() {
        for pred in graph.predecessors(node) {
            if !seen[pred.index()] {
                seen[pred.index()] = true;
                stack.push(pred);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn diamond() -> (DirectedGraph<(), ()>, [NodeId; 5]) {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        let d = graph.add_node(());
        let orphan = graph.add_node(());
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(a, c, ()).unwrap();
        graph.add_edge(b, d, ()).unwrap();
        graph.add_edge(c, d, ()).unwrap();
        (graph, [a, b, c, d, orphan])
    }

    #[test]
    fn test_postorder_diamond() {
        let (graph, [a, b, c, d, _]) = diamond();
        assert_eq!(postorder(&graph, a), vec![d, b, c, a]);
        assert_eq!(reverse_postorder(&graph, a), vec![a, c, b, d]);
        assert!(postorder(&graph, NodeId::new(99)).is_empty());
    }

    #[test]
    fn test_reachability() {
        let (graph, [a, b, _, d, orphan]) = diamond();
        let fwd = reachable_from(&graph, a);
        assert!(fwd[d.index()]);
        assert!(!fwd[orphan.index()]);
        let back = reaching(&graph, b);
        assert!(back[a.index()]);
        assert!(!back[d.index()]);
    }
}
