//! A general purpose directed graph with node and edge payloads.
//!
//! Nodes and edges are stored in insertion order and never removed, so
//! [`NodeId`] and [`EdgeId`] values stay valid for the lifetime of the
//! graph. Parallel edges are allowed; the dual automaton uses them for
//! distinct path pairs between the same pair of states.

use crate::{
    utils::graph::{EdgeId, GraphBase, NodeId, Predecessors, Successors},
    Error, Result,
};

struct EdgeEntry<E> {
    from: NodeId,
    to: NodeId,
    data: E,
}

/// A directed multigraph.
///
/// # Type Parameters
///
/// * `N` - Node payload
/// * `E` - Edge payload
pub struct DirectedGraph<N, E> {
    nodes: Vec<N>,
    edges: Vec<EdgeEntry<E>>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
}

impl<N, E> Default for DirectedGraph<N, E> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }
}

impl<N, E> DirectedGraph<N, E> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its identifier.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if either endpoint does not exist.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: E) -> Result<EdgeId> {
        if from.index() >= self.nodes.len() || to.index() >= self.nodes.len() {
            return Err(Error::GraphError(format!(
                "edge {} -> {} references a missing node",
                from, to
            )));
        }
        let id = EdgeId::new(self.edges.len());
        self.edges.push(EdgeEntry { from, to, data });
        self.outgoing[from.index()].push(id);
        self.incoming[to.index()].push(id);
        Ok(id)
    }

    /// Returns the payload of a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&N> {
        self.nodes.get(id.index())
    }

    /// Returns the mutable payload of a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.nodes.get_mut(id.index())
    }

    /// Returns the payload of an edge.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&E> {
        self.edges.get(id.index()).map(|e| &e.data)
    }

    /// Returns the endpoints of an edge.
    #[must_use]
    pub fn endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edges.get(id.index()).map(|e| (e.from, e.to))
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(id, payload)` for every node.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i), n))
    }

    /// Outgoing edges of `node` as `(edge, target)`.
    pub fn outgoing_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|e| (*e, self.edges[e.index()].to))
    }

    /// Incoming edges of `node` as `(edge, source)`.
    pub fn incoming_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, NodeId)> + '_ {
        self.incoming
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|e| (*e, self.edges[e.index()].from))
    }

    /// Finds the first node whose payload satisfies `pred`.
    pub fn find_node(&self, pred: impl Fn(&N) -> bool) -> Option<NodeId> {
        self.nodes.iter().position(pred).map(NodeId::new)
    }
}

impl<N, E> GraphBase for DirectedGraph<N, E> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }
}

impl<N, E> Successors for DirectedGraph<N, E> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing_edges(node).map(|(_, to)| to)
    }
}

impl<N, E> Predecessors for DirectedGraph<N, E> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming_edges(node).map(|(_, from)| from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_query() {
        let mut graph: DirectedGraph<&str, u32> = DirectedGraph::new();
        let a = graph.add_node("A");
        let b = graph.add_node("B");
        let e1 = graph.add_edge(a, b, 1).unwrap();
        let e2 = graph.add_edge(a, b, 2).unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_ne!(e1, e2);
        assert_eq!(graph.edge(e2), Some(&2));
        assert_eq!(graph.endpoints(e1), Some((a, b)));
        assert_eq!(graph.successors(a).collect::<Vec<_>>(), vec![b, b]);
        assert_eq!(graph.predecessors(b).count(), 2);
        assert_eq!(graph.find_node(|n| *n == "B"), Some(b));
    }

    #[test]
    fn test_missing_node_is_rejected() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        assert!(matches!(
            graph.add_edge(a, NodeId::new(7), ()),
            Err(Error::GraphError(_))
        ));
    }
}
