//! Trait definitions for graph abstractions.
//!
//! Algorithms in [`crate::utils::graph::algorithms`] are written against
//! these traits, so the dominator and SCC code runs on the program
//! [`Cfg`](crate::cfg::Cfg) and on the multigraph the unit tests build.
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - outgoing edges
//! - [`Predecessors`] - incoming edges
//! - [`RootedGraph`] - graphs with a designated entry node

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers, by ascending index.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successor nodes of the given node.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose successors to iterate
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessor nodes of the given node.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose predecessors to iterate
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs with a designated entry (root) node.
///
/// For a control flow graph the entry is the synthetic, empty entry block;
/// it is the root for dominator computation and forward reachability.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ring(usize);

    impl GraphBase for Ring {
        fn node_count(&self) -> usize {
            self.0
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.0).map(NodeId::new)
        }
    }

    impl Successors for Ring {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            std::iter::once(NodeId::new((node.index() + 1) % self.0))
        }
    }

    impl Predecessors for Ring {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            std::iter::once(NodeId::new((node.index() + self.0 - 1) % self.0))
        }
    }

    impl RootedGraph for Ring {
        fn entry(&self) -> NodeId {
            NodeId::new(0)
        }
    }

    #[test]
    fn test_trait_objects_compose() {
        let ring = Ring(3);
        assert_eq!(ring.node_ids().count(), 3);
        assert_eq!(ring.successors(NodeId::new(2)).next(), Some(NodeId::new(0)));
        assert_eq!(ring.predecessors(ring.entry()).next(), Some(NodeId::new(2)));
    }
}
