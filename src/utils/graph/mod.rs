//! Directed graph infrastructure behind the control flow graph analyses.
//!
//! - [`NodeId`] - strongly typed node identifier
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - the
//!   traits algorithms are written against
//! - [`algorithms`] - traversal orders, dominators, strongly connected
//!   components

pub mod algorithms;
#[cfg(test)]
mod directed;
mod node;
mod traits;

#[cfg(test)]
pub(crate) use directed::DirectedGraph;
#[cfg(test)]
pub(crate) use node::EdgeId;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
