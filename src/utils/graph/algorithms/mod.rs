//! Graph algorithms for control flow analysis.
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Postorder / RPO | O(V + E) | iteration order, reachability |
//! | Dominators | O(V * E) worst case, near linear in practice | loop heads, cut points |
//! | SCC | O(V + E) | loop detection |
//!
//! # Examples
//!
//! ```rust
//! use x64verify::{cfg::Cfg, utils::graph::{algorithms, NodeId}, x64::RegSet};
//!
//! let code = "xorl %eax, %eax\n.L1:\ndecq %rdi\njne .L1\nretq".parse()?;
//! let cfg = Cfg::new(code, RegSet::universe(), RegSet::universe())?;
//! let entry = NodeId::new(cfg.get_entry());
//!
//! let tree = algorithms::compute_dominators(&cfg, entry);
//! assert!(cfg.reachable_blocks().all(|b| tree.dominates(entry, NodeId::new(b))));
//! let sccs = algorithms::strongly_connected_components(&cfg, Some(&[entry]));
//! assert!(sccs.iter().any(|scc| scc.contains(&entry)));
//! # Ok::<(), x64verify::Error>(())
//! ```

mod dominators;
mod scc;
mod traversal;

pub use dominators::{compute_dominators, DominatorIterator, DominatorTree};
pub use scc::strongly_connected_components;
pub use traversal::{postorder, reachable_from, reaching, reverse_postorder};
