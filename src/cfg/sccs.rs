//! Strongly connected components of the reachable blocks.

use crate::{
    cfg::{BlockId, Cfg},
    utils::graph::{algorithms, NodeId},
};

/// The SCC partition of the blocks reachable from the entry.
#[derive(Debug, Clone)]
pub struct CfgSccs {
    components: Vec<Vec<BlockId>>,
    component_of: Vec<Option<usize>>,
}

impl CfgSccs {
    /// Computes the components, in reverse topological order.
    #[must_use]
    pub fn new(cfg: &Cfg) -> Self {
        let components: Vec<Vec<BlockId>> =
            algorithms::strongly_connected_components(cfg, Some(&[NodeId::new(cfg.get_entry())]))
                .into_iter()
                .map(|scc| scc.into_iter().map(NodeId::index).collect())
                .collect();

        let mut component_of = vec![None; cfg.num_blocks()];
        for (i, scc) in components.iter().enumerate() {
            for b in scc {
                component_of[*b] = Some(i);
            }
        }
        Self {
            components,
            component_of,
        }
    }

    /// Number of components.
    #[must_use]
    pub fn count(&self) -> usize {
        self.components.len()
    }

    /// Blocks of component `i`, sorted.
    #[must_use]
    pub fn get_blocks(&self, i: usize) -> &[BlockId] {
        self.components.get(i).map_or(&[], Vec::as_slice)
    }

    /// Component containing `block`; `None` for unreachable blocks.
    #[must_use]
    pub fn component_of(&self, block: BlockId) -> Option<usize> {
        self.component_of.get(block).copied().flatten()
    }

    /// `true` if component `i` is a loop: more than one block, or a block
    /// that jumps to itself.
    #[must_use]
    pub fn is_loop(&self, cfg: &Cfg, i: usize) -> bool {
        match self.get_blocks(i) {
            [] => false,
            [b] => cfg.successors(*b).contains(b),
            _ => true,
        }
    }
}
