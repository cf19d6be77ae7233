//! A control flow graph represented as mappings of basic blocks to their predecessors and
//! successors.
//!
//! Predecessor order is the graph's own: phi inputs are parallel to it. The successor lists are
//! derived by inverting the predecessor edges and are what the dominator tree and the border
//! reconciliation pass iterate over.

use crate::ir::{Block, Graph};
use crate::timing;
use gantry_entity::SecondaryMap;

/// A container for the predecessors and successors of some block.
#[derive(Clone, Default)]
struct CfgNode {
    predecessors: Vec<Block>,
    successors: Vec<Block>,
}

/// The control flow graph of one IR graph.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CfgNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.data.clear();
        self.valid = false;
    }

    /// Allocate and compute the control flow graph of `graph`.
    pub fn with_graph(graph: &Graph) -> Self {
        let mut cfg = Self::new();
        cfg.compute(graph);
        cfg
    }

    /// Compute the control flow graph of `graph`.
    ///
    /// This will clear and overwrite any information already stored in this data structure.
    pub fn compute(&mut self, graph: &Graph) {
        let _tt = timing::flowgraph();
        self.clear();
        self.data.resize(graph.num_blocks());

        for block in graph.blocks() {
            for &pred in graph.block_preds(block) {
                self.data[block].predecessors.push(pred);
                self.data[pred].successors.push(block);
            }
        }

        self.valid = true;
    }

    /// Get the predecessors of `block`, in phi input order.
    pub fn preds(&self, block: Block) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.data[block].predecessors
    }

    /// Get the successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.data[block].successors
    }

    /// The number of predecessors of `block`.
    pub fn num_preds(&self, block: Block) -> usize {
        self.preds(block).len()
    }

    /// Check if the CFG is in a valid state.
    ///
    /// Note that this doesn't perform any kind of validity checks. It simply checks if the
    /// `compute()` method has been called since the last `clear()`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, Mode, Opcode};

    #[test]
    fn empty() {
        let graph = Graph::new();
        ControlFlowGraph::with_graph(&graph);
    }

    #[test]
    fn diamond() {
        let mut graph = Graph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        let b2 = graph.make_block();
        let b3 = graph.make_block();
        graph.add_block_pred(b1, b0);
        graph.add_block_pred(b2, b0);
        graph.add_block_pred(b3, b1);
        graph.add_block_pred(b3, b2);
        for &b in &[b0, b1, b2] {
            graph.make_node(b, Opcode::Jump, Mode::X, &[]);
        }

        let cfg = ControlFlowGraph::with_graph(&graph);
        assert_eq!(cfg.preds(b0), &[]);
        assert_eq!(cfg.succs(b0), &[b1, b2]);
        assert_eq!(cfg.preds(b3), &[b1, b2]);
        assert_eq!(cfg.succs(b3), &[]);
        assert_eq!(cfg.num_preds(b3), 2);
    }
}
