//! A dominator tree of the control flow graph.
//!
//! The chordal colorer walks the dominator tree in preorder; combined with the per-block border
//! order this yields a perfect elimination ordering of the interference graph. The tree is
//! computed with the classic iterative two-finger intersection over reverse postorder.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph};
use crate::timing;
use gantry_entity::packed_option::PackedOption;
use gantry_entity::SecondaryMap;

/// RPO numbers are assigned in multiples of `STRIDE` to leave room for renumbering if blocks are
/// ever split.
const STRIDE: u32 = 4;

#[derive(Clone, Default)]
struct DomNode {
    /// Number of this block in a reverse postorder traversal of the CFG; 0 for unreachable
    /// blocks.
    rpo_number: u32,

    /// The immediate dominator, or `None` for the entry block and unreachable blocks.
    idom: PackedOption<Block>,

    /// Children in the dominator tree.
    children: Vec<Block>,
}

/// The dominator tree of one control flow graph.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,

    /// CFG postorder of reachable blocks.
    postorder: Vec<Block>,

    valid: bool,
}

impl DominatorTree {
    /// Allocate a new blank dominator tree.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_graph(graph: &Graph, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(graph, cfg);
        domtree
    }

    /// Reset and compute a CFG postorder and dominator tree.
    pub fn compute(&mut self, graph: &Graph, cfg: &ControlFlowGraph) {
        let _tt = timing::domtree();
        debug_assert!(cfg.is_valid());
        self.clear();
        self.compute_postorder(graph, cfg);
        self.compute_domtree(cfg);
        self.valid = true;
    }

    /// Clear the data structures used to represent the dominator tree.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;
    }

    /// Is the tree valid?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Get the CFG postorder of blocks that was used to compute the dominator tree.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.postorder
    }

    /// Returns the immediate dominator of `block`.
    ///
    /// The entry block has no dominator, and unreachable blocks have none either.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// The children of `block` in the dominator tree.
    pub fn children(&self, block: Block) -> &[Block] {
        &self.nodes[block].children
    }

    /// Returns `true` if `a` dominates `b`, reflexively.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        debug_assert!(self.is_valid());
        let mut cur = Some(b);
        while let Some(block) = cur {
            if block == a {
                return true;
            }
            // Walking up the tree strictly decreases the RPO number, so this terminates.
            if self.nodes[block].rpo_number <= self.nodes[a].rpo_number {
                return false;
            }
            cur = self.idom(block);
        }
        false
    }

    fn compute_postorder(&mut self, graph: &Graph, cfg: &ControlFlowGraph) {
        let entry = match graph.entry_block() {
            Some(b) => b,
            None => return,
        };
        self.nodes.resize(graph.num_blocks());

        // Depth-first traversal with an explicit stack. The second visit of a block emits it.
        let mut visited = SecondaryMap::<Block, bool>::new();
        let mut stack = vec![(entry, false)];
        while let Some((block, emit)) = stack.pop() {
            if emit {
                self.postorder.push(block);
                continue;
            }
            if visited[block] {
                continue;
            }
            visited[block] = true;
            stack.push((block, true));
            for &succ in cfg.succs(block).iter().rev() {
                if !visited[succ] {
                    stack.push((succ, false));
                }
            }
        }

        for (rpo, &block) in self.postorder.iter().rev().enumerate() {
            self.nodes[block].rpo_number = (rpo as u32 + 1) * STRIDE;
        }
    }

    fn compute_domtree(&mut self, cfg: &ControlFlowGraph) {
        // Iterative algorithm over reverse postorder, intersecting the dominators of all
        // processed predecessors until a fixed point.
        let mut changed = true;
        while changed {
            changed = false;
            // Skip the entry block, the last element of the postorder.
            let order: Vec<Block> = self.postorder.iter().rev().skip(1).cloned().collect();
            for block in order {
                let mut new_idom: Option<Block> = None;
                for &pred in cfg.preds(block) {
                    if !self.is_reachable(pred) {
                        continue;
                    }
                    // Only consider predecessors that already have a dominator candidate.
                    if self.nodes[pred].idom.is_none() && self.nodes[pred].rpo_number != STRIDE {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => self.common_dominator(cur, pred),
                    });
                }
                if let Some(idom) = new_idom {
                    if self.nodes[block].idom.expand() != Some(idom) {
                        self.nodes[block].idom = idom.into();
                        changed = true;
                    }
                }
            }
        }

        // Populate the children lists in RPO so the preorder walk is deterministic.
        let order: Vec<Block> = self.postorder.iter().rev().cloned().collect();
        for block in order {
            if let Some(idom) = self.nodes[block].idom.expand() {
                self.nodes[idom].children.push(block);
            }
        }
    }

    /// Compute the common dominator of two blocks, the two-finger intersection.
    fn common_dominator(&self, mut a: Block, mut b: Block) -> Block {
        loop {
            let ra = self.nodes[a].rpo_number;
            let rb = self.nodes[b].rpo_number;
            if ra == rb {
                debug_assert_eq!(a, b, "distinct blocks with equal RPO numbers");
                return a;
            }
            if ra > rb {
                a = self.idom(a).expect("ancestor of reachable block missing");
            } else {
                b = self.idom(b).expect("ancestor of reachable block missing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, Mode, Opcode};

    fn terminated(graph: &mut Graph, block: Block) {
        graph.make_node(block, Opcode::Jump, Mode::X, &[]);
    }

    #[test]
    fn empty() {
        let graph = Graph::new();
        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);
        assert!(domtree.cfg_postorder().is_empty());
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
        for &b in &[b0, b1, b2, b3] {
            terminated(&mut graph, b);
        }

        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);

        assert_eq!(domtree.idom(b0), None);
        assert_eq!(domtree.idom(b1), Some(b0));
        assert_eq!(domtree.idom(b2), Some(b0));
        assert_eq!(domtree.idom(b3), Some(b0));
        assert!(domtree.dominates(b0, b3));
        assert!(!domtree.dominates(b1, b3));
        assert!(domtree.dominates(b1, b1));
        assert_eq!(domtree.cfg_postorder().len(), 4);
        assert_eq!(*domtree.cfg_postorder().last().unwrap(), b0);
    }

    #[test]
    fn loop_back_edge() {
        let mut graph = Graph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        let b2 = graph.make_block();
        // b1 loops to itself through its second predecessor.
        graph.add_block_pred(b1, b0);
        graph.add_block_pred(b1, b1);
        graph.add_block_pred(b2, b1);
        for &b in &[b0, b1, b2] {
            terminated(&mut graph, b);
        }

        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);

        assert_eq!(domtree.idom(b1), Some(b0));
        assert_eq!(domtree.idom(b2), Some(b1));
        assert!(domtree.is_reachable(b2));
        assert_eq!(domtree.children(b0), &[b1]);
        assert_eq!(domtree.children(b1), &[b2]);
    }
}
