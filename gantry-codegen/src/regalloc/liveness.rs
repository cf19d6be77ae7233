//! Liveness analysis and the next-use oracle.
//!
//! Both are computed per register class: only values that occupy a register of the class under
//! allocation participate.
//!
//! The `Liveness` pass computes the classic per-block live-in and live-out sets by iterating a
//! backward dataflow problem to its fixed point. In SSA form a phi defines its value at the head
//! of its block, and a phi argument is used at the end of the corresponding predecessor.
//!
//! The `NextUses` oracle answers "how many instructions from program point P until value V is
//! next needed", the quantity Belady's MIN ranks eviction candidates by. Distances within a
//! block come from walking the schedule; distances across block ends come from memoized
//! per-block summaries computed through the successors' live-in sets. A value flagged
//! do-not-spill reports distance 0 from everywhere so the spiller never evicts it.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph, Node};
use crate::isa::RegClass;
use crate::timing;
use gantry_entity::{EntitySet, SecondaryMap};
use log::debug;
use std::collections::HashMap;

/// A next-use distance, measured in instructions.
pub type Distance = u32;

/// The distance of a value that is never used again.
pub const DIST_INFINITY: Distance = u32::MAX;

/// Per-class live-in/live-out sets of every block.
pub struct Liveness {
    live_in: SecondaryMap<Block, EntitySet<Node>>,
    live_out: SecondaryMap<Block, EntitySet<Node>>,
    valid: bool,
}

impl Liveness {
    /// Create a new empty liveness analysis.
    pub fn new() -> Self {
        Self {
            live_in: SecondaryMap::new(),
            live_out: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear the computed sets.
    pub fn clear(&mut self) {
        self.live_in.clear();
        self.live_out.clear();
        self.valid = false;
    }

    /// Is the analysis valid?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The values of the analyzed class live into `block`. Phis of `block` are not live-in;
    /// they are defined at the block head.
    pub fn live_in(&self, block: Block) -> &EntitySet<Node> {
        debug_assert!(self.valid);
        &self.live_in[block]
    }

    /// The values of the analyzed class live out of `block`.
    pub fn live_out(&self, block: Block) -> &EntitySet<Node> {
        debug_assert!(self.valid);
        &self.live_out[block]
    }

    /// Compute liveness of `rc`-class values over `graph`.
    pub fn compute(&mut self, graph: &Graph, cfg: &ControlFlowGraph, rc: RegClass) {
        let _tt = timing::liveness();
        self.clear();

        // Per-block upward-exposed uses and defs.
        let mut gen = SecondaryMap::<Block, EntitySet<Node>>::new();
        let mut defs = SecondaryMap::<Block, EntitySet<Node>>::new();
        // Values used by a successor phi, attributed to the end of this block.
        let mut phi_gen = SecondaryMap::<Block, EntitySet<Node>>::new();

        for node in graph.nodes() {
            if graph.is_dead(node) {
                continue;
            }
            let block = graph.block_of(node);
            if graph.is_in_class(node, rc) {
                defs[block].insert(node);
            }
            for (i, &input) in graph.inputs(node).iter().enumerate() {
                if !graph.is_in_class(input, rc) || graph.is_unknown(input) {
                    continue;
                }
                if graph.is_phi(node) {
                    let pred = graph.block_preds(block)[i];
                    phi_gen[pred].insert(input);
                } else if graph.block_of(input) != block {
                    gen[block].insert(input);
                }
            }
        }

        // Iterate to the fixed point. The sets only grow, so counting insertions detects
        // convergence.
        let mut changed = true;
        while changed {
            changed = false;
            for block in graph.blocks() {
                for v in phi_gen[block].keys().collect::<Vec<Node>>() {
                    if phi_gen[block].contains(v) && self.live_out[block].insert(v) {
                        changed = true;
                    }
                }
                for &succ in cfg.succs(block) {
                    for v in self.live_in[succ].keys().collect::<Vec<Node>>() {
                        if self.live_in[succ].contains(v) && self.live_out[block].insert(v) {
                            changed = true;
                        }
                    }
                }
                for v in gen[block].keys().collect::<Vec<Node>>() {
                    if gen[block].contains(v) && self.live_in[block].insert(v) {
                        changed = true;
                    }
                }
                for v in self.live_out[block].keys().collect::<Vec<Node>>() {
                    if self.live_out[block].contains(v)
                        && !defs[block].contains(v)
                        && self.live_in[block].insert(v)
                    {
                        changed = true;
                    }
                }
            }
        }

        debug!(
            "liveness of {} computed over {} blocks",
            rc,
            graph.num_blocks()
        );
        self.valid = true;
    }
}

/// The next-use oracle for one register class.
///
/// Borrows the graph and the liveness sets; create it fresh after every IR mutation that moves
/// uses around.
pub struct NextUses<'a> {
    graph: &'a Graph,
    cfg: &'a ControlFlowGraph,
    liveness: &'a Liveness,
    /// Memoized distance from a block's first instruction to the next use of a value.
    from_start: HashMap<(Block, Node), Summary>,
}

#[derive(Clone, Copy, PartialEq)]
enum Summary {
    InProgress,
    Done(Distance),
}

impl<'a> NextUses<'a> {
    /// Create an oracle over the given analyses.
    pub fn new(graph: &'a Graph, cfg: &'a ControlFlowGraph, liveness: &'a Liveness) -> Self {
        Self {
            graph,
            cfg,
            liveness,
            from_start: HashMap::new(),
        }
    }

    /// Does `node` advance the instruction cursor? Phis occupy position zero and projections
    /// are part of their tuple.
    fn counts(&self, node: Node) -> bool {
        !self.graph.is_phi(node) && !self.graph.is_proj(node)
    }

    /// Does instruction `inst` use `value` as a data input?
    fn uses_value(&self, inst: Node, value: Node) -> bool {
        self.graph.inputs(inst).iter().any(|&i| i == value)
    }

    /// Next-use distance of `value` measured from `from` (inclusive) in `block`'s schedule.
    ///
    /// With `skip_uses_at_from` set, uses at `from` itself are ignored; the def-displacement
    /// step of the spiller asks for distances after the current instruction has consumed its
    /// operands.
    ///
    /// A do-not-spill value always reports 0 so it sorts ahead of every eviction candidate.
    pub fn next_use(
        &mut self,
        block: Block,
        from: Option<Node>,
        value: Node,
        skip_uses_at_from: bool,
    ) -> Distance {
        if self.graph.is_do_not_spill(value) {
            return 0;
        }
        let mut dist: Distance = 0;
        let mut cur = match from {
            Some(n) => Some(n),
            None => self.graph.layout.first_inst(block),
        };
        let mut first = true;
        while let Some(inst) = cur {
            let skip = first && skip_uses_at_from;
            if !self.graph.is_proj(inst) && !skip && self.uses_value(inst, value) {
                return dist;
            }
            if self.counts(inst) {
                dist = dist.saturating_add(1);
            }
            first = false;
            cur = self.graph.layout.next_inst(inst);
        }
        dist.saturating_add(self.distance_at_exit(block, value))
    }

    /// Next-use distance of `value` from the head of `block`.
    pub fn next_use_from_start(&mut self, block: Block, value: Node) -> Distance {
        if self.graph.is_do_not_spill(value) {
            return 0;
        }
        if let Some(summary) = self.from_start.get(&(block, value)) {
            return match *summary {
                // A cycle without an intervening use: the value is not needed around this loop.
                Summary::InProgress => DIST_INFINITY,
                Summary::Done(d) => d,
            };
        }
        self.from_start
            .insert((block, value), Summary::InProgress);
        let d = self.next_use(block, None, value, false);
        self.from_start.insert((block, value), Summary::Done(d));
        d
    }

    /// Distance from the end of `block` (after its last instruction) to the next use of
    /// `value`: a use by a successor phi happens on the edge itself, everything else is found
    /// through the successors' summaries.
    fn distance_at_exit(&mut self, block: Block, value: Node) -> Distance {
        let mut best = DIST_INFINITY;
        let succs: Vec<Block> = self.cfg.succs(block).to_vec();
        for succ in succs {
            for &phi in &self.graph.phis(succ).to_vec() {
                for (i, &arg) in self.graph.inputs(phi).iter().enumerate() {
                    if arg == value && self.graph.block_preds(succ)[i] == block {
                        return 0;
                    }
                }
            }
            if self.liveness.live_in(succ).contains(value) {
                best = best.min(self.next_use_from_start(succ, value));
            }
        }
        best
    }
}
