//! The sea-of-nodes graph.
//!
//! The `Graph` struct owns all nodes and blocks, the data and dependency edges between them, the
//! per-block schedules, and the backend side tables: register requirements per operand, assigned
//! value locations, spill flags and frame entities. Edge lists are kept exact under every
//! mutation so that successor iteration never sees a stale use.
//!
//! Nodes are both operations and the values they produce. Tuple-producing nodes are decomposed
//! by `Proj` nodes, and phi nodes live in their block's phi list rather than the schedule.

use crate::ir::layout::Layout;
use crate::ir::stackslot::StackSlots;
use crate::ir::{Block, Mode, Node, Opcode, StackSlot};
use crate::isa::x86;
use crate::isa::{RegClass, RegInfo, RegReq, RegUnit};
use core::fmt;
use gantry_entity::packed_option::PackedOption;
use gantry_entity::{EntitySet, Keys, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// A use of a value: the consuming node and the input position the value occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeUse {
    /// The consuming node.
    pub node: Node,
    /// The input position.
    pub index: usize,
}

/// The definition of one node.
struct NodeData {
    opcode: Opcode,
    mode: Mode,
    inputs: SmallVec<[Node; 4]>,
    deps: SmallVec<[Node; 2]>,
    block: PackedOption<Block>,
    /// Projection number; meaningful for `Proj` nodes only.
    pn: u16,
}

/// The definition of one block.
struct BlockData {
    preds: Vec<Block>,
    phis: Vec<Node>,
}

/// Location of an allocated value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueLoc {
    /// Not assigned yet.
    Unassigned,
    /// A physical register.
    Reg(RegUnit),
    /// A stack slot.
    Stack(StackSlot),
}

impl ValueLoc {
    /// Is this an assigned location?
    pub fn is_assigned(self) -> bool {
        self != ValueLoc::Unassigned
    }

    /// Get the register, or panic.
    pub fn unwrap_reg(self) -> RegUnit {
        match self {
            ValueLoc::Reg(r) => r,
            _ => panic!("unwrap_reg on {:?}", self),
        }
    }
}

impl Default for ValueLoc {
    fn default() -> Self {
        ValueLoc::Unassigned
    }
}

/// Register requirements of one node: one per input position, one for the produced value.
#[derive(Clone, Default)]
pub struct NodeReqs {
    /// Input requirements, parallel to the node's inputs.
    pub ins: SmallVec<[RegReq; 4]>,
    /// Requirement on the produced value.
    pub out: RegReq,
}

/// The graph: nodes, blocks, edges, schedules and backend side tables.
pub struct Graph {
    nodes: PrimaryMap<Node, NodeData>,
    blocks: PrimaryMap<Block, BlockData>,
    uses: SecondaryMap<Node, Vec<NodeUse>>,
    dep_uses: SecondaryMap<Node, Vec<Node>>,
    reqs: SecondaryMap<Node, NodeReqs>,
    dead: EntitySet<Node>,
    no_spill: EntitySet<Node>,
    remat: EntitySet<Node>,
    frame_entities: SecondaryMap<Node, PackedOption<StackSlot>>,

    /// Location assigned to every value by the colorer (and precolored by the constraint
    /// handler).
    pub locations: SecondaryMap<Node, ValueLoc>,

    /// The per-block schedules.
    pub layout: Layout,

    /// The stack frame.
    pub stack_slots: StackSlots,

    entry: PackedOption<Block>,
    anchor: PackedOption<Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            dep_uses: SecondaryMap::new(),
            reqs: SecondaryMap::new(),
            dead: EntitySet::new(),
            no_spill: EntitySet::new(),
            remat: EntitySet::new(),
            frame_entities: SecondaryMap::new(),
            locations: SecondaryMap::new(),
            layout: Layout::new(),
            stack_slots: StackSlots::new(),
            entry: None.into(),
            anchor: None.into(),
        }
    }

    /// The register tables of the target.
    pub fn reginfo(&self) -> &'static RegInfo {
        &x86::registers::INFO
    }

    // ------------------------------------------------------------------------
    // Blocks.

    /// Create a new block. The first block created is the graph's entry block.
    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData {
            preds: Vec::new(),
            phis: Vec::new(),
        });
        if self.entry.is_none() {
            self.entry = block.into();
        }
        block
    }

    /// The entry block.
    pub fn entry_block(&self) -> Option<Block> {
        self.entry.expand()
    }

    /// Add `pred` as the next predecessor of `block`.
    ///
    /// Predecessor order is significant: phi inputs are parallel to it.
    pub fn add_block_pred(&mut self, block: Block, pred: Block) {
        self.blocks[block].preds.push(pred);
    }

    /// The predecessors of `block`, in phi input order.
    pub fn block_preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// The phi nodes of `block`.
    pub fn phis(&self, block: Block) -> &[Node] {
        &self.blocks[block].phis
    }

    /// Iterate over all blocks in creation order.
    pub fn blocks(&self) -> Keys<Block> {
        self.blocks.keys()
    }

    /// The number of blocks created.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    // ------------------------------------------------------------------------
    // Node creation.

    /// Create a node in `block` with the given opcode, mode and data inputs.
    ///
    /// The node's register requirements are seeded from the target's per-opcode constraint table,
    /// defaulting to "any allocatable register of the mode's class".
    pub fn make_node(&mut self, block: Block, opcode: Opcode, mode: Mode, inputs: &[Node]) -> Node {
        debug_assert!(
            opcode != Opcode::Phi && opcode != Opcode::Proj,
            "use make_phi/make_proj"
        );
        let node = self.nodes.push(NodeData {
            opcode,
            mode,
            inputs: SmallVec::from_slice(inputs),
            deps: SmallVec::new(),
            block: block.into(),
            pn: 0,
        });
        for (index, &input) in inputs.iter().enumerate() {
            self.uses[input].push(NodeUse { node, index });
        }
        self.reqs[node] = self.seed_reqs(opcode, mode, inputs, 0);
        node
    }

    /// Create a phi node in `block`. `args` must be parallel to the block's predecessors.
    pub fn make_phi(&mut self, block: Block, mode: Mode, args: &[Node]) -> Node {
        debug_assert_eq!(
            args.len(),
            self.blocks[block].preds.len(),
            "phi arity must match predecessor count of {}",
            block
        );
        let node = self.nodes.push(NodeData {
            opcode: Opcode::Phi,
            mode,
            inputs: SmallVec::from_slice(args),
            deps: SmallVec::new(),
            block: block.into(),
            pn: 0,
        });
        for (index, &input) in args.iter().enumerate() {
            self.uses[input].push(NodeUse { node, index });
        }
        self.reqs[node] = self.seed_reqs(Opcode::Phi, mode, args, 0);
        self.blocks[block].phis.push(node);
        node
    }

    /// Create a projection selecting component `pn` of the tuple node `tuple`.
    pub fn make_proj(&mut self, tuple: Node, pn: u16, mode: Mode) -> Node {
        debug_assert_eq!(self.mode(tuple), Mode::T, "{} is not a tuple", tuple);
        let block = self.nodes[tuple].block;
        let node = self.nodes.push(NodeData {
            opcode: Opcode::Proj,
            mode,
            inputs: SmallVec::from_slice(&[tuple]),
            deps: SmallVec::new(),
            block,
            pn,
        });
        self.uses[tuple].push(NodeUse { node, index: 0 });
        // The projection's requirement comes from the tuple opcode's output table.
        let tuple_op = self.opcode(tuple);
        let mut reqs = NodeReqs::default();
        reqs.ins.push(RegReq::default());
        reqs.out = self.seed_out_req(tuple_op, mode, pn);
        self.reqs[node] = reqs;
        node
    }

    fn seed_reqs(&self, opcode: Opcode, mode: Mode, inputs: &[Node], out_pn: u16) -> NodeReqs {
        let info = self.reginfo();
        let spec = x86::op_constraints(opcode);
        let mut reqs = NodeReqs::default();
        for (i, &input) in inputs.iter().enumerate() {
            let mut req = match info.class_for_mode(self.mode(input)) {
                Some(rc) => RegReq::in_class(rc),
                None => RegReq::default(),
            };
            if let Some(spec) = spec {
                if let Some(os) = spec.ins.get(i) {
                    req.limited = os.limited;
                    req.differ_from = os.differ_from;
                    req.ignore = os.ignore;
                }
            }
            reqs.ins.push(req);
        }
        reqs.out = self.seed_out_req_spec(spec, mode, out_pn);
        reqs
    }

    fn seed_out_req(&self, opcode: Opcode, mode: Mode, pn: u16) -> RegReq {
        self.seed_out_req_spec(x86::op_constraints(opcode), mode, pn)
    }

    fn seed_out_req_spec(
        &self,
        spec: Option<&'static x86::OpConstraints>,
        mode: Mode,
        pn: u16,
    ) -> RegReq {
        let info = self.reginfo();
        let mut req = match info.class_for_mode(mode) {
            Some(rc) => RegReq::in_class(rc),
            None => RegReq::default(),
        };
        if let Some(spec) = spec {
            if let Some(os) = spec.outs.get(pn as usize) {
                req.limited = os.limited;
                req.same_as = os.same_as_input;
                req.differ_from = os.differ_from;
                req.ignore = os.ignore;
                req.produces_sp = os.produces_sp;
            }
        }
        req
    }

    // ------------------------------------------------------------------------
    // Node queries.

    /// The opcode of `node`.
    pub fn opcode(&self, node: Node) -> Opcode {
        self.nodes[node].opcode
    }

    /// The mode of `node`.
    pub fn mode(&self, node: Node) -> Mode {
        self.nodes[node].mode
    }

    /// The block containing `node`.
    pub fn block_of(&self, node: Node) -> Block {
        self.nodes[node].block.expand().expect("node has no block")
    }

    /// The data inputs of `node`.
    pub fn inputs(&self, node: Node) -> &[Node] {
        &self.nodes[node].inputs
    }

    /// One data input of `node`.
    pub fn input(&self, node: Node, index: usize) -> Node {
        self.nodes[node].inputs[index]
    }

    /// The number of data inputs of `node`.
    pub fn num_inputs(&self, node: Node) -> usize {
        self.nodes[node].inputs.len()
    }

    /// The dependency-only inputs of `node`.
    pub fn deps(&self, node: Node) -> &[Node] {
        &self.nodes[node].deps
    }

    /// The projection number of a `Proj` node.
    pub fn proj_num(&self, node: Node) -> u16 {
        debug_assert_eq!(self.opcode(node), Opcode::Proj);
        self.nodes[node].pn
    }

    /// Is `node` a phi?
    pub fn is_phi(&self, node: Node) -> bool {
        self.opcode(node) == Opcode::Phi
    }

    /// Is `node` a projection?
    pub fn is_proj(&self, node: Node) -> bool {
        self.opcode(node) == Opcode::Proj
    }

    /// Is `node` the unknown placeholder, defined nowhere and live everywhere?
    pub fn is_unknown(&self, node: Node) -> bool {
        self.opcode(node) == Opcode::Unknown
    }

    /// Has `node` been removed from the graph?
    pub fn is_dead(&self, node: Node) -> bool {
        self.dead.contains(node)
    }

    /// Iterate over all node keys ever created, including dead ones.
    pub fn nodes(&self) -> Keys<Node> {
        self.nodes.keys()
    }

    /// The data uses of `node`: every (consumer, input position) pair.
    pub fn uses(&self, node: Node) -> &[NodeUse] {
        &self.uses[node]
    }

    /// Does `node` have any data uses?
    pub fn has_uses(&self, node: Node) -> bool {
        !self.uses[node].is_empty()
    }

    /// The nodes depending on `node` through dependency-only edges.
    pub fn dep_uses(&self, node: Node) -> &[Node] {
        &self.dep_uses[node]
    }

    /// The projections of the tuple node `tuple`, sorted by projection number.
    pub fn projs(&self, tuple: Node) -> SmallVec<[Node; 4]> {
        debug_assert_eq!(self.mode(tuple), Mode::T);
        let mut projs: SmallVec<[Node; 4]> = self.uses[tuple]
            .iter()
            .map(|u| u.node)
            .filter(|&n| self.is_proj(n))
            .collect();
        projs.sort_by_key(|&p| self.proj_num(p));
        projs
    }

    /// Get the projection of `tuple` with number `pn`, if it exists.
    pub fn get_proj(&self, tuple: Node, pn: u16) -> Option<Node> {
        self.uses[tuple]
            .iter()
            .map(|u| u.node)
            .find(|&n| self.is_proj(n) && self.proj_num(n) == pn)
    }

    // ------------------------------------------------------------------------
    // Edge mutation.

    /// Replace input `index` of `user` with `new`.
    pub fn set_input(&mut self, user: Node, index: usize, new: Node) {
        let old = self.nodes[user].inputs[index];
        if old == new {
            return;
        }
        let pos = self.uses[old]
            .iter()
            .position(|u| u.node == user && u.index == index)
            .expect("dangling use edge");
        self.uses[old].swap_remove(pos);
        self.nodes[user].inputs[index] = new;
        self.uses[new].push(NodeUse { node: user, index });
    }

    /// Rewrite every data use of `old` to consume `new` instead.
    pub fn replace_uses(&mut self, old: Node, new: Node) {
        for NodeUse { node, index } in core::mem::replace(&mut self.uses[old], Vec::new()) {
            self.nodes[node].inputs[index] = new;
            self.uses[new].push(NodeUse { node, index });
        }
    }

    /// Add a dependency-only edge: `node` must be scheduled after `dep`.
    pub fn add_dep(&mut self, node: Node, dep: Node) {
        self.nodes[node].deps.push(dep);
        self.dep_uses[dep].push(node);
    }

    /// Remove `node` from the graph.
    ///
    /// The node must have no remaining data uses. Its own input edges are disconnected, its
    /// schedule slot is unlinked, and a phi is dropped from its block's phi list.
    pub fn remove_node(&mut self, node: Node) {
        debug_assert!(
            !self.has_uses(node),
            "removing {} which still has uses",
            node
        );
        let inputs: SmallVec<[Node; 4]> = core::mem::replace(
            &mut self.nodes[node].inputs,
            SmallVec::new(),
        );
        for (index, input) in inputs.into_iter().enumerate() {
            if let Some(pos) = self.uses[input]
                .iter()
                .position(|u| u.node == node && u.index == index)
            {
                self.uses[input].swap_remove(pos);
            }
        }
        if self.layout.is_scheduled(node) {
            self.layout.remove_inst(node);
        }
        if self.is_phi(node) {
            let block = self.block_of(node);
            self.blocks[block].phis.retain(|&p| p != node);
        }
        self.dead.insert(node);
    }

    // ------------------------------------------------------------------------
    // Backend info.

    /// The register requirement of input `index` of `node`.
    pub fn in_req(&self, node: Node, index: usize) -> &RegReq {
        &self.reqs[node].ins[index]
    }

    /// The register requirement of the value produced by `node`.
    pub fn out_req(&self, node: Node) -> &RegReq {
        &self.reqs[node].out
    }

    /// Overwrite the requirement of input `index` of `node`.
    pub fn set_in_req(&mut self, node: Node, index: usize, req: RegReq) {
        self.reqs[node].ins[index] = req;
    }

    /// Overwrite the requirement of the value produced by `node`.
    pub fn set_out_req(&mut self, node: Node, req: RegReq) {
        self.reqs[node].out = req;
    }

    /// The register class the value of `node` lives in, if it is a register value.
    pub fn value_class(&self, node: Node) -> Option<RegClass> {
        self.reqs[node]
            .out
            .class
            .map(|rci| self.reginfo().rc(rci))
    }

    /// Is `node` a register value of class `rc` that participates in allocation?
    pub fn is_in_class(&self, node: Node, rc: RegClass) -> bool {
        !self.is_dead(node)
            && !self.reqs[node].out.ignore
            && self.reqs[node].out.class == Some(rc.into())
    }

    /// Mark `node` as never to be spilled.
    pub fn set_do_not_spill(&mut self, node: Node) {
        self.no_spill.insert(node);
    }

    /// Must `node` stay in a register at all times?
    pub fn is_do_not_spill(&self, node: Node) -> bool {
        self.no_spill.contains(node)
    }

    /// Mark `node` as rematerializable.
    pub fn set_rematerializable(&mut self, node: Node) {
        self.remat.insert(node);
    }

    /// Can `node` be rematerialized instead of reloaded?
    pub fn is_rematerializable(&self, node: Node) -> bool {
        self.remat.contains(node)
    }

    /// The frame entity assigned to `node`, for nodes that touch the stack frame.
    pub fn frame_entity(&self, node: Node) -> Option<StackSlot> {
        self.frame_entities[node].expand()
    }

    /// Assign a frame entity to `node`.
    pub fn set_frame_entity(&mut self, node: Node, slot: StackSlot) {
        debug_assert!(self.opcode(node).uses_frame_entity());
        self.frame_entities[node] = slot.into();
    }

    // ------------------------------------------------------------------------
    // Keep-alive anchor.

    /// Pin `node` live until the end of the graph by attaching it to the anchor.
    pub fn keep_alive(&mut self, node: Node) {
        let anchor = match self.anchor.expand() {
            Some(a) => a,
            None => {
                let block = self.block_of(node);
                let a = self.make_node(block, Opcode::End, Mode::X, &[]);
                self.anchor = a.into();
                a
            }
        };
        let index = self.num_inputs(anchor);
        self.nodes[anchor].inputs.push(node);
        self.uses[node].push(NodeUse {
            node: anchor,
            index,
        });
        self.reqs[anchor].ins.push(RegReq::default());
    }

    /// The keep-alive anchor, if one was created.
    pub fn anchor(&self) -> Option<Node> {
        self.anchor.expand()
    }

    /// Is every data use of `node` the graph anchor?
    pub fn only_anchor_uses(&self, node: Node) -> bool {
        match self.anchor.expand() {
            None => false,
            Some(a) => {
                !self.uses[node].is_empty() && self.uses[node].iter().all(|u| u.node == a)
            }
        }
    }

    /// Return an object that can display `node` with its operands.
    pub fn display_node(&self, node: Node) -> DisplayNode {
        DisplayNode { graph: self, node }
    }
}

/// Displays a node in the textual dump format, e.g. `n7 = Add i32 n3, n4`.
pub struct DisplayNode<'a> {
    graph: &'a Graph,
    node: Node,
}

impl<'a> fmt::Display for DisplayNode<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let g = self.graph;
        let n = self.node;
        write!(f, "{} = {} {}", n, g.opcode(n), g.mode(n))?;
        for (i, input) in g.inputs(n).iter().enumerate() {
            if i == 0 {
                write!(f, " {}", input)?;
            } else {
                write!(f, ", {}", input)?;
            }
        }
        if g.is_proj(n) {
            write!(f, " #{}", g.proj_num(n))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_edges() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        assert_eq!(g.entry_block(), Some(b0));

        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);

        assert_eq!(g.inputs(c), &[a, b]);
        assert_eq!(g.uses(a), &[NodeUse { node: c, index: 0 }]);
        assert_eq!(g.block_of(c), b0);

        // Replacing an input keeps the use lists exact.
        let d = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        g.set_input(c, 1, d);
        assert!(g.uses(b).is_empty());
        assert_eq!(g.uses(d), &[NodeUse { node: c, index: 1 }]);
    }

    #[test]
    fn seeded_requirements() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);

        // Two-address add: output reuses input 0's register.
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        assert_eq!(g.out_req(c).same_as, Some(0));

        // Shift count is pinned to %ecx.
        let s = g.make_node(b0, Opcode::Shl, Mode::I32, &[a, b]);
        assert!(g.in_req(s, 1).is_limited());

        // Widening multiply projections are pinned through the output table.
        let m = g.make_node(b0, Opcode::Mul, Mode::T, &[a, b]);
        let lo = g.make_proj(m, 0, Mode::I32);
        let hi = g.make_proj(m, 1, Mode::I32);
        assert!(g.out_req(lo).is_limited());
        assert!(g.out_req(hi).is_limited());
        assert_eq!(g.projs(m), SmallVec::<[Node; 4]>::from_slice(&[lo, hi]));
    }

    #[test]
    fn phis_and_preds() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let b1 = g.make_block();
        let b2 = g.make_block();
        g.add_block_pred(b2, b0);
        g.add_block_pred(b2, b1);

        let x = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let y = g.make_node(b1, Opcode::Const, Mode::I32, &[]);
        let phi = g.make_phi(b2, Mode::I32, &[x, y]);

        assert_eq!(g.block_preds(b2), &[b0, b1]);
        assert_eq!(g.phis(b2), &[phi]);
        assert!(g.is_phi(phi));
    }

    #[test]
    fn removal_disconnects() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Copy, Mode::I32, &[a]);

        assert!(g.has_uses(a));
        g.remove_node(c);
        assert!(!g.has_uses(a));
        assert!(g.is_dead(c));
    }

    #[test]
    fn anchor_uses() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);

        g.keep_alive(c);
        assert!(g.only_anchor_uses(c));
        assert!(!g.only_anchor_uses(a));
    }
}
