//! The constraint handler.
//!
//! Instructions with pinned operands (a *limited* register set on an input or output) cannot be
//! left to the first-fit colorer: the values alive around them must be shuffled so every pinned
//! operand can sit in an admissible register. For each such instruction `I` the handler:
//!
//! 1. inserts a `Perm` node before `I` whose inputs are *all* class values live across `I`,
//!    with one projection per input, and rewires the dominated uses (including `I`'s operands)
//!    to the projections;
//! 2. pairs output operands with input operands that die at `I` and share admissible registers,
//!    preferring the partner with the smallest admissible set (the should-be-same idiom is a
//!    forced pairing);
//! 3. assigns registers to the operand partitions and the live-through projections by maximum
//!    bipartite matching, which must be perfect over the operands because the spiller bounded
//!    the pressure;
//! 4. writes the registers into the carriers as precolored locations for the chordal colorer.
//!
//! Phis occupy position zero of their block and are never walked here.

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph, Mode, Node, Opcode, ValueLoc};
use crate::isa::{RegClass, RegUnitMask};
use crate::regalloc::liveness::Liveness;
use crate::regalloc::matching::maximum_matching;
use crate::timing;
use gantry_entity::EntitySet;
use log::debug;
use smallvec::SmallVec;

/// The constraint handling pass.
pub struct Constraints {
    liveness: Liveness,
}

impl Constraints {
    /// Create a new constraint handling pass.
    pub fn new() -> Self {
        Self {
            liveness: Liveness::new(),
        }
    }

    /// Handle every pinned instruction of `rc`-class operands in `graph`.
    pub fn run(
        &mut self,
        graph: &mut Graph,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        rc: RegClass,
    ) {
        let _tt = timing::constraints();

        // Snapshot the constrained instructions; perm insertion edits the schedules.
        let mut worklist: Vec<Node> = Vec::new();
        for block in graph.blocks() {
            for inst in graph.layout.block_insts(block) {
                if !graph.is_proj(inst) && is_constrained(graph, rc, inst) {
                    worklist.push(inst);
                }
            }
        }

        for inst in worklist {
            if graph.is_dead(inst) {
                continue;
            }
            // Perm insertion moves values into fresh projections, so liveness is recomputed
            // for every handled instruction.
            self.liveness.compute(graph, cfg, rc);
            self.handle_instruction(graph, domtree, rc, inst);
        }
    }

    fn handle_instruction(
        &mut self,
        graph: &mut Graph,
        domtree: &DominatorTree,
        rc: RegClass,
        inst: Node,
    ) {
        let block = graph.layout.inst_block(inst).expect("unscheduled instruction");
        debug!("handling constraints of {} in {}", inst, block);

        let live_after = self.live_after(graph, rc, block, inst);
        let original_inputs: Vec<Node> = graph.inputs(inst).to_vec();

        // Values live across the instruction: its class operands plus everything live behind
        // it that is not defined by it.
        let mut live_across: Vec<Node> = Vec::new();
        let defs = class_defs(graph, rc, inst);
        for v in live_after.keys() {
            if live_after.contains(v) && !defs.contains(&v) {
                live_across.push(v);
            }
        }
        for &input in &original_inputs {
            if graph.is_in_class(input, rc)
                && !graph.is_unknown(input)
                && !live_across.contains(&input)
            {
                live_across.push(input);
            }
        }
        live_across.sort();

        // Insert the perm and route every dominated consumer through its projections.
        let mut carriers: Vec<Node> = Vec::new();
        if !live_across.is_empty() {
            let perm = graph.make_node(block, Opcode::Perm, Mode::T, &live_across);
            graph.layout.insert_inst_before(perm, inst);
            let mut anchor = perm;
            for (i, &v) in live_across.iter().enumerate() {
                let proj = graph.make_proj(perm, i as u16, graph.mode(v));
                graph.layout.insert_inst_after(proj, anchor);
                anchor = proj;
                carriers.push(proj);
                self.rewire_dominated_uses(graph, domtree, block, perm, inst, v, proj);
            }
        }

        // Pair the outputs with dying inputs.
        let pairs = self.pair_up(graph, rc, inst, &defs, &live_after, &original_inputs);

        // Left side of the matching: operand partitions, then the live-through projections.
        let reginfo = graph.reginfo();
        let mut left_carriers: Vec<SmallVec<[Node; 2]>> = Vec::new();
        let mut left_masks: Vec<RegUnitMask> = Vec::new();
        let mut required = Vec::new();

        let mut in_partition = EntitySet::<Node>::new();
        for (o, u) in &pairs {
            let mut mask = graph.out_req(*o).admissible(reginfo);
            let mut group: SmallVec<[Node; 2]> = SmallVec::new();
            group.push(*o);
            in_partition.insert(*o);
            if let Some(u) = u {
                let (pos, carrier) = *u;
                mask &= graph.in_req(inst, pos).admissible(reginfo);
                group.push(carrier);
                in_partition.insert(carrier);
            }
            left_carriers.push(group);
            left_masks.push(mask);
            required.push(true);
        }
        for (pos, &orig) in original_inputs.iter().enumerate() {
            let carrier = graph.input(inst, pos);
            if !graph.is_in_class(orig, rc) || in_partition.contains(carrier) {
                continue;
            }
            in_partition.insert(carrier);
            left_carriers.push(SmallVec::from_slice(&[carrier]));
            left_masks.push(graph.in_req(inst, pos).admissible(reginfo));
            required.push(true);
        }
        for &proj in &carriers {
            if in_partition.contains(proj) || !graph.is_in_class(proj, rc) {
                continue;
            }
            // A live-through projection admits any allocatable register.
            left_carriers.push(SmallVec::from_slice(&[proj]));
            left_masks.push(rc.allocatable);
            required.push(false);
        }

        // Solve and materialize the assignment.
        let matching = maximum_matching(&left_masks);
        let mut taken: RegUnitMask = 0;
        for (i, assignment) in matching.iter().enumerate() {
            if let Some(reg) = assignment {
                taken |= 1 << reg;
                for &carrier in &left_carriers[i] {
                    graph.locations[carrier] = ValueLoc::Reg(*reg);
                }
            } else if required[i] {
                panic!(
                    "no perfect matching for the operands of {} in {}",
                    inst, rc
                );
            }
        }
        for (i, assignment) in matching.iter().enumerate() {
            if assignment.is_none() {
                // Unmatched live-through projections take any leftover register.
                let free = rc.allocatable & !taken;
                assert!(free != 0, "no register left for a live-through value at {}", inst);
                let reg = free.trailing_zeros() as crate::isa::RegUnit;
                taken |= 1 << reg;
                for &carrier in &left_carriers[i] {
                    graph.locations[carrier] = ValueLoc::Reg(reg);
                }
            }
        }
    }

    /// The class values live immediately after `inst`, computed by walking the schedule
    /// backwards from the block's end.
    fn live_after(
        &self,
        graph: &Graph,
        rc: RegClass,
        block: Block,
        inst: Node,
    ) -> EntitySet<Node> {
        let mut live = EntitySet::new();
        let live_out = self.liveness.live_out(block);
        for v in live_out.keys() {
            if live_out.contains(v) {
                live.insert(v);
            }
        }

        let insts: Vec<Node> = graph.layout.block_insts(block).collect();
        for &cur in insts.iter().rev() {
            if cur == inst {
                break;
            }
            for def in class_defs(graph, rc, cur) {
                live.remove(def);
            }
            if !graph.is_proj(cur) {
                for &input in graph.inputs(cur) {
                    if graph.is_in_class(input, rc) && !graph.is_unknown(input) {
                        live.insert(input);
                    }
                }
            }
        }
        live
    }

    /// Route every use of `value` reached from the permutation to `proj`: the handled
    /// instruction itself, later instructions of the block, phis over outgoing edges, and
    /// instructions of dominated blocks.
    fn rewire_dominated_uses(
        &self,
        graph: &mut Graph,
        domtree: &DominatorTree,
        block: Block,
        perm: Node,
        inst: Node,
        value: Node,
        proj: Node,
    ) {
        let uses = graph.uses(value).to_vec();
        for u in uses {
            if u.node == perm || graph.is_dead(u.node) {
                continue;
            }
            let rewire = if graph.is_phi(u.node) {
                let phi_block = graph.block_of(u.node);
                let pred = graph.block_preds(phi_block)[u.index];
                domtree.dominates(block, pred)
            } else if let Some(ublock) = graph.layout.inst_block(u.node) {
                if ublock == block {
                    u.node == inst || graph.layout.precedes(inst, u.node)
                } else {
                    domtree.dominates(block, ublock)
                }
            } else {
                // Unscheduled consumers (the keep-alive anchor) follow the new carrier.
                graph.block_of(u.node) == block
            };
            if rewire {
                graph.set_input(u.node, u.index, proj);
            }
        }
    }

    /// Pair each output with an input whose value dies at `inst` and shares admissible
    /// registers. The should-be-same requirement forces its partner; otherwise the input with
    /// the smallest admissible set wins.
    ///
    /// `original_inputs` holds the values the instruction consumed before they were routed
    /// through the perm; interference is a property of the values, the assigned register goes
    /// to the carrier.
    ///
    /// Returns `(output, Option<(input position, input carrier)>)` per output.
    fn pair_up(
        &self,
        graph: &Graph,
        rc: RegClass,
        inst: Node,
        defs: &[Node],
        live_after: &EntitySet<Node>,
        original_inputs: &[Node],
    ) -> Vec<(Node, Option<(usize, Node)>)> {
        let reginfo = graph.reginfo();
        let mut paired_carriers = EntitySet::<Node>::new();
        let mut pairs = Vec::new();

        for &o in defs {
            let out_mask = graph.out_req(o).admissible(reginfo);
            let forced = graph.out_req(o).same_as;
            let mut best: Option<(usize, Node, u32)> = None;

            for (pos, &orig) in original_inputs.iter().enumerate() {
                let carrier = graph.input(inst, pos);
                if !graph.is_in_class(orig, rc) || paired_carriers.contains(carrier) {
                    continue;
                }
                // An input value that lives past the instruction interferes with the output.
                if live_after.contains(orig) {
                    continue;
                }
                let in_mask = graph.in_req(inst, pos).admissible(reginfo);
                if out_mask & in_mask == 0 {
                    continue;
                }
                if forced == Some(pos as u8) {
                    best = Some((pos, carrier, 0));
                    break;
                }
                let size = in_mask.count_ones();
                if best.map_or(true, |(_, _, s)| size < s) {
                    best = Some((pos, carrier, size));
                }
            }

            match best {
                Some((pos, carrier, _)) => {
                    paired_carriers.insert(carrier);
                    debug!("pairing output {} with operand {} of {}", o, pos, inst);
                    pairs.push((o, Some((pos, carrier))));
                }
                None => pairs.push((o, None)),
            }
        }
        pairs
    }
}

/// Does `inst` carry a limited register requirement on any `rc`-class operand?
fn is_constrained(graph: &Graph, rc: RegClass, inst: Node) -> bool {
    let rci = Some(rc.into());
    for i in 0..graph.num_inputs(inst) {
        let req = graph.in_req(inst, i);
        if req.class == rci && req.is_limited() && !req.ignore {
            return true;
        }
    }
    for def in class_defs(graph, rc, inst) {
        if graph.out_req(def).is_limited() && !graph.out_req(def).ignore {
            return true;
        }
    }
    false
}

/// The class values defined by `inst`: the instruction itself, or its projections for a tuple.
fn class_defs(graph: &Graph, rc: RegClass, inst: Node) -> SmallVec<[Node; 2]> {
    let mut defs = SmallVec::new();
    if graph.mode(inst) == Mode::T {
        for &proj in &graph.projs(inst) {
            if graph.is_in_class(proj, rc) {
                defs.push(proj);
            }
        }
    } else if graph.is_in_class(inst, rc) {
        defs.push(inst);
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::RegReq;

    fn analyses(graph: &Graph) -> (ControlFlowGraph, DominatorTree) {
        let cfg = ControlFlowGraph::with_graph(graph);
        let domtree = DominatorTree::with_graph(graph, &cfg);
        (cfg, domtree)
    }

    // An instruction with admissible sets {eax..ebx} and {ecx..edi} for its inputs and
    // {eax, ecx} for its output: the output pairs with the dying input of the smaller set and
    // both end up in one admissible register.
    #[test]
    fn pair_up_picks_smallest_admissible_set() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let gpr = g.reginfo().classes[0];
        let u1 = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let u2 = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let o = g.make_node(b0, Opcode::Sub, Mode::I32, &[u1, u2]);
        let keep = g.make_node(b0, Opcode::Keep, Mode::X, &[o, u2]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[o]);
        for &n in &[u1, u2, o, keep, r] {
            g.layout.append_inst(n, b0);
        }

        // in0 admits {eax, ecx, edx, ebx}; in1 admits {ecx, edx, ebx, esi, edi};
        // out admits {eax, ecx}.
        g.set_in_req(o, 0, RegReq::limited(gpr, 0b0000_1111));
        g.set_in_req(o, 1, RegReq::limited(gpr, 0b1100_1110));
        let mut out = RegReq::limited(gpr, 0b0000_0011);
        out.same_as = None;
        g.set_out_req(o, out);
        // The Return's own %eax pin is not under test.
        g.set_in_req(r, 0, RegReq::in_class(gpr));

        let (cfg, domtree) = analyses(&g);
        Constraints::new().run(&mut g, &cfg, &domtree, gpr);

        // The output and its paired first operand share one admissible register.
        let o_reg = g.locations[o].unwrap_reg();
        let in0 = g.input(o, 0);
        assert!(g.is_proj(in0), "operands must read perm projections");
        assert_eq!(g.locations[in0].unwrap_reg(), o_reg);
        assert!(o_reg == 0 || o_reg == 1, "output pinned to {{eax, ecx}}");

        // The surviving second operand got a distinct register from its own set.
        let in1 = g.input(o, 1);
        assert!(g.is_proj(in1));
        let in1_reg = g.locations[in1].unwrap_reg();
        assert_ne!(in1_reg, o_reg);
        assert!(0b1100_1110 & (1 << in1_reg) != 0);
    }

    // A shift: its count operand is pinned to %ecx by the target table.
    #[test]
    fn shift_count_lands_in_ecx() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let gpr = g.reginfo().classes[0];
        let x = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let n = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let shifted = g.make_node(b0, Opcode::Shl, Mode::I32, &[x, n]);
        let keep = g.make_node(b0, Opcode::Keep, Mode::X, &[shifted]);
        for &nn in &[x, n, shifted, keep] {
            g.layout.append_inst(nn, b0);
        }

        let (cfg, domtree) = analyses(&g);
        Constraints::new().run(&mut g, &cfg, &domtree, gpr);

        let count = g.input(shifted, 1);
        assert!(g.is_proj(count));
        assert_eq!(
            g.locations[count].unwrap_reg(),
            crate::isa::x86::registers::ECX
        );
    }

    // Values live across the pinned instruction travel through the perm and are precolored
    // out of the operands' way.
    #[test]
    fn live_through_values_are_carried_by_the_perm() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let gpr = g.reginfo().classes[0];
        let thru = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let x = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let n = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let shifted = g.make_node(b0, Opcode::Shl, Mode::I32, &[x, n]);
        let merge = g.make_node(b0, Opcode::Add, Mode::I32, &[shifted, thru]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[merge]);
        g.set_in_req(r, 0, RegReq::in_class(gpr));
        for &nn in &[thru, x, n, shifted, merge, r] {
            g.layout.append_inst(nn, b0);
        }

        let (cfg, domtree) = analyses(&g);
        Constraints::new().run(&mut g, &cfg, &domtree, gpr);

        // The perm carries all three values; the consumer behind the shift reads thru's
        // projection, which is precolored.
        let perm = g.input(g.input(shifted, 0), 0);
        assert_eq!(g.opcode(perm), Opcode::Perm);
        assert_eq!(g.num_inputs(perm), 3);
        let thru_carrier = g.input(merge, 1);
        assert!(g.is_proj(thru_carrier));
        assert_eq!(g.input(thru_carrier, 0), perm);
        assert!(g.locations[thru_carrier].is_assigned());

        // All carriers are pairwise distinct registers.
        let mut seen = 0u32;
        for &p in &g.projs(perm) {
            let reg = g.locations[p].unwrap_reg();
            assert_eq!(seen & (1 << reg), 0, "register assigned twice");
            seen |= 1 << reg;
        }
    }
}
