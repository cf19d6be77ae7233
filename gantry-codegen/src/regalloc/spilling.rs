//! The Belady spiller.
//!
//! Per register class, every block is walked in schedule order while simulating the register
//! file as a *working set* of at most `k` values. When an instruction demands values that are
//! not in the working set, the resident values whose next use is farthest away are evicted;
//! Belady's MIN policy, optimal for a single register offline and the strongest practical local
//! heuristic for `k`. Every displaced use becomes a reload request in the spill environment;
//! displaced phis of the current block become phi spills.
//!
//! Block starts are seeded from liveness: the values live at entry plus the block's phis,
//! ranked by next-use distance, best `k` kept. A block with a single already-processed
//! predecessor clones that predecessor's end working set instead, which is why the walk
//! descends lazily into unprocessed single predecessors (with cycle detection and a depth
//! guard; a self-loop in single-predecessor position is a malformed CFG).
//!
//! The per-block locality leaves the borders inconsistent; `fix_block_borders` runs afterwards
//! and requests a reload on every edge whose predecessor does not deliver a start-set value in
//! a register.

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph, Mode, Node};
use crate::isa::RegClass;
use crate::regalloc::liveness::{Liveness, NextUses};
use crate::regalloc::spill_env::SpillEnv;
use crate::timing;
use gantry_entity::{EntitySet, SecondaryMap};
use log::debug;
use smallvec::SmallVec;

/// Per-block spiller state, kept for the whole pipeline over one register class.
#[derive(Clone, Default)]
struct BlockSpillInfo {
    processed: bool,
    in_progress: bool,
    ws_start: Vec<Node>,
    ws_end: Vec<Node>,
}

/// Persistent memory of the spilling pass.
pub struct Spilling {
    block_info: SecondaryMap<Block, BlockSpillInfo>,
}

impl Spilling {
    /// Create a new spilling pass.
    pub fn new() -> Self {
        Self {
            block_info: SecondaryMap::new(),
        }
    }

    /// Clear all data structures in this pass.
    pub fn clear(&mut self) {
        self.block_info.clear();
    }

    /// Run the spiller for `rc`-class values with the class's full register budget.
    pub fn run(
        &mut self,
        graph: &Graph,
        cfg: &ControlFlowGraph,
        liveness: &Liveness,
        rc: RegClass,
        env: &mut SpillEnv,
    ) {
        self.run_with_budget(graph, cfg, liveness, rc, rc.budget(), env);
    }

    /// Run the spiller with an explicit register budget.
    ///
    /// The budget defaults to the class's allocatable register count; a caller may force a
    /// smaller one to keep registers in reserve.
    pub fn run_with_budget(
        &mut self,
        graph: &Graph,
        cfg: &ControlFlowGraph,
        liveness: &Liveness,
        rc: RegClass,
        k: usize,
        env: &mut SpillEnv,
    ) {
        let _tt = timing::spilling();
        debug_assert!(k > 0, "register budget must be positive");
        self.clear();

        let mut ctx = Ctx {
            graph,
            cfg,
            liveness,
            rc,
            k,
            next_uses: NextUses::new(graph, cfg, liveness),
            env,
            info: &mut self.block_info,
        };
        for block in graph.blocks() {
            ctx.process_block(block, 0);
        }
        ctx.fix_block_borders();
    }

    /// The start working set computed for `block`, for verification.
    pub fn start_set(&self, block: Block) -> &[Node] {
        &self.block_info[block].ws_start
    }

    /// The end working set computed for `block`.
    pub fn end_set(&self, block: Block) -> &[Node] {
        &self.block_info[block].ws_end
    }
}

struct Ctx<'a> {
    graph: &'a Graph,
    cfg: &'a ControlFlowGraph,
    liveness: &'a Liveness,
    rc: RegClass,
    k: usize,
    next_uses: NextUses<'a>,
    env: &'a mut SpillEnv,
    info: &'a mut SecondaryMap<Block, BlockSpillInfo>,
}

impl<'a> Ctx<'a> {
    fn process_block(&mut self, block: Block, depth: usize) {
        if self.info[block].processed || self.info[block].in_progress {
            return;
        }
        self.info[block].in_progress = true;

        // Single-predecessor chains are processed predecessor-first so the start working set
        // can be cloned from the predecessor's end. The descent is bounded and a self-loop in
        // this position is malformed.
        let preds = self.cfg.preds(block);
        if preds.len() == 1 {
            let pred = preds[0];
            assert!(
                pred != block,
                "{} is its own single predecessor",
                block
            );
            if !self.info[pred].processed && depth <= self.graph.num_blocks() {
                self.process_block(pred, depth + 1);
            }
        }

        let mut ws = self.compute_start_set(block);
        self.info[block].ws_start = ws.clone();
        debug!("{} starts with {} values in registers", block, ws.len());

        let mut used = EntitySet::new();
        for inst in self.graph.layout.block_insts(block) {
            if self.graph.is_proj(inst) {
                continue;
            }

            // Displace by the instruction's uses; missing ones are reloaded before it.
            let mut new_vals: SmallVec<[Node; 4]> = SmallVec::new();
            for &input in self.graph.inputs(inst) {
                if self.graph.is_in_class(input, self.rc)
                    && !self.graph.is_unknown(input)
                    && !new_vals.contains(&input)
                {
                    new_vals.push(input);
                }
            }
            for &v in &new_vals {
                used.insert(v);
            }
            self.displace(block, inst, &mut ws, &mut used, &new_vals, true);

            // Displace by the instruction's definitions: the instruction itself, or its
            // projections for a tuple.
            let mut defs: SmallVec<[Node; 4]> = SmallVec::new();
            if self.graph.mode(inst) == Mode::T {
                for &proj in &self.graph.projs(inst) {
                    if self.graph.is_in_class(proj, self.rc) {
                        defs.push(proj);
                    }
                }
            } else if self.graph.is_in_class(inst, self.rc) {
                defs.push(inst);
            }
            self.displace(block, inst, &mut ws, &mut used, &defs, false);
        }

        self.info[block].ws_end = ws;
        self.info[block].in_progress = false;
        self.info[block].processed = true;
    }

    /// Build the start working set of `block`.
    fn compute_start_set(&mut self, block: Block) -> Vec<Node> {
        let preds = self.cfg.preds(block);
        if preds.len() == 1 && self.info[preds[0]].processed {
            return self.info[preds[0]].ws_end.clone();
        }

        // Rank everything live at entry, phis included, by its distance from the block head.
        let mut candidates: Vec<(u32, Node)> = Vec::new();
        for v in self.live_in_values(block) {
            let dist = self.next_uses.next_use_from_start(block, v);
            if dist != crate::regalloc::liveness::DIST_INFINITY {
                candidates.push((dist, v));
            }
        }
        candidates.sort();

        let mut ws = Vec::new();
        for (i, &(_, v)) in candidates.iter().enumerate() {
            if i < self.k {
                ws.push(v);
            } else if self.graph.is_phi(v) && self.graph.block_of(v) == block {
                // More values than registers at the head: the worst-ranked phis start life in
                // memory.
                self.env.spill_phi(v);
            }
        }
        ws
    }

    /// The class-relevant values live at `block`'s entry, including its phis.
    fn live_in_values(&self, block: Block) -> Vec<Node> {
        let live_in = self.liveness.live_in(block);
        let mut values: Vec<Node> = live_in
            .keys()
            .filter(|&v| live_in.contains(v) && self.graph.is_in_class(v, self.rc))
            .collect();
        for &phi in self.graph.phis(block) {
            if self.graph.is_in_class(phi, self.rc) {
                values.push(phi);
            }
        }
        values
    }

    /// The Belady displacement: make room for `new_vals` in `ws`.
    fn displace(
        &mut self,
        block: Block,
        inst: Node,
        ws: &mut Vec<Node>,
        used: &EntitySet<Node>,
        new_vals: &[Node],
        is_usage: bool,
    ) {
        let mut to_insert: SmallVec<[Node; 4]> = SmallVec::new();
        for &v in new_vals {
            if ws.contains(&v) {
                continue;
            }
            to_insert.push(v);
            if is_usage {
                self.env.add_reload(v, inst);
            }
        }
        let demand = to_insert.len();
        assert!(
            demand <= self.k,
            "{} demands {} registers of {}, budget is {}",
            inst,
            demand,
            self.rc,
            self.k
        );

        if ws.len() + demand > self.k {
            // Rank the residents by next use; on the def step the uses consumed by `inst`
            // itself no longer count.
            let mut scored: Vec<(u32, Node)> = ws
                .iter()
                .map(|&v| {
                    (
                        self.next_uses.next_use(block, Some(inst), v, !is_usage),
                        v,
                    )
                })
                .collect();
            scored.sort();

            let keep = self.k - demand;
            for &(dist, v) in &scored[keep..] {
                debug!(
                    "evicting {} (next use {}) at {}",
                    v,
                    if dist == crate::regalloc::liveness::DIST_INFINITY {
                        "never".to_string()
                    } else {
                        dist.to_string()
                    },
                    inst
                );
                ws.retain(|&w| w != v);
                // A value evicted before its first use in this block was never really needed
                // live-in.
                if !used.contains(v) {
                    self.info[block].ws_start.retain(|&w| w != v);
                }
                if self.graph.is_phi(v) && self.graph.block_of(v) == block {
                    self.env.spill_phi(v);
                }
            }
        }

        ws.extend(to_insert);
        debug_assert!(ws.len() <= self.k, "working set overflowed at {}", inst);
    }

    /// Request reloads on every edge whose predecessor ends without a value the successor
    /// starts with. Phi values are replaced by the argument flowing in over the edge.
    fn fix_block_borders(&mut self) {
        for block in self.graph.blocks() {
            let ws_start = self.info[block].ws_start.clone();
            let preds: Vec<Block> = self.cfg.preds(block).to_vec();
            for (p, &pred) in preds.iter().enumerate() {
                for &v in &ws_start {
                    let vv = if self.graph.is_phi(v) && self.graph.block_of(v) == block {
                        self.graph.input(v, p)
                    } else {
                        v
                    };
                    if self.graph.is_unknown(vv) {
                        continue;
                    }
                    if !self.info[pred].ws_end.contains(&vv) {
                        self.env.add_reload_on_edge(vv, block, p);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;

    fn analyze(graph: &Graph) -> (ControlFlowGraph, Liveness) {
        let cfg = ControlFlowGraph::with_graph(graph);
        let mut liveness = Liveness::new();
        liveness.compute(graph, &cfg, graph.reginfo().classes[0]);
        (cfg, liveness)
    }

    fn count_opcode(graph: &Graph, opcode: Opcode) -> usize {
        graph
            .nodes()
            .filter(|&n| !graph.is_dead(n) && graph.opcode(n) == opcode)
            .count()
    }

    // Three values into two registers:  a; b; c; use(a); use(b); use(c).  At the definition of
    // `c` the working set is {a, b} and `b` has the farther next use, so `b` is spilled after
    // its definition and reloaded before its use. Nothing else moves.
    #[test]
    fn belady_spills_farthest_next_use() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let ua = g.make_node(b0, Opcode::Copy, Mode::I32, &[a]);
        let ub = g.make_node(b0, Opcode::Copy, Mode::I32, &[b]);
        let uc = g.make_node(b0, Opcode::Copy, Mode::I32, &[c]);
        for &n in &[a, b, c, ua, ub, uc] {
            g.layout.append_inst(n, b0);
        }

        let (cfg, liveness) = analyze(&g);
        let gpr = g.reginfo().classes[0];
        let mut spilling = Spilling::new();
        let mut env = SpillEnv::new();
        spilling.run_with_budget(&g, &cfg, &liveness, gpr, 2, &mut env);
        assert_eq!(env.num_requests(), 1);

        env.materialize(&mut g);
        assert_eq!(count_opcode(&g, Opcode::Spill), 1);
        assert_eq!(count_opcode(&g, Opcode::Reload), 1);

        // The spill follows b's definition, the reload precedes b's use.
        let spill = g.layout.next_inst(b).unwrap();
        assert_eq!(g.opcode(spill), Opcode::Spill);
        assert_eq!(g.inputs(spill), &[b]);
        let reload = g.layout.prev_inst(ub).unwrap();
        assert_eq!(g.opcode(reload), Opcode::Reload);
        assert_eq!(g.input(ub, 0), reload);
        // The other uses are untouched.
        assert_eq!(g.input(ua, 0), a);
        assert_eq!(g.input(uc, 0), c);
    }

    // Three phis, two registers, next uses at distances 5, 3 and 7: the start set keeps the
    // two best and the worst phi is spilled, its arguments inheriting its slot.
    #[test]
    fn phi_spill_on_overfull_block_head() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let b1 = g.make_block();
        let b2 = g.make_block();
        g.add_block_pred(b2, b0);
        g.add_block_pred(b2, b1);

        let mut args0 = Vec::new();
        let mut args1 = Vec::new();
        for _ in 0..3 {
            args0.push(g.make_node(b0, Opcode::Const, Mode::I32, &[]));
            args1.push(g.make_node(b1, Opcode::Const, Mode::I32, &[]));
        }
        let j0 = g.make_node(b0, Opcode::Jump, Mode::X, &[]);
        let j1 = g.make_node(b1, Opcode::Jump, Mode::X, &[]);
        let phi1 = g.make_phi(b2, Mode::I32, &[args0[0], args1[0]]);
        let phi2 = g.make_phi(b2, Mode::I32, &[args0[1], args1[1]]);
        let phi3 = g.make_phi(b2, Mode::I32, &[args0[2], args1[2]]);

        // Uses at distances 5 (phi1), 3 (phi2) and 7 (phi3) from the head of b2. The fillers
        // are barriers: they advance the cursor without defining register values.
        let mut insts = Vec::new();
        for _ in 0..3 {
            insts.push(g.make_node(b2, Opcode::Barrier, Mode::X, &[]));
        }
        insts.push(g.make_node(b2, Opcode::Copy, Mode::I32, &[phi2]));
        insts.push(g.make_node(b2, Opcode::Barrier, Mode::X, &[]));
        insts.push(g.make_node(b2, Opcode::Copy, Mode::I32, &[phi1]));
        insts.push(g.make_node(b2, Opcode::Barrier, Mode::X, &[]));
        let u3 = g.make_node(b2, Opcode::Copy, Mode::I32, &[phi3]);
        insts.push(u3);

        for &n in &args0 {
            g.layout.append_inst(n, b0);
        }
        g.layout.append_inst(j0, b0);
        for &n in &args1 {
            g.layout.append_inst(n, b1);
        }
        g.layout.append_inst(j1, b1);
        for &n in &insts {
            g.layout.append_inst(n, b2);
        }

        let (cfg, liveness) = analyze(&g);
        let gpr = g.reginfo().classes[0];
        let mut spilling = Spilling::new();
        let mut env = SpillEnv::new();
        spilling.run_with_budget(&g, &cfg, &liveness, gpr, 2, &mut env);

        // The start set holds phi2 (distance 3) and phi1 (distance 5).
        let start = spilling.start_set(b2);
        assert!(start.contains(&phi2));
        assert!(start.contains(&phi1));
        assert!(!start.contains(&phi3));

        env.materialize(&mut g);

        // phi3's arguments are spilled in their predecessors, sharing one slot.
        let spill0 = g
            .uses(args0[2])
            .iter()
            .find(|u| g.opcode(u.node) == Opcode::Spill)
            .expect("first argument of the spilled phi must be stored")
            .node;
        let spill1 = g
            .uses(args1[2])
            .iter()
            .find(|u| g.opcode(u.node) == Opcode::Spill)
            .expect("second argument of the spilled phi must be stored")
            .node;
        assert_eq!(g.frame_entity(spill0), g.frame_entity(spill1));

        // phi3's use now reads a reload with the same slot.
        let reload = g.input(u3, 0);
        assert_eq!(g.opcode(reload), Opcode::Reload);
        assert_eq!(g.frame_entity(reload), g.frame_entity(spill0));
    }

    // Border reconciliation: b ends up in the working set on one incoming path only, so the
    // other edge gets a reload request.
    #[test]
    fn border_reload_on_mismatched_edge() {
        let mut g = Graph::new();
        let p0 = g.make_block();
        let p1 = g.make_block();
        let p2 = g.make_block();
        let join = g.make_block();
        g.add_block_pred(p1, p0);
        g.add_block_pred(p2, p0);
        g.add_block_pred(join, p1);
        g.add_block_pred(join, p2);

        let a = g.make_node(p0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(p0, Opcode::Const, Mode::I32, &[]);
        let br = g.make_node(p0, Opcode::Branch, Mode::X, &[a]);
        let j1 = g.make_node(p1, Opcode::Jump, Mode::X, &[]);
        // Local pressure in p2 pushes b out of the working set.
        let t = g.make_node(p2, Opcode::Const, Mode::I32, &[]);
        let s = g.make_node(p2, Opcode::Add, Mode::I32, &[t, a]);
        let j2 = g.make_node(p2, Opcode::Jump, Mode::X, &[]);
        let ua = g.make_node(join, Opcode::Add, Mode::I32, &[a, b]);
        let keep = g.make_node(join, Opcode::Keep, Mode::X, &[s]);
        let r = g.make_node(join, Opcode::Return, Mode::X, &[ua]);

        for &(n, blk) in &[
            (a, p0),
            (b, p0),
            (br, p0),
            (j1, p1),
            (t, p2),
            (s, p2),
            (j2, p2),
            (ua, join),
            (keep, join),
            (r, join),
        ] {
            g.layout.append_inst(n, blk);
        }

        let (cfg, liveness) = analyze(&g);
        let gpr = g.reginfo().classes[0];
        let mut spilling = Spilling::new();
        let mut env = SpillEnv::new();
        spilling.run_with_budget(&g, &cfg, &liveness, gpr, 2, &mut env);

        assert!(spilling.end_set(p1).contains(&b));
        assert!(!spilling.end_set(p2).contains(&b));
        assert!(spilling.start_set(join).contains(&b));

        let before = env.num_requests();
        assert!(before > 0);

        // Re-running the pass discovers nothing new: the requests are stable.
        spilling.run_with_budget(&g, &cfg, &liveness, gpr, 2, &mut env);
        assert_eq!(env.num_requests(), before);

        env.materialize(&mut g);
        // The reload landed at the head of the join block and feeds the use of b.
        let head = g.layout.first_inst(join).unwrap();
        assert_eq!(g.opcode(head), Opcode::Reload);
        assert_eq!(g.input(ua, 1), head);
    }

    // A do-not-spill value competes with two others in a two-register block; it is never the
    // eviction victim.
    #[test]
    fn do_not_spill_values_are_never_evicted() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let pinned = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let x = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let y = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let ux = g.make_node(b0, Opcode::Copy, Mode::I32, &[x]);
        let upin = g.make_node(b0, Opcode::Copy, Mode::I32, &[pinned]);
        let uy = g.make_node(b0, Opcode::Copy, Mode::I32, &[y]);
        g.set_do_not_spill(pinned);
        for &n in &[pinned, x, y, ux, upin, uy] {
            g.layout.append_inst(n, b0);
        }

        let (cfg, liveness) = analyze(&g);
        let gpr = g.reginfo().classes[0];
        let mut spilling = Spilling::new();
        let mut env = SpillEnv::new();
        spilling.run_with_budget(&g, &cfg, &liveness, gpr, 2, &mut env);

        // At y's definition the set was {pinned, x}; x must have been the victim even though
        // the pinned value's real next use is farther away. The pinned value rides the
        // working set all the way to the block end.
        assert!(spilling.end_set(b0).contains(&pinned));
        assert!(env.num_requests() >= 1);
    }
}
