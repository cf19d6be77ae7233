//! The spill environment.
//!
//! The Belady spiller does not mutate the IR while it simulates working sets; it records its
//! decisions here as requests: *reload V before use U*, *reload V on edge (pred -> succ)* and
//! *spill phi P*. `materialize` then performs all the IR surgery in one place: stack slots are
//! allocated per spill equivalence class (phi spills merge classes transitively through the phi
//! arguments), a `Spill` node is placed right after each spilled value's definition, `Reload`
//! nodes are placed before their uses and rewired in, and reloads none of whose uses survived
//! are culled again.
//!
//! A spilled phi gets no `Spill` node of its own. Its value arrives in the slot through the
//! spills of its arguments, which inherit the phi's slot; the memory token the reloads consume
//! is a memory phi over the argument spills.

use crate::ir::{Block, Graph, Mode, Node, Opcode};
use crate::timing;
use gantry_entity::EntitySet;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Collected spill and reload requests for one register class.
pub struct SpillEnv {
    /// Reload `value` immediately before the instruction `before`.
    reloads: Vec<(Node, Node)>,

    /// Reload `value` on the edge into `block` from its `pred_idx`'th predecessor.
    edge_reloads: Vec<(Node, Block, usize)>,

    /// Phis whose value is kept in memory at the block head.
    phi_spills: Vec<Node>,

    seen_reloads: HashSet<(Node, Node)>,
    seen_edge_reloads: HashSet<(Node, Block, usize)>,
    seen_phi_spills: EntitySet<Node>,
}

impl SpillEnv {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self {
            reloads: Vec::new(),
            edge_reloads: Vec::new(),
            phi_spills: Vec::new(),
            seen_reloads: HashSet::new(),
            seen_edge_reloads: HashSet::new(),
            seen_phi_spills: EntitySet::new(),
        }
    }

    /// Drop all requests and dedup state.
    pub fn clear(&mut self) {
        self.reloads.clear();
        self.edge_reloads.clear();
        self.phi_spills.clear();
        self.seen_reloads.clear();
        self.seen_edge_reloads.clear();
        self.seen_phi_spills.clear();
    }

    /// Request that `value` be reloaded immediately before its use `before`.
    ///
    /// Duplicate requests are merged.
    pub fn add_reload(&mut self, value: Node, before: Node) {
        if self.seen_reloads.insert((value, before)) {
            debug!("request: reload {} before {}", value, before);
            self.reloads.push((value, before));
        }
    }

    /// Request that `value` be reloaded on the edge from `block`'s `pred_idx`'th predecessor.
    pub fn add_reload_on_edge(&mut self, value: Node, block: Block, pred_idx: usize) {
        if self.seen_edge_reloads.insert((value, block, pred_idx)) {
            debug!(
                "request: reload {} on edge {} -> {}",
                value, pred_idx, block
            );
            self.edge_reloads.push((value, block, pred_idx));
        }
    }

    /// Request that the phi `phi` be kept in memory at its block head.
    pub fn spill_phi(&mut self, phi: Node) {
        if self.seen_phi_spills.insert(phi) {
            debug!("request: spill phi {}", phi);
            self.phi_spills.push(phi);
        }
    }

    /// Total number of distinct requests collected so far.
    pub fn num_requests(&self) -> usize {
        self.reloads.len() + self.edge_reloads.len() + self.phi_spills.len()
    }

    /// Perform the accumulated requests on the graph.
    ///
    /// Returns the number of reload nodes that survived culling.
    pub fn materialize(&mut self, graph: &mut Graph) -> usize {
        let _tt = timing::spill_materialize();

        // Spill slot equivalence classes: a spilled phi shares its slot with every argument,
        // transitively.
        let mut classes = SlotClasses::new();
        for &phi in &self.phi_spills {
            for i in 0..graph.num_inputs(phi) {
                let arg = graph.input(phi, i);
                if !graph.is_unknown(arg) {
                    classes.union(phi, arg);
                }
            }
        }

        // Every value that needs a memory image: reload sources plus the arguments feeding
        // spilled phis.
        let mut spill_set: Vec<Node> = Vec::new();
        let mut in_spill_set = EntitySet::new();
        {
            let mut add = |v: Node, set: &mut Vec<Node>| {
                if !graph.is_unknown(v) && in_spill_set.insert(v) {
                    set.push(v);
                }
            };
            for &(v, _) in &self.reloads {
                add(v, &mut spill_set);
            }
            for &(v, _, _) in &self.edge_reloads {
                add(v, &mut spill_set);
            }
            for &phi in &self.phi_spills {
                add(phi, &mut spill_set);
                for i in 0..graph.num_inputs(phi) {
                    let arg = graph.input(phi, i);
                    add(arg, &mut spill_set);
                }
            }
        }

        // Insert a spill after each definition and allocate one slot per equivalence class.
        // Spilled phis are skipped here; their memory image is the phi over the argument
        // spills, created below.
        let mut tokens: HashMap<Node, Node> = HashMap::new();
        let mut slots: HashMap<Node, crate::ir::StackSlot> = HashMap::new();
        for &value in &spill_set {
            if self.seen_phi_spills.contains(value) {
                continue;
            }
            let root = classes.find(value);
            let slot = *slots
                .entry(root)
                .or_insert_with(|| graph.stack_slots.make_spill_slot(graph.mode(value)));
            let block = graph.block_of(value);
            let spill = graph.make_node(block, Opcode::Spill, Mode::M, &[value]);
            graph.set_frame_entity(spill, slot);
            if graph.is_phi(value) {
                graph.layout.prepend_inst(spill, block);
            } else if graph.layout.is_scheduled(value) {
                graph.layout.insert_inst_after(spill, value);
            } else {
                graph.layout.append_inst(spill, block);
            }
            tokens.insert(value, spill);
            debug!("spill {} after {} into {}", spill, value, slot);
        }

        // Memory phis for spilled phis, patched in a second pass because loop phis may feed
        // each other.
        let mut placeholders: Vec<Node> = Vec::new();
        for &phi in &self.phi_spills {
            let block = graph.block_of(phi);
            let placeholder = graph.make_node(block, Opcode::Unknown, Mode::M, &[]);
            let args: Vec<Node> = (0..graph.num_inputs(phi)).map(|_| placeholder).collect();
            let phim = graph.make_phi(block, Mode::M, &args);
            placeholders.push(placeholder);
            tokens.insert(phi, phim);
        }
        for &phi in &self.phi_spills {
            let phim = tokens[&phi];
            for i in 0..graph.num_inputs(phi) {
                let arg = graph.input(phi, i);
                if let Some(&token) = tokens.get(&arg) {
                    graph.set_input(phim, i, token);
                }
            }
        }

        // Reloads before in-block uses.
        let mut created: Vec<Node> = Vec::new();
        for &(value, before) in &self.reloads {
            debug_assert!(!graph.is_phi(before), "reload before a phi");
            if graph.is_dead(before) || !graph.layout.is_scheduled(before) {
                continue;
            }
            let block = graph.layout.inst_block(before).unwrap();
            let reload = self.make_reload(graph, value, block, &tokens, &slots, &mut classes);
            graph.layout.insert_inst_before(reload, before);
            for i in 0..graph.num_inputs(before) {
                if graph.input(before, i) == value {
                    graph.set_input(before, i, reload);
                }
            }
            created.push(reload);
        }

        // Reloads on block borders. A value feeding a phi over the edge is reloaded at the end
        // of the predecessor; anything else is reloaded at the head of the successor, where it
        // dominates all local uses.
        let mut head_reloads: HashMap<(Node, Block), Node> = HashMap::new();
        for &(value, block, pred_idx) in &self.edge_reloads {
            let pred = graph.block_preds(block)[pred_idx];
            let mut phi_use = None;
            for &phi in graph.phis(block) {
                if !graph.is_dead(phi) && graph.input(phi, pred_idx) == value {
                    phi_use = Some(phi);
                    break;
                }
            }
            if let Some(phi) = phi_use {
                let reload = self.make_reload(graph, value, pred, &tokens, &slots, &mut classes);
                match graph.layout.last_inst(pred) {
                    Some(last) if graph.opcode(last).is_terminator() => {
                        graph.layout.insert_inst_before(reload, last)
                    }
                    _ => graph.layout.append_inst(reload, pred),
                }
                graph.set_input(phi, pred_idx, reload);
                created.push(reload);
            } else {
                let reload = match head_reloads.get(&(value, block)) {
                    Some(&r) => r,
                    None => {
                        let r =
                            self.make_reload(graph, value, block, &tokens, &slots, &mut classes);
                        graph.layout.prepend_inst(r, block);
                        head_reloads.insert((value, block), r);
                        created.push(r);
                        r
                    }
                };
                let uses: Vec<crate::ir::NodeUse> = graph.uses(value).to_vec();
                for u in uses {
                    if u.node != reload
                        && !graph.is_phi(u.node)
                        && !graph.is_dead(u.node)
                        && graph.layout.inst_block(u.node) == Some(block)
                    {
                        graph.set_input(u.node, u.index, reload);
                    }
                }
            }
        }

        // Cull reloads whose uses did not survive, then values (spilled phis in particular)
        // that lost their last consumer.
        let mut live_reloads = 0;
        for &reload in &created {
            if graph.has_uses(reload) {
                live_reloads += 1;
            } else {
                debug!("culling dead {}", reload);
                graph.remove_node(reload);
            }
        }
        for placeholder in placeholders {
            if !graph.has_uses(placeholder) {
                graph.remove_node(placeholder);
            }
        }
        self.cull_dead_values(graph);

        self.reloads.clear();
        self.edge_reloads.clear();
        self.phi_spills.clear();
        live_reloads
    }

    fn make_reload(
        &self,
        graph: &mut Graph,
        value: Node,
        block: Block,
        tokens: &HashMap<Node, Node>,
        slots: &HashMap<Node, crate::ir::StackSlot>,
        classes: &mut SlotClasses,
    ) -> Node {
        let token = tokens[&value];
        let reload = graph.make_node(block, Opcode::Reload, graph.mode(value), &[token]);
        let root = classes.find(value);
        let slot = match slots.get(&root) {
            Some(&s) => s,
            // Every slot of the class belongs to a spilled phi; reuse the token's slot.
            None => graph
                .frame_entity(token)
                .expect("spill without a frame entity"),
        };
        graph.set_frame_entity(reload, slot);
        graph.set_rematerializable(reload);
        graph.set_do_not_spill(reload);
        reload
    }

    /// Remove data values that no longer have any consumer, cascading. This is where a fully
    /// spilled phi disappears from the register world.
    fn cull_dead_values(&self, graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            for node in graph.nodes().collect::<Vec<Node>>() {
                if graph.is_dead(node) || graph.has_uses(node) {
                    continue;
                }
                let opcode = graph.opcode(node);
                if opcode.has_side_effect() || opcode.is_terminator() {
                    continue;
                }
                if !(graph.mode(node).is_data() || graph.is_phi(node)) {
                    continue;
                }
                debug!("dead code: removing {}", node);
                graph.remove_node(node);
                changed = true;
            }
        }
    }
}

/// Union-find over nodes, for merging spill slot equivalence classes.
struct SlotClasses {
    parent: HashMap<Node, Node>,
}

impl SlotClasses {
    fn new() -> Self {
        Self {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, node: Node) -> Node {
        let p = match self.parent.get(&node) {
            None => return node,
            Some(&p) => p,
        };
        if p == node {
            return node;
        }
        let root = self.find(p);
        self.parent.insert(node, root);
        root
    }

    fn union(&mut self, a: Node, b: Node) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }
}
