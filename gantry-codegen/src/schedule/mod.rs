//! The list scheduler.
//!
//! Walks every block and lays its nodes out into a total order respecting data, memory and
//! dependency edges. Nodes become *ready* once all their in-block operands are scheduled; a
//! pluggable selector picks among the ready nodes, except that keep-class nodes are always
//! scheduled the moment they become ready and the block terminator is held back until the end.
//!
//! Phi nodes are never scheduled; they logically occupy position zero of their block.
//! Projections are appended immediately after their tuple node. Nodes whose only consumer is
//! the graph anchor are skipped entirely.
//!
//! If the ready set runs dry before the block is complete, the block's data dependencies contain
//! a cycle; this is a fatal invariant break.

pub mod selector;

pub use self::selector::{PressureSelector, RandomSelector, Selector, TrivialSelector};

use crate::ir::{Block, Graph, Mode, Node, Opcode};
use crate::timing;
use gantry_entity::{EntitySet, SecondaryMap};
use log::debug;

/// Schedule every block of `graph` with the given selector.
///
/// Any existing schedule is discarded first, so rescheduling with the same selector reproduces
/// the same order.
pub fn schedule_graph<S: Selector>(graph: &mut Graph, selector: &mut S) {
    let _tt = timing::schedule();
    selector.init_graph(graph);
    for block in graph.blocks() {
        Scheduler::new(graph, block).run(selector);
    }
    selector.finish_graph();
}

struct Scheduler<'a> {
    graph: &'a mut Graph,
    block: Block,

    /// Nodes of this block still waiting to be scheduled.
    remaining: usize,

    /// The block terminator, scheduled last.
    terminator: Option<Node>,

    /// The ready set, in the order nodes became ready.
    ready: Vec<Node>,
    in_ready: EntitySet<Node>,
    scheduled: EntitySet<Node>,

    /// Values in use beyond the cursor.
    live: EntitySet<Node>,

    /// Per value: use edges not yet consumed by a scheduled node.
    num_not_sched_user: SecondaryMap<Node, u32>,
}

impl<'a> Scheduler<'a> {
    fn new(graph: &'a mut Graph, block: Block) -> Self {
        graph.layout.clear_block(block);
        Self {
            graph,
            block,
            remaining: 0,
            terminator: None,
            ready: Vec::new(),
            in_ready: EntitySet::new(),
            scheduled: EntitySet::new(),
            live: EntitySet::new(),
            num_not_sched_user: SecondaryMap::new(),
        }
    }

    fn run<S: Selector>(mut self, selector: &mut S) {
        selector.init_block(self.graph, self.block);

        // Gather the block's schedulable nodes and their initial readiness.
        let candidates: Vec<Node> = self
            .graph
            .nodes()
            .filter(|&n| self.is_candidate(n))
            .collect();
        self.remaining = candidates.len();

        for &node in &candidates {
            self.num_not_sched_user[node] = self.count_users(node);
            if self.graph.opcode(node).is_terminator() {
                debug_assert!(
                    self.terminator.is_none(),
                    "two terminators in {}",
                    self.block
                );
                self.terminator = Some(node);
            }
        }
        for &node in &candidates {
            if self.operands_available(node) {
                self.make_ready(node, None, selector);
            }
        }

        while self.remaining > 0 {
            let node = self.pick(selector);
            self.append(node, selector);
        }

        selector.finish_block(self.graph, self.block);
        debug!(
            "scheduled {} ({} instructions)",
            self.block,
            self.graph.layout.block_insts(self.block).count()
        );
    }

    /// Is `node` scheduled by this walk? Phis sit at position zero, projections ride with
    /// their tuple, the anchor and values only the anchor consumes are skipped.
    fn is_candidate(&self, node: Node) -> bool {
        if self.graph.is_dead(node) || self.graph.block_of(node) != self.block {
            return false;
        }
        let opcode = self.graph.opcode(node);
        if opcode == Opcode::Phi || opcode == Opcode::Proj || opcode == Opcode::End {
            return false;
        }
        if self.graph.only_anchor_uses(node) && !opcode.has_side_effect() {
            return false;
        }
        true
    }

    /// Number of unscheduled use edges of the value `node`. A tuple is counted by summing the
    /// users of its data-typed projections.
    fn count_users(&self, node: Node) -> u32 {
        if self.graph.mode(node) == Mode::T {
            self.graph
                .projs(node)
                .iter()
                .filter(|&&p| self.graph.mode(p).is_data())
                .map(|&p| self.graph.uses(p).len() as u32)
                .sum()
        } else {
            self.graph.uses(node).len() as u32
        }
    }

    /// Is the operand `input` of a node of this block already available at the cursor?
    fn operand_available(&self, input: Node) -> bool {
        if self.graph.is_dead(input) || self.graph.block_of(input) != self.block {
            return true;
        }
        if self.graph.is_phi(input) {
            return true;
        }
        if self.graph.is_proj(input) {
            return self.scheduled.contains(self.graph.input(input, 0));
        }
        self.scheduled.contains(input)
    }

    fn operands_available(&self, node: Node) -> bool {
        self.graph
            .inputs(node)
            .iter()
            .chain(self.graph.deps(node))
            .all(|&i| self.operand_available(i))
    }

    fn make_ready<S: Selector>(&mut self, node: Node, prev: Option<Node>, selector: &mut S) {
        if self.in_ready.contains(node) || self.scheduled.contains(node) {
            return;
        }
        self.in_ready.insert(node);
        self.ready.push(node);
        selector.node_ready(self.graph, node, prev);
    }

    /// Pick the next node: a keep-class node if one is ready, otherwise whatever the selector
    /// chooses among the ready nodes. The terminator is withheld until it is the only node
    /// left.
    fn pick<S: Selector>(&mut self, selector: &mut S) -> Node {
        if let Some(&keep) = self
            .ready
            .iter()
            .find(|&&n| self.graph.opcode(n).is_keep_class())
        {
            return self.take_ready(keep);
        }

        let view: Vec<Node> = self
            .ready
            .iter()
            .cloned()
            .filter(|&n| self.remaining == 1 || Some(n) != self.terminator)
            .collect();
        if view.is_empty() {
            panic!(
                "ready set starved in {}: data dependencies contain a cycle",
                self.block
            );
        }
        let node = if view.len() == 1 {
            view[0]
        } else {
            selector.select(self.graph, &view, &self.live)
        };
        debug_assert!(view.contains(&node), "selector returned a non-ready node");
        self.take_ready(node)
    }

    fn take_ready(&mut self, node: Node) -> Node {
        let pos = self
            .ready
            .iter()
            .position(|&n| n == node)
            .expect("node not in ready set");
        self.ready.remove(pos);
        self.in_ready.remove(node);
        node
    }

    /// Append `node` to the schedule, maintain the live set, and try to make its consumers
    /// ready.
    fn append<S: Selector>(&mut self, node: Node, selector: &mut S) {
        self.graph.layout.append_inst(node, self.block);
        self.scheduled.insert(node);
        self.remaining -= 1;
        selector.node_selected(self.graph, node);

        // Consume the operands.
        let inputs: Vec<Node> = self.graph.inputs(node).to_vec();
        for input in inputs {
            if !self.graph.mode(input).is_data() {
                continue;
            }
            let n = &mut self.num_not_sched_user[input];
            if *n > 0 {
                *n -= 1;
                if *n == 0 {
                    self.live.remove(input);
                }
            }
        }

        // Define the results. Projections of a tuple follow it immediately.
        if self.graph.mode(node) == Mode::T {
            let projs = self.graph.projs(node);
            for &proj in &projs {
                self.graph.layout.append_inst(proj, self.block);
                self.scheduled.insert(proj);
                if self.graph.mode(proj).is_data() && self.graph.has_uses(proj) {
                    self.num_not_sched_user[proj] = self.graph.uses(proj).len() as u32;
                    self.live.insert(proj);
                }
            }
        } else if self.graph.mode(node).is_data() && self.graph.has_uses(node) {
            self.num_not_sched_user[node] = self.graph.uses(node).len() as u32;
            self.live.insert(node);
        }

        // Attempt to make the consumers ready.
        let mut succs: Vec<Node> = self
            .graph
            .uses(node)
            .iter()
            .map(|u| u.node)
            .chain(self.graph.dep_uses(node).iter().cloned())
            .collect();
        if self.graph.mode(node) == Mode::T {
            for &proj in &self.graph.projs(node) {
                succs.extend(self.graph.uses(proj).iter().map(|u| u.node));
            }
        }
        for succ in succs {
            if !self.is_candidate(succ) || self.scheduled.contains(succ) {
                continue;
            }
            if self.operands_available(succ) {
                self.make_ready(succ, Some(node), selector);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mode, Opcode};

    fn schedule_order(graph: &mut Graph, block: Block) -> Vec<Node> {
        let mut sel = TrivialSelector;
        schedule_graph(graph, &mut sel);
        graph.layout.block_insts(block).collect()
    }

    #[test]
    fn operands_precede_consumers() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[c]);

        let order = schedule_order(&mut g, b0);
        assert_eq!(order.len(), 4);
        let pos = |n: Node| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(c));
        assert!(pos(c) < pos(r));
        assert_eq!(*order.last().unwrap(), r);
    }

    // Six independent nodes and one tuple-producing multiply; the projections must follow the
    // multiply immediately and the terminator comes last.
    #[test]
    fn tuple_projections_follow_their_node() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let mut consts = Vec::new();
        for _ in 0..6 {
            consts.push(g.make_node(b0, Opcode::Const, Mode::I32, &[]));
        }
        let mul = g.make_node(b0, Opcode::Mul, Mode::T, &[consts[0], consts[1]]);
        let lo = g.make_proj(mul, 0, Mode::I32);
        let hi = g.make_proj(mul, 1, Mode::I32);
        let keep = g.make_node(b0, Opcode::Keep, Mode::X, &[lo, hi]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[consts[5]]);
        let _ = keep;

        let order = schedule_order(&mut g, b0);
        let pos = |n: Node| order.iter().position(|&x| x == n).unwrap();
        assert_eq!(pos(lo), pos(mul) + 1);
        assert_eq!(pos(hi), pos(mul) + 2);
        for &c in &consts {
            assert!(order.contains(&c));
        }
        assert_eq!(*order.last().unwrap(), r);
    }

    #[test]
    fn keep_nodes_are_scheduled_as_soon_as_ready() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let keep = g.make_node(b0, Opcode::Keep, Mode::X, &[a]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[c]);
        let _ = r;

        let order = schedule_order(&mut g, b0);
        let pos = |n: Node| order.iter().position(|&x| x == n).unwrap();
        // The keep runs right after its operand is defined, before unrelated work.
        assert_eq!(pos(keep), pos(a) + 1);
    }

    #[test]
    fn rescheduling_is_idempotent() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let d = g.make_node(b0, Opcode::Sub, Mode::I32, &[a, c]);
        g.make_node(b0, Opcode::Return, Mode::X, &[d]);

        let mut sel = RandomSelector::new(42);
        schedule_graph(&mut g, &mut sel);
        let first: Vec<Node> = g.layout.block_insts(b0).collect();
        schedule_graph(&mut g, &mut sel);
        let second: Vec<Node> = g.layout.block_insts(b0).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn anchor_only_values_are_skipped() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let unused = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        g.keep_alive(unused);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[a]);
        let _ = r;

        let order = schedule_order(&mut g, b0);
        assert!(!order.contains(&unused));
        assert!(order.contains(&a));
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn input_cycle_is_fatal() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Add, Mode::I32, &[a, a]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[b, b]);
        // Close a cycle b -> c -> b.
        g.set_input(b, 1, c);
        g.make_node(b0, Opcode::Return, Mode::X, &[c]);

        let mut sel = TrivialSelector;
        schedule_graph(&mut g, &mut sel);
    }
}
