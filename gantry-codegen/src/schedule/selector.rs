//! Scheduling selectors.
//!
//! The list scheduler delegates the choice among ready nodes to a selector, a capability object
//! notified of every scheduling event. Three strategies are provided: `Trivial` picks the first
//! ready node, `Random` picks uniformly from a deterministic xorshift stream, and `Pressure`
//! greedily minimizes the growth of the live set.

use crate::ir::{Block, Graph, Node};
use gantry_entity::EntitySet;

/// A scheduling strategy.
///
/// All notification hooks have empty default implementations; only `select` is mandatory.
pub trait Selector {
    /// Called once before any block of the graph is scheduled.
    fn init_graph(&mut self, _graph: &Graph) {}

    /// Called before scheduling of `block` begins.
    fn init_block(&mut self, _graph: &Graph, _block: Block) {}

    /// Called when `node` enters the ready set. `prev` is the node whose scheduling made it
    /// ready, or `None` for initially ready nodes.
    fn node_ready(&mut self, _graph: &Graph, _node: Node, _prev: Option<Node>) {}

    /// Pick one node from `ready`. `live` is the set of values in use beyond the cursor.
    fn select(&mut self, graph: &Graph, ready: &[Node], live: &EntitySet<Node>) -> Node;

    /// Called after `node` was appended to the schedule.
    fn node_selected(&mut self, _graph: &Graph, _node: Node) {}

    /// Called when `block`'s schedule is complete.
    fn finish_block(&mut self, _graph: &Graph, _block: Block) {}

    /// Called after the last block of the graph.
    fn finish_graph(&mut self) {}
}

/// Picks the first ready node. The baseline strategy, and the one used for the preliminary
/// schedule the spiller walks.
pub struct TrivialSelector;

impl Selector for TrivialSelector {
    fn select(&mut self, _graph: &Graph, ready: &[Node], _live: &EntitySet<Node>) -> Node {
        ready[0]
    }
}

/// Picks a uniformly pseudo-random ready node.
///
/// The xorshift stream is reseeded in `init_graph`, so scheduling the same graph twice with the
/// same seed yields the same order.
pub struct RandomSelector {
    seed: u64,
    state: u64,
}

impl RandomSelector {
    /// Create a selector with the given seed.
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9e37_79b9 } else { seed };
        Self { seed, state: seed }
    }

    fn next(&mut self) -> u64 {
        // xorshift64.
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

impl Selector for RandomSelector {
    fn init_graph(&mut self, _graph: &Graph) {
        self.state = self.seed;
    }

    fn select(&mut self, _graph: &Graph, ready: &[Node], _live: &EntitySet<Node>) -> Node {
        ready[(self.next() % ready.len() as u64) as usize]
    }
}

/// Greedily minimizes register pressure.
///
/// For every candidate the selector estimates the immediate change of the live set: values the
/// candidate defines begin to live, single-use operands die. The candidate with the smallest
/// estimate wins; ties go to the earliest ready node.
pub struct PressureSelector;

impl PressureSelector {
    fn pressure_delta(graph: &Graph, node: Node, live: &EntitySet<Node>) -> i32 {
        let mut delta = 0i32;

        if graph.mode(node).is_data() && graph.has_uses(node) {
            delta += 1;
        } else if graph.mode(node) == crate::ir::Mode::T {
            delta += graph
                .projs(node)
                .iter()
                .filter(|&&p| graph.mode(p).is_data() && graph.has_uses(p))
                .count() as i32;
        }

        let mut seen: Vec<Node> = Vec::new();
        for &input in graph.inputs(node) {
            if !graph.mode(input).is_data() || seen.contains(&input) {
                continue;
            }
            seen.push(input);
            // A live operand with no other consumer dies here.
            if live.contains(input) && graph.uses(input).len() == 1 {
                delta -= 1;
            }
        }
        delta
    }
}

impl Selector for PressureSelector {
    fn select(&mut self, graph: &Graph, ready: &[Node], live: &EntitySet<Node>) -> Node {
        let mut best = ready[0];
        let mut best_delta = Self::pressure_delta(graph, best, live);
        for &node in &ready[1..] {
            let delta = Self::pressure_delta(graph, node, live);
            if delta < best_delta {
                best = node;
                best_delta = delta;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mode, Opcode};

    #[test]
    fn random_is_deterministic_per_graph() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        for _ in 0..4 {
            g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        }
        let ready: Vec<Node> = g.nodes().collect();
        let live = EntitySet::new();

        let mut sel = RandomSelector::new(7);
        sel.init_graph(&g);
        let first: Vec<Node> = (0..8).map(|_| sel.select(&g, &ready, &live)).collect();
        sel.init_graph(&g);
        let second: Vec<Node> = (0..8).map(|_| sel.select(&g, &ready, &live)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn pressure_prefers_killing_operands() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        // `sum` kills both single-use operands; `fresh` only defines a new value.
        let sum = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let fresh = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let sink = g.make_node(b0, Opcode::Keep, Mode::X, &[sum, fresh]);
        let _ = sink;

        let mut live = EntitySet::new();
        live.insert(a);
        live.insert(b);

        let mut sel = PressureSelector;
        let picked = sel.select(&g, &[fresh, sum], &live);
        assert_eq!(picked, sum);
    }
}
