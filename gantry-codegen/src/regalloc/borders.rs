//! Border lists.
//!
//! The chordal colorer consumes each block as a time-ordered sequence of *border* events: a def
//! when a value starts to live, a use when it lives its last moment in the block. Values live
//! into the block (and the block's phis) get a synthetic def at the block head; values live out
//! get no use event at all, their register stays occupied into the successors. A def whose
//! value is never consumed is followed by an immediate kill so its register comes free again.

use crate::ir::{Block, Graph, Mode, Node};
use crate::isa::RegClass;
use crate::regalloc::liveness::Liveness;
use gantry_entity::EntitySet;
use smallvec::SmallVec;

/// One border event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Border {
    /// `value` begins to live here.
    Def(Node),
    /// The last in-block use of `value`; its register comes free.
    Use(Node),
}

/// Build the border list of `block` in forward schedule order.
///
/// At one instruction, use events precede def events: operands die before results are written,
/// which is what lets a result reuse an operand's register.
pub fn block_borders(
    graph: &Graph,
    liveness: &Liveness,
    rc: RegClass,
    block: Block,
) -> Vec<Border> {
    // Backward pass: find each value's last use and the defs that are dead on arrival.
    let mut seen = EntitySet::<Node>::new();
    let live_out = liveness.live_out(block);
    for v in live_out.keys() {
        if live_out.contains(v) {
            seen.insert(v);
        }
    }

    let insts: Vec<Node> = graph.layout.block_insts(block).collect();
    let mut last_use_at = Vec::<(Node, Node)>::new(); // (inst, value)
    let mut dead_def = EntitySet::<Node>::new();
    for &inst in insts.iter().rev() {
        for def in defs_at(graph, rc, inst) {
            if !seen.contains(def) {
                dead_def.insert(def);
            }
        }
        if graph.is_proj(inst) {
            continue;
        }
        for &input in graph.inputs(inst) {
            if graph.is_in_class(input, rc) && !graph.is_unknown(input) && !seen.contains(input) {
                seen.insert(input);
                last_use_at.push((inst, input));
            }
        }
    }

    // Forward pass: emit the events.
    let mut borders = Vec::new();
    for v in liveness.live_in(block).keys() {
        if liveness.live_in(block).contains(v) && graph.is_in_class(v, rc) {
            borders.push(Border::Def(v));
        }
    }
    for &phi in graph.phis(block) {
        if graph.is_in_class(phi, rc) {
            borders.push(Border::Def(phi));
        }
    }
    // Live-ins that are dead here (no use at all in this block) release their register right
    // away.
    for i in 0..borders.len() {
        if let Border::Def(v) = borders[i] {
            let used_here = last_use_at.iter().any(|&(_, u)| u == v);
            if !used_here && !liveness.live_out(block).contains(v) {
                dead_def.insert(v);
            }
        }
    }
    let head_kills: Vec<Border> = borders
        .iter()
        .filter_map(|b| match *b {
            Border::Def(v) if dead_def.contains(v) => Some(Border::Use(v)),
            _ => None,
        })
        .collect();
    borders.extend(head_kills);

    for &inst in &insts {
        if !graph.is_proj(inst) {
            for &(at, v) in &last_use_at {
                if at == inst {
                    borders.push(Border::Use(v));
                }
            }
        }
        for def in defs_at(graph, rc, inst) {
            borders.push(Border::Def(def));
            if dead_def.contains(def) {
                borders.push(Border::Use(def));
            }
        }
    }
    borders
}

/// The class-relevant values defined at `inst`'s schedule position.
///
/// Tuple results materialize at their projections, which are scheduled individually right after
/// the tuple, so each projection reports itself.
fn defs_at(graph: &Graph, rc: RegClass, inst: Node) -> SmallVec<[Node; 2]> {
    let mut defs = SmallVec::new();
    if graph.is_proj(inst) {
        if graph.is_in_class(inst, rc) {
            defs.push(inst);
        }
    } else if graph.mode(inst) != Mode::T && graph.is_in_class(inst, rc) {
        defs.push(inst);
    }
    defs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::Opcode;

    #[test]
    fn defs_uses_and_dead_defs() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let dead = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[c]);
        for &n in &[a, b, c, dead, r] {
            g.layout.append_inst(n, b0);
        }

        let cfg = ControlFlowGraph::with_graph(&g);
        let mut liveness = Liveness::new();
        let gpr = g.reginfo().classes[0];
        liveness.compute(&g, &cfg, gpr);

        let borders = block_borders(&g, &liveness, gpr, b0);
        assert_eq!(
            borders,
            vec![
                Border::Def(a),
                Border::Def(b),
                Border::Use(a),
                Border::Use(b),
                Border::Def(c),
                Border::Def(dead),
                Border::Use(dead),
                Border::Use(c),
            ]
        );
    }
}
