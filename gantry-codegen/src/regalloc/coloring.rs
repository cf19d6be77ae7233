//! The chordal colorer.
//!
//! After SSA-form spilling and constraint handling, the interference graph is chordal, and
//! walking the dominator tree in preorder while replaying each block's border list yields a
//! perfect elimination ordering. Along such an ordering greedy first-fit coloring is optimal:
//! it cannot fail as long as the spiller kept the register pressure within the class budget.
//! A failure here is therefore a broken spiller contract and fatal.
//!
//! Values precolored by the constraint handler keep their register; the walk asserts it is
//! free when their def event arrives. Values whose requirement carries a same-as-input hint
//! are given their operand's register when it happens to be free.

use crate::dominator_tree::DominatorTree;
use crate::ir::{Graph, Node, ValueLoc};
use crate::isa::RegClass;
use crate::regalloc::borders::{block_borders, Border};
use crate::regalloc::liveness::Liveness;
use crate::regalloc::register_set::RegisterSet;
use crate::timing;
use log::debug;

/// The coloring pass.
pub struct Coloring {}

impl Coloring {
    /// Create a new coloring pass.
    pub fn new() -> Self {
        Self {}
    }

    /// Assign a register to every `rc`-class value of `graph`.
    pub fn run(
        &mut self,
        graph: &mut Graph,
        domtree: &DominatorTree,
        liveness: &Liveness,
        rc: RegClass,
    ) {
        let _tt = timing::coloring();
        let entry = match graph.entry_block() {
            Some(b) => b,
            None => return,
        };

        // Dominator tree preorder with an explicit stack.
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            self.color_block(graph, liveness, rc, block);
            for &child in domtree.children(block).iter().rev() {
                stack.push(child);
            }
        }
    }

    fn color_block(
        &mut self,
        graph: &mut Graph,
        liveness: &Liveness,
        rc: RegClass,
        block: crate::ir::Block,
    ) {
        let borders = block_borders(graph, liveness, rc, block);
        let mut regs = RegisterSet::for_class(rc);

        for border in borders {
            match border {
                Border::Use(value) => {
                    let reg = graph.locations[value].unwrap_reg();
                    regs.free(reg);
                }
                Border::Def(value) => {
                    let reg = match graph.locations[value] {
                        // Live-ins colored in a dominator and operands precolored by the
                        // constraint handler: their register must still be free here.
                        ValueLoc::Reg(reg) => {
                            assert!(
                                regs.is_avail(reg),
                                "pinned register {} of {} is occupied in {}",
                                graph.reginfo().display_regunit(reg),
                                value,
                                block
                            );
                            reg
                        }
                        ValueLoc::Unassigned => {
                            let reg = self.pick_register(graph, &regs, rc, value);
                            graph.locations[value] = ValueLoc::Reg(reg);
                            reg
                        }
                        ValueLoc::Stack(slot) => {
                            panic!("coloring a stack value {} ({})", value, slot)
                        }
                    };
                    regs.take(reg);
                    debug!(
                        "{}: {} gets {}",
                        block,
                        value,
                        graph.reginfo().display_regunit(reg)
                    );
                }
            }
        }
    }

    /// Pick a register for an unconstrained def: the same-as-input hint when it is free,
    /// otherwise the lowest free register admissible for the value.
    fn pick_register(
        &self,
        graph: &Graph,
        regs: &RegisterSet,
        rc: RegClass,
        value: Node,
    ) -> crate::isa::RegUnit {
        let req = graph.out_req(value);
        let admissible = req.admissible(graph.reginfo());

        if let Some(j) = req.same_as {
            // For a projection the inputs live on the tuple node.
            let operands = if graph.is_proj(value) {
                graph.input(value, 0)
            } else {
                value
            };
            if (j as usize) < graph.num_inputs(operands) {
                let hint = graph.input(operands, j as usize);
                if let ValueLoc::Reg(reg) = graph.locations[hint] {
                    if regs.is_avail(reg) && admissible & (1 << reg) != 0 {
                        return reg;
                    }
                }
            }
        }

        match regs.first_in(admissible) {
            Some(reg) => reg,
            None => panic!(
                "no free {} register for {}: the spiller broke its pressure contract",
                rc, value
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::{Mode, Opcode};
    use crate::isa::x86::registers::{EAX, EBX, ECX, EDX};

    fn color(graph: &mut Graph) {
        let cfg = ControlFlowGraph::with_graph(graph);
        let domtree = DominatorTree::with_graph(graph, &cfg);
        let mut liveness = Liveness::new();
        let gpr = graph.reginfo().classes[0];
        liveness.compute(graph, &cfg, gpr);
        Coloring::new().run(graph, &domtree, &liveness, gpr);
    }

    #[test]
    fn interfering_values_get_distinct_registers() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let d = g.make_node(b0, Opcode::Add, Mode::I32, &[c, a]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[d]);
        for &n in &[a, b, c, d, r] {
            g.layout.append_inst(n, b0);
        }

        color(&mut g);

        let ra = g.locations[a].unwrap_reg();
        let rb = g.locations[b].unwrap_reg();
        let rc_ = g.locations[c].unwrap_reg();
        assert_ne!(ra, rb);
        // a and c are both live between c's def and d.
        assert_ne!(ra, rc_);
        assert!(g.locations[d].is_assigned());
    }

    #[test]
    fn registers_are_reused_after_death() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let ua = g.make_node(b0, Opcode::Copy, Mode::I32, &[a]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[b]);
        g.keep_alive(ua);
        for &n in &[a, ua, b, r] {
            g.layout.append_inst(n, b0);
        }

        color(&mut g);
        // a dies at its copy; b can take a's register again.
        assert_eq!(g.locations[a].unwrap_reg(), EAX);
        assert_eq!(g.locations[b].unwrap_reg(), EAX);
    }

    // Four simultaneous precolored defs (the shape a constraint-handled perm leaves behind)
    // followed by staggered uses and fresh unconstrained defs.
    #[test]
    fn precolored_defs_survive_and_fresh_defs_fill_gaps() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let mut vals = Vec::new();
        for _ in 0..4 {
            vals.push(g.make_node(b0, Opcode::Const, Mode::I32, &[]));
        }
        let perm = g.make_node(b0, Opcode::Perm, Mode::T, &vals);
        let mut projs = Vec::new();
        for (i, _) in vals.iter().enumerate() {
            projs.push(g.make_proj(perm, i as u16, Mode::I32));
        }
        let u0 = g.make_node(b0, Opcode::Copy, Mode::I32, &[projs[0]]);
        let fresh = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let u1 = g.make_node(b0, Opcode::Add, Mode::I32, &[projs[1], projs[2]]);
        let u2 = g.make_node(b0, Opcode::Add, Mode::I32, &[projs[3], fresh]);
        let keep = g.make_node(b0, Opcode::Keep, Mode::X, &[u0, u1, u2]);
        for &n in &[vals[0], vals[1], vals[2], vals[3], perm] {
            g.layout.append_inst(n, b0);
        }
        for &p in &projs {
            g.layout.append_inst(p, b0);
        }
        for &n in &[u0, fresh, u1, u2, keep] {
            g.layout.append_inst(n, b0);
        }

        // Precolor the projections the way the constraint handler would.
        let pinned = [EDX, EAX, EBX, ECX];
        for (i, &p) in projs.iter().enumerate() {
            g.locations[p] = ValueLoc::Reg(pinned[i]);
        }

        color(&mut g);

        for (i, &p) in projs.iter().enumerate() {
            assert_eq!(g.locations[p].unwrap_reg(), pinned[i]);
        }
        // Every other value got some register and no two simultaneously live values collide.
        assert!(g.locations[fresh].is_assigned());
        assert_ne!(
            g.locations[fresh].unwrap_reg(),
            g.locations[projs[3]].unwrap_reg()
        );
    }

    #[test]
    fn same_as_hint_is_honored_when_free() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        // Two-address add: the out_req carries same_as(0).
        let c = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
        let r = g.make_node(b0, Opcode::Return, Mode::X, &[c]);
        for &n in &[a, b, c, r] {
            g.layout.append_inst(n, b0);
        }

        color(&mut g);
        // a dies at the add, so c can and does reuse a's register.
        assert_eq!(g.locations[c].unwrap_reg(), g.locations[a].unwrap_reg());
    }
}
