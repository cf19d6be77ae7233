//! Backend pipeline context.
//!
//! The `Context` struct owns the analyses and pass state that should be preserved across
//! compiled functions, so the data structures are allocated once and reused. `run` drives the
//! whole backend over one graph: preliminary schedule, per-class Belady spilling with spill
//! materialization, the final selector-driven schedule, then per-class constraint handling and
//! chordal coloring. With the verifier enabled, every stage's postcondition is checked and
//! violations surface as `CodegenError::Verifier`.

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::Graph;
use crate::regalloc::{Coloring, Constraints, Liveness, SpillEnv, Spilling};
use crate::result::CodegenResult;
use crate::schedule::{self, PressureSelector, RandomSelector, TrivialSelector};
use crate::settings::{Flags, SelectorStrategy};
use crate::timing;
use crate::verifier::{
    verify_locations, verify_perms, verify_pressure, verify_schedule, VerifierErrors,
};
use log::info;

/// Persistent state of the backend pipeline.
pub struct Context {
    /// The flags controlling this pipeline.
    pub flags: Flags,

    cfg: ControlFlowGraph,
    domtree: DominatorTree,
    liveness: Liveness,
    spilling: Spilling,
    constraints: Constraints,
    coloring: Coloring,
    spill_env: SpillEnv,
}

impl Context {
    /// Create a new context with default flags.
    pub fn new() -> Self {
        Self::for_flags(Flags::default())
    }

    /// Create a new context with the given flags.
    pub fn for_flags(flags: Flags) -> Self {
        Self {
            flags,
            cfg: ControlFlowGraph::new(),
            domtree: DominatorTree::new(),
            liveness: Liveness::new(),
            spilling: Spilling::new(),
            constraints: Constraints::new(),
            coloring: Coloring::new(),
            spill_env: SpillEnv::new(),
        }
    }

    /// Clear all data structures in this context.
    pub fn clear(&mut self) {
        self.cfg.clear();
        self.domtree.clear();
        self.liveness.clear();
        self.spilling.clear();
        self.spill_env.clear();
    }

    /// Run the backend pipeline over `graph`, leaving it scheduled and fully register
    /// allocated.
    pub fn run(&mut self, graph: &mut Graph) -> CodegenResult<()> {
        let _tt = timing::compile();
        let mut errors = VerifierErrors::default();

        self.cfg.compute(graph);
        self.domtree.compute(graph, &self.cfg);

        // A preliminary in-order schedule; the spiller walks instructions, so one must exist
        // before registers are rationed.
        schedule::schedule_graph(graph, &mut TrivialSelector);

        // Belady spilling, one register class at a time.
        let classes = graph.reginfo().classes;
        for &rc in classes {
            self.liveness.compute(graph, &self.cfg, rc);
            self.spill_env.clear();
            self.spilling
                .run(graph, &self.cfg, &self.liveness, rc, &mut self.spill_env);
            let reloads = self.spill_env.materialize(graph);
            info!("{}: {} reloads inserted", rc, reloads);
        }

        // The real schedule, over the spill-aware IR.
        match self.flags.selector() {
            SelectorStrategy::Trivial => {
                schedule::schedule_graph(graph, &mut TrivialSelector);
            }
            SelectorStrategy::Random => {
                let mut selector = RandomSelector::new(self.flags.random_seed());
                schedule::schedule_graph(graph, &mut selector);
            }
            SelectorStrategy::Pressure => {
                schedule::schedule_graph(graph, &mut PressureSelector);
            }
        }
        if self.flags.enable_verifier() {
            verify_schedule(graph, &mut errors);
            if !errors.is_empty() {
                return Err(errors.into());
            }
        }

        // Constraint handling and coloring, per class.
        for &rc in classes {
            if self.flags.enable_verifier() {
                self.liveness.compute(graph, &self.cfg, rc);
                verify_pressure(graph, &self.liveness, rc, rc.budget(), &mut errors);
                if !errors.is_empty() {
                    return Err(errors.into());
                }
            }

            self.constraints.run(graph, &self.cfg, &self.domtree, rc);
            if self.flags.enable_verifier() {
                verify_perms(graph, &mut errors);
                if !errors.is_empty() {
                    return Err(errors.into());
                }
            }

            self.liveness.compute(graph, &self.cfg, rc);
            self.coloring
                .run(graph, &self.domtree, &self.liveness, rc);
            if self.flags.enable_verifier() {
                verify_locations(graph, &self.liveness, rc, &mut errors);
                if !errors.is_empty() {
                    return Err(errors.into());
                }
            }
        }

        graph.stack_slots.layout_frame();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mode, Node, Opcode, ValueLoc};
    use crate::settings;

    fn verified_flags() -> Flags {
        let mut b = settings::builder();
        b.enable_verifier(true);
        Flags::new(b)
    }

    // A straight line with more simultaneously needed values than the six allocatable GPRs.
    // The pipeline must spill, reschedule, and color without any verifier finding.
    #[test]
    fn high_pressure_straight_line() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let mut consts = Vec::new();
        for _ in 0..8 {
            consts.push(g.make_node(b0, Opcode::Const, Mode::I32, &[]));
        }
        // Pairwise sums force all eight values to survive until consumed.
        let mut sums = Vec::new();
        for i in 0..4 {
            sums.push(g.make_node(
                b0,
                Opcode::Add,
                Mode::I32,
                &[consts[i], consts[7 - i]],
            ));
        }
        let mut acc = sums[0];
        for &s in &sums[1..] {
            acc = g.make_node(b0, Opcode::Add, Mode::I32, &[acc, s]);
        }
        g.make_node(b0, Opcode::Return, Mode::X, &[acc]);

        let mut ctx = Context::for_flags(verified_flags());
        ctx.run(&mut g).expect("pipeline must succeed");

        // Every live data value carries a register.
        for n in g.nodes().collect::<Vec<Node>>() {
            if !g.is_dead(n) && g.mode(n).is_data() && g.has_uses(n) && !g.is_unknown(n) {
                assert!(
                    g.locations[n].is_assigned(),
                    "{} has no location",
                    g.display_node(n)
                );
            }
        }
    }

    // A diamond with a phi join and a pinned division in one arm.
    #[test]
    fn diamond_with_phi_and_division() {
        let mut g = Graph::new();
        let b0 = g.make_block();
        let b1 = g.make_block();
        let b2 = g.make_block();
        let b3 = g.make_block();
        g.add_block_pred(b1, b0);
        g.add_block_pred(b2, b0);
        g.add_block_pred(b3, b1);
        g.add_block_pred(b3, b2);

        let x = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        let y = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
        g.make_node(b0, Opcode::Branch, Mode::X, &[x]);

        let div = g.make_node(b1, Opcode::Div, Mode::T, &[x, y]);
        let quot = g.make_proj(div, 0, Mode::I32);
        let _rem = g.make_proj(div, 1, Mode::I32);
        g.make_node(b1, Opcode::Jump, Mode::X, &[]);

        let doubled = g.make_node(b2, Opcode::Add, Mode::I32, &[x, x]);
        g.make_node(b2, Opcode::Jump, Mode::X, &[]);

        let phi = g.make_phi(b3, Mode::I32, &[quot, doubled]);
        let ret = g.make_node(b3, Opcode::Return, Mode::X, &[phi]);
        let _ = ret;

        let mut ctx = Context::for_flags(verified_flags());
        ctx.run(&mut g).expect("pipeline must succeed");

        // The quotient is pinned to %eax by the operand table.
        assert_eq!(
            g.locations[quot],
            ValueLoc::Reg(crate::isa::x86::registers::EAX)
        );
        assert!(g.locations[phi].is_assigned());
    }

    // Contexts are reusable across graphs.
    #[test]
    fn context_reuse() {
        let mut ctx = Context::new();
        for _ in 0..2 {
            let mut g = Graph::new();
            let b0 = g.make_block();
            let a = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
            let b = g.make_node(b0, Opcode::Const, Mode::I32, &[]);
            let s = g.make_node(b0, Opcode::Add, Mode::I32, &[a, b]);
            g.make_node(b0, Opcode::Return, Mode::X, &[s]);
            ctx.run(&mut g).expect("pipeline must succeed");
            ctx.clear();
        }
    }
}
