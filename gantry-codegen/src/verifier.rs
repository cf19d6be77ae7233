//! IR verifier.
//!
//! Checks the invariants every pipeline stage must leave behind:
//!
//! - after scheduling, every in-block data operand precedes its consumer (schedule soundness);
//! - after spilling, no more class values are live at any point than the register budget;
//! - every `Perm` is bijection-preserving: one projection per input, classes matched;
//! - after coloring, interfering values hold distinct registers and every *limited* operand
//!   got an admissible one.
//!
//! Findings are collected into `VerifierErrors` and surfaced through `CodegenError::Verifier`
//! when the driver has the verifier enabled; a clean run returns `Ok`.

use crate::ir::{Graph, Mode, Node, ValueLoc};
use crate::isa::{RegClass, RegUnit};
use crate::regalloc::borders::{block_borders, Border};
use crate::regalloc::liveness::Liveness;
use crate::timing;
use core::fmt;
use failure::Fail;
use std::collections::HashMap;

/// A single verifier finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    /// The node the finding is about, if one can be named.
    pub node: Option<Node>,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{}: {}", node, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A collection of verifier findings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Are there no findings?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return `Err` if any findings were collected.
    pub fn as_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn report(&mut self, node: impl Into<Option<Node>>, message: String) {
        self.0.push(VerifierError {
            node: node.into(),
            message,
        });
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for error in &self.0 {
            writeln!(f, "- {}", error)?;
        }
        Ok(())
    }
}

impl Fail for VerifierErrors {}

/// Verify that every block schedule respects the data and dependency edges (P1) and that the
/// layout agrees with node/block membership.
pub fn verify_schedule(graph: &Graph, errors: &mut VerifierErrors) {
    let _tt = timing::verifier();
    for block in graph.blocks() {
        let mut position: HashMap<Node, usize> = HashMap::new();
        for (i, inst) in graph.layout.block_insts(block).enumerate() {
            position.insert(inst, i);
        }
        for (&inst, &pos) in &position {
            if graph.block_of(inst) != block {
                errors.report(
                    inst,
                    format!("scheduled in {} but belongs to {}", block, graph.block_of(inst)),
                );
            }
            for &input in graph.inputs(inst).iter().chain(graph.deps(inst)) {
                if graph.is_phi(input) || graph.is_dead(input) {
                    continue;
                }
                if let Some(&def_pos) = position.get(&input) {
                    if def_pos >= pos && !graph.is_proj(inst) {
                        errors.report(
                            inst,
                            format!("operand {} is scheduled at or after its consumer", input),
                        );
                    }
                }
            }
        }
    }
}

/// Verify that at no program point more than `budget` values of class `rc` are live (P2).
pub fn verify_pressure(
    graph: &Graph,
    liveness: &Liveness,
    rc: RegClass,
    budget: usize,
    errors: &mut VerifierErrors,
) {
    let _tt = timing::verifier();
    for block in graph.blocks() {
        let mut live = 0usize;
        for border in block_borders(graph, liveness, rc, block) {
            match border {
                Border::Def(v) => {
                    live += 1;
                    if live > budget {
                        errors.report(
                            v,
                            format!(
                                "register pressure {} exceeds the {} budget of {} in {}",
                                live, rc, budget, block
                            ),
                        );
                    }
                }
                Border::Use(_) => live = live.saturating_sub(1),
            }
        }
    }
}

/// Verify that every `Perm` node is bijection-preserving (P4): one projection per input and
/// matching classes on both sides of each position.
pub fn verify_perms(graph: &Graph, errors: &mut VerifierErrors) {
    let _tt = timing::verifier();
    for node in graph.nodes() {
        if graph.is_dead(node) || graph.opcode(node) != crate::ir::Opcode::Perm {
            continue;
        }
        let projs = graph.projs(node);
        if projs.len() != graph.num_inputs(node) {
            errors.report(
                node,
                format!(
                    "{} inputs but {} projections",
                    graph.num_inputs(node),
                    projs.len()
                ),
            );
            continue;
        }
        for &proj in &projs {
            let pn = graph.proj_num(proj) as usize;
            if pn >= graph.num_inputs(node) {
                errors.report(proj, format!("projection number {} out of range", pn));
                continue;
            }
            let input = graph.input(node, pn);
            if graph.out_req(input).class != graph.out_req(proj).class {
                errors.report(
                    proj,
                    format!("class differs from permuted input {}", input),
                );
            }
        }
    }
}

/// Verify the coloring (P3 and P5): interfering values hold distinct registers, every value of
/// the class has an allocatable register, and pinned operands sit inside their limited set.
pub fn verify_locations(
    graph: &Graph,
    liveness: &Liveness,
    rc: RegClass,
    errors: &mut VerifierErrors,
) {
    let _tt = timing::verifier();
    for block in graph.blocks() {
        // Replay the borders, tracking which value owns each register.
        let mut owner: HashMap<RegUnit, Node> = HashMap::new();
        for border in block_borders(graph, liveness, rc, block) {
            match border {
                Border::Def(v) => match graph.locations[v] {
                    ValueLoc::Reg(reg) => {
                        if !rc.is_allocatable(reg) && !graph.out_req(v).ignore {
                            errors.report(
                                v,
                                format!(
                                    "assigned non-allocatable register {}",
                                    graph.reginfo().display_regunit(reg)
                                ),
                            );
                        }
                        if let Some(&other) = owner.get(&reg) {
                            errors.report(
                                v,
                                format!(
                                    "interferes with {} in {}",
                                    other,
                                    graph.reginfo().display_regunit(reg)
                                ),
                            );
                        }
                        owner.insert(reg, v);
                    }
                    _ => errors.report(v, "no register assigned".to_string()),
                },
                Border::Use(v) => {
                    if let ValueLoc::Reg(reg) = graph.locations[v] {
                        owner.remove(&reg);
                    }
                }
            }
        }

        // Pinned operands hold an admissible register (P5).
        for inst in graph.layout.block_insts(block) {
            if graph.is_proj(inst) {
                continue;
            }
            for (i, &input) in graph.inputs(inst).iter().enumerate() {
                let req = graph.in_req(inst, i);
                if req.class != Some(rc.into()) || req.ignore {
                    continue;
                }
                if let Some(limited) = req.limited {
                    match graph.locations[input] {
                        ValueLoc::Reg(reg) if limited & (1 << reg) != 0 => {}
                        ValueLoc::Reg(reg) => errors.report(
                            inst,
                            format!(
                                "operand {} in {} violates its limited set",
                                i,
                                graph.reginfo().display_regunit(reg)
                            ),
                        ),
                        _ => errors.report(
                            inst,
                            format!("pinned operand {} has no register", i),
                        ),
                    }
                }
            }
            if graph.mode(inst) != Mode::T && graph.is_in_class(inst, rc) {
                if !graph.locations[inst].is_assigned() {
                    errors.report(inst, "produced value has no location".to_string());
                }
            }
        }
    }
}
