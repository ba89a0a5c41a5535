//! The decision-variable table handed to the solver.
//!
//! Preventive variables come in raise/lower pairs around the element's
//! current setpoint or target; load shedding is a single variable.
//! Curative variables exist per (contingency, curative element) pair and
//! only enter the constraints of their own contingency. Parade activation
//! variables are binary and one per parade.
//!
//! Building the table writes every variable index back into the network
//! entities (`var_index`, `preventive_var`, ...); the reset protocol
//! clears them between variants.

use serde::Serialize;
use tracing::debug;

use metrix_core::{
    ComputationKind, Configuration, CurativeElement, GenId, HvdcId, LoadId, Network, OutageId,
    ShifterId, UNDEFINED,
};

/// What a decision variable drives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum VariableKind {
    GeneratorRaise(GenId),
    GeneratorLower(GenId),
    LoadShed(LoadId),
    ShifterRaise(ShifterId),
    ShifterLower(ShifterId),
    HvdcRaise(HvdcId),
    HvdcLower(HvdcId),
    /// Post-contingency adjustment, `action` indexing the contingency's
    /// curative list.
    CurativeRaise { outage: OutageId, action: usize },
    CurativeLower { outage: OutageId, action: usize },
    /// Binary choice of one parade.
    ParadeActivation(OutageId),
}

/// One decision variable: bounds, cost, and integrality.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionVariable {
    pub kind: VariableKind,
    pub lower: f64,
    pub upper: f64,
    pub cost: f64,
    pub integer: bool,
}

/// The per-variant variable table.
#[derive(Debug, Default, Serialize)]
pub struct DispatchProblem {
    pub variables: Vec<DecisionVariable>,
}

impl DispatchProblem {
    /// Assemble the table for the network's current state and write the
    /// variable indices into the entities.
    pub fn build(net: &mut Network, config: &Configuration) -> DispatchProblem {
        let mut problem = DispatchProblem::default();
        if config.computation == ComputationKind::LoadFlow {
            return problem;
        }

        // Generator raise/lower pairs around the post-balance target.
        for index in 0..net.generators.len() {
            let gen = &net.generators[index];
            if !gen.on || !gen.is_adjustable(false) {
                continue;
            }
            let raise = DecisionVariable {
                kind: VariableKind::GeneratorRaise(gen.id),
                lower: 0.0,
                upper: (gen.pmax - gen.target).max(0.0),
                cost: gen.cost_up_redispatch + config.redispatch_cost_offset as f64,
                integer: false,
            };
            let lower = DecisionVariable {
                kind: VariableKind::GeneratorLower(gen.id),
                lower: 0.0,
                upper: (gen.target - gen.pmin).max(0.0),
                cost: gen.cost_down_redispatch + config.redispatch_cost_offset as f64,
                integer: false,
            };
            net.generators[index].var_index = Some(problem.variables.len());
            problem.variables.push(raise);
            problem.variables.push(lower);
        }

        // Preventive load shedding.
        for index in 0..net.loads.len() {
            let load = &net.loads[index];
            if !load.sheddable() || load.value <= 0.0 {
                continue;
            }
            let shed = DecisionVariable {
                kind: VariableKind::LoadShed(load.id),
                lower: 0.0,
                upper: load.shed_fraction * load.value,
                cost: load.shed_cost,
                integer: false,
            };
            net.loads[index].var_index = Some(problem.variables.len());
            problem.variables.push(shed);
        }

        // Phase-shifter deviation pairs (tap ranges tighten the bounds).
        for index in 0..net.shifters.len() {
            let shifter = &net.shifters[index];
            if !shifter.control.is_optimized() {
                continue;
            }
            let upper_bound = shifter.power_upper_bound();
            let lower_bound = shifter.power_lower_bound();
            let raise = DecisionVariable {
                kind: VariableKind::ShifterRaise(shifter.id),
                lower: 0.0,
                upper: (upper_bound - shifter.setpoint).max(0.0),
                cost: config.shifter_cost,
                integer: false,
            };
            let lower = DecisionVariable {
                kind: VariableKind::ShifterLower(shifter.id),
                lower: 0.0,
                upper: (shifter.setpoint - lower_bound).max(0.0),
                cost: config.shifter_cost,
                integer: false,
            };
            net.shifters[index].preventive_var = Some(problem.variables.len());
            problem.variables.push(raise);
            problem.variables.push(lower);
        }

        // HVDC deviation pairs; AC-emulation links are driven through
        // their fictive shifter instead.
        for index in 0..net.hvdcs.len() {
            let link = &net.hvdcs[index];
            if link.control != metrix_core::HvdcControl::PowerOptimized || !link.is_closed() {
                continue;
            }
            let raise = DecisionVariable {
                kind: VariableKind::HvdcRaise(link.id),
                lower: 0.0,
                upper: (link.power_max - link.setpoint).max(0.0),
                cost: config.hvdc_cost,
                integer: false,
            };
            let lower = DecisionVariable {
                kind: VariableKind::HvdcLower(link.id),
                lower: 0.0,
                upper: (link.setpoint - link.power_min).max(0.0),
                cost: config.hvdc_cost,
                integer: false,
            };
            net.hvdcs[index].preventive_var = Some(problem.variables.len());
            problem.variables.push(raise);
            problem.variables.push(lower);
        }

        if config.use_curative() {
            problem.build_curative_variables(net, config);
        }

        // Binary parade choices.
        for index in 0..net.outages.len() {
            let id = OutageId::new(index);
            if !net.outage(id).is_parade || !net.outage(id).valid {
                continue;
            }
            net.outage_mut(id).activation_var = Some(problem.variables.len());
            problem.variables.push(DecisionVariable {
                kind: VariableKind::ParadeActivation(id),
                lower: 0.0,
                upper: 1.0,
                cost: 0.0,
                integer: true,
            });
        }

        debug!(variables = problem.variables.len(), "dispatch problem assembled");
        problem
    }

    fn build_curative_variables(&mut self, net: &mut Network, config: &Configuration) {
        for outage_index in 0..net.outages.len() {
            let id = OutageId::new(outage_index);
            if !net.outage(id).valid {
                continue;
            }
            let probability = net.outage(id).probability;
            for action_index in 0..net.outage(id).curative_actions.len() {
                let action = net.outage(id).curative_actions[action_index].clone();
                if !net.curative_is_valid(&action) {
                    continue;
                }
                let (upper_raise, upper_lower, cost) = match action.element {
                    CurativeElement::PhaseShifter(sid) => {
                        let shifter = net.shifter(sid);
                        (
                            (shifter.power_max - shifter.setpoint).max(0.0),
                            (shifter.setpoint - shifter.power_min).max(0.0),
                            config.shifter_cost * probability,
                        )
                    }
                    CurativeElement::Hvdc(hid) => {
                        let link = net.hvdc(hid);
                        (
                            (link.power_max - link.setpoint).max(0.0),
                            (link.setpoint - link.power_min).max(0.0),
                            config.hvdc_cost * probability,
                        )
                    }
                    CurativeElement::Generator(gid) => {
                        let gen = net.generator(gid);
                        (
                            (gen.pmax - gen.target).max(0.0),
                            (gen.target - gen.pmin).max(0.0),
                            (gen.cost_up_redispatch + gen.cost_down_redispatch) * 0.5 * probability,
                        )
                    }
                    CurativeElement::Load(lid) => {
                        let load = net.load(lid);
                        let cost = if load.curative_shed_cost != UNDEFINED {
                            load.curative_shed_cost * probability
                        } else {
                            config.curative_power_cost()
                        };
                        ((load.curative_shed_fraction * load.value).max(0.0), 0.0, cost)
                    }
                };
                let var = self.variables.len();
                net.outage_mut(id).curative_actions[action_index].curative_var = Some(var);
                self.variables.push(DecisionVariable {
                    kind: VariableKind::CurativeRaise {
                        outage: id,
                        action: action_index,
                    },
                    lower: 0.0,
                    upper: upper_raise,
                    cost,
                    integer: false,
                });
                self.variables.push(DecisionVariable {
                    kind: VariableKind::CurativeLower {
                        outage: id,
                        action: action_index,
                    },
                    lower: 0.0,
                    upper: upper_lower,
                    cost,
                    integer: false,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::testkit;

    #[test]
    fn test_generator_pair_bounds() {
        let (config, mut net) = testkit::three_node_ring();
        let problem = DispatchProblem::build(&mut net, &config);
        let gen = &net.generators[0];
        let base = gen.var_index.expect("generator variable");
        match problem.variables[base].kind {
            VariableKind::GeneratorRaise(id) => assert_eq!(id, gen.id),
            ref other => panic!("unexpected kind {:?}", other),
        }
        // Target 100 in [0, 200]: raise headroom 100, lower room 100.
        assert_eq!(problem.variables[base].upper, 100.0);
        assert_eq!(problem.variables[base + 1].upper, 100.0);
    }

    #[test]
    fn test_load_shed_bounds() {
        let (config, mut net) = testkit::three_node_ring();
        let problem = DispatchProblem::build(&mut net, &config);
        let load = &net.loads[0];
        let index = load.var_index.expect("shed variable");
        assert!(matches!(problem.variables[index].kind, VariableKind::LoadShed(_)));
        assert_eq!(problem.variables[index].upper, 100.0);
        assert_eq!(problem.variables[index].cost, config.failure_cost);
    }

    #[test]
    fn test_load_flow_mode_builds_no_variables() {
        let (mut config, mut net) = testkit::three_node_ring();
        config.computation = ComputationKind::LoadFlow;
        let problem = DispatchProblem::build(&mut net, &config);
        assert!(problem.variables.is_empty());
    }

    #[test]
    fn test_curative_variables_for_emulated_link() {
        let (config, mut net) = testkit::emulated_hvdc_pair();
        assert!(config.use_curative());
        let problem = DispatchProblem::build(&mut net, &config);
        // The fictive shifter is preventively optimized and curatively
        // attached to the contingency.
        let fictive = net.hvdcs[0].fictive_shifter.unwrap();
        assert!(net.shifter(fictive).preventive_var.is_some());
        let outage = net.outage_index["LOSS_BC"];
        let action = &net.outage(outage).curative_actions[0];
        let var = action.curative_var.expect("curative variable");
        assert!(matches!(
            problem.variables[var].kind,
            VariableKind::CurativeRaise { .. }
        ));
    }

    #[test]
    fn test_off_generator_gets_no_variable() {
        let (config, mut net) = testkit::three_node_ring();
        net.generators[0].on = false;
        let problem = DispatchProblem::build(&mut net, &config);
        assert!(net.generators[0].var_index.is_none());
        assert!(problem
            .variables
            .iter()
            .all(|v| !matches!(v.kind, VariableKind::GeneratorRaise(_))));
    }
}
