//! LP assembly and the constraint-generation loop.
//!
//! The base problem carries the zonal balance equations and the basecase
//! thermal limits. Contingency limits enter lazily: after each solve,
//! every valid contingency is evaluated at the current point (through its
//! own influence matrix) and the violated (element, contingency) pairs
//! are appended as new rows, curative variables included, until the point
//! is clean or the micro-iteration cap is reached.
//!
//! Contingencies with parades are represented by one alternative chosen
//! greedily (the declared order breaks ties): the built-in driver keeps
//! the parade activation binaries out of the LP and records the choice in
//! the outcome instead; an external MILP backend may branch on them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use good_lp::solvers::clarabel::clarabel;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};
use tracing::{debug, info, warn};

use metrix_core::error::SolverError;
use metrix_core::network::monitor::defined;
use metrix_core::{
    BranchId, ComputationKind, Configuration, Contingency, CurativeElement, GenId, HvdcControl,
    HvdcId, MonitorKind, Network, OutageId, EPSILON,
};

use crate::problem::{DispatchProblem, VariableKind};
use crate::sensitivity::{InfluenceCache, PtdfMatrix};
use crate::solution::{
    CurativeActivation, DispatchOutcome, MonitorFlow, MonitorViolation, ZoneResult,
};

/// One linear constraint over the variable table:
/// `lower ≤ constant + Σ coeff·var ≤ upper`.
#[derive(Debug, Clone)]
pub struct ConstraintRow {
    pub label: String,
    pub terms: Vec<(usize, f64)>,
    pub constant: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConstraintRow {
    fn value(&self, values: &[f64]) -> f64 {
        self.constant + self.terms.iter().map(|&(i, c)| c * values[i]).sum::<f64>()
    }
}

/// Solve the dispatch for the network's current state.
pub fn solve_dispatch(
    net: &mut Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
) -> Result<DispatchOutcome, SolverError> {
    let start = Instant::now();
    if net.influence_stale {
        cache.invalidate();
        net.influence_stale = false;
    }

    let problem = DispatchProblem::build(net, config);

    if config.computation == ComputationKind::LoadFlow {
        return load_flow_outcome(net, config, cache);
    }

    let mut rows = balance_rows(net);
    {
        let ptdf = cache.base(net)?;
        for monitor in &net.monitors {
            if monitor.monitor_n != MonitorKind::Monitored {
                continue;
            }
            let upper = monitor.max_limit(config, None);
            let lower = monitor.min_limit(config, None);
            if !upper.is_finite() && !lower.is_finite() {
                continue;
            }
            let (constant, terms) = flow_expression(net, ptdf, &monitor.branch_terms, &monitor.hvdc_terms, None);
            rows.push(ConstraintRow {
                label: format!("{} in N", monitor.name),
                terms,
                constant,
                lower,
                upper,
            });
        }
    }

    let mut values = solve_lp(&problem, &rows)?;
    let mut iterations = 1u32;
    let mut added: HashSet<(OutageId, usize)> = HashSet::new();
    let mut chosen_entries: HashMap<OutageId, OutageId> = HashMap::new();

    while iterations < config.micro_iteration_limit.max(1) {
        if config.solver_time_limit_secs > 0
            && start.elapsed().as_secs() >= config.solver_time_limit_secs
        {
            warn!("solver wall-clock budget exhausted during constraint generation");
            return Err(SolverError::Timeout);
        }
        let new_rows = collect_violated_rows(net, config, cache, &values, &mut added, &mut chosen_entries)?;
        if new_rows.is_empty() {
            break;
        }
        debug!(added = new_rows.len(), iteration = iterations, "contingency constraints added");
        rows.extend(new_rows);
        values = solve_lp(&problem, &rows)?;
        iterations += 1;
    }

    let mut outcome = DispatchOutcome::default();
    outcome.micro_iterations = iterations;
    outcome.cost = problem
        .variables
        .iter()
        .zip(&values)
        .map(|(v, x)| v.cost * x)
        .sum();
    for (parent, entry) in &chosen_entries {
        if *parent != *entry {
            outcome
                .activated_parades
                .push((net.outage(*parent).name.clone(), net.outage(*entry).name.clone()));
        }
    }
    // Flows are evaluated before the write-back: the expressions combine
    // the pre-decision setpoints with the variable values.
    finalize_flows(net, config, cache, &values, &mut outcome)?;
    write_back(net, config, &problem, &values, &mut outcome);
    Ok(outcome)
}

/// One balance equation per synchronous zone: generation adjustments,
/// shedding and DC transfers must keep the zone balanced around its
/// already-balanced base state.
fn balance_rows(net: &Network) -> Vec<ConstraintRow> {
    let mut by_zone: BTreeMap<i32, ConstraintRow> = BTreeMap::new();
    let zone_of = |node: metrix_core::NodeId| net.nodes[node.value()].zone;

    for gen in &net.generators {
        if !gen.on {
            continue;
        }
        let row = by_zone.entry(zone_of(gen.node)).or_insert_with(|| empty_row());
        row.constant += gen.target;
        if let Some(var) = gen.var_index {
            row.terms.push((var, 1.0));
            row.terms.push((var + 1, -1.0));
        }
    }
    for load in &net.loads {
        let row = by_zone.entry(zone_of(load.node)).or_insert_with(|| empty_row());
        row.constant -= load.value;
        if let Some(var) = load.var_index {
            row.terms.push((var, 1.0));
        }
    }
    for link in &net.hvdcs {
        if !link.is_closed()
            || link.control == HvdcControl::OutOfService
            || link.control.is_emulation()
        {
            continue;
        }
        let from_zone = zone_of(link.from);
        let to_zone = zone_of(link.to);
        {
            let row = by_zone.entry(from_zone).or_insert_with(|| empty_row());
            row.constant -= link.setpoint;
            if let Some(var) = link.preventive_var {
                row.terms.push((var, -1.0));
                row.terms.push((var + 1, 1.0));
            }
        }
        {
            let row = by_zone.entry(to_zone).or_insert_with(|| empty_row());
            row.constant += link.setpoint;
            if let Some(var) = link.preventive_var {
                row.terms.push((var, 1.0));
                row.terms.push((var + 1, -1.0));
            }
        }
    }

    by_zone
        .into_iter()
        .map(|(zone, mut row)| {
            row.label = format!("balance of zone {zone}");
            row.lower = 0.0;
            row.upper = 0.0;
            row
        })
        .collect()
}

fn empty_row() -> ConstraintRow {
    ConstraintRow {
        label: String::new(),
        terms: Vec::new(),
        constant: 0.0,
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    }
}

/// Frequency-response shares within one synchronous zone, excluding the
/// tripped generators. Weighted by available capacity; every on-line
/// generator participates when no adjustable one is left.
fn participation(net: &Network, zone: i32, tripped: &HashSet<GenId>) -> Vec<(GenId, f64)> {
    let candidates: Vec<&metrix_core::Generator> = net
        .generators
        .iter()
        .filter(|g| {
            g.on && !tripped.contains(&g.id)
                && net.nodes[g.node.value()].zone == zone
                && g.adjustability.without_network()
        })
        .collect();
    let pool: Vec<&metrix_core::Generator> = if candidates.is_empty() {
        net.generators
            .iter()
            .filter(|g| g.on && !tripped.contains(&g.id) && net.nodes[g.node.value()].zone == zone)
            .collect()
    } else {
        candidates
    };
    let total: f64 = pool.iter().map(|g| g.pmax_available.max(0.0)).sum();
    if total <= 0.0 {
        let share = 1.0 / pool.len().max(1) as f64;
        return pool.iter().map(|g| (g.id, share)).collect();
    }
    pool.iter()
        .map(|g| (g.id, g.pmax_available.max(0.0) / total))
        .collect()
}

/// Nodal injections of generation and load in the given contingency
/// context: tripped generation and interrupted DC transfers are
/// compensated by the frequency response of their synchronous zone.
/// DC transfers themselves are handled by the caller, not here.
fn context_injections(net: &Network, ctx: Option<&Contingency>) -> Vec<f64> {
    let mut injections = vec![0.0; net.nodes.len()];
    let tripped_gens: HashSet<GenId> = ctx
        .map(|o| o.generators.iter().copied().collect())
        .unwrap_or_default();
    let tripped_hvdcs: HashSet<HvdcId> = ctx
        .map(|o| o.hvdcs.iter().copied().collect())
        .unwrap_or_default();

    let mut deficit_by_zone: BTreeMap<i32, f64> = BTreeMap::new();
    for gen in &net.generators {
        if !gen.on {
            continue;
        }
        if tripped_gens.contains(&gen.id) {
            *deficit_by_zone
                .entry(net.nodes[gen.node.value()].zone)
                .or_insert(0.0) += gen.target;
            continue;
        }
        injections[gen.node.value()] += gen.target;
    }
    for load in &net.loads {
        injections[load.node.value()] -= load.value;
    }
    for link in &net.hvdcs {
        if !tripped_hvdcs.contains(&link.id) || link.control.is_emulation() || !link.is_closed() {
            continue;
        }
        // The sending zone keeps the power, the receiving zone loses it.
        *deficit_by_zone
            .entry(net.nodes[link.from.value()].zone)
            .or_insert(0.0) -= link.setpoint;
        *deficit_by_zone
            .entry(net.nodes[link.to.value()].zone)
            .or_insert(0.0) += link.setpoint;
    }

    for (zone, deficit) in deficit_by_zone {
        if deficit == 0.0 {
            continue;
        }
        for (gid, share) in participation(net, zone, &tripped_gens) {
            injections[net.generator(gid).node.value()] += share * deficit;
        }
    }
    injections
}

/// Linearized flow of a weighted sum of branch (and HVDC) flows on the
/// given influence matrix: a constant at the current setpoints plus one
/// coefficient per decision variable.
fn flow_expression(
    net: &Network,
    ptdf: &PtdfMatrix,
    branch_terms: &[(BranchId, f64)],
    hvdc_terms: &[(HvdcId, f64)],
    ctx: Option<&Contingency>,
) -> (f64, Vec<(usize, f64)>) {
    let n = net.nodes.len();
    let mut aggregated = vec![0.0; n];
    for &(branch, coeff) in branch_terms {
        if let Some(row) = ptdf.row(branch) {
            for (slot, value) in aggregated.iter_mut().zip(row) {
                *slot += coeff * value;
            }
        }
    }

    let tripped_gens: HashSet<GenId> = ctx
        .map(|o| o.generators.iter().copied().collect())
        .unwrap_or_default();
    let tripped_hvdcs: HashSet<HvdcId> = ctx
        .map(|o| o.hvdcs.iter().copied().collect())
        .unwrap_or_default();

    let injections = context_injections(net, ctx);
    let mut constant: f64 = aggregated
        .iter()
        .zip(&injections)
        .map(|(s, p)| s * p)
        .sum();
    let mut terms: Vec<(usize, f64)> = Vec::new();

    // Preventive generation variables: tripped generators act through the
    // frequency response of their zone instead of their own node.
    let mut response_by_zone: BTreeMap<i32, f64> = BTreeMap::new();
    for gen in &net.generators {
        let Some(var) = gen.var_index else { continue };
        if !gen.on {
            continue;
        }
        let sensitivity = if tripped_gens.contains(&gen.id) {
            let zone = net.nodes[gen.node.value()].zone;
            *response_by_zone.entry(zone).or_insert_with(|| {
                participation(net, zone, &tripped_gens)
                    .iter()
                    .map(|&(gid, share)| share * aggregated[net.generator(gid).node.value()])
                    .sum()
            })
        } else {
            aggregated[gen.node.value()]
        };
        if sensitivity != 0.0 {
            terms.push((var, sensitivity));
            terms.push((var + 1, -sensitivity));
        }
    }

    // Load shedding raises the nodal injection.
    for load in &net.loads {
        let Some(var) = load.var_index else { continue };
        let sensitivity = aggregated[load.node.value()];
        if sensitivity != 0.0 {
            terms.push((var, sensitivity));
        }
    }

    // Phase-shifter setpoints and deviation pairs.
    for shifter in &net.shifters {
        let sensitivity = shifter_aggregate(net, ptdf, branch_terms, shifter);
        if sensitivity == 0.0 {
            continue;
        }
        constant += sensitivity * shifter.setpoint;
        if let Some(var) = shifter.preventive_var {
            terms.push((var, sensitivity));
            terms.push((var + 1, -sensitivity));
        }
    }

    // DC transfers (emulation links act through their fictive branch).
    for link in &net.hvdcs {
        if !link.is_closed()
            || link.control == HvdcControl::OutOfService
            || link.control.is_emulation()
        {
            continue;
        }
        if tripped_hvdcs.contains(&link.id) {
            // Its transfer is compensated in the context injections; the
            // deviation variables have no effect on this contingency.
            continue;
        }
        let watched: f64 = hvdc_terms
            .iter()
            .filter(|&&(h, _)| h == link.id)
            .map(|&(_, c)| c)
            .sum();
        let mut sensitivity = watched;
        for &(branch, coeff) in branch_terms {
            sensitivity += coeff * ptdf.transfer_sensitivity(branch, link.from, link.to);
        }
        if sensitivity == 0.0 {
            continue;
        }
        constant += sensitivity * link.setpoint;
        if let Some(var) = link.preventive_var {
            terms.push((var, sensitivity));
            terms.push((var + 1, -sensitivity));
        }
    }

    // Curative variables of the contingency under evaluation.
    if let Some(outage) = ctx {
        for action in &outage.curative_actions {
            let Some(var) = action.curative_var else { continue };
            let sensitivity = match action.element {
                CurativeElement::PhaseShifter(sid) => {
                    shifter_aggregate(net, ptdf, branch_terms, net.shifter(sid))
                }
                CurativeElement::Hvdc(hid) => {
                    let link = net.hvdc(hid);
                    let watched: f64 = hvdc_terms
                        .iter()
                        .filter(|&&(h, _)| h == link.id)
                        .map(|&(_, c)| c)
                        .sum();
                    branch_terms
                        .iter()
                        .map(|&(b, c)| c * ptdf.transfer_sensitivity(b, link.from, link.to))
                        .sum::<f64>()
                        + watched
                }
                CurativeElement::Generator(gid) => aggregated[net.generator(gid).node.value()],
                CurativeElement::Load(lid) => aggregated[net.load(lid).node.value()],
            };
            if sensitivity != 0.0 {
                terms.push((var, sensitivity));
                terms.push((var + 1, -sensitivity));
            }
        }
    }

    (constant, terms)
}

/// Aggregated sensitivity of the watched branch terms to one shifter's
/// setpoint power.
fn shifter_aggregate(
    net: &Network,
    ptdf: &PtdfMatrix,
    branch_terms: &[(BranchId, f64)],
    shifter: &metrix_core::PhaseShifter,
) -> f64 {
    // An angle shifter whose carrier is open on this topology drives
    // nothing.
    let carrier = net.branch(shifter.branch);
    if carrier.is_closed() && ptdf.row(shifter.branch).is_none() {
        return 0.0;
    }
    branch_terms
        .iter()
        .map(|&(b, c)| c * ptdf.shifter_sensitivity(net, b, shifter))
        .sum()
}

/// Evaluate every valid contingency at the current point and return the
/// rows for the violated (element, contingency) pairs. Contingencies
/// with parades first commit to one alternative, chosen greedily.
fn collect_violated_rows(
    net: &mut Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
    values: &[f64],
    added: &mut HashSet<(OutageId, usize)>,
    chosen_entries: &mut HashMap<OutageId, OutageId>,
) -> Result<Vec<ConstraintRow>, SolverError> {
    let mut new_rows = Vec::new();

    for index in 0..net.outage_count_without_parades {
        let parent = OutageId::new(index);
        if !net.outage(parent).valid {
            continue;
        }

        let entry = match chosen_entries.get(&parent) {
            Some(&entry) => entry,
            None => {
                let entry = choose_entry(net, config, cache, parent, values)?;
                if let Some(entry) = entry {
                    chosen_entries.insert(parent, entry);
                    if entry != parent {
                        net.outage_mut(parent).parades_activated = true;
                    }
                    entry
                } else {
                    continue; // nothing violated anywhere
                }
            }
        };

        let violations = violated_monitors(net, config, cache, entry, values)?;
        for (monitor_index, row) in violations {
            if !added.insert((entry, monitor_index)) {
                continue;
            }
            net.outage_mut(entry).constraint_rows.push(monitor_index);
            new_rows.push(row);
        }

        // Once a parade answers the contingency, the intermediate state
        // before it acts is held to the before-curative limits.
        if entry != parent && config.itam_check {
            let violations = violated_monitors(net, config, cache, parent, values)?;
            for (monitor_index, row) in violations {
                if !added.insert((parent, monitor_index)) {
                    continue;
                }
                net.outage_mut(parent).constraint_rows.push(monitor_index);
                new_rows.push(row);
            }
        }
    }
    Ok(new_rows)
}

/// Pick the alternative that answers a contingency: the contingency
/// itself when it has no parades, otherwise the declared parade (the
/// synthetic do-nothing one first) with the smallest worst violation,
/// honoring each parade's allowed-constraint restriction. `None` when
/// nothing is violated anywhere.
fn choose_entry(
    net: &Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
    parent: OutageId,
    values: &[f64],
) -> Result<Option<OutageId>, SolverError> {
    let parades = net.outage(parent).parades.clone();
    if parades.is_empty() {
        let violated = !violated_monitors(net, config, cache, parent, values)?.is_empty();
        return Ok(violated.then_some(parent));
    }

    // What does doing nothing violate? The do-nothing parade comes
    // first in the declaration order.
    let baseline = violated_monitors(net, config, cache, parades[0], values)?;
    if baseline.is_empty() {
        return Ok(None);
    }
    let constrained: std::collections::BTreeSet<usize> =
        baseline.iter().map(|&(monitor, _)| monitor).collect();

    let mut best: Option<(OutageId, f64)> = None;
    for &candidate in &parades {
        if !net.outage(candidate).valid {
            continue;
        }
        // Restricted parades only answer their allowed constraints.
        let allowed = &net.outage(candidate).allowed_constraints;
        if !allowed.is_empty() && !allowed.iter().any(|mid| constrained.contains(&mid.value())) {
            continue;
        }
        let violations = violated_monitors(net, config, cache, candidate, values)?;
        if violations.is_empty() {
            // First alternative that clears everything wins.
            return Ok(Some(candidate));
        }
        let worst = violations
            .iter()
            .map(|(_, row)| {
                let value = row.value(values);
                (value - row.upper).max(row.lower - value)
            })
            .fold(0.0f64, f64::max);
        if best.map(|(_, b)| worst < b).unwrap_or(true) {
            best = Some((candidate, worst));
        }
    }
    Ok(best.map(|(entry, _)| entry))
}

/// The monitored elements this entry violates at the current point, with
/// their ready-to-add constraint rows.
fn violated_monitors(
    net: &Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
    entry: OutageId,
    values: &[f64],
) -> Result<Vec<(usize, ConstraintRow)>, SolverError> {
    let ptdf = cache.for_outage(net, entry)?;
    let outage = net.outage(entry);
    let mut out = Vec::new();
    for (monitor_index, monitor) in net.monitors.iter().enumerate() {
        if monitor.monitor_outage != MonitorKind::Monitored {
            continue;
        }
        let upper = monitor.max_limit(config, Some(outage));
        let lower = monitor.min_limit(config, Some(outage));
        if !upper.is_finite() && !lower.is_finite() {
            continue;
        }
        let (constant, terms) =
            flow_expression(net, ptdf, &monitor.branch_terms, &monitor.hvdc_terms, Some(outage));
        let row = ConstraintRow {
            label: format!("{} on {}", monitor.name, outage.name),
            terms,
            constant,
            lower,
            upper,
        };
        let value = row.value(values);
        if value > upper + EPSILON || value < lower - EPSILON {
            out.push((monitor_index, row));
        }
    }
    Ok(out)
}

/// Assemble the LP from the table and rows, solve with Clarabel, and
/// return the variable values. Binary parade variables are decided
/// outside the LP and excluded here.
fn solve_lp(problem: &DispatchProblem, rows: &[ConstraintRow]) -> Result<Vec<f64>, SolverError> {
    let mut definition = variables!();
    let handles: Vec<good_lp::Variable> = problem
        .variables
        .iter()
        .map(|v| {
            let upper = if v.integer { 0.0 } else { v.upper.max(v.lower) };
            definition.add(variable().min(v.lower.min(upper)).max(upper))
        })
        .collect();

    let mut objective = Expression::default();
    for (spec, handle) in problem.variables.iter().zip(&handles) {
        objective += spec.cost * *handle;
    }

    let mut model = definition.minimise(objective).using(clarabel);
    for row in rows {
        let mut expr = Expression::default();
        for &(index, coeff) in &row.terms {
            expr += coeff * handles[index];
        }
        if row.lower == row.upper && row.lower.is_finite() {
            model = model.with(constraint!(expr == row.upper - row.constant));
            continue;
        }
        if row.upper.is_finite() {
            model = model.with(constraint!(expr.clone() <= row.upper - row.constant));
        }
        if row.lower.is_finite() {
            model = model.with(constraint!(expr >= row.lower - row.constant));
        }
    }

    let solution = model.solve().map_err(|err| match err {
        good_lp::ResolutionError::Infeasible => SolverError::Infeasible {
            trace: rows.iter().map(|r| r.label.clone()).collect(),
        },
        other => SolverError::Internal(other.to_string()),
    })?;
    Ok(handles.iter().map(|h| solution.value(*h)).collect())
}

/// Write the decision back into the live model and fill the aggregate
/// results.
fn write_back(
    net: &mut Network,
    config: &Configuration,
    problem: &DispatchProblem,
    values: &[f64],
    outcome: &mut DispatchOutcome,
) {
    let mut shed_by_load: HashMap<metrix_core::LoadId, f64> = HashMap::new();

    for (spec, &value) in problem.variables.iter().zip(values) {
        if value.abs() <= EPSILON {
            continue;
        }
        match spec.kind {
            VariableKind::GeneratorRaise(gid) => {
                net.generator_mut(gid).output += value;
                outcome.redispatch_up_mw += value;
            }
            VariableKind::GeneratorLower(gid) => {
                net.generator_mut(gid).output -= value;
                outcome.redispatch_down_mw += value;
            }
            VariableKind::LoadShed(lid) => {
                outcome.shed_mw += value;
                shed_by_load.insert(lid, value);
            }
            VariableKind::ShifterRaise(sid) => net.shifter_mut(sid).setpoint += value,
            VariableKind::ShifterLower(sid) => net.shifter_mut(sid).setpoint -= value,
            VariableKind::HvdcRaise(hid) => net.hvdc_mut(hid).setpoint += value,
            VariableKind::HvdcLower(hid) => net.hvdc_mut(hid).setpoint -= value,
            VariableKind::CurativeRaise { outage, action } => {
                record_curative(net, config, outcome, outage, action, value);
            }
            VariableKind::CurativeLower { outage, action } => {
                record_curative(net, config, outcome, outage, action, -value);
            }
            VariableKind::ParadeActivation(_) => {}
        }
    }

    // Per-zone aggregates.
    let mut zones: BTreeMap<i32, ZoneResult> = BTreeMap::new();
    for gen in &net.generators {
        if !gen.on {
            continue;
        }
        let zone = net.nodes[gen.node.value()].zone;
        let entry = zones.entry(zone).or_insert_with(|| ZoneResult {
            zone,
            generation_mw: 0.0,
            load_mw: 0.0,
            shed_mw: 0.0,
        });
        entry.generation_mw += gen.output;
    }
    for load in &net.loads {
        let zone = net.nodes[load.node.value()].zone;
        let entry = zones.entry(zone).or_insert_with(|| ZoneResult {
            zone,
            generation_mw: 0.0,
            load_mw: 0.0,
            shed_mw: 0.0,
        });
        entry.load_mw += load.value;
        entry.shed_mw += shed_by_load.get(&load.id).copied().unwrap_or(0.0);
    }
    outcome.zone_results = zones.into_values().collect();
}

fn record_curative(
    net: &mut Network,
    config: &Configuration,
    outcome: &mut DispatchOutcome,
    outage: OutageId,
    action: usize,
    delta: f64,
) {
    let name = net.outage(outage).name.clone();
    let element = match net.outage(outage).curative_actions[action].element {
        CurativeElement::PhaseShifter(sid) => {
            format!("shifter {}", net.branch(net.shifter(sid).real_branch).name)
        }
        CurativeElement::Hvdc(hid) => format!("hvdc {}", net.hvdc(hid).name),
        CurativeElement::Generator(gid) => format!("generator {}", net.generator(gid).name),
        CurativeElement::Load(lid) => format!("load {}", net.load(lid).name),
    };
    net.outage_mut(outage).curative_pending = true;
    info!(outage = %name, element = %element, delta_mw = delta, "curative action scheduled");
    outcome.curative_activations.push(CurativeActivation {
        outage: name,
        element,
        delta_mw: delta,
    });
    let limit = config.curative_action_limit as usize;
    if limit > 0 && outcome.curative_activations.len() > limit {
        warn!(limit, "curative activations exceed the configured limit");
    }
}

/// Final monitored flows at the solution, and remaining basecase
/// violations (overload mode reports them instead of failing).
fn finalize_flows(
    net: &Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
    values: &[f64],
    outcome: &mut DispatchOutcome,
) -> Result<(), SolverError> {
    let ptdf = cache.base(net)?;
    for monitor in &net.monitors {
        if monitor.monitor_n == MonitorKind::Off && monitor.monitor_outage == MonitorKind::Off {
            continue;
        }
        let (constant, terms) =
            flow_expression(net, ptdf, &monitor.branch_terms, &monitor.hvdc_terms, None);
        let flow = constant + terms.iter().map(|&(i, c)| c * values[i]).sum::<f64>();
        outcome.monitor_flows.push(MonitorFlow {
            element: monitor.name.clone(),
            flow_mw: flow,
        });
        if monitor.monitor_n == MonitorKind::Monitored {
            let limit = monitor.limit_for_flow(config, None, flow);
            if defined(limit.abs()).is_some() && flow.abs() > limit.abs() + EPSILON {
                outcome.violations.push(MonitorViolation {
                    element: monitor.name.clone(),
                    outage: None,
                    flow_mw: flow,
                    limit_mw: limit,
                });
            }
        }
    }
    Ok(())
}

/// Load-flow mode: no optimization, just flows and violations at the
/// given injections.
fn load_flow_outcome(
    net: &mut Network,
    config: &Configuration,
    cache: &mut InfluenceCache,
) -> Result<DispatchOutcome, SolverError> {
    for gen in &mut net.generators {
        gen.output = gen.target;
    }
    let mut outcome = DispatchOutcome::default();
    finalize_flows(net, config, cache, &[], &mut outcome)?;

    // Contingency flows for the monitored pairs.
    for index in 0..net.outages.len() {
        let id = OutageId::new(index);
        if !net.outage(id).valid || net.outage(id).is_parade {
            continue;
        }
        let ptdf = cache.for_outage(net, id)?;
        let outage = net.outage(id);
        for monitor in &net.monitors {
            if monitor.monitor_outage != MonitorKind::Monitored {
                continue;
            }
            let (constant, _) =
                flow_expression(net, ptdf, &monitor.branch_terms, &monitor.hvdc_terms, Some(outage));
            let upper = monitor.max_limit(config, Some(outage));
            let lower = monitor.min_limit(config, Some(outage));
            if constant > upper + EPSILON || constant < lower - EPSILON {
                outcome.violations.push(MonitorViolation {
                    element: monitor.name.clone(),
                    outage: Some(outage.name.clone()),
                    flow_mw: constant,
                    limit_mw: if constant >= 0.0 { upper } else { lower },
                });
            }
        }
    }
    outcome.micro_iterations = 0;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::testkit;

    #[test]
    fn test_two_node_dispatch_covers_load() {
        let (config, mut net) = testkit::two_node();
        // Start from an unbalanced state: the generator must pick up the
        // 100 MW load through its raise variable.
        net.generators[0].cost_up_redispatch = 10.0;
        let mut cache = InfluenceCache::new();
        let outcome = solve_dispatch(&mut net, &config, &mut cache).unwrap();
        assert!((net.generators[0].output - 100.0).abs() < 1e-4);
        assert!(outcome.shed_mw.abs() < 1e-6);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_balanced_ring_needs_no_action() {
        let (config, mut net) = testkit::three_node_ring();
        net.generators[0].cost_up_redispatch = 10.0;
        net.generators[0].cost_down_redispatch = 10.0;
        let mut cache = InfluenceCache::new();
        let outcome = solve_dispatch(&mut net, &config, &mut cache).unwrap();
        assert!(outcome.redispatch_up_mw.abs() < 1e-6);
        assert!(outcome.redispatch_down_mw.abs() < 1e-6);
        // Flows split two thirds / one third around the ring.
        let ca = outcome
            .monitor_flows
            .iter()
            .find(|f| f.element == "CA")
            .unwrap();
        assert!((ca.flow_mw - 200.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_basecase_limit_forces_shedding() {
        let (config, mut net) = testkit::two_node();
        // 100 MW of load behind a 60 MW line: 40 MW must be shed.
        net.generators[0].cost_up_redispatch = 10.0;
        net.monitors[0].limits.max_n = 60.0;
        let mut cache = InfluenceCache::new();
        let outcome = solve_dispatch(&mut net, &config, &mut cache).unwrap();
        assert!((outcome.shed_mw - 40.0).abs() < 1e-3, "shed {}", outcome.shed_mw);
        assert!((net.generators[0].output - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_flow_reports_violations_without_acting() {
        let (mut config, mut net) = testkit::two_node();
        config.computation = ComputationKind::LoadFlow;
        net.generators[0].target = 100.0;
        net.generators[0].output = 100.0;
        net.monitors[0].limits.max_n = 60.0;
        let mut cache = InfluenceCache::new();
        let outcome = solve_dispatch(&mut net, &config, &mut cache).unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].element, "AB");
        // Nothing moved.
        assert!((net.generators[0].output - 100.0).abs() < 1e-9);
    }
}
