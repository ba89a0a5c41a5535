//! The reversible variant protocol: apply deltas in a fixed order,
//! balance zones, and restore the base state afterwards.
//!
//! Apply order: generator unavailabilities and bound overrides (with the
//! frequency-reserve update), imposed outputs, load values, costs,
//! curative-shed costs, zonal balance by consumption, HVDC bounds and
//! setpoints (mirrored into the AC-emulation monitors), phase-shifter
//! setpoints, threshold overrides, contingency probabilities, topology,
//! and finally the merit-order zonal balance.
//!
//! The base variant (−1) goes through [`apply_base_variant`] instead,
//! which rewrites the base shadows so subsequent variants see a new base.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use metrix_core::error::VariantError;
use metrix_core::{
    BranchId, Configuration, GenId, Network, OutageId, ShifterControl, EPSILON_BALANCE,
};

use crate::resolve::ResolvedVariant;
use crate::variant::{CostKind, ThresholdKind};

/// Apply every non-topological delta of the variant, then re-balance the
/// zones it targets. Topology deltas go through [`apply_topology`].
pub fn apply_variant(
    net: &mut Network,
    var: &ResolvedVariant,
    rng: &mut StdRng,
) -> Result<(), VariantError> {
    // Generator unavailabilities and bound overrides; track the capacity
    // removed from the frequency-reserve pool.
    let mut lost_capacity = 0.0;
    for &gid in &var.unavailable_generators {
        let gen = net.generator_mut(gid);
        if gen.adjustability.without_network() {
            lost_capacity += gen.pmax_available;
        }
        gen.on = false;
    }
    for &(gid, value) in &var.generator_pmax {
        let gen = net.generator_mut(gid);
        if gen.adjustability.without_network() {
            lost_capacity += gen.pmax_available_base - value;
        }
        gen.pmax_available = value;
        gen.pmax = value;
        debug!(variant = var.num, generator = %gen.name, pmax = value, "Pmax override");
    }
    for &(gid, value) in &var.generator_pmin {
        net.generator_mut(gid).pmin_redispatch = value;
    }
    if (!var.unavailable_generators.is_empty() || !var.generator_pmax.is_empty())
        && net.generator_outages_present
    {
        net.update_pmax_for_reserve(lost_capacity);
    }

    // Imposed outputs.
    for &(gid, value) in &var.generator_targets {
        let gen = net.generator_mut(gid);
        gen.target = value;
        debug!(variant = var.num, generator = %gen.name, target = value, "imposed output");
    }

    // Load values.
    for &(lid, value) in &var.loads {
        net.load_mut(lid).value = value;
    }

    // Cost overrides.
    for (kind, entries) in &var.costs {
        for &(gid, value) in entries {
            let gen = net.generator_mut(gid);
            match kind {
                CostKind::UpWithoutNetwork => gen.cost_up = value,
                CostKind::DownWithoutNetwork => gen.cost_down = value,
                CostKind::UpRedispatch => gen.cost_up_redispatch = value,
                CostKind::DownRedispatch => gen.cost_down_redispatch = value,
            }
        }
    }
    for &(lid, value) in &var.curative_shed_costs {
        net.load_mut(lid).curative_shed_cost = value;
    }

    apply_consumption_balances(net, var)?;
    apply_hvdc_deltas(net, var)?;

    // Phase-shifter setpoints.
    for &(sid, value) in &var.shifter_setpoints {
        if net.shifter(sid).control == ShifterControl::OutOfService {
            warn!(variant = var.num, shifter = sid.value(), "setpoint on an out-of-service shifter, skipping");
            continue;
        }
        net.shifter_mut(sid).setpoint = value;
    }

    // Threshold overrides.
    for (kind, entries) in &var.thresholds {
        for &(mid, value) in entries {
            set_threshold(net, mid, *kind, value);
        }
    }

    // Contingency probabilities.
    for &(oid, value) in &var.probabilities {
        net.outage_mut(oid).probability = value;
    }

    apply_generation_balances(net, var, rng)
}

/// Zonal balance by consumption: scale every load of the region so the
/// zone's net export meets the target. Requires the region to carry no
/// adjustable generation.
fn apply_consumption_balances(net: &mut Network, var: &ResolvedVariant) -> Result<(), VariantError> {
    for &(region, target) in &var.balances_consumption {
        let mut balance = 0.0;
        for gen in &net.generators {
            if net.nodes[gen.node.value()].region != region || !gen.on {
                continue;
            }
            if gen.adjustability.without_network() {
                // This law assumes the zone's generation is imposed.
                return Err(VariantError::ImposedGroupInBalance {
                    variant: var.num,
                    generator: gen.name.clone(),
                });
            }
            balance += gen.output;
        }
        let mut load_sum = 0.0;
        for load in &net.loads {
            if net.nodes[load.node.value()].region != region {
                continue;
            }
            balance -= load.value;
            load_sum += load.value;
        }
        debug!(variant = var.num, region, target, balance, "balance by consumption");
        if balance - target == 0.0 {
            continue;
        }
        let scale = (balance - target) / load_sum;
        for load in &mut net.loads {
            if net.nodes[load.node.value()].region == region {
                load.value += load.value * scale;
            }
        }
    }
    Ok(())
}

fn apply_hvdc_deltas(net: &mut Network, var: &ResolvedVariant) -> Result<(), VariantError> {
    for &(hid, value) in &var.hvdc_pmin {
        net.hvdc_mut(hid).power_min = value;
        let monitor = emulation_monitor(net, hid);
        if let Some(mid) = monitor {
            net.monitored_mut(mid).limits.set_reverse_uniform(-value);
        }
    }
    for &(hid, value) in &var.hvdc_pmax {
        net.hvdc_mut(hid).power_max = value;
        let monitor = emulation_monitor(net, hid);
        if let Some(mid) = monitor {
            net.monitored_mut(mid).limits.set_forward_uniform(value);
        }
    }
    for &(hid, value) in &var.hvdc_setpoints {
        net.hvdc_mut(hid).setpoint = value;
    }
    // Setpoints must stay within the (possibly updated) bounds.
    for link in &net.hvdcs {
        if link.setpoint < link.power_min || link.setpoint > link.power_max {
            return Err(VariantError::HvdcSetpointOutOfBounds {
                variant: var.num,
                name: link.name.clone(),
            });
        }
    }
    Ok(())
}

/// The monitored element of an AC-emulation link's fictive branch.
fn emulation_monitor(net: &Network, hid: metrix_core::HvdcId) -> Option<metrix_core::MonitorId> {
    net.hvdc(hid)
        .fictive_branch
        .and_then(|b| net.branch(b).monitor)
}

fn set_threshold(net: &mut Network, mid: metrix_core::MonitorId, kind: ThresholdKind, value: f64) {
    let limits = &mut net.monitored_mut(mid).limits;
    match kind {
        ThresholdKind::MaxN => limits.max_n = value,
        ThresholdKind::MaxOutage => limits.max_outage = value,
        ThresholdKind::MaxOutageComplex => limits.max_outage_complex = value,
        ThresholdKind::MaxBeforeCurative => limits.max_before_curative = value,
        ThresholdKind::MaxBeforeCurativeComplex => limits.max_before_curative_complex = value,
        ThresholdKind::MaxNReverse => {
            limits.asymmetric = true;
            limits.max_n_reverse = value;
        }
        ThresholdKind::MaxOutageReverse => {
            limits.asymmetric = true;
            limits.max_outage_reverse = value;
        }
        ThresholdKind::MaxOutageComplexReverse => {
            limits.asymmetric = true;
            limits.max_outage_complex_reverse = value;
        }
        ThresholdKind::MaxBeforeCurativeReverse => {
            limits.asymmetric = true;
            limits.max_before_curative_reverse = value;
        }
        ThresholdKind::MaxBeforeCurativeComplexReverse => {
            limits.asymmetric = true;
            limits.max_before_curative_complex_reverse = value;
        }
    }
}

/// Merit-order zonal balance: sort the region's adjustable generators by
/// the relevant network-free cost and absorb the imbalance, lowering
/// toward Pmin or raising toward Pmax. Ties follow the seeded shuffle.
fn apply_generation_balances(
    net: &mut Network,
    var: &ResolvedVariant,
    rng: &mut StdRng,
) -> Result<(), VariantError> {
    // Re-derive the working Pmin and clamp targets for every generator.
    let mut ok = true;
    for gen in &mut net.generators {
        gen.pmin = gen.pmin_redispatch.min(0.0);
        ok &= gen.enforce_bounds();
    }
    if !ok {
        return Err(VariantError::InconsistentGeneratorBounds { variant: var.num });
    }

    for &(region, target) in &var.balances_generation {
        let participants: Vec<GenId> = match net.merit_order_cache.get(&region) {
            Some(cached) => cached.clone(),
            None => {
                let mut participants: Vec<GenId> = net
                    .generators
                    .iter()
                    .filter(|g| {
                        g.on && net.nodes[g.node.value()].region == region
                            && g.adjustability.without_network()
                    })
                    .map(|g| g.id)
                    .collect();
                participants.shuffle(rng);
                net.merit_order_cache.insert(region, participants.clone());
                participants
            }
        };

        let mut balance: f64 = net
            .generators
            .iter()
            .filter(|g| g.on && net.nodes[g.node.value()].region == region)
            .map(|g| g.target)
            .sum();
        let load_sum: f64 = net
            .loads
            .iter()
            .filter(|l| net.nodes[l.node.value()].region == region)
            .map(|l| l.value)
            .sum();
        balance -= load_sum;
        let mut delta = balance - target;
        debug!(variant = var.num, region, target, balance, "balance by merit order");

        if delta > 0.0 {
            // Too much generation: lower the cheapest-to-lower first.
            let mut order = participants.clone();
            order.sort_by(|&a, &b| {
                net.generator(a)
                    .cost_down
                    .partial_cmp(&net.generator(b).cost_down)
                    .unwrap_or(Ordering::Equal)
            });
            for gid in order {
                let gen = net.generator_mut(gid);
                let available = (gen.target - gen.pmin).max(0.0);
                if available <= delta {
                    gen.target = gen.pmin;
                    gen.output = gen.target;
                    delta -= available;
                } else {
                    gen.target -= delta;
                    gen.output = gen.target;
                    delta = 0.0;
                    break;
                }
            }
        } else if delta < 0.0 {
            // Not enough generation: stack the cheapest-to-raise first.
            let mut order = participants.clone();
            order.sort_by(|&a, &b| {
                net.generator(a)
                    .cost_up
                    .partial_cmp(&net.generator(b).cost_up)
                    .unwrap_or(Ordering::Equal)
            });
            for gid in order {
                let gen = net.generator_mut(gid);
                let headroom = (gen.target - gen.pmax).min(0.0);
                if headroom >= delta {
                    gen.target = gen.pmax;
                    gen.output = gen.target;
                    delta -= headroom;
                } else {
                    gen.target -= delta;
                    gen.output = gen.target;
                    delta = 0.0;
                    break;
                }
            }
        }

        if delta.abs() > EPSILON_BALANCE {
            return Err(VariantError::BalanceUnreachable {
                variant: var.num,
                region: net.regions[region].clone(),
                residual: delta,
            });
        }
    }
    Ok(())
}

/// Open the variant's unavailable branches and re-run the connectivity
/// analysis: slacks are re-elected, pockets recomputed, contingencies that
/// now break connectivity invalidated for this variant.
pub fn apply_topology(
    net: &mut Network,
    config: &Configuration,
    branches: &BTreeSet<BranchId>,
    variant: i32,
) -> Result<(), VariantError> {
    if branches.is_empty() {
        return Ok(());
    }
    for &b in branches {
        net.branch_mut(b).open_both();
    }
    refresh_topology(net, config, variant, false)
}

fn refresh_topology(
    net: &mut Network,
    config: &Configuration,
    variant: i32,
    commit_base: bool,
) -> Result<(), VariantError> {
    net.influence_stale = true;
    net.clear_slacks();
    match net.check_connectivity(true) {
        Ok(true) => {}
        Ok(false) => return Err(VariantError::Disconnected { variant }),
        Err(err) => {
            warn!(variant, error = %err, "connectivity analysis failed after topology change");
            return Err(VariantError::Disconnected { variant });
        }
    }

    net.breaking_outages.clear();
    for index in 0..net.outages.len() {
        let id = OutageId::new(index);
        let outage = net.outage(id);
        if !outage.valid {
            continue;
        }
        if outage.branches.is_empty() && outage.closings.is_empty() && outage.hvdcs.is_empty() {
            continue;
        }
        let detail = if outage.is_parade {
            let parent = outage.parent.expect("parade without parent");
            net.outage(parent).pocket.is_some() || config.accept_breaking_parades
        } else {
            config.accept_breaking_outages
        };
        net.check_outage_connectivity(id, detail, config);
        if !net.outage(id).valid {
            warn!(variant, outage = %net.outage(id).name, "contingency ignored: it breaks connectivity under this topology");
            if commit_base {
                net.outage_mut(id).valid_base = false;
            }
        }
    }
    Ok(())
}

/// Restore the base topology and every contingency's base validity, and
/// recompute the pockets of the entries that were breaking connectivity.
pub fn reset_topology(
    net: &mut Network,
    config: &Configuration,
    branches: &BTreeSet<BranchId>,
    variant: i32,
) -> Result<(), VariantError> {
    if branches.is_empty() {
        return Ok(());
    }
    for &b in branches {
        net.branch_mut(b).reset_state();
    }
    net.influence_stale = true;
    net.clear_slacks();
    match net.check_connectivity(true) {
        Ok(true) => {}
        Ok(false) => return Err(VariantError::Disconnected { variant }),
        Err(err) => {
            warn!(error = %err, "connectivity analysis failed while restoring the base topology");
            return Err(VariantError::Disconnected { variant });
        }
    }

    for index in 0..net.outages.len() {
        let id = OutageId::new(index);
        if net.outage(id).valid != net.outage(id).valid_base {
            let valid_base = net.outage(id).valid_base;
            net.outage_mut(id).valid = valid_base;
            if net.outage(id).pocket.is_some() {
                let detail = outage_detail(net, config, id);
                net.check_outage_connectivity(id, detail, config);
            }
        }
    }

    let previous: Vec<OutageId> = std::mem::take(&mut net.breaking_outages);
    for id in previous {
        let detail = outage_detail(net, config, id);
        net.check_outage_connectivity(id, detail, config);
    }
    Ok(())
}

fn outage_detail(net: &Network, config: &Configuration, id: OutageId) -> bool {
    let outage = net.outage(id);
    if outage.is_parade {
        let parent = outage.parent.expect("parade without parent");
        net.outage(parent).pocket.is_some() || config.accept_breaking_parades
    } else {
        config.accept_breaking_outages
    }
}

/// Restore every field the variant touched from its base shadow, then
/// clear the per-variant workspace (curative activations, variable
/// indices, merit-order cache). With `all_loads`, every load is restored
/// regardless of what the variant touched.
pub fn reset_variant(net: &mut Network, var: &ResolvedVariant, all_loads: bool) {
    for &gid in &var.unavailable_generators {
        let gen = net.generator_mut(gid);
        gen.on = gen.on_base;
        gen.target = gen.target_base;
        gen.output = gen.target_base;
    }
    for &(gid, _) in &var.generator_pmax {
        let gen = net.generator_mut(gid);
        gen.pmax_available = gen.pmax_available_base;
        gen.pmax = gen.pmax_available_base;
        gen.target = gen.target_base;
        gen.output = gen.target_base;
    }
    for &(gid, _) in &var.generator_pmin {
        let gen = net.generator_mut(gid);
        gen.pmin_redispatch = gen.pmin_base;
        gen.pmin = gen.pmin_base.min(0.0);
        gen.target = gen.target_base;
        gen.output = gen.target_base;
    }
    if (!var.unavailable_generators.is_empty() || !var.generator_pmax.is_empty())
        && net.generator_outages_present
    {
        net.update_pmax_for_reserve(0.0);
    }
    for &(gid, _) in &var.generator_targets {
        let gen = net.generator_mut(gid);
        gen.target = gen.target_base;
        gen.output = gen.target_base;
    }
    if !all_loads {
        for &(lid, _) in &var.loads {
            let load = net.load_mut(lid);
            load.value = load.value_base;
        }
    }
    for &(region, _) in &var.balances_consumption {
        for load in &mut net.loads {
            if net.nodes[load.node.value()].region == region {
                load.value = load.value_base;
            }
        }
    }
    for &(lid, _) in &var.curative_shed_costs {
        let load = net.load_mut(lid);
        load.curative_shed_cost = load.curative_shed_cost_base;
    }
    for (kind, entries) in &var.costs {
        for &(gid, _) in entries {
            let gen = net.generator_mut(gid);
            match kind {
                CostKind::UpWithoutNetwork => gen.cost_up = gen.cost_up_base,
                CostKind::DownWithoutNetwork => gen.cost_down = gen.cost_down_base,
                CostKind::UpRedispatch => gen.cost_up_redispatch = gen.cost_up_redispatch_base,
                CostKind::DownRedispatch => gen.cost_down_redispatch = gen.cost_down_redispatch_base,
            }
        }
    }

    let mut touched_hvdcs: BTreeSet<metrix_core::HvdcId> = BTreeSet::new();
    for &(hid, _) in var
        .hvdc_pmin
        .iter()
        .chain(&var.hvdc_pmax)
        .chain(&var.hvdc_setpoints)
    {
        touched_hvdcs.insert(hid);
    }
    for hid in touched_hvdcs {
        let link = net.hvdc_mut(hid);
        link.power_min = link.power_min_base;
        link.power_max = link.power_max_base;
        link.setpoint = link.setpoint_base;
        let monitor = emulation_monitor(net, hid);
        if let Some(mid) = monitor {
            net.monitored_mut(mid).reset();
        }
    }

    for &(sid, _) in &var.shifter_setpoints {
        let shifter = net.shifter_mut(sid);
        shifter.setpoint = shifter.setpoint_base;
    }

    let mut touched_monitors: BTreeSet<metrix_core::MonitorId> = BTreeSet::new();
    for entries in var.thresholds.values() {
        for &(mid, _) in entries {
            touched_monitors.insert(mid);
        }
    }
    for mid in touched_monitors {
        net.monitored_mut(mid).reset();
    }

    for &(region, _) in &var.balances_generation {
        for gen in &mut net.generators {
            if net.nodes[gen.node.value()].region == region {
                gen.target = gen.target_base;
                gen.output = gen.target_base;
            }
        }
    }

    for &(oid, _) in &var.probabilities {
        let outage = net.outage_mut(oid);
        outage.probability = outage.probability_base;
    }

    if all_loads {
        for load in &mut net.loads {
            load.value = load.value_base;
        }
    }

    // Per-variant workspace.
    for outage in &mut net.outages {
        outage.reset_variant_state();
    }
    for gen in &mut net.generators {
        gen.var_index = None;
    }
    for load in &mut net.loads {
        load.var_index = None;
    }
    for shifter in &mut net.shifters {
        shifter.preventive_var = None;
        shifter.activation_var = None;
    }
    for hvdc in &mut net.hvdcs {
        hvdc.preventive_var = None;
    }
    net.merit_order_cache.clear();
}

/// Apply the base variant: same deltas, but the base shadows themselves
/// are rewritten, so every subsequent variant resets to the new baseline.
pub fn apply_base_variant(
    net: &mut Network,
    config: &Configuration,
    var: &ResolvedVariant,
) -> Result<(), VariantError> {
    for &gid in &var.unavailable_generators {
        let without_network = net.generator(gid).adjustability.without_network();
        if without_network {
            net.max_available_generation -= net.generator(gid).pmax_available;
        }
        let gen = net.generator_mut(gid);
        gen.on = false;
        gen.on_base = false;
    }
    for &(lid, value) in &var.loads {
        let load = net.load_mut(lid);
        load.value = value;
        load.value_base = value;
    }
    for &(gid, value) in &var.generator_targets {
        let gen = net.generator_mut(gid);
        gen.target = value;
        gen.target_base = value;
        gen.output = value;
    }
    for &(gid, value) in &var.generator_pmax {
        if net.generator(gid).adjustability.without_network() {
            net.max_available_generation -= net.generator(gid).pmax_available_base - value;
        }
        let gen = net.generator_mut(gid);
        gen.pmax_available_base = value;
        gen.pmax_available = value;
        gen.pmax = value;
    }
    for &(gid, value) in &var.generator_pmin {
        let gen = net.generator_mut(gid);
        gen.pmin_base = value;
        gen.pmin_redispatch = value;
        gen.pmin = value.min(0.0);
    }
    for (kind, entries) in &var.costs {
        for &(gid, value) in entries {
            let gen = net.generator_mut(gid);
            match kind {
                CostKind::UpWithoutNetwork => {
                    gen.cost_up = value;
                    gen.cost_up_base = value;
                }
                CostKind::DownWithoutNetwork => {
                    gen.cost_down = value;
                    gen.cost_down_base = value;
                }
                CostKind::UpRedispatch => {
                    gen.cost_up_redispatch = value;
                    gen.cost_up_redispatch_base = value;
                }
                CostKind::DownRedispatch => {
                    gen.cost_down_redispatch = value;
                    gen.cost_down_redispatch_base = value;
                }
            }
        }
    }
    for &(lid, value) in &var.curative_shed_costs {
        let load = net.load_mut(lid);
        load.curative_shed_cost = value;
        load.curative_shed_cost_base = value;
    }

    apply_hvdc_deltas(net, var)?;
    let mut touched_hvdcs: BTreeSet<metrix_core::HvdcId> = BTreeSet::new();
    for &(hid, _) in var
        .hvdc_pmin
        .iter()
        .chain(&var.hvdc_pmax)
        .chain(&var.hvdc_setpoints)
    {
        touched_hvdcs.insert(hid);
    }
    for hid in touched_hvdcs {
        net.hvdc_mut(hid).commit_base();
        let monitor = emulation_monitor(net, hid);
        if let Some(mid) = monitor {
            net.monitored_mut(mid).commit_base();
        }
    }

    for &(sid, value) in &var.shifter_setpoints {
        let shifter = net.shifter_mut(sid);
        shifter.setpoint = value;
        shifter.setpoint_base = value;
    }

    for (kind, entries) in &var.thresholds {
        for &(mid, value) in entries {
            set_threshold(net, mid, *kind, value);
        }
    }
    let mut touched_monitors: BTreeSet<metrix_core::MonitorId> = BTreeSet::new();
    for entries in var.thresholds.values() {
        for &(mid, _) in entries {
            touched_monitors.insert(mid);
        }
    }
    for mid in touched_monitors {
        net.monitored_mut(mid).commit_base();
    }

    for &(oid, value) in &var.probabilities {
        let outage = net.outage_mut(oid);
        outage.probability = value;
        outage.probability_base = value;
    }

    if !var.unavailable_branches.is_empty() {
        for &b in &var.unavailable_branches {
            let branch = net.branch_mut(b);
            branch.open_both();
            branch.commit_base_state();
            debug!(branch = %branch.name, "branch unavailable in the base case");
        }
        refresh_topology(net, config, var.num, true)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve_variant;
    use crate::variant::parse_variants;
    use metrix_core::testkit;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1)
    }

    fn resolved(net: &Network, text: &str, num: i32) -> ResolvedVariant {
        let set = parse_variants(text).unwrap();
        resolve_variant(net, &set.variants[&num]).unwrap()
    }

    #[test]
    fn test_merit_order_balance_reaches_target() {
        let (_, mut net) = testkit::three_node_ring();
        // Lower the region's export from 0 to -50: the generator absorbs.
        let var = resolved(&net, "NT;1\n0;ECHANGP;1;R1;-50\n", 0);
        apply_variant(&mut net, &var, &mut rng()).unwrap();
        let gen = &net.generators[0];
        assert!((gen.target - 50.0).abs() < 1e-9);
        // Residual balance within tolerance.
        let balance = gen.target - net.total_load();
        assert!((balance - (-50.0)).abs() <= EPSILON_BALANCE);
    }

    #[test]
    fn test_merit_order_unreachable_balance_fails() {
        let (_, mut net) = testkit::three_node_ring();
        // Asking for 500 MW of export with 200 MW of capacity cannot work.
        let var = resolved(&net, "NT;1\n0;ECHANGP;1;R1;500\n", 0);
        let err = apply_variant(&mut net, &var, &mut rng()).unwrap_err();
        assert!(matches!(err, VariantError::BalanceUnreachable { .. }));
    }

    #[test]
    fn test_merit_order_prefers_cheaper_generator() {
        let (_, mut net) = testkit::three_node_ring();
        // Add a second generator at node B with a higher raise cost.
        let cheap = net.generators[0].id;
        let mut expensive = net.generators[0].clone();
        expensive.id = metrix_core::GenId::new(1);
        expensive.name = "G_B".into();
        expensive.node = net.nodes[1].id;
        expensive.target = 0.0;
        expensive.target_base = 0.0;
        expensive.cost_up = 50.0;
        expensive.cost_up_base = 50.0;
        net.generator_index.insert("G_B".into(), expensive.id);
        net.nodes[1].generators.push(expensive.id);
        net.generators.push(expensive);
        net.generators[cheap.value()].cost_up = 10.0;
        net.generators[cheap.value()].cost_up_base = 10.0;

        // Raise the export target: the cheap generator fills first.
        let var = resolved(&net, "NT;1\n0;ECHANGP;1;R1;50\n", 0);
        apply_variant(&mut net, &var, &mut rng()).unwrap();
        assert!((net.generators[cheap.value()].target - 150.0).abs() < 1e-9);
        assert!((net.generators[1].target - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_consumption_balance_scales_loads() {
        let (_, mut net) = testkit::three_node_ring();
        // The law requires a zone without adjustable generation.
        net.generators[0].adjustability = metrix_core::Adjustability::None;
        let var = resolved(&net, "NT;1\n0;ECHANG;1;R1;20\n", 0);
        apply_variant(&mut net, &var, &mut rng()).unwrap();
        // Export target 20 with 100 MW generation: loads scale to 80.
        assert!((net.loads[0].value - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_consumption_balance_rejects_adjustable_zone() {
        let (_, mut net) = testkit::three_node_ring();
        let var = resolved(&net, "NT;1\n0;ECHANG;1;R1;20\n", 0);
        let err = apply_variant(&mut net, &var, &mut rng()).unwrap_err();
        assert!(matches!(err, VariantError::ImposedGroupInBalance { .. }));
    }

    #[test]
    fn test_reset_round_trip_restores_base() {
        let (_, mut net) = testkit::three_node_ring();
        let base_target = net.generators[0].target;
        let base_load = net.loads[0].value;
        let base_limits = net.monitors[0].limits.clone();

        let var = resolved(
            &net,
            "NT;1\n\
             0;PRODIN;1;G_C\n\
             0;CONELE;1;LOAD_A;87\n\
             0;CTORDR;1;G_C;42\n\
             0;QATI00MN;1;AB;64\n\
             0;PROBABINC;1;AB;0.5\n",
            0,
        );
        // The variant switches the only generator off, so the balance
        // step clamps targets but no balance law runs.
        apply_variant(&mut net, &var, &mut rng()).unwrap();
        assert!(!net.generators[0].on);
        assert_eq!(net.loads[0].value, 87.0);
        assert_eq!(net.monitors[0].limits.max_n, 64.0);

        reset_variant(&mut net, &var, false);
        let gen = &net.generators[0];
        assert!(gen.on);
        assert_eq!(gen.target, base_target);
        assert_eq!(gen.cost_up, 0.0);
        assert_eq!(net.loads[0].value, base_load);
        assert_eq!(net.monitors[0].limits, base_limits);
        assert_eq!(net.outages[0].probability, net.outages[0].probability_base);
    }

    #[test]
    fn test_noop_variant_changes_nothing() {
        let (_, mut net) = testkit::three_node_ring();
        let before: Vec<f64> = net.generators.iter().map(|g| g.target).collect();
        let loads: Vec<f64> = net.loads.iter().map(|l| l.value).collect();
        let var = resolved(&net, "NT;1\n3\n", 3);
        apply_variant(&mut net, &var, &mut rng()).unwrap();
        reset_variant(&mut net, &var, false);
        let after: Vec<f64> = net.generators.iter().map(|g| g.target).collect();
        let loads_after: Vec<f64> = net.loads.iter().map(|l| l.value).collect();
        assert_eq!(before, after);
        assert_eq!(loads, loads_after);
    }

    #[test]
    fn test_topology_apply_and_reset() {
        let (config, mut net) = testkit::three_node_ring();
        let var = resolved(&net, "NT;1\n0;QUADIN;1;BC\n", 0);
        apply_topology(&mut net, &config, &var.unavailable_branches, var.num).unwrap();
        let bc = net.branch_index["BC"];
        assert!(!net.branch(bc).is_closed());
        assert!(net.influence_stale);
        // Contingency AB now splits the network: with breaking
        // contingencies refused, it is invalidated for this variant.
        let ab = net.outage_index["AB"];
        assert!(!net.outage(ab).valid);

        reset_topology(&mut net, &config, &var.unavailable_branches, var.num).unwrap();
        assert!(net.branch(bc).is_closed());
        assert!(net.outage(ab).valid);
    }

    #[test]
    fn test_topology_disconnecting_variant_fails() {
        let (config, mut net) = testkit::three_node_ring();
        let var = resolved(&net, "NT;1\n0;QUADIN;2;AB;CA\n", 0);
        let err = apply_topology(&mut net, &config, &var.unavailable_branches, var.num).unwrap_err();
        assert!(matches!(err, VariantError::Disconnected { .. }));
    }

    #[test]
    fn test_base_variant_rewrites_shadows() {
        let (config, mut net) = testkit::three_node_ring();
        let var = resolved(
            &net,
            "NT;1\n\
             -1;CONELE;1;LOAD_A;150\n\
             -1;PRODIM;1;G_C;150\n\
             -1;QATI5MNS;1;CA;75\n",
            -1,
        );
        apply_base_variant(&mut net, &config, &var).unwrap();
        assert_eq!(net.loads[0].value_base, 150.0);
        assert_eq!(net.generators[0].target_base, 150.0);
        let ca = net.monitor_outage_index["CA"];
        assert_eq!(net.monitored(ca).limits_base.max_outage, 75.0);

        // A later variant resets to the new baseline.
        let var2 = resolved(&net, "NT;1\n0;CONELE;1;LOAD_A;60\n", 0);
        apply_variant(&mut net, &var2, &mut rng()).unwrap();
        assert_eq!(net.loads[0].value, 60.0);
        reset_variant(&mut net, &var2, false);
        assert_eq!(net.loads[0].value, 150.0);
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let (_, mut net_a) = testkit::three_node_ring();
        let (_, mut net_b) = testkit::three_node_ring();
        let var_a = resolved(&net_a, "NT;1\n0;ECHANGP;1;R1;-10\n", 0);
        let var_b = var_a.clone();
        apply_variant(&mut net_a, &var_a, &mut rng()).unwrap();
        apply_variant(&mut net_b, &var_b, &mut rng()).unwrap();
        let targets_a: Vec<f64> = net_a.generators.iter().map(|g| g.target).collect();
        let targets_b: Vec<f64> = net_b.generators.iter().map(|g| g.target).collect();
        assert_eq!(targets_a, targets_b);
    }
}
