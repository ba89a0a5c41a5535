//! Resolution of a parsed variant against a network: entity names become
//! arena ids, tap numbers become setpoint powers, region names become
//! region indices. Unknown entity names are warnings and the delta is
//! skipped; an unknown region is an error because the balance law cannot
//! be applied partially.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use metrix_core::error::VariantError;
use metrix_core::{BranchId, GenId, HvdcId, LoadId, MonitorId, Network, OutageId, ShifterId};

use crate::variant::{CostKind, ThresholdKind, VariantConfig};

/// A variant with every delta resolved to arena ids, ready to apply.
#[derive(Debug, Clone, Default)]
pub struct ResolvedVariant {
    pub num: i32,
    pub unavailable_generators: Vec<GenId>,
    pub generator_targets: Vec<(GenId, f64)>,
    pub generator_pmax: Vec<(GenId, f64)>,
    pub generator_pmin: Vec<(GenId, f64)>,
    pub costs: BTreeMap<CostKind, Vec<(GenId, f64)>>,
    pub loads: Vec<(LoadId, f64)>,
    pub curative_shed_costs: Vec<(LoadId, f64)>,
    pub unavailable_branches: BTreeSet<BranchId>,
    pub hvdc_pmin: Vec<(HvdcId, f64)>,
    pub hvdc_pmax: Vec<(HvdcId, f64)>,
    pub hvdc_setpoints: Vec<(HvdcId, f64)>,
    /// Setpoints already converted from tap numbers to apparent power.
    pub shifter_setpoints: Vec<(ShifterId, f64)>,
    pub thresholds: BTreeMap<ThresholdKind, Vec<(MonitorId, f64)>>,
    /// (region index, target net export)
    pub balances_consumption: Vec<(usize, f64)>,
    pub balances_generation: Vec<(usize, f64)>,
    pub probabilities: Vec<(OutageId, f64)>,
    pub random_order: Vec<GenId>,
}

impl ResolvedVariant {
    /// Whether the variant changes the AC topology.
    pub fn changes_topology(&self) -> bool {
        !self.unavailable_branches.is_empty()
    }
}

pub fn resolve_variant(net: &Network, cfg: &VariantConfig) -> Result<ResolvedVariant, VariantError> {
    let num = cfg.num;
    let mut resolved = ResolvedVariant {
        num,
        ..ResolvedVariant::default()
    };

    let lookup_gen = |name: &str| -> Option<GenId> {
        let id = net.generator_index.get(name).copied();
        if id.is_none() {
            warn!(variant = num, generator = %name, "unknown generator in variant, skipping");
        }
        id
    };
    let lookup_load = |name: &str| -> Option<LoadId> {
        let id = net.load_index.get(name).copied();
        if id.is_none() {
            warn!(variant = num, load = %name, "unknown load in variant, skipping");
        }
        id
    };
    let lookup_hvdc = |name: &str| -> Option<HvdcId> {
        let id = net.hvdc_index.get(name).copied();
        if id.is_none() {
            warn!(variant = num, hvdc = %name, "unknown HVDC link in variant, skipping");
        }
        id
    };

    for name in &cfg.unavailable_generators {
        if let Some(id) = lookup_gen(name) {
            resolved.unavailable_generators.push(id);
        }
    }
    for (name, value) in &cfg.generator_targets {
        if let Some(id) = lookup_gen(name) {
            resolved.generator_targets.push((id, *value));
        }
    }
    for (name, value) in &cfg.generator_pmax {
        if let Some(id) = lookup_gen(name) {
            resolved.generator_pmax.push((id, *value));
        }
    }
    for (name, value) in &cfg.generator_pmin {
        if let Some(id) = lookup_gen(name) {
            resolved.generator_pmin.push((id, *value));
        }
    }
    for (kind, entries) in &cfg.costs {
        let out = resolved.costs.entry(*kind).or_default();
        for (name, value) in entries {
            if let Some(id) = lookup_gen(name) {
                out.push((id, *value));
            }
        }
    }
    for (name, value) in &cfg.loads {
        if let Some(id) = lookup_load(name) {
            resolved.loads.push((id, *value));
        }
    }
    for (name, value) in &cfg.curative_shed_costs {
        if let Some(id) = lookup_load(name) {
            resolved.curative_shed_costs.push((id, *value));
        }
    }
    for name in &cfg.unavailable_branches {
        match net.branch_index.get(name) {
            Some(&id) => {
                resolved.unavailable_branches.insert(id);
            }
            None => warn!(variant = num, branch = %name, "unknown branch in variant, skipping"),
        }
    }
    for (name, value) in &cfg.hvdc_pmin {
        if let Some(id) = lookup_hvdc(name) {
            resolved.hvdc_pmin.push((id, *value));
        }
    }
    for (name, value) in &cfg.hvdc_pmax {
        if let Some(id) = lookup_hvdc(name) {
            resolved.hvdc_pmax.push((id, *value));
        }
    }
    for (name, value) in &cfg.hvdc_setpoints {
        if let Some(id) = lookup_hvdc(name) {
            resolved.hvdc_setpoints.push((id, *value));
        }
    }

    for (name, tap) in &cfg.shifter_taps {
        let Some(&id) = net.shifter_index.get(name) else {
            warn!(variant = num, shifter = %name, "unknown phase-shifter in variant, skipping");
            continue;
        };
        let shifter = net.shifter(id);
        let first = shifter.low_tap;
        if shifter.taps.is_empty() || *tap < first || *tap >= first + shifter.taps.len() as i64 {
            warn!(
                variant = num,
                shifter = %name,
                tap,
                "tap number outside the shifter's schedule, skipping"
            );
            continue;
        }
        let angle = shifter.taps[(tap - first) as usize];
        resolved
            .shifter_setpoints
            .push((id, shifter.angle_to_power(angle)));
    }

    for (kind, entries) in &cfg.thresholds {
        let index = if *kind == ThresholdKind::MaxN || *kind == ThresholdKind::MaxNReverse {
            &net.monitor_n_index
        } else {
            &net.monitor_outage_index
        };
        let out = resolved.thresholds.entry(*kind).or_default();
        for (name, value) in entries {
            match index.get(name) {
                Some(&id) => out.push((id, *value)),
                None => {
                    warn!(variant = num, element = %name, "unknown monitored element in variant, skipping")
                }
            }
        }
    }

    for (name, value) in &cfg.balances_consumption {
        let region = net
            .find_region(name)
            .ok_or_else(|| VariantError::UnknownEntity {
                variant: num,
                kind: "region",
                name: name.clone(),
            })?;
        resolved.balances_consumption.push((region, *value));
    }
    for (name, value) in &cfg.balances_generation {
        let region = net
            .find_region(name)
            .ok_or_else(|| VariantError::UnknownEntity {
                variant: num,
                kind: "region",
                name: name.clone(),
            })?;
        resolved.balances_generation.push((region, *value));
    }

    for (name, value) in &cfg.probabilities {
        match net.outage_index.get(name) {
            Some(&id) => resolved.probabilities.push((id, *value)),
            None => warn!(variant = num, outage = %name, "unknown contingency in variant, skipping"),
        }
    }

    // The recorded shuffle is assertion input: it must name exactly the
    // network's generators, but it never drives the ordering.
    for name in &cfg.random_order {
        let id = net
            .generator_index
            .get(name)
            .copied()
            .ok_or_else(|| VariantError::UnknownEntity {
                variant: num,
                kind: "generator",
                name: name.clone(),
            })?;
        resolved.random_order.push(id);
    }
    if !resolved.random_order.is_empty() && resolved.random_order.len() != net.generators.len() {
        warn!(
            variant = num,
            listed = resolved.random_order.len(),
            expected = net.generators.len(),
            "recorded merit order does not cover every generator"
        );
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::parse_variants;
    use metrix_core::testkit;

    #[test]
    fn test_resolution_maps_names_to_ids() {
        let (_, net) = testkit::three_node_ring();
        let set = parse_variants(
            "NT;1\n\
             0;PRODIM;1;G_C;150\n\
             0;CONELE;1;LOAD_A;120\n\
             0;QUADIN;1;BC\n\
             0;PROBABINC;1;AB;0.02\n",
        )
        .unwrap();
        let resolved = resolve_variant(&net, &set.variants[&0]).unwrap();
        assert_eq!(resolved.generator_targets, vec![(net.generator_index["G_C"], 150.0)]);
        assert_eq!(resolved.loads, vec![(net.load_index["LOAD_A"], 120.0)]);
        assert!(resolved.unavailable_branches.contains(&net.branch_index["BC"]));
        assert_eq!(resolved.probabilities, vec![(net.outage_index["AB"], 0.02)]);
        assert!(resolved.changes_topology());
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let (_, net) = testkit::three_node_ring();
        let set = parse_variants("NT;1\n0;PRODIM;1;NO_SUCH;10\n0;QUADIN;1;NO_LINE\n").unwrap();
        let resolved = resolve_variant(&net, &set.variants[&0]).unwrap();
        assert!(resolved.generator_targets.is_empty());
        assert!(resolved.unavailable_branches.is_empty());
    }

    #[test]
    fn test_unknown_region_is_an_error() {
        let (_, net) = testkit::three_node_ring();
        let set = parse_variants("NT;1\n0;ECHANGP;1;NO_REGION;0\n").unwrap();
        assert!(matches!(
            resolve_variant(&net, &set.variants[&0]),
            Err(VariantError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_threshold_resolution_uses_the_right_index() {
        let (_, net) = testkit::three_node_ring();
        let set = parse_variants("NT;1\n0;QATI00MN;1;CA;60\n0;QATI5MNS;1;CA;80\n").unwrap();
        let resolved = resolve_variant(&net, &set.variants[&0]).unwrap();
        let n = &resolved.thresholds[&ThresholdKind::MaxN];
        let nk = &resolved.thresholds[&ThresholdKind::MaxOutage];
        assert_eq!(n.len(), 1);
        assert_eq!(nk.len(), 1);
        assert_eq!(n[0].0, net.monitor_n_index["CA"]);
    }
}
