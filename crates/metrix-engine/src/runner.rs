//! The variant loop: one engine instance owns the network and processes
//! variants strictly sequentially.
//!
//! Variants run in numeric order, starting at the configured first index
//! and stopping after the configured count. Consecutive variants sharing
//! the same unavailable-branch set form a topology group: the topology
//! (and the influence-cache invalidation it triggers) is applied once per
//! group. Within a variant: apply the deltas, balance, solve, collect
//! the outcome, reset. A variant that cannot be applied is skipped; a
//! solver failure becomes that variant's outcome; either way the next
//! variant starts from the restored base state.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use metrix_core::{BranchId, Configuration, MetrixResult, Network, NetworkInput};
use metrix_scenarios::{
    apply_base_variant, apply_topology, apply_variant, attach_parades, reset_topology,
    reset_variant, resolve_variant, ParadeSet, VariantConfig, VariantSet, BASE_VARIANT,
};
use metrix_solver::{solve_dispatch, InfluenceCache};

use crate::results::VariantReport;

/// The engine: configuration, the network it mutates, and the solver
/// state that survives across variants of one topology.
pub struct VariantEngine {
    pub config: Configuration,
    pub network: Network,
    cache: InfluenceCache,
    rng: StdRng,
}

impl VariantEngine {
    /// Build the network and seed the deterministic tie-break generator.
    pub fn new(config: Configuration, input: &NetworkInput) -> MetrixResult<Self> {
        let network = Network::build(&config, input)?;
        Ok(Self {
            config,
            network,
            cache: InfluenceCache::new(),
            rng: StdRng::seed_from_u64(1),
        })
    }

    /// One-time preparation: force the ITAM check when the variant file
    /// carries before-curative limits, rewrite the base state from the
    /// base variant, sanity-check the limits, and attach the parades.
    pub fn prepare(&mut self, variants: &VariantSet, parades: &ParadeSet) -> MetrixResult<()> {
        if variants.itam_forced {
            self.config.set_itam_check(true);
        }
        if let Some(base) = variants.base() {
            let resolved = resolve_variant(&self.network, base)?;
            if let Err(err) = apply_base_variant(&mut self.network, &self.config, &resolved) {
                warn!(error = %err, "base variant application failed, continuing on the partial base");
            }
        }
        for monitor in &self.network.monitors {
            monitor.check_limits(&self.config);
        }
        attach_parades(&mut self.network, &self.config, parades);
        Ok(())
    }

    /// Process the variants in numeric order and return one report each.
    pub fn run(&mut self, variants: &VariantSet) -> Vec<VariantReport> {
        let mut reports = Vec::new();
        let mut processed = 0usize;
        let mut current_topology: BTreeSet<BranchId> = BTreeSet::new();

        for (&num, cfg) in &variants.variants {
            if num == BASE_VARIANT || num < self.config.first_variant {
                continue;
            }
            if processed >= self.config.variant_count {
                break;
            }
            processed += 1;
            let report = self.run_variant(num, cfg, &mut current_topology);
            reports.push(report);
        }

        if !current_topology.is_empty() {
            let last = std::mem::take(&mut current_topology);
            if let Err(err) = reset_topology(&mut self.network, &self.config, &last, BASE_VARIANT) {
                warn!(error = %err, "failed to restore the base topology after the last group");
            }
        }
        info!(variants = reports.len(), "variant processing finished");
        reports
    }

    fn run_variant(
        &mut self,
        num: i32,
        cfg: &VariantConfig,
        current_topology: &mut BTreeSet<BranchId>,
    ) -> VariantReport {
        let resolved = match resolve_variant(&self.network, cfg) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(variant = num, error = %err, "variant skipped");
                return VariantReport::skipped(num, err);
            }
        };

        // Topology groups: switch only when the unavailable-branch set
        // changes.
        if resolved.unavailable_branches != *current_topology {
            if !current_topology.is_empty() {
                let previous = std::mem::take(current_topology);
                if let Err(err) =
                    reset_topology(&mut self.network, &self.config, &previous, num)
                {
                    warn!(variant = num, error = %err, "failed to restore the base topology");
                    return VariantReport::skipped(num, err);
                }
            }
            if !resolved.unavailable_branches.is_empty() {
                match apply_topology(
                    &mut self.network,
                    &self.config,
                    &resolved.unavailable_branches,
                    num,
                ) {
                    Ok(()) => {
                        *current_topology = resolved.unavailable_branches.clone();
                    }
                    Err(err) => {
                        warn!(variant = num, error = %err, "variant topology rejected");
                        let _ = reset_topology(
                            &mut self.network,
                            &self.config,
                            &resolved.unavailable_branches,
                            num,
                        );
                        return VariantReport::skipped(num, err);
                    }
                }
            }
        }

        if let Err(err) = apply_variant(&mut self.network, &resolved, &mut self.rng) {
            warn!(variant = num, error = %err, "variant invalidated during application");
            reset_variant(&mut self.network, &resolved, false);
            return VariantReport::skipped(num, err);
        }

        let report = match solve_dispatch(&mut self.network, &self.config, &mut self.cache) {
            Ok(outcome) => VariantReport::solved(num, outcome),
            Err(err) => {
                warn!(variant = num, error = %err, "solver failed on variant");
                VariantReport::failed(num, err)
            }
        };
        reset_variant(&mut self.network, &resolved, false);
        report
    }
}
