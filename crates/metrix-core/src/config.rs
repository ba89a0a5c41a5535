//! Global computation parameters.
//!
//! The original engine kept these behind a process-wide singleton; here the
//! [`Configuration`] is an explicit handle built once and threaded by
//! reference into the network constructor, the variant applier and the
//! solver. All reads are idempotent; the only post-construction mutation is
//! [`Configuration::set_itam_check`], flipped when a variant file carries
//! pre-curative thresholds.

use serde::{Deserialize, Serialize};

use crate::network::monitor::defined;

/// What the engine computes for each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputationKind {
    /// Full optimal power flow with preventive and curative actions.
    #[default]
    OptimalPowerFlow,
    /// Flows only, no optimization.
    LoadFlow,
    /// OPF where with-network redispatch is disabled (adjustabilities are
    /// downgraded at network construction).
    OpfWithoutRedispatch,
    /// OPF that tolerates remaining overloads at a price.
    OpfWithOverload,
}

/// LP/MILP backend selection for the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverBackend {
    /// Interior-point conic solver, the workspace default.
    #[default]
    Clarabel,
}

/// The configuration store: every global knob of a computation.
///
/// Costs are in currency units per MW (or per MWh where noted), powers in
/// MW, the reference voltage in kV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub computation: ComputationKind,
    pub solver: SolverBackend,
    /// Backend used for the cheap preventive feasibility check.
    pub preventive_check_solver: SolverBackend,

    /// Loss factor applied to consumptions, in percent.
    pub loss_factor_percent: f64,
    /// Maximum number of loss-adjustment relaunches per variant.
    pub loss_iteration_limit: u32,
    /// Relaunch threshold on the loss mismatch, in percent.
    pub loss_threshold_percent: u32,

    /// Check the intermediate (before-curative) thermal limits.
    pub itam_check: bool,
    /// Accept contingencies that break connectivity (build a lost pocket
    /// instead of invalidating them).
    pub accept_breaking_outages: bool,
    /// Accept remedial actions that break connectivity on a contingency
    /// that does not.
    pub accept_breaking_parades: bool,
    /// Detect equivalent remedial actions when assembling the problem.
    pub equivalent_parade_detection: bool,

    /// Penalty on phase-shifter angle moves; zero disables the penalty.
    pub shifter_cost: f64,
    /// Penalty on HVDC setpoint moves; zero disables the penalty.
    pub hvdc_cost: f64,
    /// Default cost of preventive load shedding.
    pub failure_cost: f64,
    /// Cost noise amplitude used to break solver degeneracy.
    pub noise_cost: f64,
    /// Offset added to adequacy-phase costs.
    pub adequacy_cost_offset: i64,
    /// Offset added to redispatch-phase costs.
    pub redispatch_cost_offset: i64,
    /// Cost of a threshold-gap variable in the overload computation.
    pub gap_cost: i64,

    /// Reference voltage for admittance scaling, in kV.
    pub u_ref_kv: u32,
    /// Cap on constraint-generation micro-iterations per variant.
    pub micro_iteration_limit: u32,
    /// Maximum number of curative actions per contingency; zero disables
    /// curative optimization.
    pub curative_action_limit: u32,
    /// Maximum number of curative redispatch groups; negative means no
    /// limit.
    pub curative_generator_limit: i32,
    /// Number of worst threats reported per monitored element.
    pub threat_count: u32,
    /// Wall-clock budget for one MILP solve, in seconds; zero means no
    /// budget.
    pub solver_time_limit_secs: u64,

    /// Probability assigned to contingencies that do not carry their own.
    pub outage_probability: f64,
    /// Value of lost load: energy term.
    pub lost_load_energy_cost: f64,
    /// Value of lost load: power term.
    pub lost_load_power_cost: f64,

    /// First variant number to process.
    pub first_variant: i32,
    /// Maximum number of variants to process.
    pub variant_count: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            computation: ComputationKind::OptimalPowerFlow,
            solver: SolverBackend::Clarabel,
            preventive_check_solver: SolverBackend::Clarabel,
            loss_factor_percent: 0.0,
            loss_iteration_limit: 0,
            loss_threshold_percent: 0,
            itam_check: false,
            accept_breaking_outages: false,
            accept_breaking_parades: false,
            equivalent_parade_detection: false,
            shifter_cost: 0.0,
            hvdc_cost: 0.0,
            failure_cost: 13000.0,
            noise_cost: 0.0,
            adequacy_cost_offset: 0,
            redispatch_cost_offset: 0,
            gap_cost: 10,
            u_ref_kv: 400,
            micro_iteration_limit: 17,
            curative_action_limit: 0,
            curative_generator_limit: -1,
            threat_count: 1,
            solver_time_limit_secs: 0,
            outage_probability: 1e-3,
            lost_load_energy_cost: 26000.0,
            lost_load_power_cost: 13000.0,
            first_variant: 0,
            variant_count: usize::MAX,
        }
    }
}

impl Configuration {
    /// Whether curative (post-contingency) actions are optimized at all.
    pub fn use_curative(&self) -> bool {
        self.curative_action_limit > 0
    }

    /// Whether phase-shifter moves are penalized.
    pub fn use_shifter_penalty(&self) -> bool {
        self.shifter_cost > 0.0
    }

    /// Whether HVDC setpoint moves are penalized.
    pub fn use_hvdc_penalty(&self) -> bool {
        self.hvdc_cost > 0.0
    }

    /// Probability-weighted cost of curative energy not served.
    pub fn curative_energy_cost(&self) -> f64 {
        self.lost_load_energy_cost * self.outage_probability
    }

    /// Probability-weighted cost of curative power not served.
    pub fn curative_power_cost(&self) -> f64 {
        self.lost_load_power_cost * self.outage_probability
    }

    /// Force the before-curative (ITAM) threshold check on.
    pub fn set_itam_check(&mut self, value: bool) {
        self.itam_check = value;
    }

    /// Resolve the limit to check against before curative actions take
    /// effect: the pre-curative limit when the ITAM check is enabled and
    /// both limits are defined, else the outage limit.
    pub fn itam_threshold(&self, outage_limit: f64, before_curative_limit: f64) -> f64 {
        if self.itam_check && defined(outage_limit).is_some() && defined(before_curative_limit).is_some() {
            before_curative_limit
        } else {
            outage_limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::monitor::UNDEFINED;

    #[test]
    fn test_itam_threshold_resolution() {
        let mut config = Configuration::default();
        assert_eq!(config.itam_threshold(100.0, 80.0), 100.0);

        config.set_itam_check(true);
        assert_eq!(config.itam_threshold(100.0, 80.0), 80.0);
        // An undefined side disables the ITAM override.
        assert_eq!(config.itam_threshold(100.0, UNDEFINED), 100.0);
        assert_eq!(config.itam_threshold(UNDEFINED, 80.0), UNDEFINED);
    }

    #[test]
    fn test_curative_enabled_by_limit() {
        let mut config = Configuration::default();
        assert!(!config.use_curative());
        config.curative_action_limit = 3;
        assert!(config.use_curative());
    }

    #[test]
    fn test_weighted_lost_load_costs() {
        let config = Configuration {
            outage_probability: 0.01,
            lost_load_energy_cost: 200.0,
            lost_load_power_cost: 100.0,
            ..Configuration::default()
        };
        assert!((config.curative_energy_cost() - 2.0).abs() < 1e-12);
        assert!((config.curative_power_cost() - 1.0).abs() < 1e-12);
    }
}
