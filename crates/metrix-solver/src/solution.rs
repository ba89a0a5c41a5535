//! Typed dispatch results surfaced to the caller and the result writer.

use serde::Serialize;

/// One curative lever scheduled for a contingency.
#[derive(Debug, Clone, Serialize)]
pub struct CurativeActivation {
    pub outage: String,
    pub element: String,
    /// Signed post-contingency adjustment.
    pub delta_mw: f64,
}

/// A thermal limit left violated (load-flow and overload modes).
#[derive(Debug, Clone, Serialize)]
pub struct MonitorViolation {
    pub element: String,
    /// `None` for a basecase violation.
    pub outage: Option<String>,
    pub flow_mw: f64,
    pub limit_mw: f64,
}

/// Per-synchronous-zone aggregate of the dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneResult {
    pub zone: i32,
    pub generation_mw: f64,
    pub load_mw: f64,
    pub shed_mw: f64,
}

/// Final flow on a monitored element.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorFlow {
    pub element: String,
    pub flow_mw: f64,
}

/// The dispatch decision for one variant.
#[derive(Debug, Default, Serialize)]
pub struct DispatchOutcome {
    /// Objective value of the last solve.
    pub cost: f64,
    pub redispatch_up_mw: f64,
    pub redispatch_down_mw: f64,
    pub shed_mw: f64,
    pub monitor_flows: Vec<MonitorFlow>,
    pub zone_results: Vec<ZoneResult>,
    pub curative_activations: Vec<CurativeActivation>,
    /// Parades retained by the dispatch, `(contingency, parade)`.
    pub activated_parades: Vec<(String, String)>,
    pub violations: Vec<MonitorViolation>,
    /// Constraint-generation rounds used.
    pub micro_iterations: u32,
}
