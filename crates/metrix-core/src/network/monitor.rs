//! Monitored elements and thermal-limit resolution.
//!
//! A monitored element is either a single branch or a *watched section*, a
//! weighted sum of branch (and HVDC) flows. It carries up to ten limits:
//! five in the forward direction (basecase, outage, complex outage, and the
//! two before-curative variants) and, when the element is asymmetric, five
//! more for the reverse direction. Unset limits hold the [`UNDEFINED`]
//! sentinel and queries fall back along a fixed precedence chain, ending at
//! the basecase limit.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Configuration;
use crate::network::outage::Contingency;
use crate::{BranchId, HvdcId, MonitorId, EPSILON};

/// Sentinel for a limit that has not been set.
pub const UNDEFINED: f64 = f64::INFINITY;

/// `Some(value)` when the limit has been set, `None` for the sentinel.
#[inline]
pub fn defined(value: f64) -> Option<f64> {
    (value != UNDEFINED).then_some(value)
}

/// Monitoring level requested for an element, per network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MonitorKind {
    /// Not watched.
    #[default]
    Off,
    /// Constrained in the dispatch.
    Monitored,
    /// Flow reported, never constrained.
    ResultOnly,
}

impl MonitorKind {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            1 => MonitorKind::Monitored,
            2 => MonitorKind::ResultOnly,
            _ => MonitorKind::Off,
        }
    }
}

/// The limit slots of one direction-aware threshold table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub max_n: f64,
    pub max_outage: f64,
    pub max_outage_complex: f64,
    pub max_before_curative: f64,
    pub max_before_curative_complex: f64,
    /// Reverse-direction limits apply to negative flows when set.
    pub asymmetric: bool,
    pub max_n_reverse: f64,
    pub max_outage_reverse: f64,
    pub max_outage_complex_reverse: f64,
    pub max_before_curative_reverse: f64,
    pub max_before_curative_complex_reverse: f64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            max_n: UNDEFINED,
            max_outage: UNDEFINED,
            max_outage_complex: UNDEFINED,
            max_before_curative: UNDEFINED,
            max_before_curative_complex: UNDEFINED,
            asymmetric: false,
            max_n_reverse: UNDEFINED,
            max_outage_reverse: UNDEFINED,
            max_outage_complex_reverse: UNDEFINED,
            max_before_curative_reverse: UNDEFINED,
            max_before_curative_complex_reverse: UNDEFINED,
        }
    }
}

impl ThresholdSet {
    /// A symmetric table with every forward slot at the same value.
    pub fn uniform(limit: f64) -> Self {
        Self {
            max_n: limit,
            max_outage: limit,
            max_outage_complex: limit,
            max_before_curative: limit,
            max_before_curative_complex: limit,
            ..Self::default()
        }
    }

    /// Overwrite every reverse slot, marking the table asymmetric.
    pub fn set_reverse_uniform(&mut self, limit: f64) {
        self.asymmetric = true;
        self.max_n_reverse = limit;
        self.max_outage_reverse = limit;
        self.max_outage_complex_reverse = limit;
        self.max_before_curative_reverse = limit;
        self.max_before_curative_complex_reverse = limit;
    }

    /// Overwrite every forward slot.
    pub fn set_forward_uniform(&mut self, limit: f64) {
        self.max_n = limit;
        self.max_outage = limit;
        self.max_outage_complex = limit;
        self.max_before_curative = limit;
        self.max_before_curative_complex = limit;
    }
}

/// A thermally constrained element: a branch, or a weighted section.
#[derive(Debug, Clone)]
pub struct MonitoredElement {
    pub id: MonitorId,
    pub name: String,
    pub is_watched_section: bool,

    /// Branch flows entering the watched quantity, with their weights.
    pub branch_terms: Vec<(BranchId, f64)>,
    /// HVDC flows entering the watched quantity, with their weights.
    pub hvdc_terms: Vec<(HvdcId, f64)>,

    pub monitor_n: MonitorKind,
    pub monitor_outage: MonitorKind,

    pub limits: ThresholdSet,
    pub limits_base: ThresholdSet,
}

impl MonitoredElement {
    pub fn new(id: MonitorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_watched_section: false,
            branch_terms: Vec::new(),
            hvdc_terms: Vec::new(),
            monitor_n: MonitorKind::Off,
            monitor_outage: MonitorKind::Off,
            limits: ThresholdSet::default(),
            limits_base: ThresholdSet::default(),
        }
    }

    /// Restore the live limit table from the base shadow.
    pub fn reset(&mut self) {
        self.limits = self.limits_base.clone();
    }

    /// Snapshot the live limit table as the new baseline.
    pub fn commit_base(&mut self) {
        self.limits_base = self.limits.clone();
    }

    /// Upper limit for a flow in the given contingency context.
    ///
    /// Precedence: explicit parade limit, then the complex/normal outage
    /// limit (through the before-curative limit once parades have been
    /// activated, or via the ITAM rule otherwise), and every undefined step
    /// falls back to the basecase limit.
    pub fn max_limit(&self, config: &Configuration, ctx: Option<&Contingency>) -> f64 {
        let t = &self.limits;
        let Some(outage) = ctx else {
            return t.max_n;
        };
        let complex = outage.complex;
        if outage.is_parade {
            let limit = if complex {
                defined(t.max_outage_complex).unwrap_or(t.max_outage)
            } else {
                t.max_outage
            };
            return defined(limit).unwrap_or(t.max_n);
        }
        if outage.parades_activated {
            let limit = if complex {
                defined(t.max_before_curative_complex).unwrap_or(t.max_before_curative)
            } else {
                t.max_before_curative
            };
            return defined(limit).unwrap_or_else(|| {
                defined(t.max_outage).unwrap_or(t.max_n)
            });
        }
        let outage_limit = if complex {
            defined(t.max_outage_complex).unwrap_or(t.max_outage)
        } else {
            t.max_outage
        };
        let before_curative = if complex {
            defined(t.max_before_curative_complex).unwrap_or(t.max_before_curative)
        } else {
            t.max_before_curative
        };
        let resolved = config.itam_threshold(outage_limit, before_curative);
        defined(resolved).unwrap_or(t.max_n)
    }

    /// Lower limit for a flow in the given contingency context.
    ///
    /// Symmetric elements use the negated upper limit. Asymmetric elements
    /// resolve through the reverse-direction slots, each undefined step
    /// falling back to the negated forward resolution.
    pub fn min_limit(&self, config: &Configuration, ctx: Option<&Contingency>) -> f64 {
        let t = &self.limits;
        if !t.asymmetric {
            return -self.max_limit(config, ctx);
        }
        let fallback = |limit: f64| match defined(limit) {
            Some(v) => -v,
            None => -self.max_limit(config, ctx),
        };
        let Some(outage) = ctx else {
            return fallback(t.max_n_reverse);
        };
        let complex = outage.complex;
        if outage.is_parade {
            let limit = if complex {
                defined(t.max_outage_complex_reverse).unwrap_or(t.max_outage_reverse)
            } else {
                t.max_outage_reverse
            };
            return fallback(defined(limit).unwrap_or(t.max_n_reverse));
        }
        if outage.parades_activated {
            let limit = if complex {
                defined(t.max_before_curative_complex_reverse).unwrap_or(t.max_before_curative_reverse)
            } else {
                t.max_before_curative_reverse
            };
            return fallback(defined(limit).unwrap_or(t.max_n_reverse));
        }
        let outage_limit = if complex {
            defined(t.max_outage_complex_reverse).unwrap_or(t.max_outage_reverse)
        } else {
            t.max_outage_reverse
        };
        let before_curative = if complex {
            defined(t.max_before_curative_complex_reverse).unwrap_or(t.max_before_curative_reverse)
        } else {
            t.max_before_curative_reverse
        };
        let resolved = config.itam_threshold(outage_limit, before_curative);
        fallback(defined(resolved).unwrap_or(t.max_n_reverse))
    }

    /// The limit a given flow is checked against: the upper limit for
    /// non-negative flows, the lower one otherwise.
    pub fn limit_for_flow(&self, config: &Configuration, ctx: Option<&Contingency>, flow: f64) -> f64 {
        if flow >= 0.0 {
            self.max_limit(config, ctx)
        } else {
            self.min_limit(config, ctx)
        }
    }

    /// Sanity warnings on the live limit table: non-positive limits, and
    /// outage/before-curative limits more constraining than the state they
    /// precede.
    pub fn check_limits(&self, config: &Configuration) {
        let t = &self.limits;
        if self.monitor_n == MonitorKind::Monitored {
            if let Some(max_n) = defined(t.max_n) {
                if max_n <= 0.0 {
                    warn!(element = %self.name, limit = max_n, "non-positive basecase limit");
                }
            }
        }
        if self.monitor_outage != MonitorKind::Monitored {
            return;
        }
        if defined(t.max_outage).is_some_and(|v| v <= 0.0) {
            warn!(element = %self.name, limit = t.max_outage, "non-positive outage limit");
        }
        if defined(t.max_outage_complex).is_some_and(|v| v <= 0.0) {
            warn!(element = %self.name, limit = t.max_outage_complex, "non-positive complex-outage limit");
        }
        if let (Some(max_n), Some(max_outage)) = (defined(t.max_n), defined(t.max_outage)) {
            if max_outage < max_n - EPSILON {
                warn!(
                    element = %self.name,
                    outage_limit = max_outage,
                    basecase_limit = max_n,
                    "outage limit more constraining than basecase limit"
                );
            }
        }
        if let (Some(max_n), Some(max_complex)) = (defined(t.max_n), defined(t.max_outage_complex)) {
            if max_complex < max_n - EPSILON {
                warn!(
                    element = %self.name,
                    complex_limit = max_complex,
                    basecase_limit = max_n,
                    "complex-outage limit more constraining than basecase limit"
                );
            }
        }
        if config.itam_check {
            if let (Some(before), Some(max_outage)) = (defined(t.max_before_curative), defined(t.max_outage)) {
                if before < max_outage - EPSILON {
                    warn!(
                        element = %self.name,
                        before_curative_limit = before,
                        outage_limit = max_outage,
                        "before-curative limit more constraining than outage limit"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::outage::{Contingency, OutageKind};
    use crate::OutageId;

    fn outage() -> Contingency {
        Contingency::new(OutageId::new(0), OutageKind::LineOnly)
    }

    #[test]
    fn test_basecase_fallback_when_only_n_defined() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_n = 120.0;
        let config = Configuration::default();

        // Any contingency context falls back to the basecase limit.
        let inc = outage();
        assert_eq!(elem.max_limit(&config, None), 120.0);
        assert_eq!(elem.max_limit(&config, Some(&inc)), 120.0);
        assert_eq!(elem.min_limit(&config, Some(&inc)), -120.0);

        let mut parade = outage();
        parade.is_parade = true;
        assert_eq!(elem.max_limit(&config, Some(&parade)), 120.0);
    }

    #[test]
    fn test_outage_limit_takes_over_when_defined() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_n = 100.0;
        elem.limits.max_outage = 130.0;
        let config = Configuration::default();

        let inc = outage();
        assert_eq!(elem.max_limit(&config, None), 100.0);
        assert_eq!(elem.max_limit(&config, Some(&inc)), 130.0);
    }

    #[test]
    fn test_complex_outage_column() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_n = 100.0;
        elem.limits.max_outage = 130.0;
        elem.limits.max_outage_complex = 150.0;
        let config = Configuration::default();

        let mut inc = outage();
        assert_eq!(elem.max_limit(&config, Some(&inc)), 130.0);
        inc.complex = true;
        assert_eq!(elem.max_limit(&config, Some(&inc)), 150.0);
    }

    #[test]
    fn test_itam_precedence() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_outage = 130.0;
        elem.limits.max_before_curative = 110.0;
        let mut config = Configuration::default();

        let inc = outage();
        assert_eq!(elem.max_limit(&config, Some(&inc)), 130.0);
        config.set_itam_check(true);
        assert_eq!(elem.max_limit(&config, Some(&inc)), 110.0);

        // A parade context always uses the outage limit.
        let mut parade = outage();
        parade.is_parade = true;
        assert_eq!(elem.max_limit(&config, Some(&parade)), 130.0);
    }

    #[test]
    fn test_before_curative_once_parades_activated() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_outage = 130.0;
        elem.limits.max_before_curative = 110.0;
        let config = Configuration::default();

        let mut inc = outage();
        inc.parades_activated = true;
        assert_eq!(elem.max_limit(&config, Some(&inc)), 110.0);
    }

    #[test]
    fn test_asymmetric_limits_by_flow_sign() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "HVDC_AC");
        elem.limits = ThresholdSet::uniform(100.0);
        elem.limits.set_reverse_uniform(60.0);
        let config = Configuration::default();

        assert_eq!(elem.limit_for_flow(&config, None, 40.0), 100.0);
        assert_eq!(elem.limit_for_flow(&config, None, -40.0), -60.0);
    }

    #[test]
    fn test_reverse_fallback_to_negated_forward() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_n = 100.0;
        elem.limits.asymmetric = true;
        let config = Configuration::default();
        // No reverse slot set: the lower limit mirrors the forward chain.
        assert_eq!(elem.min_limit(&config, None), -100.0);
    }

    #[test]
    fn test_reset_round_trip() {
        let mut elem = MonitoredElement::new(MonitorId::new(0), "LINE");
        elem.limits.max_n = 100.0;
        elem.commit_base();
        elem.limits.max_n = 75.0;
        elem.limits.max_outage = 90.0;
        elem.reset();
        assert_eq!(elem.limits, elem.limits_base);
        assert_eq!(elem.limits.max_n, 100.0);
        assert_eq!(elem.limits.max_outage, UNDEFINED);
    }
}
