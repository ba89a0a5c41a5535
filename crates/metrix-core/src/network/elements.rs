//! The network entities: nodes, branches, phase-shifters, HVDC links,
//! generators, loads and the coupled-variable groups.
//!
//! Entities follow the shadow-field protocol: `field` is the per-variant
//! workspace, `field_base` the baseline it is restored from. The `reset`
//! helpers restore every shadowed field; `commit_base` snapshots the live
//! values as the new baseline (used only by the base-variant update).

use std::collections::BTreeSet;
use std::f64::consts::PI;

use tracing::{debug, warn};

use crate::network::monitor::UNDEFINED;
use crate::{BranchId, GenId, HvdcId, LoadId, MonitorId, NodeId, ShifterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Real,
    /// Inserted by phase-shifter splitting; carries no load or generation.
    Fictive,
}

/// A connection point. Incidence lists are fixed after construction; the
/// synchronous-component id and the slack flag are rewritten by each
/// connectivity run that selects slacks.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub region: usize,
    pub kind: NodeKind,
    /// Synchronous component this node belongs to.
    pub zone: i32,
    /// Whether this node is the angle reference of its component.
    pub is_slack: bool,

    pub branches: Vec<BranchId>,
    pub shifters: Vec<ShifterId>,
    pub hvdcs: Vec<HvdcId>,
    pub generators: Vec<GenId>,
    pub loads: Vec<LoadId>,
}

impl Node {
    pub fn new(id: NodeId, region: usize, kind: NodeKind) -> Self {
        Self {
            id,
            region,
            kind,
            zone: 0,
            is_slack: false,
            branches: Vec::new(),
            shifters: Vec::new(),
            hvdcs: Vec::new(),
            generators: Vec::new(),
            loads: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Real,
    /// The auxiliary branch inserted in series when a phase-shifter splits
    /// a real branch.
    ShifterAux,
    /// The fictive branch modeling an HVDC link's emulated AC admittance.
    AcEmulation,
}

/// A quadripole: line, transformer or fictive insertion. Both endpoints
/// carry an independent connection flag.
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub kind: BranchKind,
    pub from: NodeId,
    pub to: NodeId,

    /// Per-unit admittance.
    pub admittance: f64,
    pub resistance: f64,
    /// `u_ref² · y`, the factor of the angle↔power conversion.
    pub u2y: f64,

    pub from_closed: bool,
    pub to_closed: bool,
    pub from_closed_base: bool,
    pub to_closed_base: bool,

    /// Whether reclosing this branch cannot create a self-loop.
    pub reconnectable: bool,
    /// The phase-shifter carried by this branch, if any.
    pub shifter: Option<ShifterId>,
    /// The monitored element watching this branch, if any.
    pub monitor: Option<MonitorId>,
}

impl Branch {
    pub fn is_closed(&self) -> bool {
        self.from_closed && self.to_closed
    }

    pub fn open_both(&mut self) {
        self.from_closed = false;
        self.to_closed = false;
    }

    pub fn close_both(&mut self) {
        self.from_closed = true;
        self.to_closed = true;
    }

    /// Restore the endpoint flags from the base shadows.
    pub fn reset_state(&mut self) {
        self.from_closed = self.from_closed_base;
        self.to_closed = self.to_closed_base;
    }

    /// Snapshot the endpoint flags as the new baseline.
    pub fn commit_base_state(&mut self) {
        self.from_closed_base = self.from_closed;
        self.to_closed_base = self.to_closed;
    }
}

/// Control mode of a phase-shifter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShifterControl {
    OutOfService,
    AngleOptimized,
    AngleImposed,
    PowerOptimized,
    PowerImposed,
}

impl ShifterControl {
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(ShifterControl::OutOfService),
            1 => Some(ShifterControl::AngleOptimized),
            2 => Some(ShifterControl::AngleImposed),
            3 => Some(ShifterControl::PowerOptimized),
            4 => Some(ShifterControl::PowerImposed),
            _ => None,
        }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self, ShifterControl::AngleOptimized | ShifterControl::PowerOptimized)
    }
}

/// A phase-shifting transformer, split into its real branch and the
/// auxiliary branch that carries the controllable shift. The setpoint is
/// held internally in apparent power (`angle · π/180 · u²y` of the
/// auxiliary branch).
#[derive(Debug, Clone)]
pub struct PhaseShifter {
    pub id: ShifterId,
    /// The auxiliary branch carrying the shift.
    pub branch: BranchId,
    /// The real branch the shifter was inserted into.
    pub real_branch: BranchId,
    /// Fictive shifters model AC-emulation HVDC links.
    pub is_fictive: bool,

    /// `u²y` of the auxiliary branch, fixed at construction.
    pub u2y: f64,

    pub power_min: f64,
    pub power_max: f64,
    pub setpoint: f64,
    pub setpoint_base: f64,

    pub control: ShifterControl,
    pub curative: bool,

    /// Number of the first tap, for reporting.
    pub low_tap: i64,
    /// Angle of each tap, in degrees.
    pub taps: Vec<f64>,
    /// Preventive tap-deviation limits around the current tap.
    pub tap_down_limit: Option<i64>,
    pub tap_up_limit: Option<i64>,

    /// Contingency indices this shifter may answer curatively.
    pub curative_outages: BTreeSet<usize>,

    // Per-variant workspace.
    pub preventive_var: Option<usize>,
    pub activation_var: Option<usize>,
}

impl PhaseShifter {
    /// Convert a shift angle in degrees to the internal apparent power.
    pub fn angle_to_power(&self, angle: f64) -> f64 {
        angle * PI / 180.0 * self.u2y
    }

    /// Convert the internal apparent power back to a shift angle in
    /// degrees.
    pub fn power_to_angle(&self, power: f64) -> f64 {
        power / self.u2y * 180.0 / PI
    }

    /// Index into `taps` of the tap closest to the given angle.
    pub fn closest_tap(&self, angle: f64) -> usize {
        if self.taps.is_empty() {
            return 0;
        }
        let mut closest = self.taps.len() - 1;
        let mut diff_prev = angle - self.taps[0];
        for j in 1..self.taps.len() {
            let diff = angle - self.taps[j];
            if diff_prev * diff <= 1e-6 {
                closest = if diff_prev.abs() <= diff.abs() { j - 1 } else { j };
                break;
            }
            diff_prev = diff;
        }
        debug!(
            shifter = self.id.value(),
            angle, tap = closest, "closest tap position"
        );
        closest
    }

    /// Upper power bound, tightened by the preventive tap range when one is
    /// set.
    pub fn power_upper_bound(&self) -> f64 {
        let Some(range) = self.tap_up_limit else {
            return self.power_max;
        };
        if self.taps.is_empty() {
            return self.power_max;
        }
        let range = range.max(0) as usize;
        let angle = self.power_to_angle(self.setpoint);
        let current = self.closest_tap(angle);
        let mut tap = (current + range).min(self.taps.len() - 1);
        if self.taps[tap] < angle {
            // taps listed in decreasing order
            tap = current.saturating_sub(range);
        }
        self.angle_to_power(self.taps[tap])
    }

    /// Lower power bound, tightened by the preventive tap range when one is
    /// set.
    pub fn power_lower_bound(&self) -> f64 {
        let Some(range) = self.tap_down_limit else {
            return self.power_min;
        };
        if self.taps.is_empty() {
            return self.power_min;
        }
        let range = range.max(0) as usize;
        let angle = self.power_to_angle(self.setpoint);
        let current = self.closest_tap(angle);
        let mut tap = current.saturating_sub(range);
        if self.taps[tap] > angle {
            tap = (current + range).min(self.taps.len() - 1);
        }
        self.angle_to_power(self.taps[tap])
    }

    pub fn reset(&mut self) {
        self.setpoint = self.setpoint_base;
        self.preventive_var = None;
        self.activation_var = None;
    }

    pub fn commit_base(&mut self) {
        self.setpoint_base = self.setpoint;
    }
}

/// Control mode of an HVDC link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvdcControl {
    OutOfService,
    PowerOptimized,
    PowerImposed,
    AcEmulationOptimized,
    AcEmulation,
}

impl HvdcControl {
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(HvdcControl::OutOfService),
            1 => Some(HvdcControl::PowerOptimized),
            2 => Some(HvdcControl::PowerImposed),
            3 => Some(HvdcControl::AcEmulationOptimized),
            4 => Some(HvdcControl::AcEmulation),
            _ => None,
        }
    }

    pub fn is_emulation(&self) -> bool {
        matches!(self, HvdcControl::AcEmulation | HvdcControl::AcEmulationOptimized)
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self, HvdcControl::PowerOptimized | HvdcControl::AcEmulationOptimized)
    }
}

/// A DC link between two nodes, possibly across synchronous zones.
#[derive(Debug, Clone)]
pub struct HvdcLink {
    pub id: HvdcId,
    pub name: String,
    pub from: NodeId,
    pub to: NodeId,

    pub from_closed: bool,
    pub to_closed: bool,
    pub from_closed_base: bool,
    pub to_closed_base: bool,

    pub power_min: f64,
    pub power_max: f64,
    pub setpoint: f64,
    pub power_min_base: f64,
    pub power_max_base: f64,
    pub setpoint_base: f64,

    pub control: HvdcControl,
    pub curative: bool,

    /// Converter-station loss coefficients, sending and receiving side.
    pub loss_factor_from: f64,
    pub loss_factor_to: f64,
    /// DC cable resistance and voltage, for a-posteriori loss evaluation.
    pub cable_resistance: f64,
    pub cable_voltage_kv: f64,

    /// Fictive branch modeling the emulated AC admittance.
    pub fictive_branch: Option<BranchId>,
    /// Fictive shifter attached to that branch.
    pub fictive_shifter: Option<ShifterId>,

    /// Contingency indices this link may answer curatively.
    pub curative_outages: BTreeSet<usize>,

    // Per-variant workspace.
    pub preventive_var: Option<usize>,
}

impl HvdcLink {
    pub fn is_closed(&self) -> bool {
        self.from_closed && self.to_closed
    }

    pub fn reset(&mut self) {
        self.power_min = self.power_min_base;
        self.power_max = self.power_max_base;
        self.setpoint = self.setpoint_base;
        self.from_closed = self.from_closed_base;
        self.to_closed = self.to_closed_base;
        self.preventive_var = None;
    }

    pub fn commit_base(&mut self) {
        self.power_min_base = self.power_min;
        self.power_max_base = self.power_max;
        self.setpoint_base = self.setpoint;
    }
}

/// When a generator's output may be adjusted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustability {
    None,
    /// Adjustable both in the network-free balance and in redispatch.
    BothPhases,
    /// Adjustable only before the network is considered.
    WithoutNetworkOnly,
    /// Adjustable only by network-aware redispatch.
    WithNetworkOnly,
}

impl Adjustability {
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(Adjustability::None),
            1 => Some(Adjustability::BothPhases),
            2 => Some(Adjustability::WithoutNetworkOnly),
            3 => Some(Adjustability::WithNetworkOnly),
            _ => None,
        }
    }

    /// Participates in the network-free (adequacy/merit-order) phase.
    pub fn without_network(&self) -> bool {
        matches!(self, Adjustability::BothPhases | Adjustability::WithoutNetworkOnly)
    }
}

/// A generation group.
#[derive(Debug, Clone)]
pub struct Generator {
    pub id: GenId,
    pub name: String,
    pub node: NodeId,
    /// Index into the network's generator-kind name table.
    pub kind: usize,
    pub adjustability: Adjustability,

    pub on: bool,
    pub on_base: bool,

    /// Dispatched output.
    pub output: f64,
    /// Target output before network-aware redispatch.
    pub target: f64,
    pub target_base: f64,

    /// Working lower bound: `min(0, pmin_redispatch)`.
    pub pmin: f64,
    /// Lower bound enforced during redispatch.
    pub pmin_redispatch: f64,
    pub pmin_base: f64,
    /// Working upper bound, reserve abatement included.
    pub pmax: f64,
    /// Available maximum in the current variant.
    pub pmax_available: f64,
    pub pmax_available_base: f64,

    /// Frequency-reserve half-band.
    pub half_band: f64,

    pub cost_up: f64,
    pub cost_down: f64,
    pub cost_up_redispatch: f64,
    pub cost_down_redispatch: f64,
    pub cost_up_base: f64,
    pub cost_down_base: f64,
    pub cost_up_redispatch_base: f64,
    pub cost_down_redispatch_base: f64,

    /// Contingency indices this generator may answer curatively.
    pub curative_outages: BTreeSet<usize>,

    // Per-variant workspace.
    pub var_index: Option<usize>,
}

impl Generator {
    /// Whether the engine may move this generator in the given phase.
    pub fn is_adjustable(&self, adequacy: bool) -> bool {
        match self.adjustability {
            Adjustability::None => false,
            Adjustability::WithNetworkOnly => !adequacy,
            Adjustability::WithoutNetworkOnly => adequacy,
            Adjustability::BothPhases => true,
        }
    }

    /// Clamp the target into the working bounds; off generators target
    /// zero. Returns false when the bounds themselves are inconsistent.
    pub fn enforce_bounds(&mut self) -> bool {
        if !self.on {
            self.target = 0.0;
        }
        if self.pmax < self.pmin_redispatch {
            warn!(
                generator = %self.name,
                pmin = self.pmin_redispatch,
                pmax = self.pmax,
                "generator bounds inconsistent"
            );
            return false;
        }
        if self.adjustability != Adjustability::None || self.target != 0.0 {
            if self.target > self.pmax {
                warn!(
                    generator = %self.name,
                    target = self.target,
                    pmax = self.pmax,
                    "target above Pmax, clamping"
                );
                self.target = self.pmax;
            } else if self.target < self.pmin {
                warn!(
                    generator = %self.name,
                    target = self.target,
                    pmin = self.pmin,
                    "target below Pmin, clamping"
                );
                self.target = self.pmin;
            }
        }
        self.output = self.target;
        true
    }

    pub fn reset(&mut self) {
        self.on = self.on_base;
        self.target = self.target_base;
        self.output = self.target_base;
        self.pmin_redispatch = self.pmin_base;
        self.pmin = self.pmin_base.min(0.0);
        self.pmax_available = self.pmax_available_base;
        self.pmax = self.pmax_available_base;
        self.cost_up = self.cost_up_base;
        self.cost_down = self.cost_down_base;
        self.cost_up_redispatch = self.cost_up_redispatch_base;
        self.cost_down_redispatch = self.cost_down_redispatch_base;
        self.var_index = None;
    }

    pub fn commit_base(&mut self) {
        self.on_base = self.on;
        self.target_base = self.target;
        self.pmin_base = self.pmin_redispatch;
        self.pmax_available_base = self.pmax_available;
        self.cost_up_base = self.cost_up;
        self.cost_down_base = self.cost_down;
        self.cost_up_redispatch_base = self.cost_up_redispatch;
        self.cost_down_redispatch_base = self.cost_down_redispatch;
    }
}

/// A consumption attached to one node.
#[derive(Debug, Clone)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub node: NodeId,

    pub value: f64,
    pub value_base: f64,

    /// Fraction of the load the preventive dispatch may shed, in [0, 1].
    pub shed_fraction: f64,
    pub shed_cost: f64,

    /// Fraction available to curative shedding, in [0, 1].
    pub curative_shed_fraction: f64,
    pub curative_shed_cost: f64,
    pub curative_shed_cost_base: f64,

    /// Contingency indices this load may answer curatively.
    pub curative_outages: BTreeSet<usize>,

    // Per-variant workspace.
    pub var_index: Option<usize>,
}

impl Load {
    pub fn sheddable(&self) -> bool {
        self.shed_fraction > 0.0
    }

    pub fn reset(&mut self) {
        self.value = self.value_base;
        self.curative_shed_cost = self.curative_shed_cost_base;
        self.var_index = None;
    }

    pub fn commit_base(&mut self) {
        self.value_base = self.value;
        self.curative_shed_cost_base = self.curative_shed_cost;
    }
}

/// The reference variable linking a coupled generator group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupReference {
    Pmax,
    Pmin,
    Target,
    PmaxMinusTarget,
}

impl GroupReference {
    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            0 => Some(GroupReference::Pmax),
            1 => Some(GroupReference::Pmin),
            2 => Some(GroupReference::Target),
            3 => Some(GroupReference::PmaxMinusTarget),
            _ => None,
        }
    }
}

/// Generators whose adjustments stay proportional to a reference variable.
#[derive(Debug, Clone)]
pub struct CoupledGenerators {
    pub name: String,
    pub reference: GroupReference,
    pub members: BTreeSet<GenId>,
}

/// Loads whose shedding stays proportional.
#[derive(Debug, Clone)]
pub struct CoupledLoads {
    pub name: String,
    pub members: BTreeSet<LoadId>,
}

/// Default curative-shed cost carried before any variant overrides it.
pub(crate) const DEFAULT_CURATIVE_SHED_COST: f64 = UNDEFINED;

#[cfg(test)]
mod tests {
    use super::*;

    fn shifter(u2y: f64) -> PhaseShifter {
        PhaseShifter {
            id: ShifterId::new(0),
            branch: BranchId::new(1),
            real_branch: BranchId::new(0),
            is_fictive: false,
            u2y,
            power_min: -100.0,
            power_max: 100.0,
            setpoint: 0.0,
            setpoint_base: 0.0,
            control: ShifterControl::AngleOptimized,
            curative: false,
            low_tap: 0,
            taps: Vec::new(),
            tap_down_limit: None,
            tap_up_limit: None,
            curative_outages: BTreeSet::new(),
            preventive_var: None,
            activation_var: None,
        }
    }

    #[test]
    fn test_angle_power_round_trip() {
        let td = shifter(3200.0);
        for angle in [-20.0, -3.7, 0.0, 0.01, 12.5] {
            let back = td.power_to_angle(td.angle_to_power(angle));
            assert!((back - angle).abs() < 1e-9, "angle {} came back as {}", angle, back);
        }
    }

    #[test]
    fn test_closest_tap_increasing_schedule() {
        let mut td = shifter(1000.0);
        td.taps = vec![-10.0, -5.0, 0.0, 5.0, 10.0];
        assert_eq!(td.closest_tap(-10.0), 0);
        assert_eq!(td.closest_tap(-7.0), 1);
        assert_eq!(td.closest_tap(2.0), 2);
        assert_eq!(td.closest_tap(4.0), 3);
        assert_eq!(td.closest_tap(60.0), 4);
    }

    #[test]
    fn test_tap_range_tightens_bounds() {
        let mut td = shifter(1000.0);
        td.taps = vec![-10.0, -5.0, 0.0, 5.0, 10.0];
        td.power_min = td.angle_to_power(-10.0);
        td.power_max = td.angle_to_power(10.0);
        td.tap_up_limit = Some(1);
        td.tap_down_limit = Some(1);
        // Setpoint sits on the middle tap: one tap each way.
        assert!((td.power_upper_bound() - td.angle_to_power(5.0)).abs() < 1e-9);
        assert!((td.power_lower_bound() - td.angle_to_power(-5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_generator_bounds_clamping() {
        let mut gen = Generator {
            id: GenId::new(0),
            name: "G1".into(),
            node: NodeId::new(0),
            kind: 0,
            adjustability: Adjustability::BothPhases,
            on: true,
            on_base: true,
            output: 0.0,
            target: 250.0,
            target_base: 250.0,
            pmin: 0.0,
            pmin_redispatch: 0.0,
            pmin_base: 0.0,
            pmax: 200.0,
            pmax_available: 200.0,
            pmax_available_base: 200.0,
            half_band: 0.0,
            cost_up: 10.0,
            cost_down: 1.0,
            cost_up_redispatch: 20.0,
            cost_down_redispatch: 2.0,
            cost_up_base: 10.0,
            cost_down_base: 1.0,
            cost_up_redispatch_base: 20.0,
            cost_down_redispatch_base: 2.0,
            curative_outages: BTreeSet::new(),
            var_index: None,
        };
        assert!(gen.enforce_bounds());
        assert_eq!(gen.target, 200.0);
        assert_eq!(gen.output, 200.0);

        gen.on = false;
        assert!(gen.enforce_bounds());
        assert_eq!(gen.target, 0.0);
    }

    #[test]
    fn test_generator_reset_restores_base() {
        let mut gen = Generator {
            id: GenId::new(0),
            name: "G1".into(),
            node: NodeId::new(0),
            kind: 0,
            adjustability: Adjustability::BothPhases,
            on: true,
            on_base: true,
            output: 80.0,
            target: 80.0,
            target_base: 80.0,
            pmin: 0.0,
            pmin_redispatch: 0.0,
            pmin_base: 0.0,
            pmax: 200.0,
            pmax_available: 200.0,
            pmax_available_base: 200.0,
            half_band: 0.0,
            cost_up: 10.0,
            cost_down: 1.0,
            cost_up_redispatch: 20.0,
            cost_down_redispatch: 2.0,
            cost_up_base: 10.0,
            cost_down_base: 1.0,
            cost_up_redispatch_base: 20.0,
            cost_down_redispatch_base: 2.0,
            curative_outages: BTreeSet::new(),
            var_index: Some(4),
        };
        gen.on = false;
        gen.target = 0.0;
        gen.pmax_available = 120.0;
        gen.cost_up = 99.0;
        gen.reset();
        assert!(gen.on);
        assert_eq!(gen.target, 80.0);
        assert_eq!(gen.pmax_available, 200.0);
        assert_eq!(gen.cost_up, 10.0);
        assert!(gen.var_index.is_none());
    }
}
