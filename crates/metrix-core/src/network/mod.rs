//! The typed network model and its construction from the flat input.
//!
//! Construction follows a fixed order: nodes, branches (with their
//! monitored elements and initially open branches), phase-shifter
//! insertion, HVDC links (with AC-emulation fictive equipment), generators
//! and loads, full-network connectivity, contingencies (validated one by
//! one against connectivity), the frequency-reserve check, watched
//! sections, detailed-result bindings, and finally the curative wiring.

pub mod elements;
pub mod monitor;
pub mod outage;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::f64::consts::PI;

pub use elements::{
    Adjustability, Branch, BranchKind, CoupledGenerators, CoupledLoads, Generator, GroupReference,
    HvdcControl, HvdcLink, Load, Node, NodeKind, PhaseShifter, ShifterControl,
};

use tracing::{debug, info, warn};

use crate::config::{ComputationKind, Configuration};
use crate::error::ConfigError;
use crate::input::NetworkInput;
use crate::network::monitor::{MonitorKind, MonitoredElement, ThresholdSet};
use crate::network::outage::{Contingency, CurativeAction, CurativeElement, OutageKind};
use crate::{BranchId, GenId, HvdcId, LoadId, MonitorId, NodeId, OutageId, ShifterId, EPSILON, K_SPLIT};

/// The network: arenas of entities plus the name indexes and the
/// computation-wide bookkeeping the variant engine mutates.
#[derive(Debug, Default)]
pub struct Network {
    pub regions: Vec<String>,
    pub nodes: Vec<Node>,
    pub branches: Vec<Branch>,
    pub shifters: Vec<PhaseShifter>,
    pub hvdcs: Vec<HvdcLink>,
    pub generators: Vec<Generator>,
    pub loads: Vec<Load>,
    pub monitors: Vec<MonitoredElement>,
    /// Contingencies first, parades appended behind them.
    pub outages: Vec<Contingency>,

    pub branch_index: HashMap<String, BranchId>,
    pub generator_index: HashMap<String, GenId>,
    pub load_index: HashMap<String, LoadId>,
    /// Phase-shifters are looked up by the name of their real branch.
    pub shifter_index: HashMap<String, ShifterId>,
    pub hvdc_index: HashMap<String, HvdcId>,
    /// Real contingencies only; parades are reachable through their parent.
    pub outage_index: HashMap<String, OutageId>,
    pub monitor_n_index: HashMap<String, MonitorId>,
    pub monitor_outage_index: HashMap<String, MonitorId>,
    /// Elements whose contingency flow is reported but never constrained.
    pub result_only_monitors: Vec<MonitorId>,

    pub generator_kinds: Vec<String>,
    pub gen_groups: Vec<CoupledGenerators>,
    pub load_groups: Vec<CoupledLoads>,
    pub fictive_shifters: Vec<ShifterId>,

    /// Slack node of each synchronous zone, keyed by zone number.
    pub slack_by_zone: BTreeMap<i32, NodeId>,
    /// Contingencies (and parades) that island the network.
    pub breaking_outages: Vec<OutageId>,
    /// Branch → contingencies whose post-outage flow on it is reported.
    pub detailed_flow_outages: BTreeMap<BranchId, BTreeSet<OutageId>>,
    /// Branch name → contingencies with detailed marginal variations.
    pub detailed_marginal_outages: BTreeMap<String, BTreeSet<OutageId>>,

    /// Node count before fictive insertions.
    pub real_node_count: usize,
    pub outage_count_without_parades: usize,
    /// Whether any contingency trips generation (enables the
    /// frequency-reserve abatement).
    pub generator_outages_present: bool,
    /// Total frequency-reserve half-band.
    pub reserve_half_band: f64,
    /// Total available generation from adequacy-adjustable groups.
    pub max_available_generation: f64,
    pub preventive_actions_possible: bool,

    /// Set when the topology changed and influence coefficients must be
    /// recomputed.
    pub influence_stale: bool,
    /// Merit-order participant cache, keyed by region; cleared on reset.
    pub merit_order_cache: BTreeMap<usize, Vec<GenId>>,
}

impl Network {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.value()]
    }

    pub fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id.value()]
    }

    pub fn branch_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.branches[id.value()]
    }

    pub fn shifter(&self, id: ShifterId) -> &PhaseShifter {
        &self.shifters[id.value()]
    }

    pub fn shifter_mut(&mut self, id: ShifterId) -> &mut PhaseShifter {
        &mut self.shifters[id.value()]
    }

    pub fn hvdc(&self, id: HvdcId) -> &HvdcLink {
        &self.hvdcs[id.value()]
    }

    pub fn hvdc_mut(&mut self, id: HvdcId) -> &mut HvdcLink {
        &mut self.hvdcs[id.value()]
    }

    pub fn generator(&self, id: GenId) -> &Generator {
        &self.generators[id.value()]
    }

    pub fn generator_mut(&mut self, id: GenId) -> &mut Generator {
        &mut self.generators[id.value()]
    }

    pub fn load(&self, id: LoadId) -> &Load {
        &self.loads[id.value()]
    }

    pub fn load_mut(&mut self, id: LoadId) -> &mut Load {
        &mut self.loads[id.value()]
    }

    pub fn monitored(&self, id: MonitorId) -> &MonitoredElement {
        &self.monitors[id.value()]
    }

    pub fn monitored_mut(&mut self, id: MonitorId) -> &mut MonitoredElement {
        &mut self.monitors[id.value()]
    }

    pub fn outage(&self, id: OutageId) -> &Contingency {
        &self.outages[id.value()]
    }

    pub fn outage_mut(&mut self, id: OutageId) -> &mut Contingency {
        &mut self.outages[id.value()]
    }

    pub fn find_region(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r == name)
    }

    /// Total consumption currently carried by the model.
    pub fn total_load(&self) -> f64 {
        self.loads.iter().map(|l| l.value).sum()
    }

    /// Whether a curative action's element can still act.
    pub fn curative_is_valid(&self, action: &CurativeAction) -> bool {
        match action.element {
            CurativeElement::PhaseShifter(id) => {
                self.branch(self.shifter(id).real_branch).is_closed()
            }
            CurativeElement::Hvdc(id) => self.hvdc(id).is_closed(),
            CurativeElement::Generator(id) => self.generator(id).on,
            CurativeElement::Load(id) => self.load(id).value > 0.0,
        }
    }

    /// The preventive variable the curative action deviates from.
    pub fn curative_preventive_var(&self, action: &CurativeAction) -> Option<usize> {
        match action.element {
            CurativeElement::PhaseShifter(id) => self.shifter(id).preventive_var,
            CurativeElement::Hvdc(id) => self.hvdc(id).preventive_var,
            CurativeElement::Generator(id) => self.generator(id).var_index,
            CurativeElement::Load(id) => self.load(id).var_index,
        }
    }

    /// Synchronous zone of the curative action's element; `None` for HVDC
    /// links, which live between zones.
    pub fn curative_zone(&self, action: &CurativeAction) -> Option<i32> {
        match action.element {
            CurativeElement::PhaseShifter(id) => {
                Some(self.node(self.branch(self.shifter(id).real_branch).from).zone)
            }
            CurativeElement::Hvdc(_) => None,
            CurativeElement::Generator(id) => Some(self.node(self.generator(id).node).zone),
            CurativeElement::Load(id) => Some(self.node(self.load(id).node).zone),
        }
    }

    /// Recompute the reserve-abated Pmax of every adequacy-adjustable
    /// generator. `lost_capacity` is the available generation removed by
    /// the current variant relative to the base case.
    pub fn update_pmax_for_reserve(&mut self, lost_capacity: f64) {
        let denominator = self.max_available_generation - lost_capacity;
        for gen in &mut self.generators {
            if !gen.on || !gen.adjustability.without_network() {
                continue;
            }
            gen.pmax = gen.pmax_available * (1.0 - self.reserve_half_band / denominator);
        }
    }

    /// Build the network from the configuration and the flat input.
    pub fn build(config: &Configuration, input: &NetworkInput) -> Result<Self, ConfigError> {
        input.validate()?;

        let mut net = Network {
            influence_stale: true,
            ..Network::default()
        };

        // Regions and nodes.
        net.regions = input.region_names.iter().map(|r| r.trim().to_string()).collect();
        let node_count = input.node_count();
        net.real_node_count = node_count;
        for (i, &region) in input.node_regions.iter().enumerate() {
            let region = (region - 1).max(0) as usize;
            net.nodes.push(Node::new(NodeId::new(i), region, NodeKind::Real));
        }

        net.build_branches(config, input)?;
        net.build_shifters(input)?;
        net.build_hvdcs(config, input)?;
        net.build_generators(config, input)?;
        net.build_loads(config, input)?;

        // Full-network connectivity with slack selection.
        if !net.check_connectivity(true)? {
            return Err(ConfigError::Disconnected);
        }

        let max_generation_loss = net.build_outages(config, input)?;
        net.check_reserve(max_generation_loss)?;
        net.build_sections(input)?;
        net.build_result_bindings(input);
        net.wire_curative_actions();
        net.build_coupling_groups(input)?;

        let valid = net.outages.iter().filter(|o| o.valid).count();
        info!(
            nodes = net.nodes.len(),
            branches = net.branches.len(),
            generators = net.generators.len(),
            loads = net.loads.len(),
            shifters = net.shifters.len(),
            hvdcs = net.hvdcs.len(),
            outages = net.outages.len(),
            valid_outages = valid,
            zones = net.slack_by_zone.len(),
            "network constructed"
        );

        Ok(net)
    }

    fn build_branches(&mut self, config: &Configuration, input: &NetworkInput) -> Result<(), ConfigError> {
        let u_ref = config.u_ref_kv as f64;
        let node_count = self.nodes.len() as i64;

        for i in 0..input.branch_count() {
            let name = input.branch_names[i].trim().to_string();
            let from = input.branch_from[i];
            let to = input.branch_to[i];
            if from <= 0 || to <= 0 || from > node_count || to > node_count {
                return Err(ConfigError::BadIndex {
                    key: "TNNORQUA",
                    element: name,
                });
            }
            let from = NodeId::new((from - 1) as usize);
            let to = NodeId::new((to - 1) as usize);
            let y = input.branch_admittance[i];
            let u2y = u_ref * u_ref * y;

            if y.abs() < 1e-5 {
                warn!(branch = %name, admittance = y, "very small branch admittance");
            }
            if u2y > 6_000_000.0 {
                warn!(branch = %name, admittance = y, "very large branch admittance");
            }

            let id = BranchId::new(self.branches.len());
            let mut branch = Branch {
                id,
                name: name.clone(),
                kind: BranchKind::Real,
                from,
                to,
                admittance: y,
                resistance: input.branch_resistance[i],
                u2y,
                from_closed: true,
                to_closed: true,
                from_closed_base: true,
                to_closed_base: true,
                reconnectable: from != to,
                shifter: None,
                monitor: None,
            };
            if from == to {
                // self-loop: held open
                warn!(branch = %name, "branch loops on itself, holding it open");
                branch.open_both();
                branch.commit_base_state();
            }
            if self.branch_index.insert(name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateName(name));
            }
            self.nodes[from.value()].branches.push(id);
            if to != from {
                self.nodes[to.value()].branches.push(id);
            }

            // Attach a monitored element when either state is watched.
            let flag_n = input.branch_monitor_n[i];
            let flag_outage = input.branch_monitor_outage[i];
            if flag_n != 0 || flag_outage != 0 {
                let mid = MonitorId::new(self.monitors.len());
                let mut elem = MonitoredElement::new(mid, name.clone());
                elem.branch_terms.push((id, 1.0));
                elem.monitor_n = MonitorKind::from_flag(flag_n);
                elem.monitor_outage = MonitorKind::from_flag(flag_outage);
                if elem.monitor_n == MonitorKind::Monitored {
                    self.monitor_n_index.insert(name.clone(), mid);
                }
                match elem.monitor_outage {
                    MonitorKind::Monitored => {
                        self.monitor_outage_index.insert(name.clone(), mid);
                    }
                    MonitorKind::ResultOnly => self.result_only_monitors.push(mid),
                    MonitorKind::Off => {}
                }
                branch.monitor = Some(mid);
                self.monitors.push(elem);
            }

            self.branches.push(branch);
        }

        // Initially open branches.
        for &index in &input.open_branches {
            if index <= 0 || index as usize > self.branches.len() {
                return Err(ConfigError::BadIndex {
                    key: "OPENBRAN",
                    element: index.to_string(),
                });
            }
            let branch = &mut self.branches[(index - 1) as usize];
            branch.open_both();
            branch.commit_base_state();
            debug!(branch = %branch.name, "branch initially open");
        }
        Ok(())
    }

    /// Insert a phase-shifter in series into `real_branch`: a fictive node
    /// and an auxiliary branch take over the origin side, and the
    /// admittance is split so the series combination stays unchanged.
    #[allow(clippy::too_many_arguments)]
    fn insert_shifter(
        &mut self,
        real_branch: BranchId,
        base_value: f64,
        min_value: f64,
        max_value: f64,
        control: ShifterControl,
        curative: bool,
        is_fictive: bool,
        low_tap: i64,
        taps: Vec<f64>,
    ) -> Result<ShifterId, ConfigError> {
        let real_name = self.branch(real_branch).name.clone();
        let origin = self.branch(real_branch).from;
        let region = self.node(origin).region;

        let fictive_node = NodeId::new(self.nodes.len());
        self.nodes.push(Node::new(fictive_node, region, NodeKind::Fictive));

        let aux_id = BranchId::new(self.branches.len());
        let aux = Branch {
            id: aux_id,
            name: format!("{}_Td", real_name),
            kind: BranchKind::ShifterAux,
            from: origin,
            to: fictive_node,
            admittance: self.branch(real_branch).admittance / K_SPLIT,
            resistance: 0.0,
            u2y: self.branch(real_branch).u2y / K_SPLIT,
            from_closed: true,
            to_closed: true,
            from_closed_base: true,
            to_closed_base: true,
            reconnectable: true,
            shifter: None,
            monitor: None,
        };
        let aux_u2y = aux.u2y;
        self.branch_index.insert(aux.name.clone(), aux_id);
        self.branches.push(aux);

        // Rewire: the fictive node takes over the real branch's origin.
        let origin_node = &mut self.nodes[origin.value()];
        origin_node.branches.retain(|&b| b != real_branch);
        origin_node.branches.push(aux_id);
        let fictive = &mut self.nodes[fictive_node.value()];
        fictive.branches.push(aux_id);
        fictive.branches.push(real_branch);

        {
            let real = self.branch_mut(real_branch);
            real.from = fictive_node;
            real.admittance /= 1.0 - K_SPLIT;
            real.u2y /= 1.0 - K_SPLIT;
        }

        let id = ShifterId::new(self.shifters.len());
        let angle_to_power = |angle: f64| angle * PI / 180.0 * aux_u2y;
        let (setpoint, power_min, power_max) = match control {
            ShifterControl::OutOfService => (0.0, 0.0, 0.0),
            ShifterControl::AngleOptimized => (
                angle_to_power(base_value),
                angle_to_power(min_value),
                angle_to_power(max_value),
            ),
            ShifterControl::AngleImposed => {
                let p = angle_to_power(base_value);
                (p, p, p)
            }
            ShifterControl::PowerOptimized => (base_value, min_value, max_value),
            ShifterControl::PowerImposed => (base_value, base_value, base_value),
        };
        if matches!(control, ShifterControl::PowerOptimized | ShifterControl::PowerImposed) {
            // Power control bypasses the fictive admittance path.
            let aux = self.branch_mut(aux_id);
            aux.open_both();
            aux.commit_base_state();
        }
        if setpoint < power_min || setpoint > power_max {
            return Err(ConfigError::SetpointOutOfBounds { name: real_name });
        }

        let shifter = PhaseShifter {
            id,
            branch: aux_id,
            real_branch,
            is_fictive,
            u2y: aux_u2y,
            power_min,
            power_max,
            setpoint,
            setpoint_base: setpoint,
            control,
            curative,
            low_tap,
            taps,
            tap_down_limit: None,
            tap_up_limit: None,
            curative_outages: BTreeSet::new(),
            preventive_var: None,
            activation_var: None,
        };
        self.branch_mut(aux_id).shifter = Some(id);
        self.shifter_index.insert(real_name, id);
        for node in [origin, fictive_node] {
            self.nodes[node.value()].shifters.push(id);
        }
        self.shifters.push(shifter);
        Ok(id)
    }

    fn build_shifters(&mut self, input: &NetworkInput) -> Result<(), ConfigError> {
        let mut tap_cursor = 0usize;
        let mut curative_cursor = 0usize;

        for i in 0..input.shifter_branch.len() {
            let branch_ref = input.shifter_branch[i];
            if branch_ref <= 0 || branch_ref as usize > input.branch_count() {
                return Err(ConfigError::BadIndex {
                    key: "DTTRDEQU",
                    element: branch_ref.to_string(),
                });
            }
            let real_branch = BranchId::new((branch_ref - 1) as usize);
            let real_name = self.branch(real_branch).name.clone();
            let control = ShifterControl::from_flag(input.shifter_control[i])
                .ok_or_else(|| ConfigError::BadShifterControl(real_name.clone()))?;
            if control.is_optimized() {
                self.preventive_actions_possible = true;
            }

            let tap_count = input.shifter_tap_count.get(i).copied().unwrap_or(0).max(0) as usize;
            let taps: Vec<f64> =
                input.shifter_tap_angles[tap_cursor..tap_cursor + tap_count].to_vec();
            tap_cursor += tap_count;
            let low_tap = if tap_count > 0 {
                input.shifter_low_tap.get(i).copied().unwrap_or(-1)
            } else {
                -1
            };

            let id = self.insert_shifter(
                real_branch,
                input.shifter_base_value[i],
                input.shifter_min_value[i],
                input.shifter_max_value[i],
                control,
                false,
                false,
                low_tap,
                taps,
            )?;

            let curative_count = input
                .shifter_curative_counts
                .get(i)
                .copied()
                .unwrap_or(0)
                .max(0) as usize;
            if curative_count > 0 {
                let shifter = self.shifter_mut(id);
                shifter.curative = true;
                for k in 0..curative_count {
                    shifter
                        .curative_outages
                        .insert(input.shifter_curative_outages[curative_cursor + k] as usize);
                }
                curative_cursor += curative_count;
            }
        }

        // Preventive tap-range limits, (branch id, taps) pairs.
        for pair in input.shifter_tap_lower_range.chunks(2) {
            if pair.len() < 2 || pair[0] == -1 {
                break;
            }
            let name = self.branches[(pair[0] - 1) as usize].name.clone();
            if let Some(&sid) = self.shifter_index.get(&name) {
                self.shifter_mut(sid).tap_down_limit = Some(pair[1]);
            }
        }
        for pair in input.shifter_tap_upper_range.chunks(2) {
            if pair.len() < 2 || pair[0] == -1 {
                break;
            }
            let name = self.branches[(pair[0] - 1) as usize].name.clone();
            if let Some(&sid) = self.shifter_index.get(&name) {
                self.shifter_mut(sid).tap_up_limit = Some(pair[1]);
            }
        }
        Ok(())
    }

    fn build_hvdcs(&mut self, config: &Configuration, input: &NetworkInput) -> Result<(), ConfigError> {
        let u_ref = config.u_ref_kv as f64;
        let outage_count = input.outage_count();
        let mut emulation_cursor = 0usize;
        let mut curative_cursor = 0usize;

        for i in 0..input.hvdc_names.len() {
            let name = input.hvdc_names[i].trim().to_string();
            let from = input.hvdc_from[i];
            let to = input.hvdc_to[i];
            if from <= 0 || to <= 0 || from as usize > self.real_node_count || to as usize > self.real_node_count {
                return Err(ConfigError::BadIndex {
                    key: "DCNORQUA",
                    element: name,
                });
            }
            let from = NodeId::new((from - 1) as usize);
            let to = NodeId::new((to - 1) as usize);
            let control = HvdcControl::from_flag(input.hvdc_control[i]).unwrap_or(HvdcControl::OutOfService);
            if control == HvdcControl::PowerOptimized {
                self.preventive_actions_possible = true;
            }

            let id = HvdcId::new(self.hvdcs.len());
            let link = HvdcLink {
                id,
                name: name.clone(),
                from,
                to,
                from_closed: true,
                to_closed: true,
                from_closed_base: true,
                to_closed_base: true,
                power_min: input.hvdc_pmin[i],
                power_max: input.hvdc_pmax[i],
                setpoint: input.hvdc_setpoint[i],
                power_min_base: input.hvdc_pmin[i],
                power_max_base: input.hvdc_pmax[i],
                setpoint_base: input.hvdc_setpoint[i],
                control,
                curative: false,
                loss_factor_from: input.hvdc_loss_from.get(i).copied().unwrap_or(0.0),
                loss_factor_to: input.hvdc_loss_to.get(i).copied().unwrap_or(0.0),
                cable_resistance: input.hvdc_resistance.get(i).copied().unwrap_or(0.0),
                cable_voltage_kv: input.hvdc_voltage.get(i).copied().unwrap_or(0.0),
                fictive_branch: None,
                fictive_shifter: None,
                curative_outages: BTreeSet::new(),
                preventive_var: None,
            };
            if link.setpoint < link.power_min || link.setpoint > link.power_max {
                return Err(ConfigError::SetpointOutOfBounds { name });
            }
            if self.hvdc_index.insert(name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateName(name));
            }
            self.nodes[from.value()].hvdcs.push(id);
            self.nodes[to.value()].hvdcs.push(id);
            self.hvdcs.push(link);

            // Curative eligibility only makes sense on optimized links.
            let curative_count = input.hvdc_curative_counts.get(i).copied().unwrap_or(0).max(0) as usize;
            if curative_count > 0 {
                if !control.is_optimized() {
                    warn!(hvdc = %self.hvdcs_name(id), "curative request on a non-optimized HVDC link, ignoring");
                } else {
                    let mut curative_set = BTreeSet::new();
                    for k in 0..curative_count {
                        curative_set.insert(input.hvdc_curative_outages[curative_cursor + k] as usize);
                    }
                    let link = self.hvdc_mut(id);
                    link.curative = true;
                    link.curative_outages = curative_set;
                }
                curative_cursor += curative_count;
            }

            if !control.is_emulation() {
                continue;
            }
            self.preventive_actions_possible = true;

            // AC emulation: a fictive branch carries the emulated
            // admittance, and a fictive shifter on it models the control.
            let gain = input
                .hvdc_emulation_gain
                .get(emulation_cursor)
                .copied()
                .unwrap_or(0.0);
            emulation_cursor += 1;
            if gain == 0.0 {
                return Err(ConfigError::ZeroEmulationGain(self.hvdcs_name(id)));
            }
            let y_fictive = gain * 180.0 / (PI * u_ref * u_ref);

            let fictive_id = BranchId::new(self.branches.len());
            let fictive_name = format!("{}_AC", self.hvdcs_name(id));
            let fictive = Branch {
                id: fictive_id,
                name: fictive_name.clone(),
                kind: BranchKind::AcEmulation,
                from,
                to,
                admittance: y_fictive,
                resistance: 0.0,
                u2y: u_ref * u_ref * y_fictive,
                from_closed: true,
                to_closed: true,
                from_closed_base: true,
                to_closed_base: true,
                reconnectable: from != to,
                shifter: None,
                monitor: None,
            };
            self.branch_index.insert(fictive_name.clone(), fictive_id);
            self.nodes[from.value()].branches.push(fictive_id);
            self.nodes[to.value()].branches.push(fictive_id);
            self.branches.push(fictive);

            let (pmin, pmax) = {
                let link = self.hvdc(id);
                (link.power_min, link.power_max)
            };
            let sid = self.insert_shifter(
                fictive_id,
                0.0,
                pmin / y_fictive,
                pmax / y_fictive,
                ShifterControl::AngleOptimized,
                true,
                true,
                0,
                Vec::new(),
            )?;
            // The fictive shifter answers every contingency curatively.
            self.shifter_mut(sid).curative_outages = (0..outage_count).collect();
            self.fictive_shifters.push(sid);

            // Monitored element on the fictive branch, asymmetric
            // [-|Pmin|, Pmax].
            let mid = MonitorId::new(self.monitors.len());
            let hvdc_name = self.hvdcs_name(id);
            let mut elem = MonitoredElement::new(mid, hvdc_name.clone());
            elem.monitor_n = MonitorKind::Monitored;
            elem.monitor_outage = MonitorKind::Monitored;
            elem.limits = ThresholdSet::uniform(pmax);
            elem.limits.set_reverse_uniform(-pmin);
            elem.limits_base = elem.limits.clone();
            elem.branch_terms.push((fictive_id, 1.0));
            elem.hvdc_terms.push((id, 1.0));
            self.branch_mut(fictive_id).monitor = Some(mid);
            self.monitor_n_index.insert(hvdc_name.clone(), mid);
            self.monitor_outage_index.insert(hvdc_name, mid);
            self.monitors.push(elem);

            let link = self.hvdc_mut(id);
            link.fictive_branch = Some(fictive_id);
            link.fictive_shifter = Some(sid);
        }
        Ok(())
    }

    fn hvdcs_name(&self, id: HvdcId) -> String {
        self.hvdc(id).name.clone()
    }

    fn build_generators(&mut self, config: &Configuration, input: &NetworkInput) -> Result<(), ConfigError> {
        self.generator_kinds = input
            .generator_kind_names
            .iter()
            .map(|k| k.trim().to_string())
            .collect();

        let mut curative_cursor = 0usize;
        let curative_allowed = matches!(
            config.computation,
            ComputationKind::OptimalPowerFlow | ComputationKind::OpfWithOverload
        );

        for i in 0..input.generator_names.len() {
            let name = input.generator_names[i].trim().to_string();
            let node_ref = input.generator_node[i];
            if node_ref <= 0 || node_ref as usize > self.real_node_count {
                return Err(ConfigError::BadIndex {
                    key: "TNNEURGT",
                    element: name,
                });
            }
            let node = NodeId::new((node_ref - 1) as usize);
            let pmin = input.generator_pmin[i];
            let pmax = input.generator_pmax[i];
            if pmax < pmin {
                return Err(ConfigError::PminAbovePmax { name, pmin, pmax });
            }

            let mut adjustability =
                Adjustability::from_flag(input.generator_adjustment[i]).unwrap_or(Adjustability::None);
            if config.computation == ComputationKind::OpfWithoutRedispatch {
                adjustability = match adjustability {
                    Adjustability::BothPhases => Adjustability::WithoutNetworkOnly,
                    Adjustability::WithNetworkOnly => Adjustability::None,
                    other => other,
                };
            }
            if matches!(adjustability, Adjustability::BothPhases | Adjustability::WithNetworkOnly) {
                self.preventive_actions_possible = true;
            }

            let half_band = input.generator_half_band.get(i).copied().unwrap_or(0.0);
            self.reserve_half_band += half_band;

            let id = GenId::new(self.generators.len());
            let mut gen = Generator {
                id,
                name: name.clone(),
                node,
                kind: input.generator_kind[i].max(0) as usize,
                adjustability,
                on: true,
                on_base: true,
                output: 0.0,
                target: input.generator_target[i],
                target_base: input.generator_target[i],
                pmin: pmin.min(0.0),
                pmin_redispatch: pmin,
                pmin_base: pmin,
                pmax,
                pmax_available: pmax,
                pmax_available_base: pmax,
                half_band,
                cost_up: 0.0,
                cost_down: 0.0,
                cost_up_redispatch: 0.0,
                cost_down_redispatch: 0.0,
                cost_up_base: 0.0,
                cost_down_base: 0.0,
                cost_up_redispatch_base: 0.0,
                cost_down_redispatch_base: 0.0,
                curative_outages: BTreeSet::new(),
                var_index: None,
            };
            gen.enforce_bounds();
            gen.target_base = gen.target;

            if gen.adjustability.without_network() {
                self.max_available_generation += gen.pmax_available;
            }

            let curative_count = input
                .generator_curative_counts
                .get(i)
                .copied()
                .unwrap_or(0)
                .max(0) as usize;
            if curative_count > 0 && curative_allowed {
                for k in 0..curative_count {
                    gen.curative_outages
                        .insert(input.generator_curative_outages[curative_cursor + k] as usize);
                }
            }
            curative_cursor += curative_count;

            if self.generator_index.insert(name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateName(name));
            }
            self.nodes[node.value()].generators.push(id);
            self.generators.push(gen);
        }
        Ok(())
    }

    fn build_loads(&mut self, config: &Configuration, input: &NetworkInput) -> Result<(), ConfigError> {
        let mut curative_cursor = 0usize;
        let mut curative_index = 0usize;
        let curative_allowed = config.computation == ComputationKind::OptimalPowerFlow;

        for i in 0..input.load_names.len() {
            let name = input.load_names[i].trim().to_string();
            let node_ref = input.load_node[i];
            if node_ref <= 0 || node_ref as usize > self.real_node_count {
                return Err(ConfigError::BadIndex {
                    key: "TNNEUCEL",
                    element: name,
                });
            }
            let node = NodeId::new((node_ref - 1) as usize);

            let shed_percent = input.load_shed_percent.get(i).copied().unwrap_or(100);
            if !(0..=100).contains(&shed_percent) {
                return Err(ConfigError::ShedFractionOutOfRange {
                    name,
                    value: shed_percent,
                });
            }

            let id = LoadId::new(self.loads.len());
            let mut load = Load {
                id,
                name: name.clone(),
                node,
                value: input.load_value[i],
                value_base: input.load_value[i],
                shed_fraction: shed_percent as f64 / 100.0,
                shed_cost: input
                    .load_shed_cost
                    .get(i)
                    .copied()
                    .flatten()
                    .unwrap_or(config.failure_cost),
                curative_shed_fraction: 0.0,
                curative_shed_cost: elements::DEFAULT_CURATIVE_SHED_COST,
                curative_shed_cost_base: elements::DEFAULT_CURATIVE_SHED_COST,
                curative_outages: BTreeSet::new(),
                var_index: None,
            };

            let curative_count = input.load_curative_counts.get(i).copied().unwrap_or(0).max(0) as usize;
            if curative_count > 0 && curative_allowed {
                load.curative_shed_fraction = input
                    .load_curative_percent
                    .get(curative_index)
                    .copied()
                    .unwrap_or(0) as f64
                    / 100.0;
                for k in 0..curative_count {
                    load.curative_outages
                        .insert(input.load_curative_outages[curative_cursor + k] as usize);
                }
                curative_index += 1;
            }
            curative_cursor += curative_count;

            if self.load_index.insert(name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateName(name));
            }
            self.nodes[node.value()].loads.push(id);
            self.loads.push(load);
        }
        Ok(())
    }

    /// Parse the contingency descriptor stream, classify and name each
    /// contingency, and validate it against connectivity. Returns the
    /// largest generation loss any single contingency can cause.
    fn build_outages(&mut self, config: &Configuration, input: &NetworkInput) -> Result<f64, ConfigError> {
        let mut max_generation_loss = 0.0f64;
        const KIND_BRANCH: i64 = 1;
        const KIND_GENERATOR: i64 = 2;
        const KIND_HVDC: i64 = 3;

        for (i, &offset) in input.outage_offsets.iter().enumerate() {
            let id = OutageId::new(self.outages.len());
            let mut outage = Contingency::new(id, OutageKind::Unknown);
            outage.probability = config.outage_probability;
            outage.probability_base = config.outage_probability;

            let mut pos = offset as usize;
            if pos == 0 || pos > input.outage_descriptors.len() {
                return Err(ConfigError::BadOutageElement(i));
            }
            let end = pos + input.outage_descriptors[pos - 1] as usize;
            if end > input.outage_descriptors.len() {
                return Err(ConfigError::BadOutageElement(i));
            }
            let mut generation_loss = 0.0;
            while pos < end {
                let kind = input.outage_descriptors[pos];
                let element = input
                    .outage_descriptors
                    .get(pos + 1)
                    .copied()
                    .ok_or(ConfigError::BadOutageElement(i))?;
                if element < 1 {
                    return Err(ConfigError::BadOutageElement(i));
                }
                match kind {
                    KIND_BRANCH => {
                        let branch = BranchId::new((element - 1) as usize);
                        if branch.value() >= input.branch_count() {
                            return Err(ConfigError::BadOutageElement(i));
                        }
                        outage.branches.push(branch);
                    }
                    KIND_GENERATOR => {
                        let gen = GenId::new((element - 1) as usize);
                        if gen.value() >= self.generators.len() {
                            return Err(ConfigError::BadOutageElement(i));
                        }
                        generation_loss += self.generator(gen).pmax;
                        outage.generators.push(gen);
                    }
                    KIND_HVDC => {
                        let hvdc = HvdcId::new((element - 1) as usize);
                        if hvdc.value() >= self.hvdcs.len() {
                            return Err(ConfigError::BadOutageElement(i));
                        }
                        if let Some(fictive) = self.hvdc(hvdc).fictive_branch {
                            outage.branches.push(fictive);
                        }
                        outage.hvdcs.push(hvdc);
                    }
                    other => return Err(ConfigError::UnknownOutageElementKind(i, other)),
                }
                pos += 2;
            }
            max_generation_loss = max_generation_loss.max(generation_loss);

            outage.kind = if outage.branches.is_empty() && outage.hvdcs.is_empty() {
                OutageKind::GroupOnly
            } else if outage.generators.is_empty() && outage.branches.len() == 1 && outage.hvdcs.is_empty() {
                OutageKind::LineOnly
            } else {
                OutageKind::Mixed
            };

            // Canonical name when the input does not provide one.
            let given = input.outage_names[i].trim();
            outage.name = if !given.is_empty() {
                given.to_string()
            } else if outage.kind == OutageKind::LineOnly {
                self.branch(outage.branches[0]).name.clone()
            } else if outage.generators.is_empty() && outage.branches.is_empty() && outage.hvdcs.len() == 1 {
                self.hvdc(outage.hvdcs[0]).name.clone()
            } else {
                let mut name = String::new();
                for &b in &outage.branches {
                    if self.branch(b).kind == BranchKind::Real {
                        name.push_str(&format!("L_{};", self.branch(b).name));
                    }
                }
                for &g in &outage.generators {
                    name.push_str(&format!("G_{};", self.generator(g).name));
                }
                for &h in &outage.hvdcs {
                    name.push_str(&format!("H_{};", self.hvdc(h).name));
                }
                name
            };

            if self.outage_index.contains_key(&outage.name) {
                warn!(outage = %outage.name, "duplicate contingency name, keeping the first");
            } else {
                self.outage_index.insert(outage.name.clone(), id);
            }
            let changes_topology = !outage.branches.is_empty() || !outage.hvdcs.is_empty();
            self.outages.push(outage);

            if changes_topology {
                self.check_outage_connectivity(id, config.accept_breaking_outages, config);
                let outage = self.outage_mut(id);
                if !outage.valid {
                    outage.valid_base = false;
                    info!(outage = id.value(), "contingency breaks connectivity and is rejected");
                }
            }
            if self.outage(id).valid {
                debug!(outage = %self.outage(id).name, num = id.value(), "contingency simulated");
            }
        }

        self.outage_count_without_parades = self.outages.len();

        // Complex contingencies select the complex-outage threshold column.
        for &index in &input.complex_outages {
            if index >= 0 && (index as usize) < self.outages.len() {
                self.outages[index as usize].complex = true;
                info!(outage = %self.outages[index as usize].name, "complex contingency");
            }
        }
        Ok(max_generation_loss)
    }

    fn check_reserve(&mut self, max_generation_loss: f64) -> Result<(), ConfigError> {
        if max_generation_loss <= 0.0 {
            return Ok(());
        }
        self.generator_outages_present = true;
        if self.reserve_half_band <= max_generation_loss - EPSILON {
            return Err(ConfigError::ReserveTooSmall {
                half_band: self.reserve_half_band,
                max_loss: max_generation_loss,
            });
        }
        // Abate the working Pmax so the reserve stays available.
        self.update_pmax_for_reserve(0.0);
        Ok(())
    }

    fn build_sections(&mut self, input: &NetworkInput) -> Result<(), ConfigError> {
        let mut cursor = 0usize;
        for i in 0..input.section_names.len() {
            let name = input.section_names[i].trim().to_string();
            let mid = MonitorId::new(self.monitors.len());
            let mut elem = MonitoredElement::new(mid, name.clone());
            elem.is_watched_section = true;
            elem.monitor_n = MonitorKind::Monitored;
            elem.limits.max_n = input.section_limit_n[i];
            elem.limits.asymmetric = true;
            elem.limits_base = elem.limits.clone();

            let terms = input.section_term_counts[i].max(0) as usize;
            for k in 0..terms {
                let kind = input.section_term_kinds[cursor + k];
                let element = input.section_term_ids[cursor + k];
                let coeff = input.section_term_coeffs[cursor + k];
                match kind {
                    1 => {
                        if element < 1 || element as usize > input.branch_count() {
                            return Err(ConfigError::BadIndex {
                                key: "SECTNUMQ",
                                element: name.clone(),
                            });
                        }
                        elem.branch_terms.push((BranchId::new((element - 1) as usize), coeff));
                    }
                    3 => {
                        if element < 1 || element as usize > self.hvdcs.len() {
                            return Err(ConfigError::BadIndex {
                                key: "SECTNUMQ",
                                element: name.clone(),
                            });
                        }
                        let hvdc = HvdcId::new((element - 1) as usize);
                        elem.hvdc_terms.push((hvdc, coeff));
                        if let Some(fictive) = self.hvdc(hvdc).fictive_branch {
                            elem.branch_terms.push((fictive, coeff));
                        }
                    }
                    other => {
                        warn!(section = %name, kind = other, "unsupported element kind in watched section");
                    }
                }
            }
            cursor += terms;

            self.monitor_n_index.insert(name, mid);
            self.monitors.push(elem);
        }
        Ok(())
    }

    fn build_result_bindings(&mut self, input: &NetworkInput) {
        let mut cursor = 0usize;
        while cursor + 1 < input.detailed_flow_table.len() {
            let branch = BranchId::new((input.detailed_flow_table[cursor] - 1) as usize);
            let count = input.detailed_flow_table[cursor + 1].max(0) as usize;
            if cursor + 2 + count > input.detailed_flow_table.len()
                || branch.value() >= self.branches.len()
            {
                warn!("truncated detailed-flow table (PTDEFRES), ignoring the rest");
                break;
            }
            let mut set = BTreeSet::new();
            for k in 0..count {
                let index = input.detailed_flow_table[cursor + 2 + k] as usize;
                if index < self.outages.len() && self.outages[index].valid {
                    set.insert(OutageId::new(index));
                }
            }
            self.detailed_flow_outages.insert(branch, set);
            cursor += 2 + count;
        }

        cursor = 0;
        while cursor + 1 < input.detailed_marginal_table.len() {
            let branch = BranchId::new((input.detailed_marginal_table[cursor] - 1) as usize);
            let count = input.detailed_marginal_table[cursor + 1].max(0) as usize;
            if cursor + 2 + count > input.detailed_marginal_table.len()
                || branch.value() >= self.branches.len()
            {
                warn!("truncated marginal-variation table (PTVARMAR), ignoring the rest");
                break;
            }
            let name = self.branch(branch).name.clone();
            let mut set = BTreeSet::new();
            for k in 0..count {
                let index = input.detailed_marginal_table[cursor + 2 + k] as usize;
                if index < self.outages.len() && self.outages[index].valid {
                    set.insert(OutageId::new(index));
                }
            }
            self.detailed_marginal_outages.insert(name, set);
            cursor += 2 + count;
        }
    }

    /// Attach the curative elements to their target contingencies, unless
    /// the contingency trips the element itself.
    fn wire_curative_actions(&mut self) {
        for sid in (0..self.shifters.len()).map(ShifterId::new) {
            let targets: Vec<usize> = self.shifter(sid).curative_outages.iter().copied().collect();
            let real_branch = self.shifter(sid).real_branch;
            for index in targets {
                if index >= self.outage_count_without_parades {
                    continue;
                }
                let outage = &self.outages[index];
                if !outage.valid {
                    continue;
                }
                if outage.branches.contains(&real_branch) {
                    warn!(
                        outage = %outage.name,
                        shifter = %self.branch(real_branch).name,
                        "curative shifter is tripped by its own contingency, ignoring"
                    );
                    continue;
                }
                self.outages[index]
                    .curative_actions
                    .push(CurativeAction::new(CurativeElement::PhaseShifter(sid)));
            }
        }

        for hid in (0..self.hvdcs.len()).map(HvdcId::new) {
            let targets: Vec<usize> = self.hvdc(hid).curative_outages.iter().copied().collect();
            for index in targets {
                if index >= self.outage_count_without_parades {
                    continue;
                }
                let outage = &self.outages[index];
                if !outage.valid {
                    continue;
                }
                if outage.hvdcs.contains(&hid) {
                    warn!(
                        outage = %outage.name,
                        hvdc = %self.hvdc(hid).name,
                        "curative HVDC link is tripped by its own contingency, ignoring"
                    );
                    continue;
                }
                self.outages[index]
                    .curative_actions
                    .push(CurativeAction::new(CurativeElement::Hvdc(hid)));
            }
        }

        for gid in (0..self.generators.len()).map(GenId::new) {
            let targets: Vec<usize> = self.generator(gid).curative_outages.iter().copied().collect();
            for index in targets {
                if index >= self.outage_count_without_parades {
                    continue;
                }
                let outage = &self.outages[index];
                if !outage.valid {
                    continue;
                }
                if outage.generators.contains(&gid) {
                    warn!(
                        outage = %outage.name,
                        generator = %self.generator(gid).name,
                        "curative generator is tripped by its own contingency, ignoring"
                    );
                    continue;
                }
                self.outages[index]
                    .curative_actions
                    .push(CurativeAction::new(CurativeElement::Generator(gid)));
            }
        }

        for lid in (0..self.loads.len()).map(LoadId::new) {
            let targets: Vec<usize> = self.load(lid).curative_outages.iter().copied().collect();
            for index in targets {
                if index >= self.outage_count_without_parades {
                    continue;
                }
                if !self.outages[index].valid {
                    continue;
                }
                self.outages[index]
                    .curative_actions
                    .push(CurativeAction::new(CurativeElement::Load(lid)));
            }
        }
    }

    fn build_coupling_groups(&mut self, input: &NetworkInput) -> Result<(), ConfigError> {
        let mut cursor = 0usize;
        for i in 0..input.gen_group_names.len() {
            let name = input.gen_group_names[i].trim().to_string();
            let count = input
                .gen_group_members
                .get(cursor)
                .copied()
                .ok_or(ConfigError::LengthMismatch {
                    key: "GBINDDEF",
                    expected: cursor + 1,
                    actual: input.gen_group_members.len(),
                })? as usize;
            cursor += 1;
            if cursor + count > input.gen_group_members.len() {
                return Err(ConfigError::LengthMismatch {
                    key: "GBINDDEF",
                    expected: cursor + count,
                    actual: input.gen_group_members.len(),
                });
            }
            let mut members = BTreeSet::new();
            for k in 0..count {
                let index = input.gen_group_members[cursor + k];
                if index < 1 || index as usize > self.generators.len() {
                    return Err(ConfigError::BadIndex {
                        key: "GBINDDEF",
                        element: name,
                    });
                }
                let gid = GenId::new((index - 1) as usize);
                let gen = self.generator(gid);
                if !gen.is_adjustable(false) {
                    return Err(ConfigError::NonAdjustableInGroup {
                        group: name,
                        member: gen.name.clone(),
                    });
                }
                members.insert(gid);
            }
            cursor += count;
            let reference =
                GroupReference::from_flag(input.gen_group_reference[i]).unwrap_or(GroupReference::Pmax);
            self.gen_groups.push(CoupledGenerators {
                name,
                reference,
                members,
            });
        }

        cursor = 0;
        for name in &input.load_group_names {
            let name = name.trim().to_string();
            let count = input
                .load_group_members
                .get(cursor)
                .copied()
                .ok_or(ConfigError::LengthMismatch {
                    key: "LBINDDEF",
                    expected: cursor + 1,
                    actual: input.load_group_members.len(),
                })? as usize;
            cursor += 1;
            if cursor + count > input.load_group_members.len() {
                return Err(ConfigError::LengthMismatch {
                    key: "LBINDDEF",
                    expected: cursor + count,
                    actual: input.load_group_members.len(),
                });
            }
            let mut members = BTreeSet::new();
            for k in 0..count {
                let index = input.load_group_members[cursor + k];
                if index < 1 || index as usize > self.loads.len() {
                    return Err(ConfigError::BadIndex {
                        key: "LBINDDEF",
                        element: name,
                    });
                }
                let lid = LoadId::new((index - 1) as usize);
                let load = self.load(lid);
                if !load.sheddable() {
                    return Err(ConfigError::NonSheddableInGroup {
                        group: name,
                        member: load.name.clone(),
                    });
                }
                members.insert(lid);
            }
            cursor += count;
            self.load_groups.push(CoupledLoads { name, members });
        }
        Ok(())
    }
}
