//! Small canonical networks shared by the workspace's tests.

use crate::config::Configuration;
use crate::input::NetworkInput;
use crate::network::Network;

/// Two nodes, one branch: load of 100 MW at A, a 200 MW adjustable
/// generator at B.
pub fn two_node() -> (Configuration, Network) {
    let config = Configuration::default();
    let net = Network::build(&config, &two_node_input()).expect("two-node network");
    (config, net)
}

/// The flat input of [`two_node`].
pub fn two_node_input() -> NetworkInput {
    NetworkInput {
        region_names: vec!["R1".into()],
        node_regions: vec![1, 1],
        branch_names: vec!["AB".into()],
        branch_from: vec![1],
        branch_to: vec![2],
        branch_admittance: vec![1.0],
        branch_resistance: vec![0.0],
        branch_monitor_n: vec![1],
        branch_monitor_outage: vec![1],
        generator_kind_names: vec!["THERMAL".into()],
        generator_names: vec!["G_B".into()],
        generator_node: vec![2],
        generator_kind: vec![0],
        generator_target: vec![0.0],
        generator_pmin: vec![0.0],
        generator_pmax: vec![200.0],
        generator_half_band: vec![0.0],
        generator_adjustment: vec![1],
        load_names: vec!["LOAD_A".into()],
        load_node: vec![1],
        load_value: vec![100.0],
        load_shed_percent: vec![100],
        load_shed_cost: vec![None],
        ..NetworkInput::default()
    }
}

/// Three nodes in a ring (branches AB, BC, CA, admittance 1 each), a
/// 100 MW load at A, a 200 MW adjustable generator at C, and one
/// contingency opening AB.
pub fn three_node_ring() -> (Configuration, Network) {
    let config = Configuration::default();
    let input = three_node_ring_input();
    let net = Network::build(&config, &input).expect("three-node ring");
    (config, net)
}

/// The flat input of [`three_node_ring`], for tests that tweak it. The
/// fourth branch `AB2` is a normally-open coupling parallel to `AB`.
pub fn three_node_ring_input() -> NetworkInput {
    NetworkInput {
        region_names: vec!["R1".into()],
        node_regions: vec![1, 1, 1],
        branch_names: vec!["AB".into(), "BC".into(), "CA".into(), "AB2".into()],
        branch_from: vec![1, 2, 3, 1],
        branch_to: vec![2, 3, 1, 2],
        branch_admittance: vec![1.0, 1.0, 1.0, 1.0],
        branch_resistance: vec![0.0, 0.0, 0.0, 0.0],
        branch_monitor_n: vec![1, 1, 1, 0],
        branch_monitor_outage: vec![1, 1, 1, 0],
        open_branches: vec![4],
        generator_kind_names: vec!["THERMAL".into()],
        generator_names: vec!["G_C".into()],
        generator_node: vec![3],
        generator_kind: vec![0],
        generator_target: vec![100.0],
        generator_pmin: vec![0.0],
        generator_pmax: vec![200.0],
        generator_half_band: vec![0.0],
        generator_adjustment: vec![1],
        load_names: vec!["LOAD_A".into()],
        load_node: vec![1],
        load_value: vec![100.0],
        load_shed_percent: vec![100],
        load_shed_cost: vec![None],
        outage_names: vec!["".into()],
        outage_offsets: vec![1],
        outage_descriptors: vec![2, 1, 1],
        ..NetworkInput::default()
    }
}

/// The ring of [`three_node_ring`] with a phase-shifter on the branch CA
/// (angle-optimized, ±20°).
pub fn ring_with_shifter_input() -> NetworkInput {
    NetworkInput {
        shifter_branch: vec![3],
        shifter_control: vec![1],
        shifter_base_value: vec![0.0],
        shifter_min_value: vec![-20.0],
        shifter_max_value: vec![20.0],
        ..three_node_ring_input()
    }
}

/// Two synchronous areas (A–B and C–D) tied by the AC branch BC and, in
/// parallel, an HVDC link in AC-emulation mode (gain 50 MW/°, range
/// ±100 MW) plus a normally-open coupling BC2. One contingency opens BC,
/// leaving the emulated link as the only tie.
pub fn emulated_hvdc_pair() -> (Configuration, Network) {
    let config = Configuration {
        curative_action_limit: 4,
        ..Configuration::default()
    };
    let net = Network::build(&config, &emulated_hvdc_pair_input()).expect("emulated HVDC pair");
    (config, net)
}

/// The flat input of [`emulated_hvdc_pair`].
pub fn emulated_hvdc_pair_input() -> NetworkInput {
    NetworkInput {
        region_names: vec!["R1".into(), "R2".into()],
        node_regions: vec![1, 1, 2, 2],
        branch_names: vec!["AB".into(), "BC".into(), "CD".into(), "BC2".into()],
        branch_from: vec![1, 2, 3, 2],
        branch_to: vec![2, 3, 4, 3],
        branch_admittance: vec![1.0, 1.0, 1.0, 1.0],
        branch_resistance: vec![0.0, 0.0, 0.0, 0.0],
        branch_monitor_n: vec![1, 1, 1, 0],
        branch_monitor_outage: vec![1, 1, 1, 0],
        open_branches: vec![4],
        hvdc_names: vec!["HVDC_BC".into()],
        hvdc_from: vec![2],
        hvdc_to: vec![3],
        hvdc_pmin: vec![-100.0],
        hvdc_pmax: vec![100.0],
        hvdc_setpoint: vec![0.0],
        hvdc_control: vec![3],
        hvdc_emulation_gain: vec![50.0],
        generator_kind_names: vec!["THERMAL".into()],
        generator_names: vec!["G_A".into()],
        generator_node: vec![1],
        generator_kind: vec![0],
        generator_target: vec![80.0],
        generator_pmin: vec![0.0],
        generator_pmax: vec![300.0],
        generator_half_band: vec![0.0],
        generator_adjustment: vec![1],
        load_names: vec!["LOAD_D".into()],
        load_node: vec![4],
        load_value: vec![80.0],
        load_shed_percent: vec![100],
        load_shed_cost: vec![None],
        outage_names: vec!["LOSS_BC".into()],
        outage_offsets: vec![1],
        outage_descriptors: vec![2, 1, 2],
        ..NetworkInput::default()
    }
}

/// Two synchronous zones with no AC tie at all, joined by an HVDC link in
/// optimized power control. Exercises multi-zone slack selection.
pub fn two_zone_hvdc() -> (Configuration, Network) {
    let config = Configuration::default();
    let input = NetworkInput {
        region_names: vec!["R1".into(), "R2".into()],
        node_regions: vec![1, 1, 2, 2],
        branch_names: vec!["AB".into(), "CD".into()],
        branch_from: vec![1, 3],
        branch_to: vec![2, 4],
        branch_admittance: vec![1.0, 1.0],
        branch_resistance: vec![0.0, 0.0],
        branch_monitor_n: vec![1, 1],
        branch_monitor_outage: vec![0, 0],
        hvdc_names: vec!["HVDC_BC".into()],
        hvdc_from: vec![2],
        hvdc_to: vec![3],
        hvdc_pmin: vec![-150.0],
        hvdc_pmax: vec![150.0],
        hvdc_setpoint: vec![50.0],
        hvdc_control: vec![1],
        generator_kind_names: vec!["THERMAL".into()],
        generator_names: vec!["G_A".into()],
        generator_node: vec![1],
        generator_kind: vec![0],
        generator_target: vec![50.0],
        generator_pmin: vec![0.0],
        generator_pmax: vec![200.0],
        generator_half_band: vec![0.0],
        generator_adjustment: vec![1],
        load_names: vec!["LOAD_D".into()],
        load_node: vec![4],
        load_value: vec![50.0],
        load_shed_percent: vec![100],
        load_shed_cost: vec![None],
        ..NetworkInput::default()
    };
    let net = Network::build(&config, &input).expect("two-zone HVDC network");
    (config, net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::monitor::MonitorKind;
    use crate::network::BranchKind;
    use crate::K_SPLIT;

    #[test]
    fn test_two_node_builds() {
        let (_, net) = two_node();
        assert_eq!(net.nodes.len(), 2);
        assert_eq!(net.branches.len(), 1);
        assert_eq!(net.generators.len(), 1);
        assert_eq!(net.loads.len(), 1);
        assert_eq!(net.monitors.len(), 1);
        assert_eq!(net.monitors[0].monitor_n, MonitorKind::Monitored);
    }

    #[test]
    fn test_ring_outage_named_after_branch() {
        let (_, net) = three_node_ring();
        assert_eq!(net.outages.len(), 1);
        assert_eq!(net.outages[0].name, "AB");
        assert!(net.outages[0].valid);
    }

    #[test]
    fn test_emulated_hvdc_fictive_equipment() {
        let (_, net) = emulated_hvdc_pair();
        let link = &net.hvdcs[0];
        let fictive = link.fictive_branch.expect("fictive branch");
        let shifter = link.fictive_shifter.expect("fictive shifter");
        // The fictive branch was split by the fictive shifter insertion.
        assert_eq!(net.branch(fictive).kind, BranchKind::AcEmulation);
        assert!(net.shifter(shifter).is_fictive);
        assert!(net.shifter(shifter).curative);
        // Asymmetric monitored element carries [-|Pmin|, Pmax].
        let monitor = net.branch(fictive).monitor.expect("monitor");
        let elem = net.monitored(monitor);
        assert!(elem.limits.asymmetric);
        assert_eq!(elem.limits.max_n, 100.0);
        assert_eq!(elem.limits.max_n_reverse, 100.0);
        // The fictive shifter answers every contingency.
        assert!(net.shifter(shifter).curative_outages.contains(&0));
    }

    #[test]
    fn test_admittance_split_preserves_series_admittance() {
        // 1/y_aux + 1/y_real == 1/y_original for every shifter insertion.
        let (_, net) = emulated_hvdc_pair();
        let shifter = &net.shifters[0];
        let aux = net.branch(shifter.branch);
        let real = net.branch(shifter.real_branch);
        let original = aux.admittance * K_SPLIT;
        assert!((1.0 / aux.admittance + 1.0 / real.admittance - 1.0 / original).abs() < 1e-12);
    }

    #[test]
    fn test_two_zone_slacks() {
        let (_, net) = two_zone_hvdc();
        assert_eq!(net.slack_by_zone.len(), 2);
        let slacks: Vec<usize> = net.slack_by_zone.values().map(|n| n.value()).collect();
        assert!(net.nodes[slacks[0]].is_slack);
        assert!(net.nodes[slacks[1]].is_slack);
        // Zones partition the four real nodes two and two.
        assert_eq!(net.nodes[0].zone, net.nodes[1].zone);
        assert_eq!(net.nodes[2].zone, net.nodes[3].zone);
        assert_ne!(net.nodes[0].zone, net.nodes[2].zone);
    }
}
