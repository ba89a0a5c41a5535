//! Connectivity analysis over the branch endpoint flags.
//!
//! Zones are discovered by a union-find over the closed AC branches: zone
//! ids are allocated sparsely (a new id each time two unzoned nodes meet)
//! and equivalences collected in a collapse table; every read resolves
//! through the table, so ids never need to be dense. A second pass over
//! the closed HVDC links accounts for inter-zone connectivity.
//!
//! A contingency is probed by snapshotting the endpoint flags of every
//! element it touches, applying its openings and closings, re-running the
//! analysis and restoring the flags unconditionally. When the probe
//! islands the network, the nodes outside the largest zone become the
//! contingency's *lost pocket*.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::ConfigError;
use crate::network::outage::LostPocket;
use crate::network::Network;
use crate::{BranchId, NodeId, OutageId};

/// Result of one zone computation: whether all nodes ended up in the same
/// zone, and the per-node zone ids (resolved, sparse).
struct ZoneScan {
    connected: bool,
    zones: Vec<i32>,
}

fn resolve(zone: i32, collapse: &mut BTreeMap<i32, i32>) -> i32 {
    match collapse.get(&zone).copied() {
        None => zone,
        Some(next) => {
            let root = resolve(next, collapse);
            collapse.insert(zone, root);
            root
        }
    }
}

fn merge(a: i32, b: i32, collapse: &mut BTreeMap<i32, i32>) {
    if a == -1 || b == -1 {
        warn!("zone merge on an unassigned node");
    }
    let ra = resolve(a, collapse);
    let rb = resolve(b, collapse);
    if ra < rb {
        collapse.insert(rb, ra);
    } else if rb < ra {
        collapse.insert(ra, rb);
    }
}

/// One closed edge: assign, inherit, or merge zones. Returns the highest
/// zone id allocated so far.
fn handle_edge(
    from: usize,
    to: usize,
    zones: &mut [i32],
    collapse: &mut BTreeMap<i32, i32>,
    current: i32,
) -> i32 {
    let zone_from = zones[from];
    let zone_to = zones[to];
    if zone_from > 0 && zone_to > 0 {
        if zone_from != zone_to {
            merge(zone_from, zone_to, collapse);
        }
        current
    } else if zone_from < 0 && zone_to > 0 {
        zones[from] = zone_to;
        current
    } else if zone_from > 0 && zone_to < 0 {
        zones[to] = zone_from;
        current
    } else {
        let fresh = current + 1;
        zones[from] = fresh;
        zones[to] = fresh;
        fresh
    }
}

impl Network {
    /// Drop the current slack selection before a topology change.
    pub fn clear_slacks(&mut self) {
        let slacks: Vec<NodeId> = self.slack_by_zone.values().copied().collect();
        for node in slacks {
            self.nodes[node.value()].is_slack = false;
        }
        self.slack_by_zone.clear();
    }

    /// Union-find over the closed branches, then over the closed HVDC
    /// links. With `select_slacks`, the first node of each discovered
    /// synchronous zone becomes its slack.
    fn scan_zones(&mut self, select_slacks: bool) -> Result<ZoneScan, ConfigError> {
        let count = self.nodes.len();
        let mut zones = vec![-1i32; count];
        let mut collapse = BTreeMap::new();
        let mut current = 0i32;

        for branch in &self.branches {
            if !branch.is_closed() {
                continue;
            }
            current = handle_edge(
                branch.from.value(),
                branch.to.value(),
                &mut zones,
                &mut collapse,
                current,
            );
        }
        for zone in zones.iter_mut() {
            *zone = resolve(*zone, &mut collapse);
        }

        if select_slacks && count > 0 {
            self.clear_slacks();
            self.slack_by_zone.insert(0, NodeId::new(0));
            self.nodes[0].is_slack = true;
            self.nodes[0].zone = 0;
        }

        if !self.hvdcs.is_empty() {
            if select_slacks {
                let mut zone_to_sync: BTreeMap<i32, i32> = BTreeMap::new();
                zone_to_sync.insert(zones[0], 0);
                let mut sync_count = 0i32;
                for n in 1..count {
                    let sync = match zone_to_sync.get(&zones[n]) {
                        Some(&sync) => sync,
                        None => {
                            sync_count += 1;
                            zone_to_sync.insert(zones[n], sync_count);
                            self.slack_by_zone.insert(sync_count, NodeId::new(n));
                            self.nodes[n].is_slack = true;
                            sync_count
                        }
                    };
                    self.nodes[n].zone = sync;
                }
            }

            // Do the HVDC links bridge the remaining zones?
            let mut cross_zone_error = None;
            for h in 0..self.hvdcs.len() {
                let (closed, from, to, curative, emulation, name) = {
                    let link = &self.hvdcs[h];
                    (
                        link.is_closed(),
                        link.from.value(),
                        link.to.value(),
                        link.curative,
                        link.control.is_emulation(),
                        link.name.clone(),
                    )
                };
                if !closed {
                    continue;
                }
                if zones[from] != zones[to] {
                    if curative {
                        self.hvdcs[h].curative = false;
                        warn!(hvdc = %name, "curative control between synchronous zones is not handled, downgrading");
                    }
                    if emulation {
                        cross_zone_error = Some(ConfigError::AcEmulationCrossZone(name));
                        break;
                    }
                }
                current = handle_edge(from, to, &mut zones, &mut collapse, current);
            }
            if let Some(err) = cross_zone_error {
                return Err(err);
            }
            for zone in zones.iter_mut() {
                *zone = resolve(*zone, &mut collapse);
            }
        }

        let connected = zones.iter().all(|&z| z == zones[0]);
        Ok(ZoneScan { connected, zones })
    }

    /// Full-network connectivity (HVDC links included). With
    /// `select_slacks`, re-elects the slack of every synchronous zone.
    /// Returns whether the network is connected.
    pub fn check_connectivity(&mut self, select_slacks: bool) -> Result<bool, ConfigError> {
        let scan = self.scan_zones(select_slacks)?;
        if !scan.connected {
            let main = main_zone(&scan.zones);
            for (n, &zone) in scan.zones.iter().enumerate() {
                if zone != main {
                    info!(node = n, zone, "node outside the main connected component");
                }
            }
        }
        Ok(scan.connected)
    }

    /// Probe a contingency (or parade): apply its openings and closings,
    /// re-run the analysis, restore every flag, then classify the result
    /// (pocket construction, parade recoverability, invalidation).
    ///
    /// `detail_breaks` selects between building a lost pocket and simply
    /// invalidating a connectivity-breaking entry.
    pub fn check_outage_connectivity(
        &mut self,
        id: OutageId,
        detail_breaks: bool,
        config: &Configuration,
    ) -> bool {
        {
            let outage = self.outage_mut(id);
            outage.pocket = None;
            outage.pocket_recoverable = false;
        }

        let (branches, closings, hvdcs) = {
            let outage = self.outage(id);
            (outage.branches.clone(), outage.closings.clone(), outage.hvdcs.clone())
        };

        let mut saved: HashMap<BranchId, (bool, bool)> = HashMap::new();
        for &b in &branches {
            let branch = self.branch_mut(b);
            saved.entry(b).or_insert((branch.from_closed, branch.to_closed));
            branch.open_both();
        }
        for &b in &closings {
            let branch = self.branch_mut(b);
            saved.entry(b).or_insert((branch.from_closed, branch.to_closed));
            branch.close_both();
        }
        for &h in &hvdcs {
            let link = self.hvdc_mut(h);
            link.from_closed = false;
            link.to_closed = false;
        }

        let scan = self.scan_zones(false);

        // Always restore, regardless of outcome.
        for (&b, &(from_closed, to_closed)) in &saved {
            let branch = self.branch_mut(b);
            branch.from_closed = from_closed;
            branch.to_closed = to_closed;
        }
        for &h in &hvdcs {
            let link = self.hvdc_mut(h);
            link.from_closed = link.from_closed_base;
            link.to_closed = link.to_closed_base;
        }

        let scan = match scan {
            Ok(scan) => scan,
            Err(err) => {
                warn!(outage = id.value(), error = %err, "connectivity probe failed");
                return false;
            }
        };

        self.classify_probe(id, &scan, detail_breaks, config);
        scan.connected
    }

    fn classify_probe(&mut self, id: OutageId, scan: &ZoneScan, detail_breaks: bool, config: &Configuration) {
        if scan.connected {
            // A parade that restores connectivity makes its parent's
            // pocket recoverable.
            let parent = self.outage(id).parent;
            if self.outage(id).is_parade {
                if let Some(parent) = parent {
                    if self.outage(parent).pocket.is_some() {
                        debug!(
                            parade = %self.outage(id).name,
                            parent = %self.outage(parent).name,
                            "pocket recovered by parade"
                        );
                        self.outage_mut(parent).pocket_recoverable = true;
                    }
                }
            }
            return;
        }

        if !detail_breaks {
            self.outage_mut(id).valid = false;
            return;
        }

        let main = main_zone(&scan.zones);
        let mut pocket_nodes: BTreeMap<NodeId, i32> = BTreeMap::new();
        for (n, &zone) in scan.zones.iter().enumerate() {
            if zone != main {
                pocket_nodes.insert(NodeId::new(n), zone);
            }
        }

        let pocket = match self.build_pocket(id, pocket_nodes) {
            Ok(pocket) => pocket,
            Err(err) => {
                warn!(outage = %self.outage(id).name, error = %err, "contingency rejected");
                let outage = self.outage_mut(id);
                outage.valid = false;
                outage.valid_base = false;
                return;
            }
        };
        self.outage_mut(id).pocket = Some(pocket);

        if !self.outage(id).valid {
            return;
        }

        if self.outage(id).is_parade {
            let parent = self.outage(id).parent.expect("parade without parent");
            let parent_pocket_len = self
                .outage(parent)
                .pocket
                .as_ref()
                .map(|p| p.nodes.len());
            match parent_pocket_len {
                Some(parent_len) => {
                    let parade_nodes = self.outage(id).pocket.as_ref().unwrap().nodes.clone();
                    if parade_nodes.len() < parent_len {
                        debug!(
                            parade = %self.outage(id).name,
                            parent = %self.outage(parent).name,
                            "pocket partially recovered by parade"
                        );
                        self.outage_mut(parent).pocket_recoverable = true;
                    } else {
                        let parent_nodes = &self.outage(parent).pocket.as_ref().unwrap().nodes;
                        if &parade_nodes != parent_nodes {
                            // The parade worsens the islanding.
                            self.outage_mut(id).valid = false;
                            return;
                        }
                    }
                }
                None => {
                    if !config.accept_breaking_parades {
                        // The parent does not break connectivity, so the
                        // parade must not either.
                        self.outage_mut(id).valid = false;
                        return;
                    }
                }
            }
            info!(parade = %self.outage(id).name, "parade islands part of the network");
        } else {
            info!(
                outage = %self.outage(id).name,
                nodes = self.outage(id).pocket.as_ref().unwrap().nodes.len(),
                "contingency islands part of the network"
            );
        }
        if !self.breaking_outages.contains(&id) {
            self.breaking_outages.push(id);
        }
    }

    /// Build the lost pocket for a probed contingency, and derive the
    /// *modified* open set: branches internal to the pocket, and the first
    /// tie discovered toward each disconnected sub-zone, are dropped from
    /// the contingency.
    fn build_pocket(
        &self,
        id: OutageId,
        mut pocket_nodes: BTreeMap<NodeId, i32>,
    ) -> Result<LostPocket, ConfigError> {
        let outage = self.outage(id);
        if !outage.generators.is_empty() || !outage.hvdcs.is_empty() {
            return Err(ConfigError::PocketWithSource(outage.name.clone()));
        }

        let mut pocket = LostPocket::default();
        let mut max_zone = pocket_nodes.values().copied().max().unwrap_or(0);
        for (&node_id, _) in &pocket_nodes {
            pocket.nodes.insert(node_id);
            let node = self.node(node_id);
            if !node.loads.is_empty() || !node.generators.is_empty() {
                pocket.has_load_or_generation = true;
            }
            for &gid in &node.generators {
                let gen = self.generator(gid);
                if gen.on && gen.adjustability.without_network() {
                    pocket.max_generation_mw += gen.pmax_available;
                }
            }
        }

        let mut kept_zones: std::collections::BTreeSet<i32> = std::collections::BTreeSet::new();
        let mut reduced = Vec::new();
        for &b in &outage.branches {
            let branch = self.branch(b);
            if !branch.is_closed() {
                // already open in the base state, leave it in the set
                reduced.push(b);
                continue;
            }
            let in_from = pocket.nodes.contains(&branch.from);
            let in_to = pocket.nodes.contains(&branch.to);
            if in_from && in_to {
                debug!(branch = %branch.name, "pocket-internal branch kept in service");
                continue;
            }
            if !in_from && !in_to {
                reduced.push(b);
                continue;
            }
            // This branch ties the pocket to the rest of the network.
            let mut zone_of = |node: NodeId| -> i32 {
                match pocket_nodes.get(&node).copied() {
                    // main-component side
                    None => 0,
                    // isolated node, give it a zone of its own
                    Some(-1) => {
                        max_zone += 1;
                        pocket_nodes.insert(node, max_zone);
                        max_zone
                    }
                    Some(zone) => zone,
                }
            };
            let zone_from = zone_of(branch.from);
            let zone_to = zone_of(branch.to);
            if !kept_zones.contains(&zone_from) || !kept_zones.contains(&zone_to) {
                debug!(branch = %branch.name, "first tie toward a lost sub-zone kept in service");
                kept_zones.insert(zone_from);
                kept_zones.insert(zone_to);
            } else {
                reduced.push(b);
            }
        }
        pocket.reduced_branches = reduced;
        Ok(pocket)
    }
}

fn main_zone(zones: &[i32]) -> i32 {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &zone in zones {
        *counts.entry(zone).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(zone, _)| zone)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::outage::{Contingency, OutageKind};
    use crate::testkit;

    #[test]
    fn test_ring_is_connected() {
        let (config, mut net) = testkit::three_node_ring();
        assert!(net.check_connectivity(false).unwrap());
        let _ = config;
    }

    #[test]
    fn test_zone_partition_closed_edges_in_same_zone() {
        let (_, mut net) = testkit::three_node_ring();
        let scan = net.scan_zones(false).unwrap();
        for branch in &net.branches {
            if branch.is_closed() {
                assert_eq!(
                    scan.zones[branch.from.value()],
                    scan.zones[branch.to.value()],
                    "closed branch '{}' crosses zones",
                    branch.name
                );
            }
        }
    }

    #[test]
    fn test_single_outage_keeps_ring_connected() {
        let (config, mut net) = testkit::three_node_ring();
        let id = net.outage_index["AB"];
        assert!(net.check_outage_connectivity(id, true, &config));
        assert!(net.outage(id).pocket.is_none());
        // flags restored
        assert!(net
            .branches
            .iter()
            .all(|b| b.from_closed == b.from_closed_base && b.to_closed == b.to_closed_base));
    }

    #[test]
    fn test_double_outage_builds_pocket() {
        let (config, mut net) = testkit::three_node_ring();
        // Opening AB and CA islands node A.
        let id = OutageId::new(net.outages.len());
        let mut outage = Contingency::new(id, OutageKind::Mixed);
        outage.name = "A_ISLAND".into();
        outage.branches = vec![net.branch_index["AB"], net.branch_index["CA"]];
        net.outages.push(outage);

        assert!(!net.check_outage_connectivity(id, true, &config));
        let pocket = net.outage(id).pocket.as_ref().expect("pocket");
        assert_eq!(pocket.nodes.len(), 1);
        assert!(pocket.nodes.contains(&net.nodes[0].id));
        // Node A carries the load, so the pocket is not empty.
        assert!(pocket.has_load_or_generation);
        // One tie toward the pocket is kept in service; the other stays
        // in the reduced contingency.
        assert_eq!(pocket.reduced_branches.len(), 1);
        // Flags restored afterwards.
        assert!(net
            .branches
            .iter()
            .all(|b| b.from_closed == b.from_closed_base && b.to_closed == b.to_closed_base));
    }

    #[test]
    fn test_breaking_outage_invalidated_without_detail() {
        let (config, mut net) = testkit::three_node_ring();
        let id = OutageId::new(net.outages.len());
        let mut outage = Contingency::new(id, OutageKind::Mixed);
        outage.name = "A_ISLAND".into();
        outage.branches = vec![net.branch_index["AB"], net.branch_index["CA"]];
        net.outages.push(outage);

        assert!(!net.check_outage_connectivity(id, false, &config));
        assert!(!net.outage(id).valid);
        assert!(net.outage(id).pocket.is_none());
    }

    #[test]
    fn test_pocket_with_generator_trip_rejected() {
        let (config, mut net) = testkit::three_node_ring();
        let id = OutageId::new(net.outages.len());
        let mut outage = Contingency::new(id, OutageKind::Mixed);
        outage.name = "A_ISLAND_G".into();
        outage.branches = vec![net.branch_index["AB"], net.branch_index["CA"]];
        outage.generators = vec![net.generator_index["G_C"]];
        net.outages.push(outage);

        net.check_outage_connectivity(id, true, &config);
        assert!(!net.outage(id).valid);
        assert!(!net.outage(id).valid_base);
    }

    #[test]
    fn test_sparse_zone_ids_resolve() {
        // Edges processed so that two separately numbered zones merge:
        // ids stay sparse and resolve through the collapse table.
        let mut zones = vec![-1i32; 4];
        let mut collapse = BTreeMap::new();
        let mut current = 0;
        current = handle_edge(0, 1, &mut zones, &mut collapse, current); // zone 1
        current = handle_edge(2, 3, &mut zones, &mut collapse, current); // zone 2
        let _ = handle_edge(1, 2, &mut zones, &mut collapse, current); // merge
        for zone in zones.iter_mut() {
            *zone = resolve(*zone, &mut collapse);
        }
        assert!(zones.iter().all(|&z| z == zones[0]));
        assert_eq!(zones[0], 1);
    }
}
