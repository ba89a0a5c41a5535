//! Topological remedial actions ("parades").
//!
//! The parade file starts with `NB;<count>`; each record is
//! `<incident[|constraint…]>;<n>;<coupling…>` where a coupling prefixed
//! `+` closes a branch and any other coupling opens one.
//!
//! Each parade clones its parent contingency, inherits its open set, and
//! is validated against connectivity like a contingency. The first parade
//! attached to a contingency is preceded by a synthetic "do nothing"
//! parade carrying the parent's pocket; the parent's curative elements
//! move to that first parade and are shared read-only with the others,
//! except the AC-emulation fictive shifters which are duplicated back
//! onto the parent.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};

use metrix_core::{Configuration, CurativeElement, Network, OutageId, OutageKind};

/// One parade record: parent contingency, optional constraint
/// restrictions, couplings to open or (with a `+` prefix) close.
#[derive(Debug, Clone)]
pub struct ParadeDef {
    pub outage_name: String,
    pub constraints: Vec<String>,
    pub couplings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParadeSet {
    pub parades: Vec<ParadeDef>,
}

pub fn read_parades_file(path: &Path) -> Result<ParadeSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading parade file '{}'", path.display()))?;
    parse_parades(&text).with_context(|| format!("parsing parade file '{}'", path.display()))
}

pub fn parse_parades(text: &str) -> Result<ParadeSet> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| anyhow!("empty parade file"))?;
    let mut fields = header.split(';');
    if fields.next().map(str::trim) != Some("NB") {
        bail!("parade file must start with an NB record");
    }
    let count: usize = fields
        .next()
        .ok_or_else(|| anyhow!("NB record without a count"))?
        .trim()
        .parse()
        .context("parsing the NB count")?;

    let mut set = ParadeSet::default();
    for _ in 0..count {
        let Some(line) = lines.next() else {
            // end of file before reading every announced parade
            break;
        };
        if line.trim().is_empty() {
            break;
        }
        let mut fields = line.split(';');
        let head = fields.next().unwrap().trim_end();

        // `incident|constraint|constraint…` restricts the parade to the
        // named monitored elements.
        let mut pieces = head.split('|').map(|p| p.trim_end().to_string());
        let outage_name = pieces.next().unwrap();
        let constraints: Vec<String> = pieces.collect();

        let coupling_count: usize = fields
            .next()
            .ok_or_else(|| anyhow!("parade '{}' without a coupling count", outage_name))?
            .trim()
            .parse()
            .with_context(|| format!("coupling count of parade '{}'", outage_name))?;
        let mut couplings = Vec::with_capacity(coupling_count);
        for _ in 0..coupling_count {
            let coupling = fields
                .next()
                .ok_or_else(|| anyhow!("parade '{}' ends before its coupling count", outage_name))?;
            couplings.push(coupling.trim_end().to_string());
        }
        set.parades.push(ParadeDef {
            outage_name,
            constraints,
            couplings,
        });
    }
    Ok(set)
}

/// Build the parades onto the network: validate, insert the synthetic
/// "do nothing" parade, and redistribute the curative elements.
pub fn attach_parades(net: &mut Network, config: &Configuration, set: &ParadeSet) {
    for def in &set.parades {
        let Some(&parent_id) = net.outage_index.get(&def.outage_name) else {
            warn!(outage = %def.outage_name, "parade references an unknown contingency, skipping");
            continue;
        };
        if !net.outage(parent_id).valid {
            continue;
        }
        build_parade(net, config, parent_id, def);
    }

    redistribute_curative_elements(net);
    info!(total = net.outages.len(), "contingencies and parades");
}

fn build_parade(net: &mut Network, config: &Configuration, parent_id: OutageId, def: &ParadeDef) {
    let mut name = String::new();
    let mut allowed = std::collections::BTreeSet::new();
    for constraint in &def.constraints {
        match net.monitor_outage_index.get(constraint) {
            Some(&mid) => {
                allowed.insert(mid);
            }
            None => warn!(constraint = %constraint, "parade restricted to an unknown monitored element, skipping the restriction"),
        }
    }

    let id = OutageId::new(net.outages.len());
    let mut parade = net.outage(parent_id).clone_as_parade(id, "");
    parade.allowed_constraints = allowed;

    for (index, coupling) in def.couplings.iter().enumerate() {
        if index > 0 {
            name.push_str(" / ");
        }
        name.push_str(coupling);

        let (to_close, branch_name) = match coupling.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, coupling.as_str()),
        };
        let Some(&branch) = net.branch_index.get(branch_name) else {
            warn!(coupling = %branch_name, "parade coupling references an unknown branch, dropping the parade");
            return;
        };
        if net.branch(branch).from == net.branch(branch).to {
            warn!(coupling = %branch_name, "parade coupling loops on itself, dropping the parade");
            return;
        }
        if net.outage(parent_id).branches.contains(&branch) {
            warn!(
                coupling = %branch_name,
                outage = %net.outage(parent_id).name,
                "coupling already tripped by the contingency, skipping"
            );
            continue;
        }
        parade.kind = OutageKind::Mixed;
        if to_close {
            if parade.closings.contains(&branch) {
                warn!(coupling = %branch_name, "coupling already in the parade, skipping");
                continue;
            }
            parade.closings.push(branch);
        } else {
            if parade.branches.contains(&branch) {
                warn!(coupling = %branch_name, "coupling already in the parade, skipping");
                continue;
            }
            parade.branches.push(branch);
        }
    }

    if name.is_empty() {
        name = "PARADE_NRF".to_string();
    }
    parade.name = name;
    let probes_topology = !def.couplings.is_empty();

    // Probe connectivity from inside the arena, then rewind if invalid.
    net.outages.push(parade);
    if probes_topology {
        net.check_outage_connectivity(id, config.accept_breaking_outages || config.accept_breaking_parades, config);
        if !net.outage(id).valid {
            info!(
                parade = %net.outage(id).name,
                outage = %net.outage(parent_id).name,
                "parade breaks connectivity and is rejected"
            );
            net.breaking_outages.retain(|&o| o != id);
            net.outages.pop();
            return;
        }
    }

    // The first accepted parade triggers the synthetic "do nothing"
    // alternative, numbered before it.
    if net.outage(parent_id).parades.is_empty() {
        let parade = net.outages.pop().expect("parade just pushed");
        net.breaking_outages.retain(|&o| o != id);
        insert_do_nothing_parade(net, parent_id);
        let id = OutageId::new(net.outages.len());
        let mut parade = parade;
        parade.id = id;
        let reprobe = !parade.branches.is_empty() || !parade.closings.is_empty();
        net.outages.push(parade);
        if reprobe && probes_topology {
            net.check_outage_connectivity(id, config.accept_breaking_outages || config.accept_breaking_parades, config);
        }
        net.outage_mut(parent_id).parades.push(id);
        debug!(parade = %net.outage(id).name, actions = net.outage(id).branches.len() + net.outage(id).closings.len(), "parade added");
    } else {
        net.outage_mut(parent_id).parades.push(id);
        debug!(parade = %net.outage(id).name, actions = net.outage(id).branches.len() + net.outage(id).closings.len(), "parade added");
    }
}

/// Clone the parent as a "do nothing" parade, pocket included.
fn insert_do_nothing_parade(net: &mut Network, parent_id: OutageId) {
    let id = OutageId::new(net.outages.len());
    let parent_name = net.outage(parent_id).name.clone();
    let mut parade = net
        .outage(parent_id)
        .clone_as_parade(id, format!("{}_NRF", parent_name));
    parade.pocket = net.outage(parent_id).pocket.clone();
    let breaking = parade.pocket.is_some();
    net.outages.push(parade);
    net.outage_mut(parent_id).parades.push(id);
    if breaking {
        net.breaking_outages.push(id);
    }
}

/// Move the parent's curative elements onto its first parade, share them
/// with the other parades, and duplicate the fictive-shifter entries back
/// onto the parent (their fictive branch is parade-specific).
fn redistribute_curative_elements(net: &mut Network) {
    for parent_index in 0..net.outage_count_without_parades {
        let parent_id = OutageId::new(parent_index);
        let parades = net.outage(parent_id).parades.clone();
        if parades.is_empty() || net.outage(parent_id).curative_actions.is_empty() {
            continue;
        }

        let actions = std::mem::take(&mut net.outage_mut(parent_id).curative_actions);
        for &pid in &parades[1..] {
            net.outage_mut(pid).curative_actions = actions.clone();
        }
        let fictive: Vec<_> = actions
            .iter()
            .filter(|a| {
                matches!(a.element, CurativeElement::PhaseShifter(sid) if net.shifter(sid).is_fictive)
            })
            .cloned()
            .collect();
        net.outage_mut(parades[0]).curative_actions = actions;
        net.outage_mut(parent_id).curative_actions = fictive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::testkit;

    #[test]
    fn test_parse_header_and_records() {
        let text = "NB;2\n\
                    AB;2;+CPL1;LINE_2\n\
                    AB|MON_1|MON_2;1;LINE_3\n";
        let set = parse_parades(text).unwrap();
        assert_eq!(set.parades.len(), 2);
        assert_eq!(set.parades[0].outage_name, "AB");
        assert_eq!(set.parades[0].couplings, vec!["+CPL1".to_string(), "LINE_2".to_string()]);
        assert_eq!(set.parades[1].constraints, vec!["MON_1".to_string(), "MON_2".to_string()]);
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let set = parse_parades("NB;3\nAB;0\n\nCD;0\n").unwrap();
        assert_eq!(set.parades.len(), 1);
    }

    #[test]
    fn test_do_nothing_parade_inserted_first() {
        let (config, mut net) = testkit::three_node_ring();
        let set = parse_parades("NB;1\nAB;1;+AB2\n").unwrap();
        attach_parades(&mut net, &config, &set);

        let parent = net.outage_index["AB"];
        let parades = &net.outage(parent).parades;
        assert_eq!(parades.len(), 2);
        assert_eq!(net.outage(parades[0]).name, "AB_NRF");
        assert_eq!(net.outage(parades[1]).name, "+AB2");
        // The do-nothing parade carries no extra action.
        assert_eq!(net.outage(parades[0]).branches, net.outage(parent).branches);
        assert!(net.outage(parades[0]).closings.is_empty());
    }

    #[test]
    fn test_parade_inherits_parent_open_set() {
        let (config, mut net) = testkit::three_node_ring();
        let set = parse_parades("NB;1\nAB;1;+AB2\n").unwrap();
        attach_parades(&mut net, &config, &set);

        let parent = net.outage_index["AB"];
        let parade_id = net.outage(parent).parades[1];
        let parade = net.outage(parade_id);
        assert!(parade.is_parade);
        assert_eq!(parade.parent, Some(parent));
        // Opened set is a superset of the parent's; closings disjoint.
        for b in &net.outage(parent).branches {
            assert!(parade.branches.contains(b));
        }
        assert!(parade.closings.contains(&net.branch_index["AB2"]));
        for b in &parade.closings {
            assert!(!parade.branches.contains(b));
        }
    }

    #[test]
    fn test_connectivity_breaking_parade_rejected() {
        let (config, mut net) = testkit::three_node_ring();
        // Opening both BC and CA (with AB already out) would isolate
        // every node; the parade opening CA on top of the AB contingency
        // islands node A and is rejected by default.
        let set = parse_parades("NB;1\nAB;1;CA\n").unwrap();
        let before = net.outages.len();
        attach_parades(&mut net, &config, &set);
        // No parade kept, so no do-nothing parade either.
        assert_eq!(net.outages.len(), before);
        assert!(net.outage(net.outage_index["AB"]).parades.is_empty());
    }

    #[test]
    fn test_unknown_incident_skipped() {
        let (config, mut net) = testkit::three_node_ring();
        let set = parse_parades("NB;1\nNO_SUCH;1;BC\n").unwrap();
        let before = net.outages.len();
        attach_parades(&mut net, &config, &set);
        assert_eq!(net.outages.len(), before);
    }

    #[test]
    fn test_curative_elements_move_to_first_parade() {
        let (config, mut net) = testkit::emulated_hvdc_pair();
        // The fictive shifter of the emulated link answers LOSS_BC.
        let parent = net.outage_index["LOSS_BC"];
        assert!(!net.outage(parent).curative_actions.is_empty());

        let set = parse_parades("NB;1\nLOSS_BC;1;+BC2\n").unwrap();
        attach_parades(&mut net, &config, &set);

        let parades = net.outage(parent).parades.clone();
        assert_eq!(parades.len(), 2);
        // Every parade sees the curative actions.
        assert!(!net.outage(parades[0]).curative_actions.is_empty());
        assert!(!net.outage(parades[1]).curative_actions.is_empty());
        // The fictive-shifter entries were duplicated back onto the
        // parent.
        assert!(net
            .outage(parent)
            .curative_actions
            .iter()
            .all(|a| matches!(a.element, CurativeElement::PhaseShifter(_))));
        assert!(!net.outage(parent).curative_actions.is_empty());
    }
}
