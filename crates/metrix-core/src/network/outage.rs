//! Contingencies, remedial actions and lost pockets.

use std::collections::BTreeSet;

use crate::{BranchId, GenId, HvdcId, LoadId, MonitorId, NodeId, OutageId, ShifterId};

/// Classification of a contingency by what it trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageKind {
    /// A single branch.
    LineOnly,
    /// Generators only.
    GroupOnly,
    /// Any other combination (also used for every parade).
    Mixed,
    Unknown,
}

/// The element a curative action drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurativeElement {
    /// A phase-shifter; covers the fictive shifters carried by AC-emulation
    /// HVDC links.
    PhaseShifter(ShifterId),
    Hvdc(HvdcId),
    Generator(GenId),
    Load(LoadId),
}

/// A post-contingency remedial lever attached to one contingency.
///
/// The variable slots are per-variant workspace; [`CurativeAction::reset`]
/// clears them between variants.
#[derive(Debug, Clone)]
pub struct CurativeAction {
    pub element: CurativeElement,
    /// Index of the curative adjustment variable in the solver's table.
    pub curative_var: Option<usize>,
    /// Index of the binary activation variable, when one exists.
    pub activation_var: Option<usize>,
}

impl CurativeAction {
    pub fn new(element: CurativeElement) -> Self {
        Self {
            element,
            curative_var: None,
            activation_var: None,
        }
    }

    pub fn reset(&mut self) {
        self.curative_var = None;
        self.activation_var = None;
    }
}

/// The nodes islanded from the main synchronous component by a
/// contingency, with what they carry.
#[derive(Debug, Clone, Default)]
pub struct LostPocket {
    pub nodes: BTreeSet<NodeId>,
    /// Maximum available generation inside the pocket.
    pub max_generation_mw: f64,
    /// Whether the pocket carries any generator or load at all.
    pub has_load_or_generation: bool,
    /// Generation actually lost in the current variant (filled at solve
    /// time).
    pub lost_generation_mw: f64,
    /// Consumption actually lost in the current variant.
    pub lost_load_mw: f64,
    /// The contingency's branch list with the branches that became purely
    /// internal to the pocket (or redundantly tie it) removed.
    pub reduced_branches: Vec<BranchId>,
}

/// A contingency: elements whose simultaneous outage is simulated, plus
/// the remedial ("parade") bookkeeping when this entry *is* a parade.
#[derive(Debug, Clone)]
pub struct Contingency {
    pub id: OutageId,
    pub name: String,
    pub kind: OutageKind,

    /// Branches opened by the contingency (fictive AC-emulation branches of
    /// tripped HVDC links included).
    pub branches: Vec<BranchId>,
    pub generators: Vec<GenId>,
    pub hvdcs: Vec<HvdcId>,
    /// Couplings closed by the remedial action; empty on real
    /// contingencies.
    pub closings: Vec<BranchId>,

    pub valid: bool,
    pub valid_base: bool,
    /// Selects the complex-outage threshold column.
    pub complex: bool,

    pub probability: f64,
    pub probability_base: f64,

    pub is_parade: bool,
    /// The contingency this parade answers.
    pub parent: Option<OutageId>,
    /// Alternative parades, in declaration order; the synthetic
    /// "do-nothing" parade comes first.
    pub parades: Vec<OutageId>,
    /// Monitored elements whose constraint may trigger this parade; empty
    /// means unrestricted.
    pub allowed_constraints: BTreeSet<MonitorId>,

    pub curative_actions: Vec<CurativeAction>,

    pub pocket: Option<LostPocket>,
    /// Set on a pocket-carrying contingency when one of its parades
    /// recovers the pocket, fully or partially.
    pub pocket_recoverable: bool,

    // Per-variant workspace, cleared on reset.
    pub parades_activated: bool,
    pub curative_pending: bool,
    pub activation_var: Option<usize>,
    /// Constraint rows this contingency contributed to the current problem.
    pub constraint_rows: Vec<usize>,
}

impl Contingency {
    pub fn new(id: OutageId, kind: OutageKind) -> Self {
        Self {
            id,
            name: String::new(),
            kind,
            branches: Vec::new(),
            generators: Vec::new(),
            hvdcs: Vec::new(),
            closings: Vec::new(),
            valid: true,
            valid_base: true,
            complex: false,
            probability: 0.0,
            probability_base: 0.0,
            is_parade: false,
            parent: None,
            parades: Vec::new(),
            allowed_constraints: BTreeSet::new(),
            curative_actions: Vec::new(),
            pocket: None,
            pocket_recoverable: false,
            parades_activated: false,
            curative_pending: false,
            activation_var: None,
            constraint_rows: Vec::new(),
        }
    }

    /// Clone this contingency as a parade answering it.
    pub fn clone_as_parade(&self, id: OutageId, name: impl Into<String>) -> Self {
        let mut parade = Self::new(id, self.kind);
        parade.name = name.into();
        parade.branches = self.branches.clone();
        parade.generators = self.generators.clone();
        parade.hvdcs = self.hvdcs.clone();
        parade.complex = self.complex;
        parade.probability = self.probability;
        parade.probability_base = self.probability_base;
        parade.is_parade = true;
        parade.parent = Some(self.id);
        parade
    }

    /// Whether the contingency touches the AC topology at all.
    pub fn changes_topology(&self) -> bool {
        !self.branches.is_empty() || !self.closings.is_empty()
    }

    /// Clear the per-variant workspace.
    pub fn reset_variant_state(&mut self) {
        self.curative_pending = false;
        self.parades_activated = false;
        self.activation_var = None;
        self.constraint_rows.clear();
        for action in &mut self.curative_actions {
            action.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parade_clone_inherits_outage_set() {
        let mut inc = Contingency::new(OutageId::new(3), OutageKind::Mixed);
        inc.name = "INC".into();
        inc.branches = vec![BranchId::new(1), BranchId::new(4)];
        inc.complex = true;
        inc.probability = 0.02;

        let parade = inc.clone_as_parade(OutageId::new(9), "INC / OPEN L5");
        assert!(parade.is_parade);
        assert_eq!(parade.parent, Some(OutageId::new(3)));
        assert_eq!(parade.branches, inc.branches);
        assert!(parade.complex);
        assert_eq!(parade.probability, 0.02);
        assert!(parade.closings.is_empty());
        assert!(parade.parades.is_empty());
    }

    #[test]
    fn test_variant_state_reset() {
        let mut inc = Contingency::new(OutageId::new(0), OutageKind::LineOnly);
        inc.parades_activated = true;
        inc.curative_pending = true;
        inc.activation_var = Some(7);
        inc.constraint_rows.push(2);
        inc.curative_actions
            .push(CurativeAction::new(CurativeElement::Hvdc(HvdcId::new(0))));
        inc.curative_actions[0].curative_var = Some(11);

        inc.reset_variant_state();
        assert!(!inc.parades_activated);
        assert!(!inc.curative_pending);
        assert!(inc.activation_var.is_none());
        assert!(inc.constraint_rows.is_empty());
        assert!(inc.curative_actions[0].curative_var.is_none());
    }
}
