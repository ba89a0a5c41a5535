//! # metrix-core: security-constrained DC-OPF network model
//!
//! Provides the in-memory model a METRIX computation works on: the typed
//! network (nodes, branches, phase-shifters, HVDC links, generators, loads,
//! monitored elements, contingencies), the configuration store and the
//! connectivity analyzer.
//!
//! ## Design
//!
//! Nodes and branches reference each other cyclically, so the model is held
//! in **arena-indexed vectors** (`Vec<Node>`, `Vec<Branch>`, ...) with
//! integer back-references through newtype ids. No reference counting, no
//! graph library: the connectivity algorithm works directly on branch
//! endpoint flags.
//!
//! Every field a variant may change carries a `*_base` shadow holding the
//! baseline value. Variants mutate the live field only; the reset protocol
//! restores from the shadow. The shadows themselves change exactly once,
//! when the base variant (number −1) is applied.
//!
//! ## Modules
//!
//! - [`config`] - The global computation parameters (explicit handle, not a
//!   process singleton)
//! - [`input`] - Flat parallel-array network description (the DIE image)
//! - [`network`] - The typed network arenas and the construction algorithm
//! - [`connectivity`] - Union-find zone analysis, slack selection, lost
//!   pockets
//! - [`error`] - The error taxonomy shared by the workspace

use serde::{Deserialize, Serialize};

pub mod config;
pub mod connectivity;
pub mod error;
pub mod input;
pub mod network;
pub mod testkit;

pub use config::{ComputationKind, Configuration, SolverBackend};
pub use error::{ConfigError, MetrixError, MetrixResult, SolverError, VariantError};
pub use input::NetworkInput;
pub use network::monitor::{MonitorKind, MonitoredElement, ThresholdSet, UNDEFINED};
pub use network::outage::{Contingency, CurativeAction, CurativeElement, LostPocket, OutageKind};
pub use network::{
    Adjustability, Branch, BranchKind, CoupledGenerators, CoupledLoads, Generator, GroupReference,
    HvdcControl, HvdcLink, Load, Network, Node, NodeKind, PhaseShifter, ShifterControl,
};

/// General numeric tolerance used by validity checks.
pub const EPSILON: f64 = 1e-6;

/// Residual tolerance for the merit-order zonal balance.
pub const EPSILON_BALANCE: f64 = 1e-3;

/// Admittance split factor used when a phase-shifter is inserted in series:
/// the auxiliary branch carries `y / K_SPLIT`, the real branch
/// `y / (1 - K_SPLIT)`, so that the series combination stays `y`.
pub const K_SPLIT: f64 = 0.5;

// Newtype wrappers for arena indices for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShifterId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HvdcId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutageId(usize);

impl NodeId {
    #[inline]
    pub fn new(value: usize) -> Self {
        NodeId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl BranchId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BranchId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl GenId {
    #[inline]
    pub fn new(value: usize) -> Self {
        GenId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl LoadId {
    #[inline]
    pub fn new(value: usize) -> Self {
        LoadId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl ShifterId {
    #[inline]
    pub fn new(value: usize) -> Self {
        ShifterId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl HvdcId {
    #[inline]
    pub fn new(value: usize) -> Self {
        HvdcId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl MonitorId {
    #[inline]
    pub fn new(value: usize) -> Self {
        MonitorId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl OutageId {
    #[inline]
    pub fn new(value: usize) -> Self {
        OutageId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}
