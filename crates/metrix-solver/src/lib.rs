//! # metrix-solver: the dispatch contract and its built-in LP driver
//!
//! Exposes to the solver side of the engine, per variant:
//!
//! - the decision-variable table with bounds, costs and integrality
//!   ([`DispatchProblem`]);
//! - the influence-coefficient matrices for the base case and each valid
//!   contingency, cached per topology ([`InfluenceCache`]);
//! - the constraint rows, basecase limits first and contingency limits
//!   generated lazily as violations appear;
//! - the threshold resolution carried by the monitored elements of the
//!   core model.
//!
//! The built-in driver assembles and solves the continuous relaxation
//! with `good_lp` on the Clarabel backend, decides parade activation
//! greedily in declaration order, writes the decision back into the live
//! model and returns typed aggregates ([`DispatchOutcome`]).

pub mod dispatch;
pub mod problem;
pub mod sensitivity;
pub mod solution;

pub use dispatch::{solve_dispatch, ConstraintRow};
pub use problem::{DecisionVariable, DispatchProblem, VariableKind};
pub use sensitivity::{InfluenceCache, PtdfMatrix};
pub use solution::{
    CurativeActivation, DispatchOutcome, MonitorFlow, MonitorViolation, ZoneResult,
};
