//! # metrix-scenarios: operating variants and remedial actions
//!
//! Parses the line-oriented variant and parade files, resolves their
//! entity names against a network, and drives the reversible mutation
//! protocol: apply a variant's deltas in a fixed order, balance each zone
//! by merit order, and restore the base state bit-exactly afterwards.
//!
//! The base variant (number −1) is special: it rewrites the base shadows
//! themselves, so every later variant resets to the updated baseline.

pub mod apply;
pub mod parades;
pub mod resolve;
pub mod variant;

pub use apply::{
    apply_base_variant, apply_topology, apply_variant, reset_topology, reset_variant,
};
pub use parades::{attach_parades, parse_parades, read_parades_file, ParadeDef, ParadeSet};
pub use resolve::{resolve_variant, ResolvedVariant};
pub use variant::{
    parse_variants, read_variants_file, CostKind, ThresholdKind, VariantConfig, VariantSet,
    BASE_VARIANT,
};
