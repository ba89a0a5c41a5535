//! # metrix-engine: the sequential variant processor
//!
//! Ties the workspace together: build the network from the flat input,
//! rewrite the base state from the base variant, attach the parades, then
//! process every operating variant in numeric order, solving a
//! security-constrained DC dispatch for each and restoring the base state
//! in between.
//!
//! ```no_run
//! use metrix_core::{Configuration, NetworkInput};
//! use metrix_engine::VariantEngine;
//! use metrix_scenarios::{parse_parades, parse_variants};
//!
//! let config = Configuration::default();
//! let input: NetworkInput = serde_json::from_str("{}").unwrap();
//! let variants = parse_variants("NT;1\n0\n").unwrap();
//! let parades = parse_parades("NB;0\n").unwrap();
//!
//! let mut engine = VariantEngine::new(config, &input).unwrap();
//! engine.prepare(&variants, &parades).unwrap();
//! for report in engine.run(&variants) {
//!     println!("{}", serde_json::to_string(&report).unwrap());
//! }
//! ```

pub mod results;
pub mod runner;

pub use results::{VariantReport, VariantStatus};
pub use runner::VariantEngine;
