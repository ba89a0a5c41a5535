//! Error taxonomy shared by the METRIX workspace.
//!
//! Input and data problems flow back as `Result`s; panics are reserved for
//! programmer errors. Construction errors ([`ConfigError`]) abort
//! initialization, variant errors ([`VariantError`]) invalidate the current
//! variant only, and solver errors ([`SolverError`]) become the variant's
//! outcome.

use thiserror::Error;

/// Malformed or inconsistent network/configuration input. Fatal: aborts
/// initialization.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("array '{key}' has {actual} entries, expected {expected}")]
    LengthMismatch {
        key: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid node index in '{key}' for element '{element}'")]
    BadIndex { key: &'static str, element: String },

    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    #[error("generator '{name}': Pmin {pmin} above Pmax {pmax}")]
    PminAbovePmax { name: String, pmin: f64, pmax: f64 },

    #[error("load '{name}': shed fraction {value}% outside [0, 100]")]
    ShedFractionOutOfRange { name: String, value: i64 },

    #[error("'{name}': setpoint outside its [Pmin, Pmax] interval")]
    SetpointOutOfBounds { name: String },

    #[error("phase-shifter '{0}': unknown control mode")]
    BadShifterControl(String),

    #[error("HVDC link '{0}' in AC emulation with a zero gain")]
    ZeroEmulationGain(String),

    #[error("contingency {0}: unknown element kind {1} in descriptor stream")]
    UnknownOutageElementKind(usize, i64),

    #[error("contingency {0}: bad element reference in descriptor stream")]
    BadOutageElement(usize),

    #[error("'{member}' of coupling group '{group}' is not adjustable")]
    NonAdjustableInGroup { group: String, member: String },

    #[error("'{member}' of coupling group '{group}' is not sheddable")]
    NonSheddableInGroup { group: String, member: String },

    #[error("network is not connected")]
    Disconnected,

    #[error("frequency-reserve half-band {half_band} MW cannot cover the largest generation contingency ({max_loss} MW)")]
    ReserveTooSmall { half_band: f64, max_loss: f64 },

    #[error("contingency '{0}' islands the network while also tripping generation or HVDC links")]
    PocketWithSource(String),

    #[error("HVDC link '{0}' emulates AC between different synchronous zones")]
    AcEmulationCrossZone(String),
}

/// A problem with one variant. Invalidates that variant only; processing
/// continues with the next one.
#[derive(Error, Debug)]
pub enum VariantError {
    #[error("variant {variant}: unknown {kind} '{name}'")]
    UnknownEntity {
        variant: i32,
        kind: &'static str,
        name: String,
    },

    #[error("variant {variant}: zonal balance on '{region}' left a residual of {residual} MW")]
    BalanceUnreachable {
        variant: i32,
        region: String,
        residual: f64,
    },

    #[error("variant {variant}: balance by consumption with adjustable generator '{generator}' in the zone")]
    ImposedGroupInBalance { variant: i32, generator: String },

    #[error("variant {variant}: HVDC link '{name}' setpoint outside its [Pmin, Pmax] interval")]
    HvdcSetpointOutOfBounds { variant: i32, name: String },

    #[error("variant {variant}: generator bounds became inconsistent")]
    InconsistentGeneratorBounds { variant: i32 },

    #[error("variant {variant}: line unavailabilities disconnect the network")]
    Disconnected { variant: i32 },
}

/// Solver-side failure; becomes the variant's outcome.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("dispatch problem is infeasible: {}", trace.join("; "))]
    Infeasible { trace: Vec<String> },

    #[error("solver wall-clock budget exhausted")]
    Timeout,

    #[error("solver internal error: {0}")]
    Internal(String),
}

/// Unified error type for the METRIX workspace.
#[derive(Error, Debug)]
pub enum MetrixError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("variant error: {0}")]
    Variant(#[from] VariantError),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Convenience alias for results using [`MetrixError`].
pub type MetrixResult<T> = Result<T, MetrixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::ReserveTooSmall {
            half_band: 10.0,
            max_loss: 250.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("250"));
    }

    #[test]
    fn test_unified_conversion() {
        fn fails() -> MetrixResult<()> {
            Err(ConfigError::Disconnected)?
        }
        assert!(matches!(fails(), Err(MetrixError::Config(_))));
    }

    #[test]
    fn test_solver_trace_display() {
        let err = SolverError::Infeasible {
            trace: vec!["LINE_A in N".into(), "LINE_B on outage 3".into()],
        };
        assert!(err.to_string().contains("LINE_A in N; LINE_B on outage 3"));
    }
}
