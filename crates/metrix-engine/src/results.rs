//! Per-variant outcome records handed to the result writer.

use serde::Serialize;

use metrix_solver::DispatchOutcome;

/// How a variant ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    /// The dispatch solved.
    Solved,
    /// The variant could not be applied; the engine moved on.
    Skipped,
    /// The solver rejected the variant (infeasible, timeout, internal).
    Failed,
}

/// The record of one processed variant.
#[derive(Debug, Serialize)]
pub struct VariantReport {
    pub variant: i32,
    pub status: VariantStatus,
    /// Diagnostic for skipped and failed variants.
    pub message: Option<String>,
    pub outcome: Option<DispatchOutcome>,
}

impl VariantReport {
    pub fn solved(variant: i32, outcome: DispatchOutcome) -> Self {
        Self {
            variant,
            status: VariantStatus::Solved,
            message: None,
            outcome: Some(outcome),
        }
    }

    pub fn skipped(variant: i32, message: impl ToString) -> Self {
        Self {
            variant,
            status: VariantStatus::Skipped,
            message: Some(message.to_string()),
            outcome: None,
        }
    }

    pub fn failed(variant: i32, message: impl ToString) -> Self {
        Self {
            variant,
            status: VariantStatus::Failed,
            message: Some(message.to_string()),
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes() {
        let report = VariantReport::skipped(3, "unknown region");
        let text = serde_json::to_string(&report).unwrap();
        assert!(text.contains("\"variant\":3"));
        assert!(text.contains("\"skipped\""));
    }
}
