//! Reconciliation reports

pub mod json;
pub mod text;

use crate::session::verified_message;
use crate::{
    DeactivationResult, Identifier, MismatchError, RecordKey, VerificationOutcome, MSG_MISMATCH,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Text,
}

/// Aggregate result of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub session_id: Option<Uuid>,
    pub record_key: Option<RecordKey>,
    pub generation: u64,
    pub outcome: VerificationOutcome,
    /// One entry per scanned identifier, in the order deactivation was
    /// attempted. Empty on a mismatch.
    pub deactivations: Vec<DeactivationResult>,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

impl ReconcileReport {
    pub fn mismatched(
        session_id: Option<Uuid>,
        record_key: Option<RecordKey>,
        generation: u64,
        outcome: VerificationOutcome,
    ) -> Self {
        Self {
            session_id,
            record_key,
            generation,
            outcome,
            deactivations: Vec::new(),
            message: MSG_MISMATCH.to_string(),
            completed_at: Utc::now(),
        }
    }

    pub fn verified(
        session_id: Option<Uuid>,
        record_key: Option<RecordKey>,
        generation: u64,
        outcome: VerificationOutcome,
        deactivations: Vec<DeactivationResult>,
    ) -> Self {
        Self {
            session_id,
            record_key,
            generation,
            message: verified_message(&deactivations),
            outcome,
            deactivations,
            completed_at: Utc::now(),
        }
    }

    /// Whether the scanned set matched. Deactivation failures never change it.
    pub fn verified_ok(&self) -> bool {
        self.outcome.matched
    }

    pub fn failed_deactivations(&self) -> impl Iterator<Item = &DeactivationResult> {
        self.deactivations.iter().filter(|r| !r.succeeded)
    }

    /// Identifiers the caller may want to retry or alert on
    pub fn failed_identifiers(&self) -> Vec<&Identifier> {
        self.failed_deactivations().map(|r| &r.identifier).collect()
    }

    pub fn into_result(self) -> Result<Self, MismatchError> {
        if self.outcome.matched {
            Ok(self)
        } else {
            Err(MismatchError {
                expected: self.outcome.expected,
                scanned: self.outcome.scanned,
            })
        }
    }
}

/// Generate report in specified format
pub fn generate_report(report: &ReconcileReport, format: ReportFormat) -> Result<String, ReportError> {
    match format {
        ReportFormat::Json => json::generate(report),
        ReportFormat::Text => Ok(text::generate(report)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeactivateError;

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().map(|r| Identifier::from(*r)).collect()
    }

    #[test]
    fn test_partial_failure_stays_verified() {
        let outcome = VerificationOutcome::compare(ids(&["A1", "B2"]), ids(&["A1", "B2"]));
        let report = ReconcileReport::verified(
            None,
            RecordKey::parse("R1"),
            1,
            outcome,
            vec![
                DeactivationResult::from_outcome(Identifier::from("A1"), Ok(200)),
                DeactivationResult::from_outcome(
                    Identifier::from("B2"),
                    Err(DeactivateError::Transport("connection reset".into())),
                ),
            ],
        );

        assert!(report.verified_ok());
        assert_eq!(report.failed_identifiers(), vec![&Identifier::from("B2")]);
        assert!(report.clone().into_result().is_ok());
    }

    #[test]
    fn test_mismatch_into_error() {
        let outcome = VerificationOutcome::compare(ids(&["0A1B2C", "FF0011"]), ids(&["0A1B2C"]));
        let report = ReconcileReport::mismatched(None, RecordKey::parse("R1"), 1, outcome);

        assert!(!report.verified_ok());
        assert!(report.deactivations.is_empty());
        let err = report.into_result().unwrap_err();
        assert_eq!(err.missing(), vec![&Identifier::from("FF0011")]);
    }
}
