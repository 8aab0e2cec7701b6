//! Tag Reconciliation Core
//!
//! This crate reconciles tag identifiers scanned from physical radio tags
//! against the expected identifiers of a remote record (a receipt), and on a
//! match drives a best-effort deactivation batch against the inventory store.

pub mod client;
pub mod events;
pub mod identifier;
pub mod report;
pub mod session;

use thiserror::Error;

pub use client::{deactivate_batch, DeactivationResult, RecordClient};
pub use events::{pump_tag_events, ChannelTagSource, PumpStats, TagEventSource};
pub use identifier::{normalize, normalize_bytes, normalize_str, Identifier, RawIdentifier, RecordKey};
pub use report::{ReconcileReport, ReportFormat};
pub use session::{
    LoadOutcome, Phase, ScanDisposition, Session, SessionConfig, SessionHandle, SessionSnapshot,
    VerificationOutcome,
};

/// Operator text shown after a successful load
pub const MSG_LOADED: &str = "Receipt loaded. Ready to scan.";
/// Operator text for every load failure (not found, empty, transport)
pub const MSG_LOAD_FAILED: &str = "No items found or failed to connect.";
/// Operator text for a blank receipt field
pub const MSG_INVALID_KEY: &str = "Enter a valid receipt ID.";
/// Operator text after a matched verification
pub const MSG_VERIFIED: &str = "Items verified. Tags deactivated.";
/// Operator text after a mismatched verification
pub const MSG_MISMATCH: &str = "Mismatch detected!";

/// Failure to fetch the expected identifiers of a record.
///
/// All variants collapse into the same operator-facing message; the
/// distinction is kept for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Record not found")]
    NotFound,

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Record has no items")]
    Empty,
}

impl FetchError {
    pub fn user_message(&self) -> &'static str {
        MSG_LOAD_FAILED
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Failure to deactivate a single identifier. Never fatal to a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeactivateError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status: {0}")]
    Status(u16),
}

impl DeactivateError {
    /// Status code returned by the store, if the request got that far
    pub fn status(&self) -> Option<u16> {
        match self {
            DeactivateError::Status(code) => Some(*code),
            DeactivateError::Transport(_) => None,
        }
    }
}

pub type DeactivateResult<T> = Result<T, DeactivateError>;

/// Verification produced unequal sets. A legitimate outcome, not a fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} (expected {} items, scanned {})", MSG_MISMATCH, expected.len(), scanned.len())]
pub struct MismatchError {
    pub expected: Vec<Identifier>,
    pub scanned: Vec<Identifier>,
}

impl MismatchError {
    /// Expected identifiers that were never scanned
    pub fn missing(&self) -> Vec<&Identifier> {
        self.expected
            .iter()
            .filter(|id| self.scanned.binary_search(id).is_err())
            .collect()
    }

    /// Scanned identifiers that do not belong to the record
    pub fn unexpected(&self) -> Vec<&Identifier> {
        self.scanned
            .iter()
            .filter(|id| self.expected.binary_search(id).is_err())
            .collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid record key")]
    InvalidRecordKey,

    #[error("Session not ready for verification (phase: {0})")]
    NotReady(Phase),

    #[error("Load superseded by a newer load")]
    Superseded,

    #[error("Load failed: {0}")]
    LoadFailed(#[from] FetchError),

    #[error("Session closed")]
    Closed,
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidRecordKey => MSG_INVALID_KEY.to_string(),
            SessionError::LoadFailed(e) => e.user_message().to_string(),
            other => other.to_string(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
