//! Reconciliation session state machine
//!
//! [`Session`] is the synchronous, single-owner state: one expected set, one
//! scanned set, a phase and a load generation. It never performs I/O. The
//! [`actor`] module runs it inside a tokio task and feeds it the completions
//! of remote fetches and deactivations.

pub mod actor;

pub use actor::{SessionConfig, SessionHandle};

use crate::{
    normalize, DeactivationResult, FetchError, FetchResult, Identifier, RawIdentifier, RecordKey,
    SessionError, SessionResult, MSG_INVALID_KEY, MSG_LOADED, MSG_LOAD_FAILED, MSG_MISMATCH,
    MSG_VERIFIED,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Session lifecycle phase.
///
/// `Verifying` is only held for the duration of the in-memory comparison. A
/// match goes straight on to `Deactivating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Verifying,
    Deactivating,
    Settled,
    Mismatched,
}

impl Phase {
    /// Whether scan events are applied in this phase
    pub fn accepts_scans(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Deactivating)
    }

    /// Whether `verify` may run in this phase
    pub fn accepts_verify(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Mismatched)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Loading => write!(f, "Loading"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Verifying => write!(f, "Verifying"),
            Phase::Deactivating => write!(f, "Deactivating"),
            Phase::Settled => write!(f, "Settled"),
            Phase::Mismatched => write!(f, "Mismatched"),
        }
    }
}

/// What happened to one scan event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanDisposition {
    /// New identifier, inserted into the scanned set
    Added(Identifier),
    /// Already scanned, set unchanged
    Duplicate(Identifier),
    /// Phase does not accept scans; the event was discarded
    Dropped(Phase),
    /// Normalized to an empty identifier
    Blank,
}

impl ScanDisposition {
    pub fn is_added(&self) -> bool {
        matches!(self, ScanDisposition::Added(_))
    }
}

/// Result of a successful load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub session_id: Uuid,
    pub record_key: RecordKey,
    pub expected_count: usize,
    pub message: String,
}

/// Normalized comparison of the expected and scanned sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub matched: bool,
    /// Expected identifiers, sorted
    pub expected: Vec<Identifier>,
    /// Scanned identifiers, sorted
    pub scanned: Vec<Identifier>,
}

impl VerificationOutcome {
    /// Compare two sorted, duplicate-free sequences element for element
    pub fn compare(expected: Vec<Identifier>, scanned: Vec<Identifier>) -> Self {
        let matched = expected.len() == scanned.len()
            && expected.iter().zip(scanned.iter()).all(|(e, s)| e == s);
        Self {
            matched,
            expected,
            scanned,
        }
    }
}

/// Read-only view of the session for presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub generation: u64,
    pub record_key: Option<RecordKey>,
    pub phase: Phase,
    pub expected_count: usize,
    pub scanned_count: usize,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The single live reconciliation session
#[derive(Debug)]
pub struct Session {
    session_id: Option<Uuid>,
    generation: u64,
    record_key: Option<RecordKey>,
    expected: BTreeSet<Identifier>,
    scanned: BTreeSet<Identifier>,
    phase: Phase,
    message: Option<String>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: None,
            generation: 0,
            record_key: None,
            expected: BTreeSet::new(),
            scanned: BTreeSet::new(),
            phase: Phase::Idle,
            message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn record_key(&self) -> Option<&RecordKey> {
        self.record_key.as_ref()
    }

    pub fn expected(&self) -> &BTreeSet<Identifier> {
        &self.expected
    }

    pub fn scanned(&self) -> &BTreeSet<Identifier> {
        &self.scanned
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Record that a load was requested with an unusable key.
    ///
    /// The session is otherwise untouched.
    pub fn reject_record_key(&mut self) {
        self.set_message(MSG_INVALID_KEY);
    }

    /// Start a new load, replacing the session wholesale.
    ///
    /// Returns the generation the fetch completion must carry.
    pub fn begin_load(&mut self, record_key: RecordKey) -> u64 {
        self.generation += 1;
        self.session_id = Some(Uuid::new_v4());
        self.record_key = Some(record_key);
        self.expected.clear();
        self.scanned.clear();
        self.phase = Phase::Loading;
        self.message = None;
        self.touch();
        self.generation
    }

    /// Apply a fetch completion.
    ///
    /// A completion from an older generation, or one arriving when no load
    /// is in flight, is ignored and reported as [`SessionError::Superseded`].
    /// Otherwise the scanned set is cleared whatever the outcome, after any
    /// scans that raced the fetch.
    pub fn complete_load(
        &mut self,
        generation: u64,
        fetched: FetchResult<Vec<String>>,
    ) -> SessionResult<LoadOutcome> {
        if generation != self.generation || self.phase != Phase::Loading {
            return Err(SessionError::Superseded);
        }
        let (Some(session_id), Some(record_key)) = (self.session_id, self.record_key.clone())
        else {
            return Err(SessionError::Superseded);
        };

        let expected: BTreeSet<Identifier> = match fetched {
            Ok(raw) => raw
                .iter()
                .map(|entry| Identifier::from(entry.as_str()))
                .filter(|id| !id.is_empty())
                .collect(),
            Err(e) => return Err(self.fail_load(e)),
        };

        if expected.is_empty() {
            return Err(self.fail_load(FetchError::Empty));
        }

        self.expected = expected;
        self.scanned.clear();
        self.phase = Phase::Ready;
        self.set_message(MSG_LOADED);

        Ok(LoadOutcome {
            session_id,
            record_key,
            expected_count: self.expected.len(),
            message: MSG_LOADED.to_string(),
        })
    }

    fn fail_load(&mut self, error: FetchError) -> SessionError {
        self.expected.clear();
        self.scanned.clear();
        self.phase = Phase::Idle;
        self.set_message(MSG_LOAD_FAILED);
        SessionError::LoadFailed(error)
    }

    /// Apply one scan event
    pub fn record_scan(&mut self, raw: &RawIdentifier) -> ScanDisposition {
        if !self.phase.accepts_scans() {
            return ScanDisposition::Dropped(self.phase);
        }

        let identifier = normalize(raw);
        if identifier.is_empty() {
            return ScanDisposition::Blank;
        }

        if self.scanned.insert(identifier.clone()) {
            self.touch();
            ScanDisposition::Added(identifier)
        } else {
            ScanDisposition::Duplicate(identifier)
        }
    }

    /// Compare the expected and scanned sets.
    ///
    /// On a match the session moves to `Deactivating` and the caller is
    /// expected to deactivate `outcome.scanned` and report back through
    /// [`Session::complete_deactivation`]. On a mismatch it moves to
    /// `Mismatched`.
    pub fn verify(&mut self) -> SessionResult<VerificationOutcome> {
        if !self.phase.accepts_verify() {
            return Err(SessionError::NotReady(self.phase));
        }

        self.phase = Phase::Verifying;

        // BTreeSet iteration is already lexicographic on the canonical string
        let outcome = VerificationOutcome::compare(
            self.expected.iter().cloned().collect(),
            self.scanned.iter().cloned().collect(),
        );

        if outcome.matched {
            self.phase = Phase::Deactivating;
            self.message = None;
            self.touch();
        } else {
            self.phase = Phase::Mismatched;
            self.set_message(MSG_MISMATCH);
        }

        Ok(outcome)
    }

    /// Apply a deactivation completion.
    ///
    /// Returns `false` when a newer load replaced the session in the
    /// meantime; the results are then left for the caller only.
    pub fn complete_deactivation(
        &mut self,
        generation: u64,
        results: &[DeactivationResult],
    ) -> bool {
        if generation != self.generation || self.phase != Phase::Deactivating {
            return false;
        }

        self.phase = Phase::Settled;
        self.set_message(&verified_message(results));
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            generation: self.generation,
            record_key: self.record_key.clone(),
            phase: self.phase,
            expected_count: self.expected.len(),
            scanned_count: self.scanned.len(),
            message: self.message.clone(),
            updated_at: self.updated_at,
        }
    }

    fn set_message(&mut self, message: &str) {
        self.message = Some(message.to_string());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Operator message for a matched verification
pub fn verified_message(results: &[DeactivationResult]) -> String {
    let failed = results.iter().filter(|r| !r.succeeded).count();
    if failed == 0 {
        MSG_VERIFIED.to_string()
    } else {
        format!("{} {} of {} failed to deactivate.", MSG_VERIFIED, failed, results.len())
    }
}
