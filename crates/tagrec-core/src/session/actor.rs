//! Single-owner session task
//!
//! The [`SessionActor`] owns the [`Session`] and applies every mutation in
//! the order it receives them. Callers talk to it through a cloneable
//! [`SessionHandle`]. Remote fetches and deactivations run in spawned tasks
//! and come back as completions tagged with the load generation they were
//! started under, so a completion for a replaced session never clobbers the
//! current one.

use super::{LoadOutcome, ScanDisposition, Session, SessionSnapshot};
use crate::report::ReconcileReport;
use crate::{
    deactivate_batch, FetchResult, RawIdentifier, RecordClient, RecordKey, SessionError,
    SessionResult, VerificationOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the command channel
    pub command_buffer: usize,

    /// Maximum deactivation requests in flight
    pub max_concurrent_deactivations: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            max_concurrent_deactivations: 4,
        }
    }
}

enum Command {
    Load {
        record_key: String,
        reply: oneshot::Sender<SessionResult<LoadOutcome>>,
    },
    Scan {
        raw: RawIdentifier,
        reply: oneshot::Sender<ScanDisposition>,
    },
    Verify {
        reply: oneshot::Sender<SessionResult<ReconcileReport>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

enum Completion {
    Load {
        generation: u64,
        fetched: FetchResult<Vec<String>>,
        reply: oneshot::Sender<SessionResult<LoadOutcome>>,
    },
    Deactivation {
        generation: u64,
        report: ReconcileReport,
        reply: oneshot::Sender<SessionResult<ReconcileReport>>,
    },
}

struct SessionActor {
    session: Session,
    client: Arc<dyn RecordClient>,
    config: SessionConfig,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
            }
        }

        debug!("Session task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load { record_key, reply } => self.start_load(record_key, reply),
            Command::Scan { raw, reply } => {
                let disposition = self.session.record_scan(&raw);
                match &disposition {
                    ScanDisposition::Added(id) => {
                        debug!("Scanned {} ({} total)", id, self.session.scanned().len());
                        self.publish();
                    }
                    ScanDisposition::Duplicate(id) => debug!("Duplicate scan {}", id),
                    ScanDisposition::Dropped(phase) => {
                        debug!("Dropping scan while {}", phase)
                    }
                    ScanDisposition::Blank => debug!("Ignoring blank scan"),
                }
                let _ = reply.send(disposition);
            }
            Command::Verify { reply } => self.start_verify(reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn start_load(
        &mut self,
        raw_key: String,
        reply: oneshot::Sender<SessionResult<LoadOutcome>>,
    ) {
        let Some(record_key) = RecordKey::parse(&raw_key) else {
            self.session.reject_record_key();
            self.publish();
            let _ = reply.send(Err(SessionError::InvalidRecordKey));
            return;
        };

        let generation = self.session.begin_load(record_key.clone());
        info!("Loading receipt {} (generation {})", record_key, generation);
        self.publish();

        let client = Arc::clone(&self.client);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let fetched = client.fetch_expected(&record_key).await;
            let _ = completions.send(Completion::Load {
                generation,
                fetched,
                reply,
            });
        });
    }

    fn start_verify(&mut self, reply: oneshot::Sender<SessionResult<ReconcileReport>>) {
        let outcome = match self.session.verify() {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        debug!(target: "verify", "Expected: {:?}", outcome.expected);
        debug!(target: "verify", "Scanned: {:?}", outcome.scanned);
        self.publish();

        let session_id = self.session.session_id();
        let record_key = self.session.record_key().cloned();
        let generation = self.session.generation();

        if !outcome.matched {
            info!(
                "Mismatch: expected {} items, scanned {}",
                outcome.expected.len(),
                outcome.scanned.len()
            );
            let report = ReconcileReport::mismatched(session_id, record_key, generation, outcome);
            let _ = reply.send(Ok(report));
            return;
        }

        info!("Verified {} items, deactivating", outcome.scanned.len());
        self.spawn_deactivation(session_id, record_key, generation, outcome, reply);
    }

    fn spawn_deactivation(
        &self,
        session_id: Option<Uuid>,
        record_key: Option<RecordKey>,
        generation: u64,
        outcome: VerificationOutcome,
        reply: oneshot::Sender<SessionResult<ReconcileReport>>,
    ) {
        let client = Arc::clone(&self.client);
        let completions = self.completions_tx.clone();
        let max_concurrent = self.config.max_concurrent_deactivations;

        tokio::spawn(async move {
            let results = deactivate_batch(client, outcome.scanned.clone(), max_concurrent).await;
            let report =
                ReconcileReport::verified(session_id, record_key, generation, outcome, results);
            let _ = completions.send(Completion::Deactivation {
                generation,
                report,
                reply,
            });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Load {
                generation,
                fetched,
                reply,
            } => {
                let result = self.session.complete_load(generation, fetched);
                match &result {
                    Ok(outcome) => {
                        info!(
                            "Receipt {} loaded with {} items",
                            outcome.record_key, outcome.expected_count
                        );
                        self.publish();
                    }
                    Err(SessionError::Superseded) => {
                        debug!("Ignoring stale fetch completion (generation {})", generation);
                    }
                    Err(e) => {
                        warn!("Failed to load receipt: {}", e);
                        self.publish();
                    }
                }
                let _ = reply.send(result);
            }
            Completion::Deactivation {
                generation,
                report,
                reply,
            } => {
                let failed = report.failed_deactivations().count();
                if self.session.complete_deactivation(generation, &report.deactivations) {
                    info!(
                        "Deactivation settled: {} succeeded, {} failed",
                        report.deactivations.len() - failed,
                        failed
                    );
                    self.publish();
                } else {
                    warn!(
                        "Deactivation batch for generation {} finished after the session was replaced",
                        generation
                    );
                }
                let _ = reply.send(Ok(report));
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

/// Handle to the live reconciliation session.
///
/// Cloning is cheap. The session task stops once every handle is dropped or
/// [`SessionHandle::shutdown`] is called.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Spawn the session task on the current tokio runtime
    pub fn spawn(client: Arc<dyn RecordClient>, config: SessionConfig) -> Self {
        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let session = Session::new();
        let (snapshots_tx, snapshots) = watch::channel(session.snapshot());

        let actor = SessionActor {
            session,
            client,
            config,
            commands,
            completions_tx,
            completions,
            snapshots: snapshots_tx,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            snapshots,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Replace the session with the expected set of `record_key`.
    ///
    /// Resolves once the fetch completes. A load overtaken by a newer one
    /// resolves to [`SessionError::Superseded`].
    pub async fn load(&self, record_key: impl Into<String>) -> SessionResult<LoadOutcome> {
        let record_key = record_key.into();
        self.request(|reply| Command::Load { record_key, reply })
            .await?
    }

    pub async fn record_scan(&self, raw: impl Into<RawIdentifier>) -> SessionResult<ScanDisposition> {
        let raw = raw.into();
        self.request(|reply| Command::Scan { raw, reply }).await
    }

    /// Verify, and on a match deactivate every scanned identifier.
    ///
    /// Resolves after the deactivation batch has finished.
    pub async fn verify(&self) -> SessionResult<ReconcileReport> {
        self.request(|reply| Command::Verify { reply }).await?
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Receiver of every published state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the session task. In-flight requests resolve to
    /// [`SessionError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use crate::{DeactivateError, DeactivateResult, FetchError, Identifier};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-memory store. Fetches for keys with a gate wait until it opens.
    #[derive(Default)]
    struct FakeStore {
        receipts: HashMap<String, FetchResult<Vec<String>>>,
        fetch_gates: HashMap<String, Arc<Notify>>,
        deactivate_gate: Option<Arc<Notify>>,
        failing: HashSet<String>,
        deactivated: Mutex<Vec<Identifier>>,
    }

    impl FakeStore {
        fn receipt(mut self, key: &str, uids: &[&str]) -> Self {
            self.receipts
                .insert(key.to_string(), Ok(uids.iter().map(|s| s.to_string()).collect()));
            self
        }

        fn gate_fetch(mut self, key: &str) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            self.fetch_gates.insert(key.to_string(), gate.clone());
            (self, gate)
        }

        fn gate_deactivation(mut self) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            self.deactivate_gate = Some(gate.clone());
            (self, gate)
        }

        fn failing(mut self, uid: &str) -> Self {
            self.failing.insert(uid.to_string());
            self
        }
    }

    #[async_trait]
    impl RecordClient for FakeStore {
        async fn fetch_expected(&self, record_key: &RecordKey) -> FetchResult<Vec<String>> {
            if let Some(gate) = self.fetch_gates.get(record_key.as_str()) {
                gate.notified().await;
            }
            self.receipts
                .get(record_key.as_str())
                .cloned()
                .unwrap_or(Err(FetchError::NotFound))
        }

        async fn deactivate(&self, identifier: &Identifier) -> DeactivateResult<u16> {
            if let Some(gate) = &self.deactivate_gate {
                gate.notified().await;
            }
            self.deactivated.lock().unwrap().push(identifier.clone());
            if self.failing.contains(identifier.as_str()) {
                Err(DeactivateError::Status(503))
            } else {
                Ok(200)
            }
        }
    }

    fn spawn(store: FakeStore) -> (SessionHandle, Arc<FakeStore>) {
        let store = Arc::new(store);
        let config = SessionConfig {
            command_buffer: 8,
            max_concurrent_deactivations: 1,
        };
        (SessionHandle::spawn(store.clone(), config), store)
    }

    async fn wait_for_phase(handle: &SessionHandle, generation: u64, phase: Phase) {
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.generation == generation && s.phase == phase)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_scan_verify_settles() {
        let (handle, store) = spawn(FakeStore::default().receipt("R1", &["0A1B2C", "ff0011"]));

        let loaded = handle.load("R1").await.unwrap();
        assert_eq!(loaded.expected_count, 2);

        handle.record_scan("0a1b2c").await.unwrap();
        handle.record_scan(vec![0xFF, 0x00, 0x11]).await.unwrap();

        let report = handle.verify().await.unwrap();
        assert!(report.verified_ok());
        assert_eq!(report.deactivations.len(), 2);
        assert_eq!(store.deactivated.lock().unwrap().len(), 2);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, Phase::Settled);
    }

    #[tokio::test]
    async fn test_scenario_d_reports_failed_identifier() {
        let (handle, _store) =
            spawn(FakeStore::default().receipt("R1", &["A1", "B2"]).failing("B2"));

        handle.load("R1").await.unwrap();
        handle.record_scan("A1").await.unwrap();
        handle.record_scan("B2").await.unwrap();

        let report = handle.verify().await.unwrap();
        assert!(report.verified_ok());
        let summary: Vec<_> = report
            .deactivations
            .iter()
            .map(|r| (r.identifier.as_str(), r.succeeded))
            .collect();
        assert_eq!(summary, vec![("A1", true), ("B2", false)]);
        assert_eq!(report.failed_identifiers(), vec![&Identifier::from("B2")]);
    }

    #[tokio::test]
    async fn test_mismatch_does_not_deactivate() {
        let (handle, store) = spawn(FakeStore::default().receipt("R1", &["0A1B2C", "FF0011"]));

        handle.load("R1").await.unwrap();
        handle.record_scan("0A1B2C").await.unwrap();

        let report = handle.verify().await.unwrap();
        assert!(!report.verified_ok());
        assert!(store.deactivated.lock().unwrap().is_empty());
        assert_eq!(handle.snapshot().await.unwrap().phase, Phase::Mismatched);
    }

    #[tokio::test]
    async fn test_missing_receipt_fails_load() {
        let (handle, _store) = spawn(FakeStore::default());

        let err = handle.load("NOPE").await.unwrap_err();
        assert_eq!(err, SessionError::LoadFailed(FetchError::NotFound));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.expected_count, 0);
    }

    #[tokio::test]
    async fn test_blank_key_rejected_without_io() {
        let (handle, _store) = spawn(FakeStore::default());
        assert_eq!(
            handle.load("   ").await.unwrap_err(),
            SessionError::InvalidRecordKey
        );
        assert_eq!(handle.snapshot().await.unwrap().generation, 0);
    }

    #[tokio::test]
    async fn test_scan_racing_load_is_discarded() {
        let (store, gate) = FakeStore::default().receipt("R1", &["A1"]).gate_fetch("R1");
        let (handle, _store) = spawn(store);

        let loader = handle.clone();
        let load = tokio::spawn(async move { loader.load("R1").await });
        wait_for_phase(&handle, 1, Phase::Loading).await;

        assert!(handle.record_scan("A1").await.unwrap().is_added());
        assert_eq!(handle.snapshot().await.unwrap().scanned_count, 1);

        gate.notify_one();
        load.await.unwrap().unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(snapshot.scanned_count, 0);
    }

    #[tokio::test]
    async fn test_stale_fetch_does_not_clobber_newer_load() {
        let (store, gate) = FakeStore::default()
            .receipt("R1", &["A1"])
            .receipt("R2", &["B2", "C3"])
            .gate_fetch("R1");
        let (handle, _store) = spawn(store);

        let loader = handle.clone();
        let first = tokio::spawn(async move { loader.load("R1").await });
        wait_for_phase(&handle, 1, Phase::Loading).await;

        let second = handle.load("R2").await.unwrap();
        assert_eq!(second.expected_count, 2);
        handle.record_scan("B2").await.unwrap();

        gate.notify_one();
        assert_eq!(first.await.unwrap(), Err(SessionError::Superseded));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.record_key, RecordKey::parse("R2"));
        assert_eq!(snapshot.expected_count, 2);
        assert_eq!(snapshot.scanned_count, 1);
    }

    #[tokio::test]
    async fn test_scans_dropped_while_deactivating() {
        let (store, gate) = FakeStore::default().receipt("R1", &["A1"]).gate_deactivation();
        let (handle, _store) = spawn(store);

        handle.load("R1").await.unwrap();
        handle.record_scan("A1").await.unwrap();

        let verifier = handle.clone();
        let verify = tokio::spawn(async move { verifier.verify().await });
        wait_for_phase(&handle, 1, Phase::Deactivating).await;

        assert_eq!(
            handle.record_scan("B2").await.unwrap(),
            ScanDisposition::Dropped(Phase::Deactivating)
        );

        gate.notify_one();
        let report = verify.await.unwrap().unwrap();
        assert_eq!(report.outcome.scanned, vec![Identifier::from("A1")]);
        assert_eq!(handle.snapshot().await.unwrap().phase, Phase::Settled);
    }

    #[tokio::test]
    async fn test_deactivation_outliving_its_session_still_reports() {
        let (store, gate) = FakeStore::default()
            .receipt("R1", &["A1"])
            .receipt("R2", &["B2"])
            .gate_deactivation();
        let (handle, _store) = spawn(store);

        handle.load("R1").await.unwrap();
        handle.record_scan("A1").await.unwrap();

        let verifier = handle.clone();
        let verify = tokio::spawn(async move { verifier.verify().await });
        wait_for_phase(&handle, 1, Phase::Deactivating).await;

        handle.load("R2").await.unwrap();
        gate.notify_one();

        let report = verify.await.unwrap().unwrap();
        assert!(report.verified_ok());
        assert_eq!(report.generation, 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.phase, Phase::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (handle, _store) = spawn(FakeStore::default());
        handle.shutdown().await;
        handle.shutdown().await;
        assert_eq!(handle.snapshot().await.unwrap_err(), SessionError::Closed);
    }
}
