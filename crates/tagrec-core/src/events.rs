//! Tag event sources
//!
//! A reader driver produces one [`RawIdentifier`] per detected tag, at its own
//! pace and from its own context. [`pump_tag_events`] forwards those events
//! into the session task so scans are serialized with every other mutation.

use crate::{RawIdentifier, ScanDisposition, SessionHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Asynchronous producer of raw tag reads
#[async_trait]
pub trait TagEventSource: Send {
    /// Next detection, or `None` once the source is exhausted
    async fn next_event(&mut self) -> Option<RawIdentifier>;
}

/// Tag source fed through a channel, for drivers that push from a callback
pub struct ChannelTagSource {
    rx: mpsc::Receiver<RawIdentifier>,
}

impl ChannelTagSource {
    /// Create a source and the sender a driver callback pushes into
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawIdentifier>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl TagEventSource for ChannelTagSource {
    async fn next_event(&mut self) -> Option<RawIdentifier> {
        self.rx.recv().await
    }
}

/// Counters for one pump run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpStats {
    pub added: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub blank: usize,
}

impl PumpStats {
    pub fn total(&self) -> usize {
        self.added + self.duplicates + self.dropped + self.blank
    }

    fn record(&mut self, disposition: &ScanDisposition) {
        match disposition {
            ScanDisposition::Added(_) => self.added += 1,
            ScanDisposition::Duplicate(_) => self.duplicates += 1,
            ScanDisposition::Dropped(_) => self.dropped += 1,
            ScanDisposition::Blank => self.blank += 1,
        }
    }
}

/// Forward every event of `source` into the session, in arrival order.
///
/// Returns when the source is exhausted or the session task has stopped.
pub async fn pump_tag_events<S: TagEventSource>(mut source: S, session: SessionHandle) -> PumpStats {
    let mut stats = PumpStats::default();

    while let Some(raw) = source.next_event().await {
        match session.record_scan(raw).await {
            Ok(disposition) => stats.record(&disposition),
            Err(e) => {
                tracing::debug!("Stopping tag pump: {}", e);
                break;
            }
        }
    }

    tracing::debug!(
        "Tag pump finished: {} added, {} duplicate, {} dropped",
        stats.added,
        stats.duplicates,
        stats.dropped
    );
    stats
}
