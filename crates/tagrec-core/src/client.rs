//! Remote record client seam
//!
//! The session only talks to the remote store through [`RecordClient`]. The
//! HTTP implementation lives in `tagrec-client`; tests plug in fakes.

use crate::{DeactivateResult, FetchResult, Identifier, RecordKey};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trait for the store hosting receipts and inventory
#[async_trait]
pub trait RecordClient: Send + Sync {
    /// Fetch the raw expected identifiers of a record.
    ///
    /// Not-found, empty and transport failures all come back as `Err`.
    /// Entries are returned as stored, without normalization.
    async fn fetch_expected(&self, record_key: &RecordKey) -> FetchResult<Vec<String>>;

    /// Delete the inventory entry of one identifier, returning the status code
    async fn deactivate(&self, identifier: &Identifier) -> DeactivateResult<u16>;
}

/// Outcome of deactivating one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationResult {
    pub identifier: Identifier,
    pub succeeded: bool,
    pub status: Option<u16>,
    pub detail: String,
}

impl DeactivationResult {
    pub fn from_outcome(identifier: Identifier, outcome: DeactivateResult<u16>) -> Self {
        match outcome {
            Ok(status) => Self {
                identifier,
                succeeded: true,
                status: Some(status),
                detail: format!("deactivated (status {})", status),
            },
            Err(e) => Self {
                identifier,
                succeeded: false,
                status: e.status(),
                detail: e.to_string(),
            },
        }
    }

    /// Status code of a failed deactivation, `None` on success or when the
    /// request never reached the store
    pub fn failure_status(&self) -> Option<u16> {
        if self.succeeded {
            None
        } else {
            self.status
        }
    }
}

/// Deactivate every identifier, isolating failures per item.
///
/// Up to `max_concurrent` requests are in flight at once. Results come back
/// in input order regardless of completion order.
pub async fn deactivate_batch(
    client: Arc<dyn RecordClient>,
    identifiers: Vec<Identifier>,
    max_concurrent: usize,
) -> Vec<DeactivationResult> {
    stream::iter(identifiers)
        .map(|identifier| {
            let client = Arc::clone(&client);
            async move {
                let outcome = client.deactivate(&identifier).await;
                if let Err(e) = &outcome {
                    tracing::warn!("Failed to deactivate {}: {}", identifier, e);
                } else {
                    tracing::debug!("Deactivated {}", identifier);
                }
                DeactivationResult::from_outcome(identifier, outcome)
            }
        })
        .buffered(max_concurrent.max(1))
        .collect()
        .await
}
