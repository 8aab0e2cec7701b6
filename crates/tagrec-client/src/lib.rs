//! Tag Reconciliation HTTP Client
//!
//! Talks to a JSON key-value store over HTTP: receipts are read from
//! `<base>/Receipts/{key}/uids.json` and inventory entries are deleted at
//! `<base>/Inventory/{uid}.json`.

pub mod http;

pub use http::HttpRecordClient;

use serde::{Deserialize, Serialize};
use tagrec_core::SessionConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Configuration for the record client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root URL of the key-value store
    pub base_url: String,

    /// Collection holding receipts
    pub receipts_collection: String,

    /// Collection holding inventory entries
    pub inventory_collection: String,

    /// User agent string
    pub user_agent: String,

    /// Request timeout (seconds)
    pub timeout_secs: u64,

    /// Maximum deactivation requests in flight. Applied by the session
    /// through [`ClientConfig::session_config`], not by the client itself.
    pub max_concurrent_deactivations: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            receipts_collection: "Receipts".to_string(),
            inventory_collection: "Inventory".to_string(),
            user_agent: format!("tagrec/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_concurrent_deactivations: 4,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `TAGREC_*` environment variables
    pub fn from_env() -> ClientResult<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("TAGREC_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(timeout) = std::env::var("TAGREC_TIMEOUT_SECS") {
            config.timeout_secs = timeout
                .parse()
                .map_err(|_| ClientError::Config(format!("TAGREC_TIMEOUT_SECS: {}", timeout)))?;
        }
        if let Ok(max) = std::env::var("TAGREC_MAX_CONCURRENT") {
            config.max_concurrent_deactivations = max
                .parse()
                .map_err(|_| ClientError::Config(format!("TAGREC_MAX_CONCURRENT: {}", max)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Session settings for a session driving this store
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_concurrent_deactivations: self.max_concurrent_deactivations,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.timeout_secs == 0 {
            return Err(ClientError::Config("timeout_secs must be positive".into()));
        }
        if self.max_concurrent_deactivations == 0 {
            return Err(ClientError::Config(
                "max_concurrent_deactivations must be positive".into(),
            ));
        }
        if self.receipts_collection.trim().is_empty() || self.inventory_collection.trim().is_empty()
        {
            return Err(ClientError::Config("collection names must not be empty".into()));
        }
        Ok(())
    }
}
