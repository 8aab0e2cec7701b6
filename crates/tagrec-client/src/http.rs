//! HTTP implementation of [`RecordClient`]

use crate::{ClientConfig, ClientError, ClientResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use tagrec_core::{
    DeactivateError, DeactivateResult, FetchError, FetchResult, Identifier, RecordClient,
    RecordKey,
};
use url::Url;

/// Record client for a JSON key-value store reachable over HTTP.
///
/// Stateless apart from the connection pool, so one instance can be shared
/// by every session.
#[derive(Debug, Clone)]
pub struct HttpRecordClient {
    base_url: Url,
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpRecordClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Self::with_http_client(config, client)
    }

    /// Create a client with a pre-built `reqwest::Client`
    pub fn with_http_client(config: ClientConfig, client: reqwest::Client) -> ClientResult<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(config.base_url.clone()));
        }

        Ok(Self {
            base_url,
            config,
            client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL of a receipt's expected identifiers
    pub fn receipt_url(&self, record_key: &RecordKey) -> Url {
        self.endpoint(&[
            self.config.receipts_collection.as_str(),
            record_key.as_str(),
            "uids.json",
        ])
    }

    /// URL of one inventory entry
    pub fn inventory_url(&self, identifier: &Identifier) -> Url {
        let leaf = format!("{}.json", identifier);
        self.endpoint(&[self.config.inventory_collection.as_str(), leaf.as_str()])
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in the constructor
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl RecordClient for HttpRecordClient {
    async fn fetch_expected(&self, record_key: &RecordKey) -> FetchResult<Vec<String>> {
        let url = self.receipt_url(record_key);
        tracing::debug!("Fetching expected identifiers from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        tracing::debug!("Response: {}", body);

        // Key-value stores answer a missing key with `null`
        let uids: Option<Vec<String>> =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        match uids {
            None => Err(FetchError::NotFound),
            Some(uids) if uids.is_empty() => Err(FetchError::Empty),
            Some(uids) => Ok(uids),
        }
    }

    async fn deactivate(&self, identifier: &Identifier) -> DeactivateResult<u16> {
        let url = self.inventory_url(identifier);

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| DeactivateError::Transport(e.to_string()))?;

        let status = response.status();
        tracing::debug!("Deleted: {} (code {})", identifier, status.as_u16());
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeactivateError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpRecordClient {
        HttpRecordClient::new(ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_receipt_url() {
        let key = RecordKey::parse("R-1001").unwrap();
        assert_eq!(
            client("https://store.example.com").receipt_url(&key).as_str(),
            "https://store.example.com/Receipts/R-1001/uids.json"
        );
        assert_eq!(
            client("https://store.example.com/db/").receipt_url(&key).as_str(),
            "https://store.example.com/db/Receipts/R-1001/uids.json"
        );
    }

    #[test]
    fn test_record_key_is_a_single_segment() {
        let key = RecordKey::parse("a/b c").unwrap();
        assert_eq!(
            client("https://store.example.com").receipt_url(&key).as_str(),
            "https://store.example.com/Receipts/a%2Fb%20c/uids.json"
        );
    }

    #[test]
    fn test_dot_keys_never_collapse_the_path() {
        assert!(RecordKey::parse("..").is_none());
        assert!(RecordKey::parse(".").is_none());

        let key = RecordKey::parse("...").unwrap();
        assert_eq!(
            client("https://store.example.com").receipt_url(&key).as_str(),
            "https://store.example.com/Receipts/.../uids.json"
        );
    }

    #[test]
    fn test_inventory_url_uses_canonical_form() {
        let id = Identifier::from(" 0a1b2c ");
        assert_eq!(
            client("https://store.example.com").inventory_url(&id).as_str(),
            "https://store.example.com/Inventory/0A1B2C.json"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let result = HttpRecordClient::new(ClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));

        let result = HttpRecordClient::new(ClientConfig {
            base_url: "mailto:ops@example.com".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }
}
