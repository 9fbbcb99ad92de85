//! Storage provider backed by a budgetsync relay.
//!
//! Talks plain HTTP with a bearer token. The relay decides which user's
//! batch folder a token belongs to, so `ProviderAuth::account` is only
//! informational here.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use budget_sync_core::{
    ProviderAuth, ProviderError, ProviderKind, SealedBatch, StorageProvider, UploadAck,
};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use std::time::Duration;

use crate::relay::{DownloadResponse, UploadResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the relay's batch endpoints.
#[derive(Debug, Clone)]
pub struct HttpRelayProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelayProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token<'a>(&self, auth: &'a ProviderAuth) -> Result<&'a str, ProviderError> {
        let token = auth.token.trim();
        if token.is_empty() {
            return Err(ProviderError::Unauthorized);
        }
        Ok(token)
    }
}

fn network_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Network(e.to_string())
}

/// Maps a non-success status to a provider error.
fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized),
        status => Err(ProviderError::Network(format!("relay returned {}", status))),
    }
}

#[async_trait]
impl StorageProvider for HttpRelayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HttpRelay
    }

    async fn upload_batch(
        &self,
        auth: &ProviderAuth,
        batch: &SealedBatch,
    ) -> Result<UploadAck, ProviderError> {
        let url = format!("{}/batches/{}", self.base_url, batch.id);
        let response = self
            .client
            .put(&url)
            .bearer_auth(self.token(auth)?)
            .timeout(REQUEST_TIMEOUT)
            .body(batch.payload.clone())
            .send()
            .await
            .map_err(network_error)?;

        let body: UploadResponse = check_status(response)?
            .json()
            .await
            .map_err(network_error)?;

        tracing::debug!(batch = %body.batch_id, received_at = %body.received_at, "Relay stored batch");
        Ok(UploadAck {
            batch_id: body.batch_id,
        })
    }

    async fn download_since(
        &self,
        auth: &ProviderAuth,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SealedBatch>, ProviderError> {
        let mut request = self
            .client
            .get(format!("{}/batches", self.base_url))
            .bearer_auth(self.token(auth)?)
            .timeout(REQUEST_TIMEOUT);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Micros, true))]);
        }

        let response = request.send().await.map_err(network_error)?;
        let body: DownloadResponse = check_status(response)?
            .json()
            .await
            .map_err(network_error)?;

        body.batches
            .into_iter()
            .map(|wire| {
                let payload = STANDARD.decode(&wire.payload).map_err(|e| {
                    ProviderError::Storage(format!("batch {} has a malformed payload: {}", wire.id, e))
                })?;
                Ok(SealedBatch {
                    id: wire.id,
                    payload,
                    received_at: Some(wire.received_at),
                })
            })
            .collect()
    }
}
