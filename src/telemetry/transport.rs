//! Delivery of a single event to the collector

use crate::event::{serialize_event, Event, SchemaError};
use crate::privacy::scrub;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Collector returned status {0}")]
    Status(u16),

    #[error("Event rejected at schema boundary: {0}")]
    Schema(#[from] SchemaError),
}

impl DeliveryError {
    /// Schema rejections fail the same way on every attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Schema(_))
    }
}

/// One delivery attempt for one event
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError>;
}

/// POSTs JSON events to the collector with bearer authentication
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
        let body = serialize_event(event)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                debug!(endpoint = %scrub(Some(&self.endpoint)), timeout = e.is_timeout(), "Telemetry send failed");
                DeliveryError::Http(e.without_url())
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            debug!(endpoint = %scrub(Some(&self.endpoint)), status = status.as_u16(), "Telemetry send rejected");
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
