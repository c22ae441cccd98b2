//! Outbound webhook transport.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::models::{Destination, Notification};

/// One HTTP request to a receiver
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl OutboundRequest {
    pub fn from_notification(notification: &Notification) -> Self {
        Self::to_destination(notification, &notification.destination)
    }

    /// Same headers and body, delivered somewhere else
    pub fn to_destination(notification: &Notification, destination: &Destination) -> Self {
        Self {
            method: destination.method.clone(),
            url: destination.url.clone(),
            headers: notification.headers.clone(),
            body: notification.body.clone(),
        }
    }
}

/// What came back from a receiver; header names are lowercase
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl WebhookResponse {
    pub fn new(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// The request never produced a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connection(error.to_string())
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else {
            Self::Other(error.to_string())
        }
    }
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<WebhookResponse, TransportError>;
}

/// reqwest-backed webhook client
#[derive(Debug, Clone)]
pub struct HttpWebhookClient {
    client: Client,
}

impl HttpWebhookClient {
    pub fn new(config: &DispatchConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(&self, request: &OutboundRequest) -> Result<WebhookResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| {
                TransportError::InvalidRequest(format!("invalid method {}: {e}", request.method))
            })?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_null() {
            builder = builder.json(&request.body);
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await?;
        let body = parse_body(&bytes);

        debug!(url = %request.url, status_code, "Webhook response received");

        Ok(WebhookResponse {
            status_code,
            headers,
            body,
        })
    }
}

// Empty bodies are null, non-JSON bodies are kept as text
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
