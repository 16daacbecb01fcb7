// src/transport.rs
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::BundlerError;
use crate::rpc::{parse_response, JsonRpcRequest};

/// A single JSON-RPC exchange, no retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BundlerError>;
}

/// JSON-RPC over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, BundlerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BundlerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}

fn classify(error: reqwest::Error) -> BundlerError {
    if error.is_timeout() {
        BundlerError::Timeout(error.to_string())
    } else if error.is_connect() {
        BundlerError::ConnectionRefused(error.to_string())
    } else if let Some(status) = error.status() {
        BundlerError::Http {
            status: status.as_u16(),
            body: error.to_string(),
        }
    } else {
        BundlerError::Transport(error.to_string())
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, BundlerError> {
        let payload = JsonRpcRequest::new(request_id(), method, params);
        debug!("POST {} {}", self.url, method);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        parse_response(method, status, &body)
    }
}
