//! HTTP POST collaborator used by both transports.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use batchrpc_core::RpcError;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Connection error describing a non-success status.
    pub(crate) fn status_error(&self) -> RpcError {
        RpcError::connection(format!("HTTP {}: {}", self.status, self.body_text()))
    }
}

/// Sends one JSON body to the endpoint and returns the raw reply.
///
/// Failing to reach the endpoint is a connection error; any status code,
/// including non-success ones, is returned as an `HttpReply`.
#[async_trait]
pub trait HttpSender: Send + Sync + 'static {
    async fn post(&self, body: Vec<u8>) -> Result<HttpReply, RpcError>;

    fn url(&self) -> &str;
}

/// `reqwest`-backed sender.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestSender {
    /// Sender for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
        })
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post(&self, body: Vec<u8>) -> Result<HttpReply, RpcError> {
        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("request to {} timed out after {}ms", self.url, self.timeout.as_millis())
                } else {
                    format!("request to {} failed: {e}", self.url)
                };
                RpcError::connection_caused_by(message, e)
            })?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| {
            RpcError::invalid_response_caused_by(format!("failed to read response body: {e}"), e)
        })?;

        tracing::trace!(url = %self.url, status, bytes = body.len(), "HTTP reply");
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }

    fn url(&self) -> &str {
        &self.url
    }
}
