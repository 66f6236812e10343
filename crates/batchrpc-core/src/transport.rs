//! The `RpcTransport` trait: how a batch's calls reach an upstream.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
use crate::shape::ResultShape;

/// Upstream health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Passed the last health check.
    Healthy,
    /// Failed the last health check.
    Unhealthy,
    /// Not checked yet.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One call as seen by a transport: id, method, params and expected shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<RpcParam>,
    pub shape: ResultShape,
}

impl CallRequest {
    pub fn to_json(&self) -> JsonRpcRequest {
        JsonRpcRequest::new(self.id, self.method.clone(), self.params.clone())
    }
}

/// Raw per-id outcome produced by a transport.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub id: RpcId,
    pub outcome: Result<Value, RpcError>,
}

impl CallResponse {
    pub fn ok(id: u64, value: Value) -> Self {
        Self {
            id: RpcId::Number(id),
            outcome: Ok(value),
        }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            id: RpcId::Number(id),
            outcome: Err(error),
        }
    }

    /// Map a wire response: a JSON-RPC error object becomes an application
    /// error, anything else is the raw result.
    pub fn from_json(resp: JsonRpcResponse) -> Self {
        let id = resp.id.clone();
        Self {
            id,
            outcome: resp.into_result().map_err(RpcError::Application),
        }
    }
}

/// Strategy that turns a batch's calls into wire traffic and back.
///
/// Contract:
/// - empty input returns empty output without touching the network;
/// - per-call errors returned by the node are delivered as
///   `CallResponse { outcome: Err(..) }`, never as the method's `Err`;
/// - a failure that leaves no usable response at all is returned as a
///   single `Err` for the whole batch;
/// - responses may arrive in any order and some requested ids may be
///   missing.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks and
/// can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn execute(&self, calls: Vec<CallRequest>) -> Result<Vec<CallResponse>, RpcError>;

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;
}
