//! RPC error taxonomy shared by transports, clients and batch items.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Numeric codes carried by [`RpcError`].
///
/// The negative JSON-RPC 2.0 reserved range is reused for errors produced on
/// the client side; application errors keep whatever code the node sent.
pub mod codes {
    pub const INVALID_JSON: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const UPSTREAM_INVALID_RESPONSE: i64 = -32000;
    pub const UPSTREAM_CONNECTION_ERROR: i64 = -32001;
    pub const BATCH_NOT_EXECUTED: i64 = -32002;
    pub const NO_UPSTREAM_AVAILABLE: i64 = -32003;
    pub const TIMEOUT: i64 = -32004;
}

/// Underlying cause attached to transport-level errors.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Errors delivered either to a single batch item or to the caller of a
/// whole batch execution.
///
/// The type is `Clone` because a single whole-batch failure may be mirrored
/// into every pending item of that batch.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Upstream could not be reached or answered with a non-success status.
    #[error("upstream connection error: {message}")]
    Connection {
        message: String,
        cause: Option<Cause>,
    },

    /// Upstream answered, but the payload could not be understood.
    #[error("invalid response from upstream: {message}")]
    InvalidResponse {
        message: String,
        cause: Option<Cause>,
    },

    /// Well-formed JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Application(JsonRpcError),

    /// The batch was closed before this call received a response.
    #[error("batch was not executed: call #{id} {method}")]
    NotExecuted { id: u64, method: String },

    /// A failover client has no usable upstream at dispatch time.
    #[error("no upstream available")]
    NoUpstreamAvailable,

    /// A call definition was rejected at construction.
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// An operation exceeded its deadline.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            cause: None,
        }
    }

    pub fn connection_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
            cause: None,
        }
    }

    pub fn invalid_response_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InvalidResponse {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Integer code for this error, see [`codes`].
    pub fn code(&self) -> i64 {
        match self {
            Self::Connection { .. } => codes::UPSTREAM_CONNECTION_ERROR,
            Self::InvalidResponse { .. } => codes::UPSTREAM_INVALID_RESPONSE,
            Self::Application(err) => err.code,
            Self::NotExecuted { .. } => codes::BATCH_NOT_EXECUTED,
            Self::NoUpstreamAvailable => codes::NO_UPSTREAM_AVAILABLE,
            Self::InvalidCall(_) => codes::INVALID_PARAMS,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Human-readable message. For application errors this is the node's
    /// message verbatim.
    pub fn message(&self) -> String {
        match self {
            Self::Application(err) => err.message.clone(),
            Self::Connection { message, .. } | Self::InvalidResponse { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Structured details sent by the node, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Application(err) => err.data.as_ref(),
            _ => None,
        }
    }

    /// Underlying cause of a transport-level error.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        match self {
            Self::Connection { cause, .. } | Self::InvalidResponse { cause, .. } => {
                cause.as_deref()
            }
            _ => None,
        }
    }

    /// Returns `true` for failures that concern the whole exchange with the
    /// upstream rather than one call.
    pub fn is_transport_level(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::InvalidResponse { .. }
                | Self::NoUpstreamAvailable
                | Self::Timeout { .. }
        )
    }

    /// Convert into the JSON-RPC error object shape.
    pub fn to_json_error(&self) -> JsonRpcError {
        match self {
            Self::Application(err) => err.clone(),
            other => JsonRpcError {
                code: other.code(),
                message: other.message(),
                data: None,
            },
        }
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(err: JsonRpcError) -> Self {
        Self::Application(err)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_response_caused_by(err.to_string(), err)
    }
}
