//! Wire encoding of requests and decoding of responses.

use serde_json::Value;

use crate::error::RpcError;
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Serializer collaborator used by transports.
pub trait RpcCodec: Send + Sync + 'static {
    fn encode_request(&self, req: &JsonRpcRequest) -> Result<Vec<u8>, RpcError>;

    fn encode_batch(&self, reqs: &[JsonRpcRequest]) -> Result<Vec<u8>, RpcError>;

    fn decode_response(&self, bytes: &[u8]) -> Result<JsonRpcResponse, RpcError>;

    /// Decode a batch reply into its response objects, in wire order.
    fn decode_batch(&self, bytes: &[u8]) -> Result<Vec<JsonRpcResponse>, RpcError>;
}

/// `serde_json` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl RpcCodec for JsonCodec {
    fn encode_request(&self, req: &JsonRpcRequest) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(req).map_err(|e| RpcError::Internal(e.to_string()))
    }

    fn encode_batch(&self, reqs: &[JsonRpcRequest]) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(reqs).map_err(|e| RpcError::Internal(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<JsonRpcResponse, RpcError> {
        serde_json::from_slice(bytes).map_err(|e| {
            RpcError::invalid_response_caused_by(
                format!("invalid JSON received from RPC endpoint: {e}"),
                e,
            )
        })
    }

    /// Entries that are not readable response objects are skipped; a single
    /// error object in place of the array fails the whole batch with the
    /// node's error.
    fn decode_batch(&self, bytes: &[u8]) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            RpcError::invalid_response_caused_by(
                format!("invalid JSON received from RPC endpoint: {e}"),
                e,
            )
        })?;

        match value {
            Value::Array(entries) => {
                let total = entries.len();
                let responses: Vec<JsonRpcResponse> = entries
                    .into_iter()
                    .filter_map(|entry| match serde_json::from_value(entry) {
                        Ok(resp) => Some(resp),
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed batch response entry");
                            None
                        }
                    })
                    .collect();
                if responses.len() < total {
                    tracing::debug!(total, kept = responses.len(), "batch response had malformed entries");
                }
                Ok(responses)
            }
            Value::Object(mut obj) => match obj.remove("error") {
                Some(error) => {
                    let error: JsonRpcError = serde_json::from_value(error)?;
                    Err(RpcError::Application(error))
                }
                None => Err(RpcError::invalid_response("batch response is not an array")),
            },
            _ => Err(RpcError::invalid_response("batch response is not an array")),
        }
    }
}
