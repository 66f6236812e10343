//! One HTTP request per batch: the calls go out as a JSON array.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use batchrpc_core::codec::RpcCodec;
use batchrpc_core::request::JsonRpcRequest;
use batchrpc_core::transport::{CallRequest, CallResponse, RpcTransport};
use batchrpc_core::{JsonCodec, RpcError};

use crate::sender::HttpSender;

/// Transport sending the whole batch in a single POST.
///
/// Any failure of that POST (unreachable endpoint, non-success status,
/// unreadable body) fails the whole batch; errors reported by the node for
/// individual calls stay with those calls.
pub struct AggregatedTransport {
    sender: Arc<dyn HttpSender>,
    codec: Arc<dyn RpcCodec>,
}

impl AggregatedTransport {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self::with_codec(sender, Arc::new(JsonCodec))
    }

    pub fn with_codec(sender: Arc<dyn HttpSender>, codec: Arc<dyn RpcCodec>) -> Self {
        Self { sender, codec }
    }
}

#[async_trait]
impl RpcTransport for AggregatedTransport {
    async fn execute(&self, calls: Vec<CallRequest>) -> Result<Vec<CallResponse>, RpcError> {
        if calls.is_empty() {
            return Ok(vec![]);
        }

        let requests: Vec<JsonRpcRequest> = calls.iter().map(CallRequest::to_json).collect();
        let body = self.codec.encode_batch(&requests)?;
        let reply = self.sender.post(body).await?;
        if !reply.is_success() {
            return Err(reply.status_error());
        }

        let requested: HashSet<u64> = calls.iter().map(|c| c.id).collect();
        let responses = self
            .codec
            .decode_batch(&reply.body)?
            .into_iter()
            .map(|resp| {
                let known = resp.id.as_number().is_some_and(|id| requested.contains(&id));
                if known {
                    CallResponse::from_json(resp)
                } else {
                    tracing::debug!(id = %resp.id, url = %self.sender.url(), "unknown id in batch response");
                    CallResponse {
                        id: resp.id,
                        outcome: Err(RpcError::invalid_response("unknown id returned from upstream")),
                    }
                }
            })
            .collect();
        Ok(responses)
    }

    fn url(&self) -> &str {
        self.sender.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::tests::MockSender;
    use crate::sender::HttpReply;
    use batchrpc_core::error::codes;
    use batchrpc_core::request::RpcId;
    use batchrpc_core::ResultShape;
    use serde_json::{json, Value};

    fn request(id: u64, method: &str) -> CallRequest {
        CallRequest {
            id,
            method: method.into(),
            params: vec![],
            shape: ResultShape::Any,
        }
    }

    fn replying(status: u16, body: Value) -> Arc<MockSender> {
        MockSender::new(move |_| {
            Ok(HttpReply {
                status,
                body: body.to_string().into_bytes(),
            })
        })
    }

    #[tokio::test]
    async fn empty_input_skips_network() {
        let sender = replying(200, json!([]));
        let transport = AggregatedTransport::new(sender.clone());
        assert!(transport.execute(vec![]).await.unwrap().is_empty());
        assert_eq!(sender.posts(), 0);
    }

    #[tokio::test]
    async fn sends_one_post_for_all_calls() {
        let sender = MockSender::node("never");
        let transport = AggregatedTransport::new(sender.clone());
        let responses = transport
            .execute(vec![request(0, "a"), request(1, "b"), request(2, "c")])
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(sender.posts(), 1);
        assert_eq!(responses[2].outcome.as_ref().unwrap(), &json!("c"));
    }

    #[tokio::test]
    async fn unknown_id_is_reported_under_that_id() {
        let sender = replying(
            200,
            json!([
                {"jsonrpc": "2.0", "id": 0, "result": "0x1"},
                {"jsonrpc": "2.0", "id": 9, "result": "0x2"},
            ]),
        );
        let transport = AggregatedTransport::new(sender);
        let responses = transport.execute(vec![request(0, "a")]).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].id, RpcId::Number(9));
        let err = responses[1].outcome.as_ref().unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_INVALID_RESPONSE);
        assert_eq!(err.message(), "unknown id returned from upstream");
    }

    #[tokio::test]
    async fn node_errors_stay_per_call() {
        let sender = replying(
            200,
            json!([
                {"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "method not found"}},
                {"jsonrpc": "2.0", "id": 0, "result": "0x1"},
            ]),
        );
        let transport = AggregatedTransport::new(sender);
        let responses = transport
            .execute(vec![request(0, "a"), request(1, "b")])
            .await
            .unwrap();
        assert!(responses[1].outcome.is_ok());
        assert_eq!(responses[0].outcome.as_ref().unwrap_err().code(), -32601);
    }

    #[tokio::test]
    async fn non_success_status_fails_whole_batch() {
        let transport = AggregatedTransport::new(replying(502, json!("bad gateway")));
        let err = transport.execute(vec![request(0, "a")]).await.unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_CONNECTION_ERROR);
        assert!(err.message().starts_with("HTTP 502"));
    }

    #[tokio::test]
    async fn non_array_reply_fails_whole_batch() {
        let transport = AggregatedTransport::new(replying(200, json!({"jsonrpc": "2.0", "id": 0, "result": 1})));
        let err = transport.execute(vec![request(0, "a")]).await.unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_INVALID_RESPONSE);
    }
}
