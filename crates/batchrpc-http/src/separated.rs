//! One HTTP request per call, issued concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use batchrpc_core::codec::RpcCodec;
use batchrpc_core::request::RpcId;
use batchrpc_core::transport::{CallRequest, CallResponse, RpcTransport};
use batchrpc_core::{JsonCodec, RpcError};

use crate::sender::HttpSender;

/// Default bound on in-flight requests per batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Transport sending every call of a batch as its own POST.
///
/// Each reply is paired with the call that produced it, so a failure of one
/// request only fails that call. `execute` itself never fails for a
/// non-empty batch.
pub struct SeparatedTransport {
    sender: Arc<dyn HttpSender>,
    codec: Arc<dyn RpcCodec>,
    max_concurrency: usize,
}

impl SeparatedTransport {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self {
            sender,
            codec: Arc::new(JsonCodec),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn RpcCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Bound the number of concurrent requests; `0` is treated as `1`.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    async fn send_one(&self, call: CallRequest) -> CallResponse {
        match self.exchange(&call).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(id = call.id, method = %call.method, error = %e, "call failed");
                CallResponse::err(call.id, e)
            }
        }
    }

    async fn exchange(&self, call: &CallRequest) -> Result<CallResponse, RpcError> {
        let body = self.codec.encode_request(&call.to_json())?;
        let reply = self.sender.post(body).await?;
        if !reply.is_success() {
            return Err(reply.status_error());
        }

        let resp = self.codec.decode_response(&reply.body)?;
        // A node that cannot parse the request answers with a null id.
        let matches = resp.id == RpcId::Null || resp.id.as_number() == Some(call.id);
        if !matches {
            return Err(RpcError::invalid_response(format!(
                "response id {} does not match request id {}",
                resp.id, call.id
            )));
        }

        let mut paired = CallResponse::from_json(resp);
        paired.id = RpcId::Number(call.id);
        Ok(paired)
    }
}

#[async_trait]
impl RpcTransport for SeparatedTransport {
    async fn execute(&self, calls: Vec<CallRequest>) -> Result<Vec<CallResponse>, RpcError> {
        if calls.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!(
            url = %self.sender.url(),
            batch_size = calls.len(),
            max_concurrency = self.max_concurrency,
            "sending calls separately"
        );

        let responses = stream::iter(calls)
            .map(|call| self.send_one(call))
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;
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

    fn by_id(mut responses: Vec<CallResponse>) -> Vec<CallResponse> {
        responses.sort_by_key(|r| r.id.as_number());
        responses
    }

    #[tokio::test]
    async fn one_post_per_call() {
        let sender = MockSender::node("never");
        let transport = SeparatedTransport::new(sender.clone()).with_max_concurrency(2);
        let responses = by_id(
            transport
                .execute(vec![request(0, "a"), request(1, "b"), request(2, "c")])
                .await
                .unwrap(),
        );
        assert_eq!(sender.posts(), 3);
        let values: Vec<&Value> = responses.iter().map(|r| r.outcome.as_ref().unwrap()).collect();
        assert_eq!(values, vec![&json!("a"), &json!("b"), &json!("c")]);
    }

    #[tokio::test]
    async fn transport_failure_stays_with_its_call() {
        let transport = SeparatedTransport::new(MockSender::node("b"));
        let responses = by_id(
            transport
                .execute(vec![request(0, "a"), request(1, "b"), request(2, "c")])
                .await
                .unwrap(),
        );
        assert!(responses[0].outcome.is_ok());
        assert_eq!(
            responses[1].outcome.as_ref().unwrap_err().code(),
            codes::UPSTREAM_CONNECTION_ERROR
        );
        assert!(responses[2].outcome.is_ok());
    }

    #[tokio::test]
    async fn mismatched_id_fails_that_call() {
        let sender = MockSender::new(|_| {
            Ok(HttpReply {
                status: 200,
                body: br#"{"jsonrpc":"2.0","id":77,"result":"0x1"}"#.to_vec(),
            })
        });
        let transport = SeparatedTransport::new(sender);
        let responses = transport.execute(vec![request(3, "a")]).await.unwrap();
        assert_eq!(responses[0].id, RpcId::Number(3));
        let err = responses[0].outcome.as_ref().unwrap_err();
        assert_eq!(err.code(), codes::UPSTREAM_INVALID_RESPONSE);
    }

    #[tokio::test]
    async fn null_id_error_is_attached_to_the_call() {
        let sender = MockSender::new(|_| {
            Ok(HttpReply {
                status: 200,
                body: br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse error"}}"#
                    .to_vec(),
            })
        });
        let transport = SeparatedTransport::new(sender);
        let responses = transport.execute(vec![request(5, "a")]).await.unwrap();
        assert_eq!(responses[0].id, RpcId::Number(5));
        assert_eq!(responses[0].outcome.as_ref().unwrap_err().code(), -32700);
    }

    #[tokio::test]
    async fn non_success_status_fails_that_call() {
        let sender = MockSender::new(|_| {
            Ok(HttpReply {
                status: 429,
                body: b"too many requests".to_vec(),
            })
        });
        let transport = SeparatedTransport::new(sender);
        let responses = transport.execute(vec![request(0, "a")]).await.unwrap();
        let err = responses[0].outcome.as_ref().unwrap_err();
        assert_eq!(err.message(), "HTTP 429: too many requests");
    }
}
