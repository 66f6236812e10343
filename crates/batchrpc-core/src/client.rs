//! Batch execution: Batch → CallContext → Transport → demux → close.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::batch::{Batch, ItemStatus};
use crate::call::Call;
use crate::context::CallContext;
use crate::error::RpcError;
use crate::transport::{CallResponse, RpcTransport};

/// Counts describing one finished execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Calls sent to the transport.
    pub requested: usize,
    /// Items resolved with a value by this execution.
    pub resolved: usize,
    /// Items failed by a per-call error in this execution.
    pub failed: usize,
    /// Response entries whose id matched no item.
    pub unmatched: usize,
}

impl ExecutionSummary {
    /// Summary of a batch with nothing to execute.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requested == 0
    }
}

/// Anything that can execute a [`Batch`] against an upstream.
///
/// After `execute` returns, successfully or not, every item of the batch is
/// terminal.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    async fn execute(&self, batch: Batch) -> Result<ExecutionSummary, RpcError>;

    /// Identifier of the upstream(s) this client talks to.
    fn label(&self) -> &str;
}

/// Typed conveniences available on every [`RpcClient`].
#[async_trait]
pub trait RpcClientExt: RpcClient {
    /// Execute a single call and return its own outcome.
    ///
    /// The aggregate error channel is ignored: whatever happened to the
    /// batch, the caller sees exactly the error recorded on this one item.
    async fn call<R>(&self, call: Call<R>) -> Result<R, RpcError>
    where
        R: Clone + Send + Sync + 'static,
    {
        let mut batch = Batch::new();
        let item = batch.add(call);
        if let Err(e) = self.execute(batch).await {
            tracing::debug!(error = %e, method = item.call().method(), "single call batch failed");
        }
        item.result().await
    }

    /// Execute calls of one result type together; outcomes are returned in
    /// submission order. A whole-batch failure is returned as `Err`.
    async fn call_batch<R>(&self, calls: Vec<Call<R>>) -> Result<Vec<Result<R, RpcError>>, RpcError>
    where
        R: Clone + Send + Sync + 'static,
    {
        let mut batch = Batch::new();
        let items: Vec<_> = calls.into_iter().map(|call| batch.add(call)).collect();
        self.execute(batch).await?;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in &items {
            outcomes.push(item.result().await);
        }
        Ok(outcomes)
    }
}

impl<T: RpcClient + ?Sized> RpcClientExt for T {}

/// Run `batch` on the Tokio runtime; item handles complete as it runs.
pub fn spawn_execute(
    client: Arc<dyn RpcClient>,
    batch: Batch,
) -> JoinHandle<Result<ExecutionSummary, RpcError>> {
    tokio::spawn(async move { client.execute(batch).await })
}

/// What to do with still-pending items when the whole batch failed.
pub trait FallbackPolicy: Send + Sync + 'static {
    fn on_batch_failure(&self, batch: &Batch, error: &RpcError);
}

/// Push the whole-batch error into every pending item, so callers waiting on
/// individual items see the real transport error instead of `NotExecuted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailPendingItems;

impl FallbackPolicy for FailPendingItems {
    fn on_batch_failure(&self, batch: &Batch, error: &RpcError) {
        let failed = batch.fail_pending(error);
        tracing::debug!(failed, error = %error, "propagated batch failure to pending items");
    }
}

/// Client bound to one transport.
pub struct DefaultRpcClient {
    transport: Arc<dyn RpcTransport>,
    fallback: Option<Arc<dyn FallbackPolicy>>,
}

impl DefaultRpcClient {
    /// Client with the [`FailPendingItems`] fallback installed.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            fallback: Some(Arc::new(FailPendingItems)),
        }
    }

    pub fn with_fallback(mut self, policy: Arc<dyn FallbackPolicy>) -> Self {
        self.fallback = Some(policy);
        self
    }

    /// Leave items pending on whole-batch failure; they become
    /// `NotExecuted` when the batch is closed.
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    fn demux(&self, context: &CallContext, responses: Vec<CallResponse>) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            requested: context.len(),
            ..ExecutionSummary::default()
        };

        for resp in responses {
            let Some(item) = resp.id.as_number().and_then(|id| context.resolver_for(id)) else {
                tracing::debug!(id = %resp.id, url = %self.transport.url(), "ignoring response with unknown id");
                summary.unmatched += 1;
                continue;
            };

            let outcome = resp.outcome.and_then(|raw| {
                match context.expected_shape_for(item.id()) {
                    Some(shape) => shape.check(&raw).map(|_| raw),
                    None => Ok(raw),
                }
            });

            match outcome {
                Ok(raw) => {
                    if item.complete(raw) {
                        if item.status() == ItemStatus::Resolved {
                            summary.resolved += 1;
                        } else {
                            summary.failed += 1;
                        }
                    }
                }
                Err(err) => {
                    if item.fail(err) {
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }
}

#[async_trait]
impl RpcClient for DefaultRpcClient {
    async fn execute(&self, batch: Batch) -> Result<ExecutionSummary, RpcError> {
        if batch.is_empty() {
            batch.close();
            return Ok(ExecutionSummary::empty());
        }

        let context = match CallContext::from_batch(&batch) {
            Ok(context) => context,
            Err(e) => {
                batch.close();
                return Err(e);
            }
        };

        let url = self.transport.url();
        tracing::debug!(url = %url, batch_size = batch.len(), "executing batch");

        match self.transport.execute(batch.requests()).await {
            Ok(responses) => {
                let summary = self.demux(&context, responses);
                batch.close();
                tracing::debug!(
                    url = %url,
                    resolved = summary.resolved,
                    failed = summary.failed,
                    unmatched = summary.unmatched,
                    "batch complete"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!(url = %url, batch_size = batch.len(), error = %e, "batch failed");
                if let Some(policy) = &self.fallback {
                    policy.on_batch_failure(&batch, &e);
                }
                batch.close();
                Err(e)
            }
        }
    }

    fn label(&self) -> &str {
        self.transport.url()
    }
}
