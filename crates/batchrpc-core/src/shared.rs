//! Memoized, multicast batch execution.
//!
//! A [`SharedExecution`] wraps one batch execution so that any number of
//! observers can await it: the first observer to poll starts the
//! execution, every observer receives the same outcome, and observers that
//! attach after completion get the cached outcome without re-executing.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::batch::Batch;
use crate::client::{ExecutionSummary, RpcClient};
use crate::error::RpcError;

type Outcome = Result<ExecutionSummary, RpcError>;

/// Lazily started, shareable batch execution.
#[derive(Clone)]
pub struct SharedExecution {
    inner: Shared<BoxFuture<'static, Outcome>>,
}

impl SharedExecution {
    /// Prepare the execution of `batch` on `client`. Nothing is sent until
    /// the first observer awaits [`subscribe`](Self::subscribe).
    pub fn new(client: Arc<dyn RpcClient>, batch: Batch) -> Self {
        let fut = async move { client.execute(batch).await }.boxed();
        Self { inner: fut.shared() }
    }

    /// A future resolving to the execution outcome.
    pub fn subscribe(&self) -> Shared<BoxFuture<'static, Outcome>> {
        self.inner.clone()
    }

    /// The cached outcome, if the execution has finished.
    pub fn peek(&self) -> Option<Outcome> {
        self.inner.peek().cloned()
    }
}
