//! Batches of calls and their per-call result slots.
//!
//! A [`Batch`] owns its items. Adding a [`Call`] returns a [`BatchItem`]
//! handle which becomes terminal once the batch has been executed and
//! closed. Every item moves through an explicit state machine:
//!
//! ```text
//! Pending ──resolve──▶ Resolved ─┐
//!    │                           ├──close──▶ Closed
//!    └────fail────────▶ Failed ──┘
//! Pending ─────────────close (NotExecuted)──▶ Closed
//! ```
//!
//! The first terminal write wins; later writes are no-ops.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::call::Call;
use crate::error::RpcError;
use crate::request::RpcParam;
use crate::shape::ResultShape;
use crate::transport::CallRequest;

/// Result cell of one batch item.
#[derive(Debug, Clone)]
pub enum ItemState<R> {
    /// Waiting for a response.
    Pending,
    /// Response received and converted.
    Resolved(R),
    /// The call failed.
    Failed(RpcError),
    /// The batch is done; carries the final outcome.
    Closed(Result<R, RpcError>),
}

impl<R> ItemState<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Pending => ItemStatus::Pending,
            Self::Resolved(_) => ItemStatus::Resolved,
            Self::Failed(_) => ItemStatus::Failed,
            Self::Closed(_) => ItemStatus::Closed,
        }
    }
}

impl<R: Clone> ItemState<R> {
    /// Outcome of a non-pending state.
    pub fn outcome(&self) -> Option<Result<R, RpcError>> {
        match self {
            Self::Pending => None,
            Self::Resolved(value) => Some(Ok(value.clone())),
            Self::Failed(err) => Some(Err(err.clone())),
            Self::Closed(outcome) => Some(outcome.clone()),
        }
    }
}

/// Discriminant of [`ItemState`], for inspection without cloning values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Resolved,
    Failed,
    Closed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Type-erased view of a batch item, used by the execution pipeline to
/// address items of different result types uniformly.
pub trait BatchEntry: Send + Sync {
    fn id(&self) -> u64;
    fn method(&self) -> &str;
    fn params(&self) -> &[RpcParam];
    fn shape(&self) -> &ResultShape;
    fn status(&self) -> ItemStatus;

    /// Convert a raw result and resolve the item with it. A conversion
    /// failure fails the item instead. Returns `true` if this call made the
    /// item terminal.
    fn complete(&self, raw: Value) -> bool;

    /// Fail the item. Returns `true` if this call made the item terminal.
    fn fail(&self, error: RpcError) -> bool;

    /// Move the item to `Closed`, recording `NotExecuted` if it was pending.
    fn close(&self);

    fn is_pending(&self) -> bool {
        self.status() == ItemStatus::Pending
    }

    /// Transport-facing description of this item.
    fn request(&self) -> CallRequest {
        CallRequest {
            id: self.id(),
            method: self.method().to_string(),
            params: self.params().to_vec(),
            shape: self.shape().clone(),
        }
    }
}

struct ItemCell<R> {
    id: u64,
    call: Call<R>,
    state: watch::Sender<ItemState<R>>,
}

impl<R> ItemCell<R> {
    /// Pending → terminal transition. The check and the write happen under
    /// the channel's lock, so concurrent writers cannot both succeed.
    fn settle(&self, next: ItemState<R>) -> bool {
        self.state.send_if_modified(move |state| {
            if state.is_pending() {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl<R: Send + Sync + 'static> BatchEntry for ItemCell<R> {
    fn id(&self) -> u64 {
        self.id
    }

    fn method(&self) -> &str {
        self.call.method()
    }

    fn params(&self) -> &[RpcParam] {
        self.call.params()
    }

    fn shape(&self) -> &ResultShape {
        self.call.shape()
    }

    fn status(&self) -> ItemStatus {
        self.state.borrow().status()
    }

    fn complete(&self, raw: Value) -> bool {
        if !self.state.borrow().is_pending() {
            return false;
        }
        match self.call.convert(raw) {
            Ok(value) => self.settle(ItemState::Resolved(value)),
            Err(err) => self.settle(ItemState::Failed(err)),
        }
    }

    fn fail(&self, error: RpcError) -> bool {
        self.settle(ItemState::Failed(error))
    }

    fn close(&self) {
        let id = self.id;
        let method = self.call.method();
        self.state.send_if_modified(|state| {
            let outcome = match std::mem::replace(state, ItemState::Pending) {
                ItemState::Pending => Err(RpcError::NotExecuted {
                    id,
                    method: method.to_string(),
                }),
                ItemState::Resolved(value) => Ok(value),
                ItemState::Failed(err) => Err(err),
                already @ ItemState::Closed(_) => {
                    *state = already;
                    return false;
                }
            };
            *state = ItemState::Closed(outcome);
            true
        });
    }
}

/// Caller-side handle to one call inside a [`Batch`].
pub struct BatchItem<R> {
    cell: Arc<ItemCell<R>>,
}

impl<R> Clone for BatchItem<R> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<R> fmt::Debug for BatchItem<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchItem")
            .field("id", &self.cell.id)
            .field("call", &self.cell.call)
            .field("status", &self.cell.state.borrow().status())
            .finish()
    }
}

impl<R: Clone + Send + Sync + 'static> BatchItem<R> {
    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn call(&self) -> &Call<R> {
        &self.cell.call
    }

    pub fn status(&self) -> ItemStatus {
        self.cell.status()
    }

    /// Resolve with an already converted value. No-op unless pending.
    pub fn resolve(&self, value: R) -> bool {
        self.cell.settle(ItemState::Resolved(value))
    }

    /// Fail with `error`. No-op unless pending.
    pub fn fail(&self, error: RpcError) -> bool {
        self.cell.fail(error)
    }

    /// Close this item; see [`Batch::close`].
    pub fn close(&self) {
        self.cell.close()
    }

    /// Outcome if the item is no longer pending.
    pub fn try_result(&self) -> Option<Result<R, RpcError>> {
        self.cell.state.borrow().outcome()
    }

    /// Wait until the item leaves `Pending` and return its outcome.
    ///
    /// Completes once the owning batch is closed at the latest; dropping a
    /// batch closes it.
    pub async fn result(&self) -> Result<R, RpcError> {
        let mut rx = self.cell.state.subscribe();
        let state = rx
            .wait_for(|state| !state.is_pending())
            .await
            .map_err(|_| RpcError::Internal("batch item state channel closed".into()))?;
        state
            .outcome()
            .unwrap_or_else(|| Err(RpcError::Internal("batch item still pending".into())))
    }
}

/// Ordered group of calls executed together.
///
/// Ids are assigned from 0 upwards in insertion order and are unique within
/// the batch; they carry no meaning on the wire beyond correlation.
pub struct Batch {
    items: Vec<Arc<dyn BatchEntry>>,
    next_id: u64,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            next_id: 0,
        }
    }

    /// Append `call` and return the handle for its result.
    pub fn add<R: Clone + Send + Sync + 'static>(&mut self, call: Call<R>) -> BatchItem<R> {
        let id = self.next_id;
        self.next_id += 1;
        let (state, _) = watch::channel(ItemState::Pending);
        let cell = Arc::new(ItemCell { id, call, state });
        self.items.push(cell.clone());
        BatchItem { cell }
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[Arc<dyn BatchEntry>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transport-facing call list in insertion order.
    pub fn requests(&self) -> Vec<CallRequest> {
        self.items.iter().map(|item| item.request()).collect()
    }

    /// Number of items still waiting for a result.
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_pending()).count()
    }

    /// Fail every pending item with `error`; returns how many were failed.
    pub fn fail_pending(&self, error: &RpcError) -> usize {
        self.items
            .iter()
            .filter(|item| item.fail(error.clone()))
            .count()
    }

    /// Close every item. Items still pending receive a `NotExecuted`
    /// error. Safe to call any number of times.
    pub fn close(&self) {
        for item in &self.items {
            item.close();
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.items.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
