//! batchrpc-core: batching, correlation and failover for JSON-RPC clients.
//!
//! # Overview
//!
//! Callers describe operations as typed [`Call`]s, group them into a
//! [`Batch`], and execute the batch through an [`RpcClient`]. Each call gets
//! a [`BatchItem`] handle that resolves independently once responses are
//! matched back by id. The core crate defines:
//!
//! - [`Call`] / [`ResultShape`]: immutable call definitions and the raw
//!   result shape they expect
//! - [`Batch`] / [`BatchItem`]: per-call result slots with a first-write-wins
//!   state machine
//! - [`RpcTransport`]: the async trait every wire strategy implements
//! - [`DefaultRpcClient`]: execution pipeline over one transport
//! - [`FailoverClient`]: health-checked round-robin over several clients
//! - [`SharedExecution`]: memoized execution observable by many awaiters
//! - [`RpcError`]: structured error type with JSON-RPC style codes
//!
//! HTTP transports live in the `batchrpc-http` crate.

pub mod batch;
pub mod call;
pub mod client;
pub mod codec;
pub mod commands;
pub mod context;
pub mod error;
pub mod failover;
pub mod health;
pub mod request;
pub mod shape;
pub mod shared;
pub mod transport;

pub use batch::{Batch, BatchEntry, BatchItem, ItemState, ItemStatus};
pub use call::{Call, Converter};
pub use client::{
    spawn_execute, DefaultRpcClient, ExecutionSummary, FailPendingItems, FallbackPolicy,
    RpcClient, RpcClientExt,
};
pub use codec::{JsonCodec, RpcCodec};
pub use context::CallContext;
pub use error::RpcError;
pub use failover::{FailoverClient, FailoverConfig, HealthCheckHandle};
pub use health::{BasicUpstreamValidator, UpstreamValidator};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use shape::ResultShape;
pub use shared::SharedExecution;
pub use transport::{CallRequest, CallResponse, HealthStatus, RpcTransport};
