//! batchrpc-http: HTTP transports for batchrpc.
//!
//! Two wire strategies implement [`RpcTransport`](batchrpc_core::RpcTransport):
//!
//! - [`AggregatedTransport`]: the whole batch as one JSON array in one POST
//! - [`SeparatedTransport`]: one POST per call, run concurrently
//!
//! Both sit on an [`HttpSender`]; [`ReqwestSender`] is the `reqwest`
//! implementation.
//!
//! # Usage
//! ```rust,no_run
//! use batchrpc_core::{commands, RpcClientExt};
//! use batchrpc_http::{connect, HttpClientConfig, TransportStrategy};
//!
//! # async fn run() -> Result<(), batchrpc_core::RpcError> {
//! let config = HttpClientConfig {
//!     strategy: TransportStrategy::Separated,
//!     ..HttpClientConfig::default()
//! };
//! let client = connect("http://localhost:8545", &config)?;
//! let height = client.call(commands::eth_block_number()).await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregated;
pub mod client;
pub mod sender;
pub mod separated;

pub use aggregated::AggregatedTransport;
pub use client::{
    connect, default_for, failover, transport, transport_with_sender, HttpClientConfig,
    TransportStrategy, UnknownStrategy,
};
pub use sender::{HttpReply, HttpSender, ReqwestSender};
pub use separated::SeparatedTransport;
