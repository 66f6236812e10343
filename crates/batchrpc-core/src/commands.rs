//! Call definitions used by the engine itself (health checks) and the CLI.
//!
//! This is deliberately not a method catalogue; any other method can be
//! described with [`Call::new`], [`Call::typed`] or [`Call::with_converter`].

use serde_json::Value;

use crate::call::Call;
use crate::error::RpcError;
use crate::shape::ResultShape;

/// Progress reported by `eth_syncing` while a node is catching up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
}

/// Result of `eth_syncing`: `false`, or an object with progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    NotSyncing,
    Syncing(SyncProgress),
}

impl SyncStatus {
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing(_))
    }

    fn from_value(raw: Value) -> Result<Self, RpcError> {
        match raw {
            Value::Bool(false) | Value::Null => Ok(Self::NotSyncing),
            Value::Object(obj) => {
                let field = |name: &str| match obj.get(name) {
                    Some(Value::String(s)) => parse_quantity(s),
                    Some(Value::Number(n)) => n
                        .as_u64()
                        .ok_or_else(|| RpcError::invalid_response(format!("{name} is not a u64"))),
                    _ => Ok(0),
                };
                Ok(Self::Syncing(SyncProgress {
                    starting_block: field("startingBlock")?,
                    current_block: field("currentBlock")?,
                    highest_block: field("highestBlock")?,
                }))
            }
            // Some clients answer `true` without details.
            Value::Bool(true) => Ok(Self::Syncing(SyncProgress {
                starting_block: 0,
                current_block: 0,
                highest_block: 0,
            })),
            other => Err(RpcError::invalid_response(format!(
                "unexpected eth_syncing result: {other}"
            ))),
        }
    }
}

/// Parse a hex quantity such as `"0x1b4"`.
pub fn parse_quantity(s: &str) -> Result<u64, RpcError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| RpcError::invalid_response(format!("quantity without 0x prefix: {s:?}")))?;
    if digits.is_empty() {
        return Err(RpcError::invalid_response("empty quantity"));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::invalid_response(format!("invalid quantity {s:?}: {e}")))
}

fn quantity(raw: Value) -> Result<u64, RpcError> {
    match raw {
        Value::String(s) => parse_quantity(&s),
        other => Err(RpcError::invalid_response(format!(
            "expected hex quantity but received {other}"
        ))),
    }
}

fn string(raw: Value) -> Result<String, RpcError> {
    match raw {
        Value::String(s) => Ok(s),
        other => Err(RpcError::invalid_response(format!(
            "expected string but received {other}"
        ))),
    }
}

pub fn eth_syncing() -> Call<SyncStatus> {
    Call::known("eth_syncing", vec![], ResultShape::Any, SyncStatus::from_value)
}

pub fn net_peer_count() -> Call<u64> {
    Call::known("net_peerCount", vec![], ResultShape::String, quantity)
}

pub fn eth_block_number() -> Call<u64> {
    Call::known("eth_blockNumber", vec![], ResultShape::String, quantity)
}

pub fn eth_chain_id() -> Call<u64> {
    Call::known("eth_chainId", vec![], ResultShape::String, quantity)
}

pub fn web3_client_version() -> Call<String> {
    Call::known("web3_clientVersion", vec![], ResultShape::String, string)
}
