//! Client construction from an endpoint URL and configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use batchrpc_core::{
    DefaultRpcClient, FailoverClient, FailoverConfig, RpcClient, RpcError, RpcTransport,
};

use crate::aggregated::AggregatedTransport;
use crate::sender::{HttpSender, ReqwestSender};
use crate::separated::{SeparatedTransport, DEFAULT_MAX_CONCURRENCY};

/// How a batch is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStrategy {
    /// All calls in one JSON array, one POST.
    #[default]
    Aggregated,
    /// One POST per call, sent concurrently.
    Separated,
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregated => write!(f, "aggregated"),
            Self::Separated => write!(f, "separated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transport strategy {0:?}, expected \"aggregated\" or \"separated\"")]
pub struct UnknownStrategy(pub String);

impl FromStr for TransportStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggregated" => Ok(Self::Aggregated),
            "separated" => Ok(Self::Separated),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Configuration for HTTP-backed clients.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub strategy: TransportStrategy,
    pub request_timeout: Duration,
    /// In-flight request bound for [`TransportStrategy::Separated`].
    pub max_concurrency: usize,
    /// Mirror whole-batch failures into pending items.
    pub fallback: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            strategy: TransportStrategy::default(),
            request_timeout: Duration::from_secs(30),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fallback: true,
        }
    }
}

/// Build the transport selected by `config` on top of `sender`.
pub fn transport_with_sender(
    sender: Arc<dyn HttpSender>,
    config: &HttpClientConfig,
) -> Arc<dyn RpcTransport> {
    match config.strategy {
        TransportStrategy::Aggregated => Arc::new(AggregatedTransport::new(sender)),
        TransportStrategy::Separated => Arc::new(
            SeparatedTransport::new(sender).with_max_concurrency(config.max_concurrency),
        ),
    }
}

/// Build the transport selected by `config` for `url`.
pub fn transport(url: &str, config: &HttpClientConfig) -> Result<Arc<dyn RpcTransport>, RpcError> {
    let sender = Arc::new(ReqwestSender::new(url, config.request_timeout)?);
    Ok(transport_with_sender(sender, config))
}

/// Client for one JSON-RPC endpoint.
pub fn connect(url: &str, config: &HttpClientConfig) -> Result<DefaultRpcClient, RpcError> {
    let client = DefaultRpcClient::new(transport(url, config)?);
    tracing::debug!(url, strategy = %config.strategy, fallback = config.fallback, "client ready");
    Ok(if config.fallback {
        client
    } else {
        client.without_fallback()
    })
}

/// Client for `url` with default configuration.
pub fn default_for(url: &str) -> Result<DefaultRpcClient, RpcError> {
    connect(url, &HttpClientConfig::default())
}

/// Failover client over several endpoints sharing one HTTP configuration.
///
/// Health checking is not started; see
/// [`FailoverClient::start_health_checking`].
pub fn failover<S: AsRef<str>>(
    urls: &[S],
    http: &HttpClientConfig,
    config: FailoverConfig,
) -> Result<FailoverClient, RpcError> {
    let upstreams = urls
        .iter()
        .map(|url| connect(url.as_ref(), http).map(|c| Arc::new(c) as Arc<dyn RpcClient>))
        .collect::<Result<Vec<_>, _>>()?;
    FailoverClient::new(upstreams, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::tests::MockSender;
    use batchrpc_core::error::codes;
    use batchrpc_core::{Batch, Call};

    #[test]
    fn strategy_parses_and_serializes_lowercase() {
        assert_eq!("separated".parse::<TransportStrategy>().unwrap(), TransportStrategy::Separated);
        assert_eq!(" Aggregated ".parse::<TransportStrategy>().unwrap(), TransportStrategy::Aggregated);
        assert!("pipelined".parse::<TransportStrategy>().is_err());

        let json = serde_json::to_string(&TransportStrategy::Separated).unwrap();
        assert_eq!(json, "\"separated\"");
        let back: TransportStrategy = serde_json::from_str("\"aggregated\"").unwrap();
        assert_eq!(back, TransportStrategy::Aggregated);
    }

    #[test]
    fn default_config() {
        let config = HttpClientConfig::default();
        assert_eq!(config.strategy, TransportStrategy::Aggregated);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.fallback);
    }

    #[test]
    fn failover_requires_urls() {
        let urls: [&str; 0] = [];
        let err = failover(&urls, &HttpClientConfig::default(), FailoverConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), codes::INVALID_PARAMS);
    }

    async fn run_with_second_call_failing(strategy: TransportStrategy) -> Vec<Result<String, RpcError>> {
        let config = HttpClientConfig {
            strategy,
            ..HttpClientConfig::default()
        };
        let transport = transport_with_sender(MockSender::node("m2"), &config);
        let client = DefaultRpcClient::new(transport);

        let mut batch = Batch::new();
        let items: Vec<_> = ["m1", "m2", "m3"]
            .iter()
            .map(|m| batch.add(Call::string(m, vec![]).unwrap()))
            .collect();
        let _ = client.execute(batch).await;

        let mut outcomes = Vec::new();
        for item in &items {
            outcomes.push(item.result().await);
        }
        outcomes
    }

    #[tokio::test]
    async fn aggregated_fails_every_call_together() {
        let outcomes = run_with_second_call_failing(TransportStrategy::Aggregated).await;
        for outcome in &outcomes {
            let err = outcome.as_ref().unwrap_err();
            assert_eq!(err.code(), codes::UPSTREAM_CONNECTION_ERROR);
            assert_eq!(err.message(), "connection reset");
        }
    }

    #[tokio::test]
    async fn separated_fails_only_the_broken_call() {
        let outcomes = run_with_second_call_failing(TransportStrategy::Separated).await;
        assert_eq!(outcomes[0].as_ref().unwrap(), "m1");
        assert_eq!(
            outcomes[1].as_ref().unwrap_err().code(),
            codes::UPSTREAM_CONNECTION_ERROR
        );
        assert_eq!(outcomes[2].as_ref().unwrap(), "m3");
    }
}
