//! Multi-upstream client with health-checked round-robin dispatch.
//!
//! The set of usable upstreams lives in a single immutable snapshot that
//! dispatch reads without locking. Only a health check replaces it, and
//! health checks are serialized by an async mutex.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::batch::Batch;
use crate::client::{ExecutionSummary, RpcClient};
use crate::error::RpcError;
use crate::health::{BasicUpstreamValidator, UpstreamValidator};
use crate::transport::HealthStatus;

/// Configuration for the failover client.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Minimum peer count for an upstream to be usable.
    pub min_peers: u64,
    /// Hard deadline of one upstream's health check.
    pub health_check_timeout: Duration,
    /// Interval between health-check runs.
    pub health_check_period: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            min_peers: 3,
            health_check_timeout: Duration::from_secs(3),
            health_check_period: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    /// Indices into `FailoverClient::upstreams`, in configuration order.
    active: Vec<usize>,
    statuses: Vec<HealthStatus>,
}

/// Round-robin client over several upstreams, skipping the ones whose last
/// health check failed.
///
/// Nothing is usable until the first health check has run; start one with
/// [`revalidate`](Self::revalidate) or
/// [`start_configured_health_checking`](Self::start_configured_health_checking).
pub struct FailoverClient {
    upstreams: Vec<Arc<dyn RpcClient>>,
    snapshot: ArcSwap<Snapshot>,
    cursor: AtomicUsize,
    validator: Arc<dyn UpstreamValidator>,
    check_lock: tokio::sync::Mutex<()>,
    config: FailoverConfig,
}

impl FailoverClient {
    pub fn new(upstreams: Vec<Arc<dyn RpcClient>>, config: FailoverConfig) -> Result<Self, RpcError> {
        if upstreams.is_empty() {
            return Err(RpcError::InvalidCall(
                "failover client needs at least one upstream".into(),
            ));
        }
        let validator = Arc::new(BasicUpstreamValidator::new(
            config.min_peers,
            config.health_check_timeout,
        ));
        let snapshot = Snapshot {
            active: Vec::new(),
            statuses: vec![HealthStatus::Unknown; upstreams.len()],
        };
        Ok(Self {
            upstreams,
            snapshot: ArcSwap::from_pointee(snapshot),
            cursor: AtomicUsize::new(0),
            validator,
            check_lock: tokio::sync::Mutex::new(()),
            config,
        })
    }

    /// Replace the default `eth_syncing` / `net_peerCount` validator.
    pub fn with_validator(mut self, validator: Arc<dyn UpstreamValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Number of configured upstreams.
    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Whether the last health check found at least one usable upstream.
    pub fn has_upstreams(&self) -> bool {
        !self.snapshot.load().active.is_empty()
    }

    /// Labels of the currently usable upstreams.
    pub fn active_upstreams(&self) -> Vec<String> {
        self.snapshot
            .load()
            .active
            .iter()
            .filter_map(|&idx| self.upstreams.get(idx))
            .map(|u| u.label().to_string())
            .collect()
    }

    /// Every upstream with the status recorded by the last health check.
    pub fn health_summary(&self) -> Vec<(String, HealthStatus)> {
        let snapshot = self.snapshot.load();
        self.upstreams
            .iter()
            .zip(snapshot.statuses.iter())
            .map(|(u, status)| (u.label().to_string(), *status))
            .collect()
    }

    /// Check every upstream concurrently and install the usable ones as the
    /// new active set. Returns `true` if at least one upstream is usable.
    pub async fn revalidate(&self) -> bool {
        let _guard = self.check_lock.lock().await;

        let checks = self
            .upstreams
            .iter()
            .map(|u| self.validator.validate(u.as_ref()));
        let usable = futures::future::join_all(checks).await;

        let active: Vec<usize> = usable
            .iter()
            .enumerate()
            .filter_map(|(idx, ok)| ok.then_some(idx))
            .collect();
        let statuses = usable
            .iter()
            .map(|&ok| if ok { HealthStatus::Healthy } else { HealthStatus::Unhealthy })
            .collect();

        let any_usable = !active.is_empty();
        let previous = self.snapshot.swap(Arc::new(Snapshot {
            active: active.clone(),
            statuses,
        }));

        if previous.active != active {
            tracing::info!(
                usable = active.len(),
                total = self.upstreams.len(),
                active = ?self.active_upstreams(),
                "active upstream set changed"
            );
        }
        if !any_usable {
            tracing::warn!(total = self.upstreams.len(), "no usable upstreams after health check");
        }
        any_usable
    }

    /// Run [`revalidate`](Self::revalidate) once immediately and then every
    /// `period` until the returned handle is stopped or dropped.
    ///
    /// The loop holds only a weak reference; it also ends once the client
    /// itself is dropped.
    pub fn start_health_checking(
        self: &Arc<Self>,
        period: Duration,
    ) -> Result<HealthCheckHandle, RpcError> {
        if period.is_zero() {
            return Err(RpcError::InvalidCall(
                "health-check period must be greater than zero".into(),
            ));
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let client = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(client) = client.upgrade() else { break };
                        tokio::select! {
                            _ = cancelled.cancelled() => break,
                            _ = client.revalidate() => {}
                        }
                    }
                }
            }
            tracing::debug!("health checking stopped");
        });

        Ok(HealthCheckHandle {
            token,
            task: Some(task),
        })
    }

    /// [`start_health_checking`](Self::start_health_checking) at the
    /// configured `health_check_period`.
    pub fn start_configured_health_checking(self: &Arc<Self>) -> Result<HealthCheckHandle, RpcError> {
        self.start_health_checking(self.config.health_check_period)
    }

    fn next_upstream(&self) -> Option<&Arc<dyn RpcClient>> {
        let idx = {
            let snapshot = self.snapshot.load();
            if snapshot.active.is_empty() {
                return None;
            }
            let n = self.cursor.fetch_add(1, Ordering::Relaxed);
            snapshot.active[n % snapshot.active.len()]
        };
        self.upstreams.get(idx)
    }
}

#[async_trait]
impl RpcClient for FailoverClient {
    async fn execute(&self, batch: Batch) -> Result<ExecutionSummary, RpcError> {
        if batch.is_empty() {
            batch.close();
            return Ok(ExecutionSummary::empty());
        }

        let Some(upstream) = self.next_upstream() else {
            tracing::warn!(batch_size = batch.len(), "no upstream available for batch");
            let error = RpcError::NoUpstreamAvailable;
            batch.fail_pending(&error);
            batch.close();
            return Err(error);
        };

        tracing::debug!(upstream = upstream.label(), batch_size = batch.len(), "dispatching batch");
        upstream.execute(batch).await
    }

    fn label(&self) -> &str {
        "failover"
    }
}

/// Owner of a running health-check loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct HealthCheckHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HealthCheckHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "health-check task ended abnormally");
            }
        }
    }
}

impl Drop for HealthCheckHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::client::tests::MockTransport;
    use crate::client::{DefaultRpcClient, RpcClientExt};
    use crate::error::codes;
    use crate::transport::{CallRequest, CallResponse};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;

    /// Upstream answering health checks with `syncing` and block-number
    /// calls with its own name.
    fn upstream(name: &'static str, syncing: bool) -> (Arc<MockTransport>, Arc<dyn RpcClient>) {
        let transport = MockTransport::named(name, move |calls: &[CallRequest]| {
            Ok(calls
                .iter()
                .map(|c| match c.method.as_str() {
                    "eth_syncing" => CallResponse::ok(c.id, json!(syncing)),
                    "net_peerCount" => CallResponse::ok(c.id, json!("0x10")),
                    _ => CallResponse::ok(c.id, Value::String(name.into())),
                })
                .collect())
        });
        let client: Arc<dyn RpcClient> = Arc::new(DefaultRpcClient::new(transport.clone()));
        (transport, client)
    }

    fn block_number() -> Call<String> {
        Call::string("eth_blockNumber", vec![]).unwrap()
    }

    #[test]
    fn empty_upstream_list_is_rejected() {
        let err = FailoverClient::new(vec![], FailoverConfig::default()).err().unwrap();
        assert_eq!(err.code(), codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn round_robin_skips_unusable_upstream() {
        let (_, u1) = upstream("u1", false);
        let (t2, u2) = upstream("u2", true);
        let (_, u3) = upstream("u3", false);
        let client = FailoverClient::new(vec![u1, u2, u3], FailoverConfig::default()).unwrap();

        assert!(client.revalidate().await);
        assert_eq!(client.active_upstreams(), vec!["u1", "u3"]);
        let health_checks = t2.invocations();

        let mut served = Vec::new();
        for _ in 0..4 {
            served.push(client.call(block_number()).await.unwrap());
        }
        assert_eq!(served, vec!["u1", "u3", "u1", "u3"]);
        assert_eq!(t2.invocations(), health_checks);
    }

    #[tokio::test]
    async fn no_usable_upstream_fails_immediately() {
        let (t1, u1) = upstream("u1", true);
        let (t2, u2) = upstream("u2", true);
        let client = FailoverClient::new(vec![u1, u2], FailoverConfig::default()).unwrap();
        assert!(!client.revalidate().await);
        let checks = t1.invocations() + t2.invocations();

        let mut batch = Batch::new();
        let item = batch.add(block_number());
        let err = client.execute(batch).await.unwrap_err();
        assert_eq!(err.code(), codes::NO_UPSTREAM_AVAILABLE);
        assert_eq!(item.result().await.unwrap_err().code(), codes::NO_UPSTREAM_AVAILABLE);
        assert_eq!(t1.invocations() + t2.invocations(), checks);
    }

    #[tokio::test]
    async fn nothing_is_usable_before_first_check() {
        let (transport, u1) = upstream("u1", false);
        let client = FailoverClient::new(vec![u1], FailoverConfig::default()).unwrap();
        assert!(!client.has_upstreams());
        assert_eq!(client.health_summary(), vec![("u1".to_string(), HealthStatus::Unknown)]);

        let err = client.call(block_number()).await.unwrap_err();
        assert!(matches!(err, RpcError::NoUpstreamAvailable));
        assert_eq!(transport.invocations(), 0);
    }

    #[tokio::test]
    async fn health_summary_reflects_last_check() {
        let (_, u1) = upstream("u1", false);
        let (_, u2) = upstream("u2", true);
        let client = FailoverClient::new(vec![u1, u2], FailoverConfig::default()).unwrap();
        client.revalidate().await;
        assert_eq!(
            client.health_summary(),
            vec![
                ("u1".to_string(), HealthStatus::Healthy),
                ("u2".to_string(), HealthStatus::Unhealthy),
            ]
        );
    }

    struct Toggle(AtomicBool);

    #[async_trait]
    impl UpstreamValidator for Toggle {
        async fn validate(&self, _client: &dyn RpcClient) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn custom_validator_drives_active_set() {
        let (_, u1) = upstream("u1", false);
        let toggle = Arc::new(Toggle(AtomicBool::new(false)));
        let client = FailoverClient::new(vec![u1], FailoverConfig::default())
            .unwrap()
            .with_validator(toggle.clone());

        assert!(!client.revalidate().await);
        toggle.0.store(true, Ordering::SeqCst);
        assert!(client.revalidate().await);
        assert_eq!(client.call(block_number()).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn background_checking_runs_immediately_and_stops() {
        let (transport, u1) = upstream("u1", false);
        let client = Arc::new(FailoverClient::new(vec![u1], FailoverConfig::default()).unwrap());

        let handle = client.start_health_checking(Duration::from_secs(3600)).unwrap();
        for _ in 0..100 {
            if client.has_upstreams() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.has_upstreams());
        assert_eq!(transport.invocations(), 1);

        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let (_, u1) = upstream("u1", false);
        let client = Arc::new(FailoverClient::new(vec![u1], FailoverConfig::default()).unwrap());
        assert!(client.start_health_checking(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn configured_period_drives_background_checking() {
        let (transport, u1) = upstream("u1", false);
        let config = FailoverConfig {
            health_check_period: Duration::from_secs(3600),
            ..FailoverConfig::default()
        };
        let client = Arc::new(FailoverClient::new(vec![u1], config).unwrap());

        let handle = client.start_configured_health_checking().unwrap();
        for _ in 0..100 {
            if client.has_upstreams() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.has_upstreams());
        assert_eq!(transport.invocations(), 1);
        handle.stop().await;

        let zero = FailoverConfig {
            health_check_period: Duration::ZERO,
            ..FailoverConfig::default()
        };
        let (_, u2) = upstream("u2", false);
        let client = Arc::new(FailoverClient::new(vec![u2], zero).unwrap());
        assert!(client.start_configured_health_checking().is_err());
    }

    /// Validator recording how many checks overlap.
    #[derive(Default)]
    struct Overlap {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamValidator for Overlap {
        async fn validate(&self, _client: &dyn RpcClient) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn concurrent_revalidations_do_not_overlap() {
        let (_, u1) = upstream("u1", false);
        let overlap = Arc::new(Overlap::default());
        let client = FailoverClient::new(vec![u1], FailoverConfig::default())
            .unwrap()
            .with_validator(overlap.clone());

        let (a, b, c, d) = tokio::join!(
            client.revalidate(),
            client.revalidate(),
            client.revalidate(),
            client.revalidate()
        );
        assert!(a && b && c && d);
        assert_eq!(overlap.calls.load(Ordering::SeqCst), 4);
        assert_eq!(overlap.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failover_requires_peers_by_default() {
        assert_eq!(FailoverConfig::default().min_peers, 3);
        assert_eq!(BasicUpstreamValidator::default().min_peers, 0);
    }
}
