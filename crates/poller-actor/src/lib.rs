use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use collector::Collector;
use types::{unix_seconds, DeviceIdentity, MessagePublisher, Metric, MetricsSink, TelemetrySnapshot};

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub poll_interval: Duration,
    /// Deadline for one whole collection, retries included.
    pub collection_timeout: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            collection_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOutcome {
    /// Snapshot stored and this many metrics published.
    Published(usize),
    Failed,
    /// Another collection was still running.
    Skipped,
}

/// Clears the in-flight flag when the collection ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically collects telemetry from one controller and fans it out.
pub struct CollectionScheduler {
    identity: DeviceIdentity,
    collector: Collector,
    publisher: Arc<dyn MessagePublisher>,
    metrics: Arc<dyn MetricsSink>,
    config: ActorConfig,
    last_status: RwLock<Option<TelemetrySnapshot>>,
    in_flight: AtomicBool,
}

impl CollectionScheduler {
    pub fn new(
        identity: DeviceIdentity,
        collector: Collector,
        publisher: Arc<dyn MessagePublisher>,
        metrics: Arc<dyn MetricsSink>,
        config: ActorConfig,
    ) -> Self {
        Self {
            identity,
            collector,
            publisher,
            metrics,
            config,
            last_status: RwLock::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Last successfully collected snapshot; `None` until the first success.
    pub async fn latest_status(&self) -> Option<TelemetrySnapshot> {
        self.last_status.read().await.clone()
    }

    /// Runs one collection unless another one is still in flight.
    pub async fn collect_and_publish(&self) -> CollectionOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(device_id = %self.identity.device_id, "collection already in flight, skipping tick");
            return CollectionOutcome::Skipped;
        };

        match timeout(self.config.collection_timeout, self.collector.get_status()).await {
            Ok(Ok(snapshot)) => {
                let published = self.publish_snapshot(snapshot).await;
                CollectionOutcome::Published(published)
            }
            Ok(Err(err)) => {
                warn!(device_id = %self.identity.device_id, error = %err, "telemetry collection failed");
                self.report_failure();
                CollectionOutcome::Failed
            }
            Err(_) => {
                warn!(
                    device_id = %self.identity.device_id,
                    timeout_ms = self.config.collection_timeout.as_millis() as u64,
                    "telemetry collection timed out"
                );
                self.report_failure();
                CollectionOutcome::Failed
            }
        }
    }

    async fn publish_snapshot(&self, snapshot: TelemetrySnapshot) -> usize {
        self.metrics.record_snapshot(&snapshot);
        let metrics = snapshot.to_metrics();
        *self.last_status.write().await = Some(snapshot);

        let mut published = 0;
        for metric in &metrics {
            if self.publish_metric(metric) {
                published += 1;
            }
        }
        debug!(device_id = %self.identity.device_id, published, "telemetry published");
        published
    }

    fn report_failure(&self) {
        self.metrics.increment_failures();
        self.publish_metric(&Metric::collection_failure(unix_seconds()));
    }

    fn publish_metric(&self, metric: &Metric) -> bool {
        match metric.to_json() {
            Ok(payload) => {
                self.publisher
                    .publish(&self.identity.topic(metric.name), &payload);
                true
            }
            Err(err) => {
                warn!(metric = metric.name, error = %err, "failed to serialize metric");
                false
            }
        }
    }

    /// Collects immediately, then once per poll interval until shutdown.
    ///
    /// Each tick runs on its own task so a slow device never delays the timer;
    /// ticks that land on a running collection are skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            device_id = %self.identity.device_id,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "collection scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.collect_and_publish().await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(device_id = %self.identity.device_id, "collection scheduler shutdown requested");
    }
}
