//! Notification pipeline
//!
//! Pairs from the scan cycle and the global sweep go into a fixed-capacity,
//! power-of-two ring. A fixed pool of consumer tasks takes them out; each pair
//! is handled by exactly one consumer, which claims it with `try_notify`,
//! resolves both connections through the registry and writes the outcome to
//! both concurrently.
//!
//! A failure or panic while handling one pair is logged with the pair's
//! context and never stops the consumer. Shutdown stops intake, lets the
//! consumers drain what is queued within a bounded wait, then aborts them.

use crossbeam_queue::ArrayQueue;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::pair::{MatchPair, PairSide, PairState};
use crate::registry::ConnectionRegistry;
use crate::transport::SharedHandle;
use messaging::{Message, MessagingClient};

/// Pipeline sizing and timing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ring_size: usize,
    pub consumers: usize,
    pub pair_timeout: Duration,
    /// `None` disables the throughput reporter
    pub report_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_size: 1024,
            consumers: 4,
            pair_timeout: crate::pair::PAIR_TIMEOUT,
            report_interval: None,
        }
    }
}

impl From<&config::NotificationConfig> for PipelineConfig {
    fn from(cfg: &config::NotificationConfig) -> Self {
        Self {
            ring_size: cfg.ring_buffer_size,
            consumers: cfg.consumers,
            pair_timeout: Duration::from_millis(cfg.pair_timeout_ms),
            report_interval: (cfg.report_interval_ms > 0)
                .then(|| Duration::from_millis(cfg.report_interval_ms)),
        }
    }
}

/// Destination for a JSON record of every processed pair
#[derive(Clone)]
pub struct PairMirror {
    pub client: Arc<dyn MessagingClient>,
    pub topic: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PairRecord<'a> {
    match_id: uuid::Uuid,
    matched_at: chrono::DateTime<chrono::Utc>,
    outcome: &'static str,
    first: &'a PairSide,
    second: &'a PairSide,
}

struct Shared {
    ring: ArrayQueue<MatchPair>,
    ready: Notify,
    stop: CancellationToken,
    accepting: AtomicBool,
    registry: Arc<ConnectionRegistry>,
    metrics: PipelineMetrics,
    pair_timeout: Duration,
    mirror: Option<PairMirror>,
}

pub struct NotificationPipeline {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationPipeline {
    /// Build the ring and spawn the consumer pool on the current runtime
    pub fn start(
        config: PipelineConfig,
        registry: Arc<ConnectionRegistry>,
        mirror: Option<PairMirror>,
    ) -> Result<Self, PipelineError> {
        if config.ring_size == 0 || !config.ring_size.is_power_of_two() {
            return Err(PipelineError::InvalidRingSize(config.ring_size));
        }
        if config.consumers == 0 {
            return Err(PipelineError::NoConsumers);
        }

        let shared = Arc::new(Shared {
            ring: ArrayQueue::new(config.ring_size),
            ready: Notify::new(),
            stop: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            registry,
            metrics: PipelineMetrics::new(),
            pair_timeout: config.pair_timeout,
            mirror,
        });

        let mut workers: Vec<JoinHandle<()>> = (0..config.consumers)
            .map(|id| tokio::spawn(consume(Arc::clone(&shared), id)))
            .collect();

        if let Some(period) = config.report_interval {
            workers.push(tokio::spawn(report(Arc::clone(&shared), period)));
        }

        info!(
            ring_size = config.ring_size,
            consumers = config.consumers,
            "Notification pipeline started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Hand a pair to the consumers.
    ///
    /// Waits for a free slot while the ring is full. Once shutdown has begun
    /// the pair is handed back inside the error.
    pub fn publish(&self, pair: MatchPair) -> Result<(), PipelineError> {
        let shared = &self.shared;
        let mut pending = pair;
        loop {
            if !shared.accepting.load(Ordering::Acquire) {
                return Err(PipelineError::ShutDown(Box::new(pending)));
            }
            match shared.ring.push(pending) {
                Ok(()) => {
                    shared.metrics.published.increment();
                    shared.ready.notify_one();
                    return Ok(());
                }
                Err(back) => {
                    pending = back;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Publish a batch, returning how many were accepted
    pub fn publish_all(&self, pairs: impl IntoIterator<Item = MatchPair>) -> usize {
        let mut accepted = 0;
        for pair in pairs {
            match self.publish(pair) {
                Ok(()) => accepted += 1,
                Err(PipelineError::ShutDown(pair)) => {
                    warn!(match_id = %pair.match_id(), "Pipeline shut down, match dropped");
                }
                Err(e) => error!(error = %e, "Failed to publish match"),
            }
        }
        accepted
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Pairs waiting in the ring
    pub fn queued(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.shared.metrics
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        self.shared.metrics.snapshot(self.queued())
    }

    /// Stop intake and drain, waiting at most `timeout` for the consumers.
    ///
    /// Returns the number of pairs left undelivered.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.stop.cancel();
        self.shared.ready.notify_waiters();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(workers)).await {
            Ok(_) => info!("Notification pipeline drained"),
            Err(_) => {
                warn!(
                    queued = self.shared.ring.len(),
                    "Timed out draining notification pipeline, aborting consumers"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        let left = self.shared.ring.len();
        info!(
            delivered = self.shared.metrics.delivered.get(),
            failed = self.shared.metrics.failed.get(),
            left,
            "Notification pipeline stopped"
        );
        left
    }
}

async fn consume(shared: Arc<Shared>, id: usize) {
    debug!(consumer = id, "Notification consumer started");
    loop {
        while let Some(pair) = shared.ring.pop() {
            handle(&shared, pair).await;
        }

        if shared.stop.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = shared.ready.notified() => {}
            _ = shared.stop.cancelled() => {}
        }
    }
    debug!(consumer = id, "Notification consumer stopped");
}

async fn report(shared: Arc<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shared.stop.cancelled() => break,
            _ = ticker.tick() => {
                let m = &shared.metrics;
                debug!(
                    delivered = m.delivered.get(),
                    processed = m.processed(),
                    published = m.published.get(),
                    queued = shared.ring.len(),
                    "Notification throughput"
                );
            }
        }
    }
}

/// Process one pair; the pair is dropped (slot released) on return
async fn handle(shared: &Shared, pair: MatchPair) {
    let outcome = AssertUnwindSafe(deliver(shared, &pair)).catch_unwind().await;

    if let Err(panic) = outcome {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());

        shared.metrics.panics.increment();
        error!(
            match_id = %pair.match_id(),
            first = %pair.first().username,
            first_channel = %pair.first().channel_id,
            second = %pair.second().username,
            second_channel = %pair.second().channel_id,
            reason,
            "Panic while delivering match"
        );
        if pair.mark_failure() {
            shared.metrics.failed.increment();
        }
    }
}

async fn deliver(shared: &Shared, pair: &MatchPair) {
    if !pair.try_notify() {
        debug!(match_id = %pair.match_id(), state = ?pair.state(), "Match already claimed");
        return;
    }

    if pair.is_older_than(shared.pair_timeout) {
        shared.metrics.stale.increment();
        warn!(
            match_id = %pair.match_id(),
            age_ms = pair.age().as_millis() as u64,
            "Delivering stale match"
        );
    }

    let first = shared.registry.lookup(&pair.first().channel_id);
    let second = shared.registry.lookup(&pair.second().channel_id);

    let (first_ok, second_ok) = tokio::join!(
        write_side(shared, pair, true, first),
        write_side(shared, pair, false, second),
    );

    if first_ok && second_ok {
        pair.mark_success();
        shared.metrics.delivered.increment();
    } else {
        pair.mark_failure();
        shared.metrics.failed.increment();
    }
    shared.metrics.delivery_latency.record(pair.age());

    if let Some(mirror) = &shared.mirror {
        mirror_pair(shared, mirror, pair).await;
    }
}

async fn write_side(
    shared: &Shared,
    pair: &MatchPair,
    to_first: bool,
    handle: Option<SharedHandle>,
) -> bool {
    let side = if to_first { pair.first() } else { pair.second() };

    let Some(handle) = handle else {
        shared.metrics.missing_handles.increment();
        warn!(
            match_id = %pair.match_id(),
            user = %side.username,
            channel = %side.channel_id,
            "Connection not found for match notification"
        );
        return false;
    };

    let payload = match serde_json::to_vec(&pair.notice(to_first)) {
        Ok(payload) => payload,
        Err(e) => {
            error!(match_id = %pair.match_id(), error = %e, "Failed to encode match notice");
            return false;
        }
    };

    match handle.write(payload).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                match_id = %pair.match_id(),
                user = %side.username,
                channel = %side.channel_id,
                score = side.score,
                error = %e,
                "Failed to notify player"
            );
            false
        }
    }
}

async fn mirror_pair(shared: &Shared, mirror: &PairMirror, pair: &MatchPair) {
    let outcome = match pair.state() {
        PairState::Success => "success",
        _ => "failure",
    };
    let record = PairRecord {
        match_id: pair.match_id(),
        matched_at: pair.matched_at(),
        outcome,
        first: pair.first(),
        second: pair.second(),
    };

    let message = match Message::json(&record) {
        Ok(m) => m
            .with_key(pair.match_id().to_string())
            .with_header("outcome", outcome)
            .with_header("source", "matchd"),
        Err(e) => {
            error!(match_id = %pair.match_id(), error = %e, "Failed to encode match record");
            return;
        }
    };

    match mirror.client.send(&mirror.topic, message).await {
        Ok(()) => shared.metrics.mirrored.increment(),
        Err(e) => warn!(
            match_id = %pair.match_id(),
            topic = %mirror.topic,
            error = %e,
            "Failed to mirror match to message bus"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::request::{ChannelId, PlayerRequest};
    use crate::transport::{ChannelHandle, TransportHandle};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use messaging::InMemoryClient;
    use tokio::sync::mpsc;

    fn pair(a: &str, b: &str) -> MatchPair {
        let first = PlayerRequest::new(format!("user-{a}"), 50, 5, a);
        let second = PlayerRequest::new(format!("user-{b}"), 52, 5, b);
        MatchPair::new(&first, &second)
    }

    fn connect(registry: &ConnectionRegistry, id: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (handle, rx) = ChannelHandle::new(id);
        registry.register(Arc::new(handle));
        rx
    }

    async fn wait_processed(pipeline: &NotificationPipeline, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while pipeline.metrics().processed() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pairs were not processed in time");
    }

    struct PanickingHandle(ChannelId);

    #[async_trait]
    impl TransportHandle for PanickingHandle {
        fn id(&self) -> &ChannelId {
            &self.0
        }

        async fn write(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
            panic!("socket exploded");
        }
    }

    struct FailingHandle(ChannelId);

    #[async_trait]
    impl TransportHandle for FailingHandle {
        fn id(&self) -> &ChannelId {
            &self.0
        }

        async fn write(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
            Err(TransportError::WriteFailed("broken pipe".into()))
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_sizes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let bad_ring = PipelineConfig {
            ring_size: 1000,
            ..Default::default()
        };
        assert_matches!(
            NotificationPipeline::start(bad_ring, registry.clone(), None).err(),
            Some(PipelineError::InvalidRingSize(1000))
        );

        let no_consumers = PipelineConfig {
            consumers: 0,
            ..Default::default()
        };
        assert_matches!(
            NotificationPipeline::start(no_consumers, registry, None).err(),
            Some(PipelineError::NoConsumers)
        );
    }

    #[tokio::test]
    async fn test_delivers_to_both_sides() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx_a = connect(&registry, "a");
        let mut rx_b = connect(&registry, "b");
        let pipeline =
            NotificationPipeline::start(PipelineConfig::default(), registry, None).unwrap();

        pipeline.publish(pair("a", "b")).unwrap();
        wait_processed(&pipeline, 1).await;

        let to_a: serde_json::Value = serde_json::from_slice(&rx_a.recv().await.unwrap()).unwrap();
        let to_b: serde_json::Value = serde_json::from_slice(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(to_a["you"]["username"], "user-a");
        assert_eq!(to_a["opponent"]["username"], "user-b");
        assert_eq!(to_b["you"]["username"], "user-b");
        assert_eq!(to_a["matchId"], to_b["matchId"]);

        let snap = pipeline.snapshot();
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.failed, 0);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_missing_handle_fails_pair() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx_a = connect(&registry, "a");
        let pipeline =
            NotificationPipeline::start(PipelineConfig::default(), registry, None).unwrap();

        pipeline.publish(pair("a", "gone")).unwrap();
        wait_processed(&pipeline, 1).await;

        // The connected side is still told
        assert!(rx_a.recv().await.is_some());
        let snap = pipeline.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.missing_handles, 1);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_write_error_fails_pair() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _rx_a = connect(&registry, "a");
        registry.register(Arc::new(FailingHandle(ChannelId::from("b"))));
        let pipeline =
            NotificationPipeline::start(PipelineConfig::default(), registry, None).unwrap();

        pipeline.publish(pair("a", "b")).unwrap();
        wait_processed(&pipeline, 1).await;

        assert_eq!(pipeline.snapshot().failed, 1);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.register(Arc::new(PanickingHandle(ChannelId::from("boom"))));
        let _rx_x = connect(&registry, "x");
        let mut rx_c = connect(&registry, "c");
        let mut rx_d = connect(&registry, "d");
        let config = PipelineConfig {
            consumers: 1,
            ..Default::default()
        };
        let pipeline = NotificationPipeline::start(config, registry, None).unwrap();

        pipeline.publish(pair("boom", "x")).unwrap();
        pipeline.publish(pair("c", "d")).unwrap();
        wait_processed(&pipeline, 2).await;

        assert!(rx_c.recv().await.is_some());
        assert!(rx_d.recv().await.is_some());
        let snap = pipeline.snapshot();
        assert_eq!(snap.panics, 1);
        assert_eq!(snap.delivered, 1);
        assert_eq!(snap.failed, 1);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx_a = connect(&registry, "a");
        let _rx_b = connect(&registry, "b");
        let pipeline = NotificationPipeline::start(
            PipelineConfig {
                consumers: 2,
                ..Default::default()
            },
            registry,
            None,
        )
        .unwrap();

        for _ in 0..20 {
            pipeline.publish(pair("a", "b")).unwrap();
        }
        let left = pipeline.shutdown(Duration::from_secs(5)).await;

        assert_eq!(left, 0);
        assert_eq!(pipeline.metrics().delivered.get(), 20);
        let mut received = 0;
        while rx_a.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 20);

        assert!(!pipeline.is_accepting());
        assert_matches!(
            pipeline.publish(pair("a", "b")),
            Err(PipelineError::ShutDown(_))
        );
    }

    #[tokio::test]
    async fn test_mirror_publishes_record() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _rx_a = connect(&registry, "a");
        let _rx_b = connect(&registry, "b");

        let bus = Arc::new(InMemoryClient::new());
        let (tx, mut records) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe(
                "match.pairs",
                Arc::new(move |msg: Message| {
                    let _ = tx.send(msg);
                }),
            )
            .await
            .unwrap();

        let mirror = PairMirror {
            client: bus.clone(),
            topic: "match.pairs".into(),
        };
        let pipeline =
            NotificationPipeline::start(PipelineConfig::default(), registry, Some(mirror)).unwrap();

        let p = pair("a", "b");
        let match_id = p.match_id().to_string();
        pipeline.publish(p).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), records.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.key.as_deref(), Some(match_id.as_str()));
        assert_eq!(msg.header("outcome"), Some("success"));
        let body: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(body["first"]["username"], "user-a");
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = config::NotificationConfig::default();
        settings.report_interval_ms = 0;
        let cfg = PipelineConfig::from(&settings);
        assert_eq!(cfg.ring_size, 1024);
        assert!(cfg.report_interval.is_none());
    }
}
