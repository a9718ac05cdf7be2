//! Matching engine
//!
//! Owns the bucket store and drives the three periodic activities:
//!
//! - **Scan cycle**: every bucket is scanned in parallel. A scanner that wins
//!   the bucket flag drains it, runs the batch matcher, publishes the pairs and
//!   puts still-processing requests back.
//! - **Global sweep**: when traffic in the current window is low, the sweep
//!   claims every free bucket, matches all drained requests as one batch and
//!   returns the leftovers to their buckets. This is what pairs players whose
//!   scores straddle a bucket boundary.
//! - **Counter reset**: clears the per-window submission counter.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bucket::{Bucket, BucketGuard, BucketStore, RequestRef};
use crate::error::{MatchingError, Result};
use crate::matcher;
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot, Gauge};
use crate::notifier::NotificationPipeline;
use crate::pair::MatchPair;
use crate::request::{ChannelId, PlayerRequest};

/// Timing and capacity settings, resolved from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bucket_size: i32,
    pub max_score: i32,
    pub bucket_capacity: usize,
    pub initial_delay: Duration,
    pub scan_interval: Duration,
    pub sweep_interval: Duration,
    pub counter_reset_interval: Duration,
    pub low_traffic_threshold: u64,
    pub max_pending_events: u64,
}

impl From<&config::MatchingConfig> for EngineSettings {
    fn from(cfg: &config::MatchingConfig) -> Self {
        Self {
            bucket_size: cfg.bucket_size,
            max_score: cfg.max_score,
            bucket_capacity: cfg.expected_load_per_bucket,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            scan_interval: Duration::from_millis(cfg.scan_interval_ms),
            sweep_interval: Duration::from_millis(cfg.sweep_interval_ms),
            counter_reset_interval: Duration::from_millis(cfg.counter_reset_interval_ms),
            low_traffic_threshold: cfg.low_traffic_threshold,
            max_pending_events: cfg.max_pending_events,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&config::MatchingConfig::default())
    }
}

struct EngineCore {
    store: BucketStore,
    pipeline: Arc<NotificationPipeline>,
    settings: EngineSettings,
    pending: Gauge,
    window_submissions: AtomicU64,
    sweeping: AtomicBool,
    metrics: EngineMetrics,
}

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Bucketed matchmaker plus the background tasks that drive it
///
/// Cheap to share behind an `Arc`. Submissions never block; all matching
/// happens in [`run_scan_cycle`](Self::run_scan_cycle) and
/// [`run_global_sweep`](Self::run_global_sweep), either called directly or
/// from the tasks spawned by [`start`](Self::start).
pub struct MatchingEngine {
    core: Arc<EngineCore>,
    running: Mutex<Option<Running>>,
}

impl MatchingEngine {
    /// Build an engine with empty buckets. Fails on a zero period or a bad
    /// bucket layout.
    pub fn new(settings: EngineSettings, pipeline: Arc<NotificationPipeline>) -> Result<Self> {
        for (name, period) in [
            ("scan_interval", settings.scan_interval),
            ("sweep_interval", settings.sweep_interval),
            ("counter_reset_interval", settings.counter_reset_interval),
        ] {
            if period.is_zero() {
                return Err(MatchingError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        let store = BucketStore::new(
            settings.bucket_size,
            settings.max_score,
            settings.bucket_capacity,
        )?;

        info!(
            buckets = store.num_buckets(),
            bucket_size = settings.bucket_size,
            capacity = settings.bucket_capacity,
            "Matching engine created"
        );

        Ok(Self {
            core: Arc::new(EngineCore {
                store,
                pipeline,
                settings,
                pending: Gauge::new(),
                window_submissions: AtomicU64::new(0),
                sweeping: AtomicBool::new(false),
                metrics: EngineMetrics::new(),
            }),
            running: Mutex::new(None),
        })
    }

    /// [`new`](Self::new) with settings read from the `matching` section
    pub fn from_config(
        config: &config::MatchingConfig,
        pipeline: Arc<NotificationPipeline>,
    ) -> Result<Self> {
        Self::new(EngineSettings::from(config), pipeline)
    }

    /// Queue a new request. Returns false when it was not accepted.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = MatchingEngine::from_config(&config.matching, pipeline)?;
    /// assert!(engine.submit("ann", 42, 5, "ws-1"));
    /// assert!(engine.submit("bob", 45, 5, "ws-2"));
    /// assert_eq!(engine.run_scan_cycle(), 1);
    /// ```
    pub fn submit(
        &self,
        username: impl Into<String>,
        score: i32,
        match_range: i32,
        channel_id: impl Into<ChannelId>,
    ) -> bool {
        self.submit_request(Arc::new(PlayerRequest::new(
            username,
            score,
            match_range,
            channel_id,
        )))
    }

    /// Queue an already-built request.
    ///
    /// Rejects requests that were submitted before, and applies backpressure
    /// when the pending count is at its limit or the target bucket is full.
    pub fn submit_request(&self, req: RequestRef) -> bool {
        self.core.submit(req)
    }

    /// Run one scan over every bucket, returning the pairs produced
    pub fn run_scan_cycle(&self) -> usize {
        self.core.scan_cycle()
    }

    /// Run the cross-bucket sweep if traffic allows it.
    ///
    /// Returns `None` when the sweep was skipped.
    pub fn run_global_sweep(&self) -> Option<usize> {
        self.core.global_sweep()
    }

    /// Start a new submission window
    pub fn reset_counter(&self) {
        self.core.window_submissions.store(0, Ordering::Release);
    }

    /// Submissions accepted in the current window
    pub fn window_submissions(&self) -> u64 {
        self.core.window_submissions.load(Ordering::Acquire)
    }

    /// Accepted requests waiting for a partner
    pub fn pending_events(&self) -> u64 {
        self.core.pending.get()
    }

    pub fn num_buckets(&self) -> usize {
        self.core.store.num_buckets()
    }

    /// Index of the bucket that owns `score`
    pub fn bucket_index(&self, score: i32) -> usize {
        self.core.store.bucket_index(score)
    }

    /// Requests waiting in bucket `index`; zero for an out-of-range index
    pub fn bucket_len(&self, index: usize) -> usize {
        if index < self.core.store.num_buckets() {
            self.core.store.bucket(index).len()
        } else {
            0
        }
    }

    /// Requests waiting across all buckets
    pub fn queued(&self) -> usize {
        self.core.store.len()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.core.settings
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.core.metrics
    }

    /// Point-in-time copy of the engine counters
    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        self.core.metrics.snapshot(self.pending_events())
    }

    pub fn pipeline(&self) -> &Arc<NotificationPipeline> {
        &self.core.pipeline
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop)
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the scan, sweep and counter-reset tasks on the current runtime.
    ///
    /// Scan and sweep run on the blocking pool since they fan out over rayon.
    /// Returns [`MatchingError::AlreadyRunning`] on a second call.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(MatchingError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let settings = &self.core.settings;

        let scan_core = Arc::clone(&self.core);
        let scan = spawn_periodic(
            "scan",
            token.clone(),
            settings.initial_delay,
            settings.scan_interval,
            move || {
                let core = Arc::clone(&scan_core);
                async move {
                    match tokio::task::spawn_blocking(move || core.scan_cycle()).await {
                        Ok(pairs) if pairs > 0 => debug!(pairs, "Scan cycle complete"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scan cycle task failed"),
                    }
                }
            },
        );

        let sweep_core = Arc::clone(&self.core);
        let sweep = spawn_periodic(
            "sweep",
            token.clone(),
            settings.initial_delay,
            settings.sweep_interval,
            move || {
                let core = Arc::clone(&sweep_core);
                async move {
                    match tokio::task::spawn_blocking(move || core.global_sweep()).await {
                        Ok(Some(pairs)) => debug!(pairs, "Global sweep complete"),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Global sweep task failed"),
                    }
                }
            },
        );

        let reset_core = Arc::clone(&self.core);
        let reset = spawn_periodic(
            "counter-reset",
            token.clone(),
            Duration::ZERO,
            settings.counter_reset_interval,
            move || {
                reset_core.window_submissions.store(0, Ordering::Release);
                async {}
            },
        );

        *running = Some(Running {
            token,
            tasks: vec![scan, sweep, reset],
        });

        info!(
            scan_ms = settings.scan_interval.as_millis() as u64,
            sweep_ms = settings.sweep_interval.as_millis() as u64,
            "Matching engine started"
        );
        Ok(())
    }

    /// Cancel the periodic tasks and wait for any in-flight cycle
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.token.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }

        let snapshot = self.snapshot();
        info!(
            submitted = snapshot.submitted,
            pairs = snapshot.pairs_emitted,
            queued = self.queued(),
            "Matching engine stopped"
        );
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    token: CancellationToken,
    initial_delay: Duration,
    period: Duration,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, "Engine task running");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tick().await;
        }
        debug!(task = name, "Engine task stopped");
    })
}

impl EngineCore {
    fn submit(&self, req: RequestRef) -> bool {
        if self.pending.get() >= self.settings.max_pending_events {
            self.metrics.rejected.increment();
            debug!(user = req.username(), pending = self.pending.get(), "Pending limit reached");
            return false;
        }

        if !req.try_acquire() {
            warn!(user = req.username(), state = ?req.state(), "Request already submitted");
            return false;
        }

        match self.store.push(req) {
            Ok(()) => {
                self.pending.add(1);
                self.window_submissions.fetch_add(1, Ordering::AcqRel);
                self.metrics.submitted.increment();
                true
            }
            Err(req) => {
                self.metrics.rejected.increment();
                debug!(user = req.username(), score = req.score(), "Bucket full, request rejected");
                false
            }
        }
    }

    fn scan_cycle(&self) -> usize {
        let started = Instant::now();
        let pairs: usize = (0..self.store.num_buckets())
            .into_par_iter()
            .map(|i| self.scan_bucket(self.store.bucket(i)))
            .sum();

        self.metrics.scan_cycles.increment();
        self.metrics.scan_latency.record(started.elapsed());
        pairs
    }

    fn scan_bucket(&self, bucket: &Bucket) -> usize {
        if bucket.is_empty() {
            return 0;
        }
        let Some(guard) = bucket.try_acquire() else {
            return 0;
        };

        let mut batch = guard.drain();
        if batch.is_empty() {
            return 0;
        }
        self.pending.sub(batch.len() as u64);

        let mut pairs = Vec::new();
        let produced = matcher::match_batch(&batch, batch.len(), &mut pairs);
        self.emit(pairs);
        self.settle(&batch);
        batch.clear();
        produced
    }

    fn global_sweep(&self) -> Option<usize> {
        let submissions = self.window_submissions.load(Ordering::Acquire);
        if submissions >= self.settings.low_traffic_threshold {
            debug!(submissions, "Traffic too high, skipping global sweep");
            return None;
        }
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let guards: Vec<BucketGuard<'_>> =
            self.store.iter().filter_map(Bucket::try_acquire).collect();

        let mut batch = Vec::new();
        for guard in &guards {
            guard.drain_into(&mut batch);
        }

        let mut produced = 0;
        if !batch.is_empty() {
            self.pending.sub(batch.len() as u64);

            let mut pairs = Vec::new();
            produced = matcher::match_batch(&batch, batch.len(), &mut pairs);
            self.emit(pairs);
            self.settle(&batch);
        }

        self.metrics.sweeps.increment();
        self.metrics.sweep_pairs.add(produced as u64);
        debug!(
            claimed = guards.len(),
            drained = batch.len(),
            pairs = produced,
            "Global sweep finished"
        );

        drop(guards);
        self.sweeping.store(false, Ordering::Release);
        Some(produced)
    }

    fn emit(&self, pairs: Vec<MatchPair>) {
        if pairs.is_empty() {
            return;
        }
        self.metrics.pairs_emitted.add(pairs.len() as u64);
        self.pipeline.publish_all(pairs);
    }

    /// Retire matched requests and requeue the ones still waiting.
    ///
    /// Every drained request still holds a slot in its bucket, so the requeue
    /// cannot be crowded out by new submissions.
    fn settle(&self, batch: &[RequestRef]) {
        for req in batch {
            let bucket = self.store.bucket_for(req.score());
            if req.is_processing() {
                self.requeue(bucket, Arc::clone(req));
            } else {
                if req.is_matched() {
                    req.finalize();
                }
                bucket.release();
            }
        }
    }

    fn requeue(&self, bucket: &Bucket, req: RequestRef) {
        match bucket.requeue(req) {
            Ok(()) => {
                self.pending.add(1);
                self.metrics.requeued.increment();
            }
            Err(req) => {
                bucket.release();
                self.metrics.dropped.increment();
                error!(
                    user = req.username(),
                    score = req.score(),
                    channel = %req.channel_id(),
                    bucket = bucket.index(),
                    "No room for a reserved request on requeue, request dropped"
                );
            }
        }
    }
}
