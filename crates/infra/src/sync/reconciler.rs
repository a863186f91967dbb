//! Background reconciliation worker.
//!
//! Drains the offline mutation queue against the backend and pulls fresh
//! authoritative state for entities it touched. Runs on a fixed interval and
//! on explicit triggers; join handles are tracked, cancellation is explicit,
//! and a pass already in progress causes a new tick to be skipped rather
//! than queued.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tillsync_common::CircuitBreaker;
use tillsync_core::{
    EventBus, InventoryBackend, MutationQueue, OptimisticController, ProductRepository,
    ReplayOutcome, SyncEvent,
};
use tillsync_domain::constants::{
    DEFAULT_DRAIN_FAN_OUT, DEFAULT_MUTATION_MAX_ATTEMPTS, DEFAULT_RECONCILE_INTERVAL,
};
use tillsync_domain::{MutationStatus, Result, SyncSummary, TillsyncError};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between scheduled passes.
    pub interval: Duration,
    /// Entities drained concurrently within one pass.
    pub drain_fan_out: usize,
    /// Timeout for a whole pass.
    pub pass_timeout: Duration,
    /// Join timeout when stopping.
    pub join_timeout: Duration,
    /// Transient attempts per mutation before it is marked failed.
    pub mutation_max_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            drain_fan_out: DEFAULT_DRAIN_FAN_OUT,
            pass_timeout: Duration::from_secs(120),
            join_timeout: Duration::from_secs(5),
            mutation_max_attempts: DEFAULT_MUTATION_MAX_ATTEMPTS,
        }
    }
}

/// What one entity's drain contributed to the pass.
#[derive(Debug, Default)]
struct EntityDrain {
    applied: u32,
    conflicts: u32,
    failures: u32,
    /// Set when a transient failure means the backend is unreachable and
    /// the rest of the cycle should stop.
    abort_cycle: bool,
}

struct Inner<B, Q, R> {
    controller: Arc<OptimisticController<B, Q, R>>,
    backend: Arc<B>,
    queue: Arc<Q>,
    repo: Arc<R>,
    breaker: CircuitBreaker,
    events: EventBus,
    config: ReconcilerConfig,
    trigger: Notify,
    pass_active: AtomicBool,
}

/// Reconciliation worker with explicit lifecycle management.
pub struct Reconciler<B, Q, R> {
    inner: Arc<Inner<B, Q, R>>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl<B, Q, R> Reconciler<B, Q, R>
where
    B: InventoryBackend + 'static,
    Q: MutationQueue + 'static,
    R: ProductRepository + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: Arc<OptimisticController<B, Q, R>>,
        backend: Arc<B>,
        queue: Arc<Q>,
        repo: Arc<R>,
        breaker: CircuitBreaker,
        events: EventBus,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller,
                backend,
                queue,
                repo,
                breaker,
                events,
                config,
                trigger: Notify::new(),
                pass_active: AtomicBool::new(false),
            }),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Start the worker, spawning the background loop.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(TillsyncError::Internal("reconciler already running".into()));
        }

        self.cancellation = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            inner.run_loop(cancel).await;
        });
        self.task_handle = Some(handle);
        info!("reconciler started");
        Ok(())
    }

    /// Stop the worker and wait for the loop to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(TillsyncError::Internal("reconciler not running".into()));
        }

        self.cancellation.cancel();
        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.inner.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "reconciler task panicked");
                    return Err(TillsyncError::Internal("reconciler task panicked".into()));
                }
                Err(_) => {
                    warn!("reconciler task did not stop within join timeout");
                    return Err(TillsyncError::Internal("reconciler join timeout".into()));
                }
            }
        }
        info!("reconciler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Request an immediate pass (network regained, user pressed retry).
    /// No-op when a pass is already running.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    /// Run one pass synchronously. Used by the loop, triggers, and tests.
    pub async fn run_pass(&self) -> Result<()> {
        self.inner.run_pass().await
    }
}

impl<B, Q, R> Drop for Reconciler<B, Q, R> {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            warn!("reconciler dropped while running; call stop() first");
            self.cancellation.cancel();
        }
    }
}

impl<B, Q, R> Inner<B, Q, R>
where
    B: InventoryBackend,
    Q: MutationQueue,
    R: ProductRepository,
{
    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconciler loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.trigger.notified() => {
                    debug!("reconciliation pass triggered explicitly");
                }
            }

            match tokio::time::timeout(self.config.pass_timeout, self.run_pass()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "reconciliation pass failed"),
                Err(_) => warn!(
                    timeout_secs = self.config.pass_timeout.as_secs(),
                    "reconciliation pass timed out"
                ),
            }
        }
    }

    async fn run_pass(&self) -> Result<()> {
        if self.pass_active.swap(true, Ordering::SeqCst) {
            debug!("pass already in progress; skipping tick");
            return Ok(());
        }
        let result = self.pass_inner().await;
        self.pass_active.store(false, Ordering::SeqCst);
        result
    }

    async fn pass_inner(&self) -> Result<()> {
        use tillsync_common::CircuitState;

        if self.breaker.state() == CircuitState::Open {
            debug!("circuit open; skipping reconciliation pass");
            return Ok(());
        }

        self.warm_backend().await;

        let entities = self.queue.pending_entities().await?;
        let mut summary = SyncSummary::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut aborted = false;

        for chunk in entities.chunks(self.config.drain_fan_out.max(1)) {
            let drains = join_all(chunk.iter().map(|entity_id| self.drain_entity(entity_id))).await;
            for (entity_id, drain) in chunk.iter().zip(drains) {
                let drain = drain?;
                summary.applied += drain.applied;
                summary.conflicts += drain.conflicts;
                summary.failures += drain.failures;
                if drain.applied > 0 {
                    touched.insert(entity_id.clone());
                }
                aborted |= drain.abort_cycle;
            }
            if aborted {
                info!("backend unreachable; aborting drain cycle");
                break;
            }
        }

        if !aborted {
            self.refresh_touched(&touched).await;
        }

        if !summary.is_empty() {
            info!(
                applied = summary.applied,
                conflicts = summary.conflicts,
                failures = summary.failures,
                "reconciliation pass completed"
            );
        }
        self.events.publish(SyncEvent::PassCompleted(summary));
        Ok(())
    }

    /// Best-effort health probe. In half-open state this is the probe that
    /// decides whether the breaker closes; its failure is only recorded,
    /// never surfaced.
    async fn warm_backend(&self) {
        if !self.breaker.allow_request() {
            return;
        }
        match self.backend.health_check().await {
            Ok(()) => self.breaker.record_success(),
            Err(err) if err.is_transient() => {
                debug!(error = %err, "health probe failed");
                self.breaker.record_failure();
            }
            Err(err) => {
                // A non-transient rejection still came from the server, so
                // it settles a half-open probe and releases the ticket.
                debug!(error = %err, "health probe rejected");
                self.breaker.record_success();
            }
        }
    }

    /// Replay one entity's queue strictly oldest-first. A conflicted head
    /// halts the entity; a transient failure aborts the whole cycle.
    async fn drain_entity(&self, entity_id: &str) -> Result<EntityDrain> {
        let mut drain = EntityDrain::default();

        loop {
            let Some(head) = self.queue.peek_entity(entity_id).await? else {
                return Ok(drain);
            };
            if head.status == MutationStatus::Conflicted {
                debug!(mutation_id = %head.id, "entity halted behind unresolved conflict");
                return Ok(drain);
            }

            self.queue.mark_in_flight(&head.id).await?;

            match self.controller.replay(&head).await {
                Ok(ReplayOutcome::Applied(_)) => {
                    self.queue.acknowledge(&head.id).await?;
                    drain.applied += 1;
                }
                Ok(ReplayOutcome::Conflict { current }) => {
                    self.queue
                        .mark_conflicted(
                            &head.id,
                            &format!("stale version: server at {}", current.version),
                        )
                        .await?;
                    self.events.publish(SyncEvent::ConflictDetected {
                        entity_id: entity_id.to_string(),
                        mutation_id: Some(head.id.clone()),
                    });
                    drain.conflicts += 1;
                    return Ok(drain);
                }
                Ok(ReplayOutcome::Missing) => {
                    self.queue.mark_failed(&head.id, "entity missing on server").await?;
                    self.events.publish(SyncEvent::MutationFailed {
                        mutation_id: head.id.clone(),
                        error: "entity missing on server".into(),
                    });
                    drain.failures += 1;
                }
                Err(err)
                    if err.is_transient() || matches!(err, TillsyncError::CircuitOpen) =>
                {
                    if head.attempts + 1 >= self.config.mutation_max_attempts {
                        warn!(mutation_id = %head.id, error = %err,
                            "mutation exhausted its transient attempts");
                        self.queue.mark_failed(&head.id, &err.to_string()).await?;
                        self.events.publish(SyncEvent::MutationFailed {
                            mutation_id: head.id.clone(),
                            error: err.to_string(),
                        });
                        drain.failures += 1;
                    } else {
                        self.queue.requeue(&head.id, &err.to_string()).await?;
                    }
                    drain.abort_cycle = true;
                    return Ok(drain);
                }
                Err(err) => {
                    self.queue.mark_failed(&head.id, &err.to_string()).await?;
                    self.events.publish(SyncEvent::MutationFailed {
                        mutation_id: head.id.clone(),
                        error: err.to_string(),
                    });
                    drain.failures += 1;
                }
            }
        }
    }

    /// Pull fresh server state for entities whose mutations were applied.
    /// Best effort: a failed fetch leaves the cache one pass behind.
    async fn refresh_touched(&self, touched: &BTreeSet<String>) {
        let ids: Vec<&String> = touched.iter().collect();
        for chunk in ids.chunks(self.config.drain_fan_out.max(1)) {
            let fetches =
                join_all(chunk.iter().map(|id| self.backend.fetch_product(id.as_str()))).await;
            for (id, fetched) in chunk.iter().zip(fetches) {
                match fetched {
                    Ok(Some(product)) => {
                        if let Err(err) = self.repo.upsert(&product).await {
                            warn!(product_id = %id, error = %err, "cache refresh write failed");
                        }
                    }
                    Ok(None) => debug!(product_id = %id, "product vanished during refresh"),
                    Err(err) => debug!(product_id = %id, error = %err, "cache refresh skipped"),
                }
            }
        }
    }
}
