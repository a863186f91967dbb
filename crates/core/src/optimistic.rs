//! Optimistic concurrency controller for product writes.
//!
//! Every write is conditional on the version the client last saw. The server
//! either accepts and returns the new version, or rejects with its current
//! state, and the caller gets a three-way verdict instead of a blind
//! last-write-wins overwrite. When the network is down or the breaker is
//! open, writes are not lost: they land in the durable mutation queue and
//! replay later in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tillsync_common::{CircuitBreaker, RetryPolicy};
use tillsync_domain::{
    constants::DEFAULT_QUEUE_SOFT_CAPACITY, PendingMutation, Product, ProductPatch, Result,
    TillsyncError,
};

use crate::events::{EventBus, SyncEvent};
use crate::ports::{InventoryBackend, MutationQueue, ProductRepository, UpdateResult};
use crate::{failure_kind, flatten_retry};

/// Outcome of a user-initiated product update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Server accepted the write; local cache already refreshed.
    Accepted(Product),
    /// Someone else wrote first. Both sides are surfaced so the operator can
    /// choose; the tentative local copy is deliberately not rolled back.
    Conflict { attempted: ProductPatch, current: Product },
    /// The product no longer exists on the server.
    Missing,
    /// The backend was unreachable; the write is queued for replay.
    Queued(PendingMutation),
}

/// Outcome of replaying one queued mutation during a sync pass.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    Applied(Product),
    Conflict { current: Product },
    Missing,
}

/// Coordinates conditional writes across the backend, the local cache, and
/// the offline queue.
pub struct OptimisticController<B, Q, R> {
    backend: Arc<B>,
    queue: Arc<Q>,
    repo: Arc<R>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    events: EventBus,
    soft_capacity: usize,
    saturation_warned: AtomicBool,
}

impl<B, Q, R> OptimisticController<B, Q, R>
where
    B: InventoryBackend,
    Q: MutationQueue,
    R: ProductRepository,
{
    pub fn new(
        backend: Arc<B>,
        queue: Arc<Q>,
        repo: Arc<R>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            queue,
            repo,
            breaker,
            retry,
            events,
            soft_capacity: DEFAULT_QUEUE_SOFT_CAPACITY,
            saturation_warned: AtomicBool::new(false),
        }
    }

    pub fn with_soft_capacity(mut self, soft_capacity: usize) -> Self {
        self.soft_capacity = soft_capacity.max(1);
        self
    }

    /// Submit a product update.
    ///
    /// A write against an entity with queued backlog goes straight to the
    /// queue behind it; replaying out of order would reorder the operator's
    /// own edits.
    #[instrument(skip(self, patch), fields(product_id = %product_id))]
    pub async fn update(&self, product_id: &str, patch: ProductPatch) -> Result<UpdateOutcome> {
        let local = self.repo.get(product_id).await?.ok_or_else(|| {
            TillsyncError::NotFound(format!("product {product_id} not in local cache"))
        })?;

        // Tentative state lands in the cache before the network round-trip,
        // still carrying the old version. The server copy replaces it on
        // acceptance; on conflict it stays for the operator to resolve.
        self.repo.upsert(&local.with_patch(&patch)).await?;

        if self.queue.peek_entity(product_id).await?.is_some() {
            debug!("entity has queued backlog; appending instead of writing directly");
            let mutation = self.queue_write(product_id, local.version, patch).await?;
            return Ok(UpdateOutcome::Queued(mutation));
        }

        let idempotency_key = Uuid::new_v4().to_string();
        let attempt = self
            .retry
            .run(&self.breaker, failure_kind, || {
                self.backend.update_product(product_id, local.version, &patch, &idempotency_key)
            })
            .await;

        match attempt {
            Ok(UpdateResult::Accepted(product)) => {
                self.repo.upsert(&product).await?;
                info!(version = product.version, "update accepted");
                Ok(UpdateOutcome::Accepted(product))
            }
            Ok(UpdateResult::StaleVersion(current)) => {
                self.events.publish(SyncEvent::ConflictDetected {
                    entity_id: product_id.to_string(),
                    mutation_id: None,
                });
                warn!(
                    base_version = local.version,
                    server_version = current.version,
                    "version conflict on direct update"
                );
                Ok(UpdateOutcome::Conflict { attempted: patch, current })
            }
            Ok(UpdateResult::NotFound) => self.classify_missing(product_id, patch).await,
            Err(retry_err) => {
                let err = flatten_retry(retry_err);
                if err.is_transient() || matches!(err, TillsyncError::CircuitOpen) {
                    info!(error = %err, "backend unreachable; queueing write for replay");
                    let mutation = self.queue_write(product_id, local.version, patch).await?;
                    Ok(UpdateOutcome::Queued(mutation))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Replay one queued mutation against the server, using the idempotency
    /// key minted when it was first enqueued.
    #[instrument(skip(self, mutation), fields(mutation_id = %mutation.id, entity_id = %mutation.entity_id))]
    pub async fn replay(&self, mutation: &PendingMutation) -> Result<ReplayOutcome> {
        let attempt = self
            .retry
            .run(&self.breaker, failure_kind, || {
                self.backend.update_product(
                    &mutation.entity_id,
                    mutation.base_version,
                    &mutation.patch,
                    &mutation.idempotency_key,
                )
            })
            .await;

        match attempt.map_err(flatten_retry)? {
            UpdateResult::Accepted(product) => {
                self.repo.upsert(&product).await?;
                Ok(ReplayOutcome::Applied(product))
            }
            UpdateResult::StaleVersion(current) => Ok(ReplayOutcome::Conflict { current }),
            UpdateResult::NotFound => {
                match self.classify_missing(&mutation.entity_id, mutation.patch.clone()).await? {
                    UpdateOutcome::Conflict { current, .. } => {
                        Ok(ReplayOutcome::Conflict { current })
                    }
                    _ => Ok(ReplayOutcome::Missing),
                }
            }
        }
    }

    /// Resolve a conflicted mutation by re-basing it onto the server's
    /// current version. The local cache adopts the server state; the patch
    /// replays on top of it next pass.
    pub async fn resolve_rebase(&self, mutation_id: &str, current: &Product) -> Result<()> {
        self.repo.upsert(current).await?;
        self.queue.rebase(mutation_id, current.version).await?;
        info!(mutation_id, version = current.version, "conflict resolved by rebase");
        Ok(())
    }

    /// Resolve a conflicted mutation by dropping it. The server's version
    /// becomes the local truth.
    pub async fn resolve_discard(&self, mutation_id: &str, current: &Product) -> Result<()> {
        self.repo.upsert(current).await?;
        self.queue.discard(mutation_id).await?;
        info!(mutation_id, "conflict resolved by discard");
        Ok(())
    }

    /// A 404 on a conditional write can mean the product was deleted, or
    /// that our cached identity is stale. One fresh fetch decides; Missing
    /// is only concluded from a confirmed not-found, never from a fetch
    /// that itself failed.
    async fn classify_missing(
        &self,
        product_id: &str,
        attempted: ProductPatch,
    ) -> Result<UpdateOutcome> {
        match self.backend.fetch_product(product_id).await {
            Ok(Some(current)) => {
                self.events.publish(SyncEvent::ConflictDetected {
                    entity_id: product_id.to_string(),
                    mutation_id: None,
                });
                Ok(UpdateOutcome::Conflict { attempted, current })
            }
            Ok(None) => Ok(UpdateOutcome::Missing),
            Err(err) => {
                debug!(error = %err, "post-404 fetch failed; classification deferred");
                Err(err)
            }
        }
    }

    async fn queue_write(
        &self,
        entity_id: &str,
        base_version: i64,
        patch: ProductPatch,
    ) -> Result<PendingMutation> {
        let mutation = PendingMutation::new(entity_id, base_version, patch);
        self.queue.enqueue(&mutation).await?;
        self.check_saturation().await?;
        Ok(mutation)
    }

    /// Warn once per session when the queue crosses its soft capacity. The
    /// enqueue itself always succeeds; the warning exists so a store that
    /// has been offline all day notices before closing time.
    async fn check_saturation(&self) -> Result<()> {
        let pending = self.queue.pending_count().await?;
        if pending >= self.soft_capacity && !self.saturation_warned.swap(true, Ordering::SeqCst) {
            warn!(pending, soft_capacity = self.soft_capacity, "offline queue saturated");
            self.events.publish(SyncEvent::QueueSaturated { pending });
        }
        Ok(())
    }
}
