//! Ports implemented by the storage and network adapters.
//!
//! The queue and repository are backed by SQLite in production; the backend
//! by an HTTP client. Tests substitute in-memory fakes.

use async_trait::async_trait;

use tillsync_domain::{
    DeductionRequest, PendingMutation, Product, ProductPatch, Result, SaleDraft, SaleReceipt,
};

/// Server verdict on a versioned product write.
#[derive(Debug, Clone)]
pub enum UpdateResult {
    /// Write accepted; the returned product carries the new version.
    Accepted(Product),
    /// Base version was stale; the server's current product is returned.
    StaleVersion(Product),
    /// No product with that id exists on the server.
    NotFound,
}

/// Durable store of mutations awaiting replay, ordered FIFO per entity.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Append a mutation behind any already queued for the same entity.
    async fn enqueue(&self, mutation: &PendingMutation) -> Result<()>;

    /// Distinct entity ids that have at least one pending mutation,
    /// ordered by their oldest mutation.
    async fn pending_entities(&self) -> Result<Vec<String>>;

    /// Oldest pending mutation for an entity, if any.
    async fn peek_entity(&self, entity_id: &str) -> Result<Option<PendingMutation>>;

    /// Transition pending -> in-flight and bump the attempt counter.
    async fn mark_in_flight(&self, mutation_id: &str) -> Result<()>;

    /// Server accepted the mutation: delete the row.
    async fn acknowledge(&self, mutation_id: &str) -> Result<()>;

    /// Server reported a version conflict; drain of this entity halts until
    /// the operator resolves it.
    async fn mark_conflicted(&self, mutation_id: &str, error: &str) -> Result<()>;

    /// Permanent rejection other than a conflict.
    async fn mark_failed(&self, mutation_id: &str, error: &str) -> Result<()>;

    /// Return an in-flight mutation to pending after a transient failure.
    async fn requeue(&self, mutation_id: &str, error: &str) -> Result<()>;

    /// Resolve a conflict by re-basing the mutation onto the current server
    /// version and returning it to pending.
    async fn rebase(&self, mutation_id: &str, base_version: i64) -> Result<()>;

    /// Resolve a conflict by dropping the mutation entirely.
    async fn discard(&self, mutation_id: &str) -> Result<()>;

    /// Mutations not yet acknowledged or discarded, across all entities.
    async fn pending_count(&self) -> Result<usize>;

    /// Full queue contents in replay order, for inspection surfaces.
    async fn snapshot(&self) -> Result<Vec<PendingMutation>>;
}

/// Local read cache of server products.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn get(&self, product_id: &str) -> Result<Option<Product>>;

    async fn upsert(&self, product: &Product) -> Result<()>;

    /// Ids of every cached product, used by the reconciler's refresh pass.
    async fn cached_ids(&self) -> Result<Vec<String>>;
}

/// The inventory server's HTTP surface.
#[async_trait]
pub trait InventoryBackend: Send + Sync {
    /// GET a single product; `Ok(None)` on 404.
    async fn fetch_product(&self, product_id: &str) -> Result<Option<Product>>;

    /// Conditional PUT of a product against `base_version`.
    async fn update_product(
        &self,
        product_id: &str,
        base_version: i64,
        patch: &ProductPatch,
        idempotency_key: &str,
    ) -> Result<UpdateResult>;

    /// All-or-nothing stock deduction for a basket of lines.
    /// Insufficient stock surfaces as `TillsyncError::InsufficientStock`.
    async fn deduct_stock(&self, request: &DeductionRequest) -> Result<()>;

    /// Record a completed sale. Idempotent on the server via the key.
    async fn submit_sale(&self, draft: &SaleDraft, idempotency_key: &str) -> Result<SaleReceipt>;

    /// Cheap liveness probe, used to warm the breaker before a sync pass.
    async fn health_check(&self) -> Result<()>;
}
