//! # Tillsync Infra
//!
//! Adapters behind the core ports: SQLite persistence (mutation queue and
//! product cache), the HTTP backend client, configuration loading, and the
//! background reconciler. [`SyncRuntime`] wires them together; a process
//! constructs exactly one and injects its handles wherever they are needed.

pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tillsync_common::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy,
};
use tillsync_core::{CheckoutService, EventBus, OptimisticController, SyncEvent};
use tillsync_domain::constants::{DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY};
use tillsync_domain::{Result, TillsyncError};

use api::{BackendClient, BackendClientConfig};
use config::AppConfig;
use database::{DbManager, SqliteMutationQueue, SqliteProductRepository};
use sync::{Reconciler, ReconcilerConfig};

pub type Controller =
    OptimisticController<BackendClient, SqliteMutationQueue, SqliteProductRepository>;
pub type Checkout = CheckoutService<BackendClient, SqliteProductRepository>;
pub type SyncReconciler =
    Reconciler<BackendClient, SqliteMutationQueue, SqliteProductRepository>;

/// Fully wired client runtime: one per process.
///
/// Owns the single circuit breaker, retry policy, and event bus that every
/// backend-touching component shares. Construction opens the database and
/// runs migrations; call [`SyncRuntime::start`] to begin background
/// reconciliation and [`SyncRuntime::shutdown`] before exit.
pub struct SyncRuntime {
    db: Arc<DbManager>,
    backend: Arc<BackendClient>,
    queue: Arc<SqliteMutationQueue>,
    repo: Arc<SqliteProductRepository>,
    breaker: CircuitBreaker,
    events: EventBus,
    controller: Arc<Controller>,
    checkout: Arc<Checkout>,
    reconciler: SyncReconciler,
}

impl SyncRuntime {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;

        let backend = Arc::new(BackendClient::new(BackendClientConfig {
            base_url: config.backend.base_url.clone(),
            api_token: config.backend.api_token.clone(),
            timeout: Duration::from_secs(config.backend.timeout_secs),
        })?);

        let queue = Arc::new(SqliteMutationQueue::new(Arc::clone(&db)));
        let repo = Arc::new(SqliteProductRepository::new(Arc::clone(&db)));

        let events = EventBus::default();
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.sync.failure_threshold,
            cooldown: Duration::from_secs(config.sync.cooldown_secs),
        })
        .map_err(|err| TillsyncError::Config(err.to_string()))?;

        // The UI learns about offline/online transitions from the bus, not
        // by polling the breaker.
        let bus_for_breaker = events.clone();
        breaker.on_transition(Arc::new(move |state| match state {
            CircuitState::Open => bus_for_breaker.publish(SyncEvent::CircuitOpened),
            CircuitState::Closed => bus_for_breaker.publish(SyncEvent::CircuitClosed),
            CircuitState::HalfOpen => {}
        }));

        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: config.sync.retry_max_attempts,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
        })
        .map_err(|err| TillsyncError::Config(err.to_string()))?;

        let controller = Arc::new(
            OptimisticController::new(
                Arc::clone(&backend),
                Arc::clone(&queue),
                Arc::clone(&repo),
                breaker.clone(),
                retry.clone(),
                events.clone(),
            )
            .with_soft_capacity(config.sync.queue_soft_capacity),
        );

        let checkout = Arc::new(CheckoutService::new(
            Arc::clone(&backend),
            Arc::clone(&repo),
            breaker.clone(),
            retry,
        ));

        let reconciler = Reconciler::new(
            Arc::clone(&controller),
            Arc::clone(&backend),
            Arc::clone(&queue),
            Arc::clone(&repo),
            breaker.clone(),
            events.clone(),
            ReconcilerConfig {
                interval: Duration::from_secs(config.sync.reconcile_interval_secs),
                drain_fan_out: config.sync.drain_fan_out,
                ..ReconcilerConfig::default()
            },
        );

        info!(base_url = %config.backend.base_url, "sync runtime constructed");
        Ok(Self {
            db,
            backend,
            queue,
            repo,
            breaker,
            events,
            controller,
            checkout,
            reconciler,
        })
    }

    /// Start background reconciliation.
    pub fn start(&mut self) -> Result<()> {
        self.reconciler.start()
    }

    /// Stop background reconciliation and wait for it to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.reconciler.stop().await
    }

    /// Request an immediate reconciliation pass.
    pub fn trigger_sync(&self) {
        self.reconciler.trigger();
    }

    pub fn controller(&self) -> Arc<Controller> {
        Arc::clone(&self.controller)
    }

    pub fn checkout(&self) -> Arc<Checkout> {
        Arc::clone(&self.checkout)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> Arc<SqliteMutationQueue> {
        Arc::clone(&self.queue)
    }

    pub fn repository(&self) -> Arc<SqliteProductRepository> {
        Arc::clone(&self.repo)
    }

    pub fn backend(&self) -> Arc<BackendClient> {
        Arc::clone(&self.backend)
    }

    pub fn database(&self) -> Arc<DbManager> {
        Arc::clone(&self.db)
    }
}
