//! End-to-end offline replay: a real SQLite queue and cache, the real HTTP
//! client, and the reconciler draining against a wiremock backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tillsync_common::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryPolicy};
use tillsync_core::{
    EventBus, MutationQueue, OptimisticController, ProductRepository, UpdateOutcome,
};
use tillsync_domain::{MutationStatus, Product, ProductPatch, VariantStock};
use tillsync_infra::api::{BackendClient, BackendClientConfig};
use tillsync_infra::database::{DbManager, SqliteMutationQueue, SqliteProductRepository};
use tillsync_infra::sync::{Reconciler, ReconcilerConfig};

type TestController =
    OptimisticController<BackendClient, SqliteMutationQueue, SqliteProductRepository>;
type TestReconciler = Reconciler<BackendClient, SqliteMutationQueue, SqliteProductRepository>;

struct Stack {
    queue: Arc<SqliteMutationQueue>,
    repo: Arc<SqliteProductRepository>,
    controller: Arc<TestController>,
    reconciler: TestReconciler,
    _dir: TempDir,
}

fn product(id: &str, version: i64) -> Product {
    Product {
        id: id.into(),
        sku: format!("SKU-{id}"),
        name: "Plain Tee".into(),
        version,
        price_cents: 1_999,
        quantity: 12,
        variants: vec![VariantStock { variant_code: "M".into(), quantity: 7 }],
        location_id: "loc-1".into(),
        updated_at: 1_756_400_000,
    }
}

fn product_json(id: &str, version: i64) -> serde_json::Value {
    serde_json::to_value(product(id, version)).unwrap()
}

fn patch(price_cents: i64) -> ProductPatch {
    ProductPatch {
        name: "Plain Tee".into(),
        price_cents,
        quantity: 12,
        variants: vec![VariantStock { variant_code: "M".into(), quantity: 7 }],
    }
}

fn build_stack(server: &MockServer) -> Stack {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DbManager::new(dir.path().join("tillsync.db"), 2).unwrap());
    db.run_migrations().unwrap();

    let backend = Arc::new(
        BackendClient::new(BackendClientConfig {
            base_url: server.uri(),
            api_token: None,
            timeout: Duration::from_secs(2),
        })
        .unwrap(),
    );
    let queue = Arc::new(SqliteMutationQueue::new(Arc::clone(&db)));
    let repo = Arc::new(SqliteProductRepository::new(Arc::clone(&db)));
    let events = EventBus::new(32);
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 5,
        cooldown: Duration::from_secs(30),
    })
    .unwrap();
    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    })
    .unwrap();

    let controller = Arc::new(OptimisticController::new(
        Arc::clone(&backend),
        Arc::clone(&queue),
        Arc::clone(&repo),
        breaker.clone(),
        retry,
        events.clone(),
    ));
    let reconciler = Reconciler::new(
        Arc::clone(&controller),
        Arc::clone(&backend),
        Arc::clone(&queue),
        Arc::clone(&repo),
        breaker,
        events,
        ReconcilerConfig { drain_fan_out: 1, ..Default::default() },
    );

    Stack { queue, repo, controller, reconciler, _dir: dir }
}

async fn mount_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_writes_queue_then_replay_in_order() {
    let server = MockServer::start().await;
    mount_health(&server).await;
    let stack = build_stack(&server);
    stack.repo.upsert(&product("prod-1", 4)).await.unwrap();

    // Backend down: the first write fails transiently and is queued.
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let first = match stack.controller.update("prod-1", patch(2_100)).await.unwrap() {
        UpdateOutcome::Queued(m) => m,
        other => panic!("expected Queued, got {other:?}"),
    };
    // Second write sees the backlog and queues without touching the network.
    let second = match stack.controller.update("prod-1", patch(2_200)).await.unwrap() {
        UpdateOutcome::Queued(m) => m,
        other => panic!("expected Queued, got {other:?}"),
    };
    assert_eq!(stack.queue.pending_count().await.unwrap(), 2);

    // Backend back: each replay is accepted in turn.
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 6)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 6)))
        .mount(&server)
        .await;

    stack.reconciler.run_pass().await.unwrap();

    // Acknowledged rows are gone and replay honoured enqueue order with the
    // keys minted at enqueue time.
    assert_eq!(stack.queue.pending_count().await.unwrap(), 0);
    let puts: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .collect();
    assert_eq!(puts.len(), 3, "one offline attempt plus two replays");
    let replay_keys: Vec<String> = puts[1..]
        .iter()
        .map(|r| r.headers.get("Idempotency-Key").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(replay_keys, vec![first.idempotency_key.clone(), second.idempotency_key.clone()]);

    let cached = stack.repo.get("prod-1").await.unwrap().unwrap();
    assert_eq!(cached.version, 6, "cache refreshed to authoritative state");
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicted_replay_halts_the_entity_and_survives_reopen() {
    let server = MockServer::start().await;
    mount_health(&server).await;
    let stack = build_stack(&server);
    stack.repo.upsert(&product("prod-1", 4)).await.unwrap();

    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let head = match stack.controller.update("prod-1", patch(2_100)).await.unwrap() {
        UpdateOutcome::Queued(m) => m,
        other => panic!("expected Queued, got {other:?}"),
    };
    let held = match stack.controller.update("prod-1", patch(2_200)).await.unwrap() {
        UpdateOutcome::Queued(m) => m,
        other => panic!("expected Queued, got {other:?}"),
    };

    // Someone else wrote version 9 while we were offline.
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "stale_version",
            "current": product_json("prod-1", 9)
        })))
        .mount(&server)
        .await;

    stack.reconciler.run_pass().await.unwrap();

    let rows = stack.queue.snapshot().await.unwrap();
    assert_eq!(rows.len(), 2, "nothing was lost");
    assert_eq!(rows[0].id, head.id);
    assert_eq!(rows[0].status, MutationStatus::Conflicted);
    assert_eq!(rows[1].id, held.id);
    assert_eq!(rows[1].status, MutationStatus::Pending, "held behind the conflict");

    // The local cache still shows the operator's base; no silent rollback.
    assert_eq!(stack.repo.get("prod-1").await.unwrap().unwrap().version, 4);

    // Rebase onto the server version and drain again.
    stack.controller.resolve_rebase(&head.id, &product("prod-1", 9)).await.unwrap();
    server.reset().await;
    mount_health(&server).await;
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 10)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 11)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/prod-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_json("prod-1", 11)))
        .mount(&server)
        .await;

    stack.reconciler.run_pass().await.unwrap();
    assert_eq!(stack.queue.pending_count().await.unwrap(), 0);
    assert_eq!(stack.repo.get("prod-1").await.unwrap().unwrap().version, 11);
}
