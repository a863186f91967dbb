//! Checkout-time stock deduction and sale recording.
//!
//! A sale is money changing hands, so it never goes through the offline
//! queue: either the server confirms the whole basket atomically or the
//! checkout fails in front of the operator. Local cached quantities are
//! touched only after the server has accepted the deduction.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use tillsync_common::{CircuitBreaker, RetryPolicy};
use tillsync_domain::{DeductionRequest, Result, SaleDraft, SaleReceipt};

use crate::ports::{InventoryBackend, ProductRepository};
use crate::{failure_kind, flatten_retry};

/// Front-of-house entry point for sales.
pub struct CheckoutService<B, R> {
    backend: Arc<B>,
    repo: Arc<R>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl<B, R> CheckoutService<B, R>
where
    B: InventoryBackend,
    R: ProductRepository,
{
    pub fn new(backend: Arc<B>, repo: Arc<R>, breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self { backend, repo, breaker, retry }
    }

    /// Deduct a basket of stock lines in one atomic server call.
    ///
    /// On insufficient stock the error carries per-line shortages and no
    /// quantity changes anywhere. With the circuit open this fails
    /// immediately; a till queueing sales it cannot verify would oversell.
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn deduct(&self, request: &DeductionRequest) -> Result<()> {
        self.retry
            .run(&self.breaker, failure_kind, || self.backend.deduct_stock(request))
            .await
            .map_err(flatten_retry)?;

        self.apply_local(request).await?;
        info!(lines = request.items.len(), "stock deduction confirmed");
        Ok(())
    }

    /// Record a completed sale: deduct its lines atomically, then submit the
    /// sale record under a single idempotency key so retries cannot double
    /// count revenue.
    #[instrument(skip(self, draft), fields(location_id = %draft.location_id))]
    pub async fn record_sale(&self, draft: &SaleDraft) -> Result<SaleReceipt> {
        let request = DeductionRequest::new(draft.location_id.clone(), draft.lines.clone())?;
        self.deduct(&request).await?;

        let idempotency_key = Uuid::new_v4().to_string();
        let receipt = self
            .retry
            .run(&self.breaker, failure_kind, || {
                self.backend.submit_sale(draft, &idempotency_key)
            })
            .await
            .map_err(flatten_retry)?;

        if !receipt.created {
            debug!(sale_id = %receipt.sale_id, "sale was already recorded; replayed key");
        }
        info!(sale_id = %receipt.sale_id, "sale recorded");
        Ok(receipt)
    }

    /// Mirror a confirmed deduction onto the local cache. Versions are left
    /// alone; the next sync pass pulls the server's authoritative state.
    async fn apply_local(&self, request: &DeductionRequest) -> Result<()> {
        for line in &request.items {
            let Some(mut product) = self.repo.get(&line.product_id).await? else {
                debug!(product_id = %line.product_id, "deducted product not cached; skipping");
                continue;
            };
            product.quantity -= line.quantity;
            if let Some(code) = &line.variant_code {
                for variant in &mut product.variants {
                    if &variant.variant_code == code {
                        variant.quantity -= line.quantity;
                    }
                }
            }
            self.repo.upsert(&product).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use tillsync_common::{CircuitBreakerConfig, RetryConfig};
    use tillsync_domain::{
        LineShortage, Product, ProductPatch, StockLine, TillsyncError, VariantStock,
    };

    use crate::ports::UpdateResult;

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        deduct_responses: Mutex<VecDeque<Result<()>>>,
        sale_responses: Mutex<VecDeque<Result<SaleReceipt>>>,
        deduct_calls: Mutex<u32>,
        sale_keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InventoryBackend for FakeBackend {
        async fn fetch_product(&self, _product_id: &str) -> Result<Option<Product>> {
            Ok(None)
        }

        async fn update_product(
            &self,
            _product_id: &str,
            _base_version: i64,
            _patch: &ProductPatch,
            _idempotency_key: &str,
        ) -> Result<UpdateResult> {
            Ok(UpdateResult::NotFound)
        }

        async fn deduct_stock(&self, _request: &DeductionRequest) -> Result<()> {
            *self.deduct_calls.lock().unwrap() += 1;
            self.deduct_responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn submit_sale(
            &self,
            _draft: &SaleDraft,
            idempotency_key: &str,
        ) -> Result<SaleReceipt> {
            self.sale_keys.lock().unwrap().push(idempotency_key.to_string());
            self.sale_responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(SaleReceipt {
                    sale_id: "sale-1".into(),
                    recorded_at: 1_756_400_000,
                    created: true,
                })
            })
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRepo {
        products: Mutex<HashMap<String, Product>>,
    }

    #[async_trait]
    impl ProductRepository for FakeRepo {
        async fn get(&self, product_id: &str) -> Result<Option<Product>> {
            Ok(self.products.lock().unwrap().get(product_id).cloned())
        }

        async fn upsert(&self, product: &Product) -> Result<()> {
            self.products.lock().unwrap().insert(product.id.clone(), product.clone());
            Ok(())
        }

        async fn cached_ids(&self) -> Result<Vec<String>> {
            Ok(self.products.lock().unwrap().keys().cloned().collect())
        }
    }

    fn tee_with_variants() -> Product {
        Product {
            id: "prod-1".into(),
            sku: "TS-001".into(),
            name: "Plain Tee".into(),
            version: 4,
            price_cents: 1_999,
            quantity: 12,
            variants: vec![
                VariantStock { variant_code: "S".into(), quantity: 5 },
                VariantStock { variant_code: "M".into(), quantity: 7 },
            ],
            location_id: "loc-1".into(),
            updated_at: 1_756_400_000,
        }
    }

    fn service(
        backend: Arc<FakeBackend>,
        repo: Arc<FakeRepo>,
    ) -> CheckoutService<FakeBackend, FakeRepo> {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        })
        .unwrap();
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
        .unwrap();
        CheckoutService::new(backend, repo, breaker, retry)
    }

    fn basket() -> DeductionRequest {
        DeductionRequest::new(
            "loc-1",
            vec![StockLine {
                product_id: "prod-1".into(),
                variant_code: Some("M".into()),
                quantity: 2,
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn confirmed_deduction_updates_local_quantities() {
        let backend = Arc::new(FakeBackend::default());
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        service.deduct(&basket()).await.unwrap();

        let product = repo.get("prod-1").await.unwrap().unwrap();
        assert_eq!(product.quantity, 10);
        assert_eq!(product.variants[1].quantity, 5, "variant M drops by 2");
        assert_eq!(product.variants[0].quantity, 5, "variant S untouched");
        assert_eq!(product.version, 4, "version is server-owned");
    }

    #[tokio::test]
    async fn insufficient_stock_changes_nothing_locally() {
        let backend = Arc::new(FakeBackend::default());
        backend.deduct_responses.lock().unwrap().push_back(Err(
            TillsyncError::InsufficientStock(vec![LineShortage {
                product_id: "prod-1".into(),
                variant_code: Some("M".into()),
                requested: 2,
                available: 1,
            }]),
        ));
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        let result = service.deduct(&basket()).await;
        match result {
            Err(TillsyncError::InsufficientStock(shortages)) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        let product = repo.get("prod-1").await.unwrap().unwrap();
        assert_eq!(product.quantity, 12, "all-or-nothing: no partial deduction");
        // A full basket that cannot be served is not a server outage.
        assert_eq!(*backend.deduct_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn mixed_basket_shortage_deducts_neither_line() {
        let backend = Arc::new(FakeBackend::default());
        // Only the mug is short; the tee alone could have been served.
        backend.deduct_responses.lock().unwrap().push_back(Err(
            TillsyncError::InsufficientStock(vec![LineShortage {
                product_id: "prod-2".into(),
                variant_code: None,
                requested: 3,
                available: 1,
            }]),
        ));
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        repo.upsert(&Product {
            id: "prod-2".into(),
            sku: "MG-001".into(),
            name: "Mug".into(),
            version: 2,
            price_cents: 899,
            quantity: 1,
            variants: vec![],
            location_id: "loc-1".into(),
            updated_at: 1_756_400_000,
        })
        .await
        .unwrap();
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        let request = DeductionRequest::new(
            "loc-1",
            vec![
                StockLine { product_id: "prod-1".into(), variant_code: Some("M".into()), quantity: 2 },
                StockLine { product_id: "prod-2".into(), variant_code: None, quantity: 3 },
            ],
        )
        .unwrap();

        let result = service.deduct(&request).await;
        match result {
            Err(TillsyncError::InsufficientStock(shortages)) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].product_id, "prod-2", "shortage names the failing line");
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        let tee = repo.get("prod-1").await.unwrap().unwrap();
        assert_eq!(tee.quantity, 12, "satisfiable line is not deducted either");
        assert_eq!(tee.variants[1].quantity, 7);
        assert_eq!(repo.get("prod-2").await.unwrap().unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn open_circuit_fails_the_sale_without_calling() {
        let backend = Arc::new(FakeBackend::default());
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(30),
        })
        .unwrap();
        breaker.record_failure();
        let service = CheckoutService::new(
            Arc::clone(&backend),
            Arc::clone(&repo),
            breaker,
            RetryPolicy::default(),
        );

        let result = service.deduct(&basket()).await;
        assert!(matches!(result, Err(TillsyncError::CircuitOpen)));
        assert_eq!(*backend.deduct_calls.lock().unwrap(), 0);
        assert_eq!(repo.get("prod-1").await.unwrap().unwrap().quantity, 12);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .deduct_responses
            .lock()
            .unwrap()
            .push_back(Err(TillsyncError::Timeout(5_000)));
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        service.deduct(&basket()).await.unwrap();
        assert_eq!(*backend.deduct_calls.lock().unwrap(), 2);
        assert_eq!(repo.get("prod-1").await.unwrap().unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn sale_retries_reuse_one_idempotency_key() {
        let backend = Arc::new(FakeBackend::default());
        backend
            .sale_responses
            .lock()
            .unwrap()
            .push_back(Err(TillsyncError::Network("reset".into())));
        let repo = Arc::new(FakeRepo::default());
        repo.upsert(&tee_with_variants()).await.unwrap();
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        let draft = SaleDraft {
            location_id: "loc-1".into(),
            lines: basket().items,
            total_cents: 3_998,
        };
        let receipt = service.record_sale(&draft).await.unwrap();
        assert_eq!(receipt.sale_id, "sale-1");

        let keys = backend.sale_keys.lock().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1], "retry must not mint a new key");
    }

    #[tokio::test]
    async fn sale_with_empty_basket_is_rejected_locally() {
        let backend = Arc::new(FakeBackend::default());
        let repo = Arc::new(FakeRepo::default());
        let service = service(Arc::clone(&backend), Arc::clone(&repo));

        let draft = SaleDraft { location_id: "loc-1".into(), lines: vec![], total_cents: 0 };
        let result = service.record_sale(&draft).await;
        assert!(matches!(result, Err(TillsyncError::InvalidInput(_))));
        assert_eq!(*backend.deduct_calls.lock().unwrap(), 0);
    }
}
