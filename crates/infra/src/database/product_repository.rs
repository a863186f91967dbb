//! SQLite-backed local product cache.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Row};
use tokio::task;

use tillsync_core::ProductRepository;
use tillsync_domain::{Product, Result, TillsyncError, VariantStock};

use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

const UPSERT_SQL: &str = "INSERT INTO products (
        id, sku, name, version, price_cents, quantity, variants_json, location_id, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(id) DO UPDATE SET
        sku = excluded.sku,
        name = excluded.name,
        version = excluded.version,
        price_cents = excluded.price_cents,
        quantity = excluded.quantity,
        variants_json = excluded.variants_json,
        location_id = excluded.location_id,
        updated_at = excluded.updated_at";

const SELECT_SQL: &str = "SELECT
        id, sku, name, version, price_cents, quantity, variants_json, location_id, updated_at
    FROM products
    WHERE id = ?1";

/// Read cache of the server's product catalogue.
pub struct SqliteProductRepository {
    db: Arc<DbManager>,
}

impl SqliteProductRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn get(&self, product_id: &str) -> Result<Option<Product>> {
        let db = Arc::clone(&self.db);
        let product_id = product_id.to_string();

        task::spawn_blocking(move || -> Result<Option<Product>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(SELECT_SQL).map_err(map_sql_error)?;
            let mut rows =
                stmt.query_map(params![product_id], map_product_row).map_err(map_sql_error)?;
            match rows.next() {
                Some(row) => Ok(Some(row.map_err(map_sql_error)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert(&self, product: &Product) -> Result<()> {
        let db = Arc::clone(&self.db);
        let to_store = product.clone();

        task::spawn_blocking(move || -> Result<()> {
            let variants_json = serde_json::to_string(&to_store.variants)
                .map_err(|err| TillsyncError::Internal(err.to_string()))?;
            let conn = db.get_connection()?;
            conn.execute(
                UPSERT_SQL,
                params![
                    to_store.id,
                    to_store.sku,
                    to_store.name,
                    to_store.version,
                    to_store.price_cents,
                    to_store.quantity,
                    variants_json,
                    to_store.location_id,
                    to_store.updated_at,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn cached_ids(&self) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = db.get_connection()?;
            let mut stmt =
                conn.prepare("SELECT id FROM products ORDER BY id").map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![], |row| row.get::<_, String>(0))
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_product_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    let variants_raw: String = row.get(6)?;
    let variants: Vec<VariantStock> = serde_json::from_str(&variants_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err))
    })?;

    Ok(Product {
        id: row.get(0)?,
        sku: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        price_cents: row.get(4)?,
        quantity: row.get(5)?,
        variants,
        location_id: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
