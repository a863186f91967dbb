//! SQLite-backed implementation of the mutation queue port.
//!
//! Rows live in `pending_mutations`. The AUTOINCREMENT `seq` column fixes
//! replay order: within one entity mutations replay strictly oldest-first,
//! and a conflicted head holds everything behind it until resolved.
//! Acknowledged mutations are deleted; failed ones stay for inspection but
//! no longer block the entity.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Row};
use tokio::task;
use tracing::warn;

use tillsync_core::MutationQueue;
use tillsync_domain::{MutationStatus, PendingMutation, ProductPatch, Result};

use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

const MUTATION_COLUMNS: &str = "id, idempotency_key, entity_id, base_version, patch_json,
    created_at, attempts, status, last_error";

const INSERT_SQL: &str = "INSERT INTO pending_mutations (
        id, idempotency_key, entity_id, base_version, patch_json,
        created_at, attempts, status, last_error
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

// Statuses that still occupy the entity's replay lane. Failed rows are
// historical; acknowledged rows are deleted outright.
const ACTIVE_STATUSES: &str = "('pending', 'in_flight', 'conflicted')";

/// Durable offline queue backed by the shared SQLite manager.
pub struct SqliteMutationQueue {
    db: Arc<DbManager>,
}

impl SqliteMutationQueue {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn update_status(
        &self,
        mutation_id: &str,
        sql: &'static str,
        error: Option<String>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let mutation_id = mutation_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(sql, params![mutation_id, error]).map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl MutationQueue for SqliteMutationQueue {
    async fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
        let db = Arc::clone(&self.db);
        let to_insert = mutation.clone();

        task::spawn_blocking(move || -> Result<()> {
            let patch_json = serde_json::to_string(&to_insert.patch)
                .map_err(|err| tillsync_domain::TillsyncError::Internal(err.to_string()))?;
            let conn = db.get_connection()?;
            conn.execute(
                INSERT_SQL,
                params![
                    to_insert.id,
                    to_insert.idempotency_key,
                    to_insert.entity_id,
                    to_insert.base_version,
                    patch_json,
                    to_insert.created_at,
                    to_insert.attempts,
                    to_insert.status.to_string(),
                    to_insert.last_error,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn pending_entities(&self) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT entity_id FROM pending_mutations
                 WHERE status IN {ACTIVE_STATUSES}
                 GROUP BY entity_id
                 ORDER BY MIN(seq) ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
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

    async fn peek_entity(&self, entity_id: &str) -> Result<Option<PendingMutation>> {
        let db = Arc::clone(&self.db);
        let entity_id = entity_id.to_string();

        task::spawn_blocking(move || -> Result<Option<PendingMutation>> {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {MUTATION_COLUMNS} FROM pending_mutations
                 WHERE entity_id = ?1 AND status IN {ACTIVE_STATUSES}
                 ORDER BY seq ASC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let mut rows = stmt
                .query_map(params![entity_id], map_mutation_row)
                .map_err(map_sql_error)?;
            match rows.next() {
                Some(row) => Ok(Some(row.map_err(map_sql_error)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_in_flight(&self, mutation_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let mutation_id = mutation_id.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE pending_mutations
                 SET status = 'in_flight', attempts = attempts + 1
                 WHERE id = ?1",
                params![mutation_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn acknowledge(&self, mutation_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let mutation_id = mutation_id.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM pending_mutations WHERE id = ?1", params![mutation_id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_conflicted(&self, mutation_id: &str, error: &str) -> Result<()> {
        self.update_status(
            mutation_id,
            "UPDATE pending_mutations SET status = 'conflicted', last_error = ?2 WHERE id = ?1",
            Some(error.to_string()),
        )
        .await
    }

    async fn mark_failed(&self, mutation_id: &str, error: &str) -> Result<()> {
        self.update_status(
            mutation_id,
            "UPDATE pending_mutations SET status = 'failed', last_error = ?2 WHERE id = ?1",
            Some(error.to_string()),
        )
        .await
    }

    async fn requeue(&self, mutation_id: &str, error: &str) -> Result<()> {
        self.update_status(
            mutation_id,
            "UPDATE pending_mutations SET status = 'pending', last_error = ?2 WHERE id = ?1",
            Some(error.to_string()),
        )
        .await
    }

    async fn rebase(&self, mutation_id: &str, base_version: i64) -> Result<()> {
        let db = Arc::clone(&self.db);
        let mutation_id = mutation_id.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE pending_mutations
                 SET base_version = ?2, status = 'pending', attempts = 0, last_error = NULL
                 WHERE id = ?1",
                params![mutation_id, base_version],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn discard(&self, mutation_id: &str) -> Result<()> {
        self.acknowledge(mutation_id).await
    }

    async fn pending_count(&self) -> Result<usize> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<usize> {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT COUNT(*) FROM pending_mutations WHERE status IN {ACTIVE_STATUSES}"
            );
            let count: i64 =
                conn.query_row(&sql, params![], |row| row.get(0)).map_err(map_sql_error)?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn snapshot(&self) -> Result<Vec<PendingMutation>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<Vec<PendingMutation>> {
            let conn = db.get_connection()?;
            let sql = format!(
                "SELECT {MUTATION_COLUMNS} FROM pending_mutations ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![], map_mutation_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_mutation_row(row: &Row<'_>) -> rusqlite::Result<PendingMutation> {
    let id: String = row.get(0)?;
    let patch_raw: String = row.get(4)?;
    let patch: ProductPatch = serde_json::from_str(&patch_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let status_raw: String = row.get(7)?;
    let status = parse_status(&id, &status_raw);

    Ok(PendingMutation {
        id,
        idempotency_key: row.get(1)?,
        entity_id: row.get(2)?,
        base_version: row.get(3)?,
        patch,
        created_at: row.get(5)?,
        attempts: row.get(6)?,
        status,
        last_error: row.get(8)?,
    })
}

fn parse_status(id: &str, raw: &str) -> MutationStatus {
    match raw.parse::<MutationStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                mutation_id = %id,
                raw_status = %raw,
                error = %err,
                "invalid mutation status in store; defaulting to pending"
            );
            MutationStatus::Pending
        }
    }
}
