//! # Transaction Repository
//!
//! The durable telemetry queue.
//!
//! ## Lifecycle of a Row
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Extractor ──► TransactionWriter ──► INSERT INTO tr (sended = 0)        │
//! │                                             │                           │
//! │                                             ▼                           │
//! │                      TransactionUploader: SELECT ... WHERE sended = 0   │
//! │                                             │                           │
//! │                                  upload ok? │                           │
//! │                          ┌──── no ──────────┴──── yes ────┐             │
//! │                          ▼                                ▼             │
//! │                 row stays unsent               UPDATE tr SET sended = 1 │
//! │                 (retried next tick)            WHERE id IN (...)        │
//! │                                                                         │
//! │  Rows are never deleted. `sended` never goes back to 0.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A crash between a successful upload and `mark_sent` leaves the rows
//! unsent, so they are uploaded again: delivery is at-least-once.

use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use blegate_core::{NewTransaction, Transaction};

const TX_COLUMNS: &str = "id, hash, device_hash, timestamp, uplink, sended AS sent, payload";

/// Ids per UPDATE statement; stays well below SQLite's bind parameter limit.
const MARK_SENT_CHUNK: usize = 500;

/// Repository for the `tr` transaction log.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Appends a transaction and returns its local id.
    pub async fn insert_transaction(&self, tx: &NewTransaction) -> DbResult<i64> {
        let id = insert_on(&self.pool, tx).await?;

        debug!(id, device_hash = %tx.device_hash, "Transaction stored");
        Ok(id)
    }

    /// Appends several transactions atomically.
    pub async fn insert_transactions(&self, txs: &[NewTransaction]) -> DbResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(txs.len());
        if txs.is_empty() {
            return Ok(ids);
        }

        let mut db_tx = self.pool.begin().await?;
        for tx in txs {
            ids.push(insert_on(&mut *db_tx, tx).await?);
        }
        db_tx.commit().await?;

        debug!(count = ids.len(), "Transactions stored");
        Ok(ids)
    }

    /// Fetches one transaction by local id.
    pub async fn get_transaction(&self, id: i64) -> DbResult<Option<Transaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM tr WHERE id = ?1");

        let tx = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tx)
    }

    /// Returns every transaction not yet acknowledged, oldest first.
    pub async fn list_unsent_transactions(&self) -> DbResult<Vec<Transaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM tr WHERE sended = 0 ORDER BY id ASC");

        let txs = sqlx::query_as::<_, Transaction>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(txs)
    }

    /// Flags the given transactions as sent.
    ///
    /// Returns the number of rows that flipped. Empty input touches nothing.
    /// All chunks commit together or not at all.
    pub async fn mark_sent(&self, ids: &[i64]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut db_tx = self.pool.begin().await?;
        let mut updated = 0;

        for chunk in ids.chunks(MARK_SENT_CHUNK) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE tr SET sended = 1 WHERE sended = 0 AND id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            updated += query.build().execute(&mut *db_tx).await?.rows_affected();
        }

        db_tx.commit().await?;

        debug!(requested = ids.len(), updated, "Transactions marked sent");
        Ok(updated)
    }

    /// Counts transactions waiting for upload.
    pub async fn count_unsent(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tr WHERE sended = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

async fn insert_on<'e, E>(executor: E, tx: &NewTransaction) -> DbResult<i64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO tr (hash, device_hash, timestamp, uplink, sended, payload)
        VALUES ('', ?1, ?2, ?3, 0, ?4)
        "#,
    )
    .bind(tx.device_hash.as_str())
    .bind(tx.timestamp)
    .bind(tx.uplink)
    .bind(tx.payload.as_str())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn new_tx(device: &str, ts: i64) -> NewTransaction {
        NewTransaction {
            device_hash: device.to_string(),
            timestamp: ts,
            uplink: false,
            payload: r#"{"Env":{"Temp":"0a"}}"#.to_string(),
        }
    }

    async fn repo() -> TransactionRepository {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .transactions()
    }

    #[tokio::test]
    async fn test_insert_and_list_unsent_in_id_order() {
        let repo = repo().await;
        let first = repo.insert_transaction(&new_tx("aa", 30)).await.unwrap();
        let second = repo.insert_transaction(&new_tx("bb", 10)).await.unwrap();
        assert!(second > first);

        let unsent = repo.list_unsent_transactions().await.unwrap();
        assert_eq!(unsent.len(), 2);
        assert_eq!(unsent[0].id, first);
        assert_eq!(unsent[1].id, second);
        assert!(!unsent[0].sent);
        assert!(!unsent[0].uplink);
        assert_eq!(unsent[0].hash, "");
        assert_eq!(unsent[0].payload, r#"{"Env":{"Temp":"0a"}}"#);
    }

    #[tokio::test]
    async fn test_mark_sent_only_flips_given_ids() {
        let repo = repo().await;
        let ids = repo
            .insert_transactions(&[new_tx("aa", 1), new_tx("aa", 2), new_tx("aa", 3)])
            .await
            .unwrap();

        let updated = repo.mark_sent(&ids[..2]).await.unwrap();
        assert_eq!(updated, 2);

        let unsent = repo.list_unsent_transactions().await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, ids[2]);
        assert_eq!(repo.count_unsent().await.unwrap(), 1);

        let sent = repo.get_transaction(ids[0]).await.unwrap().unwrap();
        assert!(sent.sent);
    }

    #[tokio::test]
    async fn test_mark_sent_empty_and_repeat() {
        let repo = repo().await;
        let id = repo.insert_transaction(&new_tx("aa", 1)).await.unwrap();

        assert_eq!(repo.mark_sent(&[]).await.unwrap(), 0);
        assert_eq!(repo.count_unsent().await.unwrap(), 1);

        assert_eq!(repo.mark_sent(&[id]).await.unwrap(), 1);
        // Already sent rows are not counted again and never revert.
        assert_eq!(repo.mark_sent(&[id]).await.unwrap(), 0);
        assert!(repo.get_transaction(id).await.unwrap().unwrap().sent);
    }

    #[tokio::test]
    async fn test_unsent_reappear_without_mark_sent() {
        let repo = repo().await;
        repo.insert_transaction(&new_tx("aa", 1)).await.unwrap();

        // Upload "succeeded" but the process died before mark_sent.
        let first = repo.list_unsent_transactions().await.unwrap();
        let again = repo.list_unsent_transactions().await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_mark_sent_large_batch_spans_chunks() {
        let repo = repo().await;
        let batch: Vec<_> = (0..1_200).map(|i| new_tx("aa", i)).collect();
        let ids = repo.insert_transactions(&batch).await.unwrap();

        assert_eq!(repo.mark_sent(&ids).await.unwrap(), 1_200);
        assert_eq!(repo.count_unsent().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timestamps_are_not_truncated() {
        let repo = repo().await;
        let far_future = 10_000_000_000_i64;
        let id = repo
            .insert_transaction(&new_tx("aa", far_future))
            .await
            .unwrap();

        let tx = repo.get_transaction(id).await.unwrap().unwrap();
        assert_eq!(tx.timestamp, far_future);
    }
}
