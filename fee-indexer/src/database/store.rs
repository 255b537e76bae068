//! Write path used by the indexing engine

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::database::Database;
use crate::error::Result;
use crate::models::BlockRecord;

/// A height left out of a commit, with the error that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedHeight {
    pub block_number: u64,
    pub reason: String,
}

/// Durable storage of block records and per-chain progress.
#[async_trait]
pub trait FeeStore: Send + Sync {
    async fn last_indexed_height(&self, chain_id: &str) -> Result<Option<u64>>;

    /// Upserts `records`, advances the cursor to `new_cursor` and records
    /// `missed` heights, all in one transaction.
    async fn commit_batch(
        &self,
        chain_id: &str,
        records: &[BlockRecord],
        new_cursor: u64,
        missed: &[MissedHeight],
    ) -> Result<()>;

    async fn health_check(&self) -> bool;
}

#[async_trait]
impl FeeStore for Database {
    async fn last_indexed_height(&self, chain_id: &str) -> Result<Option<u64>> {
        let height = sqlx::query_scalar::<_, i64>(
            "SELECT last_indexed_height FROM indexing_cursors WHERE chain_id = ?",
        )
        .bind(chain_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(height.map(|h| h as u64))
    }

    async fn commit_batch(
        &self,
        chain_id: &str,
        records: &[BlockRecord],
        new_cursor: u64,
        missed: &[MissedHeight],
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        // Dropping the transaction on any early return rolls everything back.
        let mut tx = self.pool().begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO blocks (chain_id, block_number, timestamp, total_fees, indexed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (chain_id, block_number) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    total_fees = excluded.total_fees,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&record.chain_id)
            .bind(record.block_number as i64)
            .bind(record.timestamp.timestamp_millis())
            .bind(&record.total_fees)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM missed_blocks WHERE chain_id = ? AND block_number = ?")
                .bind(&record.chain_id)
                .bind(record.block_number as i64)
                .execute(&mut *tx)
                .await?;
        }

        for gap in missed {
            sqlx::query(
                r#"
                INSERT INTO missed_blocks (chain_id, block_number, reason, recorded_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (chain_id, block_number) DO UPDATE SET
                    reason = excluded.reason,
                    recorded_at = excluded.recorded_at
                "#,
            )
            .bind(chain_id)
            .bind(gap.block_number as i64)
            .bind(&gap.reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO indexing_cursors (chain_id, last_indexed_height, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (chain_id) DO UPDATE SET
                last_indexed_height = MAX(indexing_cursors.last_indexed_height, excluded.last_indexed_height),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chain_id)
        .bind(new_cursor as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(chain_id, records = records.len(), missed = missed.len(), new_cursor, "batch committed");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(self.pool())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::{tempdir, TempDir};
    use tokio_test::{assert_err, assert_ok};

    async fn open() -> (TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("fees.db")).await.unwrap();
        db.migrate().await.unwrap();
        (dir, db)
    }

    fn record(height: u64, fees: &str) -> BlockRecord {
        BlockRecord {
            chain_id: "cosmoshub-4".to_string(),
            block_number: height,
            timestamp: Utc.timestamp_opt(1_700_000_000 + height as i64, 0).unwrap(),
            total_fees: fees.to_string(),
        }
    }

    async fn block_rows(db: &Database) -> Vec<(i64, String)> {
        sqlx::query_as("SELECT block_number, total_fees FROM blocks ORDER BY block_number")
            .fetch_all(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cursor_absent_until_first_commit() {
        let (_dir, db) = open().await;
        assert_eq!(db.last_indexed_height("cosmoshub-4").await.unwrap(), None);

        assert_ok!(db.commit_batch("cosmoshub-4", &[record(1, "10uatom")], 1, &[]).await);
        assert_eq!(db.last_indexed_height("cosmoshub-4").await.unwrap(), Some(1));
        assert_eq!(db.last_indexed_height("osmosis-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recommitting_a_height_overwrites() {
        let (_dir, db) = open().await;
        db.commit_batch("cosmoshub-4", &[record(7, "10uatom")], 7, &[]).await.unwrap();
        db.commit_batch("cosmoshub-4", &[record(7, "25uatom")], 7, &[]).await.unwrap();

        assert_eq!(block_rows(&db).await, vec![(7, "25uatom".to_string())]);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let (_dir, db) = open().await;
        db.commit_batch("cosmoshub-4", &[], 120, &[]).await.unwrap();
        db.commit_batch("cosmoshub-4", &[record(110, "1uatom")], 110, &[]).await.unwrap();

        assert_eq!(db.last_indexed_height("cosmoshub-4").await.unwrap(), Some(120));
    }

    #[tokio::test]
    async fn test_missed_heights_are_cleared_once_committed() {
        let (_dir, db) = open().await;
        let gap = MissedHeight { block_number: 5, reason: "exhausted".to_string() };
        db.commit_batch("cosmoshub-4", &[record(4, "1uatom")], 5, &[gap]).await.unwrap();

        let missed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missed_blocks")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(missed, 1);

        db.commit_batch("cosmoshub-4", &[record(5, "2uatom")], 5, &[]).await.unwrap();
        let missed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missed_blocks")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(missed, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_records_and_cursor() {
        let (_dir, db) = open().await;
        db.commit_batch("cosmoshub-4", &[record(1, "1uatom")], 1, &[]).await.unwrap();

        // Make the cursor upsert fail after the block rows were written.
        sqlx::query("DROP TABLE indexing_cursors")
            .execute(db.pool())
            .await
            .unwrap();

        let result = db
            .commit_batch("cosmoshub-4", &[record(2, "2uatom"), record(3, "3uatom")], 3, &[])
            .await;
        assert_err!(result);
        assert_eq!(block_rows(&db).await, vec![(1, "1uatom".to_string())]);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, db) = open().await;
        assert!(db.health_check().await);
        db.pool().close().await;
        assert!(!db.health_check().await);
    }
}
