//! Database query functions for the read API

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use crate::fees::FeeTotals;
use crate::models::*;
use crate::error::{IndexerError, Result};

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| IndexerError::Internal(format!("Stored timestamp out of range: {}", millis)))
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    chain_id: String,
    block_number: i64,
    timestamp: i64,
    total_fees: String,
}

impl TryFrom<BlockRow> for BlockRecord {
    type Error = IndexerError;

    fn try_from(row: BlockRow) -> Result<Self> {
        Ok(BlockRecord {
            chain_id: row.chain_id,
            block_number: row.block_number as u64,
            timestamp: millis_to_datetime(row.timestamp)?,
            total_fees: row.total_fees,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    chain_id: String,
    last_indexed_height: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct MissedRow {
    chain_id: String,
    block_number: i64,
    reason: String,
    recorded_at: i64,
}

/// Aggregated fees over a block range.
#[derive(Debug, Default)]
pub struct FeeAggregate {
    pub block_count: i64,
    pub totals: FeeTotals,
}

pub struct FeeQueries;

impl FeeQueries {
    pub async fn sum_by_height(pool: &sqlx::SqlitePool, chain_id: &str, start: u64, end: u64) -> Result<FeeAggregate> {
        let mut rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT total_fees
            FROM blocks
            WHERE chain_id = ? AND block_number BETWEEN ? AND ?
            ORDER BY block_number
            "#
        )
        .bind(chain_id)
        .bind(start as i64)
        .bind(end as i64)
        .fetch(pool);

        let mut aggregate = FeeAggregate::default();
        while let Some(total_fees) = rows.try_next().await? {
            aggregate.block_count += 1;
            aggregate.totals.add_value(&total_fees);
        }
        Ok(aggregate)
    }

    pub async fn sum_by_time(
        pool: &sqlx::SqlitePool,
        chain_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FeeAggregate> {
        let mut rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT total_fees
            FROM blocks
            WHERE chain_id = ? AND timestamp BETWEEN ? AND ?
            ORDER BY block_number
            "#
        )
        .bind(chain_id)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch(pool);

        let mut aggregate = FeeAggregate::default();
        while let Some(total_fees) = rows.try_next().await? {
            aggregate.block_count += 1;
            aggregate.totals.add_value(&total_fees);
        }
        Ok(aggregate)
    }

    pub async fn blocks_by_height(pool: &sqlx::SqlitePool, chain_id: &str, start: u64, end: u64) -> Result<Vec<BlockRecord>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT chain_id, block_number, timestamp, total_fees
            FROM blocks
            WHERE chain_id = ? AND block_number BETWEEN ? AND ?
            ORDER BY block_number
            "#
        )
        .bind(chain_id)
        .bind(start as i64)
        .bind(end as i64)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(BlockRecord::try_from).collect()
    }
}

pub struct CursorQueries;

impl CursorQueries {
    pub async fn list(pool: &sqlx::SqlitePool) -> Result<Vec<IndexingCursor>> {
        let rows = sqlx::query_as::<_, CursorRow>(
            "SELECT chain_id, last_indexed_height, updated_at FROM indexing_cursors ORDER BY chain_id"
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(IndexingCursor {
                    chain_id: row.chain_id,
                    last_indexed_height: row.last_indexed_height as u64,
                    updated_at: millis_to_datetime(row.updated_at)?,
                })
            })
            .collect()
    }

    pub async fn missed_blocks(pool: &sqlx::SqlitePool, chain_id: &str, limit: i64, offset: i64) -> Result<Vec<MissedBlock>> {
        let rows = sqlx::query_as::<_, MissedRow>(
            r#"
            SELECT chain_id, block_number, reason, recorded_at
            FROM missed_blocks
            WHERE chain_id = ?
            ORDER BY block_number
            LIMIT ? OFFSET ?
            "#
        )
        .bind(chain_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(MissedBlock {
                    chain_id: row.chain_id,
                    block_number: row.block_number as u64,
                    reason: row.reason,
                    recorded_at: millis_to_datetime(row.recorded_at)?,
                })
            })
            .collect()
    }

    pub async fn count_missed(pool: &sqlx::SqlitePool, chain_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM missed_blocks WHERE chain_id = ?"
        )
        .bind(chain_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
