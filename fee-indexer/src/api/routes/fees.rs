//! Fee aggregation routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::ApiState;
use crate::database::queries::FeeQueries;
use crate::error::{IndexerError, Result};
use crate::fees::{FeeMode, FeeTotals};
use crate::models::{FeeAmount, FeeSummary, QueryRange};

/// Raw range bounds. Values are parsed by hand so malformed bounds get the
/// same JSON error body as every other client error.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub start_height: Option<String>,
    pub end_height: Option<String>,
}

impl RangeParams {
    /// Exactly one of the two range forms, with both bounds and `start <= end`.
    pub fn into_range(self) -> Result<QueryRange> {
        let has_time = self.start_time.is_some() || self.end_time.is_some();
        let has_height = self.start_height.is_some() || self.end_height.is_some();

        match (has_time, has_height) {
            (true, true) => Err(IndexerError::InvalidInput(
                "Supply either a time range or a height range, not both".to_string(),
            )),
            (false, false) => Err(IndexerError::InvalidInput(
                "A time range (start_time, end_time) or a height range (start_height, end_height) is required".to_string(),
            )),
            (true, false) => {
                let start = parse_time("start_time", self.start_time)?;
                let end = parse_time("end_time", self.end_time)?;
                if start > end {
                    return Err(IndexerError::InvalidInput("start_time must not be after end_time".to_string()));
                }
                Ok(QueryRange::Time { start, end })
            }
            (false, true) => {
                let (start, end) = parse_height_range(self.start_height, self.end_height)?;
                Ok(QueryRange::Height { start, end })
            }
        }
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| IndexerError::InvalidInput(format!("{} is required", name)))
}

fn parse_time(name: &str, value: Option<String>) -> Result<DateTime<Utc>> {
    let value = required(name, value)?;
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| IndexerError::InvalidInput(format!("{} must be an RFC 3339 timestamp", name)))
}

fn parse_height(name: &str, value: Option<String>) -> Result<u64> {
    let value = required(name, value)?;
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| IndexerError::InvalidInput(format!("{} must be a non-negative integer", name)))
}

/// Parses `start_height`/`end_height`, rejecting a reversed range.
pub(crate) fn parse_height_range(start: Option<String>, end: Option<String>) -> Result<(u64, u64)> {
    let start = parse_height("start_height", start)?;
    let end = parse_height("end_height", end)?;
    if start > end {
        return Err(IndexerError::InvalidInput("start_height must not be after end_height".to_string()));
    }
    Ok((start, end))
}

/// Totals as a list. A single-denomination chain always reports its denom.
pub fn fee_amounts(totals: &FeeTotals, mode: &FeeMode) -> Vec<FeeAmount> {
    match mode {
        FeeMode::Single(denom) => vec![FeeAmount {
            denom: denom.clone(),
            amount: totals.get(denom).map(|a| a.to_plain_string()).unwrap_or_else(|| "0".to_string()),
        }],
        FeeMode::Multi => totals
            .iter()
            .map(|(denom, amount)| FeeAmount {
                denom: denom.to_string(),
                amount: amount.to_plain_string(),
            })
            .collect(),
    }
}

pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/chains/:chain_id/fees", get(get_chain_fees))
        .with_state(state)
}

#[axum::debug_handler]
async fn get_chain_fees(
    State(state): State<ApiState>,
    Path(chain_id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<FeeSummary>> {
    let chain = state.chain(&chain_id)?;
    let range = params.into_range()?;
    let pool = state.database.pool();

    let aggregate = match &range {
        QueryRange::Time { start, end } => FeeQueries::sum_by_time(pool, &chain.chain_id, *start, *end).await?,
        QueryRange::Height { start, end } => FeeQueries::sum_by_height(pool, &chain.chain_id, *start, *end).await?,
    };

    Ok(Json(FeeSummary {
        chain_id: chain.chain_id.clone(),
        range,
        block_count: aggregate.block_count,
        totals: fee_amounts(&aggregate.totals, &chain.fee_mode),
    }))
}
