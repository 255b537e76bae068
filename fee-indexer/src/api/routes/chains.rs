//! Chain status, gap and block listing routes

use axum::{
    Router,
    routing::get,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::ApiState;
use crate::api::routes::fees::parse_height_range;
use crate::database::queries::{CursorQueries, FeeQueries};
use crate::error::{IndexerError, Result};
use crate::models::{BlockRecord, ChainStatus, MissedBlocksPage};

/// Largest height span `/blocks` returns in one request.
pub const MAX_BLOCKS_PER_REQUEST: u64 = 1000;

#[derive(Deserialize)]
struct PaginationParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Deserialize)]
struct HeightParams {
    start_height: Option<String>,
    end_height: Option<String>,
}

pub fn routes(state: ApiState) -> Router {
    Router::new()
        .route("/chains", get(list_chains))
        .route("/chains/:chain_id/missed", get(list_missed_blocks))
        .route("/chains/:chain_id/blocks", get(list_blocks))
        .with_state(state)
}

#[axum::debug_handler]
async fn list_chains(State(state): State<ApiState>) -> Result<Json<Vec<ChainStatus>>> {
    let cursors = CursorQueries::list(state.database.pool()).await?;

    let chains = state
        .chains
        .iter()
        .map(|chain| {
            let cursor = cursors.iter().find(|c| c.chain_id == chain.chain_id);
            ChainStatus {
                chain_id: chain.chain_id.clone(),
                fee_mode: chain.fee_mode.to_string(),
                last_indexed_height: cursor.map(|c| c.last_indexed_height),
                updated_at: cursor.map(|c| c.updated_at),
            }
        })
        .collect();

    Ok(Json(chains))
}

#[axum::debug_handler]
async fn list_missed_blocks(
    State(state): State<ApiState>,
    Path(chain_id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<MissedBlocksPage>> {
    let chain = state.chain(&chain_id)?;
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);
    let pool = state.database.pool();

    let missed = CursorQueries::missed_blocks(pool, &chain.chain_id, limit, offset).await?;
    let total = CursorQueries::count_missed(pool, &chain.chain_id).await?;

    Ok(Json(MissedBlocksPage {
        chain_id: chain.chain_id.clone(),
        total,
        limit,
        offset,
        missed,
    }))
}

#[axum::debug_handler]
async fn list_blocks(
    State(state): State<ApiState>,
    Path(chain_id): Path<String>,
    Query(params): Query<HeightParams>,
) -> Result<Json<Vec<BlockRecord>>> {
    let chain = state.chain(&chain_id)?;
    let (start, end) = parse_height_range(params.start_height, params.end_height)?;
    if end - start >= MAX_BLOCKS_PER_REQUEST {
        return Err(IndexerError::InvalidInput(format!(
            "At most {} blocks can be requested at once",
            MAX_BLOCKS_PER_REQUEST
        )));
    }

    let blocks = FeeQueries::blocks_by_height(state.database.pool(), &chain.chain_id, start, end).await?;
    Ok(Json(blocks))
}
