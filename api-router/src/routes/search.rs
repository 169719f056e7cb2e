use axum::{extract::State, Json};
use retrieval_pipeline::{RetrievedChunk, SearchFilters};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: SearchFilters,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<RetrievedChunk>,
    pub query: String,
    pub total: usize,
}

pub async fn search_handler(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let limit = request.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let results = retrieval_pipeline::search(
        &state.db,
        &state.embedder,
        &state.field_definitions,
        &request.query,
        &request.filters,
        limit,
        &state.retrieval,
    )
    .await?;

    info!(results = results.len(), "search request served");

    let total = results.len();
    Ok(Json(SearchResponse {
        results,
        query: request.query,
        total,
    }))
}
