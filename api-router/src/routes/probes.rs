use axum::{extract::State, http::StatusCode};

use crate::api_state::ApiState;

/// Process is up.
pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// Process can reach the store.
pub async fn ready(State(state): State<ApiState>) -> StatusCode {
    match state.db.client.query("RETURN 1").await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            tracing::error!(error = %err, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
