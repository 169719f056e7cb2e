use axum::{extract::State, Json};
use common::{error::AppError, storage::types::document::Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub success: bool,
}

/// Page-source events: create/update reingests through the pipeline,
/// delete (or archive) cascades the document away.
pub async fn webhook_handler(
    State(state): State<ApiState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if payload.object != "page" {
        return Ok(Json(WebhookResponse { success: true }));
    }

    let page_id = payload.data["id"]
        .as_str()
        .ok_or_else(|| ApiError::bad_request("webhook payload without page id"))?
        .to_string();

    match payload.event_type.as_str() {
        "deleted" => {
            let deleted = state.pipeline.delete_page(&page_id).await?;
            info!(page_id, deleted, "webhook delete handled");
        }
        "created" | "updated" => {
            if payload.data["archived"].as_bool() == Some(true) {
                let deleted = state.pipeline.delete_page(&page_id).await?;
                info!(page_id, deleted, "archived page removed");
            } else {
                let database_id = resolve_database_id(&state, &page_id, &payload.data).await?;
                let Some(database) = state.databases.database(&database_id) else {
                    return Err(ApiError::bad_request(format!(
                        "no configured database for page {page_id}"
                    )));
                };

                let outcome = state.pipeline.ingest_page_by_id(database, &page_id).await?;
                info!(
                    page_id,
                    document_id = %outcome.document_id,
                    chunks = outcome.chunks_created,
                    "webhook reingest handled"
                );
            }
        }
        other => {
            warn!(event_type = other, "ignoring unknown webhook event type");
        }
    }

    Ok(Json(WebhookResponse { success: true }))
}

/// A known page tells us its database; otherwise trust the payload's parent.
async fn resolve_database_id(
    state: &ApiState,
    page_id: &str,
    data: &Value,
) -> Result<String, AppError> {
    if let Some(existing) = Document::find_by_notion_page_id(page_id, &state.db).await? {
        return Ok(existing.notion_database_id);
    }

    data["parent"]["database_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("cannot resolve database for page {page_id}")))
}
