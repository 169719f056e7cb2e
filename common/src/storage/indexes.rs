use crate::error::AppError;

use super::db::SurrealDbClient;

/// (Re)define the HNSW indexes whose dimension is only known once the
/// embedding model configuration has been loaded. Idempotent; safe to run
/// at every startup and in tests with small dimensions.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    db.client
        .query(format!(
            "DEFINE INDEX OVERWRITE idx_chunk_embedding ON TABLE document_chunk FIELDS embedding HNSW DIMENSION {embedding_dimension}"
        ))
        .await?;
    db.client
        .query(format!(
            "DEFINE INDEX OVERWRITE idx_chunk_contextual_embedding ON TABLE document_chunk FIELDS contextual_embedding HNSW DIMENSION {embedding_dimension}"
        ))
        .await?;

    Ok(())
}
