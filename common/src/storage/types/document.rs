use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

use super::{document_chunk::DocumentChunk, document_metadata::DocumentMetadata};

/// Coarse classification of a page, derived from title/content keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Document,
    Meeting,
    Project,
    Documentation,
    Note,
    Bookmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

/// A multimedia block reference collected while rendering page content.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MultimediaRef {
    pub kind: String,
    pub url: Option<String>,
    pub caption: String,
    pub position: usize,
    pub block_id: Option<String>,
}

stored_object!(Document, "document", {
    notion_page_id: String,
    notion_database_id: String,
    title: String,
    content: String,
    content_embedding: Option<Vec<f32>>,
    summary_embedding: Option<Vec<f32>>,
    document_summary: Option<String>,
    page_url: String,
    notion_created_time: Option<String>,
    notion_last_edited_time: Option<String>,
    content_type: ContentType,
    is_chunked: bool,
    chunk_count: u32,
    token_count: u32,
    notion_properties: serde_json::Value,
    extracted_metadata: serde_json::Value,
    has_multimedia: bool,
    multimedia_refs: Vec<MultimediaRef>,
    processing_status: ProcessingStatus
});

impl Document {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notion_page_id: String,
        notion_database_id: String,
        title: String,
        content: String,
        token_count: u32,
        notion_properties: serde_json::Value,
        notion_created_time: Option<String>,
        notion_last_edited_time: Option<String>,
        multimedia_refs: Vec<MultimediaRef>,
    ) -> Self {
        let now = Utc::now();
        let page_url = format!(
            "https://www.notion.so/{}",
            notion_page_id.replace('-', "")
        );
        let content_type = Self::determine_content_type(&title, &content);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            notion_page_id,
            notion_database_id,
            title,
            content,
            content_embedding: None,
            summary_embedding: None,
            document_summary: None,
            page_url,
            notion_created_time,
            notion_last_edited_time,
            content_type,
            is_chunked: false,
            chunk_count: 0,
            token_count,
            notion_properties,
            extracted_metadata: serde_json::Value::Object(serde_json::Map::new()),
            has_multimedia: !multimedia_refs.is_empty(),
            multimedia_refs,
            processing_status: ProcessingStatus::Processing,
        }
    }

    /// Keyword heuristic over title and content. The title wins; URLs in the
    /// body only make a page a bookmark when nothing else matches.
    pub fn determine_content_type(title: &str, content: &str) -> ContentType {
        let title_lower = title.to_lowercase();
        let content_lower = content.to_lowercase();

        if ["meeting", "standup", "sync", "call"]
            .iter()
            .any(|keyword| title_lower.contains(keyword))
        {
            return ContentType::Meeting;
        }

        if ["project", "initiative", "roadmap"]
            .iter()
            .any(|keyword| title_lower.contains(keyword))
        {
            return ContentType::Project;
        }

        if ["doc", "guide", "manual", "howto", "readme"]
            .iter()
            .any(|keyword| title_lower.contains(keyword))
        {
            return ContentType::Documentation;
        }

        if ["note", "notes", "journal", "diary"]
            .iter()
            .any(|keyword| title_lower.contains(keyword))
        {
            return ContentType::Note;
        }

        if ["http", "https", "www."]
            .iter()
            .any(|keyword| content_lower.contains(keyword))
        {
            return ContentType::Bookmark;
        }

        ContentType::Document
    }

    pub async fn find_by_notion_page_id(
        notion_page_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE notion_page_id = $page_id")
            .bind(("table", Self::table_name()))
            .bind(("page_id", notion_page_id.to_string()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Delete the document and every row it owns in a single transaction so
    /// a reingest or webhook delete can never leave orphans behind.
    pub async fn delete_cascade(document_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "DELETE {chunk_table} WHERE document_id = $document_id;",
                chunk_table = DocumentChunk::table_name(),
            ))
            .query(format!(
                "DELETE {metadata_table} WHERE document_id = $document_id;",
                metadata_table = DocumentMetadata::table_name(),
            ))
            .query(format!(
                "DELETE type::thing('{document_table}', $document_id);",
                document_table = Self::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("document_id", document_id.to_string()))
            .await
            .map_err(AppError::Store)?;

        response.check().map_err(AppError::Store)?;

        Ok(())
    }

    /// Remove a page and all derived rows, keyed by the external page id.
    /// Missing pages are a no-op so webhook deletes stay idempotent.
    pub async fn delete_by_notion_page_id(
        notion_page_id: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        match Self::find_by_notion_page_id(notion_page_id, db).await? {
            Some(document) => {
                Self::delete_cascade(&document.id, db).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn set_status(
        document_id: &str,
        status: ProcessingStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET processing_status = $status, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("status", status))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::document_chunk::{ChunkPosition, ChunkType};
    use uuid::Uuid;

    fn sample_document(notion_page_id: &str) -> Document {
        Document::new(
            notion_page_id.to_string(),
            "db-1".to_string(),
            "Weekly notes".to_string(),
            "Some body text".to_string(),
            4,
            serde_json::json!({}),
            Some("2024-01-01T00:00:00.000Z".to_string()),
            Some("2024-02-01T00:00:00.000Z".to_string()),
            Vec::new(),
        )
    }

    #[test]
    fn test_content_type_heuristics() {
        assert_eq!(
            Document::determine_content_type("Team standup 2024-01-02", "agenda"),
            ContentType::Meeting
        );
        assert_eq!(
            Document::determine_content_type("Project roadmap", "milestones"),
            ContentType::Project
        );
        assert_eq!(
            Document::determine_content_type("Setup guide", "steps"),
            ContentType::Documentation
        );
        assert_eq!(
            Document::determine_content_type("Reading notes", "thoughts"),
            ContentType::Note
        );
        assert_eq!(
            Document::determine_content_type("Interesting", "see https://example.com"),
            ContentType::Bookmark
        );
        assert_eq!(
            Document::determine_content_type("Plain page", "plain text"),
            ContentType::Document
        );
    }

    #[test]
    fn test_page_url_strips_dashes() {
        let document = sample_document("abcd-1234-efgh");
        assert_eq!(document.page_url, "https://www.notion.so/abcd1234efgh");
        assert_eq!(document.processing_status, ProcessingStatus::Processing);
        assert!(!document.is_chunked);
    }

    #[tokio::test]
    async fn test_find_by_notion_page_id() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let document = sample_document("page-1");
        db.insert(document.clone()).await.expect("store");

        let found = Document::find_by_notion_page_id("page-1", &db)
            .await
            .expect("query");
        assert_eq!(found.map(|d| d.id), Some(document.id));

        let missing = Document::find_by_notion_page_id("page-absent", &db)
            .await
            .expect("query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_by_notion_page_id_cascades() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let document = sample_document("page-2");
        let document_id = document.id.clone();
        db.insert(document).await.expect("store document");

        for order in 0..3 {
            let chunk = DocumentChunk::new(
                document_id.clone(),
                "db-1".to_string(),
                order,
                format!("chunk {order}"),
                3,
                "context".to_string(),
                "summary".to_string(),
                String::new(),
                Vec::new(),
                ChunkType::Content,
                ChunkPosition::new(order as usize, 3),
                vec![0.1, 0.2, 0.3],
                vec![0.3, 0.2, 0.1],
            );
            db.insert(chunk).await.expect("store chunk");
        }

        let metadata = DocumentMetadata::text(document_id.clone(), "status", "published");
        db.insert(metadata).await.expect("store metadata");

        let deleted = Document::delete_by_notion_page_id("page-2", &db)
            .await
            .expect("delete");
        assert!(deleted);

        let documents = db
            .fetch_all::<Document>()
            .await
            .expect("fetch documents");
        assert!(documents.is_empty());

        let chunks = db
            .fetch_all::<DocumentChunk>()
            .await
            .expect("fetch chunks");
        assert!(chunks.is_empty());

        let metadata_rows = db
            .fetch_all::<DocumentMetadata>()
            .await
            .expect("fetch metadata");
        assert!(metadata_rows.is_empty());

        // Deleting an unknown page is a no-op, not an error.
        let deleted_again = Document::delete_by_notion_page_id("page-2", &db)
            .await
            .expect("delete again");
        assert!(!deleted_again);
    }

    #[tokio::test]
    async fn test_set_status() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let document = sample_document("page-3");
        let document_id = document.id.clone();
        db.insert(document).await.expect("store");

        Document::set_status(&document_id, ProcessingStatus::Completed, &db)
            .await
            .expect("update status");

        let row: Document = db
            .fetch(&document_id)
            .await
            .expect("fetch")
            .expect("row present");
        assert_eq!(row.processing_status, ProcessingStatus::Completed);
    }
}
