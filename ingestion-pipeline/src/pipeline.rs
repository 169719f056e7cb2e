use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, ProcessingStatus},
            document_chunk::DocumentChunk,
            notion_database::NotionDatabase,
        },
    },
    utils::{
        config::DatabaseConfig, embedding::Embedder, llm::ChatCompleter, tokenizer::count_tokens,
    },
};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::{
    chunker::Chunker,
    enricher::ContextEnricher,
    llm_instructions::{document_summary_prompt, truncate_chars, DOCUMENT_SUMMARY_SYSTEM_MESSAGE},
    metadata::extract_document_metadata,
    notion::{extract_title, NotionClient},
};

/// Per-database sync outcome.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestReport {
    pub database_id: String,
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub skipped_pages: usize,
    pub errors: Vec<PageError>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PageError {
    pub page_id: String,
    pub title: String,
    pub error: String,
}

/// Result of one successfully processed page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub document_id: String,
    pub chunks_created: usize,
}

/// Orchestrates fetch → chunk → enrich → embed → store for one database's
/// pages. Failures isolate at page granularity; a failed page never poisons
/// the rest of its batch.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<Embedder>,
    chat: Arc<dyn ChatCompleter>,
    enricher: ContextEnricher,
    notion: Arc<NotionClient>,
    max_embedding_tokens: usize,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<Embedder>,
        chat: Arc<dyn ChatCompleter>,
        notion: Arc<NotionClient>,
        max_embedding_tokens: usize,
    ) -> Self {
        let enricher = ContextEnricher::new(Arc::clone(&chat));
        Self {
            db,
            embedder,
            chat,
            enricher,
            notion,
            max_embedding_tokens,
        }
    }

    /// Sync every page of a configured database: register the database,
    /// fetch its pages, process them in paced batches, stamp the sync time.
    #[instrument(skip_all, fields(database_id = %database.database_id))]
    pub async fn ingest_database(&self, database: &DatabaseConfig) -> Result<IngestReport, AppError> {
        let schema = match self.notion.get_database(&database.database_id).await {
            Ok(schema) => schema,
            Err(err) => {
                warn!(error = %err, "failed to fetch remote database schema, continuing without it");
                json!({})
            }
        };

        let registration = NotionDatabase::new(
            database.database_id.clone(),
            database.name.clone(),
            schema,
            database.fields.clone(),
        );
        NotionDatabase::upsert(registration, &self.db).await?;

        let pages = self.notion.get_database_pages(&database.database_id).await?;

        let mut report = IngestReport {
            database_id: database.database_id.clone(),
            total_pages: pages.len(),
            ..IngestReport::default()
        };

        let batch_size = database.sync.batch_size.max(1);
        let batches: Vec<&[Value]> = pages.chunks(batch_size).collect();
        let batch_count = batches.len();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            for page in batch {
                if page["archived"].as_bool() == Some(true) {
                    report.skipped_pages = report.skipped_pages.saturating_add(1);
                    continue;
                }

                match self.ingest_page(database, page).await {
                    Ok(outcome) => {
                        report.processed_pages = report.processed_pages.saturating_add(1);
                        info!(
                            page_id = page["id"].as_str().unwrap_or_default(),
                            document_id = %outcome.document_id,
                            chunks = outcome.chunks_created,
                            "page ingested"
                        );
                    }
                    Err(err) => {
                        report.failed_pages = report.failed_pages.saturating_add(1);
                        let page_id = page["id"].as_str().unwrap_or_default().to_string();
                        warn!(page_id = %page_id, error = %err, "page ingest failed");
                        report.errors.push(PageError {
                            page_id,
                            title: extract_title(page),
                            error: err.to_string(),
                        });
                    }
                }
            }

            if batch_index.saturating_add(1) < batch_count {
                sleep(Duration::from_millis(database.sync.rate_limit_delay_ms)).await;
            }
        }

        NotionDatabase::mark_synced(&database.database_id, &self.db).await?;

        info!(
            total = report.total_pages,
            processed = report.processed_pages,
            failed = report.failed_pages,
            skipped = report.skipped_pages,
            "database sync finished"
        );

        Ok(report)
    }

    /// Fetch one page's content and run it through the processing steps.
    pub async fn ingest_page(
        &self,
        database: &DatabaseConfig,
        page: &Value,
    ) -> Result<PageOutcome, AppError> {
        let page_id = page["id"]
            .as_str()
            .ok_or_else(|| AppError::Notion("page object without an id".into()))?;

        let title = extract_title(page);
        let (content, multimedia) = self.notion.get_page_content_with_multimedia(page_id).await?;

        self.process_page(database, page, &title, &content, multimedia)
            .await
    }

    /// Re-fetch a page by id (webhook path) and reingest it.
    pub async fn ingest_page_by_id(
        &self,
        database: &DatabaseConfig,
        page_id: &str,
    ) -> Result<PageOutcome, AppError> {
        let page = self.notion.get_page(page_id).await?;
        self.ingest_page(database, &page).await
    }

    /// Core per-page processing with content already in hand. Reingesting a
    /// page drops all of its previous rows first; this is the only edit
    /// path.
    #[instrument(skip_all, fields(page_id = page["id"].as_str().unwrap_or_default(), title = %title))]
    pub async fn process_page(
        &self,
        database: &DatabaseConfig,
        page: &Value,
        title: &str,
        content: &str,
        multimedia: Vec<common::storage::types::document::MultimediaRef>,
    ) -> Result<PageOutcome, AppError> {
        let page_id = page["id"]
            .as_str()
            .ok_or_else(|| AppError::Notion("page object without an id".into()))?;

        if let Some(existing) = Document::find_by_notion_page_id(page_id, &self.db).await? {
            info!(document_id = %existing.id, "reingesting page, dropping previous rows");
            Document::delete_cascade(&existing.id, &self.db).await?;
        }

        let full_text = format!("{title}\n{content}");
        let content_tokens = count_tokens(&full_text)?;

        let mut document = Document::new(
            page_id.to_string(),
            page["parent"]["database_id"]
                .as_str()
                .unwrap_or(&database.database_id)
                .to_string(),
            title.to_string(),
            content.to_string(),
            u32::try_from(content_tokens).unwrap_or(u32::MAX),
            page["properties"].clone(),
            page["created_time"].as_str().map(str::to_string),
            page["last_edited_time"].as_str().map(str::to_string),
            multimedia,
        );

        // Embed the whole page when it fits the provider cap, otherwise
        // embed an LLM summary (or a truncation when the summary call
        // fails).
        if content_tokens <= self.max_embedding_tokens {
            document.content_embedding = Some(self.embedder.embed_one(&full_text).await?);
        } else {
            match self
                .chat
                .complete(
                    DOCUMENT_SUMMARY_SYSTEM_MESSAGE,
                    &document_summary_prompt(title, content),
                )
                .await
            {
                Ok(summary) if !summary.trim().is_empty() => {
                    let summary = summary.trim().to_string();
                    let vector = self
                        .embedder
                        .embed_one(&format!("{title}\n{summary}"))
                        .await?;
                    document.content_embedding = Some(vector.clone());
                    document.summary_embedding = Some(vector);
                    if let Some(extracted) = document.extracted_metadata.as_object_mut() {
                        extracted.insert("ai_generated_summary".to_string(), json!(summary));
                    }
                    document.document_summary = Some(summary);
                }
                Ok(_) | Err(_) => {
                    warn!("document summary failed, embedding truncated content instead");
                    let fallback = format!("{title}\n{}", truncate_chars(content, 4000));
                    document.content_embedding = Some(self.embedder.embed_one(&fallback).await?);
                }
            }
        }

        let metadata_rows =
            extract_document_metadata(&document.id, &page["properties"], database);

        let chunker = Chunker::new(&database.sync);
        let chunk_rows = if content_tokens <= chunker.max_tokens() {
            Vec::new()
        } else {
            self.build_chunks(&chunker, &document, title, content).await?
        };

        document.is_chunked = !chunk_rows.is_empty();
        document.chunk_count = u32::try_from(chunk_rows.len()).unwrap_or(u32::MAX);
        let chunks_created = chunk_rows.len();
        let document_id = document.id.clone();

        // The row is written `processing` first; it only flips to
        // `completed` after chunks, links and metadata all exist.
        self.db.insert(document).await?;

        let write_result = self
            .persist_derived_rows(&document_id, chunk_rows, metadata_rows)
            .await;

        if let Err(err) = write_result {
            Document::set_status(&document_id, ProcessingStatus::Failed, &self.db).await?;
            return Err(err);
        }

        Document::set_status(&document_id, ProcessingStatus::Completed, &self.db).await?;

        Ok(PageOutcome {
            document_id,
            chunks_created,
        })
    }

    async fn build_chunks(
        &self,
        chunker: &Chunker,
        document: &Document,
        title: &str,
        content: &str,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let drafts = chunker.chunk(title, content)?;
        if drafts.is_empty() {
            return Err(AppError::Processing(format!(
                "no chunks produced for oversized page '{title}'"
            )));
        }

        let summary_for_context = match &document.document_summary {
            Some(summary) => summary.clone(),
            None => self.enricher.document_summary(title, content).await,
        };

        let enriched = self
            .enricher
            .enrich(title, &summary_for_context, drafts)
            .await;

        let contents: Vec<String> = enriched.iter().map(|c| c.draft.content.clone()).collect();
        let contextuals: Vec<String> = enriched
            .iter()
            .map(|c| c.contextual_content.clone())
            .collect();

        let content_vectors = self.embedder.embed_batch(&contents).await?;
        let contextual_vectors = self.embedder.embed_batch(&contextuals).await?;

        let rows = enriched
            .into_iter()
            .zip(content_vectors)
            .zip(contextual_vectors)
            .map(|((chunk, embedding), contextual_embedding)| {
                DocumentChunk::new(
                    document.id.clone(),
                    document.notion_database_id.clone(),
                    u32::try_from(chunk.draft.index).unwrap_or(u32::MAX),
                    chunk.draft.content,
                    u32::try_from(chunk.draft.token_count).unwrap_or(u32::MAX),
                    chunk.chunk_context,
                    chunk.chunk_summary,
                    chunk.draft.section_title,
                    chunk.draft.hierarchy,
                    chunk.draft.chunk_type,
                    chunk.position,
                    embedding,
                    contextual_embedding,
                )
            })
            .collect();

        Ok(rows)
    }

    /// Chunks first, then the link pass, then metadata. Called after the
    /// document row exists; the caller flips the status afterwards.
    async fn persist_derived_rows(
        &self,
        document_id: &str,
        chunk_rows: Vec<DocumentChunk>,
        metadata_rows: Vec<common::storage::types::document_metadata::DocumentMetadata>,
    ) -> Result<(), AppError> {
        let had_chunks = !chunk_rows.is_empty();

        for chunk in chunk_rows {
            self.db.insert(chunk).await?;
        }
        if had_chunks {
            DocumentChunk::link_sequence(document_id, &self.db).await?;
        }

        for row in metadata_rows {
            self.db.insert(row).await?;
        }

        Ok(())
    }

    /// Webhook delete path: cascade away everything derived from the page.
    pub async fn delete_page(&self, notion_page_id: &str) -> Result<bool, AppError> {
        Document::delete_by_notion_page_id(notion_page_id, &self.db).await
    }
}
