use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::Document,
            document_chunk::{ChunkWithContext, ContextualMatch, DocumentChunk},
            notion_database::FieldDefinition,
        },
    },
    utils::embedding::Embedder,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::{
    filters::{prepare_filters, SearchFilters},
    scoring::{final_score, sort_by_final_score_desc, BoostFactors, RerankSignals},
};

/// Tunable parameters for one retrieval pass.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub match_threshold: f32,
    pub candidate_multiplier: usize,
    pub enable_context_enrichment: bool,
    pub boosts: BoostFactors,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.1,
            candidate_multiplier: 2,
            enable_context_enrichment: true,
            boosts: BoostFactors::default(),
        }
    }
}

/// One search result, fully hydrated for the chat layer and the API.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page_url: String,
    pub content: String,
    pub enriched_content: String,
    pub combined_score: f32,
    pub final_score: f32,
    pub chunk_context: String,
    pub chunk_summary: String,
    pub document_section: String,
    pub has_adjacent_context: bool,
    pub metadata: serde_json::Value,
}

/// The retrieval pipeline: embed the query, run the blended vector search
/// with typed filters, enrich candidates with their neighbors, rerank and
/// truncate to `k`. An empty result is a normal outcome, not an error.
#[instrument(skip_all, fields(k = k))]
pub async fn search(
    db: &SurrealDbClient,
    embedder: &Embedder,
    field_definitions: &HashMap<String, FieldDefinition>,
    query: &str,
    filters: &SearchFilters,
    k: usize,
    config: &RetrievalConfig,
) -> Result<Vec<RetrievedChunk>, AppError> {
    if k == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Step 1: embed the query.
    let query_embedding = embedder.embed_one(query).await?;

    // Step 2: route request filters into typed store predicates.
    let typed = prepare_filters(filters, field_definitions);

    // Step 3: blended vector search, over-fetching for the rerank step.
    let candidate_count = k.saturating_mul(config.candidate_multiplier.max(1));
    let candidates = if typed.has_advanced() {
        debug!("using enhanced metadata search");
        DocumentChunk::enhanced_metadata_search(
            query_embedding,
            &typed,
            config.match_threshold,
            candidate_count,
            db,
        )
        .await?
    } else {
        DocumentChunk::match_contextual_chunks(
            query_embedding,
            typed.database_filter.clone(),
            config.match_threshold,
            candidate_count,
            db,
        )
        .await?
    };

    if candidates.is_empty() {
        info!("retrieval produced no candidates");
        return Ok(Vec::new());
    }

    // Hydrate owning documents for titles and URLs.
    let documents = hydrate_documents(db, &candidates).await;

    // Step 4: adjacent enrichment, one concurrent lookup per candidate.
    let enriched = if config.enable_context_enrichment {
        join_all(
            candidates
                .iter()
                .map(|candidate| enrich_candidate(db, candidate)),
        )
        .await
    } else {
        candidates
            .iter()
            .map(|candidate| (candidate.chunk.content.clone(), false))
            .collect()
    };

    // Step 5: rerank with additive boosts and truncate.
    let mut results: Vec<RetrievedChunk> = candidates
        .into_iter()
        .zip(enriched)
        .map(|(candidate, (enriched_content, has_adjacent_context))| {
            let document = documents.get(&candidate.chunk.document_id);
            build_result(candidate, enriched_content, has_adjacent_context, document, config)
        })
        .collect();

    sort_by_final_score_desc(&mut results, |result| {
        (result.final_score, result.chunk_id.as_str())
    });
    results.truncate(k);

    info!(results = results.len(), "retrieval pipeline finished");
    Ok(results)
}

async fn hydrate_documents(
    db: &SurrealDbClient,
    candidates: &[ContextualMatch],
) -> HashMap<String, Document> {
    let mut ids: Vec<String> = candidates
        .iter()
        .map(|candidate| candidate.chunk.document_id.clone())
        .collect();
    ids.sort();
    ids.dedup();

    let fetched = join_all(ids.iter().map(|id| db.fetch::<Document>(id))).await;

    ids.into_iter()
        .zip(fetched)
        .filter_map(|(id, document)| match document {
            Ok(Some(document)) => Some((id, document)),
            Ok(None) => None,
            Err(err) => {
                warn!(document_id = %id, error = %err, "failed to hydrate document");
                None
            }
        })
        .collect()
}

/// Neighbor lookup with per-chunk fallback: an RPC failure degrades the one
/// candidate to its own content instead of failing the query.
async fn enrich_candidate(db: &SurrealDbClient, candidate: &ContextualMatch) -> (String, bool) {
    match DocumentChunk::get_chunk_with_context(&candidate.chunk.id, true, db).await {
        Ok(context) => (compose_enriched_content(&context), true),
        Err(err) => {
            warn!(
                chunk_id = %candidate.chunk.id,
                error = %err,
                "adjacent enrichment failed, falling back to chunk content"
            );
            (candidate.chunk.content.clone(), false)
        }
    }
}

/// `[Previous: …] / [Context: …] / content / [Following: …]`, omitting any
/// section whose source is missing.
fn compose_enriched_content(context: &ChunkWithContext) -> String {
    let mut parts = Vec::new();

    if let Some(prev) = &context.prev {
        if !prev.chunk_summary.is_empty() {
            parts.push(format!("[Previous: {}]", prev.chunk_summary));
        }
    }
    if !context.main.chunk_context.is_empty() {
        parts.push(format!("[Context: {}]", context.main.chunk_context));
    }
    parts.push(context.main.content.clone());
    if let Some(next) = &context.next {
        if !next.chunk_summary.is_empty() {
            parts.push(format!("[Following: {}]", next.chunk_summary));
        }
    }

    parts.join("\n\n")
}

fn build_result(
    candidate: ContextualMatch,
    enriched_content: String,
    has_adjacent_context: bool,
    document: Option<&Document>,
    config: &RetrievalConfig,
) -> RetrievedChunk {
    let chunk = candidate.chunk;
    let signals = RerankSignals {
        has_context: !chunk.chunk_context.is_empty(),
        has_summary: !chunk.chunk_summary.is_empty(),
        has_adjacent_context,
        has_section: !chunk.document_section.is_empty(),
    };
    let final_score = final_score(candidate.combined_score, signals, config.boosts);

    let metadata = json!({
        "chunk_order": chunk.chunk_order,
        "chunk_type": chunk.chunk_type,
        "section_hierarchy": chunk.section_hierarchy,
        "chunk_position_metadata": chunk.chunk_position_metadata,
        "content_similarity": candidate.content_similarity,
        "contextual_similarity": candidate.contextual_similarity,
    });

    RetrievedChunk {
        chunk_id: chunk.id,
        document_id: chunk.document_id,
        document_title: document.map(|d| d.title.clone()).unwrap_or_default(),
        page_url: document.map(|d| d.page_url.clone()).unwrap_or_default(),
        content: chunk.content,
        enriched_content,
        combined_score: candidate.combined_score,
        final_score,
        chunk_context: chunk.chunk_context,
        chunk_summary: chunk.chunk_summary,
        document_section: chunk.document_section,
        has_adjacent_context,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{
        indexes::ensure_runtime_indexes,
        types::{
            document_chunk::{ChunkPosition, ChunkType},
            document_metadata::DocumentMetadata,
            notion_database::FieldType,
        },
    };
    use uuid::Uuid;

    const DIMENSIONS: u32 = 64;

    async fn setup() -> (SurrealDbClient, Embedder) {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("initialize schema");
        ensure_runtime_indexes(&db, DIMENSIONS as usize)
            .await
            .expect("build runtime indexes");

        (db, Embedder::new_hashed(DIMENSIONS))
    }

    async fn store_document(db: &SurrealDbClient, page_id: &str, title: &str) -> String {
        let document = Document::new(
            page_id.to_string(),
            "db1".to_string(),
            title.to_string(),
            "full text".to_string(),
            3,
            json!({}),
            None,
            None,
            Vec::new(),
        );
        let id = document.id.clone();
        db.insert(document).await.expect("store document");
        id
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_chunk(
        db: &SurrealDbClient,
        embedder: &Embedder,
        document_id: &str,
        order: u32,
        content: &str,
        context: &str,
        summary: &str,
        section: &str,
    ) -> DocumentChunk {
        let embedding = embedder.embed_one(content).await.expect("embed");
        let contextual_input = if context.is_empty() {
            content.to_string()
        } else {
            format!("{context}\n\n{content}")
        };
        let contextual_embedding = embedder
            .embed_one(&contextual_input)
            .await
            .expect("embed contextual");

        let chunk = DocumentChunk::new(
            document_id.to_string(),
            "db1".to_string(),
            order,
            content.to_string(),
            10,
            context.to_string(),
            summary.to_string(),
            section.to_string(),
            Vec::new(),
            ChunkType::Content,
            ChunkPosition::new(order as usize, 3),
            embedding,
            contextual_embedding,
        );
        db.insert(chunk.clone()).await.expect("store chunk");
        chunk
    }

    fn status_definitions() -> HashMap<String, FieldDefinition> {
        HashMap::from([(
            "status".to_string(),
            FieldDefinition {
                field_type: FieldType::Select,
                notion_name: "Status".to_string(),
                filterable: true,
            },
        )])
    }

    #[tokio::test]
    async fn test_empty_store_returns_no_results() {
        let (db, embedder) = setup().await;

        let results = search(
            &db,
            &embedder,
            &HashMap::new(),
            "anything at all",
            &SearchFilters::default(),
            5,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_chunk_first_and_hydrates_document() {
        let (db, embedder) = setup().await;

        let doc_id = store_document(&db, "page-1", "Rust guide").await;
        store_chunk(
            &db,
            &embedder,
            &doc_id,
            0,
            "an introduction to the rust borrow checker",
            "Covers rust ownership.",
            "Borrowing basics.",
            "Introduction",
        )
        .await;
        store_chunk(
            &db,
            &embedder,
            &doc_id,
            1,
            "completely unrelated cooking recipe for pancakes",
            "Covers cooking.",
            "Pancake recipe.",
            "Cooking",
        )
        .await;

        let results = search(
            &db,
            &embedder,
            &HashMap::new(),
            "rust borrow checker introduction",
            &SearchFilters::default(),
            5,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert!(!results.is_empty());
        assert!(results[0].content.contains("borrow checker"));
        assert_eq!(results[0].document_title, "Rust guide");
        assert!(results[0].page_url.contains("notion.so"));
        assert!(results[0].final_score >= results[0].combined_score);
        for pair in results.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }

    #[tokio::test]
    async fn test_enriched_content_includes_neighbor_summaries() {
        let (db, embedder) = setup().await;

        let doc_id = store_document(&db, "page-2", "Pipeline docs").await;
        for (order, content) in [
            "stage one fetches pages from the source",
            "stage two chunks the fetched pages into pieces",
            "stage three embeds the chunk pieces",
        ]
        .iter()
        .enumerate()
        {
            store_chunk(
                &db,
                &embedder,
                &doc_id,
                u32::try_from(order).expect("small"),
                content,
                &format!("Context for stage {order}."),
                &format!("Summary of stage {order}."),
                "Stages",
            )
            .await;
        }
        DocumentChunk::link_sequence(&doc_id, &db)
            .await
            .expect("link");

        let results = search(
            &db,
            &embedder,
            &HashMap::new(),
            "stage two chunks the fetched pages",
            &SearchFilters::default(),
            1,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 1);
        let top = &results[0];
        assert!(top.has_adjacent_context);
        assert!(top.enriched_content.contains("[Previous: Summary of stage 0.]"));
        assert!(top.enriched_content.contains("[Context: Context for stage 1.]"));
        assert!(top
            .enriched_content
            .contains("stage two chunks the fetched pages"));
        assert!(top.enriched_content.contains("[Following: Summary of stage 2.]"));
    }

    #[tokio::test]
    async fn test_metadata_filter_restricts_to_matching_document() {
        let (db, embedder) = setup().await;

        let published = store_document(&db, "page-pub", "Published doc").await;
        let draft = store_document(&db, "page-draft", "Draft doc").await;

        db.insert(DocumentMetadata::text(published.clone(), "status", "published"))
            .await
            .expect("store metadata");
        db.insert(DocumentMetadata::text(draft.clone(), "status", "draft"))
            .await
            .expect("store metadata");

        store_chunk(
            &db,
            &embedder,
            &published,
            0,
            "introduction to the topic in the published document",
            "ctx",
            "sum",
            "Intro",
        )
        .await;
        store_chunk(
            &db,
            &embedder,
            &draft,
            0,
            "introduction to the topic in the draft document",
            "ctx",
            "sum",
            "Intro",
        )
        .await;

        let filters = SearchFilters {
            database_ids: vec!["db1".to_string()],
            metadata_filters: vec![crate::filters::MetadataFilter {
                field_name: "status".to_string(),
                operator: crate::filters::FilterOperator::Equals,
                values: vec!["published".to_string()],
            }],
            ..SearchFilters::default()
        };

        let results = search(
            &db,
            &embedder,
            &status_definitions(),
            "introduction",
            &filters,
            10,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.document_id == published));
    }

    #[tokio::test]
    async fn test_context_boost_wins_tie_on_identical_scores() {
        let (db, embedder) = setup().await;

        let doc_id = store_document(&db, "page-3", "Tied doc").await;
        // Identical vectors so the combined scores tie exactly; only one
        // carries generated context/summary/section.
        let content = "identical chunk text for the tie";
        let vector = embedder.embed_one(content).await.expect("embed");

        let mut boosted = DocumentChunk::new(
            doc_id.clone(),
            "db1".to_string(),
            0,
            content.to_string(),
            8,
            "Some context.".to_string(),
            "Some summary.".to_string(),
            "Section".to_string(),
            Vec::new(),
            ChunkType::Content,
            ChunkPosition::new(0, 2),
            vector.clone(),
            vector.clone(),
        );
        // Deterministic id ordering so the tiebreaker cannot mask the boost.
        boosted.id = "chunk-b".to_string();
        let mut plain = DocumentChunk::new(
            doc_id.clone(),
            "db1".to_string(),
            1,
            content.to_string(),
            8,
            String::new(),
            String::new(),
            String::new(),
            Vec::new(),
            ChunkType::Content,
            ChunkPosition::new(1, 2),
            vector.clone(),
            vector,
        );
        plain.id = "chunk-a".to_string();
        db.insert(boosted.clone()).await.expect("store boosted");
        db.insert(plain.clone()).await.expect("store plain");

        let results = search(
            &db,
            &embedder,
            &HashMap::new(),
            "identical chunk text for the tie",
            &SearchFilters::default(),
            2,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, boosted.id);
        assert_eq!(results[1].chunk_id, plain.id);
        assert!(results[0].final_score > results[1].final_score);
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let (db, embedder) = setup().await;

        let doc_id = store_document(&db, "page-4", "Many chunks").await;
        for order in 0..6u32 {
            store_chunk(
                &db,
                &embedder,
                &doc_id,
                order,
                &format!("shared topic words plus variation {order}"),
                "ctx",
                "sum",
                "S",
            )
            .await;
        }

        let results = search(
            &db,
            &embedder,
            &HashMap::new(),
            "shared topic words",
            &SearchFilters::default(),
            3,
            &RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 3);
    }
}
