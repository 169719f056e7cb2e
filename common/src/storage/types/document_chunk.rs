#![allow(clippy::missing_docs_in_private_items)]
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

use super::document::ContentType;

/// Structural role of a chunk within its source page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Content,
    Header,
    Section,
    Notes,
    Highlight,
    Documentation,
}

/// Positional metadata carried by every chunk row.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChunkPosition {
    pub index: usize,
    pub total: usize,
    pub is_first: bool,
    pub is_last: bool,
    pub relative_position: f32,
}

impl ChunkPosition {
    pub fn new(index: usize, total: usize) -> Self {
        let span = total.saturating_sub(1).max(1);
        #[allow(clippy::cast_precision_loss)]
        let relative_position = index as f32 / span as f32;
        Self {
            index,
            total,
            is_first: index == 0,
            is_last: index.saturating_add(1) == total,
            relative_position,
        }
    }
}

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    notion_database_id: String,
    chunk_order: u32,
    content: String,
    token_count: u32,
    chunk_context: String,
    chunk_summary: String,
    document_section: String,
    section_hierarchy: Vec<String>,
    chunk_type: ChunkType,
    chunk_position_metadata: ChunkPosition,
    embedding: Vec<f32>,
    contextual_embedding: Vec<f32>,
    prev_chunk_id: Option<String>,
    next_chunk_id: Option<String>
});

/// Row returned by the blended contextual search: the chunk plus both
/// similarity signals and the store-computed blend.
#[derive(Debug, Clone)]
pub struct ContextualMatch {
    pub chunk: DocumentChunk,
    pub content_similarity: f32,
    pub contextual_similarity: f32,
    pub combined_score: f32,
}

/// Row returned by the baseline cosine search.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// A chunk resolved together with its linked neighbors.
#[derive(Debug, Clone)]
pub struct ChunkWithContext {
    pub main: DocumentChunk,
    pub prev: Option<DocumentChunk>,
    pub next: Option<DocumentChunk>,
}

/// Numeric predicate for one promoted number field.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NumberFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub equals: Option<f64>,
}

/// Date window applied to the remote last-edited timestamp (ISO-8601
/// strings compare lexicographically).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DateRangeFilter {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Typed predicate slots accepted by `enhanced_metadata_search`. The filter
/// processor in the retrieval pipeline routes request filters into these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedFilters {
    pub database_filter: Option<Vec<String>>,
    pub content_type_filter: Option<Vec<ContentType>>,
    pub date_range_filter: Option<DateRangeFilter>,
    pub text_filter: HashMap<String, Vec<String>>,
    pub select_filter: HashMap<String, Vec<String>>,
    pub tag_filter: Vec<String>,
    pub number_filter: HashMap<String, NumberFilter>,
    pub checkbox_filter: HashMap<String, bool>,
}

impl TypedFilters {
    /// Anything beyond the plain database filter requires the enhanced
    /// search path.
    pub fn has_advanced(&self) -> bool {
        self.content_type_filter.is_some()
            || self.date_range_filter.is_some()
            || !self.text_filter.is_empty()
            || !self.select_filter.is_empty()
            || !self.tag_filter.is_empty()
            || !self.number_filter.is_empty()
            || !self.checkbox_filter.is_empty()
    }
}

const CHUNK_FIELDS: &str = "id, created_at, updated_at, document_id, notion_database_id, \
     chunk_order, content, token_count, chunk_context, chunk_summary, document_section, \
     section_hierarchy, chunk_type, chunk_position_metadata, embedding, contextual_embedding, \
     prev_chunk_id, next_chunk_id";

const SIMILARITY_FIELDS: &str = "vector::similarity::cosine(embedding, $embedding) AS content_similarity, \
     vector::similarity::cosine(contextual_embedding, $embedding) AS contextual_similarity, \
     (0.7 * vector::similarity::cosine(contextual_embedding, $embedding) \
        + 0.3 * vector::similarity::cosine(embedding, $embedding)) AS combined_score";

#[derive(Deserialize)]
struct ScoredRow {
    #[serde(
        deserialize_with = "crate::storage::types::serde_helpers::deserialize_flexible_id"
    )]
    id: String,
    #[serde(
        deserialize_with = "crate::storage::types::serde_helpers::datetime::deserialize"
    )]
    created_at: DateTime<Utc>,
    #[serde(
        deserialize_with = "crate::storage::types::serde_helpers::datetime::deserialize"
    )]
    updated_at: DateTime<Utc>,
    document_id: String,
    notion_database_id: String,
    chunk_order: u32,
    content: String,
    token_count: u32,
    chunk_context: String,
    chunk_summary: String,
    document_section: String,
    section_hierarchy: Vec<String>,
    chunk_type: ChunkType,
    chunk_position_metadata: ChunkPosition,
    embedding: Vec<f32>,
    contextual_embedding: Vec<f32>,
    prev_chunk_id: Option<String>,
    next_chunk_id: Option<String>,
    #[serde(default)]
    similarity: f32,
    #[serde(default)]
    content_similarity: f32,
    #[serde(default)]
    contextual_similarity: f32,
    #[serde(default)]
    combined_score: f32,
}

impl ScoredRow {
    fn split(self) -> (DocumentChunk, RowScores) {
        let scores = RowScores {
            similarity: self.similarity,
            content_similarity: self.content_similarity,
            contextual_similarity: self.contextual_similarity,
            combined_score: self.combined_score,
        };
        let chunk = DocumentChunk {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            document_id: self.document_id,
            notion_database_id: self.notion_database_id,
            chunk_order: self.chunk_order,
            content: self.content,
            token_count: self.token_count,
            chunk_context: self.chunk_context,
            chunk_summary: self.chunk_summary,
            document_section: self.document_section,
            section_hierarchy: self.section_hierarchy,
            chunk_type: self.chunk_type,
            chunk_position_metadata: self.chunk_position_metadata,
            embedding: self.embedding,
            contextual_embedding: self.contextual_embedding,
            prev_chunk_id: self.prev_chunk_id,
            next_chunk_id: self.next_chunk_id,
        };
        (chunk, scores)
    }
}

#[derive(Debug, Clone, Copy)]
struct RowScores {
    similarity: f32,
    content_similarity: f32,
    contextual_similarity: f32,
    combined_score: f32,
}

impl DocumentChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        notion_database_id: String,
        chunk_order: u32,
        content: String,
        token_count: u32,
        chunk_context: String,
        chunk_summary: String,
        document_section: String,
        section_hierarchy: Vec<String>,
        chunk_type: ChunkType,
        chunk_position_metadata: ChunkPosition,
        embedding: Vec<f32>,
        contextual_embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            notion_database_id,
            chunk_order,
            content,
            token_count,
            chunk_context,
            chunk_summary,
            document_section,
            section_hierarchy,
            chunk_type,
            chunk_position_metadata,
            embedding,
            contextual_embedding,
            prev_chunk_id: None,
            next_chunk_id: None,
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "DELETE {} WHERE document_id = $document_id",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_string()))
            .await?;

        Ok(())
    }

    pub async fn ordered_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE document_id = $document_id ORDER BY chunk_order ASC",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows)
    }

    /// Second ingestion pass: after all chunk rows exist, fill
    /// `prev_chunk_id`/`next_chunk_id` by ascending `chunk_order` so the
    /// chunks form a doubly-linked list.
    pub async fn link_sequence(document_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let chunks = Self::ordered_for_document(document_id, db).await?;

        for (position, chunk) in chunks.iter().enumerate() {
            let prev_id = position
                .checked_sub(1)
                .and_then(|i| chunks.get(i))
                .map(|c| c.id.clone());
            let next_id = chunks.get(position.saturating_add(1)).map(|c| c.id.clone());

            db.client
                .query(
                    "UPDATE type::thing($table, $id) SET prev_chunk_id = $prev, next_chunk_id = $next, updated_at = time::now()",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", chunk.id.clone()))
                .bind(("prev", prev_id))
                .bind(("next", next_id))
                .await?;
        }

        Ok(())
    }

    /// Baseline cosine search over the content embedding.
    pub async fn match_chunks(
        query_embedding: Vec<f32>,
        database_filter: Option<Vec<String>>,
        match_threshold: f32,
        match_count: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        let database_clause = match &database_filter {
            Some(_) => "AND notion_database_id IN $databases",
            None => "",
        };

        let sql = format!(
            r#"
            SELECT {CHUNK_FIELDS},
                vector::similarity::cosine(embedding, $embedding) AS similarity
            FROM {table}
            WHERE embedding <|{take},{ef}|> $embedding
              {database_clause}
            ORDER BY similarity DESC
            LIMIT {take};
            "#,
            table = Self::table_name(),
            take = match_count,
            ef = match_count.max(40),
        );

        let mut query = db.query(&sql).bind(("embedding", query_embedding));
        if let Some(databases) = database_filter {
            query = query.bind(("databases", databases));
        }

        let mut response = query
            .await
            .map_err(|e| AppError::Internal(format!("store query failed: {e}")))?;
        let rows: Vec<ScoredRow> = response.take::<Vec<ScoredRow>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(ScoredRow::split)
            .filter(|(_, scores)| scores.similarity >= match_threshold)
            .map(|(chunk, scores)| ChunkMatch {
                chunk,
                similarity: scores.similarity,
            })
            .collect())
    }

    /// Blended contextual search: candidates by KNN over the contextual
    /// embedding, scored as `0.7 * contextual + 0.3 * content`, ordered by
    /// the blend descending.
    pub async fn match_contextual_chunks(
        query_embedding: Vec<f32>,
        database_filter: Option<Vec<String>>,
        match_threshold: f32,
        match_count: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ContextualMatch>, AppError> {
        let filters = TypedFilters {
            database_filter,
            ..TypedFilters::default()
        };
        Self::enhanced_metadata_search(query_embedding, &filters, match_threshold, match_count, db)
            .await
    }

    /// Contextual search with typed metadata predicates pushed into the
    /// store. Metadata predicates resolve to document-id subqueries over the
    /// typed projection table; content-type and date predicates over the
    /// document table.
    pub async fn enhanced_metadata_search(
        query_embedding: Vec<f32>,
        filters: &TypedFilters,
        match_threshold: f32,
        match_count: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ContextualMatch>, AppError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<(String, serde_json::Value)> = Vec::new();

        if let Some(databases) = &filters.database_filter {
            binds.push(("databases".to_string(), json!(databases)));
            conditions.push("notion_database_id IN $databases".to_string());
        }

        if let Some(content_types) = &filters.content_type_filter {
            binds.push(("content_types".to_string(), json!(content_types)));
            conditions.push(
                "document_id IN (SELECT VALUE record::id(id) FROM document WHERE content_type IN $content_types)"
                    .to_string(),
            );
        }

        if let Some(range) = &filters.date_range_filter {
            if let Some(from) = &range.from {
                binds.push(("date_from".to_string(), json!(from)));
                conditions.push(
                    "document_id IN (SELECT VALUE record::id(id) FROM document WHERE notion_last_edited_time >= $date_from)"
                        .to_string(),
                );
            }
            if let Some(to) = &range.to {
                binds.push(("date_to".to_string(), json!(to)));
                conditions.push(
                    "document_id IN (SELECT VALUE record::id(id) FROM document WHERE notion_last_edited_time <= $date_to)"
                        .to_string(),
                );
            }
        }

        let mut slot = 0usize;
        for (field_name, values) in filters.text_filter.iter().chain(filters.select_filter.iter())
        {
            let field_bind = format!("mf{slot}");
            let values_bind = format!("mv{slot}");
            slot = slot.saturating_add(1);
            conditions.push(format!(
                "document_id IN (SELECT VALUE document_id FROM document_metadata WHERE field_name = ${field_bind} AND text_value IN ${values_bind})"
            ));
            binds.push((field_bind, json!(field_name)));
            binds.push((values_bind, json!(values)));
        }

        if !filters.tag_filter.is_empty() {
            binds.push(("tags".to_string(), json!(filters.tag_filter)));
            conditions.push(
                "document_id IN (SELECT VALUE document_id FROM document_metadata WHERE array_value CONTAINSANY $tags)"
                    .to_string(),
            );
        }

        for (field_name, number) in &filters.number_filter {
            let field_bind = format!("nf{slot}");
            let mut predicates = vec![format!("field_name = ${field_bind}")];
            binds.push((field_bind, json!(field_name)));

            if let Some(min) = number.min {
                let bind = format!("nmin{slot}");
                predicates.push(format!("number_value >= ${bind}"));
                binds.push((bind, json!(min)));
            }
            if let Some(max) = number.max {
                let bind = format!("nmax{slot}");
                predicates.push(format!("number_value <= ${bind}"));
                binds.push((bind, json!(max)));
            }
            if let Some(equals) = number.equals {
                let bind = format!("neq{slot}");
                predicates.push(format!("number_value = ${bind}"));
                binds.push((bind, json!(equals)));
            }
            slot = slot.saturating_add(1);

            conditions.push(format!(
                "document_id IN (SELECT VALUE document_id FROM document_metadata WHERE {})",
                predicates.join(" AND ")
            ));
        }

        for (field_name, value) in &filters.checkbox_filter {
            let field_bind = format!("cf{slot}");
            let value_bind = format!("cv{slot}");
            slot = slot.saturating_add(1);
            conditions.push(format!(
                "document_id IN (SELECT VALUE document_id FROM document_metadata WHERE field_name = ${field_bind} AND boolean_value = ${value_bind})"
            ));
            binds.push((field_bind, json!(field_name)));
            binds.push((value_bind, json!(value)));
        }

        let filter_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("AND {}", conditions.join(" AND "))
        };

        let sql = format!(
            r#"
            SELECT {CHUNK_FIELDS},
                {SIMILARITY_FIELDS}
            FROM {table}
            WHERE contextual_embedding <|{take},{ef}|> $embedding
              {filter_clause}
            ORDER BY combined_score DESC
            LIMIT {take};
            "#,
            table = Self::table_name(),
            take = match_count,
            ef = match_count.max(40),
        );

        let mut query = db.query(&sql).bind(("embedding", query_embedding));
        for (name, value) in binds {
            query = query.bind((name, value));
        }

        let mut response = query
            .await
            .map_err(|e| AppError::Internal(format!("store query failed: {e}")))?;
        let rows: Vec<ScoredRow> = response.take::<Vec<ScoredRow>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(ScoredRow::split)
            .filter(|(_, scores)| scores.combined_score >= match_threshold)
            .map(|(chunk, scores)| ContextualMatch {
                chunk,
                content_similarity: scores.content_similarity,
                contextual_similarity: scores.contextual_similarity,
                combined_score: scores.combined_score,
            })
            .collect())
    }

    /// Resolve a chunk together with its linked neighbors.
    pub async fn get_chunk_with_context(
        chunk_id: &str,
        include_adjacent: bool,
        db: &SurrealDbClient,
    ) -> Result<ChunkWithContext, AppError> {
        let main: Self = db
            .fetch(chunk_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chunk not found: {chunk_id}")))?;

        if !include_adjacent {
            return Ok(ChunkWithContext {
                main,
                prev: None,
                next: None,
            });
        }

        let prev = match &main.prev_chunk_id {
            Some(id) => db.fetch(id).await?,
            None => None,
        };
        let next = match &main.next_chunk_id {
            Some(id) => db.fetch(id).await?,
            None => None,
        };

        Ok(ChunkWithContext { main, prev, next })
    }
}
