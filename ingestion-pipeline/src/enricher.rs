use std::{sync::Arc, time::Duration};

use common::{storage::types::document_chunk::ChunkPosition, utils::llm::ChatCompleter};
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    chunker::ChunkDraft,
    llm_instructions::{
        chunk_context_prompt, chunk_summary_prompt, document_summary_prompt,
        CHUNK_CONTEXT_SYSTEM_MESSAGE, CHUNK_SUMMARY_SYSTEM_MESSAGE,
        DOCUMENT_SUMMARY_SYSTEM_MESSAGE,
    },
};

/// A chunk draft with its generated context, summary and position attached.
#[derive(Debug, Clone)]
pub struct EnrichedChunk {
    pub draft: ChunkDraft,
    pub chunk_context: String,
    pub chunk_summary: String,
    pub contextual_content: String,
    pub position: ChunkPosition,
}

/// Generates the contextual-retrieval fields for each chunk. Chunks are
/// processed in small concurrent batches with a pause in between; a failed
/// LLM call degrades that one chunk to its deterministic fallback.
pub struct ContextEnricher {
    chat: Arc<dyn ChatCompleter>,
    batch_size: usize,
    inter_batch_pause: Duration,
}

impl ContextEnricher {
    pub fn new(chat: Arc<dyn ChatCompleter>) -> Self {
        Self {
            chat,
            batch_size: 3,
            inter_batch_pause: Duration::from_millis(500),
        }
    }

    pub fn with_pacing(
        chat: Arc<dyn ChatCompleter>,
        batch_size: usize,
        inter_batch_pause: Duration,
    ) -> Self {
        Self {
            chat,
            batch_size: batch_size.max(1),
            inter_batch_pause,
        }
    }

    /// Summary of the whole document, used both for storage and as grounding
    /// for the per-chunk context calls.
    pub async fn document_summary(&self, title: &str, content: &str) -> String {
        match self
            .chat
            .complete(
                DOCUMENT_SUMMARY_SYSTEM_MESSAGE,
                &document_summary_prompt(title, content),
            )
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(title, "document summary generation failed, using fallback");
                format!("Document about {title}")
            }
        }
    }

    /// Enrich every draft: context + summary via the LLM, positional
    /// metadata, and the contextual content composition.
    pub async fn enrich(
        &self,
        title: &str,
        document_summary: &str,
        drafts: Vec<ChunkDraft>,
    ) -> Vec<EnrichedChunk> {
        let total = drafts.len();
        let mut enriched = Vec::with_capacity(total);

        let batches: Vec<&[ChunkDraft]> = drafts.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let results = join_all(
                batch
                    .iter()
                    .map(|draft| self.enrich_one(title, document_summary, draft)),
            )
            .await;
            enriched.extend(results);

            debug!(
                batch = batch_index,
                of = batch_count,
                "chunk enrichment batch completed"
            );
            if batch_index.saturating_add(1) < batch_count {
                sleep(self.inter_batch_pause).await;
            }
        }

        for (index, chunk) in enriched.iter_mut().enumerate() {
            chunk.position = ChunkPosition::new(index, total);
        }

        enriched
    }

    async fn enrich_one(
        &self,
        title: &str,
        document_summary: &str,
        draft: &ChunkDraft,
    ) -> EnrichedChunk {
        let chunk_context = match self
            .chat
            .complete(
                CHUNK_CONTEXT_SYSTEM_MESSAGE,
                &chunk_context_prompt(
                    title,
                    &draft.hierarchy,
                    &draft.section_title,
                    document_summary,
                    &draft.content,
                ),
            )
            .await
        {
            Ok(context) if !context.trim().is_empty() => context.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(
                    chunk_index = draft.index,
                    "chunk context generation failed, using fallback"
                );
                fallback_context(title, &draft.section_title)
            }
        };

        let chunk_summary = match self
            .chat
            .complete(
                CHUNK_SUMMARY_SYSTEM_MESSAGE,
                &chunk_summary_prompt(&draft.content),
            )
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(
                    chunk_index = draft.index,
                    "chunk summary generation failed, using fallback"
                );
                fallback_summary(&draft.content)
            }
        };

        let contextual_content = format!("{chunk_context}\n\n{}", draft.content);

        EnrichedChunk {
            draft: draft.clone(),
            chunk_context,
            chunk_summary,
            contextual_content,
            position: ChunkPosition::new(draft.index, 1),
        }
    }
}

fn fallback_context(title: &str, section_title: &str) -> String {
    let topic = if section_title.is_empty() {
        "related content"
    } else {
        section_title
    };
    format!("This section is part of '{title}' and discusses {topic}.")
}

/// First line, truncated to 100 characters.
fn fallback_summary(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return "Document content".to_string();
    }

    if first_line.chars().count() > 100 {
        let mut truncated: String = first_line.chars().take(100).collect();
        truncated.push_str("...");
        truncated
    } else {
        first_line.to_string()
    }
}
