pub mod article;
pub mod paragraph;

use common::{
    error::AppError,
    storage::types::document_chunk::ChunkType,
    utils::config::{ChunkingStrategyKind, SyncSettings},
};

/// An in-memory chunk produced by a strategy, before enrichment and
/// embedding attach the generated fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub index: usize,
    pub token_count: usize,
    pub section_title: String,
    pub section_level: usize,
    pub hierarchy: Vec<String>,
    pub chunk_type: ChunkType,
}

/// Strategy-selecting splitter. Paragraph splitting exists for the
/// benchmark-style corpus; article splitting is the production default.
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
    strategy: ChunkingStrategyKind,
}

impl Chunker {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            max_tokens: settings.chunk_size,
            overlap_tokens: settings.chunk_overlap,
            strategy: settings.chunking_strategy,
        }
    }

    pub fn with_limits(
        strategy: ChunkingStrategyKind,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            strategy,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn chunk(&self, title: &str, content: &str) -> Result<Vec<ChunkDraft>, AppError> {
        if self.max_tokens == 0 {
            return Err(AppError::Validation(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(AppError::Validation(format!(
                "chunk_overlap of {} must be smaller than chunk_size of {}",
                self.overlap_tokens, self.max_tokens
            )));
        }

        match self.strategy {
            ChunkingStrategyKind::Paragraph => paragraph::chunk(content),
            ChunkingStrategyKind::Article => {
                article::chunk(title, content, self.max_tokens, self.overlap_tokens)
            }
        }
    }
}
