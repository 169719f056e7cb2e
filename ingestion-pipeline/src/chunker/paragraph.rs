use common::{
    error::AppError, storage::types::document_chunk::ChunkType, utils::tokenizer::count_tokens,
};

use super::ChunkDraft;

/// Baseline splitter: one chunk per paragraph, paragraphs delimited by runs
/// of blank lines. No merging, no overlap, no title prefix. Matches the
/// layout of the benchmark corpus.
pub fn chunk(content: &str) -> Result<Vec<ChunkDraft>, AppError> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String, chunks: &mut Vec<ChunkDraft>| -> Result<(), AppError> {
        let paragraph = current.trim();
        if !paragraph.is_empty() {
            chunks.push(ChunkDraft {
                content: paragraph.to_string(),
                index: chunks.len(),
                token_count: count_tokens(paragraph)?,
                section_title: String::new(),
                section_level: 0,
                hierarchy: Vec::new(),
                chunk_type: ChunkType::Content,
            });
        }
        current.clear();
        Ok(())
    };

    for line in content.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut chunks)?;
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    flush(&mut current, &mut chunks)?;

    Ok(chunks)
}
