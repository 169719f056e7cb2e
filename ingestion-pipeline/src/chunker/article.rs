use common::{
    error::AppError, storage::types::document_chunk::ChunkType, utils::tokenizer::count_tokens,
};

use super::ChunkDraft;

/// One markdown section: the header that opened it, its depth, the path of
/// ancestor headers, and the accumulated body text.
#[derive(Debug, Clone)]
struct Section {
    title: String,
    level: usize,
    hierarchy: Vec<String>,
    text: String,
}

impl Section {
    fn chunk_type(&self) -> ChunkType {
        if self.level >= 1 && self.level <= 2 {
            ChunkType::Header
        } else {
            ChunkType::Content
        }
    }
}

/// Two-pass article chunking: parse the header structure, then pack each
/// section into token-budgeted chunks that all carry the rendered title
/// prefix. Oversized paragraphs fall back to sentence and then phrase
/// splitting.
pub fn chunk(
    document_title: &str,
    content: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<ChunkDraft>, AppError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    for section in parse_sections(content) {
        if section.text.trim().is_empty() {
            continue;
        }
        chunk_section(
            &section,
            document_title,
            max_tokens,
            overlap_tokens,
            &mut chunks,
        )?;
    }

    Ok(chunks)
}

/// A markdown header line: one to six `#` followed by whitespace and text.
fn parse_header(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }

    let rest = trimmed.get(level..)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let title = rest.trim();
    if title.is_empty() {
        return None;
    }

    Some((level, title))
}

fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut header_stack: Vec<Option<String>> = Vec::new();
    let mut current = Section {
        title: String::new(),
        level: 0,
        hierarchy: Vec::new(),
        text: String::new(),
    };

    for line in content.lines() {
        if let Some((level, title)) = parse_header(line) {
            if !current.text.trim().is_empty() {
                sections.push(current.clone());
            }

            header_stack.truncate(level.saturating_sub(1));
            while header_stack.len() < level {
                header_stack.push(None);
            }
            if let Some(slot) = header_stack.get_mut(level.saturating_sub(1)) {
                *slot = Some(title.to_string());
            }

            let hierarchy = header_stack.iter().flatten().cloned().collect();

            current = Section {
                title: title.to_string(),
                level,
                hierarchy,
                text: String::new(),
            };
        } else {
            current.text.push_str(line);
            current.text.push('\n');
        }
    }

    if !current.text.trim().is_empty() {
        sections.push(current);
    }

    sections
}

fn title_prefix(document_title: &str, section_title: &str) -> String {
    let mut prefix = format!("# {document_title}\n");
    if !section_title.is_empty() {
        prefix.push_str("## ");
        prefix.push_str(section_title);
        prefix.push('\n');
    }
    prefix
}

fn chunk_section(
    section: &Section,
    document_title: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    chunks: &mut Vec<ChunkDraft>,
) -> Result<(), AppError> {
    let prefix = title_prefix(document_title, &section.title);
    let prefix_tokens = count_tokens(&prefix)?;
    let available = max_tokens.saturating_sub(prefix_tokens);
    if available == 0 {
        return Err(AppError::Validation(format!(
            "chunk budget of {max_tokens} tokens cannot fit the title prefix"
        )));
    }

    let body = section.text.trim();
    if count_tokens(body)? <= available {
        push_chunk(chunks, &prefix, body, section)?;
        return Ok(());
    }

    let mut current = String::new();
    for paragraph in split_paragraphs(body) {
        let paragraph_tokens = count_tokens(&paragraph)?;

        // A paragraph that can never fit gets sentence-split on its own.
        if paragraph_tokens > available {
            if !current.is_empty() {
                push_chunk(chunks, &prefix, &current, section)?;
                current.clear();
            }
            for group in split_paragraph_by_sentences(&paragraph, available)? {
                push_chunk(chunks, &prefix, &group, section)?;
            }
            continue;
        }

        let candidate = if current.is_empty() {
            paragraph.clone()
        } else {
            format!("{current}\n\n{paragraph}")
        };

        if count_tokens(&format!("{prefix}{candidate}"))? > max_tokens {
            let tail = overlap_tail(&current, overlap_tokens)?;
            push_chunk(chunks, &prefix, &current, section)?;

            let seeded = if tail.is_empty() {
                paragraph.clone()
            } else {
                format!("{tail}\n\n{paragraph}")
            };
            // Drop the overlap seed rather than blow the budget.
            current = if count_tokens(&format!("{prefix}{seeded}"))? > max_tokens {
                paragraph
            } else {
                seeded
            };
        } else {
            current = candidate;
        }
    }

    if !current.trim().is_empty() {
        push_chunk(chunks, &prefix, &current, section)?;
    }

    Ok(())
}

fn push_chunk(
    chunks: &mut Vec<ChunkDraft>,
    prefix: &str,
    body: &str,
    section: &Section,
) -> Result<(), AppError> {
    let content = format!("{prefix}{}", body.trim());
    let token_count = count_tokens(&content)?;
    chunks.push(ChunkDraft {
        content,
        index: chunks.len(),
        token_count,
        section_title: section.title.clone(),
        section_level: section.level,
        hierarchy: section.hierarchy.clone(),
        chunk_type: section.chunk_type(),
    });
    Ok(())
}

/// Split on runs of blank lines, keeping non-empty paragraphs.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    paragraphs
}

/// Split into sentences on `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
                // Consume the whitespace separating sentences.
                while chars.peek().is_some_and(|next| next.is_whitespace()) {
                    chars.next();
                }
            }
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// Split a long sentence on comma/semicolon boundaries.
fn split_phrases(sentence: &str) -> Vec<String> {
    sentence
        .split([',', ';'])
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pack the sentences of an oversized paragraph into groups within
/// `budget`. Sentences that alone exceed the budget are packed by phrases;
/// an unsplittable phrase is emitted on its own.
fn split_paragraph_by_sentences(paragraph: &str, budget: usize) -> Result<Vec<String>, AppError> {
    let mut groups = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(paragraph) {
        if count_tokens(&sentence)? > budget {
            if !current.is_empty() {
                groups.push(current.clone());
                current.clear();
            }

            for phrase in split_phrases(&sentence) {
                let candidate = if current.is_empty() {
                    phrase.clone()
                } else {
                    format!("{current}, {phrase}")
                };
                if count_tokens(&candidate)? > budget {
                    if !current.is_empty() {
                        groups.push(current.clone());
                    }
                    current = phrase;
                } else {
                    current = candidate;
                }
            }
            continue;
        }

        let candidate = if current.is_empty() {
            sentence.clone()
        } else {
            format!("{current} {sentence}")
        };
        if count_tokens(&candidate)? > budget {
            if !current.is_empty() {
                groups.push(current.clone());
            }
            current = sentence;
        } else {
            current = candidate;
        }
    }

    if !current.trim().is_empty() {
        groups.push(current);
    }

    Ok(groups)
}

/// The last up-to-three sentences whose cumulative tokens stay within
/// `overlap_tokens`, in document order.
fn overlap_tail(text: &str, overlap_tokens: usize) -> Result<String, AppError> {
    let sentences = split_sentences(text);
    let mut tail: Vec<String> = Vec::new();
    let mut used = 0usize;

    for sentence in sentences.iter().rev().take(3) {
        let tokens = count_tokens(sentence)?;
        if used.saturating_add(tokens) > overlap_tokens {
            break;
        }
        used = used.saturating_add(tokens);
        tail.insert(0, sentence.clone());
    }

    Ok(tail.join(" "))
}
