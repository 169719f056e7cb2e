/// Prompt templates for the ingestion-side LLM calls. Kept together so the
/// wording stays consistent between the enricher and the pipeline.

pub static DOCUMENT_SUMMARY_SYSTEM_MESSAGE: &str =
    "You summarize documents for a retrieval index. Reply with the summary text only.";

pub static CHUNK_CONTEXT_SYSTEM_MESSAGE: &str =
    "You describe how an excerpt relates to its source document. Reply with the description only.";

pub static CHUNK_SUMMARY_SYSTEM_MESSAGE: &str =
    "You condense text into a single clear sentence. Reply with the sentence only.";

/// Character caps applied before prompting, mirroring the provider-side
/// token limits the calls were tuned for.
pub const SUMMARY_CONTENT_CHAR_LIMIT: usize = 4000;
pub const CONTEXT_EXCERPT_CHAR_LIMIT: usize = 500;
pub const CHUNK_SUMMARY_CHAR_LIMIT: usize = 800;

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

pub fn document_summary_prompt(title: &str, content: &str) -> String {
    let content_for_summary = truncate_chars(content, SUMMARY_CONTENT_CHAR_LIMIT);
    format!(
        "Provide a concise 2-3 sentence summary of this document that captures its main purpose and key topics:\n\n\
         Title: {title}\n\n\
         Content: {content_for_summary}\n\n\
         Summary:"
    )
}

pub fn chunk_context_prompt(
    title: &str,
    hierarchy: &[String],
    section_title: &str,
    document_summary: &str,
    chunk_content: &str,
) -> String {
    let mut prompt = format!("Document: {title}\n");
    if !hierarchy.is_empty() {
        prompt.push_str(&format!("Document path: {}\n", hierarchy.join(" > ")));
    }
    if !section_title.is_empty() {
        prompt.push_str(&format!("Section: {section_title}\n"));
    }
    prompt.push_str(&format!(
        "Document Summary: {document_summary}\n\n\
         Generate a brief 1-2 sentence context explaining:\n\
         1. How this content relates to the overall document\n\
         2. What specific aspect or topic this section covers\n\n\
         Chunk Content: {}...\n\n\
         Context:",
        truncate_chars(chunk_content, CONTEXT_EXCERPT_CHAR_LIMIT)
    ));
    prompt
}

pub fn chunk_summary_prompt(chunk_content: &str) -> String {
    format!(
        "Summarize the main point or key idea of this text in one clear sentence:\n\n{}\n\nSummary:",
        truncate_chars(chunk_content, CHUNK_SUMMARY_CHAR_LIMIT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_truncate_appends_ellipsis() {
        let truncated = truncate_chars("abcdefgh", 4);
        assert_eq!(truncated, "abcd...");
    }

    #[test]
    fn test_context_prompt_includes_hierarchy_and_section() {
        let prompt = chunk_context_prompt(
            "Guide",
            &["Guide".to_string(), "Setup".to_string()],
            "Setup",
            "A setup manual.",
            "Install the binary first.",
        );

        assert!(prompt.contains("Document: Guide"));
        assert!(prompt.contains("Document path: Guide > Setup"));
        assert!(prompt.contains("Section: Setup"));
        assert!(prompt.contains("Install the binary first."));
    }

    #[test]
    fn test_context_prompt_omits_empty_parts() {
        let prompt = chunk_context_prompt("Guide", &[], "", "A summary.", "Body.");
        assert!(!prompt.contains("Document path:"));
        assert!(!prompt.contains("Section:"));
    }
}
