use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::AppError;

/// Shared BPE encoder, loaded once per process. The encoding is the one the
/// embedding provider tokenizes with, so every sizing decision (chunk
/// budgets, embedding caps) agrees with the provider's own counts.
fn get_encoder() -> Result<&'static CoreBPE, AppError> {
    static ENCODER: OnceLock<Result<CoreBPE, String>> = OnceLock::new();

    match ENCODER
        .get_or_init(|| cl100k_base().map_err(|e| format!("failed to load cl100k_base: {e}")))
    {
        Ok(encoder) => Ok(encoder),
        Err(err) => Err(AppError::Internal(err.clone())),
    }
}

/// Count tokens in `text` under the shared encoding.
pub fn count_tokens(text: &str) -> Result<usize, AppError> {
    if text.is_empty() {
        return Ok(0);
    }

    Ok(get_encoder()?.encode_with_special_tokens(text).len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_tokens() {
        assert_eq!(count_tokens("").expect("count"), 0);
    }

    #[test]
    fn test_count_is_deterministic() {
        let text = "The ingestion pipeline splits pages into chunks.";
        let first = count_tokens(text).expect("count");
        let second = count_tokens(text).expect("count");
        assert_eq!(first, second);
        assert!(first > 0);
    }

    #[test]
    fn test_longer_text_has_more_tokens() {
        let short = count_tokens("hello world").expect("count");
        let long = count_tokens("hello world, this is a longer sentence with more words")
            .expect("count");
        assert!(long > short);
    }

    #[test]
    fn test_cjk_text_counts() {
        let tokens = count_tokens("什么是量子纠缠？").expect("count");
        assert!(tokens > 0);
    }
}
