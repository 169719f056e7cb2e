use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::{error::AppError, utils::config::ModelsConfig};

/// Seam for non-streaming chat completions (summaries, contexts, titles).
/// Production uses [`OpenAiChat`]; tests substitute canned completers.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AppError>;
}

pub struct OpenAiChat {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(client: Arc<Client<OpenAIConfig>>, models: &ModelsConfig) -> Self {
        Self {
            client,
            model: models.chat_model.clone(),
            temperature: models.temperature,
            max_tokens: models.max_tokens,
            timeout: Duration::from_secs(models.chat_timeout_secs),
        }
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_prompt).into(),
            ])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::Processing(format!(
                    "chat completion timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        Ok(content.trim().to_string())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{async_trait, AppError, ChatCompleter};

    /// Completer returning a fixed response (or failing), with a call
    /// counter so tests can assert which paths reached the LLM.
    pub struct CannedChat {
        pub response: String,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl CannedChat {
        pub fn replying(response: &str) -> Self {
            Self {
                response: response.to_string(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                response: String::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatCompleter for CannedChat {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Processing("canned completer failure".into()));
            }
            Ok(self.response.clone())
        }
    }
}
