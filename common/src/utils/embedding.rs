use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use async_openai::{config::OpenAIConfig, error::OpenAIError, types::CreateEmbeddingRequestArgs, Client};
use tokio::time::sleep;
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::debug;

use crate::{error::AppError, utils::config::ModelsConfig};

/// Where vectors come from: the provider, or a deterministic local hash
/// projection for offline runs and tests.
enum EmbeddingBackend {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    Hashed,
}

/// Batched embedding client with outbound pacing.
///
/// Every provider call is preceded by `inter_call_delay`; rate-limit
/// rejections retry on a fixed delay up to `max_retries`, any other provider
/// error surfaces immediately. Oversized batches are split internally while
/// preserving input order.
pub struct Embedder {
    backend: EmbeddingBackend,
    dimensions: u32,
    inter_call_delay: Duration,
    retry_delay: Duration,
    max_retries: usize,
    batch_size: usize,
    tokens_used: AtomicU64,
}

impl Embedder {
    pub fn new(client: Arc<Client<OpenAIConfig>>, models: &ModelsConfig) -> Self {
        Self {
            backend: EmbeddingBackend::OpenAi {
                client,
                model: models.embedding_model.clone(),
            },
            dimensions: models.embedding_dimensions,
            inter_call_delay: Duration::from_millis(models.embedding_inter_call_delay_ms),
            retry_delay: Duration::from_millis(models.embedding_retry_delay_ms),
            max_retries: models.embedding_max_retries,
            batch_size: models.embedding_batch_size.max(1),
            tokens_used: AtomicU64::new(0),
        }
    }

    /// Deterministic hash-bucket embeddings with no provider dependency.
    pub fn new_hashed(dimensions: u32) -> Self {
        Self {
            backend: EmbeddingBackend::Hashed,
            dimensions,
            inter_call_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            max_retries: 0,
            batch_size: 64,
            tokens_used: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimensions as usize
    }

    /// Provider-reported tokens consumed by this embedder so far.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.request(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding data received".into()))
    }

    /// Embed `texts`, returning vectors in input order and equal length.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.request(batch.to_vec()).await?;
            vectors.extend(batch_vectors);
        }

        if vectors.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        Ok(vectors)
    }

    async fn request(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        sleep(self.inter_call_delay).await;

        let (client, model) = match &self.backend {
            EmbeddingBackend::OpenAi { client, model } => (client, model),
            EmbeddingBackend::Hashed => {
                return Ok(inputs
                    .iter()
                    .map(|input| hashed_embedding(input, self.dimensions as usize))
                    .collect());
            }
        };

        let strategy = FixedInterval::new(self.retry_delay).take(self.max_retries);
        let response = RetryIf::spawn(
            strategy,
            || async {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(self.dimensions)
                    .input(inputs.clone())
                    .build()?;

                client.embeddings().create(request).await
            },
            is_rate_limited,
        )
        .await
        .map_err(|e| AppError::Embedding(format!("Embedding request failed: {e}")))?;

        self.tokens_used
            .fetch_add(u64::from(response.usage.total_tokens), Ordering::Relaxed);
        debug!(
            inputs = inputs.len(),
            total_tokens = response.usage.total_tokens,
            "embedding batch completed"
        );

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(response.data.len());
        for item in response.data {
            if item.embedding.len() != self.dimensions as usize {
                return Err(AppError::Embedding(format!(
                    "Embedding has dimension {} but the model is configured for {}",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
            vectors.push(item.embedding);
        }

        if vectors.is_empty() {
            return Err(AppError::Embedding("No embedding data received".into()));
        }

        Ok(vectors)
    }
}

/// Hash each whitespace token into a bucket and L2-normalize. Texts sharing
/// words land near each other, which is all the offline paths need.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0.0f32; dimensions.max(1)];
    for word in text.to_lowercase().split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % vector.len();
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Rate-limit signals worth retrying: explicit 429 codes or the provider's
/// rate-limit error type.
fn is_rate_limited(error: &OpenAIError) -> bool {
    match error {
        OpenAIError::ApiError(api_error) => {
            api_error
                .code
                .as_ref()
                .is_some_and(|code| code.contains("rate_limit"))
                || api_error
                    .r#type
                    .as_ref()
                    .is_some_and(|kind| kind.contains("rate_limit"))
                || api_error.message.to_lowercase().contains("rate limit")
        }
        other => other.to_string().contains("429"),
    }
}
