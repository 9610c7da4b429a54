use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use delver_llm::{LlmError, LlmProvider};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Provider or network failure.
    #[error("embedding backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: LlmError,
    },

    #[error("embedding backend {backend} timed out after {}s", .timeout.as_secs())]
    Timeout { backend: String, timeout: Duration },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Maps text to fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    /// Backend identity, used in logs and error messages.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed `texts`, returning one vector per input in order.
    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, EmbedError>>;

    fn embed_one<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, EmbedError>> {
        Box::pin(async move {
            let batch = [text.to_owned()];
            let mut out = self.embed_batch(&batch).await?;
            out.pop().ok_or(EmbedError::DimensionMismatch {
                expected: self.dimension(),
                actual: 0,
            })
        })
    }
}

/// Fails with [`EmbedError::DimensionMismatch`] unless both sides agree.
///
/// # Errors
///
/// Returns the mismatch when `expected != actual`.
pub fn check_dimension(expected: usize, actual: usize) -> Result<(), EmbedError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EmbedError::DimensionMismatch { expected, actual })
    }
}

/// Adapts any embedding-capable [`LlmProvider`] into an [`Embedder`].
pub struct ProviderEmbedder<P> {
    provider: P,
    dimension: usize,
    timeout: Duration,
}

impl<P: LlmProvider> ProviderEmbedder<P> {
    #[must_use]
    pub fn new(provider: P, dimension: usize, timeout: Duration) -> Self {
        Self {
            provider,
            dimension,
            timeout,
        }
    }

    /// Discover the backend's dimension by embedding a sample string.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample request fails or times out.
    pub async fn detect(provider: P, timeout: Duration) -> Result<Self, EmbedError> {
        let backend = provider.name().to_owned();
        let vector = tokio::time::timeout(timeout, provider.embed("dimension check"))
            .await
            .map_err(|_| EmbedError::Timeout {
                backend: backend.clone(),
                timeout,
            })?
            .map_err(|source| EmbedError::Backend { backend, source })?;
        tracing::debug!(dimension = vector.len(), "detected embedding dimension");
        Ok(Self::new(provider, vector.len(), timeout))
    }
}

impl<P: LlmProvider> Embedder for ProviderEmbedder<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(texts))
                .await
                .map_err(|_| EmbedError::Timeout {
                    backend: self.name().to_owned(),
                    timeout: self.timeout,
                })?
                .map_err(|source| EmbedError::Backend {
                    backend: self.name().to_owned(),
                    source,
                })?;
            if vectors.len() != texts.len() {
                return Err(EmbedError::Backend {
                    backend: self.name().to_owned(),
                    source: LlmError::Other(format!(
                        "{} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    )),
                });
            }
            for v in &vectors {
                check_dimension(self.dimension, v.len())?;
            }
            Ok(vectors)
        })
    }
}
