//! Embedding providers
//!
//! [`EmbeddingProvider`] is the seam between the indexer/searcher and
//! whatever turns text into vectors. Two implementations ship with the
//! crate: [`LocalEmbedder`] (fastembed, ONNX runtime, fully offline once the
//! weights are cached) and [`crate::cloud::CloudEmbedder`] (Vertex AI).

use crate::cloud::CloudEmbedder;
use crate::config::{Config, EmbeddingModel, ProviderKind};
use crate::error::{Result, SemindexError};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Turns text into fixed-length vectors
///
/// Every vector returned by one provider has length [`dimension`].
///
/// [`dimension`]: EmbeddingProvider::dimension
pub trait EmbeddingProvider: Send + Sync {
    /// Identity of the provider configuration.
    ///
    /// Two providers with the same fingerprint produce comparable vectors.
    fn fingerprint(&self) -> String;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Embed a batch of documents
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query
    fn embed_query(&self, query: &str) -> Result<Vec<f32>>;
}

/// Build the provider selected by the configuration
///
/// Fails only on configuration problems; the local model is not loaded here.
pub fn from_config(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding_provider {
        ProviderKind::Local => Ok(Arc::new(LocalEmbedder::new(
            config.local_model,
            config.model_cache_dir.clone(),
        ))),
        ProviderKind::Cloud => Ok(Arc::new(CloudEmbedder::from_config(config)?)),
    }
}

/// Local embedder using fastembed with ONNX runtime
///
/// The model is loaded on first use. On first use, downloads the model from
/// HuggingFace (~30-470MB); subsequent uses load from cache.
pub struct LocalEmbedder {
    model_config: EmbeddingModel,
    cache_dir: Option<PathBuf>,
    model: Mutex<Option<Arc<TextEmbedding>>>,
}

impl LocalEmbedder {
    /// Create an embedder for the given model without loading it
    pub fn new(model_config: EmbeddingModel, cache_dir: Option<PathBuf>) -> Self {
        Self {
            model_config,
            cache_dir,
            model: Mutex::new(None),
        }
    }

    /// Whether the model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.model
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Load the model on first call, then hand out the shared instance
    fn model(&self) -> Result<Arc<TextEmbedding>> {
        let mut guard = self
            .model
            .lock()
            .map_err(|e| SemindexError::Embedding(format!("Model lock poisoned: {}", e)))?;

        if let Some(model) = guard.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = Arc::new(self.load()?);
        *guard = Some(Arc::clone(&model));
        Ok(model)
    }

    fn load(&self) -> Result<TextEmbedding> {
        info!("Loading embedding model: {}", self.model_config.model_name());

        let model = load_with_retry(self.model_config.model_name(), || {
            TextEmbedding::try_new(self.init_options())
        })?;

        info!(
            "Model loaded successfully (dimension: {})",
            self.model_config.dimension()
        );

        Ok(model)
    }

    fn init_options(&self) -> InitOptions {
        let fastembed_model = match self.model_config {
            EmbeddingModel::AllMiniLmL6V2 => FastEmbedModel::AllMiniLML6V2,
            EmbeddingModel::BgeSmallEnV15 => FastEmbedModel::BGESmallENV15,
            EmbeddingModel::NomicEmbedTextV15 => FastEmbedModel::NomicEmbedTextV15,
            EmbeddingModel::MultilingualE5Small => FastEmbedModel::MultilingualE5Small,
        };

        let options = InitOptions::new(fastembed_model).with_show_download_progress(false);
        match &self.cache_dir {
            Some(dir) => options.with_cache_dir(dir.clone()),
            None => options,
        }
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn fingerprint(&self) -> String {
        format!("local:{}", self.model_config.model_name())
    }

    fn dimension(&self) -> usize {
        self.model_config.dimension()
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        self.model()?
            .embed(batch, None)
            .map_err(|e| SemindexError::Embedding(e.to_string()))
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .model()?
            .embed(vec![query], None)
            .map_err(|e| SemindexError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| SemindexError::Embedding("No embedding returned".to_string()))
    }
}

/// Run `attempt`, retrying once if it fails
///
/// fastembed resolves weights through hf-hub, whose `ApiRepo::get` checks the
/// local cache before the network and has no offline switch, so the second
/// attempt is served from the cache whenever the files are there. The second
/// error is returned as is.
fn load_with_retry<T, E, F>(model_name: &str, mut attempt: F) -> Result<T>
where
    E: std::fmt::Display,
    F: FnMut() -> std::result::Result<T, E>,
{
    match attempt() {
        Ok(model) => Ok(model),
        Err(e) => {
            warn!("Failed to load {} ({}), retrying from cache", model_name, e);
            attempt().map_err(|e| SemindexError::Embedding(e.to_string()))
        }
    }
}

/// Normalize embedding vector to unit length (for cosine similarity)
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in embedding.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors of any length
///
/// Zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0];
        let b = vec![2.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_local_embedder_is_lazy() {
        let embedder = LocalEmbedder::new(EmbeddingModel::BgeSmallEnV15, None);
        assert!(!embedder.is_loaded());
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.fingerprint(), "local:BAAI/bge-small-en-v1.5");
    }

    #[test]
    fn test_empty_batch_does_not_load_model() {
        let embedder = LocalEmbedder::new(EmbeddingModel::AllMiniLmL6V2, None);
        assert!(embedder.embed_texts(&[]).unwrap().is_empty());
        assert!(!embedder.is_loaded());
    }

    #[test]
    fn test_load_retries_once_then_succeeds() {
        let mut calls = 0;
        let loaded = load_with_retry("test-model", || {
            calls += 1;
            if calls == 1 {
                Err("connection reset")
            } else {
                Ok(42)
            }
        });
        assert_eq!(loaded.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_load_propagates_second_failure() {
        let mut calls = 0;
        let loaded: Result<u32> = load_with_retry("test-model", || {
            calls += 1;
            Err(format!("attempt {} failed", calls))
        });
        match loaded {
            Err(SemindexError::Embedding(message)) => assert_eq!(message, "attempt 2 failed"),
            other => panic!("expected embedding error, got {:?}", other),
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_load_does_not_retry_success() {
        let mut calls = 0;
        let loaded = load_with_retry("test-model", || {
            calls += 1;
            Ok::<_, String>("model")
        });
        assert_eq!(loaded.unwrap(), "model");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_factory_builds_local_provider() {
        let config = Config::new(".").with_model(EmbeddingModel::NomicEmbedTextV15);
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.dimension(), 768);
        assert!(provider.fingerprint().starts_with("local:"));
    }
}
