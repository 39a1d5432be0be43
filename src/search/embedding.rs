//! Query vectorization.
//!
//! [`EmbeddingProvider`] is the seam to whatever produces vectors.
//! [`EmbeddingService`] is the local FastEmbed implementation, and
//! [`QueryVectorizer`] validates queries and checks the provider's output.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::Embedding;
use super::{DEFAULT_MODEL, EMBEDDING_DIM, NORM_TOLERANCE};
use crate::error::{Error, Result};

/// What the caller asks the provider to do with token embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Average token embeddings into one vector
    pub mean_pool: bool,
    /// Scale the output to unit L2 norm
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            mean_pool: true,
            normalize: true,
        }
    }
}

/// Capability that turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier
    fn model_name(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String], options: EmbedOptions) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, options).await?);
        }
        Ok(out)
    }
}

/// Configuration for the FastEmbed-backed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingServiceConfig {
    /// Model name (e.g. "all-MiniLM-L6-v2")
    pub model: String,
    /// Where downloaded model files are kept
    pub cache_dir: Option<PathBuf>,
    /// Show a progress bar on first download
    pub show_download_progress: bool,
    /// Accepted deviation of a query vector's L2 norm from 1.0
    pub norm_tolerance: f64,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            cache_dir: None,
            show_download_progress: false,
            norm_tolerance: NORM_TOLERANCE,
        }
    }
}

/// Resolve a model name to a FastEmbed model and its dimension.
///
/// Only mean-pooling sentence models are accepted.
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, EMBEDDING_DIM))
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok((EmbeddingModel::AllMiniLML12V2, EMBEDDING_DIM))
        }
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            Ok((EmbeddingModel::MultilingualE5Small, EMBEDDING_DIM))
        }
        other => Err(Error::Config(format!(
            "Unsupported embedding model '{}'",
            other
        ))),
    }
}

/// Local sentence embedding via FastEmbed (ONNX runtime).
pub struct EmbeddingService {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
}

impl EmbeddingService {
    /// Load the default model, downloading it on first use.
    pub fn new() -> Result<Self> {
        Self::with_config(&EmbeddingServiceConfig::default())
    }

    /// Load the configured model.
    pub fn with_config(config: &EmbeddingServiceConfig) -> Result<Self> {
        let (model, dimension) = resolve_model(&config.model)?;

        let mut options =
            InitOptions::new(model).with_show_download_progress(config.show_download_progress);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| Error::EmbeddingUnavailable(format!("Failed to load model: {}", e)))?;

        info!(model = %config.model, dimension, "Embedding model loaded");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            model_name: config.model.clone(),
            dimension,
        })
    }

    async fn run(&self, texts: Vec<String>, options: EmbedOptions) -> Result<Vec<Vec<f32>>> {
        if !options.mean_pool {
            return Err(Error::EmbeddingUnavailable(format!(
                "Model '{}' only produces mean-pooled output",
                self.model_name
            )));
        }

        let model = Arc::clone(&self.model);
        let count = texts.len();
        let mut vectors = tokio::task::spawn_blocking(move || {
            let model = model
                .lock()
                .map_err(|_| Error::EmbeddingUnavailable("Model lock poisoned".to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
        })
        .await
        .map_err(|e| Error::EmbeddingUnavailable(format!("Embedding task failed: {}", e)))??;

        if options.normalize {
            vectors.iter_mut().for_each(|v| normalize_in_place(v));
        }

        debug!(count, model = %self.model_name, "Embedded texts");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>> {
        self.run(vec![text.to_string()], options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingUnavailable("Empty embedding result".to_string()))
    }

    async fn embed_batch(&self, texts: &[String], options: EmbedOptions) -> Result<Vec<Vec<f32>>> {
        self.run(texts.to_vec(), options).await
    }
}

/// Scale a vector to unit L2 norm. Zero vectors are left alone.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Turns query text into a checked, unit-norm [`Embedding`].
///
/// Performs no numeric transformation itself: pooling and normalization are
/// requested from the provider, and the result is verified.
#[derive(Clone)]
pub struct QueryVectorizer {
    provider: Arc<dyn EmbeddingProvider>,
    norm_tolerance: f64,
}

impl QueryVectorizer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            norm_tolerance: NORM_TOLERANCE,
        }
    }

    /// Override the accepted deviation of the norm from 1.0.
    pub fn with_norm_tolerance(mut self, tolerance: f64) -> Self {
        self.norm_tolerance = tolerance;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed a query.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for blank text; the provider is not called.
    /// - `EmbeddingUnavailable` when the provider fails or returns an empty,
    ///   wrongly sized or non-finite vector.
    /// - `UpstreamContractViolation` when the norm is not within tolerance of 1.0.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput(
                "Query text must not be empty".to_string(),
            ));
        }

        let raw = self
            .provider
            .embed(text, EmbedOptions::default())
            .await
            .map_err(|e| match e {
                Error::EmbeddingUnavailable(msg) => Error::EmbeddingUnavailable(msg),
                other => Error::EmbeddingUnavailable(other.to_string()),
            })?;

        let embedding = Embedding::new(raw);
        if embedding.is_empty() {
            return Err(Error::EmbeddingUnavailable(
                "Provider returned an empty vector".to_string(),
            ));
        }
        if embedding.dimension() != self.provider.dimension() {
            return Err(Error::EmbeddingUnavailable(format!(
                "Provider returned {} dimensions, expected {}",
                embedding.dimension(),
                self.provider.dimension()
            )));
        }
        if !embedding.is_finite() {
            return Err(Error::EmbeddingUnavailable(
                "Provider returned non-finite components".to_string(),
            ));
        }

        let norm = embedding.l2_norm();
        if (norm - 1.0).abs() > self.norm_tolerance {
            return Err(Error::UpstreamContractViolation(format!(
                "Query vector norm {:.6} is outside 1.0 ± {}",
                norm, self.norm_tolerance
            )));
        }

        Ok(embedding)
    }
}
