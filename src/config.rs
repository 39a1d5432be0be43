//! Service configuration.
//!
//! Loaded from a TOML file, then overridden by environment variables, then
//! validated. The transport shell owns the resulting struct and builds the
//! pipeline's collaborators from it at startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::ApiConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsConfig;
use crate::search::{
    CandidateSource, EmbeddingServiceConfig, MemorySource, QdrantSource, SnapshotSource,
    DEFAULT_MAX_RESULTS, DEFAULT_SIMILARITY_THRESHOLD,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "biosearch.toml";

/// Ranking defaults applied to every HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum similarity for a result to be returned
    pub similarity_threshold: f32,
    /// Maximum number of results
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Where candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Empty in-process store
    Memory,
    /// JSON / JSONL file
    #[default]
    Snapshot,
    /// Qdrant collection
    Qdrant,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "snapshot" => Ok(StoreBackend::Snapshot),
            "qdrant" => Ok(StoreBackend::Qdrant),
            other => Err(Error::Config(format!("Unknown store backend '{}'", other))),
        }
    }
}

/// Candidate store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Snapshot file for the `snapshot` backend
    pub snapshot_path: PathBuf,
    /// Qdrant gRPC endpoint
    pub qdrant_url: String,
    /// Qdrant API key
    pub qdrant_api_key: Option<String>,
    /// Qdrant collection holding bio sections
    pub collection: String,
    /// Named vector to read, if the collection uses named vectors
    pub vector_name: Option<String>,
    /// Points fetched per scroll call
    pub scroll_page_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            snapshot_path: PathBuf::from("candidates.json"),
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            collection: "bio_sections".to_string(),
            vector_name: None,
            scroll_page_size: 256,
        }
    }
}

impl StoreConfig {
    /// Build the configured candidate source.
    pub fn build_source(&self) -> Result<Arc<dyn CandidateSource>> {
        let source: Arc<dyn CandidateSource> = match self.backend {
            StoreBackend::Memory => Arc::new(MemorySource::new()),
            StoreBackend::Snapshot => Arc::new(SnapshotSource::new(&self.snapshot_path)),
            StoreBackend::Qdrant => {
                let mut source = QdrantSource::connect(
                    &self.qdrant_url,
                    self.qdrant_api_key.as_deref(),
                    self.collection.clone(),
                    self.scroll_page_size,
                )?;
                if let Some(name) = &self.vector_name {
                    source = source.with_vector_name(name.clone());
                }
                Arc::new(source)
            }
        };
        Ok(source)
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api: ApiConfig,
    pub search: SearchConfig,
    pub embedding: EmbeddingServiceConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load `path` if it exists (defaults otherwise), apply environment
    /// overrides and validate.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BIOSEARCH_LISTEN_ADDRESS") {
            self.api.listen_address = v;
        }
        if let Some(v) = lookup("BIOSEARCH_SIMILARITY_THRESHOLD") {
            self.search.similarity_threshold = parse_var("BIOSEARCH_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("BIOSEARCH_MAX_RESULTS") {
            self.search.max_results = parse_var("BIOSEARCH_MAX_RESULTS", &v)?;
        }
        if let Some(v) = lookup("BIOSEARCH_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("BIOSEARCH_STORE_BACKEND") {
            self.store.backend = v.parse()?;
        }
        if let Some(v) = lookup("BIOSEARCH_SNAPSHOT_PATH") {
            self.store.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Some(v) = lookup("QDRANT_API_KEY") {
            self.store.qdrant_api_key = Some(v);
        }
        if let Some(v) = lookup("BIOSEARCH_COLLECTION") {
            self.store.collection = v;
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.search.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                threshold
            )));
        }
        if self.search.max_results == 0 {
            return Err(Error::Config(
                "max_results must be greater than 0".to_string(),
            ));
        }
        let tolerance = self.embedding.norm_tolerance;
        if tolerance.is_nan() || tolerance <= 0.0 {
            return Err(Error::Config(
                "norm_tolerance must be greater than 0".to_string(),
            ));
        }
        if self.store.scroll_page_size == 0 {
            return Err(Error::Config(
                "scroll_page_size must be greater than 0".to_string(),
            ));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(Error::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, value)))
}
