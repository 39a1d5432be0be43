//! biosearch
//!
//! Semantic search over embedded bio sections: a query is embedded, matched
//! against stored section vectors by cosine similarity, and the best matches
//! above a threshold are returned over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod search;

pub use api::{ApiConfig, ApiServer, AppState, HealthResponse, MatchResponse, QueryBody};
pub use config::{SearchConfig, ServiceConfig, StoreBackend, StoreConfig, DEFAULT_CONFIG_PATH};
pub use error::{Error, Result};
pub use crate::metrics::{MetricsConfig, MetricsService};
pub use search::{
    BioSection, CandidateId, CandidateRecord, CandidateSource, EmbedOptions, Embedding,
    EmbeddingProvider, EmbeddingService, EmbeddingServiceConfig, MemorySource, QdrantSource,
    QueryVectorizer, RankAnomaly, ScoredResult, SearchPipeline, SearchRequest, SectionIndexer,
    SimilarityRanker, SnapshotSource,
};
