//! Semantic search over embedded bio sections.
//!
//! A query is embedded, every stored section vector is scored against it by
//! cosine similarity, and the best matches above a threshold are returned:
//! - FastEmbed for embedding generation (ONNX-based, lightweight)
//! - Qdrant, a snapshot file or memory as the candidate source
//! - Brute-force cosine scoring with bounded top-k selection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   Query text    │────▶│ QueryVectorizer │──── EmbeddingProvider
//! └─────────────────┘     └────────┬────────┘     (FastEmbed / fake)
//!                                  │
//!                                  ▼
//!                          ┌──────────────┐
//!                          │   Embedding  │
//!                          │  [f32; 384]  │
//!                          └──────┬───────┘
//!                                 │         ┌─────────────────┐
//!                                 │◀────────│ CandidateSource │
//!                                 │         │ Qdrant/file/mem │
//!                                 ▼         └─────────────────┘
//!                        ┌──────────────────┐
//!                        │ SimilarityRanker │
//!                        └────────┬─────────┘
//!                                 ▼
//!                        ┌──────────────────┐
//!                        │  ScoredResult[]  │
//!                        └──────────────────┘
//! ```

mod embedding;
mod indexer;
mod pipeline;
mod ranker;
mod source;
mod types;

pub use embedding::{
    normalize_in_place, resolve_model, EmbedOptions, EmbeddingProvider, EmbeddingService,
    EmbeddingServiceConfig, QueryVectorizer,
};
pub use indexer::{load_sections, BioSection, IndexReport, SectionIndexer, DEFAULT_BATCH_SIZE};
pub use pipeline::{validate_request, SearchOutcome, SearchPipeline};
pub use ranker::{cosine_similarity, RankAnomaly, RankOutcome, SimilarityRanker};
pub use source::{CandidateSource, MemorySource, QdrantSource, SnapshotSource};
pub use types::{CandidateId, CandidateRecord, Embedding, ScoredResult, SearchRequest};

/// Default embedding model (all-MiniLM-L6-v2 - 384 dimensions, mean-pooled)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the supported models
pub const EMBEDDING_DIM: usize = 384;

/// Minimum similarity returned when the caller does not say otherwise
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Result cap used when the caller does not say otherwise
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Accepted deviation of a query vector's L2 norm from 1.0
pub const NORM_TOLERANCE: f64 = 1e-3;
