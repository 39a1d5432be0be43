//! Data model shared by the vectorizer, ranker and candidate sources.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Dense embedding vector.
///
/// Created once per query or per stored segment and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap raw vector components.
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of dimensions.
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Vector components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// L2 norm, accumulated in f64 to keep long vectors stable.
    pub fn l2_norm(&self) -> f64 {
        self.0
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt()
    }

    /// Whether every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Opaque candidate identifier, numeric or textual as the store hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateId {
    Num(u64),
    Text(String),
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateId::Num(n) => write!(f, "{}", n),
            CandidateId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for CandidateId {
    fn from(id: u64) -> Self {
        CandidateId::Num(id)
    }
}

impl From<&str> for CandidateId {
    fn from(id: &str) -> Self {
        CandidateId::Text(id.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(id: String) -> Self {
        CandidateId::Text(id)
    }
}

/// A previously embedded text segment eligible for matching.
///
/// Serialized as `{ "id": ..., "embedding": [...], ...payload }`; `vector` is
/// accepted as an alias for `embedding` when reading snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Store-assigned identifier
    pub id: CandidateId,
    /// Stored embedding
    #[serde(rename = "embedding", alias = "vector")]
    pub vector: Embedding,
    /// Reference to the source content (text, section title, owner, ...)
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl CandidateRecord {
    /// Create a record with an empty payload.
    pub fn new(id: impl Into<CandidateId>, vector: impl Into<Embedding>) -> Self {
        Self {
            id: id.into(),
            vector: vector.into(),
            payload: Map::new(),
        }
    }

    /// Attach a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// A candidate paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub candidate: CandidateRecord,
    pub score: f32,
}

/// Validated search parameters for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Raw query text, non-empty after trimming
    pub query_text: String,
    /// Minimum cosine similarity in [-1, 1]
    pub similarity_threshold: f32,
    /// Maximum number of results, at least 1
    pub max_results: usize,
}

impl SearchRequest {
    /// Build a request with the default threshold and result cap.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            similarity_threshold: super::DEFAULT_SIMILARITY_THRESHOLD,
            max_results: super::DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedding_norm() {
        let e = Embedding::new(vec![3.0, 4.0]);
        assert!((e.l2_norm() - 5.0).abs() < 1e-9);
        assert_eq!(e.dimension(), 2);
        assert!(e.is_finite());
        assert!(!Embedding::new(vec![f32::NAN]).is_finite());
    }

    #[test]
    fn test_candidate_record_reads_vector_alias_and_payload() {
        let record: CandidateRecord = serde_json::from_value(json!({
            "id": 7,
            "vector": [0.6, 0.8],
            "content": "Loves hiking",
            "bio_id": "b-1"
        }))
        .unwrap();

        assert_eq!(record.id, CandidateId::Num(7));
        assert_eq!(record.vector.as_slice(), &[0.6, 0.8]);
        assert_eq!(record.payload.get("content"), Some(&json!("Loves hiking")));
        assert_eq!(record.payload.len(), 2);
    }

    #[test]
    fn test_candidate_id_untagged() {
        let num: CandidateId = serde_json::from_value(json!(42)).unwrap();
        let text: CandidateId =
            serde_json::from_value(json!("1b4e28ba-2fa1-11d2-883f-0016d3cca427")).unwrap();
        assert_eq!(num, CandidateId::Num(42));
        assert!(matches!(text, CandidateId::Text(_)));
        assert_eq!(serde_json::to_value(&num).unwrap(), json!(42));
    }

    #[test]
    fn test_search_request_defaults() {
        let req = SearchRequest::new("hiking");
        assert_eq!(req.similarity_threshold, 0.3);
        assert_eq!(req.max_results, 10);
    }
}
