//! Candidate sources.
//!
//! A [`CandidateSource`] hands the pipeline a read-only snapshot of every
//! embedded bio section. Three backends are provided:
//!
//! - [`MemorySource`]: in-process, for tests and embedding into other programs
//! - [`SnapshotSource`]: a JSON array or JSONL file, re-read on every fetch
//! - [`QdrantSource`]: scrolls a Qdrant collection with vectors and payload

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vectors_output::VectorsOptions, PointId,
    RetrievedPoint, ScrollPointsBuilder, Value as QdrantValue, VectorOutput,
};
use qdrant_client::Qdrant;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::{CandidateId, CandidateRecord, Embedding};
use crate::error::{Error, Result};

/// Capability that supplies the candidate collection for one request.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &str;

    /// Fetch every candidate, in a stable order.
    async fn fetch_candidates(&self) -> Result<Vec<CandidateRecord>>;
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory candidate collection.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: RwLock<Vec<CandidateRecord>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source pre-filled with `records`.
    pub fn with_records(records: Vec<CandidateRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Insert or replace records by id. Replaced records keep their position.
    pub async fn upsert(&self, records: impl IntoIterator<Item = CandidateRecord>) {
        let mut store = self.records.write().await;
        for record in records {
            match store.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => store.push(record),
            }
        }
    }

    /// Remove a record, returning whether it existed.
    pub async fn remove(&self, id: &CandidateId) -> bool {
        let mut store = self.records.write().await;
        let before = store.len();
        store.retain(|r| &r.id != id);
        store.len() != before
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CandidateSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidateRecord>> {
        Ok(self.records.read().await.clone())
    }
}

// ============================================================================
// Snapshot file
// ============================================================================

/// Candidates stored in a JSON (array) or JSONL file.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse snapshot contents. JSONL is chosen by the `.jsonl` extension.
    pub fn parse(path: &Path, contents: &str) -> Result<Vec<CandidateRecord>> {
        if is_jsonl(path) {
            contents
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str(line).map_err(|e| {
                        Error::Store(format!("{}:{}: {}", path.display(), n + 1, e))
                    })
                })
                .collect()
        } else {
            serde_json::from_str(contents)
                .map_err(|e| Error::Store(format!("{}: {}", path.display(), e)))
        }
    }

    /// Write `records` in the format implied by `path`.
    pub async fn write(path: &Path, records: &[CandidateRecord]) -> Result<()> {
        let body = if is_jsonl(path) {
            let mut out = String::new();
            for record in records {
                out.push_str(&serde_json::to_string(record)?);
                out.push('\n');
            }
            out
        } else {
            serde_json::to_string_pretty(records)?
        };
        tokio::fs::write(path, body).await?;
        debug!(path = %path.display(), count = records.len(), "Wrote candidate snapshot");
        Ok(())
    }
}

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

#[async_trait]
impl CandidateSource for SnapshotSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidateRecord>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Store(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let records = Self::parse(&self.path, &contents)?;
        debug!(path = %self.path.display(), count = records.len(), "Loaded candidate snapshot");
        Ok(records)
    }
}

// ============================================================================
// Qdrant
// ============================================================================

/// Candidates held in a Qdrant collection.
pub struct QdrantSource {
    client: Qdrant,
    collection: String,
    vector_name: Option<String>,
    page_size: u32,
}

impl QdrantSource {
    /// Connect to a Qdrant instance (gRPC URL, e.g. `http://localhost:6334`).
    pub fn connect(
        url: &str,
        api_key: Option<&str>,
        collection: impl Into<String>,
        page_size: u32,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            collection: collection.into(),
            vector_name: None,
            page_size: page_size.max(1),
        })
    }

    /// Read a named vector instead of the collection's default vector.
    pub fn with_vector_name(mut self, name: impl Into<String>) -> Self {
        self.vector_name = Some(name.into());
        self
    }

    fn convert_point(&self, point: RetrievedPoint) -> Option<CandidateRecord> {
        let id = point.id.and_then(convert_point_id)?;

        let vector = point
            .vectors
            .and_then(|v| v.vectors_options)
            .and_then(|options| match options {
                VectorsOptions::Vector(v) if self.vector_name.is_none() => Some(v),
                VectorsOptions::Vectors(named) => self
                    .vector_name
                    .as_ref()
                    .and_then(|name| named.vectors.get(name).cloned()),
                _ => None,
            })
            .map(dense_values);

        let Some(vector) = vector else {
            warn!(candidate_id = %id, collection = %self.collection, "Point has no usable vector");
            return None;
        };

        Some(CandidateRecord {
            id,
            vector: Embedding::new(vector),
            payload: convert_payload(point.payload),
        })
    }
}

#[async_trait]
impl CandidateSource for QdrantSource {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidateRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut request = ScrollPointsBuilder::new(self.collection.clone())
                .limit(self.page_size)
                .with_payload(true)
                .with_vectors(true);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }

            let response = self.client.scroll(request).await?;
            records.extend(
                response
                    .result
                    .into_iter()
                    .filter_map(|point| self.convert_point(point)),
            );

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(collection = %self.collection, count = records.len(), "Scrolled Qdrant collection");
        Ok(records)
    }
}

#[allow(deprecated)]
fn dense_values(vector: VectorOutput) -> Vec<f32> {
    vector.data
}

fn convert_point_id(id: PointId) -> Option<CandidateId> {
    match id.point_id_options? {
        PointIdOptions::Num(n) => Some(CandidateId::Num(n)),
        PointIdOptions::Uuid(s) => Some(CandidateId::Text(s)),
    }
}

fn convert_payload(payload: HashMap<String, QdrantValue>) -> Map<String, JsonValue> {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect()
}

fn qdrant_value_to_json(value: QdrantValue) -> JsonValue {
    match value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::from(i),
        Some(Kind::DoubleValue(d)) => JsonValue::from(d),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => {
            JsonValue::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => JsonValue::Object(convert_payload(s.fields)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::{ListValue, Struct};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_upsert_keeps_order_and_replaces() {
        let source = MemorySource::new();
        source
            .upsert(vec![
                CandidateRecord::new(1, vec![1.0, 0.0]),
                CandidateRecord::new(2, vec![0.0, 1.0]),
            ])
            .await;
        source
            .upsert(vec![CandidateRecord::new(1, vec![0.6, 0.8]).with_field("content", "updated")])
            .await;

        let records = source.fetch_candidates().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, CandidateId::Num(1));
        assert_eq!(records[0].vector.as_slice(), &[0.6, 0.8]);
        assert_eq!(records[1].id, CandidateId::Num(2));
    }

    #[tokio::test]
    async fn test_memory_remove_and_clear() {
        let source = MemorySource::with_records(vec![
            CandidateRecord::new(1, vec![1.0]),
            CandidateRecord::new(2, vec![1.0]),
        ]);

        assert!(source.remove(&CandidateId::Num(1)).await);
        assert!(!source.remove(&CandidateId::Num(1)).await);
        assert_eq!(source.len().await, 1);

        source.clear().await;
        assert!(source.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.json");
        let records = vec![
            CandidateRecord::new(1, vec![1.0, 0.0]).with_field("content", "Climbs mountains"),
            CandidateRecord::new("abc", vec![0.0, 1.0]),
        ];

        SnapshotSource::write(&path, &records).await.unwrap();
        let loaded = SnapshotSource::new(&path).fetch_candidates().await.unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_snapshot_jsonl_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.jsonl");
        tokio::fs::write(
            &path,
            "{\"id\":1,\"embedding\":[1.0,0.0]}\n\n{\"id\":2,\"vector\":[0.0,1.0],\"content\":\"x\"}\n",
        )
        .await
        .unwrap();

        let loaded = SnapshotSource::new(&path).fetch_candidates().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].payload.get("content"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_snapshot_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        tokio::fs::write(&path, "{\"id\":1,\"embedding\":[1.0]}\nnot json\n")
            .await
            .unwrap();

        let err = SnapshotSource::new(&path).fetch_candidates().await.unwrap_err();
        assert!(matches!(err, Error::Store(ref msg) if msg.contains(":2:")));
    }

    #[tokio::test]
    async fn test_snapshot_missing_file_is_store_error() {
        let source = SnapshotSource::new("/nonexistent/candidates.json");
        assert!(matches!(
            source.fetch_candidates().await,
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn test_qdrant_payload_conversion() {
        let mut fields = HashMap::new();
        fields.insert(
            "nested".to_string(),
            QdrantValue {
                kind: Some(Kind::StringValue("inner".to_string())),
            },
        );

        let mut payload = HashMap::new();
        payload.insert(
            "content".to_string(),
            QdrantValue {
                kind: Some(Kind::StringValue("Bakes bread".to_string())),
            },
        );
        payload.insert(
            "rank".to_string(),
            QdrantValue {
                kind: Some(Kind::IntegerValue(3)),
            },
        );
        payload.insert(
            "tags".to_string(),
            QdrantValue {
                kind: Some(Kind::ListValue(ListValue {
                    values: vec![QdrantValue {
                        kind: Some(Kind::BoolValue(true)),
                    }],
                })),
            },
        );
        payload.insert(
            "meta".to_string(),
            QdrantValue {
                kind: Some(Kind::StructValue(Struct { fields })),
            },
        );

        let json = JsonValue::Object(convert_payload(payload));
        assert_eq!(
            json,
            json!({
                "content": "Bakes bread",
                "rank": 3,
                "tags": [true],
                "meta": { "nested": "inner" }
            })
        );
    }

    #[test]
    fn test_qdrant_point_id_conversion() {
        let num = PointId {
            point_id_options: Some(PointIdOptions::Num(9)),
        };
        let uuid = PointId {
            point_id_options: Some(PointIdOptions::Uuid("u-1".to_string())),
        };
        assert_eq!(convert_point_id(num), Some(CandidateId::Num(9)));
        assert_eq!(convert_point_id(uuid), Some(CandidateId::from("u-1")));
        assert_eq!(convert_point_id(PointId { point_id_options: None }), None);
    }
}
