//! Turns raw bio sections into candidate records.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use super::embedding::{EmbedOptions, EmbeddingProvider};
use super::types::{CandidateId, CandidateRecord, Embedding};
use crate::error::{Error, Result};

/// Default number of sections sent to the provider per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// A text segment of a user bio, before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioSection {
    pub id: CandidateId,
    /// Text that gets embedded
    pub content: String,
    /// Carried through to the candidate payload untouched
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl BioSection {
    pub fn new(id: impl Into<CandidateId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }
}

/// Result of an indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub records: Vec<CandidateRecord>,
    /// Sections skipped because their content was blank
    pub skipped: Vec<CandidateId>,
}

/// Embeds sections with the same provider used for queries.
pub struct SectionIndexer {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SectionIndexer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Embed every non-blank section, keeping input order.
    pub async fn index(&self, sections: Vec<BioSection>) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let (kept, blank): (Vec<_>, Vec<_>) = sections
            .into_iter()
            .partition(|s| !s.content.trim().is_empty());

        for section in blank {
            warn!(section_id = %section.id, "Skipping bio section with empty content");
            report.skipped.push(section.id);
        }

        let dimension = self.provider.dimension();
        for batch in kept.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|s| s.content.clone()).collect();
            let vectors = self
                .provider
                .embed_batch(&texts, EmbedOptions::default())
                .await?;

            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "Provider returned {} vectors for {} sections",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (section, vector) in batch.iter().zip(vectors) {
                if vector.len() != dimension {
                    return Err(Error::EmbeddingUnavailable(format!(
                        "Section {} embedded to {} dimensions, expected {}",
                        section.id,
                        vector.len(),
                        dimension
                    )));
                }

                let mut payload = section.extra.clone();
                payload.insert(
                    "content".to_string(),
                    JsonValue::String(section.content.clone()),
                );
                report.records.push(CandidateRecord {
                    id: section.id.clone(),
                    vector: Embedding::new(vector),
                    payload,
                });
            }
        }

        info!(
            indexed = report.records.len(),
            skipped = report.skipped.len(),
            model = %self.provider.model_name(),
            "Indexed bio sections"
        );
        Ok(report)
    }
}

/// Load sections from a JSON array or JSONL file.
pub async fn load_sections(path: &Path) -> Result<Vec<BioSection>> {
    let contents = tokio::fs::read_to_string(path).await?;
    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    } else {
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Maps text length onto a 2-d unit vector.
    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }

        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str, _options: EmbedOptions) -> Result<Vec<f32>> {
            let angle = text.len() as f32 * 0.1;
            Ok(vec![angle.cos(), angle.sin()])
        }
    }

    #[tokio::test]
    async fn test_index_embeds_and_keeps_payload() {
        let mut section = BioSection::new(1, "I build boats");
        section.extra.insert("bio_id".to_string(), json!("b-7"));

        let report = SectionIndexer::new(Arc::new(LengthProvider))
            .index(vec![section, BioSection::new(2, "Chess")])
            .await
            .unwrap();

        assert_eq!(report.records.len(), 2);
        let first = &report.records[0];
        assert_eq!(first.id, CandidateId::Num(1));
        assert_eq!(first.vector.dimension(), 2);
        assert_eq!(first.payload.get("content"), Some(&json!("I build boats")));
        assert_eq!(first.payload.get("bio_id"), Some(&json!("b-7")));
        assert_eq!(report.records[1].id, CandidateId::Num(2));
    }

    #[tokio::test]
    async fn test_index_skips_blank_sections() {
        let report = SectionIndexer::new(Arc::new(LengthProvider))
            .with_batch_size(1)
            .index(vec![
                BioSection::new(1, "   "),
                BioSection::new(2, "Sailing"),
                BioSection::new(3, ""),
            ])
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped, vec![CandidateId::Num(1), CandidateId::Num(3)]);
    }

    #[tokio::test]
    async fn test_load_sections_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("sections.json");
        tokio::fs::write(&json_path, r#"[{"id": 1, "content": "Runs marathons"}]"#)
            .await
            .unwrap();
        let sections = load_sections(&json_path).await.unwrap();
        assert_eq!(sections, vec![BioSection::new(1, "Runs marathons")]);

        let jsonl_path = dir.path().join("sections.jsonl");
        tokio::fs::write(
            &jsonl_path,
            "{\"id\": \"a\", \"content\": \"x\"}\n{\"id\": \"b\", \"content\": \"y\", \"lang\": \"en\"}\n",
        )
        .await
        .unwrap();
        let sections = load_sections(&jsonl_path).await.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].extra.get("lang"), Some(&json!("en")));
    }
}
