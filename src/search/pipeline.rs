//! Request orchestration: validate, vectorize, fetch, rank.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument};

use super::embedding::QueryVectorizer;
use super::ranker::{RankAnomaly, SimilarityRanker};
use super::source::CandidateSource;
use super::types::{ScoredResult, SearchRequest};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// Everything produced by one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Ranked results, best first
    pub results: Vec<ScoredResult>,
    /// Candidates skipped while ranking
    pub anomalies: Vec<RankAnomaly>,
    /// Size of the candidate snapshot
    pub candidate_count: usize,
}

/// Wires a [`QueryVectorizer`] and a [`CandidateSource`] to the ranker.
///
/// Holds no per-request state, so one instance serves concurrent requests.
#[derive(Clone)]
pub struct SearchPipeline {
    vectorizer: QueryVectorizer,
    source: Arc<dyn CandidateSource>,
    ranker: SimilarityRanker,
    settings: SearchConfig,
}

impl SearchPipeline {
    pub fn new(
        vectorizer: QueryVectorizer,
        source: Arc<dyn CandidateSource>,
        settings: SearchConfig,
    ) -> Self {
        Self {
            vectorizer,
            source,
            ranker: SimilarityRanker::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SearchConfig {
        &self.settings
    }

    pub fn vectorizer(&self) -> &QueryVectorizer {
        &self.vectorizer
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Build a request for `query` using the configured threshold and cap.
    pub fn request(&self, query: impl Into<String>) -> SearchRequest {
        SearchRequest {
            query_text: query.into(),
            similarity_threshold: self.settings.similarity_threshold,
            max_results: self.settings.max_results,
        }
    }

    /// Search with the configured defaults.
    pub async fn query(&self, query: &str) -> Result<Vec<ScoredResult>> {
        self.search(&self.request(query)).await
    }

    /// Run a search, returning only the ranked results.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredResult>> {
        self.search_with_report(request)
            .await
            .map(|outcome| outcome.results)
    }

    /// Run a search and report skipped candidates alongside the results.
    pub async fn search_with_report(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        self.observe(request, None).await
    }

    /// Run a search that fails with [`Error::Timeout`] once `deadline` passes.
    ///
    /// The in-flight embedding or fetch is dropped at its next await point.
    pub async fn search_with_deadline(
        &self,
        request: &SearchRequest,
        deadline: Duration,
    ) -> Result<Vec<ScoredResult>> {
        self.observe(request, Some(deadline))
            .await
            .map(|outcome| outcome.results)
    }

    async fn observe(
        &self,
        request: &SearchRequest,
        deadline: Option<Duration>,
    ) -> Result<SearchOutcome> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("search", %request_id);
        let started = Instant::now();

        let run = self.run(request).instrument(span.clone());
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    let millis = limit.as_millis() as u64;
                    warn!(parent: &span, deadline_ms = millis, "Search timed out");
                    Err(Error::Timeout(millis))
                }
            },
            None => run.await,
        };
        metrics::record_search(&result, started.elapsed());
        result
    }

    async fn run(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        validate_request(request)?;

        let query_vector = self.vectorizer.embed(&request.query_text).await?;
        debug!(dimension = query_vector.dimension(), "Query vectorized");

        let candidates = self.source.fetch_candidates().await?;
        metrics::record_candidate_count(candidates.len());

        let outcome = self.ranker.rank_with_report(
            &query_vector,
            &candidates,
            request.similarity_threshold,
            request.max_results,
        )?;
        metrics::record_dimension_mismatches(outcome.anomalies.len());

        info!(
            source = self.source.name(),
            candidates = candidates.len(),
            results = outcome.results.len(),
            skipped = outcome.anomalies.len(),
            "Search complete"
        );

        Ok(SearchOutcome {
            results: outcome.results,
            anomalies: outcome.anomalies,
            candidate_count: candidates.len(),
        })
    }
}

/// Check a request before any external call is made.
pub fn validate_request(request: &SearchRequest) -> Result<()> {
    if request.query_text.trim().is_empty() {
        return Err(Error::InvalidInput("Missing query parameter".to_string()));
    }
    if !(-1.0..=1.0).contains(&request.similarity_threshold) {
        return Err(Error::InvalidInput(format!(
            "similarity_threshold must be within [-1, 1], got {}",
            request.similarity_threshold
        )));
    }
    if request.max_results == 0 {
        return Err(Error::InvalidInput(
            "max_results must be at least 1".to_string(),
        ));
    }
    Ok(())
}
