//! Request handlers and wire types.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, error, warn};

use super::AppState;
use crate::error::Error;
use crate::search::{CandidateId, ScoredResult};

/// Request body of `POST /query_embedding`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub query: Option<String>,
}

/// One entry of the success response: id, similarity, then payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResponse {
    pub id: CandidateId,
    pub similarity: f32,
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl From<ScoredResult> for MatchResponse {
    fn from(result: ScoredResult) -> Self {
        let mut payload = result.candidate.payload;
        // Payload must not shadow the fixed keys.
        payload.remove("id");
        payload.remove("similarity");
        Self {
            id: result.candidate.id,
            similarity: result.score,
            payload,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime: u64,
    pub model: String,
    pub dimension: usize,
    pub source: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            warn!("Rejected request: {}", self);
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub(super) async fn query_embedding(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<Vec<MatchResponse>>, Error> {
    // An unreadable body carries no query; validation rejects it like a missing one.
    let query = match body {
        Ok(Json(body)) => body.query.unwrap_or_default(),
        Err(rejection) => {
            debug!("Unreadable request body: {}", rejection.body_text());
            String::new()
        }
    };

    let request = state.pipeline.request(query);
    let results = state
        .pipeline
        .search_with_deadline(&request, state.request_timeout)
        .await?;

    Ok(Json(results.into_iter().map(MatchResponse::from).collect()))
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let vectorizer = state.pipeline.vectorizer();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        model: vectorizer.model_name().to_string(),
        dimension: vectorizer.dimension(),
        source: state.pipeline.source_name().to_string(),
    })
}

pub(super) async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Metrics are disabled" })),
        )
            .into_response(),
    }
}
