//! HTTP API.
//!
//! Thin transport shell around [`SearchPipeline`]:
//! - `POST /query_embedding` (alias `POST /search`): `{ "query": "..." }` →
//!   `[ { "id", "similarity", ...payload } ]`
//! - `GET /health`
//! - `GET /metrics` (Prometheus text format)
//!
//! Failures are always `{ "error": "<message>" }`, 400 for invalid input and
//! 500 for everything else.

mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::metrics::MetricsService;
use crate::search::SearchPipeline;

pub use handlers::{HealthResponse, MatchResponse, QueryBody};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Socket address to bind
    pub listen_address: String,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed origins; empty means any
    pub cors_origins: Vec<String>,
    /// Deadline for one search, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SearchPipeline>,
    pub metrics: Arc<MetricsService>,
    pub start_time: Instant,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(pipeline: SearchPipeline, metrics: MetricsService, config: &ApiConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(metrics),
            start_time: Instant::now(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

/// HTTP API server.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with tracing and CORS layers.
    pub fn router(&self) -> Result<Router> {
        let mut router = Router::new()
            .route("/query_embedding", post(handlers::query_embedding))
            .route("/search", post(handlers::query_embedding))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router = router.layer(self.cors_layer()?);
        }

        Ok(router)
    }

    fn cors_layer(&self) -> Result<CorsLayer> {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        if self.config.cors_origins.is_empty() {
            return Ok(layer.allow_origin(Any));
        }

        let origins = self
            .config
            .cors_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| Error::Config(format!("Invalid CORS origin '{}'", o)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(layer.allow_origin(AllowOrigin::list(origins)))
    }

    /// Serve until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_until(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let router = self.router()?;
        let listener = tokio::net::TcpListener::bind(&self.config.listen_address)
            .await
            .map_err(|e| {
                Error::Api(format!(
                    "Failed to bind {}: {}",
                    self.config.listen_address, e
                ))
            })?;

        info!("HTTP API listening on {}", self.config.listen_address);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Api(format!("Server error: {}", e)))
    }
}
