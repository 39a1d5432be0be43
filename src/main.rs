//! biosearch CLI
//!
//! Command-line interface for running the bio section search service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use biosearch::api::MatchResponse;
use biosearch::search::load_sections;
use biosearch::{
    ApiServer, AppState, CandidateSource, EmbeddingProvider, EmbeddingService, MetricsService,
    QueryVectorizer, Result, SearchPipeline, SectionIndexer, ServiceConfig, SnapshotSource,
    DEFAULT_CONFIG_PATH,
};

/// Health response from the API.
#[derive(Debug, serde::Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime: u64,
    model: String,
}

#[derive(Parser)]
#[command(name = "biosearch")]
#[command(author, version, about = "Semantic search over bio sections", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: String,
    },

    /// Start the HTTP API
    Start {
        /// HTTP API listen address (overrides config)
        #[arg(long)]
        api_addr: Option<String>,
    },

    /// Run one search and print the JSON response
    Query {
        /// Query text
        text: String,

        /// Minimum similarity (overrides config)
        #[arg(long)]
        threshold: Option<f32>,

        /// Maximum number of results (overrides config)
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Embed bio sections into a candidate snapshot
    Index {
        /// JSON or JSONL file of `{ "id", "content", ... }` sections
        #[arg(short, long)]
        input: PathBuf,

        /// Snapshot to write (defaults to the configured snapshot path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check service health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8080")]
        endpoint: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Build the pipeline from configuration.
fn build_pipeline(config: &ServiceConfig) -> Result<SearchPipeline> {
    info!(
        "Loading embedding model {} (downloads on first use)...",
        config.embedding.model
    );
    let provider = Arc::new(EmbeddingService::with_config(&config.embedding)?);
    let vectorizer =
        QueryVectorizer::new(provider).with_norm_tolerance(config.embedding.norm_tolerance);
    let source = config.store.build_source()?;
    info!("Candidate source: {}", source.name());

    Ok(SearchPipeline::new(vectorizer, source, config.search.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Writing default configuration to: {}", output);
            ServiceConfig::default().save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start { api_addr } => {
            info!("Starting biosearch...");

            let mut config = ServiceConfig::resolve(&cli.config)?;
            if let Some(addr) = api_addr {
                config.api.listen_address = addr;
            }

            info!("API address: {}", config.api.listen_address);
            info!(
                "Similarity threshold: {}, max results: {}",
                config.search.similarity_threshold, config.search.max_results
            );

            let pipeline = build_pipeline(&config)?;
            let metrics = MetricsService::new(config.metrics.clone());
            if !metrics.is_enabled() {
                warn!("Metrics endpoint disabled");
            }

            let state = AppState::new(pipeline, metrics, &config.api);
            let server = ApiServer::with_state(config.api.clone(), state);

            info!("Press Ctrl+C to stop");
            server
                .run_until(async {
                    if let Err(e) = signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Received shutdown signal");
                })
                .await?;
            info!("Service stopped");
        }

        Commands::Query {
            text,
            threshold,
            max_results,
        } => {
            let config = ServiceConfig::resolve(&cli.config)?;
            let pipeline = build_pipeline(&config)?;

            let mut request = pipeline.request(text);
            if let Some(t) = threshold {
                request = request.with_threshold(t);
            }
            if let Some(k) = max_results {
                request = request.with_max_results(k);
            }

            let results: Vec<MatchResponse> = pipeline
                .search(&request)
                .await?
                .into_iter()
                .map(MatchResponse::from)
                .collect();
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Index { input, output } => {
            let config = ServiceConfig::resolve(&cli.config)?;
            let output = output.unwrap_or_else(|| config.store.snapshot_path.clone());

            let provider: Arc<dyn EmbeddingProvider> =
                Arc::new(EmbeddingService::with_config(&config.embedding)?);
            let sections = load_sections(&input).await?;
            info!("Indexing {} sections from {}", sections.len(), input.display());

            let report = SectionIndexer::new(provider).index(sections).await?;
            if !report.skipped.is_empty() {
                warn!("Skipped {} empty sections", report.skipped.len());
            }

            SnapshotSource::write(&output, &report.records).await?;
            info!(
                "Wrote {} candidates to {}",
                report.records.len(),
                output.display()
            );
        }

        Commands::Health { endpoint } => {
            info!("Checking service health at: {}", endpoint);

            let health_url = format!("{}/health", endpoint.trim_end_matches('/'));

            match tokio::time::timeout(std::time::Duration::from_secs(5), check_health(&health_url))
                .await
            {
                Ok(Ok(response)) => {
                    info!("Service status: {}", response.status);
                    info!("Version: {}", response.version);
                    info!("Model: {}", response.model);
                    info!("Uptime: {} seconds", response.uptime);
                }
                Ok(Err(e)) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
                Err(_) => {
                    error!("Health check timed out");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Perform a health check against the API endpoint.
async fn check_health(url: &str) -> Result<HealthResponse> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let url = url.trim_start_matches("http://");
    let (host_port, path) = url
        .split_once('/')
        .map(|(h, p)| (h, format!("/{}", p)))
        .unwrap_or((url, "/health".to_string()));

    let mut stream = TcpStream::connect(host_port)
        .await
        .map_err(|e| biosearch::Error::Api(format!("Connection failed: {}", e)))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host_port
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| biosearch::Error::Api(format!("Write failed: {}", e)))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .map_err(|e| biosearch::Error::Api(format!("Read failed: {}", e)))?;

    let response_str = String::from_utf8_lossy(&response);

    // Body follows the blank line after the headers
    let body = response_str
        .split("\r\n\r\n")
        .nth(1)
        .ok_or_else(|| biosearch::Error::Api("Invalid HTTP response".to_string()))?;

    serde_json::from_str(body)
        .map_err(|e| biosearch::Error::Api(format!("JSON parse error: {}", e)))
}
