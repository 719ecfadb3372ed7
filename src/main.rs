//! rustbiblio - Bibliometric analysis pipeline
//!
//! Turns a scraped publication corpus into a dimensional fact table, LDA topics
//! and a co-authorship graph, then serves read-only queries over the results.
//!
//! ## Usage
//!
//! ### Run the pipeline
//! ```bash
//! rustbiblio run --input articles.json --output results --seed 42
//! ```
//!
//! ### Query a finished run
//! ```bash
//! rustbiblio query --results results --from 2020 --to 2023 --quartiles Q1,Q2
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! rustbiblio serve --results results --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use rustbiblio::{
    config::PipelineConfig,
    export,
    graph::{GraphBuilder, GraphView},
    lda::CancelToken,
    olap::{self, AggregateView, FilterRequest, TopicExplorer},
    pipeline::{Pipeline, RunReport},
    text::TopicCount,
    warehouse::FactPublication,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Bibliometric analysis pipeline
#[derive(Parser)]
#[command(name = "rustbiblio")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a corpus, build the fact table, topics and graph, write results
    Run {
        /// Corpus JSON file (array of publication records)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (regenerated on every run)
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Random seed for simulated metrics, topic model and layout
        #[arg(long)]
        seed: Option<u64>,

        /// Number of topics (K)
        #[arg(long)]
        topics: Option<usize>,

        /// Topic model iterations
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Wall-clock budget for the topic model, in seconds
        #[arg(long)]
        time_budget_secs: Option<u64>,

        /// Publications feeding the co-author graph (first N, 0 = all)
        #[arg(long)]
        graph_sample: Option<usize>,
    },

    /// Filter and aggregate the fact table of a finished run
    Query {
        /// Results directory written by `run`
        #[arg(short, long, default_value = "results")]
        results: PathBuf,

        /// First year (inclusive)
        #[arg(long)]
        from: Option<i32>,

        /// Last year (inclusive)
        #[arg(long)]
        to: Option<i32>,

        /// Comma-separated quartiles, e.g. "Q1,Q2"
        #[arg(long)]
        quartiles: Option<String>,

        /// Comma-separated countries, e.g. "France,USA"
        #[arg(long)]
        countries: Option<String>,

        /// Number of top authors to list
        #[arg(long, default_value = "10")]
        top_authors: usize,

        /// List the articles of this topic label
        #[arg(long)]
        topic: Option<String>,

        /// Print the aggregate view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start HTTP server over a finished run
    Serve {
        /// Results directory written by `run`
        #[arg(short, long, default_value = "results")]
        results: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Run {
            input,
            output,
            config,
            seed,
            topics,
            max_iterations,
            time_budget_secs,
            graph_sample,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => PipelineConfig::default(),
            };
            if seed.is_some() {
                config.seed = seed;
            }
            if let Some(k) = topics {
                config.text.num_topics = k;
            }
            if let Some(n) = max_iterations {
                config.text.max_iterations = n;
            }
            if time_budget_secs.is_some() {
                config.text.time_budget_secs = time_budget_secs;
            }
            if let Some(n) = graph_sample {
                config.graph.sample_limit = n;
            }
            run_pipeline(config, &input, &output).await
        }
        Commands::Query {
            results,
            from,
            to,
            quartiles,
            countries,
            top_authors,
            topic,
            json,
        } => {
            let request = FilterRequest {
                year_min: from,
                year_max: to,
                quartiles: quartiles.as_deref().map(olap::parse_quartiles).transpose()?,
                countries: countries.as_deref().map(olap::parse_list),
                topic,
            };
            run_query(&results, &request, top_authors, json)
        }
        Commands::Serve {
            results,
            port,
            host,
        } => run_server(results, host, port).await,
    }
}

// ============================================================================
// Analysis Pipeline
// ============================================================================

async fn run_pipeline(config: PipelineConfig, input: &Path, output: &Path) -> Result<()> {
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling topic model");
                cancel.cancel();
            }
        });
    }

    let pipeline = Pipeline::new(config)
        .context("Invalid configuration")?
        .with_cancel(cancel);

    println!("\n--- Stage 1: Loading corpus ---");
    let corpus = pipeline
        .load(input)
        .with_context(|| format!("Failed to load corpus {}", input.display()))?;
    println!(
        "Loaded {} records ({} skipped without title)",
        corpus.records.len(),
        corpus.skipped
    );

    println!("\n--- Stage 2: Fact table, topics and co-author graph ---");
    let analysis = pipeline.analyze(Arc::clone(&corpus)).await?;
    println!("Fact table: {} rows", analysis.facts.len());
    match &analysis.topics {
        Ok(topics) => {
            println!(
                "Topics: {} from {} abstracts ({} iterations{})",
                topics.topics.len(),
                topics.valid_documents,
                topics.iterations,
                if topics.stopped_early { ", stopped early" } else { "" }
            );
            for topic in &topics.topics {
                println!("  {} ({} docs)", topic.label(), topic.document_count);
            }
        }
        Err(e) => println!("Topics: skipped ({})", e),
    }
    println!(
        "Co-author graph: {} authors, {} links (first {} publications)",
        analysis.graph.nodes.len(),
        analysis.graph.edges.len(),
        analysis.graph.sampled_publications
    );

    println!("\n--- Stage 3: Writing results ---");
    let report = pipeline
        .export(&corpus, &analysis, input, output)
        .with_context(|| format!("Failed to write results to {}", output.display()))?;
    info!(seed = report.seed, "Run report written");

    println!("\n✓ Pipeline complete. Results in: {}", output.display());
    Ok(())
}

// ============================================================================
// Query
// ============================================================================

fn run_query(results: &Path, request: &FilterRequest, top_authors: usize, json: bool) -> Result<()> {
    let facts = export::load_fact_table(results).context("Failed to load fact table")?;
    let config = RunReport::effective_config(results).context("Failed to read run report")?;
    let spec = request.resolve(&facts)?;
    let view = AggregateView::compute(&facts, &spec, top_authors, config.graph.min_author_len);
    let explorer = request
        .topic
        .as_deref()
        .map(|topic| TopicExplorer::compute(&facts, &spec, topic));
    let topics = export::load_topic_distribution(results)?;

    if json {
        match explorer {
            Some(explorer) => println!("{}", serde_json::to_string_pretty(&explorer)?),
            None => println!("{}", serde_json::to_string_pretty(&view)?),
        }
        return Ok(());
    }

    let k = &view.kpis;
    println!("\n--- Overview ---");
    println!("Publications:       {}", k.count);
    println!("Total citations:    {}", k.total_citations);
    match k.mean_impact {
        Some(mean) => println!("Mean impact score:  {:.2}", mean),
        None => println!("Mean impact score:  n/a"),
    }
    println!("Countries:          {}", k.distinct_countries);

    let print_counts = |title: &str, rows: &[olap::DimensionCount]| {
        println!("\n--- {} ---", title);
        if rows.is_empty() {
            println!("(no rows match the filter)");
        }
        for row in rows {
            println!("{:<40} {:>6}", row.dimension_value, row.count);
        }
    };
    print_counts("Publications per year", &view.by_year);
    print_counts("Quartiles", &view.by_quartile);
    print_counts("Countries", &view.by_country);
    print_counts("Topics", &view.by_topic);
    print_counts("Top authors", &view.top_authors);

    println!("\n--- Topic distribution (model) ---");
    match topics {
        Some(topics) => {
            for t in topics {
                println!("{:<40} {:>6}", t.topic, t.count);
            }
        }
        None => println!("No topic data available"),
    }

    if let Some(explorer) = explorer {
        println!(
            "\n--- {} articles for '{}' ---",
            explorer.articles.len(),
            explorer.topic
        );
        if explorer.articles.is_empty() {
            println!("Available topics: {}", explorer.available_topics.join(" | "));
        }
        for a in &explorer.articles {
            println!("{:<60} {:>4}  {:<30} {:>5}", a.title, a.year, a.journal, a.citations);
        }
    }
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(results: PathBuf, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, results = %results.display(), "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let facts = export::load_fact_table(&results).context("Failed to load fact table")?;
    let topics = export::load_topic_distribution(&results)?;
    let config = RunReport::effective_config(&results).context("Failed to read run report")?;

    let app_state = Arc::new(ServeState {
        facts,
        topics,
        graph: GraphBuilder::from_config(&config.graph),
        top_authors: config.top_authors,
        layout_seed: config.seed.unwrap_or_default(),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/query", post(query_handler))
        .route("/graph", post(graph_handler))
        .route("/topics", get(topics_handler))
        .route("/topic_articles", post(topic_articles_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Read-only state shared by every handler
struct ServeState {
    facts: Vec<FactPublication>,
    topics: Option<Vec<TopicCount>>,
    graph: GraphBuilder,
    top_authors: usize,
    layout_seed: u64,
}

/// Error body for rejected requests
#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            status: format!("error: {}", e),
        }),
    )
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Filter + aggregates for the dashboard
async fn query_handler(
    State(state): State<Arc<ServeState>>,
    Json(req): Json<FilterRequest>,
) -> Result<Json<AggregateView>, ApiError> {
    let spec = req.resolve(&state.facts).map_err(bad_request)?;
    let view = AggregateView::compute(&state.facts, &spec, state.top_authors, state.graph.min_author_len);
    info!(rows = view.kpis.count, "Query");
    Ok(Json(view))
}

/// Co-author graph of the (prefix-sampled) filtered subset
async fn graph_handler(
    State(state): State<Arc<ServeState>>,
    Json(req): Json<FilterRequest>,
) -> Result<Json<GraphView>, ApiError> {
    let spec = req.resolve(&state.facts).map_err(bad_request)?;
    let authors: Vec<&str> = olap::filter(&state.facts, &spec)
        .into_iter()
        .map(|f| f.authors.as_str())
        .collect();
    let view = state.graph.view(&authors, state.layout_seed);
    info!(nodes = view.nodes.len(), edges = view.edges.len(), "Graph");
    Ok(Json(view))
}

/// Topic distribution response
#[derive(Debug, Serialize)]
struct TopicsResponse {
    status: String,
    topics: Vec<TopicCount>,
}

async fn topics_handler(State(state): State<Arc<ServeState>>) -> Json<TopicsResponse> {
    match &state.topics {
        Some(topics) => Json(TopicsResponse {
            status: "success".to_string(),
            topics: topics.clone(),
        }),
        None => Json(TopicsResponse {
            status: "no topic data available".to_string(),
            topics: Vec::new(),
        }),
    }
}

/// Topic explorer: articles of `topic` within the filtered table
async fn topic_articles_handler(
    State(state): State<Arc<ServeState>>,
    Json(req): Json<FilterRequest>,
) -> Result<Json<TopicExplorer>, ApiError> {
    let spec = req.resolve(&state.facts).map_err(bad_request)?;
    let topic = req
        .topic
        .as_deref()
        .ok_or_else(|| bad_request("missing 'topic'"))?;
    let explorer = TopicExplorer::compute(&state.facts, &spec, topic);
    info!(topic = %topic, articles = explorer.articles.len(), "Topic articles");
    Ok(Json(explorer))
}
