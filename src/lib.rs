//! # rustbiblio
//!
//! Bibliometric analysis pipeline: publication records in, a dimensional fact
//! table, discovered topics and a co-authorship graph out.
//!
//! ## Modules
//!
//! - [`corpus`] - Tolerant JSON record loader and corpus cache
//! - [`metrics`] - Quality metrics providers (simulated quartile, impact, citations, country)
//! - [`warehouse`] - Dimensional transformer and topic resolution
//! - [`text`] / [`lda`] - TF-IDF vectorization and LDA topic model
//! - [`graph`] - Co-authorship graph and spring layout
//! - [`olap`] - Filters and aggregates over the fact table
//! - [`export`] - Output tables
//! - [`pipeline`] - Parallel stage orchestration
//! - [`config`] - Pipeline configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustbiblio::{config::PipelineConfig, pipeline::Pipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(PipelineConfig::default())?;
//!     let report = pipeline.run(Path::new("corpus.json"), Path::new("results")).await?;
//!     println!("{} fact rows, {} topics", report.fact_rows, report.topic_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod error;
pub mod export;
pub mod graph;
pub mod lda;
pub mod metrics;
pub mod olap;
pub mod pipeline;
pub mod text;
pub mod warehouse;

pub use error::{BiblioError, Result, TopicError};
