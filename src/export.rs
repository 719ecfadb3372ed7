//! Output tables: CSV/JSON writers and the readers used by `query`/`serve`.
//!
//! Every run regenerates the whole output directory. Empty tables are still
//! written with their header row so consumers can tell "no rows" from "no file".

use crate::error::{BiblioError, Result};
use crate::graph::{GraphEdge, GraphNode};
use crate::olap::DimensionCount;
use crate::text::{TopicAnalysis, TopicCount};
use crate::warehouse::{FactPublication, FACT_COLUMNS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const FACT_TABLE_FILE: &str = "F_Publications.csv";
pub const TOPICS_FILE: &str = "topics.csv";
pub const TOPIC_DIST_FILE: &str = "topics_dist.csv";
pub const TRENDS_FILE: &str = "trends.csv";
pub const AUTHORS_FILE: &str = "authors.csv";
pub const GEOGRAPHY_FILE: &str = "geography.csv";
pub const GRAPH_NODES_FILE: &str = "graph_nodes.csv";
pub const GRAPH_EDGES_FILE: &str = "graph_edges.csv";
pub const RUN_REPORT_FILE: &str = "run_report.json";

const TOPIC_COLUMNS: &[&str] = &["topic", "keywords", "document_count"];
const TOPIC_DIST_COLUMNS: &[&str] = &["topic", "count"];
const SUMMARY_COLUMNS: &[&str] = &["dimension_value", "count"];
const NODE_COLUMNS: &[&str] = &["author", "degree", "x", "y"];
const EDGE_COLUMNS: &[&str] = &["source", "target"];

/// One row of `topics.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRow {
    pub topic: usize,
    /// Ranked keywords joined with ", "
    pub keywords: String,
    pub document_count: usize,
}

impl TopicRow {
    pub fn from_analysis(analysis: &TopicAnalysis) -> Vec<TopicRow> {
        analysis
            .topics
            .iter()
            .map(|t| TopicRow {
                topic: t.id,
                keywords: t.keywords.join(", "),
                document_count: t.document_count,
            })
            .collect()
    }
}

/// Write `data` as CSV with a header row.
///
/// `columns` is the header written when `data` is empty; otherwise the header
/// comes from the serialized field names.
pub fn save_csv<T: Serialize>(path: &Path, data: &[T], columns: &[&str]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;

    if data.is_empty() {
        wtr.write_record(columns)?;
    }
    for item in data {
        wtr.serialize(item)?;
    }
    wtr.flush()?;

    debug!(path = %path.display(), rows = data.len(), "Saved CSV");
    Ok(())
}

/// Read every row of a CSV file
pub fn load_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(BiblioError::MissingResults(path.to_path_buf()));
    }
    let mut rdr = csv::Reader::from_path(path)?;
    let rows = rdr.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(rows)
}

pub fn write_fact_table(dir: &Path, facts: &[FactPublication]) -> Result<()> {
    save_csv(&dir.join(FACT_TABLE_FILE), facts, FACT_COLUMNS)
}

pub fn write_topics(dir: &Path, analysis: &TopicAnalysis) -> Result<()> {
    save_csv(&dir.join(TOPICS_FILE), &TopicRow::from_analysis(analysis), TOPIC_COLUMNS)?;
    save_csv(&dir.join(TOPIC_DIST_FILE), &analysis.distribution(), TOPIC_DIST_COLUMNS)
}

/// Write a `{dimension_value, count}` summary table under `file_name`
pub fn write_summary(dir: &Path, file_name: &str, rows: &[DimensionCount]) -> Result<()> {
    save_csv(&dir.join(file_name), rows, SUMMARY_COLUMNS)
}

pub fn write_graph(dir: &Path, nodes: &[GraphNode], edges: &[GraphEdge]) -> Result<()> {
    save_csv(&dir.join(GRAPH_NODES_FILE), nodes, NODE_COLUMNS)?;
    save_csv(&dir.join(GRAPH_EDGES_FILE), edges, EDGE_COLUMNS)
}

/// Pretty-printed JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Remove artifacts of a previous run that this run may not regenerate
pub fn clear_previous_topics(dir: &Path) -> Result<()> {
    for name in [TOPICS_FILE, TOPIC_DIST_FILE] {
        let path = dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!(path = %path.display(), "Removed stale topic table");
        }
    }
    Ok(())
}

/// JSON document, `Ok(None)` when the file is absent
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Fact table of a finished run
pub fn load_fact_table(dir: &Path) -> Result<Vec<FactPublication>> {
    let facts: Vec<FactPublication> = load_csv(&dir.join(FACT_TABLE_FILE))?;
    info!(rows = facts.len(), dir = %dir.display(), "Loaded fact table");
    Ok(facts)
}

/// Topic distribution of a finished run.
///
/// `Ok(None)` when the run produced no topics (the file is absent).
pub fn load_topic_distribution(dir: &Path) -> Result<Option<Vec<TopicCount>>> {
    let path = dir.join(TOPIC_DIST_FILE);
    if !path.exists() {
        info!(dir = %dir.display(), "No topic data available");
        return Ok(None);
    }
    load_csv(&path).map(Some)
}
