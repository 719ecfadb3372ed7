//! Run orchestration: load → {transform, topics, graph} in parallel → export.
//!
//! The three analysis stages only read the loaded corpus, so they run as
//! blocking tasks side by side and are joined before anything is written.
//! A stage that cannot produce output (no valid text, empty graph) is recorded
//! as skipped in `run_report.json`; it never aborts the run.

use crate::config::PipelineConfig;
use crate::corpus::{Corpus, CorpusCache};
use crate::error::{BiblioError, Result, TopicError};
use crate::export;
use crate::graph::{GraphBuilder, GraphView};
use crate::lda::{CancelToken, TopicBudget};
use crate::metrics::SimulatedMetrics;
use crate::olap::{self, Dimension, DimensionCount};
use crate::text::{TextPipeline, TopicAnalysis};
use crate::warehouse::{resolve_topics, FactPublication, TopicResolver, Transformer};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{info, warn};

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped { reason: String },
}

impl StageStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub transform: StageStatus,
    pub topics: StageStatus,
    pub graph: StageStatus,
}

/// Summary written to `run_report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: String,
    pub input: String,
    /// Seed of every random draw in this run
    pub seed: u64,
    pub records: usize,
    pub skipped_records: usize,
    pub fact_rows: usize,
    pub stages: StageReport,
    pub topic_count: usize,
    pub topic_iterations: usize,
    /// The time budget cut the topic model short
    pub topics_stopped_early: bool,
    pub graph_sample_policy: String,
    pub graph_sampled_publications: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    /// Configuration the run actually used (seed filled in)
    #[serde(default)]
    pub config: PipelineConfig,
}

impl RunReport {
    /// Report of a finished run in `dir`, if there is one
    pub fn load(dir: &Path) -> Result<Option<RunReport>> {
        export::load_json(&dir.join(export::RUN_REPORT_FILE))
    }

    /// Configuration of the run in `dir`; defaults when no report exists
    pub fn effective_config(dir: &Path) -> Result<PipelineConfig> {
        match Self::load(dir)? {
            Some(report) => Ok(report.config),
            None => {
                warn!(dir = %dir.display(), "No run report, using default configuration");
                Ok(PipelineConfig::default())
            }
        }
    }
}

/// Joined output of the analysis stages
#[derive(Debug)]
pub struct Analysis {
    /// Fact table with model topics already resolved
    pub facts: Vec<FactPublication>,
    pub topics: std::result::Result<TopicAnalysis, TopicError>,
    pub graph: GraphView,
}

/// Configured pipeline. Cheap to clone the pieces it hands to worker tasks.
pub struct Pipeline {
    config: PipelineConfig,
    seed: u64,
    cache: Arc<CorpusCache>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Validate `config` and fix the run seed (generated when absent).
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(seed, explicit = config.seed.is_some(), "Run seed");

        Ok(Self {
            config,
            seed,
            cache: Arc::new(CorpusCache::new()),
            cancel: CancelToken::new(),
        })
    }

    /// Share a corpus cache with other pipelines
    pub fn with_cache(mut self, cache: Arc<CorpusCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Cancel the topic model through `token`
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load (or reuse) the corpus at `input`
    pub fn load(&self, input: &Path) -> Result<Arc<Corpus>> {
        self.cache.get_or_load(input)
    }

    /// Run transformer, topic model and graph builder concurrently and join them.
    pub async fn analyze(&self, corpus: Arc<Corpus>) -> Result<Analysis> {
        let seed = self.seed;

        let transform = {
            let corpus = Arc::clone(&corpus);
            let metrics = self.config.metrics.clone();
            let default_year = self.config.default_year;
            tokio::task::spawn_blocking(move || -> Result<Vec<FactPublication>> {
                let provider = SimulatedMetrics::new(&metrics, seed)?;
                Ok(Transformer::new(provider, default_year).transform(&corpus.records))
            })
        };

        let topics = {
            let corpus = Arc::clone(&corpus);
            let text = TextPipeline::new(self.config.text.clone())?;
            let budget = TopicBudget {
                max_iterations: self.config.text.max_iterations,
                time_budget: self.config.text.time_budget(),
                cancel: self.cancel.clone(),
            };
            tokio::task::spawn_blocking(move || text.analyze(&corpus.records, &budget, seed))
        };

        let graph = {
            let corpus = Arc::clone(&corpus);
            let builder = GraphBuilder::from_config(&self.config.graph);
            tokio::task::spawn_blocking(move || {
                let author_lists: Vec<&str> = corpus
                    .records
                    .iter()
                    .map(|r| r.authors.as_deref().unwrap_or_default())
                    .collect();
                builder.view(&author_lists, seed)
            })
        };

        let (facts, topics, graph) = tokio::join!(transform, topics, graph);
        let facts = facts.map_err(stage_error)??;
        let topics = topics.map_err(stage_error)?;
        let graph = graph.map_err(stage_error)?;

        let facts = match &topics {
            Ok(analysis) => {
                let resolver = TopicResolver::with_model(analysis.model_topics());
                resolve_topics(facts, &corpus.records, &resolver)
            }
            Err(_) => facts,
        };

        Ok(Analysis {
            facts,
            topics,
            graph,
        })
    }

    /// Write every artifact of `analysis` into `output` and return the run report.
    pub fn export(&self, corpus: &Corpus, analysis: &Analysis, input: &Path, output: &Path) -> Result<RunReport> {
        std::fs::create_dir_all(output)?;

        export::write_fact_table(output, &analysis.facts)?;

        let topics_status = match &analysis.topics {
            Ok(topics) => {
                export::write_topics(output, topics)?;
                StageStatus::Completed
            }
            Err(e) => {
                warn!(reason = %e, "Topic analysis skipped");
                export::clear_previous_topics(output)?;
                StageStatus::skipped(e.to_string())
            }
        };

        let all: Vec<&FactPublication> = analysis.facts.iter().collect();
        let trends = to_rows(olap::group_counts(&all, Dimension::Year));
        let authors = to_rows(olap::top_authors(
            &all,
            self.config.top_authors,
            self.config.graph.min_author_len,
        ));
        let geography = to_rows(olap::top_groups(&all, Dimension::Country, self.config.top_countries));
        export::write_summary(output, export::TRENDS_FILE, &trends)?;
        export::write_summary(output, export::AUTHORS_FILE, &authors)?;
        export::write_summary(output, export::GEOGRAPHY_FILE, &geography)?;

        export::write_graph(output, &analysis.graph.nodes, &analysis.graph.edges)?;
        let graph_status = if analysis.graph.nodes.is_empty() {
            warn!("Co-author graph is empty");
            StageStatus::skipped("empty graph")
        } else {
            StageStatus::Completed
        };

        let transform_status = if analysis.facts.is_empty() {
            warn!("Fact table is empty");
            StageStatus::skipped("empty corpus")
        } else {
            StageStatus::Completed
        };

        let (topic_count, topic_iterations, topics_stopped_early) = match &analysis.topics {
            Ok(t) => (t.topics.len(), t.iterations, t.stopped_early),
            Err(_) => (0, 0, false),
        };

        let report = RunReport {
            generated_at: Local::now().to_rfc3339(),
            input: input.display().to_string(),
            seed: self.seed,
            records: corpus.records.len(),
            skipped_records: corpus.skipped,
            fact_rows: analysis.facts.len(),
            stages: StageReport {
                transform: transform_status,
                topics: topics_status,
                graph: graph_status,
            },
            topic_count,
            topic_iterations,
            topics_stopped_early,
            graph_sample_policy: analysis.graph.sample_policy.to_string(),
            graph_sampled_publications: analysis.graph.sampled_publications,
            graph_nodes: analysis.graph.nodes.len(),
            graph_edges: analysis.graph.edges.len(),
            config: PipelineConfig {
                seed: Some(self.seed),
                ..self.config.clone()
            },
        };
        export::write_json(&output.join(export::RUN_REPORT_FILE), &report)?;

        info!(output = %output.display(), rows = report.fact_rows, "Artifacts written");
        Ok(report)
    }

    /// Load, analyze and export in one go
    pub async fn run(&self, input: &Path, output: &Path) -> Result<RunReport> {
        let corpus = self.load(input)?;
        let analysis = self.analyze(Arc::clone(&corpus)).await?;
        self.export(&corpus, &analysis, input, output)
    }
}

fn stage_error(e: JoinError) -> BiblioError {
    BiblioError::Stage(e.to_string())
}

fn to_rows(groups: Vec<(String, usize)>) -> Vec<DimensionCount> {
    groups.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const CORPUS: &str = r#"[
        {"title": "Blockchain ledgers for port logistics", "authors": "Alice Martin, Bob Chen, Al",
         "date_pub": "2021-05-02", "source": "Ledger Journal",
         "abstract": "Shipping containers tracked on a permissioned ledger across port terminals and customs."},
        {"title": "Privacy of smart contracts", "authors": "Carl Diaz, Dana Wu",
         "date_pub": "n.d.", "source": "Crypto Letters",
         "abstract": "Zero knowledge proofs hide contract state from validators while keeping consensus verifiable."},
        {"title": "Edge devices on chain", "authors": "Erin Roy",
         "abstract": "N/A", "affiliations": "Dept. of EE, Polytechnique, France"}
    ]"#;

    fn corpus_file() -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", CORPUS)?;
        Ok(file)
    }

    fn config(seed: u64) -> PipelineConfig {
        PipelineConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_writes_every_artifact() -> Result<()> {
        let input = corpus_file()?;
        let out = TempDir::new()?;
        let report = Pipeline::new(config(11))?.run(input.path(), out.path()).await?;

        assert_eq!(report.seed, 11);
        assert_eq!(report.records, 3);
        assert_eq!(report.fact_rows, 3);
        assert!(report.stages.transform.is_completed());
        assert!(report.stages.graph.is_completed());
        assert_eq!(report.graph_nodes, 4);
        assert_eq!(report.graph_edges, 2);

        for name in [
            export::FACT_TABLE_FILE,
            export::TRENDS_FILE,
            export::AUTHORS_FILE,
            export::GEOGRAPHY_FILE,
            export::GRAPH_NODES_FILE,
            export::GRAPH_EDGES_FILE,
            export::RUN_REPORT_FILE,
        ] {
            assert!(out.path().join(name).exists(), "missing {}", name);
        }

        let facts = export::load_fact_table(out.path())?;
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[1].year, crate::config::DEFAULT_YEAR);
        assert_eq!(facts[2].country, "France");
        Ok(())
    }

    #[tokio::test]
    async fn test_fixed_seed_reproduces_fact_table() -> Result<()> {
        let input = corpus_file()?;
        let pipeline = Pipeline::new(config(5))?;
        let corpus = pipeline.load(input.path())?;

        let a = pipeline.analyze(Arc::clone(&corpus)).await?;
        let b = pipeline.analyze(corpus).await?;
        assert_eq!(a.facts, b.facts);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_topics_are_skipped() -> Result<()> {
        let input = corpus_file()?;
        let out = TempDir::new()?;
        let token = CancelToken::new();
        token.cancel();

        let pipeline = Pipeline::new(config(3))?.with_cancel(token);
        let report = pipeline.run(input.path(), out.path()).await?;

        assert!(!report.stages.topics.is_completed());
        assert_eq!(report.topic_count, 0);
        assert_eq!(export::load_topic_distribution(out.path())?, None);
        assert_eq!(export::load_fact_table(out.path())?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_corpus_degrades_gracefully() -> Result<()> {
        let mut input = NamedTempFile::new()?;
        write!(input, "[]")?;
        let out = TempDir::new()?;

        let report = Pipeline::new(config(1))?.run(input.path(), out.path()).await?;
        assert_eq!(report.fact_rows, 0);
        assert_eq!(report.graph_nodes, 0);
        assert_eq!(report.stages.topics, StageStatus::skipped("no valid text data"));
        assert_eq!(report.stages.graph, StageStatus::skipped("empty graph"));
        assert!(export::load_fact_table(out.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_report_carries_effective_config() -> Result<()> {
        let input = corpus_file()?;
        let out = TempDir::new()?;
        assert_eq!(RunReport::effective_config(out.path())?.graph.min_author_len, 3);

        let mut cfg = config(9);
        cfg.graph.min_author_len = 9;
        cfg.graph.sample_limit = 2;
        Pipeline::new(cfg)?.run(input.path(), out.path()).await?;

        let used = RunReport::effective_config(out.path())?;
        assert_eq!(used.seed, Some(9));
        assert_eq!(used.graph.min_author_len, 9);
        assert_eq!(used.graph.sample_limit, 2);

        // rankings recomputed with the stored config agree with authors.csv
        let facts = export::load_fact_table(out.path())?;
        let all: Vec<&FactPublication> = facts.iter().collect();
        let ranked = to_rows(olap::top_authors(&all, used.top_authors, used.graph.min_author_len));
        let written: Vec<DimensionCount> = export::load_csv(&out.path().join(export::AUTHORS_FILE))?;
        assert_eq!(ranked, written);
        assert!(written.iter().all(|a| a.dimension_value.chars().count() >= 9));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_corpus_and_bad_config() -> Result<()> {
        let out = TempDir::new()?;
        let missing = out.path().join("nope.json");
        let result = Pipeline::new(config(1))?.run(&missing, out.path()).await;
        assert!(matches!(result, Err(BiblioError::CorpusNotFound(_))));

        let mut bad = config(1);
        bad.text.num_topics = 0;
        assert!(matches!(Pipeline::new(bad), Err(BiblioError::Config(_))));
        Ok(())
    }
}
