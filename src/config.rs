//! Pipeline configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file yields the
//! stock pipeline. CLI flags override file values in `main.rs`.
//!
//! ```toml
//! seed = 7
//! default_year = 2024
//!
//! [text]
//! num_topics = 8
//! time_budget_secs = 30
//!
//! [graph]
//! sample_limit = 100
//! ```

use crate::error::{BiblioError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Year assigned when no `20xx` token can be found in `date_pub`
pub const DEFAULT_YEAR: i32 = 2024;

/// Candidate countries used by the simulated geography dimension
pub const DEFAULT_COUNTRIES: &[&str] = &[
    "USA", "China", "France", "Germany", "India", "UK", "Canada", "Brazil",
];

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seed shared by every random draw of a run. Generated (and logged) when absent.
    pub seed: Option<u64>,
    /// Fallback year for unparseable publication dates
    pub default_year: i32,
    /// Simulated quality metrics
    pub metrics: MetricsConfig,
    /// Text analytics (TF-IDF + LDA)
    pub text: TextConfig,
    /// Co-authorship graph
    pub graph: GraphConfig,
    /// Number of authors written to `authors.csv`
    pub top_authors: usize,
    /// Number of countries written to `geography.csv`
    pub top_countries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            default_year: DEFAULT_YEAR,
            metrics: MetricsConfig::default(),
            text: TextConfig::default(),
            graph: GraphConfig::default(),
            top_authors: 20,
            top_countries: 20,
        }
    }
}

/// Parameters of the simulated bibliometric lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Relative weights for Q1, Q2, Q3, Q4
    pub quartile_weights: [u32; 4],
    /// Impact score bounds (inclusive)
    pub impact_min: f64,
    pub impact_max: f64,
    /// Citation multiplier bounds (inclusive)
    pub citation_multiplier_min: u32,
    pub citation_multiplier_max: u32,
    /// Candidate countries when affiliations don't name one
    pub countries: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            quartile_weights: [40, 30, 20, 10],
            impact_min: 0.5,
            impact_max: 10.0,
            citation_multiplier_min: 1,
            citation_multiplier_max: 20,
            countries: DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Text analytics parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Abstracts shorter than this many characters are dropped
    pub min_abstract_len: usize,
    /// Vocabulary cap (terms ranked by document frequency)
    pub vocab_size: usize,
    /// Tokens shorter than this are dropped
    pub min_token_len: usize,
    /// Number of topics (K)
    pub num_topics: usize,
    /// Outer EM iterations of the topic model
    pub max_iterations: usize,
    /// Keywords reported per topic (M)
    pub top_terms: usize,
    /// Wall-clock budget for the topic model
    pub time_budget_secs: Option<u64>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            min_abstract_len: 20,
            vocab_size: 1000,
            min_token_len: 2,
            num_topics: 5,
            max_iterations: 20,
            top_terms: 5,
            time_budget_secs: None,
        }
    }
}

impl TextConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

/// Co-authorship graph parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Prefix sample size: only the first N publications feed the graph (0 = all)
    pub sample_limit: usize,
    /// Author tokens with fewer characters are treated as noise
    pub min_author_len: usize,
    /// Spring constant (optimal node distance) of the layout
    pub spring_k: f64,
    /// Layout iterations
    pub layout_iterations: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_limit: 50,
            min_author_len: 3,
            spring_k: 0.5,
            layout_iterations: 50,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    ///
    /// Called before any stage starts.
    pub fn validate(&self) -> Result<()> {
        if self.text.num_topics == 0 {
            return Err(BiblioError::Config("num_topics must be > 0".to_string()));
        }
        if self.text.top_terms == 0 {
            return Err(BiblioError::Config("top_terms must be > 0".to_string()));
        }
        if self.text.vocab_size == 0 {
            return Err(BiblioError::Config("vocab_size must be > 0".to_string()));
        }
        if self.text.max_iterations == 0 {
            return Err(BiblioError::Config("max_iterations must be > 0".to_string()));
        }
        if self.metrics.quartile_weights.iter().all(|w| *w == 0) {
            return Err(BiblioError::Config(
                "quartile_weights must contain a positive weight".to_string(),
            ));
        }
        let (lo, hi) = (self.metrics.impact_min, self.metrics.impact_max);
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo <= hi) {
            return Err(BiblioError::Config(format!(
                "invalid impact range [{}, {}]",
                self.metrics.impact_min, self.metrics.impact_max
            )));
        }
        if self.metrics.citation_multiplier_min > self.metrics.citation_multiplier_max {
            return Err(BiblioError::Config(
                "citation_multiplier_min exceeds citation_multiplier_max".to_string(),
            ));
        }
        if self.metrics.countries.is_empty() {
            return Err(BiblioError::Config("countries must not be empty".to_string()));
        }
        if !(1000..=9999).contains(&self.default_year) {
            return Err(BiblioError::Config(format!(
                "default_year {} is not a 4-digit year",
                self.default_year
            )));
        }
        if !(self.graph.spring_k.is_finite() && self.graph.spring_k > 0.0) {
            return Err(BiblioError::Config(
                "spring_k must be a finite number > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_topics_rejected() {
        let mut config = PipelineConfig::default();
        config.text.num_topics = 0;
        assert!(matches!(config.validate(), Err(BiblioError::Config(_))));
    }

    #[test]
    fn test_zero_quartile_weights_rejected() {
        let mut config = PipelineConfig::default();
        config.metrics.quartile_weights = [0, 0, 0, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_impact_rejected() -> Result<()> {
        let config: PipelineConfig = toml::from_str("[metrics]\nimpact_max = inf")?;
        assert!(matches!(config.validate(), Err(BiblioError::Config(_))));

        let mut config = PipelineConfig::default();
        config.metrics.impact_min = f64::NAN;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_non_finite_spring_k_rejected() -> Result<()> {
        let config: PipelineConfig = toml::from_str("[graph]\nspring_k = nan")?;
        assert!(matches!(config.validate(), Err(BiblioError::Config(_))));

        let mut config = PipelineConfig::default();
        config.graph.spring_k = f64::INFINITY;
        assert!(config.validate().is_err());
        config.graph.spring_k = 0.0;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "seed = 7\n\n[text]\nnum_topics = 8\n\n[graph]\nsample_limit = 0")?;

        let config = PipelineConfig::from_file(file.path())?;
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.text.num_topics, 8);
        assert_eq!(config.text.vocab_size, 1000);
        assert_eq!(config.graph.sample_limit, 0);
        assert_eq!(config.graph.min_author_len, 3);
        assert_eq!(config.default_year, DEFAULT_YEAR);
        Ok(())
    }
}
