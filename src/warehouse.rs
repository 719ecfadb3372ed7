//! Dimensional transformer: raw records → `F_Publications` fact rows.
//!
//! Each record becomes exactly one fact row. Unparseable dates get the default
//! year instead of dropping the row, so the fact table stays complete at the
//! cost of some noise on the year dimension.

use crate::corpus::PublicationRecord;
use crate::metrics::{country_from_affiliations, QualityMetricsProvider, Quartile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Label of the catch-all keyword rule
pub const GENERAL_TOPIC: &str = "General Blockchain";

/// One row of the fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactPublication {
    pub title: String,
    /// Raw comma-separated author string
    pub authors: String,
    pub year: i32,
    pub country: String,
    pub journal: String,
    pub quartile: Quartile,
    pub citations: u32,
    pub impact_score: f64,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub topic: String,
}

/// CSV column order of the fact table
pub const FACT_COLUMNS: &[&str] = &[
    "title", "authors", "year", "country", "journal", "quartile",
    "citations", "impact_score", "abstract", "topic",
];

/// Extract a publication year from a free-text date.
///
/// Returns the first `20xx` digit run found anywhere in the string, or
/// `default_year` when there is none (including `None` and empty input).
pub fn extract_year(raw: Option<&str>, default_year: i32) -> i32 {
    find_year(raw).unwrap_or(default_year)
}

fn find_year(raw: Option<&str>) -> Option<i32> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"20\d{2}").ok()).as_ref()?;

    raw.and_then(|s| re.find(s))
        .and_then(|m| m.as_str().parse().ok())
}

// ============================================================================
// Keyword topic classifier
// ============================================================================

enum Keyword {
    /// Must equal a whole title token
    Token(&'static str),
    /// Must start a title token
    Prefix(&'static str),
}

use Keyword::{Prefix, Token};

/// Ordered rules; the first rule with a matching keyword wins.
const TOPIC_RULES: &[(&[Keyword], &str)] = &[
    (&[Token("ai"), Prefix("learning")], "AI & Blockchain"),
    (&[Prefix("security"), Prefix("privacy")], "Security & Privacy"),
    (&[Token("iot"), Prefix("edge")], "IoT & Edge"),
    (&[Prefix("health")], "Healthcare"),
    (&[Prefix("supply")], "Supply Chain"),
    (&[Prefix("finance"), Token("defi")], "DeFi & Finance"),
];

/// Classify a title into a topic label with the keyword rules.
pub fn classify_title(title: &str) -> &'static str {
    let lowered = title.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    TOPIC_RULES
        .iter()
        .find(|(keywords, _)| {
            keywords.iter().any(|kw| match kw {
                Token(word) => tokens.iter().any(|t| t == word),
                Prefix(stem) => tokens.iter().any(|t| t.starts_with(stem)),
            })
        })
        .map(|(_, label)| *label)
        .unwrap_or(GENERAL_TOPIC)
}

// ============================================================================
// Topic resolution
// ============================================================================

/// A producer of the fact table's topic label.
pub trait TopicSource: Send + Sync {
    /// Topic for the record at `index` of the loaded corpus, if this source has one
    fn topic_for(&self, index: usize, record: &PublicationRecord) -> Option<String>;
}

/// Keyword rules over the title. Always has an answer.
pub struct KeywordTopics;

impl TopicSource for KeywordTopics {
    fn topic_for(&self, _index: usize, record: &PublicationRecord) -> Option<String> {
        Some(classify_title(&record.title).to_string())
    }
}

/// Topic labels assigned by the topic model, keyed by corpus index
#[derive(Debug, Clone, Default)]
pub struct ModelTopics {
    labels: HashMap<usize, String>,
}

impl ModelTopics {
    pub fn new(labels: HashMap<usize, String>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl TopicSource for ModelTopics {
    fn topic_for(&self, index: usize, _record: &PublicationRecord) -> Option<String> {
        self.labels.get(&index).cloned()
    }
}

/// Ordered chain of topic sources; the first one with an answer wins.
pub struct TopicResolver {
    sources: Vec<Box<dyn TopicSource>>,
}

impl TopicResolver {
    /// Keyword rules only
    pub fn keyword_only() -> Self {
        Self {
            sources: vec![Box::new(KeywordTopics)],
        }
    }

    /// Model topics take precedence, keyword rules fill the gaps
    pub fn with_model(model: ModelTopics) -> Self {
        Self {
            sources: vec![Box::new(model), Box::new(KeywordTopics)],
        }
    }

    pub fn resolve(&self, index: usize, record: &PublicationRecord) -> String {
        self.sources
            .iter()
            .find_map(|s| s.topic_for(index, record))
            .unwrap_or_else(|| GENERAL_TOPIC.to_string())
    }
}

impl Default for TopicResolver {
    fn default() -> Self {
        Self::keyword_only()
    }
}

/// Re-label the topic column of fact rows built from `records`.
///
/// `facts[i]` must come from `records[i]`; rows beyond either slice are kept as-is.
pub fn resolve_topics(
    facts: Vec<FactPublication>,
    records: &[PublicationRecord],
    resolver: &TopicResolver,
) -> Vec<FactPublication> {
    facts
        .into_iter()
        .enumerate()
        .map(|(idx, mut fact)| {
            if let Some(record) = records.get(idx) {
                fact.topic = resolver.resolve(idx, record);
            }
            fact
        })
        .collect()
}

// ============================================================================
// Transformer
// ============================================================================

/// Builds fact rows from records using a quality metrics provider
pub struct Transformer<P: QualityMetricsProvider> {
    provider: P,
    default_year: i32,
    resolver: TopicResolver,
}

impl<P: QualityMetricsProvider> Transformer<P> {
    pub fn new(provider: P, default_year: i32) -> Self {
        Self {
            provider,
            default_year,
            resolver: TopicResolver::keyword_only(),
        }
    }

    /// Use a specific topic resolver instead of the keyword rules
    pub fn with_resolver(mut self, resolver: TopicResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Transform every record into one fact row, in input order.
    pub fn transform(&mut self, records: &[PublicationRecord]) -> Vec<FactPublication> {
        let mut defaulted_years = 0usize;
        let mut affiliation_countries = 0usize;
        let default_year = self.default_year;

        let facts: Vec<FactPublication> = records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let year = find_year(record.date_pub.as_deref()).unwrap_or_else(|| {
                    defaulted_years += 1;
                    debug!(title = %record.title, date = ?record.date_pub, "No year found, using default");
                    default_year
                });

                let quartile = self.provider.quartile(record);
                let (impact_score, citations) = self.provider.impact_and_citations(record);
                let country = match record.affiliations.as_deref().and_then(country_from_affiliations) {
                    Some(country) => {
                        affiliation_countries += 1;
                        country
                    }
                    None => self.provider.country(record),
                };

                FactPublication {
                    title: record.title.clone(),
                    authors: record.authors.clone().unwrap_or_default(),
                    year,
                    country,
                    journal: record.source.clone().unwrap_or_default(),
                    quartile,
                    citations,
                    impact_score,
                    abstract_text: record.abstract_text.clone().unwrap_or_default(),
                    topic: self.resolver.resolve(idx, record),
                }
            })
            .collect();

        info!(
            rows = facts.len(),
            defaulted_years,
            affiliation_countries,
            "Built fact table"
        );
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::{FixedMetrics, SimulatedMetrics};

    fn record(title: &str, date: Option<&str>) -> PublicationRecord {
        PublicationRecord {
            title: title.to_string(),
            authors: Some("Alice Martin, Bob Chen".to_string()),
            date_pub: date.map(str::to_string),
            source: Some("Ledger".to_string()),
            abstract_text: None,
            affiliations: None,
        }
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year(Some("2021"), 2024), 2021);
        assert_eq!(extract_year(Some("Published 12 March 2021"), 2024), 2021);
        assert_eq!(extract_year(Some("2021-05-03"), 2024), 2021);
        assert_eq!(extract_year(Some("vol. 3, 2019 / 2021"), 2024), 2019);
        assert_eq!(extract_year(Some("March 1999"), 2024), 2024);
        assert_eq!(extract_year(Some(""), 2024), 2024);
        assert_eq!(extract_year(None, 2024), 2024);
    }

    #[test]
    fn test_classifier_first_rule_wins() {
        assert_eq!(classify_title("AI-driven healthcare system"), "AI & Blockchain");
        assert_eq!(classify_title("Privacy for Health Records"), "Security & Privacy");
        assert_eq!(classify_title("Federated Learning on IoT devices"), "AI & Blockchain");
    }

    #[test]
    fn test_classifier_rules() {
        assert_eq!(classify_title("Edge computing with smart contracts"), "IoT & Edge");
        assert_eq!(classify_title("An IoT-based ledger"), "IoT & Edge");
        assert_eq!(classify_title("Healthcare data sharing"), "Healthcare");
        assert_eq!(classify_title("Supply chain traceability"), "Supply Chain");
        assert_eq!(classify_title("DeFi lending protocols"), "DeFi & Finance");
        assert_eq!(classify_title("Consensus in permissioned chains"), GENERAL_TOPIC);
        // "ai" inside another word doesn't count
        assert_eq!(classify_title("Blockchain maintainability"), GENERAL_TOPIC);
    }

    #[test]
    fn test_resolver_prefers_model_topic() {
        let rec = record("AI for trading", None);
        let mut labels = HashMap::new();
        labels.insert(0, "Topic 3: token, market".to_string());
        let resolver = TopicResolver::with_model(ModelTopics::new(labels));

        assert_eq!(resolver.resolve(0, &rec), "Topic 3: token, market");
        assert_eq!(resolver.resolve(1, &rec), "AI & Blockchain");
    }

    #[test]
    fn test_transform_one_row_per_record() {
        let records = vec![
            record("Healthcare ledgers", Some("2022")),
            record("Untitled work", Some("n.d.")),
            PublicationRecord {
                title: "Bare".to_string(),
                affiliations: Some("CNRS, Paris, France".to_string()),
                ..Default::default()
            },
        ];
        let mut transformer = Transformer::new(
            FixedMetrics {
                country: "Brazil".to_string(),
                ..Default::default()
            },
            2024,
        );

        let facts = transformer.transform(&records);
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].year, 2022);
        assert_eq!(facts[0].topic, "Healthcare");
        assert_eq!(facts[0].country, "Brazil");
        assert_eq!(facts[1].year, 2024);
        assert_eq!(facts[2].authors, "");
        assert_eq!(facts[2].journal, "");
        assert_eq!(facts[2].country, "France");
    }

    #[test]
    fn test_transform_is_idempotent_with_fixed_seed() -> crate::Result<()> {
        let records: Vec<PublicationRecord> = (0..30)
            .map(|i| record(&format!("Paper {}", i), Some("2023")))
            .collect();
        let config = MetricsConfig::default();

        let first = Transformer::new(SimulatedMetrics::new(&config, 99)?, 2024).transform(&records);
        let second = Transformer::new(SimulatedMetrics::new(&config, 99)?, 2024).transform(&records);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_resolve_topics_relabels_by_index() {
        let records = vec![record("Supply chain", None), record("Privacy", None)];
        let facts = Transformer::new(FixedMetrics::default(), 2024).transform(&records);

        let mut labels = HashMap::new();
        labels.insert(1, "Topic 0: zk, proof".to_string());
        let facts = resolve_topics(facts, &records, &TopicResolver::with_model(ModelTopics::new(labels)));

        assert_eq!(facts[0].topic, "Supply Chain");
        assert_eq!(facts[1].topic, "Topic 0: zk, proof");
    }
}
