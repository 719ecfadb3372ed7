//! Text analytics over abstracts: clean, vectorize, cluster into topics.
//!
//! Stages run in order and each can end the analysis early with a
//! [`TopicError`]: filter → tokenize → stopwords → vocabulary → TF-IDF → LDA →
//! describe. The caller treats those errors as "analysis skipped"; they never
//! invalidate the fact table or the other artifacts.

use crate::config::TextConfig;
use crate::corpus::{PublicationRecord, ABSTRACT_PLACEHOLDER};
use crate::error::{BiblioError, Result, TopicError};
use crate::lda::{self, LdaParams, SparseVector, TopicBudget};
use crate::warehouse::ModelTopics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use stop_words::{get, LANGUAGE};
use tracing::{debug, info};

/// Keywords shown in a topic's fact-table label
const LABEL_KEYWORDS: usize = 3;

/// A discovered topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDescriptor {
    /// 0..K-1; not stable across runs
    pub id: usize,
    /// Ranked keywords, heaviest first
    pub keywords: Vec<String>,
    /// Normalized weights matching `keywords`
    pub weights: Vec<f64>,
    /// Documents whose dominant topic is this one
    pub document_count: usize,
}

impl TopicDescriptor {
    /// Label used in the fact table and topic distribution, e.g. `"Topic 2: ledger, iot, edge"`
    pub fn label(&self) -> String {
        if self.keywords.is_empty() {
            format!("Topic {}", self.id)
        } else {
            let head: Vec<&str> = self
                .keywords
                .iter()
                .take(LABEL_KEYWORDS)
                .map(String::as_str)
                .collect();
            format!("Topic {}: {}", self.id, head.join(", "))
        }
    }
}

/// Topic assigned to one corpus record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentTopic {
    /// Index of the record in the loaded corpus
    pub record_index: usize,
    pub topic: usize,
    pub probability: f64,
}

/// One row of `topics_dist.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

/// Result of a completed topic analysis
#[derive(Debug, Clone)]
pub struct TopicAnalysis {
    pub topics: Vec<TopicDescriptor>,
    pub assignments: Vec<DocumentTopic>,
    /// Abstracts that passed the validity filter
    pub valid_documents: usize,
    pub vocabulary_size: usize,
    pub iterations: usize,
    pub stopped_early: bool,
}

impl TopicAnalysis {
    /// Model-derived topic labels keyed by record index
    pub fn model_topics(&self) -> ModelTopics {
        let labels: HashMap<usize, String> = self
            .assignments
            .iter()
            .filter_map(|a| {
                self.topics
                    .get(a.topic)
                    .map(|t| (a.record_index, t.label()))
            })
            .collect();
        ModelTopics::new(labels)
    }

    /// Document count per topic, in topic id order
    pub fn distribution(&self) -> Vec<TopicCount> {
        self.topics
            .iter()
            .map(|t| TopicCount {
                topic: t.label(),
                count: t.document_count,
            })
            .collect()
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Stage 1: abstracts worth analyzing, with their corpus index.
///
/// Drops missing, empty and placeholder abstracts and those shorter than
/// `min_len` characters.
pub fn valid_abstracts(records: &[PublicationRecord], min_len: usize) -> Vec<(usize, &str)> {
    records
        .iter()
        .enumerate()
        .filter_map(|(idx, r)| {
            let text = r.abstract_text.as_deref()?.trim();
            let usable = !text.is_empty()
                && text != ABSTRACT_PLACEHOLDER
                && text.chars().count() >= min_len;
            usable.then_some((idx, text))
        })
        .collect()
}

/// Stage 2: lowercase word tokens split on anything that isn't alphanumeric
pub fn tokenize(text: &str, min_token_len: usize) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && t.chars().count() >= min_token_len)
        .map(str::to_string)
        .collect()
}

/// Stage 3: English stopword list
#[derive(Debug, Clone)]
pub struct Stopwords {
    words: HashSet<String>,
}

impl Stopwords {
    pub fn english() -> Self {
        let words: HashSet<String> = get(LANGUAGE::English)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect();
        Self { words }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }

    pub fn remove_from(&self, tokens: Vec<String>) -> Vec<String> {
        tokens.into_iter().filter(|t| !self.contains(t)).collect()
    }
}

/// Stage 4: bounded vocabulary ranked by document frequency
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    terms: Vec<String>,
    index: HashMap<String, usize>,
    doc_freq: Vec<usize>,
}

impl Vocabulary {
    /// Keep the `cap` terms with the highest document frequency
    /// (ties: higher corpus frequency, then alphabetical).
    pub fn build(docs: &[Vec<String>], cap: usize) -> Self {
        let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
        for doc in docs {
            let mut seen: HashSet<&str> = HashSet::new();
            for token in doc {
                let entry = stats.entry(token.as_str()).or_insert((0, 0));
                entry.1 += 1;
                if seen.insert(token.as_str()) {
                    entry.0 += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, (usize, usize))> = stats.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1 .0
                .cmp(&a.1 .0)
                .then_with(|| b.1 .1.cmp(&a.1 .1))
                .then_with(|| a.0.cmp(b.0))
        });
        ranked.truncate(cap);

        let terms: Vec<String> = ranked.iter().map(|(t, _)| t.to_string()).collect();
        let doc_freq = ranked.iter().map(|(_, (df, _))| *df).collect();
        let index = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();

        Self {
            terms,
            index,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, idx: usize) -> Option<&str> {
        self.terms.get(idx).map(String::as_str)
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    pub fn document_frequency(&self, idx: usize) -> usize {
        self.doc_freq.get(idx).copied().unwrap_or(0)
    }

    /// Term-frequency vector of a tokenized document, sorted by term index
    pub fn term_frequencies(&self, tokens: &[String]) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for idx in tokens.iter().filter_map(|t| self.index_of(t)) {
            *counts.entry(idx).or_insert(0.0) += 1.0;
        }
        let mut tf: SparseVector = counts.into_iter().collect();
        tf.sort_by_key(|(idx, _)| *idx);
        tf
    }
}

/// Stage 5: `tf × ln(N / df)` reweighting
pub fn tf_idf(tf: &SparseVector, vocab: &Vocabulary, n_docs: usize) -> SparseVector {
    tf.iter()
        .map(|(idx, count)| {
            let df = vocab.document_frequency(*idx).max(1);
            (*idx, count * (n_docs as f64 / df as f64).ln())
        })
        .collect()
}

// ============================================================================
// Pipeline
// ============================================================================

/// Configured text analytics pipeline
pub struct TextPipeline {
    config: TextConfig,
    stopwords: Stopwords,
}

impl TextPipeline {
    /// Validate the configuration before any work starts
    pub fn new(config: TextConfig) -> Result<Self> {
        if config.num_topics == 0 {
            return Err(BiblioError::Config("num_topics must be > 0".to_string()));
        }
        if config.top_terms == 0 || config.vocab_size == 0 {
            return Err(BiblioError::Config(
                "top_terms and vocab_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            config,
            stopwords: Stopwords::english(),
        })
    }

    pub fn config(&self) -> &TextConfig {
        &self.config
    }

    /// Run every stage over the abstracts of `records`.
    pub fn analyze(
        &self,
        records: &[PublicationRecord],
        budget: &TopicBudget,
        seed: u64,
    ) -> std::result::Result<TopicAnalysis, TopicError> {
        let texts = valid_abstracts(records, self.config.min_abstract_len);
        info!(
            total = records.len(),
            valid = texts.len(),
            "Articles with valid abstracts"
        );
        if texts.is_empty() {
            return Err(TopicError::NoValidText);
        }

        let token_docs: Vec<Vec<String>> = texts
            .iter()
            .map(|(_, text)| self.stopwords.remove_from(tokenize(text, self.config.min_token_len)))
            .collect();

        let vocab = Vocabulary::build(&token_docs, self.config.vocab_size);
        if vocab.is_empty() {
            return Err(TopicError::EmptyVocabulary);
        }
        debug!(terms = vocab.len(), "Vocabulary built");

        let n_docs = token_docs.len();
        let weighted: Vec<(usize, SparseVector)> = texts
            .iter()
            .zip(&token_docs)
            .map(|((record_index, _), tokens)| {
                let tf = vocab.term_frequencies(tokens);
                (*record_index, tf_idf(&tf, &vocab, n_docs))
            })
            .filter(|(_, v)| v.iter().any(|(_, w)| *w > 0.0))
            .collect();
        if weighted.is_empty() {
            return Err(TopicError::DegenerateWeights);
        }

        let vectors: Vec<SparseVector> = weighted.iter().map(|(_, v)| v.clone()).collect();
        let params = LdaParams::new(self.config.num_topics, seed);
        let model = lda::fit(&vectors, vocab.len(), &params, budget)?;

        let assignments: Vec<DocumentTopic> = weighted
            .iter()
            .enumerate()
            .filter_map(|(doc, (record_index, _))| {
                model.dominant_topic(doc).map(|(topic, probability)| DocumentTopic {
                    record_index: *record_index,
                    topic,
                    probability,
                })
            })
            .collect();

        let topics: Vec<TopicDescriptor> = (0..model.num_topics())
            .map(|id| {
                let top = model.top_terms(id, self.config.top_terms);
                TopicDescriptor {
                    id,
                    keywords: top
                        .iter()
                        .filter_map(|(t, _)| vocab.term(*t).map(str::to_string))
                        .collect(),
                    weights: top.iter().map(|(_, w)| *w).collect(),
                    document_count: assignments.iter().filter(|a| a.topic == id).count(),
                }
            })
            .collect();

        for topic in &topics {
            info!(topic = topic.id, docs = topic.document_count, keywords = %topic.keywords.join(", "), "Topic");
        }

        Ok(TopicAnalysis {
            topics,
            assignments,
            valid_documents: texts.len(),
            vocabulary_size: vocab.len(),
            iterations: model.iterations,
            stopped_early: model.stopped_early,
        })
    }
}
