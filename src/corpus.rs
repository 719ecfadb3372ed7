//! Record loader for scraped publication corpora.
//!
//! The scraper emits a JSON array of loosely-shaped objects. Fields may be
//! missing, `null`, numbers instead of strings, or lists instead of
//! comma-separated strings; none of that fails a load. Only a missing file or
//! a document that isn't JSON at all is an error.

use crate::error::{BiblioError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Abstract placeholder written by the scraper when none was found
pub const ABSTRACT_PLACEHOLDER: &str = "N/A";

/// A raw publication record after loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PublicationRecord {
    /// Article title (always present)
    pub title: String,
    /// Authors, comma-separated
    pub authors: Option<String>,
    /// Free-text publication date
    pub date_pub: Option<String>,
    /// Journal / venue
    pub source: Option<String>,
    /// Abstract, possibly the "N/A" placeholder
    pub abstract_text: Option<String>,
    /// Free-text affiliations
    pub affiliations: Option<String>,
}

/// Loaded corpus plus what was dropped on the way
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub records: Vec<PublicationRecord>,
    /// Entries that had no usable title (or weren't objects)
    pub skipped: usize,
}

/// Load a corpus from a JSON file.
///
/// # Errors
///
/// Returns `CorpusNotFound` if the file doesn't exist, `Json` if it isn't JSON.
pub fn load_corpus(path: &Path) -> Result<Corpus> {
    if !path.exists() {
        return Err(BiblioError::CorpusNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let corpus = parse_corpus(&content)?;
    info!(
        path = %path.display(),
        records = corpus.records.len(),
        skipped = corpus.skipped,
        "Loaded corpus"
    );
    Ok(corpus)
}

/// Parse corpus JSON text.
///
/// Accepts a top-level array of records, or a single record object.
pub fn parse_corpus(content: &str) -> Result<Corpus> {
    let root: Value = serde_json::from_str(content)?;

    let entries = match root {
        Value::Array(items) => items,
        Value::Object(_) => vec![root],
        Value::Null => Vec::new(),
        other => {
            return Err(BiblioError::Parse(format!(
                "expected an array of records, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut corpus = Corpus::default();
    for (idx, entry) in entries.iter().enumerate() {
        match entry.as_object().and_then(parse_record) {
            Some(record) => corpus.records.push(record),
            None => {
                debug!(index = idx, "Skipping entry without a title");
                corpus.skipped += 1;
            }
        }
    }

    if corpus.skipped > 0 {
        warn!(skipped = corpus.skipped, "Some corpus entries had no title and were skipped");
    }

    Ok(corpus)
}

/// Build a record from one JSON object. `None` if it has no title.
fn parse_record(obj: &Map<String, Value>) -> Option<PublicationRecord> {
    let title = field(obj, &["title"])?;

    Some(PublicationRecord {
        title,
        authors: field(obj, &["authors", "author"]),
        date_pub: field(obj, &["date_pub", "date", "year"]),
        source: field(obj, &["source", "journal", "venue"]),
        // scraper output writes `abstract_`; plain `abstract` is the fallback
        abstract_text: field(obj, &["abstract_", "abstract"]),
        affiliations: field(obj, &["affiliations"]),
    })
}

/// First present, non-blank value among `keys`, stringified
fn field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(value_to_string)
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Convert a JSON value to text. Arrays are joined with ", ".
fn value_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_to_string).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn json_kind(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Corpus cache
// ============================================================================

/// Identity of a corpus file at load time
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceStamp {
    modified: Option<SystemTime>,
    len: u64,
}

struct CacheEntry {
    stamp: SourceStamp,
    corpus: Arc<Corpus>,
}

/// Cache of parsed corpora keyed by file path and modification stamp.
///
/// A cached entry is served only while the file's mtime and size are unchanged;
/// otherwise the file is re-parsed. `invalidate` and `clear` drop entries explicitly.
#[derive(Default)]
pub struct CorpusCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl CorpusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the corpus at `path`, parsing it only if the cached copy is stale
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<Corpus>> {
        let key = cache_key(path);
        let stamp = stamp(path)?;

        {
            let entries = self
                .entries
                .lock()
                .map_err(|e| BiblioError::Stage(format!("corpus cache poisoned: {}", e)))?;
            if let Some(entry) = entries.get(&key) {
                if entry.stamp == stamp {
                    info!(path = %path.display(), "Corpus cache hit");
                    return Ok(Arc::clone(&entry.corpus));
                }
                debug!(path = %path.display(), "Corpus changed on disk, reloading");
            }
        }

        let corpus = Arc::new(load_corpus(path)?);

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CacheEntry {
                    stamp,
                    corpus: Arc::clone(&corpus),
                },
            );
        }

        Ok(corpus)
    }

    /// Drop the cached copy of `path`. Returns true if something was cached.
    pub fn invalidate(&self, path: &Path) -> bool {
        let key = cache_key(path);
        self.entries
            .lock()
            .map(|mut entries| entries.remove(&key).is_some())
            .unwrap_or(false)
    }

    /// Drop every cached corpus
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of cached corpora
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn stamp(path: &Path) -> Result<SourceStamp> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BiblioError::CorpusNotFound(path.to_path_buf()),
        _ => BiblioError::Io(e),
    })?;
    Ok(SourceStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}
