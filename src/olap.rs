//! Slice-and-dice queries over the fact table.
//!
//! Everything here is a pure function of `&[FactPublication]` and a
//! [`FilterSpec`], so any number of readers can query one shared table.

use crate::error::{BiblioError, Result};
use crate::graph::parse_authors;
use crate::metrics::Quartile;
use crate::warehouse::FactPublication;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// Filters
// ============================================================================

/// Dimensional filter: year range (inclusive), quartile set, country set.
///
/// An empty set matches nothing, the same as a multiselect with every box
/// unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub year_min: i32,
    pub year_max: i32,
    pub quartiles: BTreeSet<Quartile>,
    pub countries: BTreeSet<String>,
}

impl FilterSpec {
    /// Filter that selects every row of `table`
    pub fn all(table: &[FactPublication]) -> Self {
        let year_min = table.iter().map(|f| f.year).min().unwrap_or(i32::MIN);
        let year_max = table.iter().map(|f| f.year).max().unwrap_or(i32::MAX);
        Self {
            year_min,
            year_max,
            quartiles: Quartile::ALL.into_iter().collect(),
            countries: table.iter().map(|f| f.country.clone()).collect(),
        }
    }

    pub fn matches(&self, row: &FactPublication) -> bool {
        (self.year_min..=self.year_max).contains(&row.year)
            && self.quartiles.contains(&row.quartile)
            && self.countries.contains(&row.country)
    }
}

/// Partial filter as sent by a client; missing fields mean "everything".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub quartiles: Option<Vec<Quartile>>,
    pub countries: Option<Vec<String>>,
    /// Topic label for the article explorer
    pub topic: Option<String>,
}

impl FilterRequest {
    /// Fill the gaps from `table` and validate the year range
    pub fn resolve(&self, table: &[FactPublication]) -> Result<FilterSpec> {
        let mut spec = FilterSpec::all(table);
        if let Some(y) = self.year_min {
            spec.year_min = y;
        }
        if let Some(y) = self.year_max {
            spec.year_max = y;
        }
        if spec.year_min > spec.year_max {
            return Err(BiblioError::Config(format!(
                "year_min {} is greater than year_max {}",
                spec.year_min, spec.year_max
            )));
        }
        if let Some(q) = &self.quartiles {
            spec.quartiles = q.iter().copied().collect();
        }
        if let Some(c) = &self.countries {
            spec.countries = c.iter().map(|s| s.trim().to_string()).collect();
        }
        Ok(spec)
    }
}

/// Parse a comma-separated quartile list ("Q1,Q2")
pub fn parse_quartiles(raw: &str) -> Result<Vec<Quartile>> {
    parse_list(raw).iter().map(|q| Quartile::parse(q)).collect()
}

/// Split a comma-separated list, dropping empty items
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rows satisfying all three predicates. An empty result is not an error.
pub fn filter<'a>(table: &'a [FactPublication], spec: &FilterSpec) -> Vec<&'a FactPublication> {
    table.iter().filter(|row| spec.matches(row)).collect()
}

/// Rows of `subset` carrying the given topic label
pub fn rows_for_topic<'a>(subset: &[&'a FactPublication], topic: &str) -> Vec<&'a FactPublication> {
    subset.iter().copied().filter(|row| row.topic == topic).collect()
}

/// Article line of the topic explorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArticle {
    pub title: String,
    pub year: i32,
    pub journal: String,
    pub citations: u32,
}

impl From<&FactPublication> for TopicArticle {
    fn from(row: &FactPublication) -> Self {
        Self {
            title: row.title.clone(),
            year: row.year,
            journal: row.journal.clone(),
            citations: row.citations,
        }
    }
}

/// Articles of one topic within the filtered table, in table order
#[derive(Debug, Clone, Serialize)]
pub struct TopicExplorer {
    pub topic: String,
    /// Every topic label present in the filtered subset, ascending
    pub available_topics: Vec<String>,
    pub articles: Vec<TopicArticle>,
}

impl TopicExplorer {
    pub fn compute(table: &[FactPublication], spec: &FilterSpec, topic: &str) -> Self {
        let subset = filter(table, spec);
        Self {
            topic: topic.to_string(),
            available_topics: group_counts(&subset, Dimension::Topic)
                .into_iter()
                .map(|(label, _)| label)
                .collect(),
            articles: rows_for_topic(&subset, topic)
                .into_iter()
                .map(TopicArticle::from)
                .collect(),
        }
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Headline numbers of a subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub count: usize,
    pub total_citations: u64,
    /// `None` for an empty subset
    pub mean_impact: Option<f64>,
    pub distinct_countries: usize,
}

pub fn kpis(subset: &[&FactPublication]) -> Kpis {
    let count = subset.len();
    let total_citations = subset.iter().map(|f| u64::from(f.citations)).sum();
    let mean_impact = if count == 0 {
        None
    } else {
        Some(subset.iter().map(|f| f.impact_score).sum::<f64>() / count as f64)
    };
    let distinct_countries = subset
        .iter()
        .map(|f| f.country.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    Kpis {
        count,
        total_citations,
        mean_impact,
        distinct_countries,
    }
}

/// Axis of the fact table usable for grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Year,
    Quartile,
    Country,
    Journal,
    Topic,
}

impl Dimension {
    pub fn value(&self, row: &FactPublication) -> String {
        match self {
            Dimension::Year => row.year.to_string(),
            Dimension::Quartile => row.quartile.to_string(),
            Dimension::Country => row.country.clone(),
            Dimension::Journal => row.journal.clone(),
            Dimension::Topic => row.topic.clone(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Year => "year",
            Dimension::Quartile => "quartile",
            Dimension::Country => "country",
            Dimension::Journal => "journal",
            Dimension::Topic => "topic",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{dimension_value, count}` row of a summary table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionCount {
    pub dimension_value: String,
    pub count: usize,
}

impl From<(String, usize)> for DimensionCount {
    fn from((dimension_value, count): (String, usize)) -> Self {
        Self {
            dimension_value,
            count,
        }
    }
}

/// Counts per dimension value, ascending by value
pub fn group_counts(subset: &[&FactPublication], dimension: Dimension) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for row in subset {
        *counts.entry(dimension.value(row)).or_default() += 1;
    }
    counts.into_iter().collect()
}

/// The `n` largest groups, count descending, ties ascending by value
pub fn top_groups(subset: &[&FactPublication], dimension: Dimension, n: usize) -> Vec<(String, usize)> {
    let mut groups = group_counts(subset, dimension);
    groups.sort_by(|a, b| b.1.cmp(&a.1));
    groups.truncate(n);
    groups
}

/// Most prolific authors as `(author, publication_count)`.
///
/// Author strings are split and trimmed like the co-author graph does; tokens
/// shorter than `min_author_len` are ignored. Ties keep first-seen order.
pub fn top_authors(subset: &[&FactPublication], n: usize, min_author_len: usize) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for row in subset {
        for author in parse_authors(&row.authors, min_author_len) {
            match counts.get_mut(&author) {
                Some(c) => *c += 1,
                None => {
                    counts.insert(author.clone(), 1);
                    order.push(author);
                }
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|a| {
            let c = counts.get(&a).copied().unwrap_or_default();
            (a, c)
        })
        .collect();
    // sort_by is stable, first-seen order survives within a tie
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

/// Two-dimensional count matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTab {
    pub row_dimension: Dimension,
    pub col_dimension: Dimension,
    /// Row labels, ascending
    pub rows: Vec<String>,
    /// Column labels, ascending
    pub cols: Vec<String>,
    /// `counts[r][c]`
    pub counts: Vec<Vec<usize>>,
}

impl CrossTab {
    pub fn get(&self, row: &str, col: &str) -> usize {
        let r = self.rows.iter().position(|v| v == row);
        let c = self.cols.iter().position(|v| v == col);
        match (r, c) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }
}

pub fn cross_tab(subset: &[&FactPublication], dim_a: Dimension, dim_b: Dimension) -> CrossTab {
    let rows: Vec<String> = subset
        .iter()
        .map(|f| dim_a.value(f))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let cols: Vec<String> = subset
        .iter()
        .map(|f| dim_b.value(f))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut counts = vec![vec![0usize; cols.len()]; rows.len()];
    for row in subset {
        let r = rows.binary_search(&dim_a.value(row));
        let c = cols.binary_search(&dim_b.value(row));
        if let (Ok(r), Ok(c)) = (r, c) {
            counts[r][c] += 1;
        }
    }

    CrossTab {
        row_dimension: dim_a,
        col_dimension: dim_b,
        rows,
        cols,
        counts,
    }
}

// ============================================================================
// Aggregate view
// ============================================================================

/// Everything the dashboard shows for one filter state. Recomputed per request.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateView {
    pub filter: FilterSpec,
    pub kpis: Kpis,
    pub by_year: Vec<DimensionCount>,
    pub by_quartile: Vec<DimensionCount>,
    pub by_country: Vec<DimensionCount>,
    pub by_topic: Vec<DimensionCount>,
    pub top_authors: Vec<DimensionCount>,
    /// Year × quartile pivot
    pub year_quartile: CrossTab,
}

impl AggregateView {
    pub fn compute(table: &[FactPublication], spec: &FilterSpec, top_n: usize, min_author_len: usize) -> Self {
        let subset = filter(table, spec);
        let counts = |dim| -> Vec<DimensionCount> {
            group_counts(&subset, dim).into_iter().map(Into::into).collect()
        };

        Self {
            filter: spec.clone(),
            kpis: kpis(&subset),
            by_year: counts(Dimension::Year),
            by_quartile: counts(Dimension::Quartile),
            by_country: counts(Dimension::Country),
            by_topic: counts(Dimension::Topic),
            top_authors: top_authors(&subset, top_n, min_author_len)
                .into_iter()
                .map(Into::into)
                .collect(),
            year_quartile: cross_tab(&subset, Dimension::Year, Dimension::Quartile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(title: &str, authors: &str, year: i32, quartile: Quartile, country: &str, citations: u32, impact: f64) -> FactPublication {
        FactPublication {
            title: title.to_string(),
            authors: authors.to_string(),
            year,
            country: country.to_string(),
            journal: "Ledger".to_string(),
            quartile,
            citations,
            impact_score: impact,
            abstract_text: String::new(),
            topic: "Healthcare".to_string(),
        }
    }

    fn table() -> Vec<FactPublication> {
        vec![
            fact("a", "Alice, Bob", 2020, Quartile::Q1, "France", 10, 2.0),
            fact("b", "Bob, Carl", 2021, Quartile::Q2, "USA", 5, 4.0),
            fact("c", "Dana, Al", 2022, Quartile::Q1, "USA", 0, 6.0),
            fact("d", "Carl", 2023, Quartile::Q4, "China", 7, 1.5),
        ]
    }

    fn set<T: Ord + Clone>(items: &[T]) -> BTreeSet<T> {
        items.iter().cloned().collect()
    }

    #[test]
    fn test_all_spec_selects_everything() {
        let t = table();
        assert_eq!(filter(&t, &FilterSpec::all(&t)).len(), t.len());
    }

    #[test]
    fn test_filter_rows_satisfy_predicates() {
        let t = table();
        let spec = FilterSpec {
            year_min: 2021,
            year_max: 2023,
            quartiles: set(&[Quartile::Q1, Quartile::Q2]),
            countries: set(&["USA".to_string()]),
        };
        let rows = filter(&t, &spec);
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert!((2021..=2023).contains(&row.year));
            assert!(spec.quartiles.contains(&row.quartile));
            assert_eq!(row.country, "USA");
        }
    }

    #[test]
    fn test_filter_is_monotone_when_narrowed() {
        let t = table();
        let wide = FilterSpec::all(&t);
        let base = filter(&t, &wide).len();

        let mut narrower = wide.clone();
        narrower.year_min = 2021;
        let n1 = filter(&t, &narrower).len();
        narrower.quartiles.remove(&Quartile::Q4);
        let n2 = filter(&t, &narrower).len();
        narrower.countries.remove("USA");
        let n3 = filter(&t, &narrower).len();

        assert!(base >= n1 && n1 >= n2 && n2 >= n3);
        assert_eq!(n3, 0);
    }

    #[test]
    fn test_kpis_consistency() {
        let t = table();
        let subset = filter(&t, &FilterSpec::all(&t));
        let k = kpis(&subset);
        assert_eq!(k.count, subset.len());
        assert_eq!(k.total_citations, 22);
        assert_eq!(k.distinct_countries, 3);
        let mean = k.mean_impact.unwrap_or_default();
        assert!((mean - 13.5 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_kpis_on_empty_subset() {
        let k = kpis(&[]);
        assert_eq!(k.count, 0);
        assert_eq!(k.total_citations, 0);
        assert_eq!(k.mean_impact, None);
        assert_eq!(k.distinct_countries, 0);
    }

    #[test]
    fn test_group_counts_ascending() {
        let t = table();
        let subset = filter(&t, &FilterSpec::all(&t));
        assert_eq!(
            group_counts(&subset, Dimension::Country),
            vec![
                ("China".to_string(), 1),
                ("France".to_string(), 1),
                ("USA".to_string(), 2)
            ]
        );
        let top = top_groups(&subset, Dimension::Country, 1);
        assert_eq!(top, vec![("USA".to_string(), 2)]);
    }

    #[test]
    fn test_top_authors_first_seen_tie_break() {
        let t = table();
        let subset = filter(&t, &FilterSpec::all(&t));
        let ranked = top_authors(&subset, 10, 3);
        assert_eq!(
            ranked,
            vec![
                ("Bob".to_string(), 2),
                ("Carl".to_string(), 2),
                ("Alice".to_string(), 1),
                ("Dana".to_string(), 1),
            ]
        );
        assert_eq!(top_authors(&subset, 1, 3), vec![("Bob".to_string(), 2)]);
    }

    #[test]
    fn test_cross_tab() {
        let t = table();
        let subset = filter(&t, &FilterSpec::all(&t));
        let tab = cross_tab(&subset, Dimension::Country, Dimension::Quartile);
        assert_eq!(tab.rows, vec!["China", "France", "USA"]);
        assert_eq!(tab.cols, vec!["Q1", "Q2", "Q4"]);
        assert_eq!(tab.get("USA", "Q1"), 1);
        assert_eq!(tab.get("USA", "Q2"), 1);
        assert_eq!(tab.get("France", "Q4"), 0);
        assert_eq!(tab.get("Peru", "Q1"), 0);
        let total: usize = tab.counts.iter().flatten().sum();
        assert_eq!(total, subset.len());
    }

    #[test]
    fn test_filter_request_resolution() -> Result<()> {
        let t = table();
        let req = FilterRequest {
            year_min: Some(2021),
            quartiles: Some(parse_quartiles("Q1, q2")?),
            ..Default::default()
        };
        let spec = req.resolve(&t)?;
        assert_eq!(spec.year_max, 2023);
        assert_eq!(filter(&t, &spec).len(), 2);

        let bad = FilterRequest {
            year_min: Some(2024),
            year_max: Some(2020),
            ..Default::default()
        };
        assert!(bad.resolve(&t).is_err());
        assert!(parse_quartiles("Q1,Q9").is_err());
        Ok(())
    }

    #[test]
    fn test_aggregate_view_and_topic_rows() {
        let t = table();
        let spec = FilterSpec::all(&t);
        let view = AggregateView::compute(&t, &spec, 2, 3);
        assert_eq!(view.kpis.count, 4);
        assert_eq!(view.by_year.len(), 4);
        assert_eq!(view.top_authors.len(), 2);
        assert_eq!(view.year_quartile.get("2020", "Q1"), 1);

        let subset = filter(&t, &spec);
        assert_eq!(rows_for_topic(&subset, "Healthcare").len(), 4);
        assert!(rows_for_topic(&subset, "DeFi & Finance").is_empty());
    }

    #[test]
    fn test_topic_explorer_respects_filter() -> Result<()> {
        let mut t = table();
        t[1].topic = "Supply Chain".to_string();

        let spec = FilterRequest {
            countries: Some(vec!["USA".to_string()]),
            ..Default::default()
        }
        .resolve(&t)?;
        let explorer = TopicExplorer::compute(&t, &spec, "Healthcare");
        assert_eq!(explorer.available_topics, vec!["Healthcare", "Supply Chain"]);
        assert_eq!(
            explorer.articles,
            vec![TopicArticle {
                title: "c".to_string(),
                year: 2022,
                journal: "Ledger".to_string(),
                citations: 0,
            }]
        );

        let none = TopicExplorer::compute(&t, &spec, "DeFi & Finance");
        assert!(none.articles.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_table_queries() {
        let t: Vec<FactPublication> = Vec::new();
        let view = AggregateView::compute(&t, &FilterSpec::all(&t), 20, 3);
        assert_eq!(view.kpis.count, 0);
        assert!(view.by_country.is_empty());
        assert!(view.year_quartile.rows.is_empty());
    }
}
