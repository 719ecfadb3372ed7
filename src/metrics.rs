//! Quality metrics: quartile, impact score, citations, country.
//!
//! The scraped corpus carries none of these, so the default provider
//! *simulates* them with a seeded random generator. This is placeholder data
//! for demos and tests, not a bibliometric computation. A real lookup
//! (journal rankings service, affiliation parser) plugs in by implementing
//! [`QualityMetricsProvider`]; the transformer doesn't change.

use crate::config::MetricsConfig;
use crate::corpus::PublicationRecord;
use crate::error::{BiblioError, OptionExt, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Label used when no country can be produced
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Journal quality tier (Q1 highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quartile {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quartile {
    pub const ALL: [Quartile; 4] = [Quartile::Q1, Quartile::Q2, Quartile::Q3, Quartile::Q4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quartile::Q1 => "Q1",
            Quartile::Q2 => "Q2",
            Quartile::Q3 => "Q3",
            Quartile::Q4 => "Q4",
        }
    }

    /// Parse "Q1".."Q4" (case-insensitive)
    pub fn parse(s: &str) -> Result<Quartile> {
        Quartile::ALL
            .iter()
            .copied()
            .find(|q| q.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_parse(&format!("invalid quartile '{}'", s))
    }
}

impl fmt::Display for Quartile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the quality dimensions attached to each fact row.
///
/// Methods take `&mut self` so stateful providers (seeded generators, caches)
/// need no interior mutability.
pub trait QualityMetricsProvider {
    /// Journal quartile of the record
    fn quartile(&mut self, record: &PublicationRecord) -> Quartile;

    /// `(impact_score, citations)`; impact ≥ 0
    fn impact_and_citations(&mut self, record: &PublicationRecord) -> (f64, u32);

    /// Country label when the record's affiliations don't name one
    fn country(&mut self, record: &PublicationRecord) -> String;
}

/// Seeded random stand-in for a bibliometric lookup service
pub struct SimulatedMetrics {
    rng: StdRng,
    quartiles: WeightedIndex<u32>,
    impact_min: f64,
    impact_max: f64,
    multiplier_min: u32,
    multiplier_max: u32,
    countries: Vec<String>,
}

impl SimulatedMetrics {
    /// Create a simulator. The same seed and config always yield the same draws.
    pub fn new(config: &MetricsConfig, seed: u64) -> Result<Self> {
        let quartiles = WeightedIndex::new(config.quartile_weights)
            .map_err(|e| BiblioError::Config(format!("invalid quartile weights: {}", e)))?;

        debug!(seed, weights = ?config.quartile_weights, "Simulated quality metrics enabled");

        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            quartiles,
            impact_min: config.impact_min,
            impact_max: config.impact_max,
            multiplier_min: config.citation_multiplier_min,
            multiplier_max: config.citation_multiplier_max,
            countries: config.countries.clone(),
        })
    }
}

impl QualityMetricsProvider for SimulatedMetrics {
    fn quartile(&mut self, _record: &PublicationRecord) -> Quartile {
        Quartile::ALL[self.quartiles.sample(&mut self.rng)]
    }

    fn impact_and_citations(&mut self, _record: &PublicationRecord) -> (f64, u32) {
        let raw = self.rng.gen_range(self.impact_min..=self.impact_max);
        let impact = (raw * 100.0).round() / 100.0;
        let multiplier = self.rng.gen_range(self.multiplier_min..=self.multiplier_max);
        let citations = (impact * f64::from(multiplier)).floor().max(0.0) as u32;
        (impact, citations)
    }

    fn country(&mut self, _record: &PublicationRecord) -> String {
        self.countries
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
    }
}

/// Constant metrics, for fixtures and tests
#[derive(Debug, Clone)]
pub struct FixedMetrics {
    pub quartile: Quartile,
    pub impact: f64,
    pub citations: u32,
    pub country: String,
}

impl Default for FixedMetrics {
    fn default() -> Self {
        Self {
            quartile: Quartile::Q1,
            impact: 1.0,
            citations: 10,
            country: "France".to_string(),
        }
    }
}

impl QualityMetricsProvider for FixedMetrics {
    fn quartile(&mut self, _record: &PublicationRecord) -> Quartile {
        self.quartile
    }

    fn impact_and_citations(&mut self, _record: &PublicationRecord) -> (f64, u32) {
        (self.impact.max(0.0), self.citations)
    }

    fn country(&mut self, _record: &PublicationRecord) -> String {
        self.country.clone()
    }
}

/// Extract a country from the tail of an affiliation string,
/// e.g. `"Dept. of CS, Sorbonne University, France"` → `"France"`.
pub fn country_from_affiliations(affiliations: &str) -> Option<String> {
    static TAIL: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TAIL
        .get_or_init(|| Regex::new(r",\s([A-Za-z]+)$").ok())
        .as_ref()?;

    re.captures(affiliations.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PublicationRecord {
        PublicationRecord {
            title: "A paper".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_quartile_parse() -> Result<()> {
        assert_eq!(Quartile::parse("q2")?, Quartile::Q2);
        assert_eq!(Quartile::parse(" Q4 ")?, Quartile::Q4);
        assert!(Quartile::parse("Q5").is_err());
        Ok(())
    }

    #[test]
    fn test_simulated_is_reproducible() -> Result<()> {
        let config = MetricsConfig::default();
        let mut a = SimulatedMetrics::new(&config, 42)?;
        let mut b = SimulatedMetrics::new(&config, 42)?;
        let rec = record();

        for _ in 0..50 {
            assert_eq!(a.quartile(&rec), b.quartile(&rec));
            assert_eq!(a.impact_and_citations(&rec), b.impact_and_citations(&rec));
            assert_eq!(a.country(&rec), b.country(&rec));
        }
        Ok(())
    }

    #[test]
    fn test_simulated_bounds() -> Result<()> {
        let config = MetricsConfig::default();
        let mut sim = SimulatedMetrics::new(&config, 7)?;
        let rec = record();

        for _ in 0..500 {
            let (impact, citations) = sim.impact_and_citations(&rec);
            assert!((0.5..=10.0).contains(&impact));
            assert!(citations as f64 <= impact * 20.0);
            assert!(citations as f64 >= (impact).floor());
            assert!(config.countries.contains(&sim.country(&rec)));
        }
        Ok(())
    }

    #[test]
    fn test_single_weight_always_drawn() -> Result<()> {
        let config = MetricsConfig {
            quartile_weights: [0, 0, 1, 0],
            ..Default::default()
        };
        let mut sim = SimulatedMetrics::new(&config, 1)?;
        let rec = record();
        for _ in 0..20 {
            assert_eq!(sim.quartile(&rec), Quartile::Q3);
        }
        Ok(())
    }

    #[test]
    fn test_country_from_affiliations() {
        assert_eq!(
            country_from_affiliations("LIP6, Sorbonne University, France").as_deref(),
            Some("France")
        );
        assert_eq!(country_from_affiliations("MIT, Cambridge, USA ").as_deref(), Some("USA"));
        assert_eq!(country_from_affiliations("Unknown lab"), None);
        assert_eq!(country_from_affiliations(""), None);
    }
}
