//! Candidate correlation scoring.
//!
//! Ranks the correlation candidates of one analysis run so a single "hero"
//! insight can be shown. Each candidate gets five subscores in `[0, 100]`:
//!
//! | subscore      | weight | source                                        |
//! |---------------|--------|-----------------------------------------------|
//! | correlation   | 0.25   | `(|r| - 0.4) / 0.6 * 100`, zero below 0.4     |
//! | cross_domain  | 0.30   | category pair table                           |
//! | surprise      | 0.20   | curated obvious / surprising metric pairs     |
//! | actionability | 0.15   | curated controllable metric lists             |
//! | impact        | 0.10   | Cohen's d over the paired daily observations  |
//!
//! Scoring is pure: identical candidates and observations always produce
//! identical totals, and ties keep input order.
//!
//! ```rust
//! use huginn::scorer::{Candidate, NoSeries, select_best};
//!
//! let candidates = vec![
//!     Candidate::new("steps", "activity", "active_minutes", "activity", 0.9),
//!     Candidate::new("sleep_hours", "sleep", "sugar_craving", "nutrition", 0.55),
//! ];
//! let best = select_best(&candidates, &NoSeries).unwrap();
//! assert_eq!(best.candidate.metric_b, "sugar_craving");
//! ```

pub mod impact;
pub mod tables;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::tables::normalize;

/// Relative weight of each subscore in the total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weights {
    pub correlation: f64,
    pub cross_domain: f64,
    pub surprise: f64,
    pub actionability: f64,
    pub impact: f64,
}

pub const WEIGHTS: Weights = Weights {
    correlation: 0.25,
    cross_domain: 0.30,
    surprise: 0.20,
    actionability: 0.15,
    impact: 0.10,
};

/// A correlation between two metrics found by an upstream analysis.
///
/// Deserializes from both snake_case and the dashboard's camelCase shape
/// (`metric1`, `metric1Category`, `dataPoints`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(alias = "metric1")]
    pub metric_a: String,
    #[serde(alias = "metric2")]
    pub metric_b: String,
    #[serde(alias = "metric1Category")]
    pub category_a: String,
    #[serde(alias = "metric2Category")]
    pub category_b: String,
    /// Pearson coefficient in `[-1, 1]`.
    pub correlation: f64,
    /// Days metric B trails metric A.
    #[serde(default)]
    pub lag: u32,
    #[serde(default, alias = "dataPoints")]
    pub sample_size: usize,
}

impl Candidate {
    pub fn new(
        metric_a: impl Into<String>,
        category_a: impl Into<String>,
        metric_b: impl Into<String>,
        category_b: impl Into<String>,
        correlation: f64,
    ) -> Self {
        Self {
            metric_a: metric_a.into(),
            metric_b: metric_b.into(),
            category_a: category_a.into(),
            category_b: category_b.into(),
            correlation,
            lag: 0,
            sample_size: 0,
        }
    }

    pub fn lag(mut self, days: u32) -> Self {
        self.lag = days;
        self
    }

    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Subscores {
    pub correlation: f64,
    pub cross_domain: f64,
    pub surprise: f64,
    pub actionability: f64,
    pub impact: f64,
}

impl Subscores {
    /// Weighted sum of the subscores.
    pub fn total(&self, weights: &Weights) -> f64 {
        self.correlation * weights.correlation
            + self.cross_domain * weights.cross_domain
            + self.surprise * weights.surprise
            + self.actionability * weights.actionability
            + self.impact * weights.impact
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub subscores: Subscores,
    pub total: f64,
}

/// Day-aligned observations for pairs of metrics.
pub trait PairedSeries {
    /// Pairs `(A[i], B[i + lag])` for every day where both sides exist.
    ///
    /// Missing and non-finite values are skipped.
    fn pairs(&self, metric_a: &str, metric_b: &str, lag: u32) -> Vec<(f64, f64)>;
}

/// No observations available; every impact subscore is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSeries;

impl PairedSeries for NoSeries {
    fn pairs(&self, _: &str, _: &str, _: u32) -> Vec<(f64, f64)> {
        Vec::new()
    }
}

/// Daily values per metric, one column per metric name.
///
/// Deserializes from `{"sleep_hours": [7.1, null, 6.4], ...}`; `null` marks
/// a missing day. Column lookups use normalised names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricTable {
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a metric's column.
    pub fn column(mut self, metric: &str, values: Vec<Option<f64>>) -> Self {
        self.columns.insert(normalize(metric), values);
        self
    }

    fn get(&self, metric: &str) -> Option<&Vec<Option<f64>>> {
        self.columns
            .get(metric)
            .or_else(|| self.columns.get(&normalize(metric)))
    }
}

impl PairedSeries for MetricTable {
    fn pairs(&self, metric_a: &str, metric_b: &str, lag: u32) -> Vec<(f64, f64)> {
        let (Some(a), Some(b)) = (self.get(metric_a), self.get(metric_b)) else {
            return Vec::new();
        };
        let lag = lag as usize;
        a.iter()
            .enumerate()
            .filter_map(|(i, a)| {
                let b = b.get(i + lag).copied().flatten()?;
                let a = (*a)?;
                (a.is_finite() && b.is_finite()).then_some((a, b))
            })
            .collect()
    }
}

/// Strength subscore from the correlation coefficient.
pub fn correlation_score(r: f64) -> f64 {
    let r = r.abs();
    if !r.is_finite() || r < tables::CORRELATION_FLOOR {
        return 0.0;
    }
    (r.min(1.0) - tables::CORRELATION_FLOOR) / (1.0 - tables::CORRELATION_FLOOR) * 100.0
}

/// Score one candidate.
pub fn score<S: PairedSeries + ?Sized>(candidate: &Candidate, series: &S) -> ScoredCandidate {
    let metric_a = normalize(&candidate.metric_a);
    let metric_b = normalize(&candidate.metric_b);
    let category_a = normalize(&candidate.category_a);
    let category_b = normalize(&candidate.category_b);

    let pairs = series.pairs(&metric_a, &metric_b, candidate.lag);
    let subscores = Subscores {
        correlation: correlation_score(candidate.correlation),
        cross_domain: tables::cross_domain_score(&category_a, &category_b),
        surprise: tables::surprise_score(&metric_a, &metric_b),
        actionability: tables::actionability_score(&metric_a, &metric_b),
        impact: impact::impact_score(&pairs),
    };
    ScoredCandidate {
        candidate: candidate.clone(),
        total: subscores.total(&WEIGHTS),
        subscores,
    }
}

/// Score every candidate and sort by descending total; ties keep input order.
pub fn rank<S: PairedSeries + ?Sized>(candidates: &[Candidate], series: &S) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates.iter().map(|c| score(c, series)).collect();
    scored.sort_by(|a, b| b.total.total_cmp(&a.total));
    scored
}

/// The highest-scoring candidate, or `None` for an empty list.
pub fn select_best<S: PairedSeries + ?Sized>(
    candidates: &[Candidate],
    series: &S,
) -> Option<ScoredCandidate> {
    rank(candidates, series).into_iter().next()
}
