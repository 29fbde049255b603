//! Built-in cache kinds, one per AI-backed call site.
//!
//! Each kind lists exactly the fields that make two requests "the same
//! question". Anything not listed (prompt wording, UI state) deliberately
//! does not participate in the key.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::key::{CacheRequest, KeyBuilder};

/// Explanation of one correlation between two metrics.
///
/// Key: `metric1`, `metric2` (ordered: A drives B), `correlation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub metric1: String,
    pub metric2: String,
    pub correlation: f64,
}

impl CacheRequest for CorrelationSummary {
    const FUNCTION: &'static str = "correlation_summary";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        key.text("metric1", &self.metric1)
            .text("metric2", &self.metric2)
            .number("correlation", self.correlation)
    }
}

/// Explanation of a detected anomaly.
///
/// Key: `anomaly_id`, `metric`, `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyExplanation {
    pub anomaly_id: String,
    pub metric: String,
    pub date: NaiveDate,
}

impl CacheRequest for AnomalyExplanation {
    const FUNCTION: &'static str = "anomaly_explanation";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        key.text("anomaly_id", &self.anomaly_id)
            .text("metric", &self.metric)
            .date("date", self.date)
    }
}

/// Summary of a single day.
///
/// Key: `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
}

impl CacheRequest for DailySummary {
    const FUNCTION: &'static str = "daily_summary";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        key.date("date", self.date)
    }
}

/// Summary of an inclusive date range.
///
/// Key: `date`, `end_date`. A range ending before it starts is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CacheRequest for PeriodSummary {
    const FUNCTION: &'static str = "period_summary";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        let key = key.date("date", self.date).date("end_date", self.end_date);
        if self.end_date < self.date {
            return key.reject("end_date precedes date");
        }
        key
    }
}

/// A user-typed question, optionally anchored to a day.
///
/// Key: hash of `question`, `date` (or absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeformQuestion {
    pub question: String,
    pub date: Option<NaiveDate>,
}

impl CacheRequest for FreeformQuestion {
    const FUNCTION: &'static str = "freeform_question";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        key.text_hash("question", &self.question)
            .optional("date", self.date, KeyBuilder::date)
    }
}

/// Narrative for the hero insight chosen over a date range.
///
/// Key: `correlation_id`, `date`, `end_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroInsight {
    pub correlation_id: String,
    pub date: NaiveDate,
    pub end_date: NaiveDate,
}

impl CacheRequest for HeroInsight {
    const FUNCTION: &'static str = "hero_insight";

    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
        key.text("correlation_id", &self.correlation_id)
            .date("date", self.date)
            .date("end_date", self.end_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn correlation_summary_key() {
        let key = CorrelationSummary {
            metric1: "sleep".into(),
            metric2: "sugar".into(),
            correlation: 0.62,
        }
        .cache_key()
        .unwrap();
        assert_eq!(
            key.as_str(),
            "correlation_summary:v1:metric1=sleep;metric2=sugar;correlation=0.620"
        );
    }

    #[test]
    fn correlation_direction_matters() {
        let ab = CorrelationSummary {
            metric1: "sleep".into(),
            metric2: "sugar".into(),
            correlation: 0.62,
        };
        let ba = CorrelationSummary {
            metric1: "sugar".into(),
            metric2: "sleep".into(),
            correlation: 0.62,
        };
        assert_ne!(ab.cache_key().unwrap(), ba.cache_key().unwrap());
    }

    #[test]
    fn kinds_never_collide() {
        let daily = DailySummary { date: day(1) }.cache_key().unwrap();
        let period = PeriodSummary {
            date: day(1),
            end_date: day(1),
        }
        .cache_key()
        .unwrap();
        assert_ne!(daily, period);
    }

    #[test]
    fn inverted_period_is_invalid() {
        let result = PeriodSummary {
            date: day(10),
            end_date: day(3),
        }
        .cache_key();
        assert!(result.is_err());
    }

    #[test]
    fn freeform_question_with_and_without_date() {
        let undated = FreeformQuestion {
            question: "Why am I tired?".into(),
            date: None,
        }
        .cache_key()
        .unwrap();
        let dated = FreeformQuestion {
            question: "Why am I tired?".into(),
            date: Some(day(2)),
        }
        .cache_key()
        .unwrap();
        assert_ne!(undated, dated);
        assert!(!undated.as_str().contains("tired"));
    }

    #[test]
    fn anomaly_key_includes_id() {
        let a = AnomalyExplanation {
            anomaly_id: "a-1".into(),
            metric: "resting_hr".into(),
            date: day(4),
        };
        let b = AnomalyExplanation {
            anomaly_id: "a-2".into(),
            ..a.clone()
        };
        assert_ne!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }
}
