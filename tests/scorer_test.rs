//! Tests for candidate scoring and hero selection.

use huginn::scorer::{self, WEIGHTS, correlation_score, rank, select_best};
use huginn::{Candidate, MetricTable, NoSeries};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// =========================================================================
// Ranking
// =========================================================================

#[test]
fn cross_domain_outranks_stronger_same_domain_correlation() {
    let candidates = vec![
        Candidate::new("steps", "activity", "active_minutes", "activity", 0.9),
        Candidate::new("sleep_hours", "sleep", "sugar_craving", "nutrition", 0.55),
    ];

    let ranked = rank(&candidates, &NoSeries);
    assert_eq!(ranked[0].candidate.metric_b, "sugar_craving");
    assert!(ranked[0].total > ranked[1].total);

    let same_domain = &ranked[1].subscores;
    assert_eq!(same_domain.cross_domain, 0.0);
    assert!(same_domain.correlation > ranked[0].subscores.correlation);
}

#[test]
fn select_best_on_empty_input_is_none() {
    assert!(select_best(&[], &NoSeries).is_none());
}

#[test]
fn single_candidate_is_returned_even_if_weak() {
    let candidates = vec![Candidate::new("humidity", "environment", "mood", "wellness", 0.1)];
    let best = select_best(&candidates, &NoSeries).unwrap();
    assert_eq!(best.subscores.correlation, 0.0);
    assert!(best.total > 0.0);
}

#[test]
fn ties_keep_input_order() {
    let a = Candidate::new("humidity", "environment", "mood", "wellness", 0.6);
    let b = Candidate::new("pressure", "environment", "focus", "wellness", 0.6);
    let ranked = rank(&[a.clone(), b.clone()], &NoSeries);
    assert_close(ranked[0].total, ranked[1].total);
    assert_eq!(ranked[0].candidate, a);
    assert_eq!(ranked[1].candidate, b);

    let ranked = rank(&[b.clone(), a.clone()], &NoSeries);
    assert_eq!(ranked[0].candidate, b);
}

#[test]
fn scoring_is_deterministic() {
    let candidates = vec![
        Candidate::new("caffeine_timing", "lifestyle", "deep_sleep", "sleep", -0.48),
        Candidate::new("resting_hr", "vitals", "stress_level", "wellness", 0.52),
        Candidate::new("water_intake", "nutrition", "headache", "wellness", -0.44),
    ];
    let first = rank(&candidates, &NoSeries);
    let second = rank(&candidates, &NoSeries);
    assert_eq!(first, second);
}

// =========================================================================
// Subscores
// =========================================================================

#[test]
fn total_is_weighted_sum_of_subscores() {
    let c = Candidate::new("caffeine_timing", "lifestyle", "sleep_quality", "sleep", -0.7);
    let scored = scorer::score(&c, &NoSeries);
    let s = scored.subscores;

    assert_close(s.correlation, 50.0);
    assert_close(s.cross_domain, 90.0);
    assert_close(s.surprise, 100.0);
    assert_close(s.actionability, 100.0);
    assert_close(s.impact, 0.0);
    assert_close(
        scored.total,
        50.0 * WEIGHTS.correlation
            + 90.0 * WEIGHTS.cross_domain
            + 100.0 * WEIGHTS.surprise
            + 100.0 * WEIGHTS.actionability,
    );
}

#[test]
fn correlation_subscore_is_linear_above_floor() {
    assert_eq!(correlation_score(0.2), 0.0);
    assert_close(correlation_score(0.55), 25.0);
    assert_close(correlation_score(-0.85), 75.0);
    assert_close(correlation_score(1.0), 100.0);
}

#[test]
fn names_are_normalised_before_lookup() {
    let c = Candidate::new("Caffeine Timing", "Lifestyle", "Sleep-Quality", "SLEEP", 0.7);
    let s = scorer::score(&c, &NoSeries).subscores;
    assert_close(s.cross_domain, 90.0);
    assert_close(s.surprise, 100.0);
    assert_close(s.actionability, 100.0);
}

#[test]
fn vitals_pair_with_anything() {
    let c = Candidate::new("resting_hr", "vitals", "screen_time", "lifestyle", 0.5);
    assert_close(scorer::score(&c, &NoSeries).subscores.cross_domain, 95.0);
}

#[test]
fn obvious_pair_scores_low_surprise() {
    let c = Candidate::new("exercise_minutes", "activity", "calories_burned", "nutrition", 0.8);
    let s = scorer::score(&c, &NoSeries).subscores;
    assert_close(s.surprise, 20.0);
    assert_close(s.actionability, 60.0);
}

// =========================================================================
// Impact
// =========================================================================

fn sleep_sugar_table() -> MetricTable {
    // Short sleep is followed by cravings the next day
    let sleep = [5.0, 5.0, 8.0, 8.0, 5.0, 8.0, 5.0, 5.0, 8.0, 8.0];
    let sugar = [5.0, 9.0, 8.5, 2.0, 2.5, 9.0, 2.0, 8.5, 9.0, 2.5, 2.0];
    let mut sleep: Vec<Option<f64>> = sleep.into_iter().map(Some).collect();
    sleep.push(None);
    MetricTable::new()
        .column("sleep_hours", sleep)
        .column("sugar_craving", sugar.into_iter().map(Some).collect())
}

#[test]
fn impact_uses_lagged_observations() {
    let table = sleep_sugar_table();
    let lagged = Candidate::new("sleep_hours", "sleep", "sugar_craving", "nutrition", -0.7).lag(1);
    let same_day = Candidate::new("sleep_hours", "sleep", "sugar_craving", "nutrition", -0.7);

    assert_close(scorer::score(&lagged, &table).subscores.impact, 100.0);
    // Same-day values barely differ between the groups
    assert_close(scorer::score(&same_day, &table).subscores.impact, 40.0);
}

#[test]
fn impact_needs_five_observations() {
    let table = MetricTable::new()
        .column("a", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None])
        .column("b", vec![Some(1.0), Some(1.0), Some(9.0), Some(9.0), Some(9.0)]);
    let c = Candidate::new("a", "sleep", "b", "nutrition", 0.9);
    assert_eq!(scorer::score(&c, &table).subscores.impact, 0.0);
}

#[test]
fn missing_metric_contributes_no_impact() {
    let c = Candidate::new("unknown", "sleep", "sugar_craving", "nutrition", 0.9);
    assert_eq!(scorer::score(&c, &sleep_sugar_table()).subscores.impact, 0.0);
}

#[test]
fn metric_table_deserializes_with_nulls() {
    let table: MetricTable =
        serde_json::from_str(r#"{"steps": [1000, null, 3000], "mood": [3, 4, null]}"#).unwrap();
    let c = Candidate::new("steps", "activity", "mood", "wellness", 0.5);
    // Only day 0 has both values: too few for impact
    assert_eq!(scorer::score(&c, &table).subscores.impact, 0.0);
}

#[test]
fn scored_candidate_serializes() {
    let c = Candidate::new("sleep_hours", "sleep", "sugar_craving", "nutrition", 0.55);
    let json = serde_json::to_value(scorer::score(&c, &NoSeries)).unwrap();
    assert_eq!(json["candidate"]["metric_a"], "sleep_hours");
    assert!(json["subscores"]["cross_domain"].is_number());
    assert!(json["total"].as_f64().unwrap() > 0.0);
}
