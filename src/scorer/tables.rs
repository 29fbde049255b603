//! Curated lookup tables for the candidate scorer.
//!
//! Names are matched after [`normalize`]: lower case, with spaces and
//! dashes folded to `_`. Metric lists match by substring, so
//! `"caffeine"` covers `caffeine_mg` and `caffeine_timing`; category pairs
//! match exactly. Pair lists are order-insensitive.

/// Below this absolute correlation the strength subscore is zero.
pub const CORRELATION_FLOOR: f64 = 0.4;

/// Cross-domain score when either side is a vitals metric.
pub const VITALS_CROSS_SCORE: f64 = 95.0;

/// Cross-domain score for category pairs not listed below.
pub const DEFAULT_CROSS_SCORE: f64 = 60.0;

/// Category pairs with a curated cross-domain score.
pub const CATEGORY_PAIR_SCORES: &[(&str, &str, f64)] = &[
    ("nutrition", "sleep", 100.0),
    ("nutrition", "wellness", 85.0),
    ("lifestyle", "sleep", 90.0),
    ("sleep", "wellness", 80.0),
    ("activity", "sleep", 75.0),
    ("lifestyle", "wellness", 75.0),
    ("activity", "wellness", 70.0),
    ("activity", "nutrition", 65.0),
];

pub const OBVIOUS_SCORE: f64 = 20.0;
pub const SURPRISING_SCORE: f64 = 100.0;
pub const NEUTRAL_SURPRISE_SCORE: f64 = 60.0;

/// Relationships everyone already expects.
pub const OBVIOUS_PAIRS: &[(&str, &str)] = &[
    ("exercise", "calories_burned"),
    ("exercise", "active_minutes"),
    ("workout", "calories_burned"),
    ("steps", "calories_burned"),
    ("steps", "distance"),
    ("steps", "active_minutes"),
    ("sleep_duration", "time_in_bed"),
    ("calories", "carbs"),
    ("calories", "fat"),
    ("calories", "protein"),
    ("weight", "bmi"),
];

/// Relationships users rarely anticipate.
pub const SURPRISING_PAIRS: &[(&str, &str)] = &[
    ("sleep", "sugar"),
    ("caffeine_timing", "sleep"),
    ("screen_time", "sleep"),
    ("meal_timing", "sleep"),
    ("alcohol", "hrv"),
    ("alcohol", "resting_heart_rate"),
    ("hydration", "mood"),
    ("sugar", "mood"),
    ("stress", "digestion"),
    ("sleep", "hrv"),
];

pub const CONTROLLABLE_SCORE: f64 = 100.0;
pub const SOMEWHAT_CONTROLLABLE_SCORE: f64 = 60.0;
pub const UNCONTROLLABLE_SCORE: f64 = 20.0;

/// Metrics the user directly decides.
pub const CONTROLLABLE_METRICS: &[&str] = &[
    "caffeine",
    "screen_time",
    "bedtime",
    "meal_timing",
    "alcohol",
    "hydration",
    "water_intake",
    "sugar",
    "meditation",
    "wake_time",
];

/// Metrics the user can influence indirectly.
pub const SOMEWHAT_CONTROLLABLE_METRICS: &[&str] = &[
    "sleep_duration",
    "sleep_hours",
    "exercise_minutes",
    "active_minutes",
    "steps",
    "stress",
    "calories",
    "protein",
    "carbs",
];

/// Fold a metric or category name for table lookups.
pub fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Cross-domain score for two (normalised) categories.
pub fn cross_domain_score(category_a: &str, category_b: &str) -> f64 {
    if category_a == category_b {
        return 0.0;
    }
    if category_a == "vitals" || category_b == "vitals" {
        return VITALS_CROSS_SCORE;
    }
    CATEGORY_PAIR_SCORES
        .iter()
        .find(|(x, y, _)| {
            (*x == category_a && *y == category_b) || (*x == category_b && *y == category_a)
        })
        .map(|(_, _, score)| *score)
        .unwrap_or(DEFAULT_CROSS_SCORE)
}

fn pair_listed(list: &[(&str, &str)], metric_a: &str, metric_b: &str) -> bool {
    list.iter().any(|(x, y)| {
        (metric_a.contains(x) && metric_b.contains(y)) || (metric_a.contains(y) && metric_b.contains(x))
    })
}

/// Novelty score for two (normalised) metric names.
pub fn surprise_score(metric_a: &str, metric_b: &str) -> f64 {
    if pair_listed(OBVIOUS_PAIRS, metric_a, metric_b) {
        OBVIOUS_SCORE
    } else if pair_listed(SURPRISING_PAIRS, metric_a, metric_b) {
        SURPRISING_SCORE
    } else {
        NEUTRAL_SURPRISE_SCORE
    }
}

/// Actionability score: the more controllable of the two metrics decides.
pub fn actionability_score(metric_a: &str, metric_b: &str) -> f64 {
    let any_of = |list: &[&str]| {
        list.iter()
            .any(|m| metric_a.contains(m) || metric_b.contains(m))
    };
    if any_of(CONTROLLABLE_METRICS) {
        CONTROLLABLE_SCORE
    } else if any_of(SOMEWHAT_CONTROLLABLE_METRICS) {
        SOMEWHAT_CONTROLLABLE_SCORE
    } else {
        UNCONTROLLABLE_SCORE
    }
}
