//! Deterministic fallback text for failed generations.
//!
//! When upstream generation is unavailable the caller still gets something
//! to render. The first rule whose keyword appears in the (lower-cased)
//! prompt wins; the same prompt always yields the same text.

struct Rule {
    keywords: &'static [&'static str],
    text: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        keywords: &["anomal", "unusual", "spike"],
        text: "This reading stands out from your usual pattern. One-off changes are common; \
               if it repeats over the next few days, it may be worth a closer look.",
    },
    Rule {
        keywords: &["sleep", "bedtime"],
        text: "Sleep tends to respond to consistency. Keeping a regular bedtime and winding \
               down away from screens are the changes most people notice first.",
    },
    Rule {
        keywords: &["sugar", "glucose", "carb"],
        text: "Sugar intake often moves with energy, mood and sleep. Tracking when you eat \
               it, not only how much, usually reveals the clearest pattern.",
    },
    Rule {
        keywords: &["exercise", "workout", "steps", "activity"],
        text: "Activity levels ripple into many other metrics. Small, regular movement \
               tends to matter more than occasional intense sessions.",
    },
    Rule {
        keywords: &["heart rate", "hrv", "pulse"],
        text: "Heart rate and heart rate variability reflect recovery. They improve with \
               good sleep, hydration and lower stress, and dip after hard days.",
    },
    Rule {
        keywords: &["stress", "mood", "anxiety"],
        text: "Stress and mood are linked to sleep, movement and routine. Short breaks and \
               a consistent schedule are simple places to start.",
    },
];

/// Text shown when no rule matches.
pub const DEFAULT_FALLBACK: &str = "Insights are temporarily unavailable. Your data is safe \
     and up to date; check back in a little while for a fresh analysis.";

/// Canned response for `prompt`.
pub fn fallback_text(prompt: &str) -> &'static str {
    let prompt = prompt.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| prompt.contains(k)))
        .map(|rule| rule.text)
        .unwrap_or(DEFAULT_FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_keywords_case_insensitively() {
        assert!(fallback_text("Why is my SLEEP worse?").starts_with("Sleep"));
        assert!(fallback_text("blood glucose trend").starts_with("Sugar"));
        assert!(fallback_text("Resting Heart Rate up").starts_with("Heart rate"));
    }

    #[test]
    fn anomaly_rule_wins_over_topic() {
        assert!(fallback_text("explain the sleep anomaly").starts_with("This reading"));
    }

    #[test]
    fn unknown_prompt_gets_default() {
        assert_eq!(fallback_text("hello"), DEFAULT_FALLBACK);
        assert_eq!(fallback_text(""), DEFAULT_FALLBACK);
    }

    #[test]
    fn is_deterministic() {
        let prompt = "how does exercise affect me";
        assert_eq!(fallback_text(prompt), fallback_text(prompt));
    }
}
