//! Stable, versioned cache keys.
//!
//! Every cached call site declares exactly which fields participate in its
//! key by implementing [`CacheRequest`]. Fields are normalised before they
//! reach the key string:
//!
//! - dates as ISO `YYYY-MM-DD`
//! - numbers rounded to 3 decimal places (`-0.000` folds to `0.000`)
//! - free text hashed (SHA-256, first 16 hex chars) after case and whitespace folding
//! - identifiers trimmed, kept verbatim otherwise
//!
//! The key layout is `function:v{version}:name=value;name=value`. Bumping a
//! kind's `VERSION` orphans its old entries, which then age out by TTL.

use std::fmt;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::{HuginnError, Result};

/// Decimal places kept for numeric key fields.
pub const NUMBER_PRECISION: usize = 3;

/// Hex characters kept from a free-text hash.
const TEXT_HASH_LEN: usize = 16;

/// A fully normalised cache key (without the store prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cacheable request kind with an explicit key definition.
///
/// ```rust
/// # use huginn::cache::{CacheRequest, KeyBuilder};
/// struct WeeklyDigest { week: String }
///
/// impl CacheRequest for WeeklyDigest {
///     const FUNCTION: &'static str = "weekly_digest";
///
///     fn key_fields(&self, key: KeyBuilder) -> KeyBuilder {
///         key.text("week", &self.week)
///     }
/// }
///
/// let key = WeeklyDigest { week: "2024-W07".into() }.cache_key().unwrap();
/// assert_eq!(key.as_str(), "weekly_digest:v1:week=2024-W07");
/// ```
pub trait CacheRequest {
    /// Function name, also used as the metrics label.
    const FUNCTION: &'static str;

    /// Key schema version.
    const VERSION: u32 = 1;

    /// Add this request's fields to the key.
    fn key_fields(&self, key: KeyBuilder) -> KeyBuilder;

    /// Build the normalised key.
    ///
    /// Fails with [`HuginnError::InvalidKey`] when a field is missing or
    /// malformed.
    fn cache_key(&self) -> Result<CacheKey> {
        self.key_fields(KeyBuilder::new(Self::FUNCTION, Self::VERSION))
            .build()
    }
}

/// Accumulates normalised key fields; the first bad field wins.
#[derive(Debug)]
pub struct KeyBuilder {
    function: &'static str,
    version: u32,
    fields: Vec<(&'static str, String)>,
    error: Option<String>,
}

impl KeyBuilder {
    pub fn new(function: &'static str, version: u32) -> Self {
        Self {
            function,
            version,
            fields: Vec::new(),
            error: None,
        }
    }

    fn push(mut self, name: &'static str, value: String) -> Self {
        self.fields.push((name, value));
        self
    }

    fn fail(mut self, message: String) -> Self {
        if self.error.is_none() {
            self.error = Some(message);
        }
        self
    }

    /// A short identifier (metric name, record id). Must be non-blank.
    pub fn text(self, name: &'static str, value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            let function = self.function;
            return self.fail(format!("{function}: field '{name}' is empty"));
        }
        self.push(name, escape(value))
    }

    /// Free text, reduced to a short content hash.
    pub fn text_hash(self, name: &'static str, value: &str) -> Self {
        let folded = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if folded.is_empty() {
            let function = self.function;
            return self.fail(format!("{function}: field '{name}' is empty"));
        }
        let digest = format!("{:x}", Sha256::digest(folded.as_bytes()));
        self.push(name, digest[..TEXT_HASH_LEN].to_string())
    }

    /// A calendar date.
    pub fn date(self, name: &'static str, value: NaiveDate) -> Self {
        self.push(name, value.format("%Y-%m-%d").to_string())
    }

    /// A date given as text; accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub fn date_str(self, name: &'static str, value: &str) -> Self {
        match parse_date(value) {
            Some(date) => self.date(name, date),
            None => {
                let function = self.function;
                self.fail(format!("{function}: field '{name}' is not a date: {value:?}"))
            }
        }
    }

    /// A number, rounded to [`NUMBER_PRECISION`] places. Must be finite.
    pub fn number(self, name: &'static str, value: f64) -> Self {
        if !value.is_finite() {
            let function = self.function;
            return self.fail(format!("{function}: field '{name}' is not finite"));
        }
        self.push(name, format_number(value))
    }

    /// An integer.
    pub fn integer(self, name: &'static str, value: i64) -> Self {
        self.push(name, value.to_string())
    }

    /// Optional field: absent values are recorded as `-` so that
    /// "absent" and "present" never share a key.
    pub fn optional<V>(self, name: &'static str, value: Option<V>, add: impl FnOnce(Self, &'static str, V) -> Self) -> Self {
        match value {
            Some(v) => add(self, name, v),
            None => self.push(name, "-".to_string()),
        }
    }

    /// Mark the key invalid for a request-specific reason.
    pub fn reject(self, reason: &str) -> Self {
        let function = self.function;
        self.fail(format!("{function}: {reason}"))
    }

    /// Finish the key.
    pub fn build(self) -> Result<CacheKey> {
        if let Some(message) = self.error {
            return Err(HuginnError::InvalidKey(message));
        }
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";");
        Ok(CacheKey(format!(
            "{}:v{}:{fields}",
            self.function, self.version
        )))
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

fn format_number(value: f64) -> String {
    let scale = 10f64.powi(NUMBER_PRECISION as i32);
    let rounded = (value * scale).round() / scale;
    // Fold negative zero
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.prec$}", prec = NUMBER_PRECISION)
}

/// Escape the key's structural characters inside a value.
fn escape(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace(';', "%3B")
        .replace('=', "%3D")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> KeyBuilder {
        KeyBuilder::new("test_fn", 2)
    }

    #[test]
    fn key_layout() {
        let key = builder()
            .text("metric", "sleep")
            .number("r", 0.62)
            .build()
            .unwrap();
        assert_eq!(key.as_str(), "test_fn:v2:metric=sleep;r=0.620");
    }

    #[test]
    fn numbers_round_to_precision() {
        let a = builder().number("r", 0.62049).build().unwrap();
        let b = builder().number("r", 0.6204).build().unwrap();
        let c = builder().number("r", 0.6206).build().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn negative_zero_folds() {
        let a = builder().number("r", -0.0001).build().unwrap();
        let b = builder().number("r", 0.0).build().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_number_is_invalid() {
        let err = builder().number("r", f64::NAN).build().unwrap_err();
        assert!(matches!(err, HuginnError::InvalidKey(_)));
    }

    #[test]
    fn dates_normalise_to_iso() {
        let a = builder().date_str("date", "2024-03-05").build().unwrap();
        let b = builder()
            .date_str("date", "2024-03-05T23:10:00+00:00")
            .build()
            .unwrap();
        let c = builder()
            .date("date", NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.as_str().ends_with("date=2024-03-05"));
    }

    #[test]
    fn bad_date_is_invalid() {
        assert!(builder().date_str("date", "yesterday").build().is_err());
    }

    #[test]
    fn free_text_hash_ignores_whitespace_layout() {
        let a = builder()
            .text_hash("q", "why do I crave  sugar?")
            .build()
            .unwrap();
        let b = builder()
            .text_hash("q", "  why do I\ncrave sugar? ")
            .build()
            .unwrap();
        let c = builder().text_hash("q", "why do I crave salt?").build().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), "test_fn:v2:q=".len() + 16);
    }

    #[test]
    fn empty_text_is_invalid() {
        let err = builder().text("metric", "   ").build().unwrap_err();
        assert!(err.to_string().contains("'metric' is empty"));
    }

    #[test]
    fn separators_in_values_cannot_forge_fields() {
        let a = builder().text("a", "x;b=y").build().unwrap();
        let b = builder().text("a", "x").text("b", "y").build().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn optional_absent_differs_from_present() {
        let absent = builder()
            .optional("end", None::<&str>, |k, n, v| k.date_str(n, v))
            .build()
            .unwrap();
        let present = builder()
            .optional("end", Some("2024-01-01"), |k, n, v| k.date_str(n, v))
            .build()
            .unwrap();
        assert_ne!(absent, present);
    }

    #[test]
    fn version_is_part_of_key() {
        let v1 = KeyBuilder::new("f", 1).text("a", "x").build().unwrap();
        let v2 = KeyBuilder::new("f", 2).text("a", "x").build().unwrap();
        assert_ne!(v1, v2);
    }
}
