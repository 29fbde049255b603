//! Impact magnitude via Cohen's d.
//!
//! Observations are split at the median of metric A; the effect size is the
//! absolute difference of metric B's group means over the pooled standard
//! deviation.

/// Minimum usable paired observations.
pub const MIN_OBSERVATIONS: usize = 5;

/// Cohen's d between the above-median and at-or-below-median groups.
///
/// `None` when either group has fewer than two members or the pooled
/// standard deviation is zero.
pub fn cohens_d(pairs: &[(f64, f64)]) -> Option<f64> {
    let mut a_values: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
    a_values.sort_by(f64::total_cmp);
    let median = median_of_sorted(&a_values)?;

    let (high, low): (Vec<f64>, Vec<f64>) = {
        let mut high = Vec::new();
        let mut low = Vec::new();
        for &(a, b) in pairs {
            if a > median {
                high.push(b);
            } else {
                low.push(b);
            }
        }
        (high, low)
    };
    if high.len() < 2 || low.len() < 2 {
        return None;
    }

    let (mean_high, var_high) = mean_and_variance(&high);
    let (mean_low, var_low) = mean_and_variance(&low);
    let n_high = high.len() as f64;
    let n_low = low.len() as f64;
    let pooled =
        (((n_high - 1.0) * var_high + (n_low - 1.0) * var_low) / (n_high + n_low - 2.0)).sqrt();
    if !pooled.is_finite() || pooled <= f64::EPSILON {
        return None;
    }
    Some((mean_high - mean_low).abs() / pooled)
}

/// Impact subscore in `[0, 100]`.
pub fn impact_score(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < MIN_OBSERVATIONS {
        return 0.0;
    }
    match cohens_d(pairs) {
        Some(d) if d < 0.2 => 10.0,
        Some(d) if d < 0.5 => 40.0,
        Some(d) if d < 0.8 => 70.0,
        Some(_) => 100.0,
        None => 0.0,
    }
}

fn median_of_sorted(values: &[f64]) -> Option<f64> {
    let n = values.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(values[n / 2]),
        _ => Some((values[n / 2 - 1] + values[n / 2]) / 2.0),
    }
}

/// Mean and sample (n - 1) variance.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}
