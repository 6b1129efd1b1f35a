//! Sample size and power calculations for two-proportion tests.

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

use super::normal::{inverse_normal, normal_cdf, two_tailed_critical};

/// Treatment rates are capped here when `baseline * (1 + effect)` overshoots.
pub const MAX_TREATMENT_RATE: f64 = 0.99;

/// Inputs behind a sample size recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeAssumptions {
    pub baseline_rate: f64,
    pub min_effect: f64,
    /// Treatment rate after applying the effect and the cap.
    pub expected_rate: f64,
    pub confidence: f64,
    pub power: f64,
}

/// Recommended sessions per variant (and in total) to detect an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSizeRecommendation {
    pub per_variant_n: u64,
    pub total_n: u64,
    pub variants: usize,
    pub assumptions: SampleSizeAssumptions,
}

fn check_open_unit(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "{name} must be in (0, 1), got {value}"
        )));
    }
    Ok(())
}

fn check_percent(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 100.0) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "{name} must be in (0, 100), got {value}"
        )));
    }
    Ok(())
}

/// Sessions needed per variant to detect a relative lift of `min_effect` over
/// `baseline_rate` with a two-tailed test.
///
/// `confidence` and `power` are percentages.
pub fn recommend_sample_size(
    baseline_rate: f64,
    min_effect: f64,
    confidence: f64,
    power: f64,
) -> Result<u64> {
    check_open_unit("baseline rate", baseline_rate)?;
    if !(min_effect > 0.0) || !min_effect.is_finite() {
        return Err(AnalyticsError::InvalidParameter(format!(
            "minimum effect must be positive, got {min_effect}"
        )));
    }
    check_percent("confidence", confidence)?;
    check_percent("power", power)?;

    let p1 = baseline_rate;
    let p2 = (baseline_rate * (1.0 + min_effect)).min(MAX_TREATMENT_RATE);
    let delta = p2 - p1;
    if delta.abs() < f64::EPSILON {
        return Err(AnalyticsError::InvalidParameter(format!(
            "effect vanishes once the treatment rate is capped at {MAX_TREATMENT_RATE}"
        )));
    }
    let p_bar = (p1 + p2) / 2.0;

    let z_alpha = two_tailed_critical(confidence);
    let z_beta = inverse_normal(power / 100.0);

    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let n = (numerator * numerator) / (delta * delta);

    Ok(n.ceil().max(1.0) as u64)
}

/// Full recommendation for an experiment with `variants` arms.
pub fn sample_size_recommendation(
    baseline_rate: f64,
    min_effect: f64,
    confidence: f64,
    power: f64,
    variants: usize,
) -> Result<SampleSizeRecommendation> {
    if variants < 2 {
        return Err(AnalyticsError::InvalidParameter(format!(
            "an experiment needs at least 2 variants, got {variants}"
        )));
    }
    let per_variant_n = recommend_sample_size(baseline_rate, min_effect, confidence, power)?;
    Ok(SampleSizeRecommendation {
        per_variant_n,
        total_n: per_variant_n.saturating_mul(variants as u64),
        variants,
        assumptions: SampleSizeAssumptions {
            baseline_rate,
            min_effect,
            expected_rate: (baseline_rate * (1.0 + min_effect)).min(MAX_TREATMENT_RATE),
            confidence,
            power,
        },
    })
}

/// Power of a two-tailed test to detect the difference between `p1` and `p2`
/// with `n1` and `n2` sessions, using Cohen's h.
///
/// Degenerate inputs (a rate outside (0, 1), an empty arm, a confidence outside
/// (0, 100)) yield `0.0` rather than an error.
pub fn calculate_power(p1: f64, p2: f64, n1: u64, n2: u64, confidence: f64) -> f64 {
    let in_unit = |p: f64| p > 0.0 && p < 1.0;
    if !in_unit(p1) || !in_unit(p2) || n1 == 0 || n2 == 0 {
        return 0.0;
    }
    if !(confidence > 0.0 && confidence < 100.0) {
        return 0.0;
    }

    let h = 2.0 * p2.sqrt().asin() - 2.0 * p1.sqrt().asin();
    let standard_error = (1.0 / n1 as f64 + 1.0 / n2 as f64).sqrt();
    let z_alpha = two_tailed_critical(confidence);
    let effect_z = h.abs() / standard_error;

    let power = normal_cdf(effect_z - z_alpha) + normal_cdf(-effect_z - z_alpha);
    if power.is_finite() {
        power.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sample_size() {
        // p1 = 0.10, p2 = 0.105
        let n = recommend_sample_size(0.10, 0.05, 95.0, 80.0).unwrap();
        assert!((57_000..=58_500).contains(&n), "n = {n}");
        assert_eq!(n, recommend_sample_size(0.10, 0.05, 95.0, 80.0).unwrap());
    }

    #[test]
    fn test_larger_effect_needs_fewer_sessions() {
        let small = recommend_sample_size(0.10, 0.05, 95.0, 80.0).unwrap();
        let large = recommend_sample_size(0.10, 0.20, 95.0, 80.0).unwrap();
        assert!(large < small);
    }

    #[test]
    fn test_monotonic_in_effect_confidence_and_power() {
        let effects = [0.5, 0.3, 0.2, 0.1, 0.05, 0.02];
        let ns: Vec<u64> = effects
            .iter()
            .map(|&e| recommend_sample_size(0.2, e, 95.0, 80.0).unwrap())
            .collect();
        assert!(ns.windows(2).all(|w| w[0] <= w[1]));

        let confidences = [80.0, 90.0, 95.0, 99.0];
        let ns: Vec<u64> = confidences
            .iter()
            .map(|&c| recommend_sample_size(0.2, 0.1, c, 80.0).unwrap())
            .collect();
        assert!(ns.windows(2).all(|w| w[0] <= w[1]));

        let powers = [50.0, 70.0, 80.0, 90.0, 95.0];
        let ns: Vec<u64> = powers
            .iter()
            .map(|&p| recommend_sample_size(0.2, 0.1, 95.0, p).unwrap())
            .collect();
        assert!(ns.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_capped_treatment_rate_is_flat_in_effect() {
        let a = recommend_sample_size(0.9, 0.5, 95.0, 80.0).unwrap();
        let b = recommend_sample_size(0.9, 0.9, 95.0, 80.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_out_of_range_parameters() {
        for (baseline, effect, confidence, power) in [
            (0.0, 0.1, 95.0, 80.0),
            (1.0, 0.1, 95.0, 80.0),
            (0.1, 0.0, 95.0, 80.0),
            (0.1, -0.2, 95.0, 80.0),
            (0.1, 0.1, 0.0, 80.0),
            (0.1, 0.1, 100.0, 80.0),
            (0.1, 0.1, 95.0, 0.0),
            (0.1, 0.1, 95.0, 120.0),
            (0.99, 0.1, 95.0, 80.0),
        ] {
            let err = recommend_sample_size(baseline, effect, confidence, power).unwrap_err();
            assert!(matches!(err, AnalyticsError::InvalidParameter(_)));
        }
    }

    #[test]
    fn test_recommendation_totals() {
        let rec = sample_size_recommendation(0.1, 0.1, 95.0, 80.0, 3).unwrap();
        assert_eq!(rec.total_n, rec.per_variant_n * 3);
        assert!((rec.assumptions.expected_rate - 0.11).abs() < 1e-12);
        assert!(sample_size_recommendation(0.1, 0.1, 95.0, 80.0, 1).is_err());
    }

    #[test]
    fn test_power_at_recommended_size_is_near_target() {
        let n = recommend_sample_size(0.10, 0.20, 95.0, 80.0).unwrap();
        let power = calculate_power(0.10, 0.12, n, n, 95.0);
        assert!((power - 0.80).abs() < 0.03, "power = {power}");
    }

    #[test]
    fn test_power_grows_with_sample_size() {
        let small = calculate_power(0.10, 0.12, 500, 500, 95.0);
        let large = calculate_power(0.10, 0.12, 20_000, 20_000, 95.0);
        assert!(small < large);
        assert!(large <= 1.0);
    }

    #[test]
    fn test_power_degenerate_inputs_are_zero() {
        assert_eq!(calculate_power(0.0, 0.1, 100, 100, 95.0), 0.0);
        assert_eq!(calculate_power(0.1, 1.0, 100, 100, 95.0), 0.0);
        assert_eq!(calculate_power(0.1, 0.2, 0, 100, 95.0), 0.0);
        assert_eq!(calculate_power(0.1, 0.2, 100, 100, 100.0), 0.0);
    }

    #[test]
    fn test_power_with_no_difference_is_alpha() {
        let power = calculate_power(0.1, 0.1, 1000, 1000, 95.0);
        assert!((power - 0.05).abs() < 1e-4);
    }
}
