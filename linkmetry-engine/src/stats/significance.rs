//! Two-proportion z-test between a control and a variant.

use serde::{Deserialize, Serialize};

use super::normal::{two_tailed_critical, two_tailed_p_value};

/// Confidence level used when callers don't specify one.
pub const DEFAULT_CONFIDENCE: f64 = 95.0;

/// Sessions and conversions observed for one arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmCounts {
    pub sessions: u64,
    pub conversions: u64,
}

impl ArmCounts {
    pub fn new(sessions: u64, conversions: u64) -> Self {
        Self {
            sessions,
            conversions,
        }
    }

    /// Conversion rate, `0.0` for an empty arm.
    pub fn rate(&self) -> f64 {
        if self.sessions == 0 {
            0.0
        } else {
            self.conversions.min(self.sessions) as f64 / self.sessions as f64
        }
    }
}

/// Which arm a significant test favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Control,
    Variant,
}

/// Outcome of a significance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub z_score: f64,
    pub p_value: f64,
    pub significant: bool,
    pub winner: Option<Winner>,
    /// Variant rate minus control rate.
    pub absolute_difference: f64,
    /// Relative lift over control, absent when the control rate is zero.
    pub relative_lift: Option<f64>,
    /// Unpooled Wald interval for the absolute difference.
    pub confidence_interval: (f64, f64),
    pub confidence: f64,
}

impl SignificanceResult {
    fn inconclusive(difference: f64, relative_lift: Option<f64>, confidence: f64) -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
            significant: false,
            winner: None,
            absolute_difference: difference,
            relative_lift,
            confidence_interval: (difference, difference),
            confidence,
        }
    }
}

/// Pooled two-proportion z-test of `variant` against `control`.
///
/// Empty arms or a pooled rate of exactly 0 or 1 produce an inconclusive result
/// (`z = 0`, `p = 1`) instead of NaN.
pub fn evaluate_significance(
    control: ArmCounts,
    variant: ArmCounts,
    confidence: f64,
) -> SignificanceResult {
    let confidence = if confidence > 0.0 && confidence < 100.0 {
        confidence
    } else {
        DEFAULT_CONFIDENCE
    };

    let p_control = control.rate();
    let p_variant = variant.rate();
    let difference = p_variant - p_control;
    let relative_lift = (p_control > 0.0).then(|| difference / p_control);

    if control.sessions == 0 || variant.sessions == 0 {
        return SignificanceResult::inconclusive(difference, relative_lift, confidence);
    }

    let n_control = control.sessions as f64;
    let n_variant = variant.sessions as f64;
    let pooled = (control.conversions.min(control.sessions)
        + variant.conversions.min(variant.sessions)) as f64
        / (n_control + n_variant);
    let pooled_se = (pooled * (1.0 - pooled) * (1.0 / n_control + 1.0 / n_variant)).sqrt();
    if !(pooled_se > 0.0) {
        return SignificanceResult::inconclusive(difference, relative_lift, confidence);
    }

    let z_score = difference / pooled_se;
    let p_value = two_tailed_p_value(z_score);
    let significant = p_value < 1.0 - confidence / 100.0;
    let winner = match (significant, difference > 0.0) {
        (false, _) => None,
        (true, true) => Some(Winner::Variant),
        (true, false) => Some(Winner::Control),
    };

    let critical = two_tailed_critical(confidence);
    let wald_se = (p_control * (1.0 - p_control) / n_control
        + p_variant * (1.0 - p_variant) / n_variant)
        .sqrt();
    let margin = critical * wald_se;

    SignificanceResult {
        z_score,
        p_value,
        significant,
        winner,
        absolute_difference: difference,
        relative_lift,
        confidence_interval: (difference - margin, difference + margin),
        confidence,
    }
}
