//! Group-sequential monitoring with Lan-DeMets alpha spending.
//!
//! Each interim look is assigned the alpha increment
//! `Δα_k = α(t_k) - α(t_{k-1})` of the configured spending function, where `t_k`
//! is the information fraction (per-arm sessions over the planned per-arm
//! sample size). The look's nominal two-sided boundary is `Φ⁻¹(1 - Δα_k / 2)`.
//! Summing the increments never exceeds `α(1) = α`, so by the union bound the
//! overall false-positive rate stays at or below the nominal level no matter
//! how many looks are taken.

use serde::{Deserialize, Serialize};

use crate::config::SpendingFunction;
use crate::error::{AnalyticsError, Result};

use super::normal::{inverse_normal, normal_cdf, two_tailed_critical};
use super::power::calculate_power;
use super::significance::{ArmCounts, Winner, evaluate_significance};

/// Cumulative counts at one interim look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub control: ArmCounts,
    pub variant: ArmCounts,
}

/// Fixed design parameters of a sequential test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequentialPlan {
    /// Planned sessions per arm at the final look.
    pub planned_per_arm: u64,
    /// Overall confidence level in percent.
    pub confidence: f64,
    pub spending: SpendingFunction,
}

/// Evaluation of a single look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookResult {
    pub look: usize,
    pub information_fraction: f64,
    pub z_score: f64,
    /// Nominal boundary for |z|; absent when the look adds no information.
    pub boundary: Option<f64>,
    /// Cumulative alpha spent up to and including this look.
    pub alpha_spent: f64,
    pub crossed: bool,
}

/// What to do with the experiment now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    /// A boundary was crossed.
    StopForEfficacy { winner: Winner },
    /// Planned sample reached without crossing any boundary.
    StopAtHorizon,
    /// Keep collecting data.
    Continue,
}

/// Outcome of a sequential test over a history of looks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialResult {
    pub looks: Vec<LookResult>,
    /// A boundary was crossed before the planned sample was reached.
    pub can_stop_early: bool,
    /// Power at the latest look for the currently observed effect.
    pub current_power: f64,
    pub recommendation: Recommendation,
}

/// Cumulative alpha spent at information fraction `t`.
pub fn alpha_spent(spending: SpendingFunction, alpha: f64, t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let t = t.min(1.0);
    match spending {
        SpendingFunction::ObrienFleming => {
            let z = inverse_normal(1.0 - alpha / 2.0);
            (2.0 - 2.0 * normal_cdf(z / t.sqrt())).clamp(0.0, alpha)
        }
        SpendingFunction::Pocock => {
            (alpha * (1.0 + (std::f64::consts::E - 1.0) * t).ln()).clamp(0.0, alpha)
        }
    }
}

fn validate_history(history: &[Checkpoint]) -> Result<()> {
    for pair in history.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        if after.control.sessions < before.control.sessions
            || after.variant.sessions < before.variant.sessions
            || after.control.conversions < before.control.conversions
            || after.variant.conversions < before.variant.conversions
        {
            return Err(AnalyticsError::Validation(
                "checkpoint counts must be cumulative".into(),
            ));
        }
    }
    Ok(())
}

/// Evaluate accumulated results at every checkpoint in `history`.
pub fn sequential_test(history: &[Checkpoint], plan: &SequentialPlan) -> Result<SequentialResult> {
    if plan.planned_per_arm == 0 {
        return Err(AnalyticsError::InvalidParameter(
            "planned sample size must be positive".into(),
        ));
    }
    if !(plan.confidence > 0.0 && plan.confidence < 100.0) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "confidence must be in (0, 100), got {}",
            plan.confidence
        )));
    }
    validate_history(history)?;

    let alpha = 1.0 - plan.confidence / 100.0;
    let mut looks = Vec::with_capacity(history.len());
    let mut previous_fraction = 0.0;
    let mut previous_spent = 0.0;
    let mut first_crossing: Option<(f64, Winner)> = None;

    for (index, checkpoint) in history.iter().enumerate() {
        let per_arm = checkpoint.control.sessions.min(checkpoint.variant.sessions);
        let fraction = (per_arm as f64 / plan.planned_per_arm as f64).min(1.0);
        let test = evaluate_significance(checkpoint.control, checkpoint.variant, plan.confidence);

        let (boundary, spent) = if fraction > previous_fraction {
            let spent = alpha_spent(plan.spending, alpha, fraction);
            let increment = spent - previous_spent;
            let boundary = (increment > 0.0).then(|| inverse_normal(1.0 - increment / 2.0));
            (boundary, spent)
        } else {
            (None, previous_spent)
        };

        let crossed = boundary.is_some_and(|b| test.z_score.abs() >= b);
        if crossed && first_crossing.is_none() {
            let winner = if test.z_score > 0.0 {
                Winner::Variant
            } else {
                Winner::Control
            };
            first_crossing = Some((fraction, winner));
        }

        looks.push(LookResult {
            look: index + 1,
            information_fraction: fraction,
            z_score: test.z_score,
            boundary,
            alpha_spent: spent,
            crossed,
        });
        previous_fraction = previous_fraction.max(fraction);
        previous_spent = spent;
    }

    let current_power = history
        .last()
        .map(|last| {
            calculate_power(
                last.control.rate(),
                last.variant.rate(),
                last.control.sessions,
                last.variant.sessions,
                plan.confidence,
            )
        })
        .unwrap_or(0.0);

    let (can_stop_early, recommendation) = match first_crossing {
        Some((fraction, winner)) => (fraction < 1.0, Recommendation::StopForEfficacy { winner }),
        None if previous_fraction >= 1.0 => (false, Recommendation::StopAtHorizon),
        None => (false, Recommendation::Continue),
    };

    Ok(SequentialResult {
        looks,
        can_stop_early,
        current_power,
        recommendation,
    })
}

/// Fixed-horizon critical value, for comparison with the sequential boundaries.
pub fn fixed_horizon_boundary(confidence: f64) -> f64 {
    two_tailed_critical(confidence)
}
