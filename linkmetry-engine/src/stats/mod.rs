//! Pure statistics for experiment analysis.
//!
//! Nothing in this module touches storage or shared state; every function is a
//! plain computation over its arguments.

pub mod normal;
mod power;
mod sequential;
mod significance;

pub use normal::{
    inverse_normal, normal_cdf, two_tailed_critical, two_tailed_p_value,
};
pub use power::{
    MAX_TREATMENT_RATE, SampleSizeAssumptions, SampleSizeRecommendation, calculate_power,
    recommend_sample_size, sample_size_recommendation,
};
pub use sequential::{
    Checkpoint, LookResult, Recommendation, SequentialPlan, SequentialResult, alpha_spent,
    fixed_horizon_boundary, sequential_test,
};
pub use significance::{
    ArmCounts, DEFAULT_CONFIDENCE, SignificanceResult, Winner, evaluate_significance,
};

/// Weight of an event `elapsed_days` before the reference time, halving every
/// `half_life_days`.
///
/// Events after the reference time are treated as simultaneous with it.
pub fn half_life_decay(elapsed_days: f64, half_life_days: f64) -> f64 {
    if !(half_life_days > 0.0) {
        return 1.0;
    }
    2f64.powf(-elapsed_days.max(0.0) / half_life_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_life_decay() {
        assert!((half_life_decay(0.0, 7.0) - 1.0).abs() < 1e-12);
        assert!((half_life_decay(7.0, 7.0) - 0.5).abs() < 1e-12);
        assert!((half_life_decay(14.0, 7.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_half_life_decay_edge_cases() {
        assert!((half_life_decay(-3.0, 7.0) - 1.0).abs() < 1e-12);
        assert_eq!(half_life_decay(5.0, 0.0), 1.0);
    }
}
