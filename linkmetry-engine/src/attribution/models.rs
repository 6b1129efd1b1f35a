//! Weighting rules for the attribution models
//!
//! Every rule returns one weight per journey touchpoint, in journey order,
//! summing to 1 (or an empty vector for an empty journey).

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::stats::half_life_decay;

use super::types::{AttributionModel, Touchpoint};

/// Share of the credit given to each end of a journey under `position_based`.
pub const POSITION_ENDPOINT_SHARE: f64 = 0.4;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Pluggable model behind `data_driven`
///
/// Returning `None` means "no opinion"; the engine then uses linear weights
/// and flags the result as a fallback.
pub trait DataDrivenModel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Raw, unnormalized weights for `journey`
    fn weights(&self, journey: &[Touchpoint], conversion_time: DateTime<Utc>) -> Option<Vec<f64>>;
}

/// Default data-driven model: always defers to linear weighting
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFallback;

impl DataDrivenModel for LinearFallback {
    fn name(&self) -> &str {
        "linear_fallback"
    }

    fn weights(&self, _journey: &[Touchpoint], _conversion_time: DateTime<Utc>) -> Option<Vec<f64>> {
        None
    }
}

/// Weights for a journey under `model`, plus whether linear weights stood in
/// for the data-driven model.
pub fn compute_weights(
    model: AttributionModel,
    journey: &[Touchpoint],
    conversion_time: DateTime<Utc>,
    half_life_days: f64,
    data_driven: &dyn DataDrivenModel,
) -> (Vec<f64>, bool) {
    let n = journey.len();
    match model {
        AttributionModel::FirstTouch => (first_touch(n), false),
        AttributionModel::LastTouch => (last_touch(n), false),
        AttributionModel::Linear => (linear(n), false),
        AttributionModel::PositionBased => (position_based(n), false),
        AttributionModel::TimeDecay => {
            let ages: Vec<f64> = journey
                .iter()
                .map(|t| age_in_days(t.touchpoint_time, conversion_time))
                .collect();
            (time_decay(&ages, half_life_days), false)
        }
        AttributionModel::DataDriven => {
            if n == 0 {
                return (Vec::new(), false);
            }
            match data_driven.weights(journey, conversion_time) {
                None => (linear(n), true),
                Some(raw) => match normalize(&raw, n) {
                    Some(weights) => (weights, false),
                    None => {
                        warn!(
                            model = data_driven.name(),
                            touchpoints = n,
                            "Data-driven weights rejected, using linear"
                        );
                        (linear(n), true)
                    }
                },
            }
        }
    }
}

fn age_in_days(at: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
    (reference - at).num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn first_touch(n: usize) -> Vec<f64> {
    (0..n).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect()
}

pub fn last_touch(n: usize) -> Vec<f64> {
    (0..n).map(|i| if i + 1 == n { 1.0 } else { 0.0 }).collect()
}

pub fn linear(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// 40% to each end, the remaining 20% spread over the middle.
pub fn position_based(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        2 => vec![0.5, 0.5],
        _ => {
            let middle = (1.0 - 2.0 * POSITION_ENDPOINT_SHARE) / (n - 2) as f64;
            (0..n)
                .map(|i| {
                    if i == 0 || i + 1 == n {
                        POSITION_ENDPOINT_SHARE
                    } else {
                        middle
                    }
                })
                .collect()
        }
    }
}

/// Weights proportional to `2^(-age / half_life)`, normalized.
///
/// Ages are measured relative to the freshest touchpoint before decaying so
/// long journeys don't underflow to all-zero weights.
pub fn time_decay(ages_days: &[f64], half_life_days: f64) -> Vec<f64> {
    let Some(freshest) = ages_days.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let raw: Vec<f64> = ages_days
        .iter()
        .map(|age| half_life_decay(age - freshest, half_life_days))
        .collect();
    normalize(&raw, ages_days.len()).unwrap_or_else(|| linear(ages_days.len()))
}

/// Scale `raw` to sum to 1; `None` for the wrong length, negative or
/// non-finite entries, or an all-zero vector.
pub fn normalize(raw: &[f64], expected_len: usize) -> Option<Vec<f64>> {
    if raw.len() != expected_len || raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return None;
    }
    let total: f64 = raw.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    Some(raw.iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CampaignFields, SessionId};
    use chrono::Duration;
    use uuid::Uuid;

    fn journey(days: &[i64], start: DateTime<Utc>) -> Vec<Touchpoint> {
        days.iter()
            .enumerate()
            .map(|(i, &d)| Touchpoint {
                id: Uuid::now_v7(),
                event_id: Uuid::now_v7(),
                session_id: SessionId::from("s"),
                short_code: "promo".into(),
                campaign: CampaignFields::default(),
                referrer: None,
                touchpoint_order: i as u64 + 1,
                touchpoint_time: start + Duration::days(d),
                conversion_id: None,
            })
            .collect()
    }

    fn assert_sums_to_one(weights: &[f64]) {
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "weights {weights:?} sum to {total}");
    }

    struct Fixed(Vec<f64>);

    impl DataDrivenModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn weights(&self, _: &[Touchpoint], _: DateTime<Utc>) -> Option<Vec<f64>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_position_based_shapes() {
        assert!(position_based(0).is_empty());
        assert_eq!(position_based(1), vec![1.0]);
        assert_eq!(position_based(2), vec![0.5, 0.5]);
        let three = position_based(3);
        assert!((three[0] - 0.4).abs() < 1e-12);
        assert!((three[1] - 0.2).abs() < 1e-12);
        assert!((three[2] - 0.4).abs() < 1e-12);
        let five = position_based(5);
        assert!((five[2] - 0.2 / 3.0).abs() < 1e-12);
        assert_sums_to_one(&five);
    }

    #[test]
    fn test_single_touch_models() {
        assert_eq!(first_touch(3), vec![1.0, 0.0, 0.0]);
        assert_eq!(last_touch(3), vec![0.0, 0.0, 1.0]);
        assert_eq!(first_touch(1), last_touch(1));
        assert!(linear(0).is_empty());
    }

    #[test]
    fn test_time_decay_favours_recent_touchpoints() {
        let weights = time_decay(&[5.0, 3.0, 0.0], 7.0);
        assert_sums_to_one(&weights);
        assert!(weights[0] < weights[1] && weights[1] < weights[2]);

        // One half-life apart means half the weight
        let weights = time_decay(&[7.0, 0.0], 7.0);
        assert!((weights[0] / weights[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_time_decay_survives_long_journeys() {
        let weights = time_decay(&[3650.0, 3000.0], 7.0);
        assert_sums_to_one(&weights);
        assert!(weights[1] > 0.99);
    }

    #[test]
    fn test_every_model_sums_to_one() {
        let start = Utc::now() - Duration::days(30);
        let conversion_time = start + Duration::days(20);
        for n in 1..=12 {
            let days: Vec<i64> = (0..n).map(|i| i as i64).collect();
            let journey = journey(&days, start);
            for model in AttributionModel::ALL {
                let (weights, _) =
                    compute_weights(model, &journey, conversion_time, 7.0, &LinearFallback);
                assert_eq!(weights.len(), journey.len());
                assert_sums_to_one(&weights);
                assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
            }
        }
    }

    #[test]
    fn test_data_driven_defaults_to_linear() {
        let start = Utc::now();
        let journey = journey(&[0, 1, 2, 3], start);
        let (weights, fallback) = compute_weights(
            AttributionModel::DataDriven,
            &journey,
            start + Duration::days(3),
            7.0,
            &LinearFallback,
        );
        assert!(fallback);
        assert_eq!(weights, linear(4));
    }

    #[test]
    fn test_custom_data_driven_weights_are_normalized() {
        let start = Utc::now();
        let journey = journey(&[0, 1], start);
        let (weights, fallback) = compute_weights(
            AttributionModel::DataDriven,
            &journey,
            start,
            7.0,
            &Fixed(vec![3.0, 1.0]),
        );
        assert!(!fallback);
        assert_eq!(weights, vec![0.75, 0.25]);
    }

    #[test]
    fn test_invalid_data_driven_weights_fall_back() {
        let start = Utc::now();
        let journey = journey(&[0, 1], start);
        for bad in [vec![1.0], vec![-1.0, 2.0], vec![f64::NAN, 1.0], vec![0.0, 0.0]] {
            let (weights, fallback) = compute_weights(
                AttributionModel::DataDriven,
                &journey,
                start,
                7.0,
                &Fixed(bad),
            );
            assert!(fallback);
            assert_eq!(weights, linear(2));
        }
    }
}
