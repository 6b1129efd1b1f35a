//! Deterministic traffic bucketing.
//!
//! A session's bucket is a pure function of the experiment id and the session
//! id, so concurrent callers always agree on the variant without coordination.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::error::{AnalyticsError, Result};
use crate::events::SessionId;

use super::types::{ExperimentId, NewVariant, Variant};

/// Number of traffic buckets; allocations are integer percentages.
pub const BUCKETS: u32 = 100;

/// Stable bucket in `0..100` for a session within an experiment.
pub fn bucket_for(experiment_id: ExperimentId, session_id: &SessionId) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update(b":");
    hasher.update(session_id.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(BUCKETS)) as u32
}

/// Variant whose cumulative allocation range contains `bucket`.
///
/// `variants` must already be in creation order.
pub fn select_variant(variants: &[Variant], bucket: u32) -> Option<&Variant> {
    let mut upper = 0;
    for variant in variants {
        upper += variant.traffic_allocation;
        if bucket < upper {
            return Some(variant);
        }
    }
    None
}

/// Check the creation-time invariants of a variant set.
pub fn validate_variants(variants: &[NewVariant]) -> Result<()> {
    if variants.len() < 2 {
        return Err(AnalyticsError::Validation(format!(
            "an experiment needs at least 2 variants, got {}",
            variants.len()
        )));
    }

    let total: u64 = variants.iter().map(|v| u64::from(v.traffic_allocation)).sum();
    if total != u64::from(BUCKETS) {
        return Err(AnalyticsError::Validation(format!(
            "traffic allocations must sum to 100, got {total}"
        )));
    }

    let controls: Vec<&NewVariant> = variants.iter().filter(|v| v.is_control).collect();
    if controls.len() != 1 {
        return Err(AnalyticsError::Validation(format!(
            "exactly one control variant is required, got {}",
            controls.len()
        )));
    }
    // The control supplies the baseline rate
    if controls[0].traffic_allocation == 0 {
        return Err(AnalyticsError::Validation(
            "the control variant needs a non-zero allocation".into(),
        ));
    }

    let mut names = HashSet::new();
    let mut codes = HashSet::new();
    for variant in variants {
        if variant.name.trim().is_empty() {
            return Err(AnalyticsError::Validation("variant name is empty".into()));
        }
        if variant.short_code.trim().is_empty() {
            return Err(AnalyticsError::Validation(format!(
                "variant '{}' has an empty short code",
                variant.name
            )));
        }
        if !names.insert(variant.name.as_str()) {
            return Err(AnalyticsError::Validation(format!(
                "duplicate variant name '{}'",
                variant.name
            )));
        }
        if !codes.insert(variant.short_code.as_str()) {
            return Err(AnalyticsError::Validation(format!(
                "duplicate short code '{}'",
                variant.short_code
            )));
        }
    }

    Ok(())
}

/// Same checks for variants already persisted (used before starting).
pub fn validate_stored_variants(variants: &[Variant]) -> Result<()> {
    let as_new: Vec<NewVariant> = variants
        .iter()
        .map(|v| NewVariant {
            name: v.name.clone(),
            short_code: v.short_code.clone(),
            traffic_allocation: v.traffic_allocation,
            is_control: v.is_control,
        })
        .collect();
    validate_variants(&as_new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stored(experiment_id: ExperimentId, allocations: &[u32]) -> Vec<Variant> {
        allocations
            .iter()
            .enumerate()
            .map(|(i, &allocation)| Variant {
                id: Uuid::now_v7(),
                experiment_id,
                name: format!("v{i}"),
                short_code: format!("code{i}"),
                traffic_allocation: allocation,
                is_control: i == 0,
                position: i as u32,
            })
            .collect()
    }

    #[test]
    fn test_bucket_is_stable() {
        let experiment = Uuid::now_v7();
        let session = SessionId::from("session-123");
        let first = bucket_for(experiment, &session);
        for _ in 0..100 {
            assert_eq!(bucket_for(experiment, &session), first);
        }
        assert!(first < BUCKETS);
    }

    #[test]
    fn test_bucket_depends_on_experiment() {
        let session = SessionId::from("session-123");
        let buckets: HashSet<u32> = (0..50)
            .map(|_| bucket_for(Uuid::new_v4(), &session))
            .collect();
        assert!(buckets.len() > 10);
    }

    #[test]
    fn test_select_variant_walks_ranges() {
        let variants = stored(Uuid::now_v7(), &[20, 30, 50]);
        assert_eq!(select_variant(&variants, 0).unwrap().name, "v0");
        assert_eq!(select_variant(&variants, 19).unwrap().name, "v0");
        assert_eq!(select_variant(&variants, 20).unwrap().name, "v1");
        assert_eq!(select_variant(&variants, 49).unwrap().name, "v1");
        assert_eq!(select_variant(&variants, 50).unwrap().name, "v2");
        assert_eq!(select_variant(&variants, 99).unwrap().name, "v2");
        assert!(select_variant(&variants, 100).is_none());
    }

    #[test]
    fn test_zero_allocation_variant_never_selected() {
        let variants = stored(Uuid::now_v7(), &[50, 0, 50]);
        for bucket in 0..BUCKETS {
            assert_ne!(select_variant(&variants, bucket).unwrap().name, "v1");
        }
    }

    #[test]
    fn test_distribution_matches_allocation() {
        // Chi-square goodness of fit, 2 degrees of freedom, p = 0.001 -> 13.82
        let experiment = Uuid::now_v7();
        let allocations = [20u32, 30, 50];
        let variants = stored(experiment, &allocations);
        let sessions = 100_000;

        let mut counts = [0u64; 3];
        for i in 0..sessions {
            let session = SessionId::new(format!("session-{i}"));
            let variant = select_variant(&variants, bucket_for(experiment, &session)).unwrap();
            counts[variant.position as usize] += 1;
        }

        let chi_square: f64 = counts
            .iter()
            .zip(allocations.iter())
            .map(|(&observed, &pct)| {
                let expected = sessions as f64 * pct as f64 / 100.0;
                (observed as f64 - expected).powi(2) / expected
            })
            .sum();
        assert!(chi_square < 13.82, "chi-square = {chi_square}, counts = {counts:?}");
    }

    #[test]
    fn test_valid_sets_accepted() {
        for allocations in [vec![50, 50], vec![10, 90], vec![34, 33, 33], vec![25; 4], vec![100, 0]] {
            let variants: Vec<NewVariant> = allocations
                .iter()
                .enumerate()
                .map(|(i, &a)| NewVariant {
                    name: format!("v{i}"),
                    short_code: format!("c{i}"),
                    traffic_allocation: a,
                    is_control: i == 0,
                })
                .collect();
            assert!(validate_variants(&variants).is_ok(), "{allocations:?}");
        }
    }

    #[test]
    fn test_invalid_sets_rejected() {
        let cases = vec![
            vec![NewVariant::control("a", "a", 100)],
            vec![NewVariant::control("a", "a", 50), NewVariant::new("b", "b", 40)],
            vec![NewVariant::control("a", "a", 60), NewVariant::new("b", "b", 60)],
            vec![NewVariant::new("a", "a", 50), NewVariant::new("b", "b", 50)],
            vec![NewVariant::control("a", "a", 50), NewVariant::control("b", "b", 50)],
            vec![NewVariant::control("a", "x", 50), NewVariant::new("a", "y", 50)],
            vec![NewVariant::control("a", "x", 50), NewVariant::new("b", "x", 50)],
            vec![NewVariant::control(" ", "x", 50), NewVariant::new("b", "y", 50)],
            vec![NewVariant::control("a", "x", 0), NewVariant::new("b", "y", 100)],
        ];
        for variants in cases {
            let err = validate_variants(&variants).unwrap_err();
            assert!(matches!(err, AnalyticsError::Validation(_)), "{variants:?}");
        }
    }
}
