//! Standard normal distribution helpers.

/// Probabilities are clamped into this open interval before inversion.
const MIN_PROBABILITY: f64 = 1e-15;

// Beasley-Springer-Moro coefficients
const A: [f64; 4] = [
    2.506_628_238_84,
    -18.615_000_625_29,
    41.391_197_735_34,
    -25.441_060_496_37,
];
const B: [f64; 4] = [
    -8.473_510_930_90,
    23.083_367_437_43,
    -21.062_241_018_26,
    3.130_829_098_33,
];
const C: [f64; 9] = [
    0.337_475_482_272_614_7,
    0.976_169_019_091_718_6,
    0.160_797_971_491_820_9,
    0.027_643_881_033_386_3,
    0.003_840_572_937_360_9,
    0.000_395_189_651_191_9,
    0.000_032_176_788_176_8,
    0.000_000_288_816_736_4,
    0.000_000_396_031_518_7,
];

/// Upper tail probability `P(Z > x)` for `x >= 0` (Abramowitz & Stegun 26.2.17).
fn upper_tail(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.231_641_9 * x);
    let d = 0.398_942_280_401_432_7 * (-x * x / 2.0).exp();
    d * t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))))
}

/// Standard normal CDF `Φ(x)`.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    if x >= 0.0 {
        1.0 - upper_tail(x)
    } else {
        upper_tail(-x)
    }
}

/// Inverse standard normal CDF `Φ⁻¹(p)` using the Beasley-Springer-Moro approximation.
///
/// `p` is clamped into `[1e-15, 1 - 1e-15]`, so the result is always finite.
pub fn inverse_normal(p: f64) -> f64 {
    let p = if p.is_nan() {
        0.5
    } else {
        p.clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY)
    };

    let y = p - 0.5;
    if y.abs() < 0.42 {
        let r = y * y;
        let num = y * (((A[3] * r + A[2]) * r + A[1]) * r + A[0]);
        let den = (((B[3] * r + B[2]) * r + B[1]) * r + B[0]) * r + 1.0;
        return num / den;
    }

    let r = if y < 0.0 { p } else { 1.0 - p };
    let s = (-r.ln()).ln();
    let x = C
        .iter()
        .rev()
        .fold(0.0, |acc, &coefficient| acc * s + coefficient);
    if y < 0.0 { -x } else { x }
}

/// Two-tailed critical value for a confidence level given in percent.
pub fn two_tailed_critical(confidence_pct: f64) -> f64 {
    let alpha = 1.0 - confidence_pct / 100.0;
    inverse_normal(1.0 - alpha / 2.0)
}

/// Two-tailed p-value for an observed z statistic.
pub fn two_tailed_p_value(z: f64) -> f64 {
    if !z.is_finite() {
        return if z.is_nan() { 1.0 } else { 0.0 };
    }
    (2.0 * upper_tail(z.abs())).clamp(0.0, 1.0)
}
