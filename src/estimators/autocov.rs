//! Serial-correlation-robust variance
//!
//! Newey-West style estimator: Bartlett-weighted sum of mean-centered sample
//! autocovariances. Finite samples can push a combined variance below zero,
//! so callers clamp at zero before taking a square root.

/// Newey-West covariance estimate of `q` using `m` lags.
///
/// Computes `sum_{j=1..m} (1 - j/(m+1)) * gamma_j` with
/// `gamma_j = sum_i (q_i - mu)(q_{i+j} - mu) / n`. Returns 0 for `m == 0`
/// or when the series is shorter than two observations.
pub fn newey_west(q: &[f64], m: usize) -> f64 {
    let n = q.len();
    if n < 2 || m == 0 {
        return 0.0;
    }

    let mu = q.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    for j in 1..=m.min(n - 1) {
        let mut gam = 0.0;
        for i in 0..n - j {
            gam += (q[i] - mu) * (q[i + j] - mu);
        }
        gam /= n as f64;
        cov += (1.0 - j as f64 / (m as f64 + 1.0)) * gam;
    }
    cov
}

/// Lag count used throughout the pipeline: ceil(n^(1/4)).
pub fn default_lags(n: usize) -> usize {
    (n as f64).powf(0.25).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    #[test]
    fn test_zero_lags() {
        let q = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(newey_west(&q, 0), 0.0);
    }

    #[test]
    fn test_short_series() {
        assert_eq!(newey_west(&[1.0], 3), 0.0);
        assert_eq!(newey_west(&[], 3), 0.0);
    }

    #[test]
    fn test_constant_series() {
        let q = vec![2.5; 50];
        assert!(newey_west(&q, 4).abs() < 1e-15);
    }

    #[test]
    fn test_iid_noise_shrinks() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let small: Vec<f64> = (0..50)
            .map(|_| Distribution::<f64>::sample(&StandardNormal, &mut rng))
            .collect();
        let large: Vec<f64> = (0..5000)
            .map(|_| Distribution::<f64>::sample(&StandardNormal, &mut rng))
            .collect();

        let cov_small = newey_west(&small, default_lags(small.len())).abs();
        let cov_large = newey_west(&large, default_lags(large.len())).abs();

        // Autocovariances of i.i.d. noise vanish with sample size
        assert!(cov_large < cov_small);
        assert!(cov_large < 0.05);
    }

    #[test]
    fn test_default_lags() {
        assert_eq!(default_lags(63), 3);
        assert_eq!(default_lags(201), 4);
    }
}
