//! Bubble aggregation
//!
//! Groups per-bucket bubble estimates into canonical maturity bands,
//! applies the truncation bias terms, and forms trailing rolling-window
//! means with confidence bounds that combine cross-sectional and
//! serial-correlation variance.

pub mod band;

pub use band::*;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::calibration::{BucketEstimate, CalibrationOutput};
use crate::estimators::{default_lags, newey_west};

/// One aggregated value with its confidence bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandEstimate {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl BandEstimate {
    fn nan() -> Self {
        Self {
            mean: f64::NAN,
            lower: f64::NAN,
            upper: f64::NAN,
        }
    }
}

/// Per-date band-level intermediates, before rolling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandDay {
    pub date: NaiveDate,
    /// Bias-corrected mean, indexed [band][side]; NaN where the band is empty
    pub bc_mean: [[f64; 3]; 3],
    /// Root-sum-square standard error divided by member count
    pub se: [[f64; 3]; 3],
    /// Truncation-adjusted per-date lower bound on the bias-corrected mean
    pub bound_lower: [[f64; 3]; 3],
    /// Truncation-adjusted per-date upper bound
    pub bound_upper: [[f64; 3]; 3],
}

/// Append-only time series of rolling bubble estimates,
/// keyed by (date, band, side)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BubbleSeries {
    pub dates: Vec<NaiveDate>,
    /// One grid per date, indexed [band][side]
    pub values: Vec<[[BandEstimate; 3]; 3]>,
}

impl BubbleSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn get(&self, t: usize, band: MaturityBand, side: Side) -> &BandEstimate {
        &self.values[t][band.index()][side.index()]
    }

    fn push(&mut self, date: NaiveDate, grid: [[BandEstimate; 3]; 3]) {
        self.dates.push(date);
        self.values.push(grid);
    }
}

/// Aggregate calibration output into the rolling bubble series.
pub fn aggregate(output: &CalibrationOutput, cfg: &AggregatorConfig) -> BubbleSeries {
    let days = band_estimates(output, cfg);
    rolling_series(&days, cfg)
}

/// Per-side raw bubble, bias, SE and bound terms of one bucket
fn side_terms(b: &BucketEstimate, side: Side) -> (f64, f64, f64, f64, f64) {
    match side {
        Side::Put => (b.bubble_put, b.put.bias, b.put.se, b.ap_lb, b.ap_ub),
        Side::Call => (b.bubble_call, b.call.bias, b.call.se, b.ac_lb, b.ac_ub),
        Side::Combined => (
            b.bubble_combined,
            b.combined_bias,
            b.combined_se,
            b.a_lb,
            b.a_ub,
        ),
    }
}

fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        f64::NAN
    }
}

/// Form the per-date band estimates: bias-corrected means, combined
/// standard errors, and truncation-adjusted bounds.
pub fn band_estimates(output: &CalibrationOutput, cfg: &AggregatorConfig) -> Vec<BandDay> {
    let mut days: Vec<BandDay> = Vec::with_capacity(output.n_dates());

    for (t, date) in output.dates.iter().enumerate() {
        let mut day = BandDay {
            date: *date,
            bc_mean: [[f64::NAN; 3]; 3],
            se: [[f64::NAN; 3]; 3],
            bound_lower: [[f64::NAN; 3]; 3],
            bound_upper: [[f64::NAN; 3]; 3],
        };

        for band in MaturityBand::ALL {
            let range = &cfg.bands[band.index()];
            let members: Vec<&BucketEstimate> = output.buckets[t]
                .iter()
                .filter(|b| range.contains(b.tau_years))
                .collect();
            if members.is_empty() {
                continue;
            }
            let ngp = members.len() as f64;

            for side in Side::ALL {
                let bc = nan_mean(members.iter().map(|b| {
                    let (raw, bias, _, _, _) = side_terms(b, side);
                    raw + bias
                }));
                let se_sq: f64 = members
                    .iter()
                    .map(|b| side_terms(b, side).2)
                    .filter(|s| s.is_finite())
                    .map(|s| s * s)
                    .sum();
                let se = se_sq.sqrt() / ngp;

                // Under bubble = spot - implied the truncation extremes
                // swap roles: A_lb lifts the upper bound, A_ub the lower.
                let a_lb = nan_mean(members.iter().map(|b| side_terms(b, side).3));
                let a_ub = nan_mean(members.iter().map(|b| side_terms(b, side).4));

                let bi = band.index();
                let si = side.index();
                day.bc_mean[bi][si] = bc;
                day.se[bi][si] = se;
                day.bound_upper[bi][si] = bc - a_lb;
                day.bound_lower[bi][si] = bc - a_ub;
            }
        }
        days.push(day);
    }

    // A nonsensically large standard error carries the previous date's
    // value forward instead of contaminating the rolling window.
    for t in 1..days.len() {
        for bi in 0..3 {
            for si in 0..3 {
                if days[t].se[bi][si] > cfg.se_cap {
                    days[t].se[bi][si] = days[t - 1].se[bi][si];
                }
            }
        }
    }

    days
}

/// Trailing rolling-window means with combined cross-sectional and
/// serial-correlation confidence bounds.
pub fn rolling_series(days: &[BandDay], cfg: &AggregatorConfig) -> BubbleSeries {
    let mut series = BubbleSeries::default();
    if days.is_empty() {
        return series;
    }

    let z = Normal::new(0.0, 1.0)
        .expect("unit normal")
        .inverse_cdf(0.5 + cfg.confidence / 2.0);
    let lags = default_lags(cfg.window.max(1));

    for t in 0..days.len() {
        let start = (t + 1).saturating_sub(cfg.window.max(1));
        let window = &days[start..=t];
        let wlen = window.len() as f64;

        let mut grid = [[BandEstimate::nan(); 3]; 3];
        for bi in 0..3 {
            for si in 0..3 {
                let means: Vec<f64> = window
                    .iter()
                    .map(|d| d.bc_mean[bi][si])
                    .filter(|v| v.is_finite())
                    .collect();
                if means.is_empty() {
                    continue;
                }
                let mean = means.iter().sum::<f64>() / means.len() as f64;

                let se_sq: f64 = window
                    .iter()
                    .map(|d| d.se[bi][si])
                    .filter(|s| s.is_finite())
                    .map(|s| s * s)
                    .sum();
                let variance = se_sq + 2.0 * newey_west(&means, lags);
                let se = variance.max(0.0).sqrt() / wlen;

                grid[bi][si] = BandEstimate {
                    mean,
                    lower: mean - z * se,
                    upper: mean + z * se,
                };
            }
        }
        series.push(days[t].date, grid);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{Scene, SideEstimate};

    fn synthetic_side(implied: f64, se: f64) -> SideEstimate {
        SideEstimate {
            implied,
            se,
            bias: 0.0,
            cdf_min: 0.1,
            cdf_max: 0.9,
            strike_lo: 80.0,
            strike_hi: 120.0,
            price_first: 1.0,
            price_last: 16.0,
            n_obs: 5,
            volume: 50.0,
            usable: true,
            converged: true,
            bandwidths: None,
            cdf: Vec::new(),
            cdf_se: Vec::new(),
            grid_lo: 80.0,
            grid_step: 0.8,
        }
    }

    fn synthetic_bucket(spot: f64, bubble: f64, tau_years: f64) -> BucketEstimate {
        let implied = spot - bubble;
        BucketEstimate {
            tau_days: tau_years * 365.0,
            tau_years,
            spot,
            discount: 0.99,
            scene: Scene::Disjoint,
            put: synthetic_side(implied, 0.0),
            call: synthetic_side(implied, 0.0),
            combined_implied: implied,
            combined_se: 0.0,
            combined_bias: 0.0,
            bubble_put: bubble,
            bubble_call: bubble,
            bubble_combined: bubble,
            b1: 0.0,
            b21: 0.0,
            b22: 0.0,
            b23: 0.0,
            b3: 0.0,
            a_lb: 0.0,
            a_ub: 0.0,
            ap_lb: 0.0,
            ap_ub: 0.0,
            ac_lb: 0.0,
            ac_ub: 0.0,
            bcbub_lb: 0.0,
            bcbub_ub: 0.0,
        }
    }

    fn synthetic_output(n_dates: usize, bubble: f64) -> CalibrationOutput {
        let dates: Vec<NaiveDate> = (0..n_dates)
            .map(|i| {
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64)
            })
            .collect();
        let buckets = dates
            .iter()
            .map(|_| vec![synthetic_bucket(100.0, bubble, 0.25)])
            .collect();
        CalibrationOutput {
            spots: vec![100.0; n_dates],
            dates,
            buckets,
        }
    }

    #[test]
    fn test_round_trip_zero_bias_zero_se() {
        // Zero bias and zero SE over a constant window: the rolling mean
        // reproduces the raw mean exactly, with bounds collapsed onto it
        let out = synthetic_output(10, 2.5);
        let cfg = AggregatorConfig {
            window: 5,
            ..Default::default()
        };
        let series = aggregate(&out, &cfg);

        assert_eq!(series.len(), 10);
        for t in 0..series.len() {
            let e = series.get(t, MaturityBand::Short, Side::Combined);
            assert!((e.mean - 2.5).abs() < 1e-12);
            assert!((e.lower - 2.5).abs() < 1e-12);
            assert!((e.upper - 2.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_band_assignment() {
        let mut out = synthetic_output(1, 1.0);
        out.buckets[0] = vec![
            synthetic_bucket(100.0, 1.0, 0.25), // short
            synthetic_bucket(100.0, 3.0, 0.5),  // medium
            synthetic_bucket(100.0, 5.0, 1.0),  // long
            synthetic_bucket(100.0, 9.0, 2.0),  // outside all bands
        ];
        let days = band_estimates(&out, &AggregatorConfig::default());

        assert!((days[0].bc_mean[0][2] - 1.0).abs() < 1e-12);
        assert!((days[0].bc_mean[1][2] - 3.0).abs() < 1e-12);
        assert!((days[0].bc_mean[2][2] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_bias_application() {
        let mut out = synthetic_output(1, 1.0);
        out.buckets[0][0].combined_bias = 0.5;
        let days = band_estimates(&out, &AggregatorConfig::default());
        assert!((days[0].bc_mean[0][2] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_bound_inversion() {
        // A_lb lifts the upper bound, A_ub lowers the lower bound
        let mut out = synthetic_output(1, 1.0);
        out.buckets[0][0].a_lb = -2.0;
        out.buckets[0][0].a_ub = 3.0;
        let days = band_estimates(&out, &AggregatorConfig::default());
        assert!((days[0].bound_upper[0][2] - 3.0).abs() < 1e-12);
        assert!((days[0].bound_lower[0][2] - (-2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_se_cap_carry_forward() {
        let mut out = synthetic_output(3, 1.0);
        out.buckets[1][0].combined_se = 5000.0;
        let days = band_estimates(&out, &AggregatorConfig::default());
        // Date 1's exploded SE is replaced by date 0's value
        assert_eq!(days[1].se[0][2], days[0].se[0][2]);
    }

    #[test]
    fn test_empty_band_stays_nan() {
        let out = synthetic_output(3, 1.0); // only short-band buckets
        let series = aggregate(&out, &AggregatorConfig::default());
        assert!(series.get(0, MaturityBand::Long, Side::Put).mean.is_nan());
        assert!(series
            .get(0, MaturityBand::Short, Side::Put)
            .mean
            .is_finite());
    }
}
