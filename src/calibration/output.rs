//! Calibration outputs
//!
//! Per-bucket estimates plus a fixed-shape struct-of-arrays view for
//! persistence collaborators. Estimates are created once per calibration
//! pass and never mutated; the array view is a copy, not an alias.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::scene::Scene;

/// Per-side calibration result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEstimate {
    /// CDF-implied price (falls back to spot when unusable)
    pub implied: f64,
    /// Standard error of the implied price
    pub se: f64,
    /// Truncation bias for this side (B1 - B2)
    pub bias: f64,
    /// Smallest pointwise CDF value on the grid
    pub cdf_min: f64,
    /// Largest pointwise CDF value on the grid
    pub cdf_max: f64,
    /// Lowest observed strike
    pub strike_lo: f64,
    /// Highest observed strike
    pub strike_hi: f64,
    /// Observed price at the lowest strike
    pub price_first: f64,
    /// Observed price at the highest strike
    pub price_last: f64,
    /// Effective observation count (zero when the side is unusable)
    pub n_obs: usize,
    /// Summed volume over the side's quotes
    pub volume: f64,
    /// Whether the side passed range/jump validation
    pub usable: bool,
    /// Whether the shape-constrained fit met tolerance
    pub converged: bool,
    /// First-pass bandwidth per grid point, when diagnostics are kept
    pub bandwidths: Option<Vec<f64>>,
    /// Pointwise CDF values on this side's uniform strike grid
    /// (empty when the side failed its preconditions)
    pub cdf: Vec<f64>,
    /// Pointwise standard errors matching `cdf`
    pub cdf_se: Vec<f64>,
    /// First grid strike
    pub grid_lo: f64,
    /// Grid spacing
    pub grid_step: f64,
}

/// One bucket's full calibration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEstimate {
    /// Days to expiry
    pub tau_days: f64,
    /// Years to expiry
    pub tau_years: f64,
    /// Spot price on the trading date
    pub spot: f64,
    /// Discount bound e^{-r tau}
    pub discount: f64,
    /// Strike-window overlap scene
    pub scene: Scene,

    /// Put-side estimate
    pub put: SideEstimate,
    /// Call-side estimate
    pub call: SideEstimate,

    /// Count-weighted combined implied price
    pub combined_implied: f64,
    /// Combined standard error
    pub combined_se: f64,
    /// Combined bias: B1 - B21 + B22 + B23 - B3
    pub combined_bias: f64,

    /// Bubble values: spot minus implied price
    pub bubble_put: f64,
    pub bubble_call: f64,
    pub bubble_combined: f64,

    /// Decomposed bias terms
    pub b1: f64,
    pub b21: f64,
    pub b22: f64,
    pub b23: f64,
    pub b3: f64,

    /// Truncation bound terms, combined and per side
    pub a_lb: f64,
    pub a_ub: f64,
    pub ap_lb: f64,
    pub ap_ub: f64,
    pub ac_lb: f64,
    pub ac_ub: f64,

    /// Call-range bound factors applied to the extreme call prices
    pub bcbub_lb: f64,
    pub bcbub_ub: f64,
}

impl BucketEstimate {
    /// Count-weighted combined CDF on the union of the two side grids.
    ///
    /// Each side's grid values are linearly interpolated and clamped at
    /// their window edges; sides with zero effective count drop out.
    /// Returns (strikes, cdf values), empty when neither side is usable.
    pub fn combined_cdf(&self) -> (Vec<f64>, Vec<f64>) {
        let n = (self.put.n_obs + self.call.n_obs) as f64;
        if n == 0.0 {
            return (Vec::new(), Vec::new());
        }

        let mut strikes: Vec<f64> = Vec::new();
        for side in [&self.put, &self.call] {
            if side.n_obs == 0 {
                continue;
            }
            for i in 0..side.cdf.len() {
                let x = side.grid_lo + side.grid_step * i as f64;
                if !strikes.iter().any(|&s| (s - x).abs() < 1e-12) {
                    strikes.push(x);
                }
            }
        }
        strikes.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let values = strikes
            .iter()
            .map(|&x| {
                let mut acc = 0.0;
                for side in [&self.put, &self.call] {
                    if side.n_obs > 0 {
                        acc += side.n_obs as f64 / n * interp_clamped(side, x);
                    }
                }
                acc
            })
            .collect();
        (strikes, values)
    }
}

/// Linear interpolation of a side's grid CDF, clamped at the window edges
fn interp_clamped(side: &SideEstimate, x: f64) -> f64 {
    let n = side.cdf.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 || side.grid_step <= 0.0 {
        return side.cdf[0];
    }
    let pos = (x - side.grid_lo) / side.grid_step;
    if pos <= 0.0 {
        return side.cdf[0];
    }
    if pos >= (n - 1) as f64 {
        return side.cdf[n - 1];
    }
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    side.cdf[i] * (1.0 - frac) + side.cdf[i + 1] * frac
}

/// Calibration results for a whole panel, date-ordered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOutput {
    /// Trading dates, ascending
    pub dates: Vec<chrono::NaiveDate>,
    /// Spot per date
    pub spots: Vec<f64>,
    /// Buckets per date, tau-ascending
    pub buckets: Vec<Vec<BucketEstimate>>,
}

impl CalibrationOutput {
    pub fn n_dates(&self) -> usize {
        self.dates.len()
    }

    /// Largest bucket count across dates
    pub fn max_buckets(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).max().unwrap_or(0)
    }

    /// Copy into the fixed-shape array view
    pub fn to_arrays(&self) -> PanelArrays {
        PanelArrays::from_output(self)
    }
}

/// Struct-of-arrays view of the per-bucket outputs, shape
/// (n_dates, max_buckets), NaN-padded where a date has fewer buckets.
#[derive(Debug, Clone)]
pub struct PanelArrays {
    pub tau_years: Array2<f64>,
    pub scene_id: Array2<f64>,

    pub implied_put: Array2<f64>,
    pub implied_call: Array2<f64>,
    pub implied_combined: Array2<f64>,
    pub bubble_put: Array2<f64>,
    pub bubble_call: Array2<f64>,
    pub bubble_combined: Array2<f64>,
    pub se_put: Array2<f64>,
    pub se_call: Array2<f64>,
    pub se_combined: Array2<f64>,
    pub bias_put: Array2<f64>,
    pub bias_call: Array2<f64>,
    pub bias_combined: Array2<f64>,

    pub b1: Array2<f64>,
    pub b21: Array2<f64>,
    pub b22: Array2<f64>,
    pub b23: Array2<f64>,
    pub b3: Array2<f64>,

    pub a_lb: Array2<f64>,
    pub a_ub: Array2<f64>,
    pub ap_lb: Array2<f64>,
    pub ap_ub: Array2<f64>,
    pub ac_lb: Array2<f64>,
    pub ac_ub: Array2<f64>,
    pub bcbub_lb: Array2<f64>,
    pub bcbub_ub: Array2<f64>,

    pub cdf_put_lo: Array2<f64>,
    pub cdf_put_hi: Array2<f64>,
    pub cdf_call_lo: Array2<f64>,
    pub cdf_call_hi: Array2<f64>,

    pub strike_put_lo: Array2<f64>,
    pub strike_put_hi: Array2<f64>,
    pub strike_call_lo: Array2<f64>,
    pub strike_call_hi: Array2<f64>,

    /// Observed call price at the lowest and highest strike
    pub call_price_first: Array2<f64>,
    pub call_price_last: Array2<f64>,

    pub n_put: Array2<f64>,
    pub n_call: Array2<f64>,
    pub volume_put: Array2<f64>,
    pub volume_call: Array2<f64>,
}

impl PanelArrays {
    fn from_output(out: &CalibrationOutput) -> Self {
        let shape = (out.n_dates(), out.max_buckets());
        let nan = Array2::from_elem(shape, f64::NAN);
        let mut arrays = Self {
            tau_years: nan.clone(),
            scene_id: nan.clone(),
            implied_put: nan.clone(),
            implied_call: nan.clone(),
            implied_combined: nan.clone(),
            bubble_put: nan.clone(),
            bubble_call: nan.clone(),
            bubble_combined: nan.clone(),
            se_put: nan.clone(),
            se_call: nan.clone(),
            se_combined: nan.clone(),
            bias_put: nan.clone(),
            bias_call: nan.clone(),
            bias_combined: nan.clone(),
            b1: nan.clone(),
            b21: nan.clone(),
            b22: nan.clone(),
            b23: nan.clone(),
            b3: nan.clone(),
            a_lb: nan.clone(),
            a_ub: nan.clone(),
            ap_lb: nan.clone(),
            ap_ub: nan.clone(),
            ac_lb: nan.clone(),
            ac_ub: nan.clone(),
            bcbub_lb: nan.clone(),
            bcbub_ub: nan.clone(),
            cdf_put_lo: nan.clone(),
            cdf_put_hi: nan.clone(),
            cdf_call_lo: nan.clone(),
            cdf_call_hi: nan.clone(),
            strike_put_lo: nan.clone(),
            strike_put_hi: nan.clone(),
            strike_call_lo: nan.clone(),
            strike_call_hi: nan.clone(),
            call_price_first: nan.clone(),
            call_price_last: nan.clone(),
            n_put: nan.clone(),
            n_call: nan.clone(),
            volume_put: nan.clone(),
            volume_call: nan,
        };

        for (t, day) in out.buckets.iter().enumerate() {
            for (j, b) in day.iter().enumerate() {
                arrays.tau_years[[t, j]] = b.tau_years;
                arrays.scene_id[[t, j]] = b.scene.id() as f64;
                arrays.implied_put[[t, j]] = b.put.implied;
                arrays.implied_call[[t, j]] = b.call.implied;
                arrays.implied_combined[[t, j]] = b.combined_implied;
                arrays.bubble_put[[t, j]] = b.bubble_put;
                arrays.bubble_call[[t, j]] = b.bubble_call;
                arrays.bubble_combined[[t, j]] = b.bubble_combined;
                arrays.se_put[[t, j]] = b.put.se;
                arrays.se_call[[t, j]] = b.call.se;
                arrays.se_combined[[t, j]] = b.combined_se;
                arrays.bias_put[[t, j]] = b.put.bias;
                arrays.bias_call[[t, j]] = b.call.bias;
                arrays.bias_combined[[t, j]] = b.combined_bias;
                arrays.b1[[t, j]] = b.b1;
                arrays.b21[[t, j]] = b.b21;
                arrays.b22[[t, j]] = b.b22;
                arrays.b23[[t, j]] = b.b23;
                arrays.b3[[t, j]] = b.b3;
                arrays.a_lb[[t, j]] = b.a_lb;
                arrays.a_ub[[t, j]] = b.a_ub;
                arrays.ap_lb[[t, j]] = b.ap_lb;
                arrays.ap_ub[[t, j]] = b.ap_ub;
                arrays.ac_lb[[t, j]] = b.ac_lb;
                arrays.ac_ub[[t, j]] = b.ac_ub;
                arrays.bcbub_lb[[t, j]] = b.bcbub_lb;
                arrays.bcbub_ub[[t, j]] = b.bcbub_ub;
                arrays.cdf_put_lo[[t, j]] = b.put.cdf_min;
                arrays.cdf_put_hi[[t, j]] = b.put.cdf_max;
                arrays.cdf_call_lo[[t, j]] = b.call.cdf_min;
                arrays.cdf_call_hi[[t, j]] = b.call.cdf_max;
                arrays.strike_put_lo[[t, j]] = b.put.strike_lo;
                arrays.strike_put_hi[[t, j]] = b.put.strike_hi;
                arrays.strike_call_lo[[t, j]] = b.call.strike_lo;
                arrays.strike_call_hi[[t, j]] = b.call.strike_hi;
                arrays.call_price_first[[t, j]] = b.call.price_first;
                arrays.call_price_last[[t, j]] = b.call.price_last;
                arrays.n_put[[t, j]] = b.put.n_obs as f64;
                arrays.n_call[[t, j]] = b.call.n_obs as f64;
                arrays.volume_put[[t, j]] = b.put.volume;
                arrays.volume_call[[t, j]] = b.call.volume;
            }
        }
        arrays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(cdf: Vec<f64>, grid_lo: f64, grid_step: f64, n_obs: usize) -> SideEstimate {
        SideEstimate {
            implied: 100.0,
            se: 0.0,
            bias: 0.0,
            cdf_min: cdf.iter().cloned().fold(f64::INFINITY, f64::min),
            cdf_max: cdf.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            strike_lo: grid_lo,
            strike_hi: grid_lo + grid_step * (cdf.len().saturating_sub(1)) as f64,
            price_first: 1.0,
            price_last: 5.0,
            n_obs,
            volume: 10.0,
            usable: n_obs > 0,
            converged: true,
            bandwidths: None,
            cdf,
            cdf_se: Vec::new(),
            grid_lo,
            grid_step,
        }
    }

    fn bucket(put: SideEstimate, call: SideEstimate) -> BucketEstimate {
        BucketEstimate {
            tau_days: 91.25,
            tau_years: 0.25,
            spot: 100.0,
            discount: 0.99,
            scene: Scene::Disjoint,
            put,
            call,
            combined_implied: 100.0,
            combined_se: 0.0,
            combined_bias: 0.0,
            bubble_put: 0.0,
            bubble_call: 0.0,
            bubble_combined: 0.0,
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

    #[test]
    fn test_combined_cdf_weighting() {
        // Two sides on the same grid with 1:1 counts: the combination is
        // the plain average
        let put = side(vec![0.0, 0.2, 0.4], 80.0, 10.0, 3);
        let call = side(vec![0.2, 0.4, 0.6], 80.0, 10.0, 3);
        let b = bucket(put, call);

        let (strikes, cdf) = b.combined_cdf();
        assert_eq!(strikes, vec![80.0, 90.0, 100.0]);
        assert!((cdf[0] - 0.1).abs() < 1e-12);
        assert!((cdf[1] - 0.3).abs() < 1e-12);
        assert!((cdf[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_combined_cdf_skips_unusable_side() {
        let put = side(Vec::new(), 0.0, 0.0, 0);
        let call = side(vec![0.1, 0.5, 0.9], 90.0, 5.0, 3);
        let b = bucket(put, call);

        let (strikes, cdf) = b.combined_cdf();
        assert_eq!(strikes.len(), 3);
        assert!((cdf[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_panel_arrays_shapes_and_padding() {
        let out = CalibrationOutput {
            dates: vec![
                chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                chrono::NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            ],
            spots: vec![100.0, 101.0],
            buckets: vec![
                vec![
                    bucket(
                        side(vec![0.1, 0.5], 80.0, 40.0, 3),
                        side(vec![0.2, 0.6], 80.0, 40.0, 3),
                    ),
                    bucket(
                        side(vec![0.1, 0.5], 80.0, 40.0, 3),
                        side(vec![0.2, 0.6], 80.0, 40.0, 3),
                    ),
                ],
                vec![bucket(
                    side(vec![0.1, 0.5], 80.0, 40.0, 3),
                    side(vec![0.2, 0.6], 80.0, 40.0, 3),
                )],
            ],
        };

        let arrays = out.to_arrays();
        assert_eq!(arrays.scene_id.dim(), (2, 2));
        assert_eq!(arrays.scene_id[[0, 0]], 6.0);
        // Second date has one bucket; the second slot is NaN padding
        assert!(arrays.scene_id[[1, 1]].is_nan());
        assert_eq!(arrays.n_put[[0, 0]], 3.0);
        assert_eq!(arrays.implied_combined[[1, 0]], 100.0);
    }
}
