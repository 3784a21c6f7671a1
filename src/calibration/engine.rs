//! Per-bucket calibration engine
//!
//! For each (date, tau-bucket) cell: regress each side's price curve under
//! the shape constraints, differentiate it on a uniform strike grid with the
//! local polynomial estimator, scale by the discount bound into a pointwise
//! CDF, then validate, combine the sides, and correct for strike-window
//! truncation. Bucket-level failures degrade to the spot-price fallback;
//! they never abort the date.

use rayon::prelude::*;

use crate::core::{extract_buckets, OptionQuote, OptionType, QuotePanel, SideQuotes, TauBucket};
use crate::estimators::{
    constrained_fit, default_lags, newey_west, Bandwidth, LocalPoly, ShapeWorkspace,
};

use super::output::{BucketEstimate, CalibrationOutput, SideEstimate};
use super::params::CalibrationParams;
use super::scene::{BoundaryIndices, Scene};

/// Calibrate a whole panel. Dates are independent cells; they are mapped in
/// parallel and reassembled by date index so downstream consumers see a
/// date-ordered, gap-free series.
pub fn calibrate_panel(panel: &QuotePanel, params: &CalibrationParams) -> CalibrationOutput {
    let buckets: Vec<Vec<BucketEstimate>> = (0..panel.n_dates())
        .into_par_iter()
        .map(|t| calibrate_day(panel.day(t), panel.spots[t], panel.rates[t], params))
        .collect();

    CalibrationOutput {
        dates: panel.dates.clone(),
        spots: panel.spots.clone(),
        buckets,
    }
}

/// Calibrate every tau bucket of one trading date.
pub fn calibrate_day(
    day: &[OptionQuote],
    spot: f64,
    rate: f64,
    params: &CalibrationParams,
) -> Vec<BucketEstimate> {
    let mut ws = ShapeWorkspace::new();
    extract_buckets(day)
        .iter()
        .map(|bucket| calibrate_bucket(bucket, spot, rate, params, &mut ws))
        .collect()
}

/// One side's grid evaluation, before combination
struct SideEval {
    cdf: Vec<f64>,
    se_points: Vec<f64>,
    grid_lo: f64,
    grid_step: f64,
    implied: f64,
    se: f64,
    /// Effective count: zero when the side is unusable
    n_eff: usize,
    usable: bool,
    converged: bool,
    bandwidths: Option<Vec<f64>>,
    cdf_min: f64,
    cdf_max: f64,
}

impl SideEval {
    fn fallback(spot: f64) -> Self {
        Self {
            cdf: Vec::new(),
            se_points: Vec::new(),
            grid_lo: 0.0,
            grid_step: 0.0,
            implied: spot,
            se: 0.0,
            n_eff: 0,
            usable: false,
            converged: false,
            bandwidths: None,
            cdf_min: 0.0,
            cdf_max: 0.0,
        }
    }

    fn range(&self) -> f64 {
        self.cdf_max - self.cdf_min
    }
}

/// Calibrate a single tau bucket.
pub fn calibrate_bucket(
    bucket: &TauBucket,
    spot: f64,
    rate: f64,
    params: &CalibrationParams,
    ws: &mut ShapeWorkspace,
) -> BucketEstimate {
    let tau = bucket.tau_years;
    let upbd = (-rate * tau).exp();

    let put = evaluate_side(&bucket.put, OptionType::Put, upbd, spot, params, ws);
    let call = evaluate_side(&bucket.call, OptionType::Call, upbd, spot, params, ws);

    // Combine: observation-count-weighted average of the side-implied
    // prices; both sides out means the spot fallback with zero variance.
    let n = (put.n_eff + call.n_eff) as f64;
    let (combined_implied, combined_se) = if n > 0.0 {
        let wp = put.n_eff as f64 / n;
        let wc = call.n_eff as f64 / n;
        let mu = wp * put.implied + wc * call.implied;
        let se = ((wp * put.se).powi(2) + (wc * call.se).powi(2)).sqrt();
        (mu, se)
    } else {
        (spot, 0.0)
    };

    let pk = &bucket.put.strikes;
    let ck = &bucket.call.strikes;
    let pp = &bucket.put.prices;
    let cp = &bucket.call.prices;
    let p_first = pp[0];
    let c_first = cp[0];
    let c_last = cp[cp.len() - 1];
    let pk_lo = pk[0];
    let pk_hi = pk[pk.len() - 1];
    let ck_lo = ck[0];
    let ck_hi = ck[ck.len() - 1];

    // Per-side truncation bias, guarded by the CDF range alone
    let (b1p, b2p) = if put.range() > params.minrange {
        (
            upbd * put.cdf_min * (pk_hi - pk_lo) / put.range(),
            (1.0 / put.range() - 1.0) * (pp[pp.len() - 1] - p_first),
        )
    } else {
        (0.0, 0.0)
    };
    let (b1c, b2c) = if call.range() > params.minrange {
        (
            upbd * call.cdf_min * (ck_hi - ck_lo) / call.range(),
            (1.0 / call.range() - 1.0) * (upbd * (ck_hi - ck_lo) + c_last - c_first),
        )
    } else {
        (0.0, 0.0)
    };

    let bi = BoundaryIndices::locate(pk, ck);
    let scene = Scene::classify(pk, ck);

    // Truncation bound terms from first/last observed prices
    let a_lb = if put.n_eff > 0 { -p_first } else { 0.0 };
    let mut a_ub = if call.n_eff > 0 { c_last } else { 0.0 };
    let ap_lb = if put.n_eff > 0 { -p_first } else { 0.0 };
    let ap_ub = if call.n_eff > 0 { cp[bi.up_c] } else { 0.0 };
    let ac_lb = if put.n_eff > 0 { -pp[bi.lc_p] } else { 0.0 };
    let ac_ub = if call.n_eff > 0 { c_last } else { 0.0 };

    let (b1, b21, b22, b23, b3) = if n > 0.0 {
        let wp = put.n_eff as f64 / n;
        let wc = call.n_eff as f64 / n;
        let b1 = wp * b1p + wc * b1c;
        let b21 = wp * b2p + wc * b2c;
        let b3 = wp * upbd * (ck_hi - pk_hi);
        let (b22, b23) = scene.truncation_bias(pk, pp, ck, cp, upbd, wp, wc);
        let shift = scene.upper_bound_shift(upbd);
        if shift > 0.0 {
            a_ub = c_last + shift;
        }
        (b1, b21, b22, b23, b3)
    } else {
        (0.0, 0.0, 0.0, 0.0, 0.0)
    };

    // Bounds tied to the call-side CDF range
    let (bcbub_lb, bcbub_ub) = if call.range() > 0.0 {
        let factor = -(1.0 / call.range() - 1.0);
        (factor * c_first, factor * c_last)
    } else {
        (0.0, 0.0)
    };

    let put_est = side_estimate(&bucket.put, put, b1p - b2p);
    let call_est = side_estimate(&bucket.call, call, b1c - b2c);

    BucketEstimate {
        tau_days: bucket.tau_days,
        tau_years: tau,
        spot,
        discount: upbd,
        scene,
        bubble_put: spot - put_est.implied,
        bubble_call: spot - call_est.implied,
        bubble_combined: spot - combined_implied,
        combined_implied,
        combined_se,
        combined_bias: b1 - b21 + b22 + b23 - b3,
        put: put_est,
        call: call_est,
        b1,
        b21,
        b22,
        b23,
        b3,
        a_lb,
        a_ub,
        ap_lb,
        ap_ub,
        ac_lb,
        ac_ub,
        bcbub_lb,
        bcbub_ub,
    }
}

fn side_estimate(quotes: &SideQuotes, eval: SideEval, bias: f64) -> SideEstimate {
    let n = quotes.len();
    SideEstimate {
        implied: eval.implied,
        se: eval.se,
        bias,
        cdf_min: eval.cdf_min,
        cdf_max: eval.cdf_max,
        strike_lo: quotes.strikes[0],
        strike_hi: quotes.strikes[n - 1],
        price_first: quotes.prices[0],
        price_last: quotes.prices[n - 1],
        n_obs: eval.n_eff,
        volume: quotes.volumes.iter().sum(),
        usable: eval.usable,
        converged: eval.converged,
        bandwidths: eval.bandwidths,
        cdf: eval.cdf,
        cdf_se: eval.se_points,
        grid_lo: eval.grid_lo,
        grid_step: eval.grid_step,
    }
}

/// Regress, grid-evaluate, post-process, and validate one side.
fn evaluate_side(
    quotes: &SideQuotes,
    side: OptionType,
    upbd: f64,
    spot: f64,
    params: &CalibrationParams,
    ws: &mut ShapeWorkspace,
) -> SideEval {
    if let Err(e) = quotes.validate() {
        tracing::debug!("{} side unusable: {}", side.label(), e);
        return SideEval::fallback(spot);
    }

    let strikes = &quotes.strikes;
    let prices = &quotes.prices;
    let n_obs = strikes.len();

    let fit = match constrained_fit(
        side,
        strikes,
        prices,
        upbd,
        params.nint,
        params.precis,
        ws,
    ) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("constrained fit failed on {} side: {}", side.label(), e);
            return SideEval::fallback(spot);
        }
    };
    if !fit.converged {
        tracing::debug!(
            "{} side fit hit the {}-pass cap without meeting tolerance",
            side.label(),
            params.nint
        );
    }

    // Uniform evaluation grid across the observed strike window
    let lo = strikes[0];
    let hi = strikes[n_obs - 1];
    let span = hi - lo;
    let nx = params.nstep + 1;
    let step = if params.nstep > 0 {
        span / params.nstep as f64
    } else {
        0.0
    };

    let seed = quotes.mean_spacing() * params.hnumsd;
    let estimator = LocalPoly {
        order: params.order,
        with_se: params.with_se,
        bandwidth: params.bandwidth,
        seed,
    };

    let mut cdf = vec![0.0; nx];
    let mut se_points = vec![0.0; nx];
    let mut bandwidths = if params.keep_bandwidths {
        Some(Vec::with_capacity(nx))
    } else {
        None
    };

    for i in 0..nx {
        let x = if params.nstep > 0 {
            lo + span * i as f64 / params.nstep as f64
        } else {
            lo
        };

        let (deriv, deriv_se) = match estimator.fit_at(x, strikes, &fit.curve) {
            Ok(first) => {
                if let Some(hs) = bandwidths.as_mut() {
                    hs.push(first.bandwidth);
                }
                if params.bandwidth.needs_second_pass() {
                    // Re-run directly with the re-estimated bandwidth
                    let second = LocalPoly {
                        bandwidth: Bandwidth::Direct,
                        seed: first.bandwidth,
                        ..estimator.clone()
                    };
                    match second.fit_at(x, strikes, &fit.curve) {
                        Ok(r) => extract_first_derivative(&r),
                        Err(_) => extract_first_derivative(&first),
                    }
                } else {
                    extract_first_derivative(&first)
                }
            }
            Err(e) => {
                tracing::debug!("local fit degenerate at {}: {}", x, e);
                (0.0, 0.0)
            }
        };

        let raw = match side {
            OptionType::Put => deriv / upbd,
            OptionType::Call => 1.0 + deriv / upbd,
        };
        cdf[i] = raw.clamp(0.0, 1.0);
        se_points[i] = deriv_se / upbd;
    }

    saturate_cdf(&mut cdf, &mut se_points);

    let cdf_min = cdf.iter().cloned().fold(f64::INFINITY, f64::min);
    let cdf_max = cdf.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = cdf_max - cdf_min;
    let max_jump = cdf
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::NEG_INFINITY, f64::max);

    if range > params.minrange && max_jump < params.maxcdfjump {
        let norm_sum: f64 = cdf.iter().map(|&v| 1.0 - (v - cdf_min) / range).sum();
        let implied = (norm_sum * step + lo) * upbd;

        // Boundary weights absorb the truncation of the observed window
        let cdf_sum: f64 = cdf.iter().sum();
        let edge = match side {
            OptionType::Put => upbd * step * cdf_sum - (prices[n_obs - 1] - prices[0]),
            OptionType::Call => {
                upbd * step * cdf_sum - (prices[n_obs - 1] - prices[0] + upbd * span)
            }
        };
        let base_w = upbd * step / range;
        let mut w = vec![base_w; nx];
        w[0] = edge / (range * range) + base_w;
        w[nx - 1] = -edge / (range * range) + base_w;

        let weighted: Vec<f64> = cdf.iter().zip(w.iter()).map(|(c, wi)| c * wi).collect();
        let se_weighted_sq: f64 = se_points
            .iter()
            .zip(w.iter())
            .map(|(s, wi)| (s * wi) * (s * wi))
            .sum();

        let lags = default_lags(nx);
        let variance = se_weighted_sq + 2.0 * newey_west(&weighted, lags);
        let se = variance.max(0.0).sqrt();

        SideEval {
            cdf,
            se_points,
            grid_lo: lo,
            grid_step: step,
            implied,
            se,
            n_eff: n_obs,
            usable: true,
            converged: fit.converged,
            bandwidths,
            cdf_min,
            cdf_max,
        }
    } else {
        tracing::debug!(
            "{} side invalid shape: range {:.4}, max jump {:.4}",
            side.label(),
            range,
            max_jump
        );
        SideEval {
            cdf,
            se_points,
            grid_lo: lo,
            grid_step: step,
            implied: spot,
            se: 0.0,
            n_eff: 0,
            usable: false,
            converged: fit.converged,
            bandwidths,
            cdf_min,
            cdf_max,
        }
    }
}

/// Saturation propagation: once the CDF reaches 1 it stays there moving
/// outward, and values before a 0 collapse to 0 moving inward. Saturated
/// points and pointwise SEs above 1 carry no information.
fn saturate_cdf(cdf: &mut [f64], se_points: &mut [f64]) {
    let nx = cdf.len();
    for i in 1..nx {
        if cdf[i - 1] == 1.0 {
            cdf[i] = 1.0;
        }
    }
    for i in (1..nx).rev() {
        if cdf[i] == 0.0 {
            cdf[i - 1] = 0.0;
        }
    }
    for i in 0..nx {
        if cdf[i] == 0.0 || cdf[i] == 1.0 || se_points[i] > 1.0 {
            se_points[i] = 0.0;
        }
    }
}

fn extract_first_derivative(fit: &crate::estimators::LocalFitResult) -> (f64, f64) {
    let d = fit.coefficients.get(1).copied().unwrap_or(0.0);
    let s = fit
        .std_errors
        .as_ref()
        .and_then(|se| se.get(1).copied())
        .unwrap_or(0.0);
    (d, s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_bucket(put_prices: Vec<f64>, call_prices: Vec<f64>) -> TauBucket {
        let strikes = vec![80.0, 90.0, 100.0, 110.0, 120.0];
        TauBucket {
            tau_days: 91.25,
            tau_years: 0.25,
            put: SideQuotes {
                strikes: strikes.clone(),
                prices: put_prices,
                volumes: vec![10.0; 5],
            },
            call: SideQuotes {
                strikes,
                prices: call_prices,
                volumes: vec![20.0; 5],
            },
        }
    }

    fn params_nstep50() -> CalibrationParams {
        CalibrationParams {
            nstep: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_clean_bucket() {
        // Convex sides with slopes well inside the discount bound
        let bucket = test_bucket(
            vec![0.5, 1.5, 4.0, 9.0, 16.0],
            vec![16.0, 9.0, 4.0, 1.5, 0.5],
        );
        let spot = 100.0;
        let tau = 0.25;
        let rate = -(0.99f64.ln()) / tau; // discount bound 0.99
        let mut ws = ShapeWorkspace::new();

        let est = calibrate_bucket(&bucket, spot, rate, &params_nstep50(), &mut ws);

        assert!((est.discount - 0.99).abs() < 1e-12);
        assert!(est.put.usable);
        assert!(est.call.usable);
        assert_eq!(est.scene.id(), 1);

        // Each side's CDF is non-decreasing and bounded
        for side in [&est.put, &est.call] {
            for v in &side.cdf {
                assert!((0.0..=1.0).contains(v));
            }
            for w in side.cdf.windows(2) {
                assert!(w[1] >= w[0] - 1e-9);
            }
        }

        // Combined CDF on the union grid keeps both properties
        let (strikes, combined) = est.combined_cdf();
        assert!(!strikes.is_empty());
        for v in &combined {
            assert!((-1e-12..=1.0 + 1e-12).contains(v));
        }
        for w in combined.windows(2) {
            assert!(w[1] >= w[0] - 1e-9);
        }

        // The bubble is a small correction, not a price-sized artifact
        assert!(est.bubble_combined.abs() < 0.1 * spot);
        assert!(est.bubble_put.abs() < 0.1 * spot);
        assert!(est.bubble_call.abs() < 0.1 * spot);
    }

    #[test]
    fn test_flat_sides_fall_back_to_spot() {
        // Flat prices give a flat curve: CDF range 0, both sides unusable
        let bucket = test_bucket(vec![5.0; 5], vec![5.0; 5]);
        let spot = 100.0;
        let mut ws = ShapeWorkspace::new();

        let est = calibrate_bucket(&bucket, spot, 0.04, &params_nstep50(), &mut ws);

        assert!(!est.put.usable);
        assert!(!est.call.usable);
        assert_eq!(est.put.n_obs, 0);
        assert_eq!(est.call.n_obs, 0);
        assert_eq!(est.combined_implied, spot);
        assert_eq!(est.combined_se, 0.0);
        assert_eq!(est.bubble_combined, 0.0);
        assert_eq!(est.combined_bias, 0.0);
    }

    #[test]
    fn test_short_put_side_degrades_only_that_side() {
        let strikes = vec![80.0, 90.0, 100.0, 110.0, 120.0];
        let bucket = TauBucket {
            tau_days: 91.25,
            tau_years: 0.25,
            put: SideQuotes {
                strikes: vec![90.0, 100.0],
                prices: vec![2.0, 5.0],
                volumes: vec![1.0, 1.0],
            },
            call: SideQuotes {
                strikes,
                prices: vec![16.0, 9.0, 4.0, 1.5, 0.5],
                volumes: vec![20.0; 5],
            },
        };
        let spot = 100.0;
        let rate = -(0.99f64.ln()) / 0.25;
        let mut ws = ShapeWorkspace::new();

        let est = calibrate_bucket(&bucket, spot, rate, &params_nstep50(), &mut ws);

        assert!(!est.put.usable);
        assert_eq!(est.put.n_obs, 0);
        assert_eq!(est.put.implied, spot);
        assert!(est.call.usable);
        // Combined is driven entirely by the call side
        assert!((est.combined_implied - est.call.implied).abs() < 1e-12);
    }

    #[test]
    fn test_saturation_propagation() {
        let mut cdf = vec![0.2, 0.0, 0.3, 1.0, 0.8, 0.9];
        let mut se = vec![0.1, 0.1, 0.1, 0.1, 2.0, 0.1];
        saturate_cdf(&mut cdf, &mut se);

        // The interior 0 pulls everything before it to 0, the 1 pushes
        // everything after it to 1
        assert_eq!(cdf, vec![0.0, 0.0, 0.3, 1.0, 1.0, 1.0]);
        // SEs vanish at saturated points and where they exceed 1
        assert_eq!(se, vec![0.0, 0.0, 0.1, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_panel_assembly_is_date_ordered() {
        let dates: Vec<NaiveDate> = (2..5)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
            .collect();
        let mut quotes = Vec::new();
        for &date in &dates {
            for (i, &k) in [80.0, 90.0, 100.0, 110.0, 120.0].iter().enumerate() {
                for (ot, price) in [
                    (OptionType::Put, [0.5, 1.5, 4.0, 9.0, 16.0][i]),
                    (OptionType::Call, [16.0, 9.0, 4.0, 1.5, 0.5][i]),
                ] {
                    quotes.push(OptionQuote {
                        date,
                        expiry: date + chrono::Duration::days(91),
                        option_type: ot,
                        strike: k,
                        mid: price,
                        volume: 5.0,
                        implied_vol: 0.2,
                        moneyness: 0.0,
                        tau_days: 91.25,
                    });
                }
            }
        }
        let panel = QuotePanel::from_blocks(
            dates.clone(),
            vec![100.0, 101.0, 102.0],
            vec![0.04; 3],
            quotes,
            &[10, 10, 10],
        )
        .unwrap();

        let out = calibrate_panel(&panel, &params_nstep50());
        assert_eq!(out.dates, dates);
        assert_eq!(out.n_dates(), 3);
        assert!(out.buckets.iter().all(|b| b.len() == 1));
        // Spot differs per date, so bubbles must line up with their date
        for (t, day) in out.buckets.iter().enumerate() {
            assert_eq!(day[0].spot, panel.spots[t]);
        }
    }
}
