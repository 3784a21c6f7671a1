//! Kernel-weighted local polynomial regression
//!
//! Fits a polynomial of order p in (x - x0) by weighted least squares with
//! Gaussian kernel weights, returning the fitted value and derivatives up to
//! order p (scaled by factorials). For p = 1 an auxiliary derivative-of-
//! kernel computation recovers the second derivative as well.
//!
//! Bandwidth can be supplied directly or selected by a plug-in rule, two
//! re-estimation variants of it, or residual-score cross-validation.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::linalg::{invert, solve};
use crate::core::{BubbleError, BubbleResult};

const RIDGE: f64 = 1e-8;
const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// Gaussian kernel
fn phi(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// Derivative of the Gaussian kernel
fn d1phi(x: f64) -> f64 {
    -x * phi(x)
}

fn factorial(d: usize) -> f64 {
    (1..=d).product::<usize>() as f64
}

/// Bandwidth-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// Use the seed bandwidth unchanged
    Direct,
    /// Analytic plug-in rule from a global polynomial pilot fit
    PlugIn,
    /// Plug-in machinery, bandwidth re-estimated from the plain mean
    /// squared residual and local kernel density after the fit
    ReEstimateLocal,
    /// As above with the kernel-weighted mean squared residual
    ReEstimateWeighted,
    /// Cross-validation: minimize the integrated local residual score
    /// over log-bandwidth, then apply the kernel-polynomial adjustment
    CrossValidate,
}

impl Bandwidth {
    /// Re-estimation modes return a bandwidth meant for a second, direct
    /// pass rather than for the coefficients of the first.
    pub fn needs_second_pass(&self) -> bool {
        matches!(self, Bandwidth::ReEstimateLocal | Bandwidth::ReEstimateWeighted)
    }
}

/// Local polynomial estimator configuration
#[derive(Debug, Clone)]
pub struct LocalPoly {
    /// Polynomial order, 1..=3
    pub order: usize,
    /// Compute sandwich standard errors
    pub with_se: bool,
    /// Bandwidth-selection policy
    pub bandwidth: Bandwidth,
    /// Seed bandwidth
    pub seed: f64,
}

/// One local fit: coefficients scaled to value/derivatives, optional
/// standard errors, and the bandwidth the fit (or re-estimation) produced.
#[derive(Debug, Clone)]
pub struct LocalFitResult {
    /// [value, d1, .., dp]; for p = 1 a third slot carries the
    /// kernel-derivative second-derivative estimate
    pub coefficients: Vec<f64>,
    /// Standard errors matching `coefficients`, when requested
    pub std_errors: Option<Vec<f64>>,
    /// Bandwidth actually used (re-estimation modes: the re-estimate)
    pub bandwidth: f64,
}

impl LocalPoly {
    /// Fit at evaluation point `x0` over the sample `(xs, ys)`.
    pub fn fit_at(&self, x0: f64, xs: &[f64], ys: &[f64]) -> BubbleResult<LocalFitResult> {
        let p = self.order;
        if !(1..=3).contains(&p) {
            return Err(BubbleError::invalid_input(format!(
                "polynomial order {} outside 1..=3",
                p
            )));
        }
        let nk = xs.len();
        if nk == 0 || ys.len() != nk {
            return Err(BubbleError::invalid_input(
                "empty sample or mismatched lengths in local fit",
            ));
        }
        if !(self.seed > 0.0) {
            return Err(BubbleError::invalid_input("seed bandwidth must be positive"));
        }

        let hcon = match p {
            1 => 0.776,
            2 => 0.884,
            3 => 1.006,
            _ => 1.0,
        };

        // Pilot fit for the plug-in family
        let pilot = match self.bandwidth {
            Bandwidth::PlugIn | Bandwidth::ReEstimateLocal | Bandwidth::ReEstimateWeighted => {
                Some(global_pilot(xs, ys, p))
            }
            _ => None,
        };

        let mut h = match self.bandwidth {
            Bandwidth::Direct | Bandwidth::ReEstimateLocal | Bandwidth::ReEstimateWeighted => {
                self.seed
            }
            Bandwidth::PlugIn => {
                let pilot = pilot.as_ref().unwrap();
                let h = hcon
                    * (pilot.ssr * 3.0 * pilot.std / pilot.wmp1 / nk as f64)
                        .powf(1.0 / (2.0 * p as f64 + 3.0));
                if h.is_finite() && h > 0.0 {
                    h
                } else {
                    self.seed
                }
            }
            Bandwidth::CrossValidate => {
                let ln_h = golden_section(
                    |z| residual_score(z.exp(), xs, ys, p),
                    self.seed.ln() - 3.0,
                    self.seed.ln() + 3.0,
                );
                let h = cv_adjustment(p) * ln_h.exp();
                if h.is_finite() && h > 0.0 {
                    h
                } else {
                    self.seed
                }
            }
        };

        // Small samples never go below the seed bandwidth
        if nk < 10 && h < self.seed {
            h = self.seed;
        }

        // Weighted least squares around x0
        let mut xx = Array2::<f64>::zeros((nk, p + 1));
        for i in 0..nk {
            let v = xs[i] - x0;
            let mut pow_v = 1.0;
            for d in 0..=p {
                xx[[i, d]] = pow_v;
                pow_v *= v;
            }
        }
        let nu: Vec<f64> = (0..=p).map(factorial).collect();
        let w: Vec<f64> = xs.iter().map(|&x| phi((x - x0) / h) / h).collect();

        let a = weighted_gram(&xx, &w);
        let b = weighted_rhs(&xx, &w, ys);
        let raw = solve(&a, &b);

        let psize = if p == 1 { p + 2 } else { p + 1 };
        let mut bp = vec![0.0; psize];
        for d in 0..=p {
            let v = nu[d] * raw[d];
            bp[d] = if v.is_finite() { v } else { 0.0 };
        }

        // For p = 1, recover the second derivative from the derivative of
        // the kernel-weighted normal equations.
        if p == 1 {
            let mut s0 = 0.0;
            let mut s1 = 0.0;
            let mut s2 = 0.0;
            let mut t0 = 0.0;
            let mut t1 = 0.0;
            let mut ds0 = 0.0;
            let mut ds1 = 0.0;
            let mut ds2 = 0.0;
            let mut dt0 = 0.0;
            let mut dt1 = 0.0;
            for i in 0..nk {
                let vx = x0 - xs[i];
                let ker = phi(vx / h) / h;
                let dker = -d1phi(vx / h) / (h * h);
                s0 += ker;
                s1 += vx * ker;
                s2 += vx * vx * ker;
                t0 += ker * ys[i];
                t1 += vx * ker * ys[i];
                ds0 += dker;
                ds1 += vx * dker - ker;
                ds2 += vx * vx * dker - 2.0 * vx * ker;
                dt0 += dker * ys[i];
                dt1 += vx * dker * ys[i] - ker * ys[i];
            }
            let delta = s0 * s2 - s1 * s1;
            let ddelta = ds0 * s2 + s0 * ds2 - 2.0 * s1 * ds1;
            let gamma = -s1 * t0 + s0 * t1;
            let dgamma = -ds1 * t0 - s1 * dt0 + ds0 * t1 + s0 * dt1;
            let d2 = (delta * dgamma - gamma * ddelta) / (delta * delta);
            bp[2] = if d2.is_finite() { d2 } else { 0.0 };
        }

        let resid2: Vec<f64> = ys
            .iter()
            .map(|&y| {
                let r = (y - bp[0]) * (y - bp[0]);
                if r.is_finite() {
                    r
                } else {
                    0.0
                }
            })
            .collect();

        let std_errors = if self.with_se {
            Some(sandwich_se(&xx, &w, &a, &resid2, &nu, psize))
        } else {
            None
        };

        // Re-estimation: recompute the bandwidth from the fitted residuals
        // and the local kernel density; the caller refits directly with it.
        if let Some(pilot) = &pilot {
            if self.bandwidth.needs_second_pass() {
                let msr = resid2.iter().sum::<f64>() / nk as f64;
                let fhat = w.iter().sum::<f64>() / nk as f64;
                let lmsr = resid2
                    .iter()
                    .zip(w.iter())
                    .map(|(r, wi)| r * wi)
                    .sum::<f64>()
                    / nk as f64;
                let mp1x = pilot.mp1(x0);
                let numer = match self.bandwidth {
                    Bandwidth::ReEstimateLocal => msr,
                    _ => lmsr,
                };
                let h_new = hcon
                    * (numer / (mp1x * mp1x) / fhat / nk as f64)
                        .powf(1.0 / (2.0 * p as f64 + 3.0));
                if h_new.is_finite() && h_new > 0.0 {
                    h = h_new;
                    if nk < 10 && h < self.seed {
                        h = self.seed;
                    }
                }
            }
        }

        Ok(LocalFitResult {
            coefficients: bp,
            std_errors,
            bandwidth: h,
        })
    }
}

/// Global polynomial pilot fit of order p+3
struct Pilot {
    alpha: Array1<f64>,
    ssr: f64,
    std: f64,
    wmp1: f64,
    p: usize,
}

impl Pilot {
    /// Curvature functional m_{p+1}(v) from the pilot coefficients
    fn mp1(&self, v: f64) -> f64 {
        let p = self.p;
        factorial(p + 1) * self.alpha[p + 1]
            + 0.5 * factorial(p + 2) * self.alpha[p + 2] * v
            + factorial(p + 3) / 6.0 * self.alpha[p + 3] * v * v
    }
}

fn global_pilot(xs: &[f64], ys: &[f64], p: usize) -> Pilot {
    let nk = xs.len();
    let deg = p + 3;
    let mut x_mat = Array2::<f64>::zeros((nk, deg + 1));
    for i in 0..nk {
        let mut pow_v = 1.0;
        for d in 0..=deg {
            x_mat[[i, d]] = pow_v;
            pow_v *= xs[i];
        }
    }
    let ones = vec![1.0; nk];
    let a = weighted_gram(&x_mat, &ones);
    let b = weighted_rhs(&x_mat, &ones, ys);
    let alpha = solve(&a, &b);

    let mut ssr = 0.0;
    for i in 0..nk {
        let mut fitted = 0.0;
        for d in 0..=deg {
            fitted += x_mat[[i, d]] * alpha[d];
        }
        let r = ys[i] - fitted;
        ssr += r * r;
    }

    let mean = xs.iter().sum::<f64>() / nk as f64;
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / nk as f64;
    let std = var.sqrt();

    let pilot = Pilot {
        alpha,
        ssr,
        std,
        wmp1: 0.0,
        p,
    };
    let lo = mean - 1.5 * std;
    let hi = mean + 1.5 * std;
    let wmp1 = xs
        .iter()
        .filter(|&&x| x > lo && x < hi)
        .map(|&x| {
            let m = pilot.mp1(x);
            m * m
        })
        .sum::<f64>();

    Pilot { wmp1, ..pilot }
}

fn weighted_gram(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let (n, m) = x.dim();
    let mut a = Array2::<f64>::zeros((m, m));
    for i in 0..n {
        for r in 0..m {
            let xw = x[[i, r]] * w[i];
            for c in 0..m {
                a[[r, c]] += xw * x[[i, c]];
            }
        }
    }
    a
}

fn weighted_rhs(x: &Array2<f64>, w: &[f64], y: &[f64]) -> Array1<f64> {
    let (n, m) = x.dim();
    let mut b = Array1::<f64>::zeros(m);
    for i in 0..n {
        for r in 0..m {
            b[r] += x[[i, r]] * w[i] * y[i];
        }
    }
    b
}

/// Sandwich covariance with squared weights, ridge-regularized, scaled by a
/// local residual-variance estimate.
fn sandwich_se(
    xx: &Array2<f64>,
    w: &[f64],
    gram: &Array2<f64>,
    resid2: &[f64],
    nu: &[f64],
    psize: usize,
) -> Vec<f64> {
    let m = gram.nrows();
    let mut ridged = gram.clone();
    for d in 0..m {
        ridged[[d, d]] += RIDGE;
    }
    let inv = invert(&ridged);

    let w2: Vec<f64> = w.iter().map(|wi| wi * wi).collect();
    let mid = weighted_gram(xx, &w2);
    let mvar = inv.dot(&mid).dot(&inv);

    let rb = weighted_rhs(xx, w, resid2);
    let temp2 = solve(gram, &rb);
    let s2hat = nu
        .iter()
        .zip(temp2.iter())
        .map(|(n, t)| n * t)
        .sum::<f64>()
        / nu.len() as f64;

    // diag(nu^2) M diag(nu^2) has diagonal nu_d^4 M_dd
    let mut se = vec![0.0; psize];
    for d in 0..m.min(psize) {
        let diag = s2hat * nu[d].powi(4) * mvar[[d, d]];
        se[d] = diag.abs().sqrt();
    }
    se
}

/// Leave-one-in integrated residual score for cross-validation
fn residual_score(h: f64, xs: &[f64], ys: &[f64], p: usize) -> f64 {
    let nk = xs.len();
    let mut fitted = vec![0.0; nk];
    for i in 0..nk {
        let mut xx = Array2::<f64>::zeros((nk, p + 1));
        for j in 0..nk {
            let v = xs[j] - xs[i];
            let mut pow_v = 1.0;
            for d in 0..=p {
                xx[[j, d]] = pow_v;
                pow_v *= v;
            }
        }
        let w: Vec<f64> = xs.iter().map(|&x| phi((x - xs[i]) / h) / h).collect();
        let a = weighted_gram(&xx, &w);
        let b = weighted_rhs(&xx, &w, ys);
        let sol = solve(&a, &b);
        fitted[i] = sol[0];
    }

    let resid2: Vec<f64> = ys
        .iter()
        .zip(fitted.iter())
        .map(|(&y, &f)| {
            let r = (y - f) * (y - f);
            if r.is_finite() {
                r
            } else {
                0.0
            }
        })
        .collect();

    let mut score = 0.0;
    for i in 0..nk - 1 {
        // Kernel-weighted local mean of the squared residuals at xs[i]
        let mut sw = 0.0;
        let mut swr = 0.0;
        for j in 0..nk {
            let wij = phi((xs[j] - xs[i]) / h) / h;
            sw += wij;
            swr += wij * resid2[j];
        }
        let s2hat = if sw > 0.0 { swr / sw } else { 0.0 };
        score += s2hat * (xs[i + 1] - xs[i]);
    }
    score
}

/// Golden-section minimization over [lo, hi]
fn golden_section(f: impl Fn(f64) -> f64, lo: f64, hi: f64) -> f64 {
    let inv_phi = 0.618_033_988_749_894_8;
    let mut a = lo;
    let mut b = hi;
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    for _ in 0..80 {
        if (b - a).abs() < 1e-8 {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

/// Gaussian moment matrix S with S[i][j] = E[Z^{i+j}]
fn moment_matrix(p: usize) -> Array2<f64> {
    let moments = [1.0, 0.0, 1.0, 0.0, 3.0, 0.0, 15.0];
    let mut s = Array2::<f64>::zeros((p + 1, p + 1));
    for i in 0..=p {
        for j in 0..=p {
            s[[i, j]] = moments[i + j];
        }
    }
    s
}

/// Equivalent-kernel value at x for derivative order v
fn kstar(x: f64, v: usize, p: usize, sinv: &Array2<f64>) -> f64 {
    let mut f = 0.0;
    let mut pow_x = 1.0;
    for i in 0..=p {
        f += sinv[[v, i]] * pow_x;
        pow_x *= x;
    }
    f * phi(x)
}

/// Composite Simpson over [-4, 4]
fn simpson(f: impl Fn(f64) -> f64) -> f64 {
    let n = 800;
    let a = -4.0;
    let b = 4.0;
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let x = a + i as f64 * h;
        sum += if i % 2 == 1 { 4.0 * f(x) } else { 2.0 * f(x) };
    }
    sum * h / 3.0
}

/// Asymptotic adjustment factor for the cross-validated bandwidth,
/// targeting the second derivative (v = 2). The p = 1 case is degenerate
/// in the source formula and returns 1.0.
fn cv_adjustment(p: usize) -> f64 {
    let v = 2usize;
    if p + 1 <= v {
        return 1.0;
    }

    let s = moment_matrix(p);
    let sinv = invert(&s);

    let i1 = simpson(|x| {
        let k = kstar(x, v, p, &sinv);
        k * k
    });
    let i2 = simpson(|x| x.powi(p as i32 + 1) * kstar(x, v, p, &sinv));
    let i3 = simpson(|x| {
        let k = kstar(x, 0, p, &sinv);
        k * k
    });

    let cp_vec: Vec<f64> = match p {
        2 => vec![0.0, 1.0, 0.0],
        _ => vec![3.0, 0.0, 1.0, 0.0],
    };
    let raw_moment = match p {
        2 => 15.0,
        _ => 105.0,
    };
    let cp_arr = Array1::from(cp_vec.clone());
    let solved = solve(&s, &cp_arr);
    let quad: f64 = cp_vec.iter().zip(solved.iter()).map(|(c, s)| c * s).sum();
    let cp = raw_moment - quad;

    let numer = (2.0 * v as f64 + 1.0) * cp * i1;
    let denom = ((p + 1 - v) as f64 * i2 * i2 * i3).powf(1.0 / (2.0 * p as f64 + 3.0));
    numer / denom
}
