//! Shape-constrained price-curve regression
//!
//! Projects observed option prices onto the nearest curve that is convex,
//! monotone in the direction the side requires, and slope-bounded by the
//! discount factor: put curves rise with strike at a rate in [0, upbd],
//! call curves fall at a rate in [-upbd, 0]. With those constraints the
//! curve's strike derivative, scaled by the discount factor, is a valid CDF.
//!
//! The solver is a cyclic projection onto the constraint polytope: each
//! violated constraint row projects the augmented multiplier vector onto its
//! boundary hyperplane, and the previous pass's correction for a row is
//! undone before that row is re-tested.

use ndarray::Array2;

use crate::core::{BubbleError, BubbleResult, OptionType};

/// Result of a constrained fit
#[derive(Debug, Clone)]
pub struct ShapeFit {
    /// Cleaned price curve, one value per input strike
    pub curve: Vec<f64>,
    /// Whether all constraints were met within tolerance
    pub converged: bool,
    /// Projection passes actually run
    pub passes: usize,
}

/// Scratch buffers for the projection solver, reusable across calls
/// within one bucket's computation.
#[derive(Debug, Default)]
pub struct ShapeWorkspace {
    /// Augmented multiplier vector, length n+1
    u: Vec<f64>,
    /// Constraint matrix, n rows x (n+1) columns
    a: Array2<f64>,
    /// Correction history: one column per constraint row plus one for
    /// the mass-multiplier clamp
    corrections: Array2<f64>,
}

impl ShapeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, n: usize) {
        self.u.clear();
        self.u.resize(n + 1, 0.0);
        self.u[n] = 1.0;
        self.a = Array2::zeros((n, n + 1));
        self.corrections = Array2::zeros((n + 1, n + 1));
    }
}

/// Fit the shape-constrained curve for one side of a bucket.
///
/// `strikes` must be strictly increasing with at least 3 entries; `prices`
/// must match in length. `upbd` is the discount bound e^{-r tau}, `nint`
/// caps the projection passes, `precis` is the constraint tolerance.
/// Exhausting `nint` is not an error; the best-effort curve comes back with
/// `converged == false`.
pub fn constrained_fit(
    side: OptionType,
    strikes: &[f64],
    prices: &[f64],
    upbd: f64,
    nint: usize,
    precis: f64,
    ws: &mut ShapeWorkspace,
) -> BubbleResult<ShapeFit> {
    let n = strikes.len();
    if n < 3 {
        return Err(BubbleError::invalid_input(format!(
            "{} strikes, constrained fit needs at least 3",
            n
        )));
    }
    if prices.len() != n {
        return Err(BubbleError::invalid_input(format!(
            "{} strikes but {} prices",
            n,
            prices.len()
        )));
    }
    for w in strikes.windows(2) {
        if w[1] <= w[0] {
            return Err(BubbleError::invalid_input(
                "strikes not strictly increasing",
            ));
        }
    }

    ws.reset(n);
    build_constraints(side, strikes, prices, upbd, &mut ws.a);

    let a = &ws.a;
    let u = &mut ws.u;
    let corrections = &mut ws.corrections;

    let mut converged = false;
    let mut passes = 0;

    while passes < nint && !converged {
        passes += 1;

        for i in 0..n {
            // Undo this row's previous correction before re-testing it
            for k in 0..=n {
                u[k] -= corrections[[k, i]];
            }
            let dot = row_dot(a, i, u);
            if dot > 0.0 {
                let denom: f64 = (0..=n).map(|k| a[[i, k]] * a[[i, k]]).sum();
                for k in 0..=n {
                    let step = dot * a[[i, k]] / denom;
                    u[k] -= step;
                    corrections[[k, i]] = -step;
                }
            } else {
                for k in 0..=n {
                    corrections[[k, i]] = 0.0;
                }
            }
        }

        // Mass-multiplier clamp: u[n] must stay non-negative
        for k in 0..=n {
            u[k] -= corrections[[k, n]];
        }
        if -u[n] > precis {
            corrections[[n, n]] = -u[n];
            for k in 0..n {
                corrections[[k, n]] = 0.0;
            }
            u[n] = 0.0;
        } else {
            for k in 0..=n {
                corrections[[k, n]] = 0.0;
            }
        }

        converged = (0..n).all(|i| row_dot(a, i, u) <= precis) && -u[0] <= precis;
    }

    if u[n] == 0.0 {
        return Err(BubbleError::numerical(
            "mass multiplier collapsed to zero in constrained fit",
        ));
    }

    let scale = u[n];
    let curve: Vec<f64> = prices
        .iter()
        .zip(u.iter())
        .map(|(&p, &ui)| p + ui / scale)
        .collect();

    Ok(ShapeFit {
        curve,
        converged,
        passes,
    })
}

fn row_dot(a: &Array2<f64>, i: usize, u: &[f64]) -> f64 {
    (0..u.len()).map(|k| a[[i, k]] * u[k]).sum()
}

/// Fill the constraint matrix `a` (n rows, n+1 columns) for one side.
///
/// Rows 0..n-2 are the second-difference (convexity) constraints; the last
/// two rows pin the boundary slopes: for puts, slope >= 0 at the low end and
/// <= upbd at the high end; for calls, slope <= 0 at the high end and
/// >= -upbd at the low end.
fn build_constraints(
    side: OptionType,
    strikes: &[f64],
    prices: &[f64],
    upbd: f64,
    a: &mut Array2<f64>,
) {
    let n = strikes.len();
    let dx: Vec<f64> = strikes.windows(2).map(|w| w[1] - w[0]).collect();
    let dy: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    for i in 0..n - 2 {
        let d2y = prices[i] / dx[i] - (1.0 / dx[i] + 1.0 / dx[i + 1]) * prices[i + 1]
            + prices[i + 2] / dx[i + 1];
        a[[i, i]] = -1.0 / dx[i];
        a[[i, i + 1]] = 1.0 / dx[i] + 1.0 / dx[i + 1];
        a[[i, i + 2]] = -1.0 / dx[i + 1];
        a[[i, n]] = -d2y;
    }

    match side {
        OptionType::Put => {
            a[[n - 2, 0]] = 1.0;
            a[[n - 2, 1]] = -1.0;
            a[[n - 2, n]] = -dy[0];

            a[[n - 1, n - 2]] = -1.0;
            a[[n - 1, n - 1]] = 1.0;
            a[[n - 1, n]] = dy[n - 2] - upbd * dx[n - 2];
        }
        OptionType::Call => {
            a[[n - 2, n - 2]] = -1.0;
            a[[n - 2, n - 1]] = 1.0;
            a[[n - 2, n]] = dy[n - 2];

            a[[n - 1, 0]] = 1.0;
            a[[n - 1, 1]] = -1.0;
            a[[n - 1, n]] = -dy[0] - upbd * dx[0];
        }
    }
}
