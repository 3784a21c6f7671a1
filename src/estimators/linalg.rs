//! Small dense linear systems
//!
//! The local polynomial fits solve systems no larger than (p+4)×(p+4), so a
//! direct Gaussian elimination with partial pivoting is all that is needed.
//! Pivots below `PIVOT_EPS` leave their unknown at zero instead of faulting;
//! callers treat non-finite or degenerate results as missing estimates.

use ndarray::{Array1, Array2};

const PIVOT_EPS: f64 = 1e-12;

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    debug_assert_eq!(a.nrows(), n);
    debug_assert_eq!(a.ncols(), n);

    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_val = aug[[col, col]].abs();
        let mut max_row = col;
        for row in col + 1..n {
            let v = aug[[row, col]].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }
        if max_row != col {
            for j in 0..=n {
                let tmp = aug[[col, j]];
                aug[[col, j]] = aug[[max_row, j]];
                aug[[max_row, j]] = tmp;
            }
        }

        let pivot = aug[[col, col]];
        if pivot.abs() < PIVOT_EPS {
            continue;
        }
        for row in col + 1..n {
            let factor = aug[[row, col]] / pivot;
            for j in col..=n {
                let v = aug[[col, j]];
                aug[[row, j]] -= factor * v;
            }
        }
    }

    // Back substitution
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = aug[[i, n]];
        for j in i + 1..n {
            sum -= aug[[i, j]] * x[j];
        }
        let diag = aug[[i, i]];
        if diag.abs() > PIVOT_EPS {
            x[i] = sum / diag;
        }
    }
    x
}

/// Invert a small matrix by solving against the identity columns.
pub fn invert(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        let col = solve(a, &e);
        for i in 0..n {
            inv[[i, j]] = col[i];
        }
    }
    inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_identity() {
        let a = Array2::<f64>::eye(4);
        let b = array![1.0, 2.0, 3.0, 4.0];
        let x = solve(&a, &b);
        for i in 0..4 {
            assert!((x[i] - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_solve_general() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![5.0, 10.0];
        let x = solve(&a, &b);
        // 2x + y = 5, x + 3y = 10 => x = 1, y = 3
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_invert_round_trip() {
        let a = array![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
        let inv = invert(&a);
        let prod = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((prod[[i, j]] - expect).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_leaves_zero() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![2.0, 2.0];
        let x = solve(&a, &b);
        assert!(x.iter().all(|v| v.is_finite()));
    }
}
