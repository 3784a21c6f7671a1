//! Strike-range overlap scenes
//!
//! The put and call sides of a bucket each cover a strike window, and the
//! truncation-bias formulas depend on how the two windows sit relative to
//! each other. Classification is exhaustive: every bucket lands in exactly
//! one of six scenes, each carrying only the boundary indices its bias
//! formula reads.

use serde::{Deserialize, Serialize};

/// Cross-side boundary indices.
///
/// Each index points at the observation nearest to the other side's window
/// edge; when the primary lookup is empty the nearest observation on the
/// other side of the edge is used instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundaryIndices {
    /// First put strike at or above the lowest call strike
    pub lc_p: usize,
    /// Last call strike at or below the highest put strike
    pub up_c: usize,
    /// First call strike at or above the lowest put strike
    pub lp_c: usize,
    /// Last put strike at or below the highest call strike
    pub uc_p: usize,
}

impl BoundaryIndices {
    /// Locate the four boundary indices for the given sorted strike arrays.
    pub fn locate(put_strikes: &[f64], call_strikes: &[f64]) -> Self {
        let ck0 = call_strikes[0];
        let ck_hi = call_strikes[call_strikes.len() - 1];
        let pk0 = put_strikes[0];
        let pk_hi = put_strikes[put_strikes.len() - 1];

        Self {
            lc_p: first_at_or_above(put_strikes, ck0),
            up_c: last_at_or_below(call_strikes, pk_hi),
            lp_c: first_at_or_above(call_strikes, pk0),
            uc_p: last_at_or_below(put_strikes, ck_hi),
        }
    }
}

/// First index with value >= bound; falls back to the last index <= bound.
fn first_at_or_above(xs: &[f64], bound: f64) -> usize {
    xs.iter()
        .position(|&x| x >= bound)
        .unwrap_or_else(|| xs.iter().rposition(|&x| x <= bound).unwrap_or(0))
}

/// Last index with value <= bound; falls back to the first index >= bound.
fn last_at_or_below(xs: &[f64], bound: f64) -> usize {
    xs.iter()
        .rposition(|&x| x <= bound)
        .unwrap_or_else(|| xs.iter().position(|&x| x >= bound).unwrap_or(0))
}

/// Overlap scene between the put and call strike windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scene {
    /// Call window shifted above the put window, overlapping
    CallShiftedAbove { up_c: usize, lc_p: usize },
    /// Call window shifted below the put window, overlapping
    CallShiftedBelow { uc_p: usize, lp_c: usize },
    /// Call window nested inside the put window
    CallInsidePut { lc_p: usize, uc_p: usize },
    /// Put window nested inside the call window
    PutInsideCall { lp_c: usize, up_c: usize },
    /// Call window entirely above the put window
    DisjointCallAbove,
    /// Remaining configurations; no overlap adjustment applies
    Disjoint,
}

impl Scene {
    /// Classify a bucket by its put/call strike windows. Both arrays must
    /// be non-empty and sorted ascending.
    pub fn classify(put_strikes: &[f64], call_strikes: &[f64]) -> Self {
        let bi = BoundaryIndices::locate(put_strikes, call_strikes);
        let pk0 = put_strikes[0];
        let pk_hi = put_strikes[put_strikes.len() - 1];
        let ck0 = call_strikes[0];
        let ck_hi = call_strikes[call_strikes.len() - 1];

        if pk0 <= ck0 && pk_hi <= ck_hi && ck0 <= pk_hi {
            Scene::CallShiftedAbove {
                up_c: bi.up_c,
                lc_p: bi.lc_p,
            }
        } else if ck0 <= pk0 && ck_hi <= pk_hi && pk0 <= ck_hi {
            Scene::CallShiftedBelow {
                uc_p: bi.uc_p,
                lp_c: bi.lp_c,
            }
        } else if pk0 <= ck0 && ck_hi <= pk_hi {
            Scene::CallInsidePut {
                lc_p: bi.lc_p,
                uc_p: bi.uc_p,
            }
        } else if ck0 <= pk0 && pk_hi <= ck_hi {
            Scene::PutInsideCall {
                lp_c: bi.lp_c,
                up_c: bi.up_c,
            }
        } else if pk_hi < ck0 {
            Scene::DisjointCallAbove
        } else {
            Scene::Disjoint
        }
    }

    /// Stable numeric id, 1..=6
    pub fn id(&self) -> u8 {
        match self {
            Scene::CallShiftedAbove { .. } => 1,
            Scene::CallShiftedBelow { .. } => 2,
            Scene::CallInsidePut { .. } => 3,
            Scene::PutInsideCall { .. } => 4,
            Scene::DisjointCallAbove => 5,
            Scene::Disjoint => 6,
        }
    }

    /// Scene-specific truncation bias terms (B22, B23).
    ///
    /// `wp`/`wc` are the observation-count weights of the two sides, `upbd`
    /// the discount bound.
    #[allow(clippy::too_many_arguments)]
    pub fn truncation_bias(
        &self,
        put_strikes: &[f64],
        put_prices: &[f64],
        call_strikes: &[f64],
        call_prices: &[f64],
        upbd: f64,
        wp: f64,
        wc: f64,
    ) -> (f64, f64) {
        let pk0 = put_strikes[0];
        let pk_hi = put_strikes[put_strikes.len() - 1];
        let ck0 = call_strikes[0];
        let ck_hi = call_strikes[call_strikes.len() - 1];
        let p_first = put_prices[0];
        let p_last = put_prices[put_prices.len() - 1];
        let c_first = call_prices[0];
        let c_last = call_prices[call_prices.len() - 1];

        match *self {
            Scene::CallShiftedAbove { up_c, lc_p } => {
                let b22 = wp * (upbd * (ck_hi - pk_hi) + c_last - call_prices[up_c]);
                let b23 = wc * (put_prices[lc_p] - p_first);
                (b22, b23)
            }
            Scene::CallShiftedBelow { uc_p, lp_c } => {
                let b22 = -wp * (p_last - put_prices[uc_p]);
                let b23 = -wc * (upbd * (pk0 - ck0) + call_prices[lp_c] - c_first);
                (b22, b23)
            }
            Scene::CallInsidePut { lc_p, uc_p } => {
                let b22 = wc * (put_prices[lc_p] - p_first);
                let b23 = -wp * (p_last - put_prices[uc_p]);
                (b22, b23)
            }
            Scene::PutInsideCall { lp_c, up_c } => {
                let b22 = -wc * (upbd * (pk0 - ck0) + call_prices[lp_c] - c_first);
                let b23 = wp * (upbd * (ck_hi - pk_hi) + c_last - call_prices[up_c]);
                (b22, b23)
            }
            Scene::DisjointCallAbove => {
                let b22 = wc * (p_last - p_first);
                let b23 = wp * (upbd * (ck_hi - ck0) + c_last - c_first);
                (b22, b23)
            }
            Scene::Disjoint => (0.0, 0.0),
        }
    }

    /// The fully disjoint call-above scene widens the upper truncation
    /// bound by the discount factor.
    pub fn upper_bound_shift(&self, upbd: f64) -> f64 {
        match self {
            Scene::DisjointCallAbove => upbd,
            _ => 0.0,
        }
    }
}
