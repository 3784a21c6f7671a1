//! Calibration parameters

use serde::{Deserialize, Serialize};

use crate::estimators::Bandwidth;

/// Parameters of the per-bucket calibration pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Maximum projection passes in the shape-constrained fit
    /// Default: 500
    pub nint: usize,

    /// Convergence tolerance for the shape constraints
    /// Default: 1e-5
    pub precis: f64,

    /// Minimum CDF range for a side to be usable
    /// Default: 0.3
    pub minrange: f64,

    /// Maximum admissible single-step CDF jump
    /// Default: 0.7
    pub maxcdfjump: f64,

    /// Evaluation grid resolution: nstep+1 points span each side's strikes
    /// Default: 200
    pub nstep: usize,

    /// Local polynomial order, 1..=3
    /// Default: 2
    pub order: usize,

    /// Bandwidth-selection policy
    /// Default: Direct
    pub bandwidth: Bandwidth,

    /// Seed bandwidth multiplier: seed = mean strike spacing * hnumsd
    /// Default: 5.0
    pub hnumsd: f64,

    /// Compute pointwise standard errors in the local fits
    /// Default: false
    pub with_se: bool,

    /// Record the bandwidth used at each grid point (diagnostics)
    /// Default: false
    pub keep_bandwidths: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            nint: 500,
            precis: 1e-5,
            minrange: 0.3,
            maxcdfjump: 0.7,
            nstep: 200,
            order: 2,
            bandwidth: Bandwidth::Direct,
            hnumsd: 5.0,
            with_se: false,
            keep_bandwidths: false,
        }
    }
}

impl CalibrationParams {
    /// Coarse settings for quick scans: shorter grid, looser tolerance
    pub fn coarse() -> Self {
        Self {
            nstep: 50,
            nint: 200,
            precis: 1e-4,
            ..Default::default()
        }
    }
}
