//! Per-date, per-bucket calibration
//!
//! Orchestrates the estimation leaves into bucket estimates:
//! shape-constrained regression of each side's price curve, grid
//! differentiation into a CDF, validation, side combination, and
//! strike-window truncation bias correction.

pub mod engine;
pub mod output;
pub mod params;
pub mod scene;

pub use engine::*;
pub use output::*;
pub use params::*;
pub use scene::*;
