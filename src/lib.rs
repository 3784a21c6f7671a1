//! # Bubble Options - Option-Implied Price-Bubble Estimation
//!
//! A library for estimating a time series of "price bubble" magnitude for an
//! underlying asset from its traded option quotes. The market-implied
//! risk-neutral CDF of terminal price is reconstructed at several maturities
//! and the expectation under that measure is compared to the observed spot.
//!
//! ## Pipeline
//!
//! - **Shape-constrained regression**: raw option-price curves are projected
//!   onto the nearest convex, monotone, slope-bounded curve
//! - **Local polynomial estimation**: the cleaned curves are differentiated
//!   on a uniform strike grid with kernel-weighted fits and a choice of
//!   bandwidth-selection policies
//! - **Calibration**: per trading date and per tau bucket, the pointwise CDF
//!   is validated, both sides are combined, and strike-window truncation
//!   bias is corrected
//! - **Aggregation**: bucket estimates roll up into 3-month/6-month/12-month
//!   bands with trailing rolling-window means and confidence bounds robust
//!   to serial correlation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bubble_options::prelude::*;
//!
//! # fn load_panel() -> QuotePanel { unimplemented!() }
//! // Ingest a quote panel (per-date blocks of option quotes)
//! let panel: QuotePanel = load_panel();
//!
//! // Calibrate every (date, bucket) cell
//! let output = calibrate_panel(&panel, &CalibrationParams::default());
//!
//! // Roll up into banded bubble series with confidence bounds
//! let series = aggregate(&output, &AggregatorConfig::default());
//! ```
//!
//! ## What This Library Does NOT Do
//!
//! - Fetch market data (quotes, spots, rates come from an ingestion
//!   collaborator)
//! - Persist results or draw charts
//! - Adjust a stored series for corporate actions

pub mod aggregate;
pub mod calibration;
pub mod core;
pub mod estimators;

/// Prelude with commonly used types
pub mod prelude {
    // Core types
    pub use crate::core::{
        extract_buckets, BubbleError, BubbleResult, OptionQuote, OptionType, QuotePanel,
        SideQuotes, TauBucket,
    };

    // Estimation primitives
    pub use crate::estimators::{
        constrained_fit, newey_west, Bandwidth, LocalFitResult, LocalPoly, ShapeFit,
        ShapeWorkspace,
    };

    // Calibration
    pub use crate::calibration::{
        calibrate_bucket, calibrate_day, calibrate_panel, BucketEstimate, CalibrationOutput,
        CalibrationParams, PanelArrays, Scene, SideEstimate,
    };

    // Aggregation
    pub use crate::aggregate::{
        aggregate, band_estimates, rolling_series, AggregatorConfig, BandDay, BandEstimate,
        BubbleSeries, MaturityBand, Side,
    };
}

// Re-export main types at crate root
pub use crate::core::{BubbleError, BubbleResult};
pub use crate::prelude::{aggregate, calibrate_panel, AggregatorConfig, CalibrationParams};
