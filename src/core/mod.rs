//! Core data types for bubble estimation
//!
//! Defines fundamental types:
//! - OptionQuote / QuotePanel: ingested market data in a flat per-date layout
//! - TauBucket: the per-date, per-expiry unit of calibration work
//! - BubbleError / BubbleResult: crate-wide error handling

pub mod bucket;
pub mod error;
pub mod quote;

pub use bucket::*;
pub use error::*;
pub use quote::*;
