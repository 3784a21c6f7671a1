//! Statistical estimation primitives
//!
//! Implements:
//! - Shape-constrained regression (monotone + convex price curves)
//! - Kernel-weighted local polynomial fits with bandwidth selection
//! - Serial-correlation-robust (Newey-West) variance
//! - Small dense linear solves shared by the above

pub mod autocov;
pub mod linalg;
pub mod local_poly;
pub mod shape;

pub use autocov::*;
pub use local_poly::*;
pub use shape::*;
