//! Time sources and authority-clock offset estimation.
//!
//! Components:
//! - `source`: the `Clock` trait and its system, monotonic and manual implementations.
//! - `offset_estimator`: per-client estimate of the local/authority clock delta.

pub mod offset_estimator;
pub mod source;

pub use offset_estimator::{compute_offset, OffsetEstimator};
pub use source::{Clock, ManualClock, MonotonicClock, SystemClock};
