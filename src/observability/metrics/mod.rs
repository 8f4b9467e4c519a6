//! # Metrics
//!
//! Prometheus metrics registry and the controller metric surface.

mod controller_metrics;
mod registry;

pub use controller_metrics::*;
pub use registry::{gather, register_metrics};
