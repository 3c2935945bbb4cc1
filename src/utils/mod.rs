//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-instance sender and receiver counters

pub mod logging;
pub mod metrics;

pub use metrics::{ReceiverMetrics, SenderMetrics};
