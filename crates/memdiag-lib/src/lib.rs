//! Memory diagnostics library for containerized nodes
//!
//! This crate provides the core functionality for:
//! - Memory sampling from procfs
//! - Trend fitting and sliding-window leak detection
//! - Per-process leak reports and top-candidate ranking
//! - OOM kill reconstruction from kernel logs
//! - Structured logging and Prometheus metrics

pub mod anomaly;
pub mod collector;
pub mod error;
pub mod models;
pub mod observability;
pub mod oom;
pub mod report;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use error::{DiagError, Result};
pub use models::*;
pub use observability::{DiagMetrics, StructuredLogger};
pub use shutdown::{Shutdown, ShutdownTrigger};
