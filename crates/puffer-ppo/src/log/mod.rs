//! Unified logging system.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `MetricsSnapshot`, the immutable per-tick value handed to every sink
//! - `ConsoleLogger` for stdout (plain lines or the full dashboard)
//! - `TensorBoardLogger` for visualization (optional)
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;
mod snapshot;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MetricLogger, NoOpLogger};
pub use snapshot::MetricsSnapshot;
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;
