//! Console logging backend.

use super::{MetricLogger, MetricsSnapshot};
use crate::env::Frame;
use std::collections::HashMap;
use std::fmt::Write;

/// Logger that prints metrics to stdout.
///
/// In line mode every call becomes one `tracing` event. In dashboard mode
/// snapshots are rendered as the full terminal dashboard instead.
pub struct ConsoleLogger {
    dashboard: bool,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self { dashboard: false }
    }

    /// Redraw the dashboard at the top of the terminal on every snapshot
    pub fn dashboard() -> Self {
        Self { dashboard: true }
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Step {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        // Group output to avoid spamming lines
        let mut output = format!("Step {}: ", step);
        let mut sorted: Vec<_> = metrics.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        for (i, (key, value)) in sorted.iter().enumerate() {
            if i > 0 {
                output.push_str(", ");
            }
            let _ = write!(output, "{}={:.4}", key, value);
        }

        tracing::info!("{}", output);
    }

    fn log_media(&self, name: &str, frames: &[Frame], step: u64) {
        tracing::debug!(name, frames = frames.len(), step, "Captured frames");
    }

    fn log_snapshot(&self, snapshot: &MetricsSnapshot) {
        if self.dashboard {
            print!("\x1b[2J\x1b[0;0H{}", snapshot);
        } else {
            tracing::info!(
                epoch = snapshot.epoch,
                step = snapshot.global_step,
                sps = snapshot.sps.round(),
                policy_loss = snapshot.losses.policy_loss,
                value_loss = snapshot.losses.value_loss,
                "{}",
                snapshot.message
            );
        }
    }
}
