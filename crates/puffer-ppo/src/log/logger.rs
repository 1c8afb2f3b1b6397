//! Metric logger traits and composites.

use super::MetricsSnapshot;
use crate::env::Frame;
use std::collections::HashMap;

/// Trait for logging metrics to various backends.
///
/// Sinks are best effort: they report their own failures and never
/// interrupt training.
pub trait MetricLogger: Send + Sync {
    /// Log a scalar value (e.g. reward, loss).
    fn log_scalar(&self, name: &str, value: f64, step: u64);

    /// Log a set of metrics collected in a map.
    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64);

    /// Log rendered frames, e.g. from an evaluation rollout.
    fn log_media(&self, _name: &str, _frames: &[Frame], _step: u64) {}

    /// Log a full reporting tick. Defaults to its namespaced scalars.
    fn log_snapshot(&self, snapshot: &MetricsSnapshot) {
        let metrics: HashMap<String, f64> = snapshot.scalars().into_iter().collect();
        self.log_metrics(&metrics, snapshot.global_step);
    }

    /// Close the logger and flush any pending writes.
    fn close(&self) {}
}

/// A logger that does nothing (default).
pub struct NoOpLogger;

impl MetricLogger for NoOpLogger {
    fn log_scalar(&self, _name: &str, _value: f64, _step: u64) {}
    fn log_metrics(&self, _metrics: &HashMap<String, f64>, _step: u64) {}
    fn log_snapshot(&self, _snapshot: &MetricsSnapshot) {}
}

/// A composite logger that dispatches to multiple backends.
pub struct CompositeLogger {
    loggers: Vec<Box<dyn MetricLogger>>,
}

impl CompositeLogger {
    pub fn new(loggers: Vec<Box<dyn MetricLogger>>) -> Self {
        Self { loggers }
    }

    pub fn add(&mut self, logger: Box<dyn MetricLogger>) {
        self.loggers.push(logger);
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricLogger for CompositeLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        for logger in &self.loggers {
            logger.log_scalar(name, value, step);
        }
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        for logger in &self.loggers {
            logger.log_metrics(metrics, step);
        }
    }

    fn log_media(&self, name: &str, frames: &[Frame], step: u64) {
        for logger in &self.loggers {
            logger.log_media(name, frames, step);
        }
    }

    fn log_snapshot(&self, snapshot: &MetricsSnapshot) {
        for logger in &self.loggers {
            logger.log_snapshot(snapshot);
        }
    }

    fn close(&self) {
        for logger in &self.loggers {
            logger.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every call for inspection
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MetricLogger for Recorder {
        fn log_scalar(&self, name: &str, _value: f64, step: u64) {
            self.calls.lock().unwrap().push(format!("scalar {} {}", name, step));
        }

        fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
            self.calls.lock().unwrap().push(format!("metrics {} {}", metrics.len(), step));
        }

        fn log_media(&self, name: &str, frames: &[Frame], _step: u64) {
            self.calls.lock().unwrap().push(format!("media {} {}", name, frames.len()));
        }

        fn close(&self) {
            self.calls.lock().unwrap().push("close".into());
        }
    }

    #[test]
    fn test_composite_dispatches_to_all() {
        let a = Recorder::default();
        let b = Recorder::default();
        let mut composite = CompositeLogger::new(vec![Box::new(a.clone())]);
        composite.add(Box::new(b.clone()));
        assert_eq!(composite.len(), 2);

        composite.log_scalar("x", 1.0, 3);
        composite.log_media("eval", &[Frame::zeros((2, 2, 3))], 3);
        composite.close();

        for rec in [a, b] {
            let calls = rec.calls.lock().unwrap();
            assert_eq!(*calls, vec!["scalar x 3", "media eval 1", "close"]);
        }
    }

    #[test]
    fn test_snapshot_defaults_to_metrics() {
        let rec = Recorder::default();
        let snapshot = MetricsSnapshot {
            global_step: 42,
            ..Default::default()
        };
        rec.log_snapshot(&snapshot);
        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("metrics ") && calls[0].ends_with(" 42"));
    }
}
