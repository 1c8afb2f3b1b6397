//! Reduction of per-step environment info into rollout statistics.

use crate::env::{unroll, Frame, Info};
use std::collections::{BTreeMap, HashMap};

/// Reduced statistics for one rollout
#[derive(Debug, Default)]
pub struct RolloutStats {
    /// Mean of every reducible key
    pub scalars: BTreeMap<String, f64>,
    /// First image seen under each `_map` key
    pub media: BTreeMap<String, Frame>,
}

/// Collects info dictionaries during a rollout.
///
/// Whether a key can be averaged is decided the first time it is seen and
/// remembered for the lifetime of the aggregator, so one odd value later in
/// training cannot flip a metric on or off.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    reducible: HashMap<String, bool>,
    sums: BTreeMap<String, (f64, usize)>,
    media: BTreeMap<String, Frame>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, info: &Info) {
        for (key, value) in unroll(info) {
            if key.contains("_map") {
                if let Some(frame) = value.as_image() {
                    self.media.entry(key).or_insert_with(|| frame.clone());
                }
                continue;
            }

            let reducible = *self.reducible.entry(key.clone()).or_insert_with(|| {
                let ok = value.is_reducible();
                if !ok {
                    tracing::debug!(key = %key, "Dropping non-numeric metric");
                }
                ok
            });
            if !reducible || !value.is_reducible() {
                continue;
            }

            let entry = self.sums.entry(key).or_insert((0.0, 0));
            for x in value.samples() {
                entry.0 += x;
                entry.1 += 1;
            }
        }
    }

    /// True when nothing has been recorded since the last reduce
    pub fn is_empty(&self) -> bool {
        self.sums.is_empty() && self.media.is_empty()
    }

    /// Take the means and media gathered so far and start over
    pub fn reduce(&mut self) -> RolloutStats {
        let scalars = std::mem::take(&mut self.sums)
            .into_iter()
            .filter(|(_, (_, n))| *n > 0)
            .map(|(k, (sum, n))| (k, sum / n as f64))
            .collect();
        RolloutStats {
            scalars,
            media: std::mem::take(&mut self.media),
        }
    }
}
