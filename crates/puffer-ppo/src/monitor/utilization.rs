//! Background CPU and memory sampling.

use crate::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Window means published by the sampler, in percent
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UtilizationSnapshot {
    pub cpu_util: f64,
    pub cpu_mem: f64,
    pub gpu_util: f64,
    pub gpu_mem: f64,
}

/// Fixed-capacity ring of recent samples
#[derive(Debug)]
struct Window {
    values: VecDeque<f64>,
    maxlen: usize,
}

impl Window {
    fn new(maxlen: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(maxlen),
            maxlen: maxlen.max(1),
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.maxlen {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

#[derive(Default)]
struct Published {
    cpu_util: AtomicU64,
    cpu_mem: AtomicU64,
    gpu_util: AtomicU64,
    gpu_mem: AtomicU64,
    samples: AtomicU64,
}

impl Published {
    fn store(cell: &AtomicU64, value: f64) {
        cell.store(value.to_bits(), Ordering::Relaxed);
    }

    fn load(cell: &AtomicU64) -> f64 {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }
}

/// Periodic utilization sampler running on its own thread.
///
/// The sampling thread is the only writer of its sample windows; readers
/// get the latest published means and never wait on it. GPU figures stay at
/// zero because libtorch exposes no portable utilization query.
pub struct Utilization {
    published: Arc<Published>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Utilization {
    /// Spawn the sampler, keeping the last `maxlen` samples taken every
    /// `interval`.
    pub fn start(interval: Duration, maxlen: usize) -> Result<Self> {
        let published = Arc::new(Published::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let shared = Arc::clone(&published);
        let handle = thread::Builder::new()
            .name("utilization".into())
            .spawn(move || {
                let mut sys = System::new_with_specifics(
                    RefreshKind::new()
                        .with_cpu(CpuRefreshKind::everything())
                        .with_memory(MemoryRefreshKind::everything()),
                );
                let mut cpu_util = Window::new(maxlen);
                let mut cpu_mem = Window::new(maxlen);
                let mut gpu_util = Window::new(maxlen);
                let mut gpu_mem = Window::new(maxlen);

                loop {
                    sys.refresh_cpu_all();
                    sys.refresh_memory();

                    cpu_util.push(sys.global_cpu_usage() as f64);
                    let total = sys.total_memory();
                    cpu_mem.push(if total > 0 {
                        100.0 * sys.used_memory() as f64 / total as f64
                    } else {
                        0.0
                    });
                    gpu_util.push(0.0);
                    gpu_mem.push(0.0);

                    Published::store(&shared.cpu_util, cpu_util.mean());
                    Published::store(&shared.cpu_mem, cpu_mem.mean());
                    Published::store(&shared.gpu_util, gpu_util.mean());
                    Published::store(&shared.gpu_mem, gpu_mem.mean());
                    shared.samples.fetch_add(1, Ordering::Relaxed);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            })?;

        tracing::debug!(?interval, maxlen, "Started utilization monitor");
        Ok(Self {
            published,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Latest window means
    pub fn snapshot(&self) -> UtilizationSnapshot {
        UtilizationSnapshot {
            cpu_util: Published::load(&self.published.cpu_util),
            cpu_mem: Published::load(&self.published.cpu_mem),
            gpu_util: Published::load(&self.published.gpu_util),
            gpu_mem: Published::load(&self.published.gpu_mem),
        }
    }

    /// Number of samples taken so far
    pub fn samples(&self) -> u64 {
        self.published.samples.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Cancel the sampler and wait for its thread to exit
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Utilization monitor thread panicked");
            }
        }
    }
}

impl Drop for Utilization {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_window_is_bounded() {
        let mut window = Window::new(3);
        for v in [10.0, 20.0, 30.0, 40.0] {
            window.push(v);
        }
        assert_eq!(window.values.len(), 3);
        assert_eq!(window.mean(), 30.0);
        assert_eq!(Window::new(2).mean(), 0.0);
    }

    #[test]
    fn test_sampler_publishes_and_stops() {
        let mut monitor = Utilization::start(Duration::from_millis(5), 4).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while monitor.samples() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(monitor.samples() >= 2);

        let snap = monitor.snapshot();
        assert!((0.0..=100.0).contains(&snap.cpu_mem));
        assert_eq!(snap.gpu_util, 0.0);

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_stop_is_prompt() {
        let monitor = Utilization::start(Duration::from_secs(60), 20).unwrap();
        let begin = Instant::now();
        drop(monitor);
        assert!(begin.elapsed() < Duration::from_secs(10));
    }
}
