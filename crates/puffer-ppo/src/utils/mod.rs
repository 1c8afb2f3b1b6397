//! Utility functions.

use tch::Device;

/// Seed libtorch. With `deterministic`, cuDNN autotuning is disabled so
/// repeated runs pick the same kernels.
pub fn set_seed(seed: u64, deterministic: bool) {
    tch::manual_seed(seed as i64);
    if deterministic {
        tch::Cuda::cudnn_set_benchmark(false);
    }
}

/// Block until queued work on a CUDA device has finished
pub fn synchronize(device: Device) {
    if let Device::Cuda(index) = device {
        tch::Cuda::synchronize(index as i64);
    }
}

/// Abbreviate large numbers for display
pub fn abbreviate(num: f64) -> String {
    if num < 1e3 {
        format!("{:.0}", num)
    } else if num < 1e6 {
        format!("{:.1}k", num / 1e3)
    } else if num < 1e9 {
        format!("{:.1}m", num / 1e6)
    } else if num < 1e12 {
        format!("{:.1}b", num / 1e9)
    } else {
        format!("{:.1}t", num / 1e12)
    }
}

/// Format duration in human-readable form
pub fn format_duration(seconds: f64) -> String {
    if seconds.is_nan() || seconds <= 0.0 {
        return "0s".to_string();
    }

    let secs = seconds as u64;
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;

    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate(500.0), "500");
        assert_eq!(abbreviate(1500.0), "1.5k");
        assert_eq!(abbreviate(1_500_000.0), "1.5m");
        assert_eq!(abbreviate(1_500_000_000.0), "1.5b");
        assert_eq!(abbreviate(2.5e12), "2.5t");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
        assert_eq!(format_duration(-1.0), "0s");
        assert_eq!(format_duration(f64::NAN), "0s");
    }

    #[test]
    fn test_seed_is_reproducible() {
        set_seed(7, true);
        let a = tch::Tensor::randn([4], (tch::Kind::Float, Device::Cpu));
        set_seed(7, true);
        let b = tch::Tensor::randn([4], (tch::Kind::Float, Device::Cpu));
        assert!(a.allclose(&b, 0.0, 0.0, false));
        synchronize(Device::Cpu);
    }
}
