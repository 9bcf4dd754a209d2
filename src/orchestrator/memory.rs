//! Admission-control memory heuristic (`spec.md` §4.1). Rust has no runtime
//! GC to invoke, so "manual GC, then re-check" becomes "drop what we can,
//! then re-check" — there is nothing held open at this point but the
//! `sysinfo` snapshot itself, so the substitute is a brief yield before the
//! second sample.

use crate::model::MemorySample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;

const FIRST_THRESHOLD: f64 = 0.75;
const SECOND_THRESHOLD: f64 = 0.70;
const RECHECK_PAUSE: Duration = Duration::from_millis(50);
const DEFER_POLL: Duration = Duration::from_millis(200);

pub struct MemoryMonitor {
    sys: Mutex<System>,
    cpu_count: usize,
    total_memory_bytes: u64,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();
        let cpu_count = sys.cpus().len().max(1);
        let total_memory_bytes = sys.total_memory();
        Self {
            sys: Mutex::new(sys),
            cpu_count,
            total_memory_bytes,
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.total_memory_bytes
    }

    fn used_fraction(&self) -> f64 {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 / total as f64
    }

    /// Blocks a dispatching worker until resident memory has cleared the
    /// two-stage threshold, or until `cancelled` is observed. Mirrors
    /// `spec.md` §4.1: sample; if > 75%, attempt reclamation and re-check; if
    /// still > 70%, defer until another worker's completion frees memory.
    pub fn wait_until_clear(&self, cancelled: &AtomicBool) {
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let fraction = self.used_fraction();
            if fraction <= FIRST_THRESHOLD {
                return;
            }
            std::thread::sleep(RECHECK_PAUSE);
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let rechecked = self.used_fraction();
            if rechecked <= SECOND_THRESHOLD {
                return;
            }
            std::thread::sleep(DEFER_POLL);
        }
    }

    pub fn sample(&self, since_start: Duration) -> MemorySample {
        MemorySample {
            at_ms: since_start.as_millis() as u64,
            used_fraction: self.used_fraction(),
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_reports_nonzero_cpu_and_memory() {
        let monitor = MemoryMonitor::new();
        assert!(monitor.cpu_count() >= 1);
        assert!(monitor.total_memory_bytes() > 0);
    }

    #[test]
    fn test_wait_until_clear_returns_immediately_when_cancelled() {
        let monitor = MemoryMonitor::new();
        let cancelled = AtomicBool::new(true);
        let start = Instant::now();
        monitor.wait_until_clear(&cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sample_fraction_in_unit_range() {
        let monitor = MemoryMonitor::new();
        let sample = monitor.sample(Duration::from_secs(1));
        assert!(sample.used_fraction >= 0.0);
        assert!(sample.used_fraction <= 1.5);
    }
}
