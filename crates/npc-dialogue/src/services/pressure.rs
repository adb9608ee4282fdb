use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

/// System memory probe. The host polls it and forwards the verdict to the
/// compression coordinator; the coordinator never measures on its own.
pub struct MemoryPressureProbe {
    system: Mutex<System>,
    threshold: f64,
}

impl MemoryPressureProbe {
    pub fn new(threshold: f64) -> Self {
        Self {
            system: Mutex::new(System::new()),
            threshold: threshold.clamp(0.01, 1.0),
        }
    }

    /// Used / total memory, 0.0..=1.0
    pub fn usage_ratio(&self) -> f64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        (sys.used_memory() as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn is_under_pressure(&self) -> bool {
        let ratio = self.usage_ratio();
        let hot = ratio >= self.threshold;
        if hot {
            debug!(
                "Memory usage at {:.2}% (threshold {:.0}%)",
                ratio * 100.0,
                self.threshold * 100.0
            );
        }
        hot
    }
}
