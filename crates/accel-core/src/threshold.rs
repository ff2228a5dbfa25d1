use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide detection confidence threshold.
///
/// A single f32 stored as raw bits so readers on the inference path never
/// take a lock. Seeded at startup from configuration and mutated by the
/// config-request command.
pub struct DetectionThreshold {
    bits: AtomicU32,
}

impl DetectionThreshold {
    pub fn new(initial: f32) -> Self {
        Self {
            bits: AtomicU32::new(initial.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for DetectionThreshold {
    fn default() -> Self {
        Self::new(0.5)
    }
}
