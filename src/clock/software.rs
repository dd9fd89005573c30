use super::WallClock;
use std::time::Instant;

/// Free-running clock: a base epoch captured at the last `set`, advanced by
/// the monotonic clock. Reads 0 until first set.
pub struct SoftwareClock {
    base_secs: i64,
    base_instant: Instant,
    is_set: bool,
}

impl SoftwareClock {
    pub fn new() -> Self {
        SoftwareClock {
            base_secs: 0,
            base_instant: Instant::now(),
            is_set: false,
        }
    }

    pub fn is_set(&self) -> bool {
        self.is_set
    }
}

impl Default for SoftwareClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SoftwareClock {
    fn now(&self) -> i64 {
        if !self.is_set {
            return 0;
        }
        self.base_secs + self.base_instant.elapsed().as_secs() as i64
    }

    fn set(&mut self, epoch_secs: i64) {
        self.base_secs = epoch_secs;
        self.base_instant = Instant::now();
        self.is_set = true;
    }
}
