use chrono::{DateTime, Datelike, Timelike};

mod software;

pub use software::SoftwareClock;

pub const SECS_PER_MIN: i64 = 60;
pub const SECS_PER_HOUR: i64 = 3600;

/// Wall-clock storage for the synchronized local time.
#[cfg_attr(test, mockall::automock)]
pub trait WallClock {
    /// Current local time in epoch seconds.
    fn now(&self) -> i64;

    /// Replace the current local time.
    fn set(&mut self, epoch_secs: i64);

    /// Shift the current time by `delta_secs`.
    fn step(&mut self, delta_secs: i64) {
        let now = self.now();
        self.set(now + delta_secs);
    }
}

/// Calendar breakdown of an epoch moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// 1 = Sunday ... 7 = Saturday
    pub weekday: u32,
}

/// Breaks an epoch moment into calendar fields. The moment is read as-is:
/// local offsets are expected to be applied already.
pub fn civil_from_epoch(epoch_secs: i64) -> CivilTime {
    let dt = DateTime::from_timestamp(epoch_secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
    CivilTime {
        year: dt.year(),
        month: dt.month(),
        day: dt.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
        weekday: dt.weekday().number_from_sunday(),
    }
}
