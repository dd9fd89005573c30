use crate::dst::DstZone;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org";
pub const SERVER_NAME_LENGTH: usize = 40;

pub const DEFAULT_LONG_INTERVAL_SECS: u32 = 1800; // 30 minutes once synced
pub const DEFAULT_SHORT_INTERVAL_SECS: u32 = 15; // until first sync / after a failure
pub const MIN_INTERVAL_SECS: u32 = 10;

pub const DEFAULT_NTP_TIMEOUT_MS: u16 = 1500;
pub const MIN_NTP_TIMEOUT_MS: u16 = 100;
pub const DNS_TIMEOUT_MS: u64 = 5000;

pub const MIN_TZ_HOURS: i8 = -12;
pub const MAX_TZ_HOURS: i8 = 14;
pub const MAX_TZ_MINUTES: i8 = 59;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub tz_hours: i8,
    pub tz_minutes: i8,
    pub dst_zone: DstZone,
    pub short_interval_secs: u32,
    pub long_interval_secs: u32,
    pub timeout_ms: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server: DEFAULT_NTP_SERVER.to_string(),
            tz_hours: 0,
            tz_minutes: 0,
            dst_zone: DstZone::None,
            short_interval_secs: DEFAULT_SHORT_INTERVAL_SECS,
            long_interval_secs: DEFAULT_LONG_INTERVAL_SECS,
            timeout_ms: DEFAULT_NTP_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Loads a JSON config file. Missing fields take their defaults, intervals
    /// below the floor are raised to it, anything else out of range is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: ClientConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.floor_intervals();
        config.validate()?;
        Ok(config)
    }

    /// Raises both intervals to the floor.
    pub fn floor_intervals(&mut self) {
        self.short_interval_secs = floor_interval(self.short_interval_secs);
        self.long_interval_secs = floor_interval(self.long_interval_secs);
    }

    pub fn validate(&self) -> Result<()> {
        validate_server_name(&self.server)?;
        validate_time_zone(self.tz_hours, self.tz_minutes)?;
        validate_timeout(self.timeout_ms)?;
        Ok(())
    }

    /// Offset added to UTC to get local standard time.
    pub fn utc_offset_secs(&self) -> i64 {
        self.tz_hours as i64 * 3600 + self.tz_minutes as i64 * 60
    }
}

pub fn validate_server_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > SERVER_NAME_LENGTH {
        bail!("NTP server name must be 1..={} bytes, got {}", SERVER_NAME_LENGTH, name.len());
    }
    Ok(())
}

pub fn validate_time_zone(hours: i8, minutes: i8) -> Result<()> {
    if !(MIN_TZ_HOURS..=MAX_TZ_HOURS).contains(&hours) {
        bail!("Time zone hours {} outside {}..={}", hours, MIN_TZ_HOURS, MAX_TZ_HOURS);
    }
    if !(-MAX_TZ_MINUTES..=MAX_TZ_MINUTES).contains(&minutes) {
        bail!("Time zone minutes {} outside -{}..={}", minutes, MAX_TZ_MINUTES, MAX_TZ_MINUTES);
    }
    Ok(())
}

pub fn validate_timeout(ms: u16) -> Result<()> {
    if ms < MIN_NTP_TIMEOUT_MS {
        bail!("NTP timeout {}ms below minimum {}ms", ms, MIN_NTP_TIMEOUT_MS);
    }
    Ok(())
}

/// Intervals are never rejected, just raised to the floor.
pub fn floor_interval(secs: u32) -> u32 {
    secs.max(MIN_INTERVAL_SECS)
}
