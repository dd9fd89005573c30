//! NTP client facade: validated configuration, event entry points and
//! read accessors over the [`SyncController`].

use anyhow::Result;
use chrono::DateTime;
use log::info;
use crate::clock::{WallClock, SECS_PER_HOUR, SECS_PER_MIN};
use crate::config::{validate_server_name, validate_time_zone, validate_timeout, ClientConfig};
use crate::controller::{Event, SyncController, SyncObserver};
use crate::dst::{self, DstZone};
use crate::status::{Phase, StatusReport, SyncStatus};
use crate::traits::{Resolver, Timer, Transport};

pub struct NtpClient<R, T, M, C>
where
    R: Resolver,
    T: Transport,
    M: Timer,
    C: WallClock,
{
    controller: SyncController<R, T, M, C>,
}

impl<R, T, M, C> NtpClient<R, T, M, C>
where
    R: Resolver,
    T: Transport,
    M: Timer,
    C: WallClock,
{
    pub fn new(resolver: R, transport: T, timer: M, clock: C) -> Self {
        NtpClient {
            controller: SyncController::new(
                resolver,
                transport,
                timer,
                clock,
                ClientConfig::default(),
            ),
        }
    }

    /// Builds a client from a complete configuration. Intervals below the
    /// floor are raised to it; any other out-of-range field rejects the whole
    /// configuration.
    pub fn from_config(
        resolver: R,
        transport: T,
        timer: M,
        clock: C,
        mut config: ClientConfig,
    ) -> Result<Self> {
        config.floor_intervals();
        config.validate()?;
        Ok(NtpClient {
            controller: SyncController::new(resolver, transport, timer, clock, config),
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Configures server and zone, then arms the first sync after the short
    /// interval. Nothing changes if any argument is invalid.
    pub fn begin(
        &mut self,
        server: &str,
        tz_hours: i8,
        tz_minutes: i8,
        dst_zone: DstZone,
    ) -> Result<()> {
        validate_server_name(server)?;
        validate_time_zone(tz_hours, tz_minutes)?;

        let config = self.controller.config_mut();
        config.server = server.to_string();
        config.tz_hours = tz_hours;
        config.tz_minutes = tz_minutes;
        config.dst_zone = dst_zone;

        self.controller.begin();
        Ok(())
    }

    /// Begins with whatever configuration the client already holds.
    pub fn begin_configured(&mut self) {
        self.controller.begin();
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    /// Run a sync cycle now instead of waiting for the timer.
    pub fn process_start(&mut self) {
        self.controller.start();
    }

    pub fn handle_event(&mut self, event: Event) {
        self.controller.handle_event(event);
    }

    pub fn on_ntp_sync_event(&mut self, observer: SyncObserver) {
        self.controller.set_observer(observer);
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    pub fn set_ntp_server_name(&mut self, server: &str) -> Result<()> {
        validate_server_name(server)?;
        self.controller.config_mut().server = server.to_string();
        Ok(())
    }

    pub fn get_ntp_server_name(&self) -> &str {
        &self.controller.config().server
    }

    /// Changing the zone after a sync shifts the held time by the difference.
    pub fn set_time_zone(&mut self, hours: i8, minutes: i8) -> Result<()> {
        validate_time_zone(hours, minutes)?;

        let config = self.controller.config();
        let delta = (hours as i64 - config.tz_hours as i64) * SECS_PER_HOUR
            + (minutes as i64 - config.tz_minutes as i64) * SECS_PER_MIN;
        self.controller.shift_time(delta);

        let config = self.controller.config_mut();
        config.tz_hours = hours;
        config.tz_minutes = minutes;
        info!("Time zone set to {:+}h {:+}m", hours, minutes);
        Ok(())
    }

    pub fn get_time_zone(&self) -> i8 {
        self.controller.config().tz_hours
    }

    pub fn get_time_zone_minutes(&self) -> i8 {
        self.controller.config().tz_minutes
    }

    /// Switching rule-set after a sync moves the clock by an hour when the
    /// switch changes whether "now" is summer time.
    pub fn set_dst_zone(&mut self, zone: DstZone) {
        let old = self.controller.config().dst_zone;
        if old == zone {
            return;
        }

        if self.controller.last_sync() > 0 {
            let now = self.controller.clock().now();
            let tz_hours = self.controller.config().tz_hours;
            let was = dst::is_dst_at(now, tz_hours, old) as i64;
            let will = dst::is_dst_at(now, tz_hours, zone) as i64;
            self.controller.shift_time((will - was) * SECS_PER_HOUR);
        }

        self.controller.config_mut().dst_zone = zone;
        info!("DST zone set to {}", zone);
    }

    pub fn get_dst_zone(&self) -> DstZone {
        self.controller.config().dst_zone
    }

    /// Long interval only. Values below the floor are raised to it.
    pub fn set_interval(&mut self, long_secs: u32) {
        self.controller.set_long_interval(long_secs);
    }

    /// Values below the floor are raised to it, never rejected.
    pub fn set_intervals(&mut self, short_secs: u32, long_secs: u32) {
        self.controller.set_intervals(short_secs, long_secs);
    }

    pub fn get_interval(&self) -> u32 {
        self.controller.config().long_interval_secs
    }

    pub fn get_short_interval(&self) -> u32 {
        self.controller.config().short_interval_secs
    }

    pub fn get_long_interval(&self) -> u32 {
        self.get_interval()
    }

    /// Interval the next automatic cycle was armed with, 0 when stopped.
    pub fn get_next_interval(&self) -> u32 {
        self.controller.next_interval()
    }

    pub fn set_ntp_timeout(&mut self, milliseconds: u16) -> Result<()> {
        validate_timeout(milliseconds)?;
        self.controller.config_mut().timeout_ms = milliseconds;
        Ok(())
    }

    pub fn get_ntp_timeout(&self) -> u16 {
        self.controller.config().timeout_ms
    }

    pub fn config(&self) -> &ClientConfig {
        self.controller.config()
    }

    // ========================================================================
    // STATUS AND TIME
    // ========================================================================

    pub fn get_status(&self) -> SyncStatus {
        self.controller.status()
    }

    pub fn get_phase(&self) -> Phase {
        self.controller.phase()
    }

    pub fn status_report(&self) -> StatusReport {
        self.controller.report()
    }

    /// Local time of the last successful sync, 0 = never.
    pub fn get_last_ntp_sync(&self) -> i64 {
        self.controller.last_sync()
    }

    pub fn get_first_sync(&self) -> i64 {
        self.controller.first_sync()
    }

    pub fn now(&self) -> i64 {
        self.controller.clock().now()
    }

    pub fn is_summer_time(&self) -> bool {
        self.is_summer_time_period(self.now())
    }

    pub fn is_summer_time_period(&self, moment: i64) -> bool {
        let config = self.controller.config();
        dst::is_dst_at(moment, config.tz_hours, config.dst_zone)
    }

    pub fn get_time_str(&self) -> String {
        get_time_str_at(self.now())
    }

    pub fn get_date_str(&self) -> String {
        get_date_str_at(self.now())
    }

    pub fn get_time_date_string(&self) -> String {
        get_time_date_string_at(self.now())
    }
}

/// `HH:MM:SS`
pub fn get_time_str_at(moment: i64) -> String {
    format_moment(moment, "%H:%M:%S")
}

/// `DD/MM/YYYY`
pub fn get_date_str_at(moment: i64) -> String {
    format_moment(moment, "%d/%m/%Y")
}

/// `HH:MM:SS DD/MM/YYYY`
pub fn get_time_date_string_at(moment: i64) -> String {
    format_moment(moment, "%H:%M:%S %d/%m/%Y")
}

fn format_moment(moment: i64, fmt: &str) -> String {
    let dt = DateTime::from_timestamp(moment, 0).unwrap_or(DateTime::UNIX_EPOCH);
    dt.format(fmt).to_string()
}
