//! Sync Controller - the periodic NTP synchronization state machine
//!
//! One cycle runs: resolve server name → send request → wait for a response
//! (or a timeout) → decode → reschedule. Everything is driven by events the
//! embedding loop feeds in through [`SyncController::handle_event`].
//!
//! Invariants:
//! - At most one timer is armed and at most one network operation is
//!   outstanding at any time. A timer is always cancelled before re-arming.
//! - Events that do not match the current phase or the current timer
//!   generation are dropped.
//! - Every finished cycle notifies the observer exactly once, then schedules
//!   the next cycle: long interval after success, short interval after failure.

use log::{debug, info, trace, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use crate::clock::{WallClock, SECS_PER_HOUR};
use crate::config::{floor_interval, ClientConfig, DNS_TIMEOUT_MS};
use crate::dst;
use crate::ntp::{self, NTP_PORT};
use crate::status::{FailureReason, Phase, StatusReport, SyncStatus};
use crate::traits::{Resolution, ResolveToken, Resolver, Timer, TimerKind, TimerToken, Transport};

/// Receives the outcome of every completed cycle.
pub type SyncObserver = Box<dyn FnMut(SyncStatus)>;

/// Inputs from the collaborators, delivered by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Timer(TimerToken),
    Resolved { token: ResolveToken, addr: Option<IpAddr> },
    Datagram { payload: Vec<u8>, peer: SocketAddr },
}

/// Lives only while a resolution or a round-trip is outstanding.
#[derive(Debug, Default)]
struct PendingRequest {
    resolve_token: Option<ResolveToken>,
    server_addr: Option<IpAddr>,
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

pub struct SyncController<R, T, M, C>
where
    R: Resolver,
    T: Transport,
    M: Timer,
    C: WallClock,
{
    // Collaborators
    resolver: R,
    transport: T,
    timer: M,
    clock: C,
    config: ClientConfig,

    // Cycle state
    phase: Phase,
    pending: Option<PendingRequest>,
    armed: Option<TimerToken>,
    timer_generation: u32,
    transport_open: bool,

    // Results
    status: SyncStatus,
    last_sync: i64,
    first_sync: i64,

    /// Seconds until the next automatic cycle, 0 when stopped
    next_interval: u32,
    running: bool,

    observer: Option<SyncObserver>,
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl<R, T, M, C> SyncController<R, T, M, C>
where
    R: Resolver,
    T: Transport,
    M: Timer,
    C: WallClock,
{
    pub fn new(resolver: R, transport: T, timer: M, clock: C, config: ClientConfig) -> Self {
        SyncController {
            resolver,
            transport,
            timer,
            clock,
            config,
            phase: Phase::Idle,
            pending: None,
            armed: None,
            timer_generation: 0,
            transport_open: false,
            status: SyncStatus::NotSynced,
            last_sync: 0,
            first_sync: 0,
            next_interval: 0,
            running: false,
            observer: None,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_sync(&self) -> i64 {
        self.last_sync
    }

    pub fn first_sync(&self) -> i64 {
        self.first_sync
    }

    pub fn next_interval(&self) -> u32 {
        self.next_interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Token of the currently armed timer, if any.
    pub fn armed_timer(&self) -> Option<TimerToken> {
        self.armed
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn set_observer(&mut self, observer: SyncObserver) {
        self.observer = Some(observer);
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            phase: self.phase,
            last_sync: self.last_sync,
            first_sync: self.first_sync,
            next_interval_secs: self.next_interval,
            server: self.config.server.clone(),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Forget previous results and arm the first cycle after the short interval.
    pub fn begin(&mut self) {
        self.abort_cycle();
        self.status = SyncStatus::NotSynced;
        self.last_sync = 0;
        self.first_sync = 0;
        self.running = true;
        self.next_interval = self.config.short_interval_secs;
        self.arm(TimerKind::Trigger, secs(self.next_interval));
        info!(
            "Time sync started, server {}, first attempt in {}s",
            self.config.server, self.next_interval
        );
    }

    /// Cancels timers, releases the transport and disables automatic cycles.
    /// The last status is kept. Safe to call repeatedly and from any phase.
    pub fn stop(&mut self) {
        let was_running = self.running;
        self.abort_cycle();
        self.running = false;
        self.next_interval = 0;
        if was_running {
            info!("Time sync disabled");
        }
    }

    /// Start a cycle now. Ignored while a cycle is in flight.
    pub fn start(&mut self) {
        if self.phase != Phase::Idle {
            debug!("Sync busy ({:?}), start ignored", self.phase);
            return;
        }

        self.cancel_timer();
        self.phase = Phase::ResolvingAddress;
        self.pending = Some(PendingRequest::default());

        let server = self.config.server.clone();
        debug!("Resolving NTP server {}", server);

        match self.resolver.resolve(&server) {
            Ok(Resolution::Ready(addr)) => self.send_request(addr),
            Ok(Resolution::Pending(token)) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.resolve_token = Some(token);
                }
                self.arm(TimerKind::ResolveTimeout, Duration::from_millis(DNS_TIMEOUT_MS));
            }
            Err(e) => {
                warn!("DNS request for {} failed: {}", server, e);
                self.finish(SyncStatus::Unsynced(FailureReason::DnsUnreachable));
            }
        }
    }

    // ========================================================================
    // INTERVALS
    // ========================================================================

    /// Both intervals are raised to the floor rather than rejected.
    pub fn set_intervals(&mut self, short_secs: u32, long_secs: u32) {
        self.config.short_interval_secs = floor_interval(short_secs);
        self.config.long_interval_secs = floor_interval(long_secs);
        debug!(
            "Sync intervals set to {}s short, {}s long",
            self.config.short_interval_secs, self.config.long_interval_secs
        );
        self.reschedule();
    }

    /// Updates the long interval; takes effect immediately when synced.
    pub fn set_long_interval(&mut self, long_secs: u32) {
        let long_secs = floor_interval(long_secs);
        if long_secs == self.config.long_interval_secs {
            return;
        }
        self.config.long_interval_secs = long_secs;
        debug!("Sync interval set to {}s", long_secs);
        if self.status.is_synced() {
            self.reschedule();
        }
    }

    fn interval_for(&self, status: SyncStatus) -> u32 {
        if status.is_synced() {
            self.config.long_interval_secs
        } else {
            self.config.short_interval_secs
        }
    }

    /// Re-arm the trigger with the interval matching the current status. An
    /// in-flight cycle picks up the new interval when it finishes.
    fn reschedule(&mut self) {
        if !self.running {
            return;
        }
        self.next_interval = self.interval_for(self.status);
        if self.phase == Phase::Idle {
            self.arm(TimerKind::Trigger, secs(self.next_interval));
        }
    }

    /// Moves the held time by `delta_secs`, used when the zone changes after
    /// a sync so readers see the new offset without waiting for a resync.
    pub fn shift_time(&mut self, delta_secs: i64) {
        if self.last_sync <= 0 || delta_secs == 0 {
            return;
        }
        self.last_sync += delta_secs;
        if self.first_sync > 0 {
            self.first_sync += delta_secs;
        }
        self.clock.step(delta_secs);
        debug!("Clock shifted by {}s", delta_secs);
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Timer(token) => self.on_timer(token),
            Event::Resolved { token, addr } => self.on_resolved(token, addr),
            Event::Datagram { payload, peer } => self.on_datagram(&payload, peer),
        }
    }

    pub fn on_timer(&mut self, token: TimerToken) {
        if self.armed != Some(token) {
            debug!("Stale timer {:?} dropped", token);
            return;
        }
        self.armed = None;

        match (token.kind, self.phase) {
            (TimerKind::Trigger, Phase::Idle) => self.start(),
            (TimerKind::ResolveTimeout, Phase::ResolvingAddress) => {
                self.finish(SyncStatus::Unsynced(FailureReason::DnsTimeout));
            }
            (TimerKind::ResponseTimeout, Phase::AwaitingResponse) => {
                self.finish(SyncStatus::Unsynced(FailureReason::ResponseTimeout));
            }
            (kind, phase) => warn!("Timer {:?} fired in phase {:?}, ignored", kind, phase),
        }
    }

    pub fn on_resolved(&mut self, token: ResolveToken, addr: Option<IpAddr>) {
        let expected = self.pending.as_ref().and_then(|p| p.resolve_token);
        if self.phase != Phase::ResolvingAddress || expected != Some(token) {
            debug!("Stale DNS answer {:?} dropped", token);
            return;
        }

        self.cancel_timer();
        match addr {
            Some(addr) => self.send_request(addr),
            None => {
                warn!("DNS returned no address for {}", self.config.server);
                self.finish(SyncStatus::Unsynced(FailureReason::AddressInvalid));
            }
        }
    }

    pub fn on_datagram(&mut self, payload: &[u8], peer: SocketAddr) {
        if self.phase != Phase::AwaitingResponse {
            debug!("Unrequested response from {} dropped", peer);
            return;
        }
        trace!(
            "NTP response from {}, {} bytes:\n{}",
            peer,
            payload.len(),
            ntp::hex_dump(payload)
        );

        self.cancel_timer();
        match self.decode_local_time(payload) {
            Some(local) => {
                self.last_sync = local;
                if self.first_sync == 0 {
                    self.first_sync = local;
                }
                self.clock.set(local);
                info!("Successful NTP sync at {}", local);
                self.finish(SyncStatus::Synced);
            }
            None => {
                warn!("Invalid NTP response from {} ({} bytes)", peer, payload.len());
                self.finish(SyncStatus::Unsynced(FailureReason::MalformedResponse));
            }
        }
    }

    // ========================================================================
    // CYCLE STEPS
    // ========================================================================

    fn send_request(&mut self, addr: IpAddr) {
        if addr.is_unspecified() {
            warn!("DNS returned unusable address {}", addr);
            self.finish(SyncStatus::Unsynced(FailureReason::AddressInvalid));
            return;
        }

        self.phase = Phase::AwaitingResponse;
        if let Some(pending) = self.pending.as_mut() {
            pending.server_addr = Some(addr);
        }

        let peer = SocketAddr::new(addr, NTP_PORT);
        // A failed connect may still hold resources, release it in finish()
        self.transport_open = true;
        if let Err(e) = self.transport.connect(peer) {
            warn!("Cannot open transport to {}: {}", peer, e);
            self.finish(SyncStatus::Unsynced(FailureReason::NoTransportResponse));
            return;
        }

        let request = ntp::build_request();
        if let Err(e) = self.transport.send(&request) {
            warn!("Failed to send NTP request to {}: {}", peer, e);
            self.finish(SyncStatus::Unsynced(FailureReason::SendError));
            return;
        }

        debug!("NTP request sent to {}", peer);
        self.arm(TimerKind::ResponseTimeout, Duration::from_millis(self.config.timeout_ms as u64));
    }

    /// Response → local time with zone offset and DST applied.
    fn decode_local_time(&self, payload: &[u8]) -> Option<i64> {
        let standard = ntp::decode_response(payload, self.config.utc_offset_secs())?;
        if dst::is_dst_at(standard, self.config.tz_hours, self.config.dst_zone) {
            Some(standard + SECS_PER_HOUR)
        } else {
            Some(standard)
        }
    }

    fn finish(&mut self, status: SyncStatus) {
        let server_addr = self.pending.as_ref().and_then(|p| p.server_addr);
        self.abort_cycle();
        self.status = status;

        match status {
            SyncStatus::Synced => info!("{}", status),
            _ => warn!("{} (server {}, address {:?})", status, self.config.server, server_addr),
        }

        if self.running {
            self.next_interval = self.interval_for(status);
            self.arm(TimerKind::Trigger, secs(self.next_interval));
            debug!("Next sync in {}s", self.next_interval);
        }

        if let Some(observer) = self.observer.as_mut() {
            observer(status);
        }
    }

    /// Drops the pending request, its timer and the transport.
    fn abort_cycle(&mut self) {
        self.cancel_timer();
        if self.transport_open {
            self.transport.close();
            self.transport_open = false;
        }
        self.pending = None;
        self.phase = Phase::Idle;
    }

    // ========================================================================
    // TIMER SLOT
    // ========================================================================

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel_timer();
        self.timer_generation = self.timer_generation.wrapping_add(1);
        let token = TimerToken { kind, generation: self.timer_generation };
        self.timer.arm_once(delay, token);
        self.armed = Some(token);
        trace!("Armed {:?} for {:?}", token, delay);
    }

    fn cancel_timer(&mut self) {
        if self.armed.take().is_some() {
            self.timer.cancel();
        }
    }
}

fn secs(interval: u32) -> Duration {
    Duration::from_secs(interval as u64)
}

// ============================================================================
// TESTS
// ============================================================================
