use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};
use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;
use ntpclock::clock::WallClock;
use ntpclock::traits::{Resolution, ResolveToken, Resolver, Timer, TimerKind, TimerToken, Transport};
use ntpclock::{DstZone, Event, FailureReason, NtpClient, Phase, SyncStatus};

// --- Simulated network and device ---

const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
const SEVENTY_YEARS: i64 = 2_208_988_800;

#[derive(Clone, Copy)]
enum DnsBehaviour {
    Immediate,
    Pending,
    Refuse,
}

struct World {
    dns: DnsBehaviour,
    next_resolve_token: u32,
    last_resolve_token: Option<ResolveToken>,
    resolve_calls: usize,

    connect_fails: bool,
    send_fails: bool,
    connected: Option<SocketAddr>,
    sent: Vec<Vec<u8>>,
    closes: usize,

    armed: Option<(Duration, TimerToken)>,
    cancels: usize,

    clock: i64,
}

impl World {
    fn new(dns: DnsBehaviour) -> Self {
        World {
            dns,
            next_resolve_token: 0,
            last_resolve_token: None,
            resolve_calls: 0,
            connect_fails: false,
            send_fails: false,
            connected: None,
            sent: Vec::new(),
            closes: 0,
            armed: None,
            cancels: 0,
            clock: 0,
        }
    }
}

type SharedWorld = Rc<RefCell<World>>;

struct SimResolver(SharedWorld);

impl Resolver for SimResolver {
    fn resolve(&mut self, _name: &str) -> Result<Resolution> {
        let mut world = self.0.borrow_mut();
        world.resolve_calls += 1;
        match world.dns {
            DnsBehaviour::Immediate => Ok(Resolution::Ready(SERVER_IP)),
            DnsBehaviour::Pending => {
                world.next_resolve_token += 1;
                let token = ResolveToken(world.next_resolve_token);
                world.last_resolve_token = Some(token);
                Ok(Resolution::Pending(token))
            }
            DnsBehaviour::Refuse => Err(anyhow!("resolver offline")),
        }
    }
}

struct SimTransport(SharedWorld);

impl Transport for SimTransport {
    fn connect(&mut self, peer: SocketAddr) -> Result<()> {
        let mut world = self.0.borrow_mut();
        if world.connect_fails {
            return Err(anyhow!("no route to host"));
        }
        world.connected = Some(peer);
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let mut world = self.0.borrow_mut();
        if world.send_fails {
            return Err(anyhow!("buffer full"));
        }
        world.sent.push(payload.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        let mut world = self.0.borrow_mut();
        world.connected = None;
        world.closes += 1;
    }
}

struct SimTimer(SharedWorld);

impl Timer for SimTimer {
    fn arm_once(&mut self, delay: Duration, token: TimerToken) {
        self.0.borrow_mut().armed = Some((delay, token));
    }

    fn cancel(&mut self) {
        let mut world = self.0.borrow_mut();
        world.armed = None;
        world.cancels += 1;
    }
}

struct SimClock(SharedWorld);

impl WallClock for SimClock {
    fn now(&self) -> i64 {
        self.0.borrow().clock
    }

    fn set(&mut self, epoch_secs: i64) {
        self.0.borrow_mut().clock = epoch_secs;
    }
}

type SimClient = NtpClient<SimResolver, SimTransport, SimTimer, SimClock>;

// --- Harness ---

struct Harness {
    world: SharedWorld,
    client: SimClient,
    events: Rc<RefCell<Vec<SyncStatus>>>,
}

impl Harness {
    fn new(dns: DnsBehaviour) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let world = Rc::new(RefCell::new(World::new(dns)));
        let mut client = NtpClient::new(
            SimResolver(world.clone()),
            SimTransport(world.clone()),
            SimTimer(world.clone()),
            SimClock(world.clone()),
        );

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        client.on_ntp_sync_event(Box::new(move |status| sink.borrow_mut().push(status)));

        Harness { world, client, events }
    }

    fn armed(&self) -> (Duration, TimerToken) {
        self.world.borrow().armed.expect("no timer armed")
    }

    /// Fire whatever timer is armed, as the timer service would.
    fn fire(&mut self) -> TimerToken {
        let (_, token) = self.world.borrow_mut().armed.take().expect("no timer armed");
        self.client.handle_event(Event::Timer(token));
        token
    }

    fn deliver(&mut self, payload: Vec<u8>) {
        let peer = SocketAddr::new(SERVER_IP, 123);
        self.client.handle_event(Event::Datagram { payload, peer });
    }

    fn events(&self) -> Vec<SyncStatus> {
        self.events.borrow().clone()
    }
}

fn ntp_response(unix_secs: i64) -> Vec<u8> {
    let mut buf = vec![0u8; 48];
    buf[0] = 0x24; // LI=0, VN=4, Mode=4
    buf[1] = 2;
    BigEndian::write_u32(&mut buf[40..44], (unix_secs + SEVENTY_YEARS) as u32);
    buf
}

// --- Scenarios ---

#[test]
fn test_happy_path_syncs_and_schedules_long_interval() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();

    let (delay, token) = h.armed();
    assert_eq!(delay, Duration::from_secs(15));
    assert_eq!(token.kind, TimerKind::Trigger);

    h.fire();
    assert_eq!(h.client.get_phase(), Phase::AwaitingResponse);
    {
        let world = h.world.borrow();
        assert_eq!(world.connected, Some(SocketAddr::new(SERVER_IP, 123)));
        assert_eq!(world.sent.len(), 1);
        assert_eq!(world.sent[0].len(), 48);
        assert_eq!(world.sent[0][0], 0xE3);
    }
    let (delay, token) = h.armed();
    assert_eq!(delay, Duration::from_millis(1500));
    assert_eq!(token.kind, TimerKind::ResponseTimeout);

    h.deliver(ntp_response(1_700_000_000));

    assert_eq!(h.events(), vec![SyncStatus::Synced]);
    assert_eq!(h.client.get_status(), SyncStatus::Synced);
    assert_eq!(h.client.get_phase(), Phase::Idle);
    assert_eq!(h.client.get_last_ntp_sync(), 1_700_000_000);
    assert_eq!(h.client.get_first_sync(), 1_700_000_000);
    assert_eq!(h.client.now(), 1_700_000_000);
    assert_eq!(h.client.get_next_interval(), 1800);
    let (delay, token) = h.armed();
    assert_eq!(delay, Duration::from_secs(1800));
    assert_eq!(token.kind, TimerKind::Trigger);
    assert!(h.world.borrow().connected.is_none());
    assert_eq!(h.client.get_time_date_string(), "22:13:20 14/11/2023");
}

#[test]
fn test_dns_timeout_then_late_answer_is_ignored() {
    let mut h = Harness::new(DnsBehaviour::Pending);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    assert_eq!(h.client.get_phase(), Phase::ResolvingAddress);
    let (delay, token) = h.armed();
    assert_eq!(delay, Duration::from_millis(5000));
    assert_eq!(token.kind, TimerKind::ResolveTimeout);

    h.fire();
    assert_eq!(h.events(), vec![SyncStatus::Unsynced(FailureReason::DnsTimeout)]);
    assert_eq!(h.client.get_next_interval(), 15);
    assert_eq!(h.armed().0, Duration::from_secs(15));

    let late = h.world.borrow().last_resolve_token.unwrap();
    h.client.handle_event(Event::Resolved { token: late, addr: Some(SERVER_IP) });

    assert_eq!(h.events().len(), 1);
    assert_eq!(h.client.get_phase(), Phase::Idle);
    assert!(h.world.borrow().connected.is_none());
    assert!(h.world.borrow().sent.is_empty());
}

#[test]
fn test_pending_dns_answer_continues_cycle() {
    let mut h = Harness::new(DnsBehaviour::Pending);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    let token = h.world.borrow().last_resolve_token.unwrap();
    // An answer for some other request is not ours
    h.client.handle_event(Event::Resolved {
        token: ResolveToken(token.0 + 100),
        addr: Some(SERVER_IP),
    });
    assert_eq!(h.client.get_phase(), Phase::ResolvingAddress);

    h.client.handle_event(Event::Resolved { token, addr: Some(SERVER_IP) });
    assert_eq!(h.client.get_phase(), Phase::AwaitingResponse);
    assert_eq!(h.armed().1.kind, TimerKind::ResponseTimeout);

    h.deliver(ntp_response(1_700_000_000));
    assert_eq!(h.events(), vec![SyncStatus::Synced]);
}

#[test]
fn test_null_address_is_invalid() {
    let mut h = Harness::new(DnsBehaviour::Pending);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    let token = h.world.borrow().last_resolve_token.unwrap();
    h.client.handle_event(Event::Resolved { token, addr: None });

    assert_eq!(h.events(), vec![SyncStatus::Unsynced(FailureReason::AddressInvalid)]);
    assert_eq!(h.client.get_next_interval(), 15);
}

#[test]
fn test_resolver_refusal_is_dns_unreachable() {
    let mut h = Harness::new(DnsBehaviour::Refuse);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    assert_eq!(h.events(), vec![SyncStatus::Unsynced(FailureReason::DnsUnreachable)]);
    assert_eq!(h.armed().0, Duration::from_secs(15));
}

#[test]
fn test_response_timeout_then_late_datagram_is_ignored() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    let timeout = h.fire();
    assert_eq!(timeout.kind, TimerKind::ResponseTimeout);
    assert_eq!(h.events(), vec![SyncStatus::Unsynced(FailureReason::ResponseTimeout)]);
    assert_eq!(h.client.get_next_interval(), 15);
    assert_eq!(h.world.borrow().closes, 1);

    h.deliver(ntp_response(1_700_000_000));
    h.client.handle_event(Event::Timer(timeout));

    assert_eq!(h.events().len(), 1);
    assert_eq!(h.client.get_status(), SyncStatus::Unsynced(FailureReason::ResponseTimeout));
    assert_eq!(h.client.get_last_ntp_sync(), 0);
    assert_eq!(h.armed().1.kind, TimerKind::Trigger);
}

#[test]
fn test_malformed_responses() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();

    h.fire();
    h.deliver(vec![0x24; 47]);

    h.fire();
    let mut zero = ntp_response(0);
    zero[40..44].copy_from_slice(&[0, 0, 0, 0]);
    h.deliver(zero);

    assert_eq!(h.events(), vec![
        SyncStatus::Unsynced(FailureReason::MalformedResponse),
        SyncStatus::Unsynced(FailureReason::MalformedResponse),
    ]);
    assert_eq!(h.client.get_last_ntp_sync(), 0);
    assert_eq!(h.client.get_next_interval(), 15);
}

#[test]
fn test_transport_failures() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();

    h.world.borrow_mut().connect_fails = true;
    h.fire();

    h.world.borrow_mut().connect_fails = false;
    h.world.borrow_mut().send_fails = true;
    h.fire();

    assert_eq!(h.events(), vec![
        SyncStatus::Unsynced(FailureReason::NoTransportResponse),
        SyncStatus::Unsynced(FailureReason::SendError),
    ]);
    assert_eq!(h.world.borrow().closes, 2);
    assert_eq!(h.client.get_phase(), Phase::Idle);
    assert_eq!(h.armed().0, Duration::from_secs(15));
}

#[test]
fn test_failure_then_recovery_switches_interval() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.client.set_intervals(30, 3600);

    h.fire();
    h.fire(); // response timeout
    assert_eq!(h.armed().0, Duration::from_secs(30));

    h.fire();
    h.deliver(ntp_response(1_700_000_000));
    assert_eq!(h.armed().0, Duration::from_secs(3600));
    assert_eq!(h.client.get_next_interval(), 3600);

    h.fire();
    h.fire(); // timeout again after a good sync
    assert_eq!(h.client.get_status(), SyncStatus::Unsynced(FailureReason::ResponseTimeout));
    assert_eq!(h.armed().0, Duration::from_secs(30));
    // The last good sync is kept
    assert_eq!(h.client.get_last_ntp_sync(), 1_700_000_000);
}

#[test]
fn test_busy_trigger_is_ignored() {
    let mut h = Harness::new(DnsBehaviour::Pending);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    let armed = h.armed();
    let cancels = h.world.borrow().cancels;
    h.client.process_start();

    assert_eq!(h.world.borrow().resolve_calls, 1);
    assert_eq!(h.world.borrow().cancels, cancels);
    assert_eq!(h.armed(), armed);
    assert!(h.events().is_empty());
}

#[test]
fn test_stop_mid_cycle_cancels_everything() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();
    let (_, response_timer) = h.armed();

    h.client.stop();
    h.client.stop();

    assert!(h.world.borrow().armed.is_none());
    assert!(h.world.borrow().connected.is_none());
    assert_eq!(h.client.get_next_interval(), 0);
    assert_eq!(h.client.get_phase(), Phase::Idle);
    assert_eq!(h.client.get_status(), SyncStatus::NotSynced);

    h.client.handle_event(Event::Timer(response_timer));
    h.deliver(ntp_response(1_700_000_000));
    assert!(h.events().is_empty());
    assert!(h.world.borrow().armed.is_none());
}

#[test]
fn test_stop_after_sync_keeps_status() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();
    h.deliver(ntp_response(1_700_000_000));

    h.client.stop();
    h.client.stop();

    assert_eq!(h.client.get_status(), SyncStatus::Synced);
    assert_eq!(h.events(), vec![SyncStatus::Synced]);
    assert_eq!(h.client.get_next_interval(), 0);
}

#[test]
fn test_time_zone_change_after_sync_shifts_clock() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 1, 0, DstZone::None).unwrap();
    h.fire();
    h.deliver(ntp_response(1_700_000_000));
    assert_eq!(h.client.get_last_ntp_sync(), 1_700_000_000 + 3600);

    h.client.set_time_zone(5, 30).unwrap();

    let expected = 1_700_000_000 + 5 * 3600 + 30 * 60;
    assert_eq!(h.client.get_last_ntp_sync(), expected);
    assert_eq!(h.client.now(), expected);
    // No resync was forced
    assert_eq!(h.world.borrow().sent.len(), 1);
    assert_eq!(h.armed().1.kind, TimerKind::Trigger);

    assert!(h.client.set_time_zone(20, 0).is_err());
    assert_eq!(h.client.get_last_ntp_sync(), expected);
}

#[test]
fn test_dst_applied_and_zone_switch_shifts_clock() {
    // 2024-07-01 10:00:00 UTC
    let utc = 1_719_828_000;
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 1, 0, DstZone::Eu).unwrap();
    h.fire();
    h.deliver(ntp_response(utc));

    assert_eq!(h.client.get_last_ntp_sync(), utc + 2 * 3600);
    assert_eq!(h.client.get_time_str(), "12:00:00");
    assert!(h.client.is_summer_time());

    h.client.set_dst_zone(DstZone::None);
    assert_eq!(h.client.now(), utc + 3600);
    assert_eq!(h.client.get_time_str(), "11:00:00");
}

#[test]
fn test_single_interval_reschedules_when_synced() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();

    // Not synced yet: the pending trigger keeps the short interval
    h.client.set_interval(600);
    assert_eq!(h.armed().0, Duration::from_secs(15));
    assert_eq!(h.client.get_long_interval(), 600);

    h.fire();
    h.deliver(ntp_response(1_700_000_000));
    assert_eq!(h.armed().0, Duration::from_secs(600));

    h.client.set_interval(120);
    assert_eq!(h.armed().0, Duration::from_secs(120));
    assert_eq!(h.client.get_next_interval(), 120);

    h.client.set_interval(5);
    assert_eq!(h.armed().0, Duration::from_secs(10));
}

#[test]
fn test_interval_floor() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.client.set_intervals(5, 5);

    assert_eq!(h.client.get_short_interval(), 10);
    assert_eq!(h.client.get_long_interval(), 10);
    assert_eq!(h.armed().0, Duration::from_secs(10));
}

#[test]
fn test_status_report_json() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();
    h.deliver(ntp_response(1_700_000_000));

    let json = serde_json::to_string(&h.client.status_report()).unwrap();
    assert!(json.contains("\"last_sync\":1700000000"));
    assert!(json.contains("\"synced\""));
    assert!(json.contains("pool.ntp.org"));
}

#[test]
fn test_interval_change_mid_cycle_applies_when_cycle_ends() {
    let mut h = Harness::new(DnsBehaviour::Immediate);
    h.client.begin("pool.ntp.org", 0, 0, DstZone::None).unwrap();
    h.fire();

    let in_flight = h.armed();
    let cancels = h.world.borrow().cancels;
    h.client.set_intervals(30, 600);

    // The response timeout stays armed untouched
    assert_eq!(h.armed(), in_flight);
    assert_eq!(in_flight.1.kind, TimerKind::ResponseTimeout);
    assert_eq!(h.world.borrow().cancels, cancels);
    assert_eq!(h.client.get_phase(), Phase::AwaitingResponse);

    h.deliver(ntp_response(1_700_000_000));
    let (delay, token) = h.armed();
    assert_eq!(delay, Duration::from_secs(600));
    assert_eq!(token.kind, TimerKind::Trigger);

    // A cycle that ends in a failure picks up the change the same way
    h.fire();
    h.client.set_intervals(45, 900);
    assert_eq!(h.armed().1.kind, TimerKind::ResponseTimeout);
    h.fire();
    assert_eq!(h.client.get_status(), SyncStatus::Unsynced(FailureReason::ResponseTimeout));
    assert_eq!(h.armed().0, Duration::from_secs(45));
    assert_eq!(h.client.get_next_interval(), 45);
}
