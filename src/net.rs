//! Std-backed collaborators for running the client in a plain event loop.
//!
//! The handles are cheap clones over shared single-threaded state: the
//! controller owns one clone, the loop polls another.

use anyhow::{anyhow, Context, Result};
use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::cell::{Cell, RefCell};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crate::controller::Event;
use crate::traits::{Resolution, ResolveToken, Resolver, Timer, TimerToken, Transport};

const RECV_BUFFER_SIZE: usize = 512;

// ============================================================================
// RESOLVER
// ============================================================================

/// Resolves on a short-lived thread and posts `Event::Resolved` to the loop.
/// IP literals resolve immediately.
///
/// At most one lookup thread runs at a time. A request made while the
/// previous lookup is still blocked in the system resolver is refused.
pub struct ThreadResolver {
    events: Sender<Event>,
    next_token: u32,
    lookup: Option<JoinHandle<()>>,
}

impl ThreadResolver {
    pub fn new(events: Sender<Event>) -> Self {
        ThreadResolver { events, next_token: 0, lookup: None }
    }

    /// True while a lookup thread has not returned yet.
    pub fn is_busy(&self) -> bool {
        self.lookup.as_ref().map_or(false, |handle| !handle.is_finished())
    }
}

impl Resolver for ThreadResolver {
    fn resolve(&mut self, name: &str) -> Result<Resolution> {
        if let Ok(addr) = name.parse::<IpAddr>() {
            return Ok(Resolution::Ready(addr));
        }

        if self.is_busy() {
            return Err(anyhow!("Previous lookup still running"));
        }
        if let Some(handle) = self.lookup.take() {
            let _ = handle.join();
        }

        self.next_token = self.next_token.wrapping_add(1);
        let token = ResolveToken(self.next_token);
        let events = self.events.clone();
        let host = name.to_string();

        let handle = thread::Builder::new()
            .name("dns".to_string())
            .spawn(move || {
                let addr = lookup(&host);
                // Receiver gone means the loop has exited
                let _ = events.send(Event::Resolved { token, addr });
            })
            .context("Failed to spawn resolver thread")?;
        self.lookup = Some(handle);

        Ok(Resolution::Pending(token))
    }
}

/// First IPv4 address for `host`, else the first of any family.
fn lookup(host: &str) -> Option<IpAddr> {
    match (host, 0).to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            addrs.iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .map(|a| a.ip())
        }
        Err(e) => {
            debug!("Lookup of {} failed: {}", host, e);
            None
        }
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Connected non-blocking UDP socket, reopened for every request.
#[derive(Clone, Default)]
pub struct UdpTransport {
    socket: Rc<RefCell<Option<UdpSocket>>>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.socket.borrow().is_some()
    }

    /// Non-blocking receive. `Ok(None)` when closed or nothing is queued.
    pub fn poll_recv(&self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let socket = self.socket.borrow();
        let socket = match socket.as_ref() {
            Some(s) => s,
            None => return Ok(None),
        };

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        match socket.recv_from(&mut buf) {
            Ok((size, peer)) => Ok(Some((buf[..size].to_vec(), peer))),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, peer: SocketAddr) -> Result<()> {
        self.close();

        let (domain, local): (Domain, SocketAddr) = match peer {
            SocketAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
            SocketAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&local.into())?;
        socket.connect(&peer.into())
            .with_context(|| format!("Failed to connect UDP socket to {}", peer))?;
        socket.set_nonblocking(true)?;

        *self.socket.borrow_mut() = Some(socket.into());
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let socket = self.socket.borrow();
        let socket = socket.as_ref().ok_or_else(|| anyhow!("Transport not connected"))?;
        let sent = socket.send(payload)?;
        if sent != payload.len() {
            return Err(anyhow!("Short send: {} of {} bytes", sent, payload.len()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.socket.borrow_mut().take();
    }
}

// ============================================================================
// TIMER
// ============================================================================

/// Single deadline polled by the loop.
#[derive(Clone, Default)]
pub struct DeadlineTimer {
    armed: Rc<Cell<Option<(Instant, TimerToken)>>>,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the token if its deadline has passed.
    pub fn poll_expired(&self, now: Instant) -> Option<TimerToken> {
        match self.armed.get() {
            Some((deadline, token)) if now >= deadline => {
                self.armed.set(None);
                Some(token)
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.get().map(|(deadline, _)| deadline)
    }
}

impl Timer for DeadlineTimer {
    fn arm_once(&mut self, delay: Duration, token: TimerToken) {
        self.armed.set(Some((Instant::now() + delay, token)));
    }

    fn cancel(&mut self) {
        self.armed.set(None);
    }
}
