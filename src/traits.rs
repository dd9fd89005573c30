use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Identifies one pending hostname resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolveToken(pub u32);

/// Immediate answer from a resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Address known without waiting (cache hit, literal IP).
    Ready(IpAddr),
    /// Answer arrives later as `Event::Resolved` carrying this token.
    Pending(ResolveToken),
}

/// What an armed timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Start the next sync cycle.
    Trigger,
    ResolveTimeout,
    ResponseTimeout,
}

/// Handed to the timer when armed and given back when it fires. Generations
/// make a fire from an earlier arm distinguishable from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub generation: u32,
}

#[cfg_attr(test, mockall::automock)]
pub trait Resolver {
    /// Start resolving `name`. `Err` means the resolver refused the request.
    fn resolve(&mut self, name: &str) -> Result<Resolution>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Open the datagram endpoint towards `peer`.
    fn connect(&mut self, peer: SocketAddr) -> Result<()>;

    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Release the endpoint. Must be safe to call when nothing is open.
    fn close(&mut self);
}

/// A single fire-once timer slot.
#[cfg_attr(test, mockall::automock)]
pub trait Timer {
    /// Fire `token` once after `delay`, replacing any previous arm.
    fn arm_once(&mut self, delay: Duration, token: TimerToken);

    fn cancel(&mut self);
}
