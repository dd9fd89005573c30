use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a sync cycle ended without a usable time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The resolver rejected the request outright.
    DnsUnreachable,
    /// Resolution completed without an address.
    AddressInvalid,
    /// Resolution did not complete within the DNS budget.
    DnsTimeout,
    /// The transport could not be opened towards the server.
    NoTransportResponse,
    /// The request datagram could not be sent.
    SendError,
    /// Undersized response or zero transmit timestamp.
    MalformedResponse,
    /// No response before the configured timeout.
    ResponseTimeout,
}

/// Outcome of the most recent sync cycle.
///
/// `NotSynced` only exists before the first cycle completes; the observer only
/// ever receives `Synced` or `Unsynced`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum SyncStatus {
    #[default]
    NotSynced,
    Synced,
    Unsynced(FailureReason),
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }

    /// Compact numeric code: 0 synced, -1 not yet synced, below -1 failures.
    pub fn code(&self) -> i8 {
        match self {
            SyncStatus::Synced => 0,
            SyncStatus::NotSynced => -1,
            SyncStatus::Unsynced(reason) => match reason {
                FailureReason::DnsUnreachable => -2,
                FailureReason::AddressInvalid => -3,
                FailureReason::DnsTimeout => -4,
                FailureReason::NoTransportResponse => -5,
                FailureReason::SendError => -6,
                FailureReason::MalformedResponse => -7,
                FailureReason::ResponseTimeout => -8,
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::DnsUnreachable => "DNS unreachable",
            FailureReason::AddressInvalid => "Server address invalid",
            FailureReason::DnsTimeout => "DNS timeout",
            FailureReason::NoTransportResponse => "No response from transport",
            FailureReason::SendError => "Error sending request",
            FailureReason::MalformedResponse => "Wrong response received",
            FailureReason::ResponseTimeout => "NTP response timeout",
        };
        f.write_str(text)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::NotSynced => f.write_str("Time not synchronized"),
            SyncStatus::Synced => f.write_str("Time synchronized correctly"),
            SyncStatus::Unsynced(reason) => write!(f, "Time not synchronized: {}", reason),
        }
    }
}

/// Where the state machine is inside a cycle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Idle,
    ResolvingAddress,
    AwaitingResponse,
}

/// Snapshot for reporting, e.g. the binary's JSON output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub status: SyncStatus,
    pub phase: Phase,
    /// Local epoch seconds of the last successful sync, 0 = never
    pub last_sync: i64,
    pub first_sync: i64,
    /// Seconds until the next automatic cycle, 0 = stopped
    pub next_interval_secs: u32,
    pub server: String,
}
