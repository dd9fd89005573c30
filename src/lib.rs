pub mod ntp;
pub mod dst;
pub mod clock;
pub mod traits;
pub mod controller;
pub mod client;
pub mod status;
pub mod config;
pub mod net;

pub use client::NtpClient;
pub use controller::{Event, SyncController};
pub use dst::DstZone;
pub use status::{FailureReason, Phase, SyncStatus};
