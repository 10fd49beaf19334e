//! Network scanning module.
//!
//! Discovers live hosts on a local IPv4 subnet using:
//! - Candidate enumeration from address + mask
//! - ICMP ping per candidate under a concurrency bound
//! - ARP / neighbor table resolution for MAC addresses
//! - MAC OUI vendor lookup
//! - Rule-based device classification, optionally helped by OS hints and
//!   port exposure

pub mod arp;
pub mod classify;
pub mod engine;
pub mod exposure;
pub mod fingerprint;
pub mod oui;
pub mod ping;
pub mod privileges;
pub mod range;

pub use arp::{LinkLayerResolver, NeighborTableResolver};
pub use classify::{DeviceClassifier, VendorRule, VendorRules};
pub use engine::{ScanEngine, ScanOptions, ScanSession};
pub use exposure::{ExposureProbe, ExposureRisk, ExposureSummary, TcpConnectProbe};
pub use fingerprint::{NmapFingerprinter, OsFamily, OsFingerprinter, TtlFingerprinter};
pub use oui::VendorTable;
pub use ping::{ProbeReport, ReachabilityProbe, SystemPing};
pub use privileges::ScanCapabilities;
pub use range::NetworkRange;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;

/// Sentinel for a MAC address or vendor that could not be determined
pub const UNKNOWN: &str = "Unknown";

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub fn hidden_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostStatus {
    Active,
    Inactive,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Active => write!(f, "Active"),
            HostStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

/// Outcome for one host. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub ip: Ipv4Addr,
    pub status: HostStatus,
    /// `AA:BB:CC:DD:EE:FF` or `"Unknown"`
    pub mac: String,
    /// Vendor from the OUI table or `"Unknown"`
    pub vendor: String,
    pub device_type: String,
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_hint: Option<OsFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<ExposureSummary>,
}

impl ScanResult {
    pub fn is_active(&self) -> bool {
        self.status == HostStatus::Active
    }
}

/// Progress update emitted each time a host finishes, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub ip: Ipv4Addr,
    pub status: HostStatus,
    /// `completed * 100 / total`, rounded down; 100 only once every host is done
    pub percent: u8,
    pub completed: usize,
    pub total: usize,
}

/// Lifecycle of a scan on an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Running => write!(f, "running"),
            ScanState::Completed => write!(f, "completed"),
            ScanState::Cancelled => write!(f, "cancelled"),
            ScanState::Failed => write!(f, "failed"),
        }
    }
}

/// Final outcome of a scan session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// `Completed` or `Cancelled`
    pub state: ScanState,
    pub network: String,
    pub local_address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub hosts_total: usize,
    pub hosts_scanned: usize,
    /// Active hosts in completion order
    pub results: Vec<ScanResult>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Item of a session's event stream. `Finished` is always last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Progress(ScanProgress),
    Finished(ScanReport),
}
