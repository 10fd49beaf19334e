//! Best-effort OS fingerprint hints
//!
//! Hints are only consulted by the classifier when no vendor rule matched.
//! Neither implementation is authoritative; any failure simply yields no hint.

use super::hidden_command;
use super::ping::ProbeReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
    NetworkDevice,
}

impl OsFamily {
    /// Device label used when the OS family is the only signal.
    pub fn device_label(self) -> &'static str {
        match self {
            OsFamily::Linux | OsFamily::NetworkDevice => "Router/Server",
            OsFamily::Windows | OsFamily::MacOs => "Computer",
            OsFamily::Android | OsFamily::Ios => "Phone",
        }
    }

    /// Guess from the initial TTL of an echo reply.
    ///
    /// Common defaults: 64 for Linux/Unix/macOS, 128 for Windows, 255 for
    /// network gear. Hops only ever lower the value.
    pub fn from_ttl(ttl: u8) -> Option<Self> {
        match ttl {
            0 => None,
            1..=64 => Some(OsFamily::Linux),
            65..=128 => Some(OsFamily::Windows),
            129..=255 => Some(OsFamily::NetworkDevice),
        }
    }

    /// Guess from a free-form OS description such as nmap's `OS details`.
    pub fn from_description(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        let network_gear = [
            "routeros", "cisco", "juniper", "openwrt", "embedded", "router", "switch", "firewall",
        ];
        if has(&network_gear) {
            Some(OsFamily::NetworkDevice)
        } else if has(&["android"]) {
            Some(OsFamily::Android)
        } else if has(&["iphone", "ipad", "apple ios"]) {
            Some(OsFamily::Ios)
        } else if has(&["mac os", "macos", "os x"]) {
            Some(OsFamily::MacOs)
        } else if has(&["windows"]) {
            Some(OsFamily::Windows)
        } else if has(&["linux", "unix", "bsd"]) {
            Some(OsFamily::Linux)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Windows => write!(f, "Windows"),
            OsFamily::MacOs => write!(f, "macOS"),
            OsFamily::Linux => write!(f, "Linux/Unix"),
            OsFamily::Android => write!(f, "Android"),
            OsFamily::Ios => write!(f, "iOS"),
            OsFamily::NetworkDevice => write!(f, "Network device"),
        }
    }
}

#[async_trait]
pub trait OsFingerprinter: Send + Sync {
    async fn fingerprint(&self, ip: Ipv4Addr, probe: &ProbeReport) -> Option<OsFamily>;
}

/// Derives the hint from the reply TTL already captured by the probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtlFingerprinter;

#[async_trait]
impl OsFingerprinter for TtlFingerprinter {
    async fn fingerprint(&self, _ip: Ipv4Addr, probe: &ProbeReport) -> Option<OsFamily> {
        probe.ttl.and_then(OsFamily::from_ttl)
    }
}

/// Runs `nmap -O` against the host. Usually needs root; failures give no hint.
#[derive(Debug, Clone, Copy)]
pub struct NmapFingerprinter {
    timeout: Duration,
}

impl NmapFingerprinter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for NmapFingerprinter {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl OsFingerprinter for NmapFingerprinter {
    async fn fingerprint(&self, ip: Ipv4Addr, _probe: &ProbeReport) -> Option<OsFamily> {
        let ip_str = ip.to_string();
        let host_timeout = format!("{}s", self.timeout.as_secs().max(1));

        let task = tokio::task::spawn_blocking(move || {
            hidden_command("nmap")
                .args(["-O", "--osscan-guess", "-Pn", "-n"])
                .args(["--host-timeout", &host_timeout, &ip_str])
                .output()
        });

        let output = match tokio::time::timeout(self.timeout + Duration::from_secs(2), task).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => {
                tracing::debug!("nmap unavailable for {}: {}", ip, e);
                return None;
            }
            _ => {
                tracing::debug!("nmap fingerprint of {} timed out", ip);
                return None;
            }
        };

        let hint = parse_nmap_os(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!("nmap: {} -> {:?}", ip, hint);
        hint
    }
}

/// Extract an OS family from nmap's OS detection output.
pub(crate) fn parse_nmap_os(output: &str) -> Option<OsFamily> {
    const KEYS: [&str; 3] = ["OS details:", "Running:", "Aggressive OS guesses:"];

    KEYS.iter().find_map(|key| {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix(key))
            .and_then(OsFamily::from_description)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ttl() {
        assert_eq!(OsFamily::from_ttl(64), Some(OsFamily::Linux));
        assert_eq!(OsFamily::from_ttl(57), Some(OsFamily::Linux));
        assert_eq!(OsFamily::from_ttl(128), Some(OsFamily::Windows));
        assert_eq!(OsFamily::from_ttl(255), Some(OsFamily::NetworkDevice));
        assert_eq!(OsFamily::from_ttl(0), None);
    }

    #[test]
    fn test_from_description() {
        assert_eq!(OsFamily::from_description("Linux 4.15 - 5.8"), Some(OsFamily::Linux));
        assert_eq!(OsFamily::from_description("Google Android 10 (Linux 4.14)"), Some(OsFamily::Android));
        assert_eq!(OsFamily::from_description("Microsoft Windows 10 1607"), Some(OsFamily::Windows));
        assert_eq!(OsFamily::from_description("Apple macOS 12 (Monterey)"), Some(OsFamily::MacOs));
        assert_eq!(OsFamily::from_description("MikroTik RouterOS 6.45"), Some(OsFamily::NetworkDevice));
        assert_eq!(OsFamily::from_description("Something exotic"), None);
    }

    #[test]
    fn test_parse_nmap_os() {
        let output = "Nmap scan report for 192.168.1.10\n\
                      Host is up (0.0040s latency).\n\
                      Device type: general purpose\n\
                      Running: Microsoft Windows 10\n\
                      OS details: Microsoft Windows 10 1709 - 1909\n";
        assert_eq!(parse_nmap_os(output), Some(OsFamily::Windows));
        assert_eq!(parse_nmap_os("Note: Host seems down."), None);
    }

    #[tokio::test]
    async fn test_ttl_fingerprinter_uses_probe_ttl() {
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        let fp = TtlFingerprinter;
        assert_eq!(
            fp.fingerprint(ip, &ProbeReport::active(Some(1.0), Some(128))).await,
            Some(OsFamily::Windows)
        );
        assert_eq!(fp.fingerprint(ip, &ProbeReport::active(None, None)).await, None);
    }
}
