//! Reachability probing using the system ping command

use super::{HostStatus, hidden_command};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Extra time granted to the ping process beyond its own wait before the
/// attempt is abandoned.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Outcome of probing a single address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub status: HostStatus,
    pub response_time_ms: Option<f64>,
    /// TTL of the echo reply, used for OS fingerprint hints
    pub ttl: Option<u8>,
}

impl ProbeReport {
    pub fn inactive() -> Self {
        Self {
            status: HostStatus::Inactive,
            response_time_ms: None,
            ttl: None,
        }
    }

    pub fn active(response_time_ms: Option<f64>, ttl: Option<u8>) -> Self {
        Self {
            status: HostStatus::Active,
            response_time_ms,
            ttl,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HostStatus::Active
    }
}

/// Liveness check for a single address.
///
/// Implementations must never fail: timeouts, unreachable hosts and
/// permission problems all report `HostStatus::Inactive`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration, attempts: u32) -> ProbeReport;
}

/// ICMP echo via the platform `ping` binary, which is usually setuid or
/// capability-enabled so no elevation is needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPing;

#[async_trait]
impl ReachabilityProbe for SystemPing {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration, attempts: u32) -> ProbeReport {
        for attempt in 0..attempts.max(1) {
            match tokio::time::timeout(timeout + SPAWN_GRACE, ping_once(ip, timeout)).await {
                Ok(Some(report)) => return report,
                Ok(None) => {
                    tracing::trace!("{} did not answer attempt {}", ip, attempt + 1);
                }
                Err(_) => {
                    tracing::trace!("{} ping attempt {} overran its deadline", ip, attempt + 1);
                }
            }
        }
        ProbeReport::inactive()
    }
}

/// Run one echo request. `None` means no reply for any reason.
async fn ping_once(ip: Ipv4Addr, timeout: Duration) -> Option<ProbeReport> {
    let ip_str = ip.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let start = Instant::now();

        #[cfg(target_os = "windows")]
        let output = hidden_command("ping")
            .args(["-n", "1", "-w", &timeout.as_millis().to_string(), &ip_str])
            .output();

        #[cfg(target_os = "linux")]
        let output = hidden_command("ping")
            .args(["-c", "1", "-W", &linux_wait_secs(timeout).to_string(), &ip_str])
            .output();

        // macOS takes the reply wait in milliseconds
        #[cfg(target_os = "macos")]
        let output = hidden_command("ping")
            .args(["-c", "1", "-W", &timeout.as_millis().to_string(), &ip_str])
            .output();

        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        let output: std::io::Result<std::process::Output> = {
            let _ = (&ip_str, timeout);
            Err(std::io::Error::new(std::io::ErrorKind::Other, "Unsupported platform"))
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("Failed to execute ping: {}", e);
                return None;
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let output_str = String::from_utf8_lossy(&output.stdout);

        #[cfg(target_os = "windows")]
        if !output.status.success() || !windows_reply_ok(&output_str) {
            return None;
        }

        #[cfg(not(target_os = "windows"))]
        if !output.status.success() {
            return None;
        }

        Some(ProbeReport::active(
            Some(parse_ping_time(&output_str).unwrap_or(elapsed_ms)),
            parse_ttl(&output_str),
        ))
    })
    .await;

    result.ok().flatten()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn linux_wait_secs(timeout: Duration) -> u64 {
    timeout.as_millis().div_ceil(1000).max(1) as u64
}

/// Windows ping exits 0 for some failures, so the text has to be checked.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn windows_reply_ok(output: &str) -> bool {
    let output_lower = output.to_lowercase();

    if output_lower.contains("request timed out")
        || output_lower.contains("destination host unreachable")
        || output_lower.contains("transmit failed")
        || output_lower.contains("general failure")
    {
        return false;
    }

    output_lower.contains("reply from")
}

/// Parse ping response time from command output
pub(crate) fn parse_ping_time(output: &str) -> Option<f64> {
    for word in output.split_whitespace() {
        if word.starts_with("time=") || word.starts_with("time<") {
            let time_str = word
                .trim_start_matches("time=")
                .trim_start_matches("time<")
                .trim_end_matches("ms");

            if let Ok(time) = time_str.parse::<f64>() {
                return Some(time);
            }
        }
    }
    None
}

/// Parse the reply TTL (`ttl=64` on Unix, `TTL=128` on Windows).
pub(crate) fn parse_ttl(output: &str) -> Option<u8> {
    output
        .split_whitespace()
        .find_map(|word| {
            let lower = word.to_ascii_lowercase();
            lower.strip_prefix("ttl=").map(|v| v.trim_end_matches(',').to_string())
        })
        .and_then(|v| v.parse().ok())
}
