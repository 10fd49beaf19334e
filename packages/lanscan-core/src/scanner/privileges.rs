//! Privilege and capability detection for network scanning
//!
//! Different platforms have different requirements:
//! - Windows: ICMP ping works without admin; `arp -a` is readable by anyone
//! - Linux: the system ping is usually setuid or has CAP_NET_RAW;
//!   `/proc/net/arp` is world-readable
//! - macOS: ICMP ping and `arp -n` work without root

use super::hidden_command;
use super::ping::{ReachabilityProbe, SystemPing};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Scan mode indicating the level of access available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Full access - all scan features available
    Full,
    /// Limited access - hosts may be missed or MACs stay Unknown
    Limited,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Limited => write!(f, "limited"),
        }
    }
}

/// Information about scan capabilities based on current privileges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCapabilities {
    pub mode: ScanMode,
    pub can_ping: bool,
    pub can_read_neighbors: bool,
    pub is_elevated: bool,
    pub warning: Option<String>,
    pub elevation_instructions: Option<String>,
}

impl Default for ScanCapabilities {
    fn default() -> Self {
        Self {
            mode: ScanMode::Full,
            can_ping: true,
            can_read_neighbors: true,
            is_elevated: false,
            warning: None,
            elevation_instructions: None,
        }
    }
}

impl ScanCapabilities {
    pub fn from_checks(can_ping: bool, can_read_neighbors: bool, is_elevated: bool) -> Self {
        let mode = if can_ping && can_read_neighbors {
            ScanMode::Full
        } else {
            ScanMode::Limited
        };

        let (warning, elevation_instructions) = if mode == ScanMode::Limited {
            (
                Some(
                    "Running with limited scan capabilities. Some devices may not be discovered."
                        .to_string(),
                ),
                Some(get_elevation_instructions()),
            )
        } else {
            (None, None)
        };

        Self {
            mode,
            can_ping,
            can_read_neighbors,
            is_elevated,
            warning,
            elevation_instructions,
        }
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(target_os = "windows")]
    {
        match hidden_command("whoami").args(["/groups"]).output() {
            Ok(output) => {
                let output_str = String::from_utf8_lossy(&output.stdout);
                output_str.contains("S-1-16-12288") || output_str.contains("High Mandatory Level")
            }
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(any(target_os = "windows", unix)))]
    {
        false
    }
}

/// Test if the system ping answers for the loopback address
pub async fn test_ping_capability() -> bool {
    SystemPing
        .probe(Ipv4Addr::LOCALHOST, Duration::from_millis(1000), 1)
        .await
        .is_active()
}

/// Test if the neighbor table can be read
pub async fn test_neighbor_capability() -> bool {
    tokio::task::spawn_blocking(|| {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/net/arp").is_ok()
                || hidden_command("ip")
                    .args(["neigh", "show"])
                    .output()
                    .map(|o| o.status.success())
                    .unwrap_or(false)
        }

        #[cfg(any(target_os = "macos", target_os = "windows"))]
        {
            hidden_command("arp")
                .arg("-a")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            false
        }
    })
    .await
    .unwrap_or(false)
}

/// Detect scan capabilities based on current privileges
pub async fn detect_capabilities() -> ScanCapabilities {
    let elevated = is_elevated();
    let (can_ping, can_read_neighbors) =
        tokio::join!(test_ping_capability(), test_neighbor_capability());

    ScanCapabilities::from_checks(can_ping, can_read_neighbors, elevated)
}

/// Get platform-specific instructions for running with elevated privileges
pub fn get_elevation_instructions() -> String {
    #[cfg(target_os = "windows")]
    {
        "To run with full scan capabilities on Windows:\n\
         1. Open Command Prompt as Administrator\n\
         2. Run lanscan from there\n\
         \n\
         Note: Most scan features work without admin rights on Windows."
            .to_string()
    }

    #[cfg(target_os = "linux")]
    {
        "To run with full scan capabilities on Linux:\n\
         \n\
         Option 1 - Run as root (not recommended for regular use):\n\
         $ sudo lanscan scan\n\
         \n\
         Option 2 - Ensure the system ping has setuid or CAP_NET_RAW:\n\
         $ ls -la /bin/ping  # Should show '-rwsr-xr-x'\n\
         $ sudo setcap cap_net_raw+ep /bin/ping\n\
         \n\
         lanscan uses the system ping command, which typically works\n\
         without elevation on most Linux distributions."
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "To run with full scan capabilities on macOS:\n\
         \n\
         Option 1 - Run as root (not recommended for regular use):\n\
         $ sudo lanscan scan\n\
         \n\
         Note: Most scan features work without root on macOS."
            .to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Elevated privileges may be required for full scan capabilities.\n\
         Please consult your operating system documentation."
            .to_string()
    }
}

/// Format a user-friendly message about current scan capabilities
pub fn format_capabilities_message(caps: &ScanCapabilities) -> String {
    if caps.mode == ScanMode::Full {
        "Scanning with full capabilities".to_string()
    } else {
        let mut msg = String::from("Scanning with limited capabilities:\n");

        if !caps.can_ping {
            msg.push_str("  - Ping unavailable (every host will look inactive)\n");
        }
        if !caps.can_read_neighbors {
            msg.push_str("  - Neighbor table unreadable (MAC addresses will be Unknown)\n");
        }

        if let Some(ref instructions) = caps.elevation_instructions {
            msg.push_str("\nTo enable full scanning:\n");
            msg.push_str(instructions);
        }

        msg
    }
}
