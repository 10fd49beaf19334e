//! Error taxonomy for the scan engine.
//!
//! Only session-establishment failures are represented here. Per-host probe
//! problems never become errors: they are folded into `HostStatus::Inactive`
//! or the `"Unknown"` sentinel on the affected result.

use std::path::PathBuf;
use thiserror::Error;

/// Scanner errors with user-friendly messages
#[derive(Debug, Error)]
pub enum ScanError {
    /// The address/mask pair does not describe an IPv4 network
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// No usable local IPv4 interface was found
    #[error("No local address available")]
    NoLocalAddress,

    /// The requested interface index or name does not exist
    #[error("No interface matches '{0}'")]
    UnknownInterface(String),

    /// A scan is already running on this engine
    #[error("A scan is already running")]
    AlreadyRunning,

    /// The vendor table could not be read or parsed
    #[error("Vendor table unavailable at {}: {reason}", path.display())]
    VendorTableUnavailable { path: PathBuf, reason: String },
}

impl ScanError {
    /// Get user-friendly description and instructions
    pub fn user_message(&self) -> String {
        match self {
            ScanError::InvalidRange(msg) => {
                format!(
                    "The address range is not valid: {}\n\nUse a dotted mask (255.255.255.0) or a prefix length (24).",
                    msg
                )
            }
            ScanError::NoLocalAddress => {
                "No local IPv4 address is configured.\n\nPlease check your network connection and try again.".to_string()
            }
            ScanError::UnknownInterface(selector) => {
                format!(
                    "No local interface matches '{}'.\n\nRun `lanscan interfaces` to list the available ones.",
                    selector
                )
            }
            ScanError::AlreadyRunning => {
                "A scan is already in progress. Cancel it or wait for it to finish.".to_string()
            }
            ScanError::VendorTableUnavailable { path, reason } => {
                format!(
                    "Could not load the vendor table from {} ({}).\n\nVendors will be reported as Unknown. Rebuild it with `lanscan oui build`.",
                    path.display(),
                    reason
                )
            }
        }
    }
}
