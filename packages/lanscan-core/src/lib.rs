//! lanscan core library
//!
//! This crate discovers hosts on a local IPv4 subnet:
//! - Candidate enumeration from an address + mask
//! - Bounded-concurrency ping sweep with progress events and cancellation
//! - MAC resolution from the neighbor table and OUI vendor lookup
//! - Heuristic device classification, optionally helped by OS hints
//!   and a TCP exposure check
//!
//! # Example
//!
//! ```no_run
//! use lanscan_core::scanner::{ScanEngine, ScanOptions, VendorTable};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = ScanEngine::system(VendorTable::load_or_empty(None), Duration::from_secs(1));
//!     let session = engine.start_scan_str("192.168.1.50", "255.255.255.0", ScanOptions::default())?;
//!
//!     let report = session
//!         .wait_with(|p| println!("[{:>3}%] {} {}", p.percent, p.ip, p.status))
//!         .await;
//!
//!     if let Some(report) = report {
//!         println!("Found {} hosts", report.results.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod interfaces;
pub mod scanner;

// Re-export commonly used types
pub use config::{ConfigSource, OsHintMode, Settings};
pub use error::ScanError;
pub use interfaces::LocalInterface;
pub use scanner::{
    HostStatus, ScanCapabilities, ScanEngine, ScanEvent, ScanOptions, ScanProgress, ScanReport,
    ScanResult, ScanSession, ScanState,
};
