//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! The vendor table is a JSON object mapping `XX-XX-XX` prefixes to vendor
//! names. It is loaded once, before a scan starts, and is read-only afterwards.
//! A missing or corrupt file yields an empty table: every vendor is then
//! reported as `"Unknown"` and the scan proceeds.

use super::UNKNOWN;
use super::arp::canonical_mac;
use crate::error::ScanError;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the persisted vendor table
pub const OUI_FILE_NAME: &str = "oui.json";

/// Prefix -> vendor mapping keyed by canonical `XX-XX-XX` prefixes.
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    entries: HashMap<String, String>,
}

/// Summary of merging a text vendor listing into a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Prefixes already present with a different vendor; the first entry wins
    pub duplicates: Vec<String>,
    pub skipped_lines: usize,
}

impl VendorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from raw pairs. Keys in any separator style are
    /// normalized; invalid keys are dropped and the first valid key wins.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut table = Self::new();
        for (prefix, vendor) in entries {
            if let Some(key) = prefix_key(prefix.as_ref()) {
                table.entries.entry(key).or_insert_with(|| vendor.into());
            }
        }
        table
    }

    /// Load the persisted table, failing with `VendorTableUnavailable`.
    pub fn try_load(path: &Path) -> Result<Self, ScanError> {
        let unavailable = |reason: String| ScanError::VendorTableUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let raw: HashMap<String, String> =
            serde_json::from_str(&content).map_err(|e| unavailable(e.to_string()))?;

        let raw_count = raw.len();
        let table = Self::from_entries(raw);
        if table.len() < raw_count {
            tracing::warn!(
                "Vendor table {:?}: ignored {} malformed prefixes",
                path,
                raw_count - table.len()
            );
        }
        Ok(table)
    }

    /// Locate and load the vendor table, degrading to an empty table.
    pub fn load_or_empty(explicit: Option<&Path>) -> Self {
        let Some(path) = resolve_table_path(explicit) else {
            tracing::warn!("No {} found, vendors will be reported as Unknown", OUI_FILE_NAME);
            return Self::new();
        };

        match Self::try_load(&path) {
            Ok(table) => {
                tracing::info!("Loaded {} vendor prefixes from {:?}", table.len(), path);
                table
            }
            Err(e) => {
                tracing::warn!("{}", e);
                Self::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vendor for a MAC address, if the prefix is known.
    pub fn get(&self, mac: &str) -> Option<&str> {
        let key = oui_key(mac)?;
        self.entries.get(&key).map(String::as_str)
    }

    /// Vendor for a MAC address, or `"Unknown"` when the MAC is the unknown
    /// sentinel, malformed, or not in the table.
    pub fn lookup(&self, mac: &str) -> String {
        match self.get(mac) {
            Some(vendor) => {
                tracing::trace!("OUI lookup for {}: found {}", mac, vendor);
                vendor.to_string()
            }
            None => UNKNOWN.to_string(),
        }
    }

    /// Merge a text listing of `<prefix> <vendor name>` lines into the table.
    ///
    /// IEEE `(hex)` / `(base 16)` markers are stripped from the vendor name.
    /// Lines whose prefix is not exactly six hex digits are skipped. Existing
    /// entries are never overwritten.
    pub fn merge_text(&mut self, text: &str) -> MergeReport {
        let mut report = MergeReport::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((raw_prefix, rest)) = line.split_once(char::is_whitespace) else {
                report.skipped_lines += 1;
                continue;
            };

            let vendor = rest
                .trim()
                .trim_start_matches("(hex)")
                .trim_start_matches("(base 16)")
                .trim();

            let Some(prefix) = prefix_key(raw_prefix) else {
                report.skipped_lines += 1;
                continue;
            };
            if vendor.is_empty() {
                report.skipped_lines += 1;
                continue;
            }

            match self.entries.get(&prefix) {
                Some(existing) if existing == vendor => {}
                Some(_) => report.duplicates.push(prefix),
                None => {
                    self.entries.insert(prefix, vendor.to_string());
                    report.added += 1;
                }
            }
        }

        report
    }

    /// Write the table as pretty-printed JSON with sorted keys.
    pub fn save(&self, path: &Path) -> Result<()> {
        let sorted: BTreeMap<&String, &String> = self.entries.iter().collect();
        let json =
            serde_json::to_string_pretty(&sorted).context("Failed to serialize vendor table")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

/// Canonical `XX-XX-XX` prefix of a full MAC address. Bare prefixes and
/// anything else that is not a MAC yield `None`.
pub fn oui_key(mac: &str) -> Option<String> {
    canonical_mac(mac).map(|canonical| canonical[..8].replace(':', "-"))
}

/// Canonical form of a bare three-octet prefix (`00:1A:2B`, `00-1a-2b`, `001A2B`).
fn prefix_key(prefix: &str) -> Option<String> {
    let cleaned: String = prefix.replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() != 6 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!("{}-{}-{}", &cleaned[0..2], &cleaned[2..4], &cleaned[4..6]))
}

/// Find the vendor table file.
///
/// An explicit path is returned as-is, even if missing, so the failure is
/// reported against it. Otherwise the first existing candidate wins: next to
/// the executable, in `resources/` next to the executable, in the crate's
/// `resources/` when running from source, then the user data directory.
pub fn resolve_table_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    candidate_table_paths().into_iter().find(|p| p.is_file())
}

fn candidate_table_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(OUI_FILE_NAME));
        candidates.push(exe_dir.join("resources").join(OUI_FILE_NAME));
    }

    candidates.push(
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("resources")
            .join(OUI_FILE_NAME),
    );

    if let Some(data_dir) = dirs::data_dir() {
        candidates.push(data_dir.join("lanscan").join(OUI_FILE_NAME));
    }

    candidates
}
