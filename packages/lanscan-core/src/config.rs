//! Layered configuration
//!
//! Values come from, in priority order: command-line flags, `LANSCAN_*`
//! environment variables, the TOML config file, and built-in defaults.
//! Every value remembers which layer supplied it.

use crate::scanner::classify::{DeviceClassifier, VendorRules};
use crate::scanner::engine::{
    DEFAULT_CONCURRENCY, DEFAULT_EXPOSURE_TIMEOUT, DEFAULT_MAX_HOSTS, DEFAULT_PING_ATTEMPTS,
    DEFAULT_PING_TIMEOUT, ScanOptions,
};
use crate::scanner::exposure::DEFAULT_EXPOSURE_PORTS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the worker limit
pub const ENV_CONCURRENCY: &str = "LANSCAN_CONCURRENCY";

/// Environment variable overriding the ping timeout (milliseconds)
pub const ENV_TIMEOUT_MS: &str = "LANSCAN_TIMEOUT_MS";

/// Environment variable enabling shuffled probe order
pub const ENV_SHUFFLE: &str = "LANSCAN_SHUFFLE";

/// Environment variable pointing at an oui.json vendor table
pub const ENV_OUI_PATH: &str = "LANSCAN_OUI_PATH";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    scan: Option<ScanSection>,
    vendors: Option<VendorSection>,
    classifier: Option<ClassifierSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanSection {
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    shuffle: Option<bool>,
    max_hosts: Option<u64>,
    os_hint: Option<OsHintMode>,
    exposure: Option<bool>,
    exposure_ports: Option<Vec<u16>>,
    exposure_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VendorSection {
    /// Path to an oui.json table
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierSection {
    /// TOML file with `[[rule]]` entries replacing the built-in vendor rules
    rules: Option<PathBuf>,
}

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
    /// Given on the command line
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::CommandLine => write!(f, "command line"),
        }
    }
}

/// Which OS fingerprint capability to attach to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsHintMode {
    #[default]
    Off,
    Ttl,
    Nmap,
}

impl fmt::Display for OsHintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsHintMode::Off => write!(f, "off"),
            OsHintMode::Ttl => write!(f, "ttl"),
            OsHintMode::Nmap => write!(f, "nmap"),
        }
    }
}

impl FromStr for OsHintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(OsHintMode::Off),
            "ttl" => Ok(OsHintMode::Ttl),
            "nmap" => Ok(OsHintMode::Nmap),
            other => Err(format!("unknown OS hint mode '{}' (expected off, ttl or nmap)", other)),
        }
    }
}

/// A value together with the layer that supplied it
#[derive(Debug, Clone, PartialEq)]
pub struct Setting<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> Setting<T> {
    fn builtin(value: T) -> Self {
        Self { value, source: ConfigSource::Default }
    }

    /// Replace the value with a command-line override, if one was given.
    pub fn override_with(&mut self, value: Option<T>) {
        if let Some(value) = value {
            self.value = value;
            self.source = ConfigSource::CommandLine;
        }
    }
}

/// Effective configuration after layering env, config file and defaults.
/// The CLI applies its own flags on top with [`Setting::override_with`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub concurrency: Setting<usize>,
    pub timeout_ms: Setting<u64>,
    pub retries: Setting<u32>,
    pub shuffle: Setting<bool>,
    pub max_hosts: Setting<u64>,
    pub os_hint: Setting<OsHintMode>,
    pub exposure: Setting<bool>,
    pub exposure_ports: Setting<Vec<u16>>,
    pub exposure_timeout_ms: Setting<u64>,
    pub vendors_path: Setting<Option<PathBuf>>,
    pub classifier_rules: Setting<Option<PathBuf>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: Setting::builtin(DEFAULT_CONCURRENCY),
            timeout_ms: Setting::builtin(DEFAULT_PING_TIMEOUT.as_millis() as u64),
            retries: Setting::builtin(DEFAULT_PING_ATTEMPTS),
            shuffle: Setting::builtin(false),
            max_hosts: Setting::builtin(DEFAULT_MAX_HOSTS),
            os_hint: Setting::builtin(OsHintMode::Off),
            exposure: Setting::builtin(false),
            exposure_ports: Setting::builtin(DEFAULT_EXPOSURE_PORTS.to_vec()),
            exposure_timeout_ms: Setting::builtin(DEFAULT_EXPOSURE_TIMEOUT.as_millis() as u64),
            vendors_path: Setting::builtin(None),
            classifier_rules: Setting::builtin(None),
        }
    }
}

impl Settings {
    /// Engine options for one scan. Worker and attempt counts are at least 1.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            concurrency: self.concurrency.value.max(1),
            ping_timeout: Duration::from_millis(self.timeout_ms.value),
            ping_attempts: self.retries.value.max(1),
            shuffle: self.shuffle.value,
            max_hosts: self.max_hosts.value,
            exposure_ports: self.exposure_ports.value.clone(),
            exposure_timeout: Duration::from_millis(self.exposure_timeout_ms.value),
            local_mac: None,
        }
    }

    /// Build the classifier, falling back to the built-in rules when the
    /// configured rules file cannot be used.
    pub fn classifier(&self) -> DeviceClassifier {
        let rules = match &self.classifier_rules.value {
            Some(path) => match VendorRules::load(path) {
                Ok(rules) => {
                    tracing::info!(
                        "Loaded {} classifier rules from {:?}",
                        rules.rules().len(),
                        path
                    );
                    rules
                }
                Err(e) => {
                    tracing::warn!("Ignoring classifier rules {:?}: {:#}", path, e);
                    VendorRules::builtin()
                }
            },
            None => VendorRules::builtin(),
        };
        DeviceClassifier::new(rules)
    }

    /// `(name, value, source)` rows for display.
    pub fn describe(&self) -> Vec<(&'static str, String, ConfigSource)> {
        let path_or_auto = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(auto)".to_string())
        };
        let ports = self
            .exposure_ports
            .value
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        vec![
            ("concurrency", self.concurrency.value.to_string(), self.concurrency.source),
            ("timeout_ms", self.timeout_ms.value.to_string(), self.timeout_ms.source),
            ("retries", self.retries.value.to_string(), self.retries.source),
            ("shuffle", self.shuffle.value.to_string(), self.shuffle.source),
            ("max_hosts", self.max_hosts.value.to_string(), self.max_hosts.source),
            ("os_hint", self.os_hint.value.to_string(), self.os_hint.source),
            ("exposure", self.exposure.value.to_string(), self.exposure.source),
            ("exposure_ports", ports, self.exposure_ports.source),
            (
                "exposure_timeout_ms",
                self.exposure_timeout_ms.value.to_string(),
                self.exposure_timeout_ms.source,
            ),
            ("vendors", path_or_auto(&self.vendors_path.value), self.vendors_path.source),
            (
                "classifier_rules",
                path_or_auto(&self.classifier_rules.value),
                self.classifier_rules.source,
            ),
        ]
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("lanscan").join("config.toml"))
}

fn parse_config_file(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).context("invalid config file")
}

/// Load configuration from the config file. A missing file is silent,
/// an unreadable or malformed one is logged and ignored.
fn load_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {:#}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load settings with priority:
/// 1. Environment variables (LANSCAN_*)
/// 2. Config file (~/.config/lanscan/config.toml)
/// 3. Default values
pub fn load_settings() -> Settings {
    let file = get_config_file_path().and_then(|p| load_config_file(&p));
    resolve_settings(file.as_ref(), |key| std::env::var(key).ok())
}

/// Load settings from an explicit config file instead of the default location.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file = parse_config_file(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(resolve_settings(Some(&file), |key| std::env::var(key).ok()))
}

fn env_value<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = env(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        other => {
            tracing::warn!("Ignoring {}={:?}: expected true or false", key, other);
            None
        }
    }
}

fn layer<T>(setting: &mut Setting<T>, from_file: Option<T>, from_env: Option<T>) {
    if let Some(value) = from_file {
        setting.value = value;
        setting.source = ConfigSource::ConfigFile;
    }
    if let Some(value) = from_env {
        setting.value = value;
        setting.source = ConfigSource::Environment;
    }
}

fn resolve_settings(file: Option<&ConfigFile>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    let scan = file.and_then(|f| f.scan.as_ref());
    let vendors = file.and_then(|f| f.vendors.as_ref());
    let classifier = file.and_then(|f| f.classifier.as_ref());

    layer(
        &mut settings.concurrency,
        scan.and_then(|s| s.concurrency),
        env_value(&env, ENV_CONCURRENCY),
    );
    layer(
        &mut settings.timeout_ms,
        scan.and_then(|s| s.timeout_ms),
        env_value(&env, ENV_TIMEOUT_MS),
    );
    layer(&mut settings.retries, scan.and_then(|s| s.retries), None);
    layer(
        &mut settings.shuffle,
        scan.and_then(|s| s.shuffle),
        env_flag(&env, ENV_SHUFFLE),
    );
    layer(&mut settings.max_hosts, scan.and_then(|s| s.max_hosts), None);
    layer(&mut settings.os_hint, scan.and_then(|s| s.os_hint), None);
    layer(&mut settings.exposure, scan.and_then(|s| s.exposure), None);
    layer(
        &mut settings.exposure_ports,
        scan.and_then(|s| s.exposure_ports.clone()),
        None,
    );
    layer(
        &mut settings.exposure_timeout_ms,
        scan.and_then(|s| s.exposure_timeout_ms),
        None,
    );
    layer(
        &mut settings.vendors_path,
        vendors.and_then(|v| v.path.clone()).map(Some),
        env_value::<PathBuf>(&env, ENV_OUI_PATH).map(Some),
    );
    layer(
        &mut settings.classifier_rules,
        classifier.and_then(|c| c.rules.clone()).map(Some),
        None,
    );

    settings
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/lanscan/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# lanscan configuration
# Place this file at: ~/.config/lanscan/config.toml
# Environment variables (LANSCAN_CONCURRENCY, LANSCAN_TIMEOUT_MS,
# LANSCAN_SHUFFLE, LANSCAN_OUI_PATH) take precedence over this file.

[scan]
# concurrency = 50
# timeout_ms = 1000
# retries = 1
# shuffle = false
# max_hosts = 4096       # larger ranges are refused
# os_hint = "off"        # off | ttl | nmap
# exposure = false
# exposure_ports = [21, 22, 23, 53, 80, 135, 139, 443, 445, 3389, 5900, 8080]
# exposure_timeout_ms = 300

[vendors]
# path = "/usr/local/share/lanscan/oui.json"

[classifier]
# TOML file with [[rule]] pattern/label entries replacing the built-in rules
# rules = "~/.config/lanscan/rules.toml"
"#
    .to_string()
}
