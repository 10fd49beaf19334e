//! Heuristic device-type classification
//!
//! Rules are evaluated in a fixed priority order and the first match wins:
//! the scanning host itself, the gateway address, the vendor rule table, the
//! optional OS fingerprint hint, and finally a reachability-based default.
//! Identical inputs always produce the same label.

use super::HostStatus;
use super::fingerprint::OsFamily;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

pub const LABEL_SELF: &str = "Dispositivet local";
pub const LABEL_GATEWAY: &str = "Gateway/Router";
pub const LABEL_HOST: &str = "Host";
pub const LABEL_OTHER: &str = "Other";

/// One entry of the vendor rule table: a case-insensitive substring of the
/// vendor name and the label it yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRule {
    pub pattern: String,
    pub label: String,
}

impl VendorRule {
    pub fn new(pattern: &str, label: &str) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rule: Vec<VendorRule>,
}

/// Ordered vendor rule table. Earlier rules take precedence, so more
/// specific patterns (e.g. "intelbras") must precede broader ones ("intel").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRules {
    rules: Vec<VendorRule>,
}

const BUILTIN_RULES: &[(&str, &str)] = &[
    // Consoles
    ("sony interactive", "Console (Sony)"),
    ("nintendo", "Console (Nintendo)"),
    // Phones and tablets
    ("apple", "Phone (Apple)"),
    ("samsung", "Phone (Samsung)"),
    ("xiaomi", "Phone (Xiaomi)"),
    ("motorola", "Phone (Motorola)"),
    ("huawei", "Phone (Huawei)"),
    ("oneplus", "Phone (OnePlus)"),
    ("oppo", "Phone (Oppo)"),
    ("vivo mobile", "Phone (Vivo)"),
    ("realme", "Phone (Realme)"),
    // Networking equipment
    ("intelbras", "Router (Intelbras)"),
    ("tp-link", "Router (TP-Link)"),
    ("mercusys", "Router (Mercusys)"),
    ("tenda", "Router (Tenda)"),
    ("cisco", "Router (Cisco)"),
    ("netgear", "Router (Netgear)"),
    ("ubiquiti", "Router (Ubiquiti)"),
    ("routerboard", "Router (MikroTik)"),
    ("mikrotik", "Router (MikroTik)"),
    ("d-link", "Router (D-Link)"),
    ("zyxel", "Router (Zyxel)"),
    ("linksys", "Router (Linksys)"),
    ("arris", "Router (Arris)"),
    ("technicolor", "Router (Technicolor)"),
    ("sagemcom", "Router (Sagemcom)"),
    ("askey", "Router (Askey)"),
    ("zte corporation", "Router (ZTE)"),
    // Printers
    ("seiko epson", "Printer (Epson)"),
    ("canon", "Printer (Canon)"),
    ("brother industries", "Printer (Brother)"),
    // PC vendors and NIC chipsets
    ("intel", "Computer/Laptop"),
    ("realtek", "Computer/Laptop"),
    ("dell", "Computer/Laptop"),
    ("lenovo", "Computer/Laptop"),
    ("hewlett packard", "Computer/Laptop"),
    ("asustek", "Computer/Laptop"),
    ("micro-star", "Computer/Laptop"),
    ("giga-byte", "Computer/Laptop"),
    ("liteon", "Computer/Laptop"),
    ("azurewave", "Computer/Laptop"),
    ("hon hai", "Computer/Laptop"),
];

impl VendorRules {
    pub fn new(rules: Vec<VendorRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| VendorRule::new(&r.pattern, &r.label))
            .filter(|r| !r.pattern.is_empty())
            .collect();
        Self { rules }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_RULES
                .iter()
                .map(|(pattern, label)| VendorRule::new(pattern, label))
                .collect(),
        )
    }

    /// Parse a TOML rules file made of `[[rule]]` tables.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: RulesFile = toml::from_str(content).context("Invalid classifier rules")?;
        Ok(Self::new(file.rule))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read classifier rules {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn rules(&self) -> &[VendorRule] {
        &self.rules
    }

    /// Label of the first rule whose pattern occurs in the vendor name.
    pub fn match_vendor(&self, vendor: &str) -> Option<&str> {
        let vendor_lower = vendor.to_lowercase();
        self.rules
            .iter()
            .find(|r| vendor_lower.contains(&r.pattern))
            .map(|r| r.label.as_str())
    }
}

impl Default for VendorRules {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Everything the classifier looks at for one host.
#[derive(Debug, Clone, Copy)]
pub struct HostSignals<'a> {
    pub ip: Ipv4Addr,
    pub local_address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub status: HostStatus,
    pub vendor: &'a str,
    pub os_hint: Option<OsFamily>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceClassifier {
    rules: VendorRules,
}

impl DeviceClassifier {
    pub fn new(rules: VendorRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &VendorRules {
        &self.rules
    }

    pub fn classify(&self, signals: &HostSignals<'_>) -> String {
        if signals.ip == signals.local_address {
            return LABEL_SELF.to_string();
        }

        if signals.ip == signals.gateway {
            return LABEL_GATEWAY.to_string();
        }

        if let Some(label) = self.rules.match_vendor(signals.vendor) {
            return label.to_string();
        }

        if let Some(os) = signals.os_hint {
            return os.device_label().to_string();
        }

        match signals.status {
            HostStatus::Active => LABEL_HOST.to_string(),
            HostStatus::Inactive => LABEL_OTHER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::UNKNOWN;

    fn signals(last_octet: u8, vendor: &str) -> HostSignals<'_> {
        HostSignals {
            ip: Ipv4Addr::new(192, 168, 1, last_octet),
            local_address: Ipv4Addr::new(192, 168, 1, 50),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            status: HostStatus::Active,
            vendor,
            os_hint: None,
        }
    }

    #[test]
    fn test_self_beats_everything() {
        let classifier = DeviceClassifier::default();
        let mut s = signals(50, "Samsung Electronics Co.,Ltd");
        s.os_hint = Some(OsFamily::Windows);
        assert_eq!(classifier.classify(&s), LABEL_SELF);
    }

    #[test]
    fn test_gateway_beats_vendor() {
        let classifier = DeviceClassifier::default();
        assert_eq!(classifier.classify(&signals(1, "Apple, Inc.")), LABEL_GATEWAY);
    }

    #[test]
    fn test_vendor_rules() {
        let classifier = DeviceClassifier::default();
        let label = |vendor: &str| classifier.classify(&signals(7, vendor));
        assert_eq!(label("SAMSUNG ELECTRO-MECHANICS"), "Phone (Samsung)");
        assert_eq!(label("TP-LINK TECHNOLOGIES CO.,LTD."), "Router (TP-Link)");
        assert_eq!(label("Intel Corporate"), "Computer/Laptop");
        assert_eq!(label("Routerboard.com"), "Router (MikroTik)");
        assert_eq!(label("Nintendo Co.,Ltd"), "Console (Nintendo)");
    }

    #[test]
    fn test_rule_order_resolves_overlaps() {
        let classifier = DeviceClassifier::default();
        assert_eq!(
            classifier.classify(&signals(7, "Intelbras")),
            "Router (Intelbras)"
        );
    }

    #[test]
    fn test_vendor_beats_os_hint() {
        let classifier = DeviceClassifier::default();
        let mut s = signals(7, "Apple, Inc.");
        s.os_hint = Some(OsFamily::Windows);
        assert_eq!(classifier.classify(&s), "Phone (Apple)");
    }

    #[test]
    fn test_os_hint_fallback() {
        let classifier = DeviceClassifier::default();
        let mut s = signals(7, UNKNOWN);
        s.os_hint = Some(OsFamily::Linux);
        assert_eq!(classifier.classify(&s), "Router/Server");
        s.os_hint = Some(OsFamily::Windows);
        assert_eq!(classifier.classify(&s), "Computer");
        s.os_hint = Some(OsFamily::Android);
        assert_eq!(classifier.classify(&s), "Phone");
    }

    #[test]
    fn test_defaults_by_status() {
        let classifier = DeviceClassifier::default();
        let mut s = signals(7, UNKNOWN);
        assert_eq!(classifier.classify(&s), LABEL_HOST);
        s.status = HostStatus::Inactive;
        assert_eq!(classifier.classify(&s), LABEL_OTHER);
    }

    #[test]
    fn test_deterministic() {
        let classifier = DeviceClassifier::default();
        let s = signals(33, "Huawei Technologies Co.,Ltd");
        let first = classifier.classify(&s);
        for _ in 0..20 {
            assert_eq!(classifier.classify(&s), first);
        }
    }

    #[test]
    fn test_rules_from_toml() {
        let rules = VendorRules::from_toml(
            r#"
[[rule]]
pattern = "Raspberry"
label = "Single-board computer"

[[rule]]
pattern = ""
label = "ignored"
"#,
        )
        .unwrap();

        assert_eq!(rules.rules().len(), 1);
        assert_eq!(
            rules.match_vendor("Raspberry Pi Trading Ltd"),
            Some("Single-board computer")
        );
        assert_eq!(rules.match_vendor("Apple, Inc."), None);
        assert!(VendorRules::from_toml("rule = 3").is_err());
    }
}
