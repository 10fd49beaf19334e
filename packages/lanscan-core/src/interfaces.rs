//! Local IPv4 interface discovery
//!
//! Supplies the address + mask a scan starts from, and the scanning host's
//! own MAC address. Loopback and link-local (169.254/16) addresses are never
//! offered as scan sources.

use crate::error::ScanError;
use crate::scanner::arp::canonical_mac;
use crate::scanner::range::NetworkRange;
use crate::scanner::{UNKNOWN, hidden_command};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A locally configured IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalInterface {
    pub name: String,
    pub description: String,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub mac: Option<String>,
}

impl LocalInterface {
    pub fn range(&self) -> Result<NetworkRange, ScanError> {
        NetworkRange::parse(&self.address.to_string(), &self.mask.to_string())
    }

    /// The interface MAC, or `"Unknown"`.
    pub fn mac_or_unknown(&self) -> String {
        self.mac.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }
}

fn is_scannable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified()
}

fn prefix_to_mask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
    Some(Ipv4Addr::from(bits))
}

/// Enumerate local IPv4 interfaces. An empty list means nothing to scan from.
pub fn list_local_interfaces() -> Vec<LocalInterface> {
    let interfaces = list_platform_interfaces();
    tracing::debug!("Found {} local IPv4 interfaces", interfaces.len());
    interfaces
}

#[cfg(target_os = "linux")]
fn list_platform_interfaces() -> Vec<LocalInterface> {
    let output = match hidden_command("ip").args(["-o", "-4", "addr", "show"]).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("Failed to run ip addr: {}", e);
            return Vec::new();
        }
    };

    let mut interfaces = parse_ip_addr_oneline(&String::from_utf8_lossy(&output.stdout));
    for iface in &mut interfaces {
        iface.mac = std::fs::read_to_string(format!("/sys/class/net/{}/address", iface.name))
            .ok()
            .and_then(|s| canonical_mac(&s));
    }
    interfaces
}

#[cfg(target_os = "macos")]
fn list_platform_interfaces() -> Vec<LocalInterface> {
    match hidden_command("ifconfig").output() {
        Ok(output) => parse_ifconfig(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            tracing::warn!("Failed to run ifconfig: {}", e);
            Vec::new()
        }
    }
}

#[cfg(target_os = "windows")]
fn list_platform_interfaces() -> Vec<LocalInterface> {
    match hidden_command("ipconfig").arg("/all").output() {
        Ok(output) => parse_ipconfig_all(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            tracing::warn!("Failed to run ipconfig: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn list_platform_interfaces() -> Vec<LocalInterface> {
    Vec::new()
}

/// Pick the interface to scan from: by index or name, or the first one.
pub fn select_interface<'a>(
    interfaces: &'a [LocalInterface],
    selector: Option<&str>,
) -> Result<&'a LocalInterface, ScanError> {
    if interfaces.is_empty() {
        return Err(ScanError::NoLocalAddress);
    }

    let Some(selector) = selector else {
        return Ok(&interfaces[0]);
    };

    if let Ok(index) = selector.parse::<usize>() {
        return interfaces
            .get(index)
            .ok_or_else(|| ScanError::UnknownInterface(selector.to_string()));
    }

    interfaces
        .iter()
        .find(|i| i.name == selector || i.address.to_string() == selector)
        .ok_or_else(|| ScanError::UnknownInterface(selector.to_string()))
}

/// Decide what to scan: an explicit `(address, mask)` pair, or the selected
/// interface's own network. Either way a machine with no local IPv4 address
/// is refused with `NoLocalAddress`. Also returns the local MAC when the scan
/// source is a known interface.
pub fn scan_target(
    interfaces: &[LocalInterface],
    explicit: Option<(&str, &str)>,
    selector: Option<&str>,
) -> Result<(NetworkRange, Option<String>), ScanError> {
    if interfaces.is_empty() {
        return Err(ScanError::NoLocalAddress);
    }

    match explicit {
        Some((address, mask)) => {
            let range = NetworkRange::parse(address, mask)?;
            let mac = interfaces
                .iter()
                .find(|i| i.address == range.local_address())
                .and_then(|i| i.mac.clone());
            Ok((range, mac))
        }
        None => {
            let iface = select_interface(interfaces, selector)?;
            tracing::info!("Using interface {} ({})", iface.name, iface.address);
            Ok((iface.range()?, iface.mac.clone()))
        }
    }
}

/// `ip -o -4 addr show`:
/// `2: wlan0    inet 192.168.1.50/24 brd 192.168.1.255 scope global dynamic wlan0\ ...`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_ip_addr_oneline(output: &str) -> Vec<LocalInterface> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let name = words.next()?.trim_end_matches(':');
            let name = if name.chars().all(|c| c.is_ascii_digit()) {
                words.next()?
            } else {
                name
            };

            let cidr = words.skip_while(|&w| w != "inet").nth(1)?;
            let (addr, prefix) = cidr.split_once('/')?;
            let address: Ipv4Addr = addr.parse().ok()?;
            let mask = prefix_to_mask(prefix.parse().ok()?)?;

            is_scannable(address).then(|| LocalInterface {
                name: name.to_string(),
                description: format!("{} ({}/{})", name, address, prefix),
                address,
                mask,
                mac: None,
            })
        })
        .collect()
}

/// BSD/macOS `ifconfig` blocks.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_ifconfig(output: &str) -> Vec<LocalInterface> {
    let mut interfaces = Vec::new();
    let mut current_name = String::new();
    let mut current_mac: Option<String> = None;
    let mut pending: Vec<(Ipv4Addr, Ipv4Addr)> = Vec::new();

    fn flush(
        name: &str,
        mac: &Option<String>,
        pending: &mut Vec<(Ipv4Addr, Ipv4Addr)>,
        out: &mut Vec<LocalInterface>,
    ) {
        for (address, mask) in pending.drain(..) {
            if is_scannable(address) {
                out.push(LocalInterface {
                    name: name.to_string(),
                    description: format!("{} ({})", name, address),
                    address,
                    mask,
                    mac: mac.clone(),
                });
            }
        }
    }

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) && line.contains(':') {
            flush(&current_name, &current_mac, &mut pending, &mut interfaces);
            current_name = line.split(':').next().unwrap_or_default().to_string();
            current_mac = None;
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["ether", mac, ..] => current_mac = canonical_mac(mac),
            ["inet", ip, "netmask", mask, ..] => {
                let mask_bits = u32::from_str_radix(mask.trim_start_matches("0x"), 16).ok();
                if let (Ok(ip), Some(bits)) = (ip.parse::<Ipv4Addr>(), mask_bits) {
                    pending.push((ip, Ipv4Addr::from(bits)));
                }
            }
            _ => {}
        }
    }
    flush(&current_name, &current_mac, &mut pending, &mut interfaces);

    interfaces
}

/// Windows `ipconfig /all` adapter blocks.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn parse_ipconfig_all(output: &str) -> Vec<LocalInterface> {
    struct AdapterInfo {
        name: String,
        description: Option<String>,
        mac: Option<String>,
        ip: Option<Ipv4Addr>,
        mask: Option<Ipv4Addr>,
    }

    fn value_of(line: &str) -> Option<&str> {
        line.split_once(':').map(|(_, v)| v.trim())
    }

    fn finish(adapter: Option<AdapterInfo>, out: &mut Vec<LocalInterface>) {
        let Some(adapter) = adapter else { return };
        if let (Some(address), Some(mask)) = (adapter.ip, adapter.mask) {
            if is_scannable(address) {
                out.push(LocalInterface {
                    description: adapter.description.unwrap_or_else(|| adapter.name.clone()),
                    name: adapter.name,
                    address,
                    mask,
                    mac: adapter.mac,
                });
            }
        }
    }

    let mut interfaces = Vec::new();
    let mut current: Option<AdapterInfo> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let is_header = !line.starts_with(char::is_whitespace)
            && trimmed.ends_with(':')
            && trimmed.contains("adapter");
        if is_header {
            finish(current.take(), &mut interfaces);
            let name = trimmed
                .trim_end_matches(':')
                .split_once("adapter ")
                .map(|(_, n)| n.to_string())
                .unwrap_or_else(|| trimmed.trim_end_matches(':').to_string());
            current = Some(AdapterInfo {
                name,
                description: None,
                mac: None,
                ip: None,
                mask: None,
            });
            continue;
        }

        let Some(adapter) = current.as_mut() else {
            continue;
        };

        if trimmed.starts_with("Description") {
            adapter.description = value_of(trimmed).map(str::to_string);
        } else if trimmed.starts_with("Physical Address") {
            adapter.mac = value_of(trimmed).and_then(canonical_mac);
        } else if trimmed.starts_with("IPv4 Address") || trimmed.starts_with("IP Address") {
            adapter.ip = value_of(trimmed)
                .map(|v| v.trim_end_matches("(Preferred)").trim())
                .and_then(|v| v.parse().ok());
        } else if trimmed.starts_with("Subnet Mask") {
            adapter.mask = value_of(trimmed).and_then(|v| v.parse().ok());
        }
    }
    finish(current, &mut interfaces);

    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, address: [u8; 4], prefix: u8) -> LocalInterface {
        LocalInterface {
            name: name.to_string(),
            description: name.to_string(),
            address: Ipv4Addr::from(address),
            mask: prefix_to_mask(prefix).unwrap(),
            mac: None,
        }
    }

    #[test]
    fn test_prefix_to_mask() {
        assert_eq!(prefix_to_mask(24), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(prefix_to_mask(0), Some(Ipv4Addr::new(0, 0, 0, 0)));
        assert_eq!(prefix_to_mask(32), Some(Ipv4Addr::new(255, 255, 255, 255)));
        assert_eq!(prefix_to_mask(33), None);
    }

    #[test]
    fn test_parse_ip_addr_oneline() {
        let output = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: wlan0    inet 192.168.1.50/24 brd 192.168.1.255 scope global dynamic wlan0\\       valid_lft 8000sec
3: eth1    inet 169.254.10.2/16 brd 169.254.255.255 scope link eth1\\       valid_lft forever
";
        let interfaces = parse_ip_addr_oneline(output);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "wlan0");
        assert_eq!(interfaces[0].address, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(interfaces[0].mask, Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn test_parse_ifconfig() {
        let output = "\
lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> mtu 16384
\tinet 127.0.0.1 netmask 0xff000000
en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tether a4:83:e7:1:2:3
\tinet 192.168.1.23 netmask 0xffffff00 broadcast 192.168.1.255
";
        let interfaces = parse_ifconfig(output);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "en0");
        assert_eq!(interfaces[0].mask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(interfaces[0].mac.as_deref(), Some("A4:83:E7:01:02:03"));
    }

    #[test]
    fn test_parse_ipconfig_all() {
        let output = "\
Windows IP Configuration

   Host Name . . . . . . . . . . . . : DESKTOP

Ethernet adapter Ethernet:

   Media State . . . . . . . . . . . : Media disconnected
   Description . . . . . . . . . . . : Realtek PCIe GbE Family Controller
   Physical Address. . . . . . . . . : 00-E0-4C-68-01-02

Wireless LAN adapter Wi-Fi:

   Description . . . . . . . . . . . : Intel(R) Wi-Fi 6 AX201 160MHz
   Physical Address. . . . . . . . . : 3C-22-FB-9A-10-05
   IPv4 Address. . . . . . . . . . . : 192.168.1.50(Preferred)
   Subnet Mask . . . . . . . . . . . : 255.255.255.0
   Default Gateway . . . . . . . . . : 192.168.1.1
";
        let interfaces = parse_ipconfig_all(output);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "Wi-Fi");
        assert_eq!(interfaces[0].description, "Intel(R) Wi-Fi 6 AX201 160MHz");
        assert_eq!(interfaces[0].address, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(interfaces[0].mac.as_deref(), Some("3C:22:FB:9A:10:05"));
        assert_eq!(interfaces[0].mac_or_unknown(), "3C:22:FB:9A:10:05");
    }

    #[test]
    fn test_select_interface() {
        assert!(matches!(select_interface(&[], None), Err(ScanError::NoLocalAddress)));

        let list = vec![iface("eth0", [10, 0, 0, 5], 24), iface("wlan0", [192, 168, 1, 50], 24)];
        assert_eq!(select_interface(&list, None).unwrap().name, "eth0");
        assert_eq!(select_interface(&list, Some("1")).unwrap().name, "wlan0");
        assert_eq!(select_interface(&list, Some("wlan0")).unwrap().name, "wlan0");
        assert_eq!(select_interface(&list, Some("192.168.1.50")).unwrap().name, "wlan0");
        assert!(matches!(
            select_interface(&list, Some("7")),
            Err(ScanError::UnknownInterface(_))
        ));
    }

    #[test]
    fn test_scan_target_requires_local_address() {
        assert!(matches!(
            scan_target(&[], Some(("192.168.1.50", "24")), None),
            Err(ScanError::NoLocalAddress)
        ));
        assert!(matches!(scan_target(&[], None, None), Err(ScanError::NoLocalAddress)));
    }

    #[test]
    fn test_scan_target_explicit_and_selected() {
        let mut wlan = iface("wlan0", [192, 168, 1, 50], 24);
        wlan.mac = Some("3C:22:FB:9A:10:05".to_string());
        let list = vec![iface("eth0", [10, 0, 0, 5], 24), wlan];

        let explicit = Some(("192.168.1.50", "255.255.255.0"));
        let (range, mac) = scan_target(&list, explicit, None).unwrap();
        assert_eq!(range.to_string(), "192.168.1.0/24");
        assert_eq!(mac.as_deref(), Some("3C:22:FB:9A:10:05"));

        let (range, mac) = scan_target(&list, Some(("172.16.0.9", "16")), None).unwrap();
        assert_eq!(range.to_string(), "172.16.0.0/16");
        assert_eq!(mac, None);

        let (range, _) = scan_target(&list, None, Some("eth0")).unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/24");

        assert!(matches!(
            scan_target(&list, Some(("999.0.0.0", "24")), None),
            Err(ScanError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_interface_range_and_mac_fallback() {
        let wlan = iface("wlan0", [192, 168, 1, 50], 24);
        assert_eq!(wlan.range().unwrap().to_string(), "192.168.1.0/24");
        assert_eq!(wlan.mac_or_unknown(), UNKNOWN);
    }
}
