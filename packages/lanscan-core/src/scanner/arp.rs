//! Link-layer (MAC) resolution through the system neighbor table

use super::hidden_command;
use super::ping::ReachabilityProbe;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Resolves an address to its MAC address.
///
/// `None` is a normal outcome (host beyond the segment, firewalled, stale
/// cache, missing permission) and is reported as `"Unknown"` by the engine.
#[async_trait]
pub trait LinkLayerResolver: Send + Sync {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Primes the neighbor cache with a fresh probe, then reads the ARP table.
pub struct NeighborTableResolver {
    probe: Arc<dyn ReachabilityProbe>,
    refresh_timeout: Duration,
}

impl NeighborTableResolver {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, refresh_timeout: Duration) -> Self {
        Self {
            probe,
            refresh_timeout,
        }
    }
}

#[async_trait]
impl LinkLayerResolver for NeighborTableResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        // Outcome is irrelevant; the echo only exists to populate the cache.
        let _ = self.probe.probe(ip, self.refresh_timeout, 1).await;

        let mac = tokio::task::spawn_blocking(move || lookup_neighbor(ip))
            .await
            .ok()
            .flatten();

        match &mac {
            Some(mac) => tracing::debug!("ARP: {} -> {}", ip, mac),
            None => tracing::debug!("ARP: {} -> no neighbor entry", ip),
        }
        mac
    }
}

fn lookup_neighbor(ip: Ipv4Addr) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        lookup_neighbor_linux(ip)
    }

    #[cfg(target_os = "macos")]
    {
        lookup_neighbor_macos(ip)
    }

    #[cfg(target_os = "windows")]
    {
        lookup_neighbor_windows(ip)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = ip;
        None
    }
}

#[cfg(target_os = "linux")]
fn lookup_neighbor_linux(ip: Ipv4Addr) -> Option<String> {
    if let Ok(table) = std::fs::read_to_string("/proc/net/arp") {
        if let Some(mac) = parse_proc_net_arp(&table, ip) {
            return Some(mac);
        }
    }

    let output = hidden_command("ip")
        .args(["neigh", "show", &ip.to_string()])
        .output()
        .ok()?;
    parse_ip_neigh(&String::from_utf8_lossy(&output.stdout), ip)
}

#[cfg(target_os = "macos")]
fn lookup_neighbor_macos(ip: Ipv4Addr) -> Option<String> {
    let output = hidden_command("arp")
        .args(["-n", &ip.to_string()])
        .output()
        .ok()?;
    parse_arp_bsd(&String::from_utf8_lossy(&output.stdout), ip)
}

#[cfg(target_os = "windows")]
fn lookup_neighbor_windows(ip: Ipv4Addr) -> Option<String> {
    let output = hidden_command("arp")
        .args(["-a", &ip.to_string()])
        .output()
        .ok()?;
    parse_arp_windows(&String::from_utf8_lossy(&output.stdout), ip)
}

/// `/proc/net/arp`: `IP address  HW type  Flags  HW address  Mask  Device`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_proc_net_arp(table: &str, ip: Ipv4Addr) -> Option<String> {
    let target = ip.to_string();

    table.lines().skip(1).find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[0] != target {
            return None;
        }
        // Flags 0x0 marks an incomplete entry
        if parts[2] == "0x0" {
            return None;
        }
        canonical_mac(parts[3])
    })
}

/// `ip neigh`: `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_ip_neigh(output: &str, ip: Ipv4Addr) -> Option<String> {
    let target = ip.to_string();

    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next() != Some(target.as_str()) {
            return None;
        }
        words
            .skip_while(|&w| w != "lladdr")
            .nth(1)
            .and_then(canonical_mac)
    })
}

/// BSD/macOS `arp -n`: `? (192.168.1.1) at 0:1a:2b:3c:4d:5e on en0 ifscope [ethernet]`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_arp_bsd(output: &str, ip: Ipv4Addr) -> Option<String> {
    let target = ip.to_string();

    output.lines().find_map(|line| {
        let ip_start = line.find('(')?;
        let ip_end = line.find(')')?;
        if line.get(ip_start + 1..ip_end)? != target {
            return None;
        }
        let at_pos = line.find(" at ")?;
        let mac = line[at_pos + 4..].split_whitespace().next()?;
        canonical_mac(mac)
    })
}

/// Windows `arp -a`: `  192.168.1.1           00-1a-2b-3c-4d-5e     dynamic`
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn parse_arp_windows(output: &str, ip: Ipv4Addr) -> Option<String> {
    let target = ip.to_string();

    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || parts[0] != target {
            return None;
        }
        canonical_mac(parts[1])
    })
}

/// Normalize a MAC address to `AA:BB:CC:DD:EE:FF`.
///
/// Accepts colon, dash and dot separated forms (including the unpadded octets
/// printed by BSD `arp`) as well as 12 contiguous hex digits. Incomplete
/// (all-zero) and broadcast addresses yield `None`.
pub fn canonical_mac(raw: &str) -> Option<String> {
    let raw = raw.trim();

    let octets: Vec<u8> = if raw.contains([':', '-']) {
        let parts: Vec<&str> = raw.split([':', '-']).collect();
        if parts.len() != 6 {
            return None;
        }
        parts
            .iter()
            .map(|p| {
                if p.is_empty() || p.len() > 2 {
                    None
                } else {
                    u8::from_str_radix(p, 16).ok()
                }
            })
            .collect::<Option<Vec<u8>>>()?
    } else {
        let digits: String = raw.chars().filter(|c| *c != '.').collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        (0..6)
            .map(|i| u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).ok())
            .collect::<Option<Vec<u8>>>()?
    };

    if octets.iter().all(|&b| b == 0) || octets.iter().all(|&b| b == 0xff) {
        return None;
    }

    Some(
        octets
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
