//! Optional port exposure probing (TCP connect)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Ports probed when exposure checking is enabled without an explicit list.
pub const DEFAULT_EXPOSURE_PORTS: &[u16] = &[
    21, 22, 23, 53, 80, 135, 139, 443, 445, 3389, 5900, 8080,
];

/// A flagged open port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRisk {
    pub port: u16,
    pub service: String,
    pub note: String,
}

/// Open ports on a host and the subset considered risky.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureSummary {
    pub open_ports: Vec<u16>,
    pub risks: Vec<ExposureRisk>,
}

impl ExposureSummary {
    pub fn from_open_ports(mut open_ports: Vec<u16>) -> Self {
        open_ports.sort_unstable();
        open_ports.dedup();

        let risks = open_ports
            .iter()
            .filter_map(|&port| {
                risk_for_port(port).map(|(service, note)| ExposureRisk {
                    port,
                    service: service.to_string(),
                    note: note.to_string(),
                })
            })
            .collect();

        Self { open_ports, risks }
    }

    pub fn is_empty(&self) -> bool {
        self.open_ports.is_empty()
    }
}

impl fmt::Display for ExposureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.open_ports.is_empty() {
            return write!(f, "no open ports");
        }

        let ports: Vec<String> = self.open_ports.iter().map(u16::to_string).collect();
        write!(f, "open: {}", ports.join(", "))?;

        if !self.risks.is_empty() {
            let risks: Vec<String> = self
                .risks
                .iter()
                .map(|r| format!("{} ({}) {}", r.service, r.port, r.note))
                .collect();
            write!(f, " | risks: {}", risks.join("; "))?;
        }
        Ok(())
    }
}

fn risk_for_port(port: u16) -> Option<(&'static str, &'static str)> {
    match port {
        21 => Some(("FTP", "cleartext credentials")),
        23 => Some(("Telnet", "cleartext remote shell")),
        135 => Some(("MS RPC", "endpoint mapper exposed")),
        139 => Some(("NetBIOS", "legacy file sharing")),
        445 => Some(("SMB", "file sharing exposed")),
        3389 => Some(("RDP", "remote desktop exposed")),
        5900 => Some(("VNC", "remote display often weakly authenticated")),
        _ => None,
    }
}

#[async_trait]
pub trait ExposureProbe: Send + Sync {
    async fn scan(&self, ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> ExposureSummary;
}

/// Plain TCP connect scan; a port is open when the handshake completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnectProbe;

#[async_trait]
impl ExposureProbe for TcpConnectProbe {
    async fn scan(&self, ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> ExposureSummary {
        let checks = ports.iter().map(move |&port| async move {
            let addr = SocketAddr::new(IpAddr::V4(ip), port);
            match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
                Ok(Ok(_)) => Some(port),
                _ => None,
            }
        });

        let open_ports: Vec<u16> = futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect();

        tracing::debug!("Exposure: {} open ports {:?}", ip, open_ports);
        ExposureSummary::from_open_ports(open_ports)
    }
}
