//! Candidate address enumeration for a local IPv4 network

use crate::error::ScanError;
use ipnetwork::Ipv4Network;
use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt;
use std::net::Ipv4Addr;

/// The local address together with the network it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    local_address: Ipv4Addr,
    network: Ipv4Network,
}

impl NetworkRange {
    /// Build a range from a local address and a mask given either as a dotted
    /// quad (`255.255.255.0`) or as a prefix length (`24` or `/24`).
    pub fn parse(address: &str, mask: &str) -> Result<Self, ScanError> {
        let local_address: Ipv4Addr = address
            .trim()
            .parse()
            .map_err(|_| ScanError::InvalidRange(format!("address '{}' is not IPv4", address)))?;

        let prefix = parse_mask(mask)?;
        Self::from_prefix(local_address, prefix)
    }

    pub fn from_prefix(local_address: Ipv4Addr, prefix: u8) -> Result<Self, ScanError> {
        let network = Ipv4Network::new(local_address, prefix)
            .and_then(|n| Ipv4Network::new(n.network(), prefix))
            .map_err(|e| ScanError::InvalidRange(format!("{}/{}: {}", local_address, prefix, e)))?;

        Ok(Self {
            local_address,
            network,
        })
    }

    pub fn local_address(&self) -> Ipv4Addr {
        self.local_address
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.network.mask()
    }

    /// Whether network and broadcast addresses are excluded. /31 and /32 have
    /// no such distinction, so every address is a host.
    fn excludes_edges(&self) -> bool {
        self.prefix() < 31
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix()));
        if self.excludes_edges() { size - 2 } else { size }
    }

    /// Lowest usable host address, conventionally the gateway.
    pub fn first_host(&self) -> Ipv4Addr {
        let base = u32::from(self.network.network());
        if self.excludes_edges() {
            Ipv4Addr::from(base + 1)
        } else {
            Ipv4Addr::from(base)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.network.contains(ip)
    }

    /// Every usable host address in ascending order.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let network = self.network.network();
        let broadcast = self.network.broadcast();
        let excludes_edges = self.excludes_edges();

        self.network
            .iter()
            .filter(|ip| !excludes_edges || (*ip != network && *ip != broadcast))
            .collect()
    }

    /// Host addresses in scan order: ascending, or a random permutation when
    /// `shuffle` is set.
    pub fn candidates(&self, shuffle: bool) -> Vec<Ipv4Addr> {
        if shuffle {
            self.candidates_shuffled(&mut rand::thread_rng())
        } else {
            self.hosts()
        }
    }

    pub fn candidates_shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Ipv4Addr> {
        let mut hosts = self.hosts();
        hosts.shuffle(rng);
        hosts
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network.network(), self.network.prefix())
    }
}

/// Parse a dotted-quad mask or a prefix length into a prefix length.
pub fn parse_mask(mask: &str) -> Result<u8, ScanError> {
    let mask = mask.trim();

    if mask.contains('.') {
        let dotted: Ipv4Addr = mask
            .parse()
            .map_err(|_| ScanError::InvalidRange(format!("mask '{}' is not a dotted quad", mask)))?;
        return ipnetwork::ipv4_mask_to_prefix(dotted)
            .map_err(|_| ScanError::InvalidRange(format!("mask '{}' is not contiguous", mask)));
    }

    let prefix: u8 = mask
        .trim_start_matches('/')
        .parse()
        .map_err(|_| ScanError::InvalidRange(format!("mask '{}' is not a prefix length", mask)))?;

    if prefix > 32 {
        return Err(ScanError::InvalidRange(format!("prefix /{} exceeds 32", prefix)));
    }

    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn test_parse_dotted_and_prefix_masks() {
        let dotted = NetworkRange::parse("192.168.1.50", "255.255.255.0").unwrap();
        let prefix = NetworkRange::parse("192.168.1.50", "24").unwrap();
        let slashed = NetworkRange::parse("192.168.1.50", "/24").unwrap();

        assert_eq!(dotted, prefix);
        assert_eq!(prefix, slashed);
        assert_eq!(dotted.to_string(), "192.168.1.0/24");
        assert_eq!(dotted.local_address(), Ipv4Addr::new(192, 168, 1, 50));
    }

    #[test]
    fn test_invalid_masks_rejected() {
        for mask in ["999.0.0.0", "255.0.255.0", "33", "abc", ""] {
            let err = NetworkRange::parse("192.168.1.50", mask).unwrap_err();
            assert!(matches!(err, ScanError::InvalidRange(_)), "mask {:?}", mask);
        }
        assert!(matches!(
            NetworkRange::parse("192.168.1.300", "24"),
            Err(ScanError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_host_counts_exclude_network_and_broadcast() {
        for prefix in 20..=30u8 {
            let range = NetworkRange::from_prefix(Ipv4Addr::new(10, 1, 2, 3), prefix).unwrap();
            let hosts = range.hosts();
            let expected = (1u64 << (32 - prefix)) - 2;

            assert_eq!(hosts.len() as u64, expected, "prefix /{}", prefix);
            assert_eq!(range.host_count(), expected);
            assert!(!hosts.contains(&range.network().network()));
            assert!(!hosts.contains(&range.network().broadcast()));
        }
    }

    #[test]
    fn test_point_to_point_and_single_host() {
        let p2p = NetworkRange::from_prefix(Ipv4Addr::new(10, 0, 0, 1), 31).unwrap();
        assert_eq!(p2p.hosts(), vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(p2p.first_host(), Ipv4Addr::new(10, 0, 0, 0));

        let single = NetworkRange::from_prefix(Ipv4Addr::new(10, 0, 0, 7), 32).unwrap();
        assert_eq!(single.hosts(), vec![Ipv4Addr::new(10, 0, 0, 7)]);
        assert_eq!(single.host_count(), 1);
    }

    #[test]
    fn test_unshuffled_is_ascending_and_deterministic() {
        let range = NetworkRange::parse("192.168.1.50", "255.255.255.0").unwrap();
        let first = range.candidates(false);
        let second = range.candidates(false);

        assert_eq!(first, second);
        assert_eq!(first.len(), 254);
        assert_eq!(first[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(first[253], Ipv4Addr::new(192, 168, 1, 254));
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_shuffled_is_permutation() {
        let range = NetworkRange::parse("192.168.1.50", "24").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let shuffled = range.candidates_shuffled(&mut rng);

        assert_eq!(shuffled.len(), 254);
        let expected: HashSet<_> = range.hosts().into_iter().collect();
        let actual: HashSet<_> = shuffled.into_iter().collect();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_first_host_is_gateway_candidate() {
        let range = NetworkRange::parse("172.16.5.9", "255.255.252.0").unwrap();
        assert_eq!(range.first_host(), Ipv4Addr::new(172, 16, 4, 1));
        assert!(range.contains(Ipv4Addr::new(172, 16, 7, 254)));
        assert!(!range.contains(Ipv4Addr::new(172, 16, 8, 1)));
    }
}
