//! Local subnet detection through the outbound routing interface

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Prefix length reported for every detected subnet.
/// The interface netmask is never inspected.
pub const ASSUMED_PREFIX_LEN: u8 = 24;

/// The /24 the local machine belongs to, as `a.b.c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetDescriptor {
    pub base: String,
    pub prefix_len: u8,
}

impl SubnetDescriptor {
    /// Build the descriptor for the /24 containing `ip`.
    pub fn from_local_ip(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        Self {
            base: format!("{}.{}.{}", a, b, c),
            prefix_len: ASSUMED_PREFIX_LEN,
        }
    }

    pub fn range_start(&self) -> String {
        format!("{}.1", self.base)
    }

    pub fn range_end(&self) -> String {
        format!("{}.254", self.base)
    }
}

impl std::fmt::Display for SubnetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.0/{}", self.base, self.prefix_len)
    }
}

/// Host addresses of the /24 named by `base` (`"a.b.c"`), skipping the
/// network and broadcast addresses. An unparsable base yields no hosts.
pub fn host_addresses(base: &str) -> Vec<Ipv4Addr> {
    let network = match format!("{}.0", base)
        .parse::<Ipv4Addr>()
        .ok()
        .and_then(|ip| Ipv4Network::new(ip, ASSUMED_PREFIX_LEN).ok())
    {
        Some(network) => network,
        None => {
            tracing::warn!("Invalid subnet base {:?}", base);
            return Vec::new();
        }
    };

    network
        .iter()
        .filter(|ip| *ip != network.network() && *ip != network.broadcast())
        .collect()
}

/// Source of the local subnet. `None` means unknown.
#[async_trait]
pub trait SubnetDetector: Send + Sync {
    async fn detect(&self) -> Option<SubnetDescriptor>;
}

/// Picks the local address the OS would route through toward a public host.
/// A connected UDP socket sends nothing; only the routing table is consulted.
pub struct LocalSubnetDetector {
    probe_address: String,
    timeout: Duration,
}

impl LocalSubnetDetector {
    pub fn new(probe_address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_address: probe_address.into(),
            timeout,
        }
    }

    async fn local_ipv4(&self) -> anyhow::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.probe_address.as_str()).await?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            other => Err(anyhow::anyhow!("No usable local IPv4 address ({})", other)),
        }
    }
}

#[async_trait]
impl SubnetDetector for LocalSubnetDetector {
    async fn detect(&self) -> Option<SubnetDescriptor> {
        match tokio::time::timeout(self.timeout, self.local_ipv4()).await {
            Ok(Ok(ip)) => {
                let subnet = SubnetDescriptor::from_local_ip(ip);
                tracing::debug!("Local address {} -> subnet {}", ip, subnet);
                Some(subnet)
            }
            Ok(Err(e)) => {
                tracing::debug!("Local subnet detection failed: {}", e);
                None
            }
            Err(_) => {
                tracing::debug!(
                    "Local subnet detection timed out after {}ms",
                    self.timeout.as_millis()
                );
                None
            }
        }
    }
}
