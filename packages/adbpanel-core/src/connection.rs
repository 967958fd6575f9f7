//! Wireless debug connect/disconnect for stored profiles

use crate::bridge::{Bridge, BridgeCommand, BridgeError};
use crate::command::CommandOutput;
use crate::registry::DeviceProfile;
use crate::resolver::IpResolver;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("No IP found for MAC {0}")]
    NoIpForMac(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// What was sent to the bridge and what it said back.
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    /// `host:port`
    pub endpoint: String,
    /// Whether the host came from MAC resolution rather than a static IP
    pub resolved: bool,
    pub args: Vec<String>,
    pub output: CommandOutput,
}

pub struct ConnectionController {
    resolver: Arc<dyn IpResolver>,
    bridge: Arc<dyn Bridge>,
}

impl ConnectionController {
    pub fn new(resolver: Arc<dyn IpResolver>, bridge: Arc<dyn Bridge>) -> Self {
        Self { resolver, bridge }
    }

    pub fn bridge(&self) -> Arc<dyn Bridge> {
        Arc::clone(&self.bridge)
    }

    pub fn resolver(&self) -> Arc<dyn IpResolver> {
        Arc::clone(&self.resolver)
    }

    pub async fn connect(
        &self,
        name: &str,
        profile: &DeviceProfile,
    ) -> Result<ConnectOutcome, ConnectError> {
        let (host, resolved) = self.host_for(profile).await?;
        tracing::info!("Connecting {} ({}:{})", name, host, profile.port);
        let command = BridgeCommand::Connect {
            host,
            port: profile.port,
        };
        self.issue(command, profile.port, resolved).await
    }

    pub async fn disconnect(
        &self,
        name: &str,
        profile: &DeviceProfile,
    ) -> Result<ConnectOutcome, ConnectError> {
        let (host, resolved) = self.host_for(profile).await?;
        tracing::info!("Disconnecting {} ({}:{})", name, host, profile.port);
        let command = BridgeCommand::Disconnect {
            host,
            port: profile.port,
        };
        self.issue(command, profile.port, resolved).await
    }

    /// Static IP if set, otherwise the resolver's answer.
    async fn host_for(&self, profile: &DeviceProfile) -> Result<(String, bool), ConnectError> {
        if let Some(ip) = profile.static_ip() {
            return Ok((ip.to_string(), false));
        }

        match self.resolver.resolve(&profile.mac).await {
            Some(ip) => Ok((ip.to_string(), true)),
            None => {
                tracing::warn!("No IP found for MAC {}", profile.mac);
                Err(ConnectError::NoIpForMac(profile.mac.clone()))
            }
        }
    }

    async fn issue(
        &self,
        command: BridgeCommand,
        port: u16,
        resolved: bool,
    ) -> Result<ConnectOutcome, ConnectError> {
        let endpoint = match &command {
            BridgeCommand::Connect { host, .. } | BridgeCommand::Disconnect { host, .. } => {
                format!("{}:{}", host, port)
            }
            _ => String::new(),
        };
        let args = command.args();
        let output = self.bridge.run(&args).await?;
        Ok(ConnectOutcome {
            endpoint,
            resolved,
            args,
            output,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::resolver::{
        ActiveScanner, MacResolver, NeighborEntry, NeighborSource, NeighborWarmer,
        SubnetDescriptor, SubnetDetector,
    };
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::time::Duration;

    struct NoSubnet;

    #[async_trait]
    impl SubnetDetector for NoSubnet {
        async fn detect(&self) -> Option<SubnetDescriptor> {
            None
        }
    }

    struct NoScanner;

    #[async_trait]
    impl ActiveScanner for NoScanner {
        async fn try_scan(&self, _subnet: &SubnetDescriptor, _export_path: &Path) -> bool {
            false
        }
    }

    struct IdleWarmer;

    #[async_trait]
    impl NeighborWarmer for IdleWarmer {
        async fn warm(&self, _subnet_base: &str) {}
    }

    struct Table(Vec<NeighborEntry>);

    #[async_trait]
    impl NeighborSource for Table {
        async fn read(&self) -> Vec<NeighborEntry> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_static_ip_skips_resolver() {
        let resolver = Arc::new(CountingResolver::answering(Some(Ipv4Addr::new(10, 0, 0, 9))));
        let bridge = Arc::new(RecordingBridge::default());
        let controller = ConnectionController::new(resolver.clone(), bridge.clone());

        let mut profile = DeviceProfile::new("AA:BB:CC:11:22:33");
        profile.ip = Some("192.168.1.50".to_string());

        let outcome = controller.connect("Pixel", &profile).await.unwrap();

        assert_eq!(resolver.calls(), 0);
        assert!(!outcome.resolved);
        assert_eq!(outcome.endpoint, "192.168.1.50:5555");
        assert_eq!(bridge.calls(), vec![vec!["connect", "192.168.1.50:5555"]]);
    }

    #[tokio::test]
    async fn test_connect_through_neighbor_table() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MacResolver::with_components(
            Arc::new(NoSubnet),
            Arc::new(NoScanner),
            Arc::new(IdleWarmer),
            Arc::new(Table(vec![NeighborEntry::new(
                "192.168.1.42",
                "aa-bb-cc-11-22-33",
            )])),
            dir.path().join("scan.txt"),
            Duration::ZERO,
        );
        let bridge = Arc::new(RecordingBridge::default());
        let controller = ConnectionController::new(Arc::new(resolver), bridge.clone());

        let mut registry = crate::registry::ProfileRegistry::load(dir.path().join("devices.json"));
        registry
            .add("Pixel", DeviceProfile::new("AA:BB:CC:11:22:33"))
            .unwrap();
        assert_eq!(registry.list(), vec!["Pixel"]);

        let profile = registry.get("Pixel").unwrap();
        let outcome = controller.connect("Pixel", &profile).await.unwrap();

        assert!(outcome.resolved);
        assert_eq!(bridge.calls(), vec![vec!["connect", "192.168.1.42:5555"]]);
    }

    #[tokio::test]
    async fn test_unresolved_mac_never_reaches_bridge() {
        let resolver = Arc::new(CountingResolver::answering(None));
        let bridge = Arc::new(RecordingBridge::default());
        let controller = ConnectionController::new(resolver.clone(), bridge.clone());
        let profile = DeviceProfile::new("de:ad:be:ef:00:01");

        let err = controller.disconnect("Ghost", &profile).await.unwrap_err();

        assert!(matches!(err, ConnectError::NoIpForMac(mac) if mac == "de:ad:be:ef:00:01"));
        assert_eq!(resolver.calls(), 1);
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_uses_profile_port() {
        let resolver = Arc::new(CountingResolver::answering(Some(Ipv4Addr::new(192, 168, 0, 8))));
        let bridge = Arc::new(RecordingBridge::default());
        let controller = ConnectionController::new(resolver, bridge.clone());
        let mut profile = DeviceProfile::new("aa:bb:cc:dd:ee:ff");
        profile.port = 37001;

        let outcome = controller.disconnect("TV", &profile).await.unwrap();

        assert_eq!(outcome.endpoint, "192.168.0.8:37001");
        assert_eq!(bridge.calls(), vec![vec!["disconnect", "192.168.0.8:37001"]]);
    }
}
