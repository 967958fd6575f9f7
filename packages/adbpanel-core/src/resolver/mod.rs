//! MAC-to-IP resolution.
//!
//! Finds the current IPv4 address of a device from its hardware address by
//! chaining strategies with fallbacks:
//! - Active subnet scan through an external scanner (export file grep)
//! - Ping sweep to warm the OS neighbor cache
//! - Neighbor (ARP) table lookup

pub mod arp;
pub mod scan;
pub mod subnet;
pub mod sweep;

pub use arp::{NeighborEntry, NeighborSource, SystemNeighborTable};
pub use scan::{ActiveScanDelegate, ActiveScanner};
pub use subnet::{LocalSubnetDetector, SubnetDescriptor, SubnetDetector};
pub use sweep::{NeighborWarmer, PingProber, Prober, SweepWarmer};

use crate::config::AppConfig;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lowercase and unify `:`, `.` and space separators to `-`.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, ':' | '.' | ' ') { '-' } else { c })
        .collect()
}

/// The 12 hex digits of a hardware address, lowercased, or `None` when the
/// input does not have exactly 12 once separators are dropped.
fn mac_digits(mac: &str) -> Option<String> {
    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect();
    (digits.len() == 12 && digits.chars().all(|c| c.is_ascii_hexdigit())).then_some(digits)
}

/// Does this neighbor row belong to `mac`?
///
/// Matching is loose: the raw line only has to contain the
/// normalized MAC or the colon form of the input, or the parsed MAC has to
/// normalize to the same string. The substring test can in principle hit
/// an unrelated token on the same line.
///
/// Normalization only swaps separators, so `aabb.ccdd.eeff` and
/// `aa:bb:cc:dd:ee:ff` differ after it. Addresses that both carry 12 hex
/// digits are therefore also compared digit for digit. Unpadded BSD forms
/// (`0:11:22:..`) have fewer digits and only match through the other rules.
pub fn entry_matches(entry: &NeighborEntry, normalized: &str, colon_variant: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    let line = entry.raw.to_lowercase();
    normalize_mac(&entry.mac) == normalized
        || line.contains(normalized)
        || (!colon_variant.is_empty() && line.contains(colon_variant))
        || matches!(
            (mac_digits(&entry.mac), mac_digits(normalized)),
            (Some(a), Some(b)) if a == b
        )
}

/// First neighbor row matching `mac`, in table order. Rows whose IP is not a
/// dotted quad are ignored.
pub fn find_in_neighbors<'a>(entries: &'a [NeighborEntry], mac: &str) -> Option<&'a NeighborEntry> {
    let normalized = normalize_mac(mac);
    let colon_variant = mac.trim().to_lowercase().replace('-', ":");
    entries.iter().find(|entry| {
        arp::is_dotted_quad(&entry.ip) && entry_matches(entry, &normalized, &colon_variant)
    })
}

/// State of one `resolve()` call.
#[derive(Debug, Clone)]
pub struct ResolutionAttempt {
    pub mac: String,
    pub normalized: String,
    pub subnet: Option<SubnetDescriptor>,
    /// Strategy names in the order they ran
    pub tried: Vec<&'static str>,
    pub found: Option<Ipv4Addr>,
}

impl ResolutionAttempt {
    pub fn new(mac: &str, subnet: Option<SubnetDescriptor>) -> Self {
        Self {
            mac: mac.to_string(),
            normalized: normalize_mac(mac),
            subnet,
            tried: Vec::new(),
            found: None,
        }
    }
}

/// Result of a single strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Found(Ipv4Addr),
    NoResult,
    Failed(String),
}

/// One step of the resolution chain.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Strategies that work on the local subnet are skipped when it is unknown.
    fn needs_subnet(&self) -> bool {
        false
    }

    async fn attempt(&self, attempt: &ResolutionAttempt) -> StrategyOutcome;
}

/// Run the external scanner and grep its export for the MAC.
pub struct ActiveScanStrategy {
    scanner: Arc<dyn ActiveScanner>,
    export_path: PathBuf,
}

impl ActiveScanStrategy {
    pub fn new(scanner: Arc<dyn ActiveScanner>, export_path: PathBuf) -> Self {
        Self {
            scanner,
            export_path,
        }
    }
}

#[async_trait]
impl ResolutionStrategy for ActiveScanStrategy {
    fn name(&self) -> &'static str {
        "active-scan"
    }

    fn needs_subnet(&self) -> bool {
        true
    }

    async fn attempt(&self, attempt: &ResolutionAttempt) -> StrategyOutcome {
        let Some(subnet) = attempt.subnet.as_ref() else {
            return StrategyOutcome::NoResult;
        };

        if !self.scanner.try_scan(subnet, &self.export_path).await {
            return StrategyOutcome::NoResult;
        }

        let contents = match tokio::fs::read(&self.export_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return StrategyOutcome::Failed(format!(
                    "could not read scan export {:?}: {}",
                    self.export_path, e
                ));
            }
        };

        match scan::search_export(&contents, &attempt.normalized) {
            Some(token) => match token.parse::<Ipv4Addr>() {
                Ok(ip) => StrategyOutcome::Found(ip),
                Err(_) => StrategyOutcome::Failed(format!(
                    "scan export line for {} starts with {:?}, not an IPv4 address",
                    attempt.normalized, token
                )),
            },
            None => StrategyOutcome::NoResult,
        }
    }
}

/// Ping the whole /24 so the neighbor table fills up, then let it settle.
pub struct SweepStrategy {
    warmer: Arc<dyn NeighborWarmer>,
    settle_delay: Duration,
}

impl SweepStrategy {
    pub fn new(warmer: Arc<dyn NeighborWarmer>, settle_delay: Duration) -> Self {
        Self {
            warmer,
            settle_delay,
        }
    }
}

#[async_trait]
impl ResolutionStrategy for SweepStrategy {
    fn name(&self) -> &'static str {
        "sweep-warm"
    }

    fn needs_subnet(&self) -> bool {
        true
    }

    async fn attempt(&self, attempt: &ResolutionAttempt) -> StrategyOutcome {
        let Some(subnet) = attempt.subnet.as_ref() else {
            return StrategyOutcome::NoResult;
        };
        self.warmer.warm(&subnet.base).await;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        StrategyOutcome::NoResult
    }
}

/// Look the MAC up in the current neighbor table.
pub struct NeighborTableStrategy {
    source: Arc<dyn NeighborSource>,
}

impl NeighborTableStrategy {
    pub fn new(source: Arc<dyn NeighborSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ResolutionStrategy for NeighborTableStrategy {
    fn name(&self) -> &'static str {
        "neighbor-table"
    }

    async fn attempt(&self, attempt: &ResolutionAttempt) -> StrategyOutcome {
        let entries = self.source.read().await;
        tracing::debug!("Neighbor table has {} entries", entries.len());

        match find_in_neighbors(&entries, &attempt.mac) {
            Some(entry) => match entry.ip.parse::<Ipv4Addr>() {
                Ok(ip) => StrategyOutcome::Found(ip),
                Err(_) => StrategyOutcome::Failed(format!(
                    "neighbor row {:?} has an out-of-range address",
                    entry.raw
                )),
            },
            None => StrategyOutcome::NoResult,
        }
    }
}

/// Anything that can turn a MAC address into an IPv4 address.
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// `None` means no strategy found the device.
    async fn resolve(&self, mac: &str) -> Option<Ipv4Addr>;
}

/// Detects the subnet once, then folds the strategies left to right and
/// stops at the first success.
pub struct MacResolver {
    subnet: Arc<dyn SubnetDetector>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    overall_timeout: Option<Duration>,
}

impl MacResolver {
    pub fn new(
        subnet: Arc<dyn SubnetDetector>,
        strategies: Vec<Box<dyn ResolutionStrategy>>,
    ) -> Self {
        Self {
            subnet,
            strategies,
            overall_timeout: None,
        }
    }

    /// Wire up the standard chain: active scan, sweep, neighbor table.
    pub fn with_components(
        subnet: Arc<dyn SubnetDetector>,
        scanner: Arc<dyn ActiveScanner>,
        warmer: Arc<dyn NeighborWarmer>,
        neighbors: Arc<dyn NeighborSource>,
        export_path: PathBuf,
        settle_delay: Duration,
    ) -> Self {
        Self::new(
            subnet,
            vec![
                Box::new(ActiveScanStrategy::new(scanner, export_path)),
                Box::new(SweepStrategy::new(warmer, settle_delay)),
                Box::new(NeighborTableStrategy::new(neighbors)),
            ],
        )
    }

    /// The system-backed resolver described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let resolver = &config.resolver;
        Self::with_components(
            Arc::new(LocalSubnetDetector::new(
                resolver.probe_address.clone(),
                resolver.subnet_timeout(),
            )),
            Arc::new(ActiveScanDelegate::new(
                resolver.scanner_candidates.clone(),
                resolver.scan_timeout(),
            )),
            Arc::new(SweepWarmer::with_ping(config.sweep.clone())),
            Arc::new(SystemNeighborTable),
            config.export_path(),
            resolver.settle_delay(),
        )
        .with_overall_timeout(resolver.overall_timeout())
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Run the full chain and return the attempt record.
    pub async fn run(&self, mac: &str) -> ResolutionAttempt {
        let start = Instant::now();
        let subnet = self.subnet.detect().await;
        if subnet.is_none() {
            tracing::info!("Local subnet unknown, reading neighbor table directly");
        }

        let mut attempt = ResolutionAttempt::new(mac, subnet);
        if attempt.normalized.is_empty() {
            tracing::warn!("Empty MAC address, nothing to resolve");
            return attempt;
        }

        for strategy in &self.strategies {
            if strategy.needs_subnet() && attempt.subnet.is_none() {
                tracing::debug!("{}: skipped, local subnet unknown", strategy.name());
                continue;
            }
            attempt.tried.push(strategy.name());
            match strategy.attempt(&attempt).await {
                StrategyOutcome::Found(ip) => {
                    tracing::info!(
                        "Resolved {} -> {} via {} in {:.1}s",
                        attempt.normalized,
                        ip,
                        strategy.name(),
                        start.elapsed().as_secs_f64()
                    );
                    attempt.found = Some(ip);
                    break;
                }
                StrategyOutcome::NoResult => {
                    tracing::debug!("{}: no result for {}", strategy.name(), attempt.normalized);
                }
                StrategyOutcome::Failed(reason) => {
                    tracing::warn!("{} failed: {}", strategy.name(), reason);
                }
            }
        }

        if attempt.found.is_none() {
            tracing::info!(
                "No IP found for {} after {:?}",
                attempt.normalized,
                attempt.tried
            );
        }
        attempt
    }
}

#[async_trait]
impl IpResolver for MacResolver {
    async fn resolve(&self, mac: &str) -> Option<Ipv4Addr> {
        match self.overall_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(mac)).await {
                Ok(attempt) => attempt.found,
                Err(_) => {
                    tracing::warn!(
                        "Resolution of {} gave up after {}s",
                        mac,
                        limit.as_secs()
                    );
                    None
                }
            },
            None => self.run(mac).await.found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSubnet(Option<SubnetDescriptor>);

    #[async_trait]
    impl SubnetDetector for FixedSubnet {
        async fn detect(&self) -> Option<SubnetDescriptor> {
            self.0.clone()
        }
    }

    fn home_subnet() -> Arc<FixedSubnet> {
        Arc::new(FixedSubnet(Some(SubnetDescriptor::from_local_ip(
            Ipv4Addr::new(192, 168, 1, 10),
        ))))
    }

    struct FakeScanner {
        export: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeScanner {
        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                export: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn exporting(contents: &str) -> Arc<Self> {
            Arc::new(Self {
                export: Some(contents.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ActiveScanner for FakeScanner {
        async fn try_scan(&self, _subnet: &SubnetDescriptor, export_path: &Path) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.export {
                Some(contents) => {
                    std::fs::write(export_path, contents).unwrap();
                    true
                }
                None => false,
            }
        }
    }

    #[derive(Default)]
    struct RecordingWarmer {
        bases: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NeighborWarmer for RecordingWarmer {
        async fn warm(&self, subnet_base: &str) {
            self.bases.lock().unwrap().push(subnet_base.to_string());
        }
    }

    struct FakeTable {
        entries: Vec<NeighborEntry>,
        reads: AtomicUsize,
    }

    impl FakeTable {
        fn with(entries: Vec<NeighborEntry>) -> Arc<Self> {
            Arc::new(Self {
                entries,
                reads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NeighborSource for FakeTable {
        async fn read(&self) -> Vec<NeighborEntry> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.entries.clone()
        }
    }

    struct Harness {
        resolver: MacResolver,
        scanner: Arc<FakeScanner>,
        warmer: Arc<RecordingWarmer>,
        table: Arc<FakeTable>,
        _dir: tempfile::TempDir,
    }

    fn harness(
        subnet: Arc<FixedSubnet>,
        scanner: Arc<FakeScanner>,
        entries: Vec<NeighborEntry>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let warmer = Arc::new(RecordingWarmer::default());
        let table = FakeTable::with(entries);
        let resolver = MacResolver::with_components(
            subnet,
            scanner.clone(),
            warmer.clone(),
            table.clone(),
            dir.path().join("export.txt"),
            Duration::ZERO,
        );
        Harness {
            resolver,
            scanner,
            warmer,
            table,
            _dir: dir,
        }
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA:BB:CC:11:22:33"), "aa-bb-cc-11-22-33");
        assert_eq!(normalize_mac("aa-bb-cc-11-22-33"), "aa-bb-cc-11-22-33");
        assert_eq!(normalize_mac("AABB.CC11.2233"), "aabb-cc11-2233");
        assert_eq!(normalize_mac("aa bb cc 11 22 33"), "aa-bb-cc-11-22-33");
        assert_eq!(normalize_mac("  "), "");
    }

    #[test]
    fn test_separator_styles_match_same_entry() {
        let colon = [NeighborEntry::new("192.168.1.42", "aa:bb:cc:dd:ee:ff")];
        let dash = [NeighborEntry::new("192.168.1.42", "AA-BB-CC-DD-EE-FF")];
        let dotted = [NeighborEntry::new("192.168.1.42", "aabb.ccdd.eeff")];

        for input in ["aa:bb:cc:dd:ee:ff", "AA-BB-CC-DD-EE-FF", "aa bb cc dd ee ff"] {
            assert!(find_in_neighbors(&colon, input).is_some(), "{} vs colon", input);
            assert!(find_in_neighbors(&dash, input).is_some(), "{} vs dash", input);
        }
        assert!(find_in_neighbors(&dotted, "AABB.CCDD.EEFF").is_some());
        assert!(find_in_neighbors(&dotted, "aabb ccdd eeff").is_some());
    }

    #[test]
    fn test_dotted_input_matches_colon_and_dash_rows() {
        let colon = [NeighborEntry::new("192.168.1.42", "aa:bb:cc:dd:ee:ff")];
        let dash = [NeighborEntry::new("192.168.1.43", "AA-BB-CC-DD-EE-FF")];
        let dotted = [NeighborEntry::new("192.168.1.44", "aabb.ccdd.eeff")];

        assert_eq!(find_in_neighbors(&colon, "aabb.ccdd.eeff").unwrap().ip, "192.168.1.42");
        assert_eq!(find_in_neighbors(&dash, "AABB.CCDD.EEFF").unwrap().ip, "192.168.1.43");
        assert_eq!(find_in_neighbors(&dotted, "aa:bb:cc:dd:ee:ff").unwrap().ip, "192.168.1.44");
        assert!(find_in_neighbors(&colon, "aabb.ccdd.eef0").is_none());
    }

    #[test]
    fn test_first_matching_row_wins() {
        let entries = [
            NeighborEntry::new("192.168.1.20", "aa-bb-cc-11-22-33"),
            NeighborEntry::new("192.168.1.42", "aa-bb-cc-11-22-33"),
        ];
        let entry = find_in_neighbors(&entries, "AA:BB:CC:11:22:33").unwrap();
        assert_eq!(entry.ip, "192.168.1.20");
    }

    #[test]
    fn test_non_ip_rows_are_ignored() {
        let entries = [NeighborEntry {
            ip: "gateway".to_string(),
            mac: "aa-bb-cc-11-22-33".to_string(),
            raw: "gateway aa-bb-cc-11-22-33".to_string(),
        }];
        assert!(find_in_neighbors(&entries, "aa-bb-cc-11-22-33").is_none());
        assert!(find_in_neighbors(&entries, "").is_none());
    }

    #[tokio::test]
    async fn test_resolves_from_neighbor_table_after_sweep() {
        let h = harness(
            home_subnet(),
            FakeScanner::unavailable(),
            vec![
                NeighborEntry::new("192.168.1.1", "00-11-22-33-44-55"),
                NeighborEntry::new("192.168.1.42", "aa-bb-cc-11-22-33"),
            ],
        );

        let attempt = h.resolver.run("AA:BB:CC:11:22:33").await;

        assert_eq!(attempt.found, Some(Ipv4Addr::new(192, 168, 1, 42)));
        assert_eq!(attempt.tried, vec!["active-scan", "sweep-warm", "neighbor-table"]);
        assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*h.warmer.bases.lock().unwrap(), vec!["192.168.1".to_string()]);
        assert_eq!(h.table.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scan_export_short_circuits() {
        let h = harness(
            home_subnet(),
            FakeScanner::exporting("192.168.1.77\t4 ms\tpixel\tAA-BB-CC-11-22-33\n"),
            vec![NeighborEntry::new("192.168.1.42", "aa-bb-cc-11-22-33")],
        );

        let attempt = h.resolver.run("aa:bb:cc:11:22:33").await;

        assert_eq!(attempt.found, Some(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(attempt.tried, vec!["active-scan"]);
        assert!(h.warmer.bases.lock().unwrap().is_empty());
        assert_eq!(h.table.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scan_without_mac_falls_through() {
        let h = harness(
            home_subnet(),
            FakeScanner::exporting("192.168.1.5\t1 ms\trouter\t00-11-22-33-44-55\n"),
            vec![NeighborEntry::new("192.168.1.42", "aa-bb-cc-11-22-33")],
        );

        let attempt = h.resolver.run("aa-bb-cc-11-22-33").await;

        assert_eq!(attempt.found, Some(Ipv4Addr::new(192, 168, 1, 42)));
        assert_eq!(h.warmer.bases.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_subnet_skips_scan_and_sweep() {
        let h = harness(
            Arc::new(FixedSubnet(None)),
            FakeScanner::exporting("192.168.1.77 aa-bb-cc-11-22-33\n"),
            vec![NeighborEntry::new("10.0.0.8", "aa:bb:cc:11:22:33")],
        );

        let attempt = h.resolver.run("AA:BB:CC:11:22:33").await;

        assert_eq!(attempt.found, Some(Ipv4Addr::new(10, 0, 0, 8)));
        assert_eq!(attempt.tried, vec!["neighbor-table"]);
        assert_eq!(h.scanner.calls.load(Ordering::SeqCst), 0);
        assert!(h.warmer.bases.lock().unwrap().is_empty());

        assert_eq!(
            h.resolver.resolve("AA:BB:CC:11:22:33").await,
            Some(Ipv4Addr::new(10, 0, 0, 8))
        );
    }

    #[tokio::test]
    async fn test_absent_mac_is_not_found() {
        let h = harness(
            home_subnet(),
            FakeScanner::unavailable(),
            vec![NeighborEntry::new("192.168.1.1", "00-11-22-33-44-55")],
        );

        assert_eq!(h.resolver.resolve("de:ad:be:ef:00:01").await, None);
        assert_eq!(h.resolver.resolve("").await, None);
    }

    struct SlowStrategy;

    #[async_trait]
    impl ResolutionStrategy for SlowStrategy {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn attempt(&self, _attempt: &ResolutionAttempt) -> StrategyOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StrategyOutcome::NoResult
        }
    }

    #[tokio::test]
    async fn test_overall_timeout_yields_not_found() {
        let resolver = MacResolver::new(home_subnet(), vec![Box::new(SlowStrategy)])
            .with_overall_timeout(Duration::from_millis(50));

        assert_eq!(resolver.resolve("aa:bb:cc:11:22:33").await, None);
    }
}
