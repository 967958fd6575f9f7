//! Neighbor (ARP) table reading using system commands

use crate::command::run_with_timeout;
use async_trait::async_trait;
use std::time::Duration;

const NEIGHBOR_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of the OS neighbor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: String,
    pub mac: String,
    /// The source line, kept for permissive substring matching
    pub raw: String,
}

impl NeighborEntry {
    pub fn new(ip: impl Into<String>, mac: impl Into<String>) -> Self {
        let ip = ip.into();
        let mac = mac.into();
        let raw = format!("{}    {}", ip, mac);
        Self { ip, mac, raw }
    }
}

/// Anything that can produce the current neighbor table.
#[async_trait]
pub trait NeighborSource: Send + Sync {
    /// Never fails: an unreadable table is an empty table.
    async fn read(&self) -> Vec<NeighborEntry>;
}

/// Reads the table through the platform's `arp` / `ip neigh` command.
#[derive(Debug, Default, Clone)]
pub struct SystemNeighborTable;

#[async_trait]
impl NeighborSource for SystemNeighborTable {
    async fn read(&self) -> Vec<NeighborEntry> {
        for (program, args) in neighbor_commands() {
            match run_with_timeout(program, &args, Some(NEIGHBOR_COMMAND_TIMEOUT)).await {
                Ok(output) => {
                    let entries = parse_neighbor_table(&output.stdout);
                    tracing::debug!(
                        "{} {} returned {} neighbor entries",
                        program,
                        args.join(" "),
                        entries.len()
                    );
                    if !entries.is_empty() {
                        return entries;
                    }
                }
                Err(e) => {
                    tracing::debug!("Could not run {} {}: {}", program, args.join(" "), e);
                }
            }
        }
        Vec::new()
    }
}

/// Commands that dump the neighbor table, tried in order.
fn neighbor_commands() -> Vec<(&'static str, Vec<&'static str>)> {
    #[cfg(target_os = "windows")]
    {
        vec![("arp", vec!["-a"])]
    }

    #[cfg(target_os = "linux")]
    {
        vec![("ip", vec!["neigh", "show"]), ("arp", vec!["-n"])]
    }

    #[cfg(target_os = "macos")]
    {
        vec![("arp", vec!["-a", "-n"])]
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        vec![("arp", vec!["-a"])]
    }
}

/// Parse neighbor table output from any of the supported platforms:
///
/// ```text
/// Windows:  192.168.1.42          aa-bb-cc-11-22-33     dynamic
/// Linux:    192.168.1.42 dev wlan0 lladdr aa:bb:cc:11:22:33 REACHABLE
/// net-tools 192.168.1.42  ether  aa:bb:cc:11:22:33  C  wlan0
/// macOS:    ? (192.168.1.42) at aa:bb:cc:11:22:33 on en0 ifscope [ethernet]
/// ```
///
/// Lines without a dotted-quad address or a hardware address are skipped.
pub fn parse_neighbor_table(output: &str) -> Vec<NeighborEntry> {
    output.lines().filter_map(parse_neighbor_line).collect()
}

fn parse_neighbor_line(line: &str) -> Option<NeighborEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first = tokens.first()?;

    let (ip_index, ip) = if is_dotted_quad(first) {
        (0, first.to_string())
    } else {
        tokens.iter().enumerate().find_map(|(i, token)| {
            let inner = token.strip_prefix('(')?.strip_suffix(')')?;
            is_dotted_quad(inner).then(|| (i, inner.to_string()))
        })?
    };

    let mac = tokens[ip_index + 1..]
        .iter()
        .find(|token| is_hardware_address(token))?;

    if mac.chars().all(|c| matches!(c, '0' | ':' | '-' | '.')) {
        return None;
    }

    Some(NeighborEntry {
        ip,
        mac: mac.to_string(),
        raw: line.trim().to_string(),
    })
}

/// `^\d{1,3}(\.\d{1,3}){3}$`
pub fn is_dotted_quad(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| (1..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_digit()))
}

/// Hex groups joined by `:`, `-` or `.` (`aa:bb:..`, `aa-bb-..`, `aabb.ccdd.eeff`,
/// and the unpadded BSD form `a:b:c:d:e:f`).
fn is_hardware_address(token: &str) -> bool {
    let groups: Vec<&str> = token.split([':', '-', '.']).collect();
    let hex_digits: usize = groups.iter().map(|g| g.len()).sum();
    (groups.len() == 6 || groups.len() == 3)
        && groups
            .iter()
            .all(|g| !g.is_empty() && g.len() <= 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
        && (6..=12).contains(&hex_digits)
        && (groups.len() == 6 || hex_digits == 12)
}
