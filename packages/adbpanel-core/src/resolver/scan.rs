//! Delegation to an external active subnet scanner (Angry IP Scanner CLI)

use super::subnet::SubnetDescriptor;
use crate::command::run_with_timeout;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Runs an external scanner that exports its findings to a file.
#[async_trait]
pub trait ActiveScanner: Send + Sync {
    /// `true` once a scanner exited cleanly or left `export_path` behind.
    async fn try_scan(&self, subnet: &SubnetDescriptor, export_path: &Path) -> bool;
}

/// Tries each candidate executable name in order until one runs.
pub struct ActiveScanDelegate {
    candidates: Vec<String>,
    timeout: Duration,
}

impl ActiveScanDelegate {
    pub fn new(candidates: Vec<String>, timeout: Duration) -> Self {
        Self { candidates, timeout }
    }
}

/// `-f:range <start> <end> -o <file>`
pub fn scan_args(subnet: &SubnetDescriptor, export_path: &Path) -> Vec<String> {
    vec![
        "-f:range".to_string(),
        subnet.range_start(),
        subnet.range_end(),
        "-o".to_string(),
        export_path.display().to_string(),
    ]
}

#[async_trait]
impl ActiveScanner for ActiveScanDelegate {
    async fn try_scan(&self, subnet: &SubnetDescriptor, export_path: &Path) -> bool {
        // A leftover export from an earlier run must not count as success
        if export_path.exists() {
            if let Err(e) = tokio::fs::remove_file(export_path).await {
                tracing::warn!("Could not remove stale scan export {:?}: {}", export_path, e);
            }
        }

        let args = scan_args(subnet, export_path);
        for exe in &self.candidates {
            match run_with_timeout(exe, &args, Some(self.timeout)).await {
                Ok(output) => {
                    if output.success() || export_path.exists() {
                        tracing::info!("Active scan of {} completed with {}", subnet, exe);
                        return true;
                    }
                    tracing::debug!(
                        "{} exited with {:?} and no export file",
                        exe,
                        output.code
                    );
                }
                Err(e) => {
                    tracing::debug!("Scanner {} unavailable: {}", exe, e);
                }
            }
        }

        tracing::debug!("No active scanner available for {}", subnet);
        false
    }
}

/// Find the line of a scanner export mentioning `normalized_mac` and return
/// its first whitespace-delimited token, assumed to be the IP address.
pub fn search_export(contents: &str, normalized_mac: &str) -> Option<String> {
    if normalized_mac.is_empty() {
        return None;
    }
    let data = contents.to_lowercase();
    data.lines()
        .filter(|line| line.contains(normalized_mac))
        .find_map(|line| line.split_whitespace().next().map(String::from))
}
