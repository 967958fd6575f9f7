//! Neighbor cache warm-up sweep using the system ping command

use super::subnet::host_addresses;
use crate::command::run_with_timeout;
use crate::config::SweepConfig;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single reachability probe. Only its side effect on the neighbor
/// cache matters; the outcome is ignored.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration);
}

/// One-shot ping through the system `ping` binary.
#[derive(Debug, Default, Clone)]
pub struct PingProber;

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration) {
        let ip = ip.to_string();
        let args = ping_args(&ip, timeout);
        // The process is killed once the timeout elapses; the echo request
        // (and the ARP lookup it triggers) has already gone out by then.
        if let Err(e) = run_with_timeout("ping", &args, Some(timeout)).await {
            tracing::trace!("ping {}: {}", ip, e);
        }
    }
}

fn ping_args(ip: &str, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1).to_string();

    #[cfg(target_os = "windows")]
    {
        vec!["-n".into(), "1".into(), "-w".into(), millis, ip.into()]
    }

    #[cfg(target_os = "macos")]
    {
        vec!["-c".into(), "1".into(), "-W".into(), millis, ip.into()]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // Linux ping only takes whole seconds; the caller's timeout does the rest.
        let _ = millis;
        vec!["-c".into(), "1".into(), "-W".into(), "1".into(), ip.into()]
    }
}

/// Anything that can coax the OS into filling its neighbor table.
#[async_trait]
pub trait NeighborWarmer: Send + Sync {
    async fn warm(&self, subnet_base: &str);
}

/// Probes every host of a /24 in paced batches.
pub struct SweepWarmer {
    prober: Arc<dyn Prober>,
    config: SweepConfig,
}

impl SweepWarmer {
    pub fn new(prober: Arc<dyn Prober>, config: SweepConfig) -> Self {
        Self { prober, config }
    }

    pub fn with_ping(config: SweepConfig) -> Self {
        Self::new(Arc::new(PingProber), config)
    }
}

#[async_trait]
impl NeighborWarmer for SweepWarmer {
    /// Best effort: returns after a short grace period per probe even if
    /// some probes are still outstanding.
    async fn warm(&self, subnet_base: &str) {
        let ips = host_addresses(subnet_base);
        if ips.is_empty() {
            return;
        }

        let sweep_start = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let probe_timeout = self.config.probe_timeout();
        let total_hosts = ips.len();
        tracing::info!("Warming neighbor cache: probing {} hosts in {}.0/24", total_hosts, subnet_base);

        let mut handles = Vec::with_capacity(total_hosts);
        for (batch_idx, batch) in ips.chunks(batch_size).enumerate() {
            for ip in batch {
                let prober = Arc::clone(&self.prober);
                let ip = *ip;
                handles.push(tokio::spawn(async move {
                    prober.probe(ip, probe_timeout).await;
                }));
            }

            // Pace launches so the local stack is not flooded
            if (batch_idx + 1) * batch_size < total_hosts {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
        }

        // Collect with a short grace period each; stragglers keep running detached
        let grace = probe_timeout;
        let outcomes = futures::future::join_all(
            handles
                .into_iter()
                .map(|handle| tokio::time::timeout(grace, handle)),
        )
        .await;
        let finished = outcomes.iter().filter(|o| o.is_ok()).count();

        tracing::debug!(
            "Sweep of {}.0/24 returned after {:.1}s ({}/{} probes finished)",
            subnet_base,
            sweep_start.elapsed().as_secs_f64(),
            finished,
            total_hosts
        );
    }
}
