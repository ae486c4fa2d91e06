use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::debug;

use crate::error::ProbeError;
use crate::nmap;
use crate::probe::{CommandRunner, ProbeCommand};

/// Extra time granted to the scanner process beyond its own host timeout.
pub const PROCESS_GRACE: Duration = Duration::from_secs(5);

/// Sweeps a range for live hosts.
#[async_trait]
pub trait HostDiscoverer: Send + Sync {
    /// Addresses in `range` that answered. No responders is `Ok(vec![])`.
    async fn discover(&self, range: Ipv4Net) -> Result<Vec<IpAddr>, ProbeError>;
}

/// Ping-style sweep (`nmap -sn`) without any port connects.
pub struct NmapDiscoverer {
    runner: Arc<dyn CommandRunner>,
    host_timeout: Duration,
}

impl NmapDiscoverer {
    pub fn new(runner: Arc<dyn CommandRunner>, host_timeout: Duration) -> Self {
        Self {
            runner,
            host_timeout,
        }
    }
}

#[async_trait]
impl HostDiscoverer for NmapDiscoverer {
    async fn discover(&self, range: Ipv4Net) -> Result<Vec<IpAddr>, ProbeError> {
        let cmd = ProbeCommand::nmap([
            "-sn".to_string(),
            "--host-timeout".to_string(),
            format!("{}s", self.host_timeout.as_secs()),
            range.to_string(),
        ]);
        let xml = self
            .runner
            .run(&cmd, self.host_timeout + PROCESS_GRACE)
            .await?;
        let hosts = live_hosts(&nmap::parse(&xml)?, range);
        debug!(%range, count = hosts.len(), "sweep finished");
        Ok(hosts)
    }
}

/// Up hosts from a sweep report that fall inside `range`, deduplicated, in report order.
pub fn live_hosts(run: &nmap::NmapRun, range: Ipv4Net) -> Vec<IpAddr> {
    let mut out: Vec<IpAddr> = Vec::new();
    for ip in run.hosts.iter().filter(|h| h.is_up()).filter_map(|h| h.ip()) {
        let in_range = match ip {
            IpAddr::V4(v4) => range.contains(&v4),
            IpAddr::V6(_) => false,
        };
        if in_range && !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}
