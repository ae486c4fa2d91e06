use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProbeError;
use crate::nmap;
use crate::ports::{streaming_service_name, to_port_arg};
use crate::probe::{CommandRunner, ProbeCommand};
use crate::types::{PortEntry, UNKNOWN};

pub type PortMap = HashMap<IpAddr, Vec<PortEntry>>;

/// Scans a whole host set against one port list in a single pass.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Open ports per host. Every requested host is a key; hosts with nothing
    /// open map to an empty list. Only ports from `ports` are reported.
    async fn scan(&self, hosts: &[IpAddr], ports: &[u16]) -> Result<PortMap, ProbeError>;
}

pub struct NmapPortProbe {
    runner: Arc<dyn CommandRunner>,
    host_timeout: Duration,
    deadline: Duration,
}

impl NmapPortProbe {
    /// `host_timeout` is handed to the scanner per host, `deadline` bounds the whole run.
    pub fn new(runner: Arc<dyn CommandRunner>, host_timeout: Duration, deadline: Duration) -> Self {
        Self {
            runner,
            host_timeout,
            deadline,
        }
    }
}

#[async_trait]
impl PortProbe for NmapPortProbe {
    async fn scan(&self, hosts: &[IpAddr], ports: &[u16]) -> Result<PortMap, ProbeError> {
        if hosts.is_empty() || ports.is_empty() {
            return Ok(empty_map(hosts));
        }

        let mut args = vec![
            "-T4".to_string(),
            "-p".to_string(),
            to_port_arg(ports),
            "--open".to_string(),
            "--host-timeout".to_string(),
            format!("{}s", self.host_timeout.as_secs()),
        ];
        args.extend(hosts.iter().map(|ip| ip.to_string()));

        let xml = self.runner.run(&ProbeCommand::nmap(args), self.deadline).await?;
        let map = open_ports_by_host(&nmap::parse(&xml)?, hosts, ports);
        debug!(
            hosts = hosts.len(),
            open = map.values().map(Vec::len).sum::<usize>(),
            "port scan finished"
        );
        Ok(map)
    }
}

pub fn empty_map(hosts: &[IpAddr]) -> PortMap {
    hosts.iter().map(|ip| (*ip, Vec::new())).collect()
}

/// Build the per-host open port lists from a scan report.
pub fn open_ports_by_host(run: &nmap::NmapRun, hosts: &[IpAddr], ports: &[u16]) -> PortMap {
    let mut map = empty_map(hosts);
    for host in &run.hosts {
        let Some(entries) = host.ip().and_then(|ip| map.get_mut(&ip)) else {
            continue;
        };
        for port in host.tcp_ports() {
            if port.state.state != "open" || !ports.contains(&port.portid) {
                continue;
            }
            entries.push(PortEntry {
                port: port.portid,
                service: service_name(port),
            });
        }
    }
    map
}

fn service_name(port: &nmap::Port) -> String {
    if let Some(name) = streaming_service_name(port.portid) {
        return name.to_string();
    }
    port.service
        .as_ref()
        .and_then(|s| s.name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}
