use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time;
use tracing::debug;

use crate::config::ScanConfig;
use crate::discovery::PROCESS_GRACE;
use crate::error::ProbeError;
use crate::nmap;
use crate::probe::{CommandRunner, Platform, ProbeCommand};
use crate::types::UNKNOWN;

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Best human-readable name for `ip`, `"Unknown"` when nothing answers.
    async fn resolve(&self, ip: IpAddr) -> String;
}

#[async_trait]
pub trait ReverseDns: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<String>, ProbeError>;
}

/// PTR lookup through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReverseDns;

#[async_trait]
impl ReverseDns for SystemReverseDns {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<String>, ProbeError> {
        let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
            .await
            .map_err(|e| ProbeError::Unavailable(format!("resolver task: {e}")))?;
        match name {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                debug!(%ip, error = %e, "no PTR record");
                Ok(None)
            }
        }
    }
}

/// Reverse DNS, then the scanner's own hostname, then (windows-like only) NetBIOS.
pub struct ChainNameResolver {
    dns: Arc<dyn ReverseDns>,
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    dns_timeout: Duration,
    scan_timeout: Duration,
    nbtstat_timeout: Duration,
}

impl ChainNameResolver {
    pub fn new(
        dns: Arc<dyn ReverseDns>,
        runner: Arc<dyn CommandRunner>,
        platform: Platform,
        config: &ScanConfig,
    ) -> Self {
        Self {
            dns,
            runner,
            platform,
            dns_timeout: config.reverse_dns_timeout(),
            scan_timeout: config.hostname_scan_timeout(),
            nbtstat_timeout: config.nbtstat_timeout(),
        }
    }

    async fn from_reverse_dns(&self, ip: IpAddr) -> Option<String> {
        match time::timeout(self.dns_timeout, self.dns.lookup(ip)).await {
            Ok(Ok(Some(name))) => short_dns_name(&name),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                debug!(%ip, error = %e, "reverse DNS failed");
                None
            }
            Err(_) => {
                debug!(%ip, "reverse DNS timed out");
                None
            }
        }
    }

    async fn from_scanner(&self, ip: IpAddr) -> Option<String> {
        let cmd = ProbeCommand::nmap([
            "-sn".to_string(),
            "--host-timeout".to_string(),
            format!("{}s", self.scan_timeout.as_secs()),
            ip.to_string(),
        ]);
        let xml = match self.runner.run(&cmd, self.scan_timeout + PROCESS_GRACE).await {
            Ok(xml) => xml,
            Err(e) => {
                debug!(%ip, error = %e, "hostname scan failed");
                return None;
            }
        };
        match nmap::parse(&xml) {
            Ok(run) => run
                .host(ip)
                .and_then(|h| h.hostname())
                .map(str::to_string),
            Err(e) => {
                debug!(%ip, error = %e, "hostname scan output unreadable");
                None
            }
        }
    }

    async fn from_netbios(&self, ip: IpAddr) -> Option<String> {
        let cmd = self.platform.netbios_name_query(ip)?;
        match self.runner.run(&cmd, self.nbtstat_timeout).await {
            Ok(out) => parse_nbtstat_name(&out),
            Err(e) => {
                debug!(%ip, error = %e, "NetBIOS name query failed");
                None
            }
        }
    }
}

#[async_trait]
impl NameResolver for ChainNameResolver {
    async fn resolve(&self, ip: IpAddr) -> String {
        if let Some(name) = self.from_reverse_dns(ip).await {
            return name;
        }
        if let Some(name) = self.from_scanner(ip).await {
            return name;
        }
        if let Some(name) = self.from_netbios(ip).await {
            return name;
        }
        UNKNOWN.to_string()
    }
}

/// First label of a PTR name. A resolver that echoes the address back counts as no name.
pub fn short_dns_name(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() {
        return None;
    }
    name.split('.')
        .next()
        .filter(|label| !label.is_empty())
        .map(str::to_string)
}

/// Workstation name (the `<00>` UNIQUE entry) from `nbtstat -A` output.
pub fn parse_nbtstat_name(output: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\S+)\s+<00>\s+UNIQUE\b").expect("nbtstat pattern is valid")
    });
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
