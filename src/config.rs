//! Scan configuration: port lists, pool size and every probe timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::ports;

/// Settings shared by every probe and the orchestrator.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Ports probed on every host. A TOML array or a port-list string (`"22,80,8000-8010"`).
    #[serde(deserialize_with = "port_list")]
    pub general_ports: Vec<u16>,
    /// Streaming/media ports probed on every host.
    #[serde(deserialize_with = "port_list")]
    pub streaming_ports: Vec<u16>,
    /// Hosts enriched in parallel.
    pub concurrency: usize,

    pub discovery_timeout_secs: u64,
    /// Per-host ceiling passed to the batched port scans.
    pub port_scan_host_timeout_secs: u64,
    /// Ceiling for one whole batched port scan process.
    pub port_scan_deadline_secs: u64,
    pub hostname_scan_timeout_secs: u64,
    pub reverse_dns_timeout_secs: u64,
    pub nbtstat_timeout_secs: u64,
    pub os_scan_timeout_secs: u64,
    pub netbios_timeout_secs: u64,
    pub smb_timeout_secs: u64,
    pub ping_timeout_secs: u64,
    /// Ceiling for the wireless status query (`iwconfig`/`netsh`) read once per scan.
    pub wireless_timeout_secs: u64,
    pub arp_timeout_secs: u64,
    /// Wait between the cache-populating ping and the ARP re-read.
    pub arp_settle_ms: u64,

    pub traceroute_max_hops: u8,
    pub traceroute_wait_secs: u64,
    pub traceroute_timeout_secs: u64,
    /// Traceroute output is cut to this many characters.
    pub traceroute_max_len: usize,

    pub vendor_url: String,
    pub vendor_timeout_secs: u64,

    pub db_path: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            general_ports: ports::general_ports(),
            streaming_ports: ports::streaming_ports(),
            concurrency: 8,
            discovery_timeout_secs: 30,
            port_scan_host_timeout_secs: 30,
            port_scan_deadline_secs: 300,
            hostname_scan_timeout_secs: 15,
            reverse_dns_timeout_secs: 3,
            nbtstat_timeout_secs: 10,
            os_scan_timeout_secs: 120,
            netbios_timeout_secs: 30,
            smb_timeout_secs: 15,
            ping_timeout_secs: 5,
            wireless_timeout_secs: 10,
            arp_timeout_secs: 5,
            arp_settle_ms: 2_000,
            traceroute_max_hops: 30,
            traceroute_wait_secs: 1,
            traceroute_timeout_secs: 60,
            traceroute_max_len: 500,
            vendor_url: "https://api.macvendors.com".to_string(),
            vendor_timeout_secs: 3,
            db_path: PathBuf::from("network_devices.db"),
        }
    }
}

impl ScanConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).context("failed to parse config")?;
        Ok(cfg)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn port_scan_host_timeout(&self) -> Duration {
        Duration::from_secs(self.port_scan_host_timeout_secs)
    }

    pub fn port_scan_deadline(&self) -> Duration {
        Duration::from_secs(self.port_scan_deadline_secs)
    }

    pub fn hostname_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.hostname_scan_timeout_secs)
    }

    pub fn reverse_dns_timeout(&self) -> Duration {
        Duration::from_secs(self.reverse_dns_timeout_secs)
    }

    pub fn nbtstat_timeout(&self) -> Duration {
        Duration::from_secs(self.nbtstat_timeout_secs)
    }

    pub fn os_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.os_scan_timeout_secs)
    }

    pub fn netbios_timeout(&self) -> Duration {
        Duration::from_secs(self.netbios_timeout_secs)
    }

    pub fn smb_timeout(&self) -> Duration {
        Duration::from_secs(self.smb_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn wireless_timeout(&self) -> Duration {
        Duration::from_secs(self.wireless_timeout_secs)
    }

    pub fn arp_timeout(&self) -> Duration {
        Duration::from_secs(self.arp_timeout_secs)
    }

    pub fn arp_settle(&self) -> Duration {
        Duration::from_millis(self.arp_settle_ms)
    }

    pub fn traceroute_timeout(&self) -> Duration {
        Duration::from_secs(self.traceroute_timeout_secs)
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_secs)
    }
}

fn port_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u16>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<u16>),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(ports) => Ok(ports),
        Raw::Text(text) => ports::parse_ports_str(&text).map_err(serde::de::Error::custom),
    }
}
