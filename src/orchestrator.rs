//! Drives one scan run: discovery, the two batched port passes, then a bounded
//! pool of per-host enrichments whose results are aggregated and recorded.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ScanConfig;
use crate::discovery::{HostDiscoverer, NmapDiscoverer};
use crate::error::{ProbeError, RepositoryError, ScanError};
use crate::identity::{ArpCoordinator, ArpIdentityResolver, IdentityResolver, MacVendorsClient};
use crate::names::{ChainNameResolver, NameResolver, SystemReverseDns};
use crate::netdetect::{ipv4_to_default_cidr, NetworkLocator, SystemLocator};
use crate::portscan::{empty_map, NmapPortProbe, PortMap, PortProbe};
use crate::probe::{CommandRunner, Platform, SystemRunner};
use crate::repository::{format_timestamp, Repository};
use crate::topology::{SystemTopologyProbe, TopologyProbe};
use crate::types::{DeviceRecord, PortEntry, ScanReport, ScanSummary, NOT_AVAILABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Discovering,
    PortScanning,
    Enriching,
    Aggregated,
    Failed,
}

/// The probe implementations a scan is built from.
#[derive(Clone)]
pub struct Probes {
    pub locator: Arc<dyn NetworkLocator>,
    pub discoverer: Arc<dyn HostDiscoverer>,
    pub ports: Arc<dyn PortProbe>,
    pub identity: Arc<dyn IdentityResolver>,
    pub names: Arc<dyn NameResolver>,
    pub topology: Arc<dyn TopologyProbe>,
}

impl Probes {
    /// Probes backed by the host's own tooling (`nmap`, `ping`, `arp`, ...).
    pub fn system(config: &ScanConfig) -> Result<Self, ProbeError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let platform = Platform::current();
        let vendors = Arc::new(MacVendorsClient::new(
            config.vendor_url.clone(),
            config.vendor_timeout(),
        )?);

        Ok(Self {
            locator: Arc::new(SystemLocator),
            discoverer: Arc::new(NmapDiscoverer::new(runner.clone(), config.discovery_timeout())),
            ports: Arc::new(NmapPortProbe::new(
                runner.clone(),
                config.port_scan_host_timeout(),
                config.port_scan_deadline(),
            )),
            identity: Arc::new(ArpIdentityResolver::new(
                runner.clone(),
                platform,
                vendors,
                Arc::new(ArpCoordinator::new()),
                config,
            )),
            names: Arc::new(ChainNameResolver::new(
                Arc::new(SystemReverseDns),
                runner.clone(),
                platform,
                config,
            )),
            topology: Arc::new(SystemTopologyProbe::new(runner, platform, config)),
        })
    }
}

/// Scan of the segment the scanning machine itself sits on.
#[derive(Debug, Clone, Serialize)]
pub struct LocalScan {
    pub current_ip: Option<String>,
    pub network_range: Option<String>,
    #[serde(flatten)]
    pub report: ScanReport,
}

pub struct ScanOrchestrator {
    probes: Probes,
    repository: Arc<dyn Repository>,
    general_ports: Vec<u16>,
    streaming_ports: Vec<u16>,
    concurrency: usize,
    phase: watch::Sender<ScanPhase>,
}

impl ScanOrchestrator {
    pub fn new(probes: Probes, repository: Arc<dyn Repository>, config: &ScanConfig) -> Self {
        let (phase, _) = watch::channel(ScanPhase::Idle);
        Self {
            probes,
            repository,
            general_ports: config.general_ports.clone(),
            streaming_ports: config.streaming_ports.clone(),
            concurrency: config.concurrency.max(1),
            phase,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    fn set_phase(&self, phase: ScanPhase) {
        debug!(?phase, "scan phase");
        self.phase.send_replace(phase);
    }

    /// Locate the local IPv4 address and scan its /24.
    pub async fn run_local_scan(&self) -> LocalScan {
        let ip: Ipv4Addr = match self.probes.locator.local_ipv4() {
            Ok(ip) => ip,
            Err(e) => {
                self.set_phase(ScanPhase::Failed);
                error!(error = %e, "cannot determine local network");
                return LocalScan {
                    current_ip: None,
                    network_range: None,
                    report: ScanReport::failed(e),
                };
            }
        };
        let range = ipv4_to_default_cidr(ip);
        info!(%ip, %range, "scanning local network");
        let report = self.run_scan(range).await;
        LocalScan {
            current_ip: Some(ip.to_string()),
            network_range: Some(range.to_string()),
            report,
        }
    }

    /// Scan `range`. Either every discovered host gets a record, or the run
    /// failed and the report carries the error with no devices.
    pub async fn run_scan(&self, range: Ipv4Net) -> ScanReport {
        match self.scan(range).await {
            Ok(devices) => {
                self.set_phase(ScanPhase::Aggregated);
                let report = ScanReport {
                    devices,
                    error: None,
                };
                info!(
                    %range,
                    devices = report.devices.len(),
                    open_ports = report.open_port_count(),
                    "scan complete"
                );
                self.record(&report).await;
                report
            }
            Err(e) => {
                self.set_phase(ScanPhase::Failed);
                error!(%range, error = %e, "scan aborted");
                ScanReport::failed(e)
            }
        }
    }

    async fn scan(&self, range: Ipv4Net) -> Result<Vec<DeviceRecord>, ScanError> {
        self.set_phase(ScanPhase::Discovering);
        let hosts = self
            .probes
            .discoverer
            .discover(range)
            .await
            .map_err(ScanError::OrchestrationFault)?;
        info!(%range, hosts = hosts.len(), "discovery finished");
        if hosts.is_empty() {
            return Ok(Vec::new());
        }

        // Both port passes finish before any host is enriched.
        self.set_phase(ScanPhase::PortScanning);
        let (general, streaming, bssid) = tokio::join!(
            self.port_pass(&hosts, &self.general_ports, "general"),
            self.port_pass(&hosts, &self.streaming_ports, "streaming"),
            self.probes.topology.access_point(),
        );

        self.set_phase(ScanPhase::Enriching);
        Ok(self.enrich(hosts, general, streaming, bssid).await)
    }

    async fn port_pass(&self, hosts: &[IpAddr], ports: &[u16], pass: &'static str) -> PortMap {
        match self.probes.ports.scan(hosts, ports).await {
            Ok(mut map) => {
                for entries in map.values_mut() {
                    entries.retain(|e| ports.contains(&e.port));
                }
                map
            }
            Err(e) => {
                warn!(pass, error = %e, "port scan pass failed, reporting no open ports");
                empty_map(hosts)
            }
        }
    }

    async fn enrich(
        &self,
        hosts: Vec<IpAddr>,
        mut general: PortMap,
        mut streaming: PortMap,
        bssid: String,
    ) -> Vec<DeviceRecord> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for ip in hosts {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let identity = self.probes.identity.clone();
            let names = self.probes.names.clone();
            let topology = self.probes.topology.clone();
            let open_ports = general.remove(&ip).unwrap_or_default();
            let streaming_ports = streaming.remove(&ip).unwrap_or_default();
            let bssid = bssid.clone();

            set.spawn(async move {
                let _permit = permit;
                let (id, hostname, topo) = tokio::join!(
                    identity.resolve(ip),
                    names.resolve(ip),
                    topology.probe(ip),
                );
                let record = DeviceRecord {
                    ip: ip.to_string(),
                    mac: id.mac,
                    hostname,
                    manufacturer: id.manufacturer,
                    bssid,
                    open_ports: sorted(open_ports),
                    streaming_ports: sorted(streaming_ports),
                    netbios: topo.netbios,
                    smb_status: topo.smb_status,
                    traceroute: topo.traceroute,
                    ttl: topo.ttl,
                    os: topo.os,
                };
                debug!(%ip, mac = %record.mac, hostname = %record.hostname, "host enriched");
                (ip, record)
            });
        }

        let mut records = Vec::new();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(pair) => records.push(pair),
                Err(e) => warn!(error = %e, "host enrichment task died, dropping host"),
            }
        }
        records.sort_by_key(|(ip, _)| *ip);
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// Persist identities and the run summary. Failures are logged only.
    async fn record(&self, report: &ScanReport) {
        let seen_at = OffsetDateTime::now_utc();
        let identities: Vec<(String, String, String)> = report
            .devices
            .iter()
            .filter(|d| d.mac != NOT_AVAILABLE)
            .map(|d| (d.ip.clone(), d.mac.clone(), d.hostname.clone()))
            .collect();
        let summary = ScanSummary {
            timestamp: format_timestamp(seen_at),
            device_count: report.devices.len() as u64,
            open_port_count: report.open_port_count(),
        };

        let repo = self.repository.clone();
        let res = tokio::task::spawn_blocking(move || -> Result<(), RepositoryError> {
            for (ip, mac, hostname) in &identities {
                if let Err(e) = repo.upsert_device(ip, mac, hostname, seen_at) {
                    warn!(%ip, %mac, error = %e, "failed to store device");
                }
            }
            repo.append_scan_summary(&summary)
        })
        .await
        .map_err(RepositoryError::from)
        .and_then(|r| r);

        if let Err(e) = res {
            warn!(error = %e, "failed to record scan summary");
        }
    }
}

fn sorted(mut entries: Vec<PortEntry>) -> Vec<PortEntry> {
    entries.sort_by_key(|e| e.port);
    entries.dedup_by_key(|e| e.port);
    entries
}
