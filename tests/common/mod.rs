#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;

use lan_profiler::config::ScanConfig;
use lan_profiler::discovery::HostDiscoverer;
use lan_profiler::error::{ProbeError, ScanError};
use lan_profiler::identity::{Identity, IdentityResolver};
use lan_profiler::names::NameResolver;
use lan_profiler::netdetect::NetworkLocator;
use lan_profiler::orchestrator::{Probes, ScanOrchestrator};
use lan_profiler::portscan::{PortMap, PortProbe};
use lan_profiler::probe::{CommandRunner, ProbeCommand};
use lan_profiler::repository::SqliteRepository;
use lan_profiler::topology::{Topology, TopologyProbe};
use lan_profiler::types::{NetBiosStatus, PortEntry, NOT_AVAILABLE, SMB_NOT_DETECTED};

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn hosts(last_octets: &[u8]) -> Vec<IpAddr> {
    last_octets
        .iter()
        .map(|o| IpAddr::V4(Ipv4Addr::new(192, 168, 1, *o)))
        .collect()
}

pub struct FixedLocator(pub Option<Ipv4Addr>);

impl NetworkLocator for FixedLocator {
    fn local_ipv4(&self) -> Result<Ipv4Addr, ScanError> {
        self.0
            .ok_or_else(|| ScanError::NetworkUnreachable("no interface up".into()))
    }
}

pub struct FakeDiscoverer {
    pub hosts: Result<Vec<IpAddr>, String>,
}

#[async_trait]
impl HostDiscoverer for FakeDiscoverer {
    async fn discover(&self, range: Ipv4Net) -> Result<Vec<IpAddr>, ProbeError> {
        match &self.hosts {
            Ok(hosts) => Ok(hosts
                .iter()
                .copied()
                .filter(|h| matches!(h, IpAddr::V4(v4) if range.contains(v4)))
                .collect()),
            Err(e) => Err(ProbeError::Unavailable(e.clone())),
        }
    }
}

/// Reports every port in `open` as open on every host, requested or not.
pub struct FakePortProbe {
    pub open: Vec<u16>,
    pub fail: bool,
    pub calls: Mutex<Vec<Vec<u16>>>,
}

impl FakePortProbe {
    pub fn new(open: &[u16]) -> Self {
        Self {
            open: open.to_vec(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            open: Vec::new(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PortProbe for FakePortProbe {
    async fn scan(&self, hosts: &[IpAddr], ports: &[u16]) -> Result<PortMap, ProbeError> {
        self.calls.lock().unwrap().push(ports.to_vec());
        if self.fail {
            return Err(ProbeError::Timeout(Duration::from_secs(300)));
        }
        Ok(hosts
            .iter()
            .map(|h| {
                let entries = self
                    .open
                    .iter()
                    .map(|p| PortEntry {
                        port: *p,
                        service: format!("svc-{p}"),
                    })
                    .collect();
                (*h, entries)
            })
            .collect())
    }
}

/// MAC derived from the last octet; hosts in `unresolved` get `"N/A"`, hosts in
/// `panics_on` blow up the enrichment task.
#[derive(Default)]
pub struct FakeIdentity {
    pub delay: Duration,
    pub unresolved: HashSet<IpAddr>,
    pub panics_on: HashSet<IpAddr>,
}

#[async_trait]
impl IdentityResolver for FakeIdentity {
    async fn resolve(&self, ip: IpAddr) -> Identity {
        if self.panics_on.contains(&ip) {
            panic!("identity probe crashed for {ip}");
        }
        tokio::time::sleep(self.delay).await;
        if self.unresolved.contains(&ip) {
            return Identity {
                mac: NOT_AVAILABLE.into(),
                manufacturer: "Unknown".into(),
            };
        }
        let last = match ip {
            IpAddr::V4(v4) => v4.octets()[3],
            IpAddr::V6(_) => 0,
        };
        Identity {
            mac: format!("AA:BB:CC:00:00:{last:02X}"),
            manufacturer: "Acme Networks".into(),
        }
    }
}

pub struct FakeNames;

#[async_trait]
impl NameResolver for FakeNames {
    async fn resolve(&self, ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => format!("host-{}", v4.octets()[3]),
            IpAddr::V6(_) => "Unknown".into(),
        }
    }
}

#[derive(Default)]
pub struct FakeTopology {
    pub delay: Duration,
}

#[async_trait]
impl TopologyProbe for FakeTopology {
    async fn probe(&self, _ip: IpAddr) -> Topology {
        tokio::time::sleep(self.delay).await;
        Topology {
            os: "Linux 5.X (96%)".into(),
            ttl: "64".into(),
            traceroute: "1  192.168.1.1  0.4 ms".into(),
            netbios: NetBiosStatus::NoData,
            smb_status: SMB_NOT_DETECTED.into(),
        }
    }

    async fn access_point(&self) -> String {
        "4C:ED:FB:01:02:03".into()
    }
}

pub struct Harness {
    pub locator: Option<Ipv4Addr>,
    pub discovered: Result<Vec<IpAddr>, String>,
    pub ports: Arc<FakePortProbe>,
    pub identity: FakeIdentity,
    pub topology: FakeTopology,
    pub config: ScanConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            locator: Some(Ipv4Addr::new(192, 168, 1, 2)),
            discovered: Ok(hosts(&[1, 10, 20])),
            ports: Arc::new(FakePortProbe::new(&[22, 80, 554, 9999])),
            identity: FakeIdentity::default(),
            topology: FakeTopology::default(),
            config: ScanConfig::default(),
        }
    }
}

impl Harness {
    pub fn build(self) -> (ScanOrchestrator, Arc<SqliteRepository>) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let probes = Probes {
            locator: Arc::new(FixedLocator(self.locator)),
            discoverer: Arc::new(FakeDiscoverer {
                hosts: self.discovered,
            }),
            ports: self.ports,
            identity: Arc::new(self.identity),
            names: Arc::new(FakeNames),
            topology: Arc::new(self.topology),
        };
        (ScanOrchestrator::new(probes, repo.clone(), &self.config), repo)
    }
}

/// Scripted [`CommandRunner`]: a shared ARP cache that only learns an address
/// once that address has been pinged.
#[derive(Default)]
pub struct ArpLab {
    /// Addresses that answer pings, with the MAC the cache will learn.
    pub neighbours: HashMap<IpAddr, String>,
    learned: Mutex<HashSet<IpAddr>>,
    pub pings: AtomicUsize,
    pub arp_reads: AtomicUsize,
}

impl ArpLab {
    pub fn new(neighbours: &[(&str, &str)]) -> Self {
        Self {
            neighbours: neighbours
                .iter()
                .map(|(i, m)| (ip(i), m.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for ArpLab {
    async fn run(&self, cmd: &ProbeCommand, _limit: Duration) -> Result<String, ProbeError> {
        match cmd.program {
            "ping" => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                let target = cmd
                    .args
                    .last()
                    .and_then(|a| a.parse::<IpAddr>().ok())
                    .ok_or_else(|| ProbeError::Parse("ping target".into()))?;
                if self.neighbours.contains_key(&target) {
                    self.learned.lock().unwrap().insert(target);
                    Ok(format!("64 bytes from {target}: icmp_seq=1 ttl=64 time=0.5 ms"))
                } else {
                    Ok("1 packets transmitted, 0 received".into())
                }
            }
            "arp" => {
                self.arp_reads.fetch_add(1, Ordering::SeqCst);
                let learned = self.learned.lock().unwrap();
                Ok(learned
                    .iter()
                    .map(|ip| {
                        format!("? ({ip}) at {} [ether] on eth0\n", self.neighbours[ip])
                    })
                    .collect())
            }
            other => Err(ProbeError::Unavailable(format!("{other} not scripted"))),
        }
    }
}
