use std::net::IpAddr;

use serde::Deserialize;

use crate::error::ProbeError;

/// Partial nmap XML (`-oX -`) schema.
///
/// Only models the parts the probes read; everything else in the document is
/// ignored by the deserializer.
#[derive(Debug, Deserialize, Default)]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
pub struct Host {
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,

    #[serde(default)]
    pub status: Option<Status>,

    #[serde(default)]
    pub hostnames: Option<Hostnames>,

    #[serde(default)]
    pub ports: Option<Ports>,

    #[serde(default)]
    pub os: Option<Os>,

    #[serde(default)]
    pub hostscript: Option<HostScript>,
}

#[derive(Debug, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Deserialize)]
pub struct Status {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
pub struct Port {
    #[serde(rename = "@portid")]
    pub portid: u16,
    #[serde(rename = "@protocol")]
    pub protocol: String,
    pub state: PortState,
    #[serde(default)]
    pub service: Option<Service>,
}

#[derive(Debug, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct Service {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Os {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: u8,
}

#[derive(Debug, Deserialize)]
pub struct HostScript {
    #[serde(rename = "script", default)]
    pub scripts: Vec<Script>,
}

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@output", default)]
    pub output: String,
}

/// Parse the XML report nmap writes to stdout.
pub fn parse(xml: &str) -> Result<NmapRun, ProbeError> {
    if xml.trim().is_empty() {
        return Err(ProbeError::Parse("nmap produced no output".into()));
    }
    quick_xml::de::from_str(xml).map_err(|e| ProbeError::Parse(format!("nmap XML: {e}")))
}

impl NmapRun {
    pub fn host(&self, ip: IpAddr) -> Option<&Host> {
        self.hosts.iter().find(|h| h.ip() == Some(ip))
    }
}

impl Host {
    /// The host's IP address (the `ipv4`/`ipv6` entry, not the MAC one).
    pub fn ip(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .filter(|a| a.addr_type == "ipv4" || a.addr_type == "ipv6")
            .find_map(|a| a.addr.parse().ok())
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()?
            .hostnames
            .iter()
            .map(|h| h.name.trim())
            .find(|n| !n.is_empty())
    }

    pub fn tcp_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .flat_map(|p| p.ports.iter())
            .filter(|p| p.protocol == "tcp")
    }

    pub fn tcp_port(&self, port: u16) -> Option<&Port> {
        self.tcp_ports().find(|p| p.portid == port)
    }

    /// Highest-accuracy OS guess. Ties keep the first listed match.
    pub fn best_os_match(&self) -> Option<&OsMatch> {
        self.os
            .as_ref()?
            .matches
            .iter()
            .rev()
            .max_by_key(|m| m.accuracy)
    }

    pub fn script_output(&self, id: &str) -> Option<&str> {
        self.hostscript
            .as_ref()?
            .scripts
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.output.as_str())
    }
}
