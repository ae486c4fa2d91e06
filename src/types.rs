use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Placeholder for a field no probe could resolve.
pub const UNKNOWN: &str = "Unknown";
/// Placeholder for a hardware address that never showed up in the ARP cache.
pub const NOT_AVAILABLE: &str = "N/A";
/// Placeholder for a probe whose tool failed outright.
pub const ERROR: &str = "Error";
pub const NO_NETBIOS_DATA: &str = "No NetBIOS data";
pub const SMB_NOT_DETECTED: &str = "SMB (Not Detected)";

/// One open TCP port on a host with its best-effort service name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortEntry {
    pub port: u16,
    pub service: String,
}

/// Name/user/MAC triple reported by a NetBIOS node status query.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetBiosInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl NetBiosInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.user.is_none() && self.mac.is_none()
    }
}

/// Outcome of the NetBIOS probe.
///
/// Serialises as a map when data was found and as the `"No NetBIOS data"` /
/// `"Error"` strings otherwise, which is the shape API consumers expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetBiosStatus {
    Found(NetBiosInfo),
    NoData,
    Error,
}

impl Serialize for NetBiosStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NetBiosStatus::Found(info) => {
                let mut map = serializer.serialize_map(None)?;
                if let Some(name) = &info.name {
                    map.serialize_entry("name", name)?;
                }
                if let Some(user) = &info.user {
                    map.serialize_entry("user", user)?;
                }
                if let Some(mac) = &info.mac {
                    map.serialize_entry("mac", mac)?;
                }
                map.end()
            }
            NetBiosStatus::NoData => serializer.serialize_str(NO_NETBIOS_DATA),
            NetBiosStatus::Error => serializer.serialize_str(ERROR),
        }
    }
}

/// Fully enriched view of one host from a single scan run.
///
/// Every field is always populated; probes that failed leave a sentinel
/// (`"Unknown"`, `"N/A"`, `"Error"`) instead of dropping the field.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    pub manufacturer: String,
    pub bssid: String,
    pub open_ports: Vec<PortEntry>,
    pub streaming_ports: Vec<PortEntry>,
    pub netbios: NetBiosStatus,
    pub smb_status: String,
    pub traceroute: String,
    pub ttl: String,
    pub os: String,
}

/// Persistent identity of a device, keyed by hardware address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    pub first_seen: String,
    pub last_seen: String,
}

/// One row of scan history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub timestamp: String,
    #[serde(rename = "devices")]
    pub device_count: u64,
    #[serde(rename = "ports")]
    pub open_port_count: u64,
}

/// Result of one scan run: either the complete device list, or an empty list
/// plus the reason the run was aborted.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub devices: Vec<DeviceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanReport {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            devices: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn open_port_count(&self) -> u64 {
        self.devices.iter().map(|d| d.open_ports.len() as u64).sum()
    }
}
