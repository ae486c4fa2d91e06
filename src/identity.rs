//! Hardware address and manufacturer resolution.
//!
//! The MAC comes from the OS neighbour/ARP cache. That cache is one resource
//! shared by every concurrent enrichment, so the "ping, settle, re-read"
//! population step goes through [`ArpCoordinator`], which lets at most one
//! task populate a given address at a time.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time;
use tracing::debug;

use crate::config::ScanConfig;
use crate::error::ProbeError;
use crate::probe::{CommandRunner, Platform};
use crate::types::{NOT_AVAILABLE, UNKNOWN};

/// Hardware address and manufacturer of one host. Unresolved parts hold sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub mac: String,
    pub manufacturer: String,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Identity;
}

/// Directory mapping a MAC vendor prefix to a manufacturer name.
#[async_trait]
pub trait VendorLookup: Send + Sync {
    /// `Ok(None)` when the directory has no entry for the prefix.
    async fn vendor(&self, mac: &str) -> Result<Option<String>, ProbeError>;
}

/// Client for the macvendors.com plain-text API.
pub struct MacVendorsClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl MacVendorsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn http_error(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl VendorLookup for MacVendorsClient {
    async fn vendor(&self, mac: &str) -> Result<Option<String>, ProbeError> {
        let Some(prefix) = oui_prefix(mac) else {
            return Ok(None);
        };
        let url = format!("{}/{}", self.base_url, prefix);
        let response = self.client.get(&url).send().await.map_err(|e| self.http_error(e))?;
        if response.status() != reqwest::StatusCode::OK {
            debug!(%url, status = %response.status(), "vendor lookup miss");
            return Ok(None);
        }
        let body = response.text().await.map_err(|e| self.http_error(e))?;
        let name = body.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }
}

/// Keyed single-flight locks for ARP cache population.
#[derive(Debug, Default)]
pub struct ArpCoordinator {
    slots: Mutex<HashMap<IpAddr, Weak<AsyncMutex<()>>>>,
}

impl ArpCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive right to populate the cache entry of `ip`.
    pub async fn acquire(&self, ip: IpAddr) -> OwnedMutexGuard<()> {
        self.slot(ip).lock_owned().await
    }

    fn slot(&self, ip: IpAddr) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&ip).and_then(Weak::upgrade) {
            return slot;
        }
        slots.retain(|_, w| w.strong_count() > 0);
        let slot = Arc::new(AsyncMutex::new(()));
        slots.insert(ip, Arc::downgrade(&slot));
        slot
    }
}

/// Resolves MACs from the ARP cache and manufacturers from a [`VendorLookup`].
pub struct ArpIdentityResolver {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    vendors: Arc<dyn VendorLookup>,
    coordinator: Arc<ArpCoordinator>,
    arp_timeout: Duration,
    ping_timeout: Duration,
    settle: Duration,
    vendor_timeout: Duration,
}

impl ArpIdentityResolver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        platform: Platform,
        vendors: Arc<dyn VendorLookup>,
        coordinator: Arc<ArpCoordinator>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            runner,
            platform,
            vendors,
            coordinator,
            arp_timeout: config.arp_timeout(),
            ping_timeout: config.ping_timeout(),
            settle: config.arp_settle(),
            vendor_timeout: config.vendor_timeout(),
        }
    }

    /// MAC for `ip`, or `"N/A"` if it never shows up in the cache.
    pub async fn resolve_mac(&self, ip: IpAddr) -> String {
        if let Some(mac) = self.read_cache(ip).await {
            return mac;
        }

        let _guard = self.coordinator.acquire(ip).await;
        // Whoever held the slot before us may already have populated the entry.
        if let Some(mac) = self.read_cache(ip).await {
            return mac;
        }

        if let Err(e) = self.runner.run(&self.platform.ping(ip), self.ping_timeout).await {
            debug!(%ip, error = %e, "cache-populating ping failed");
        }
        time::sleep(self.settle).await;

        self.read_cache(ip)
            .await
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Manufacturer for a resolved MAC; `"Unknown"` on any failure.
    pub async fn resolve_manufacturer(&self, mac: &str) -> String {
        if !is_vendor_lookup_candidate(mac) {
            return UNKNOWN.to_string();
        }
        match time::timeout(self.vendor_timeout, self.vendors.vendor(mac)).await {
            Ok(Ok(Some(vendor))) => vendor,
            Ok(Ok(None)) => UNKNOWN.to_string(),
            Ok(Err(e)) => {
                debug!(%mac, error = %e, "vendor lookup failed");
                UNKNOWN.to_string()
            }
            Err(_) => {
                debug!(%mac, timeout = ?self.vendor_timeout, "vendor lookup timed out");
                UNKNOWN.to_string()
            }
        }
    }

    async fn read_cache(&self, ip: IpAddr) -> Option<String> {
        match self
            .runner
            .run(&self.platform.arp_table(), self.arp_timeout)
            .await
        {
            Ok(out) => parse_arp_table(&out).remove(&ip),
            Err(e) => {
                debug!(%ip, error = %e, "ARP cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for ArpIdentityResolver {
    async fn resolve(&self, ip: IpAddr) -> Identity {
        let mac = self.resolve_mac(ip).await;
        let manufacturer = self.resolve_manufacturer(&mac).await;
        Identity { mac, manufacturer }
    }
}

fn arp_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})\)?\s+(?:at\s+)?([0-9A-Fa-f]{1,2}(?:[:-][0-9A-Fa-f]{1,2}){5})\b")
            .expect("ARP line pattern is valid")
    })
}

/// Parse `arp -a`/`arp -an` output (Linux, BSD/macOS and Windows layouts).
pub fn parse_arp_table(output: &str) -> HashMap<IpAddr, String> {
    let re = arp_line_regex();
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let ip: IpAddr = caps.get(1)?.as_str().parse().ok()?;
            let mac = normalize_mac(caps.get(2)?.as_str())?;
            Some((ip, mac))
        })
        .collect()
}

/// Upper-case, colon-separated, zero-padded form (`0:1e:2:aa:bb:c` -> `00:1E:02:AA:BB:0C`).
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<u8> = raw
        .trim()
        .split([':', '-'])
        .map(|part| {
            if part.is_empty() || part.len() > 2 {
                return None;
            }
            u8::from_str_radix(part, 16).ok()
        })
        .collect::<Option<_>>()?;
    if octets.len() != 6 {
        return None;
    }
    Some(
        octets
            .iter()
            .map(|o| format!("{o:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// First three octets as six hex digits, the key the vendor directory is indexed by.
pub fn oui_prefix(mac: &str) -> Option<String> {
    let mac = normalize_mac(mac)?;
    Some(mac.replace(':', "")[..6].to_string())
}

/// Sentinel, all-zero, broadcast and group addresses are never sent to the directory.
pub fn is_vendor_lookup_candidate(mac: &str) -> bool {
    let Some(norm) = normalize_mac(mac) else {
        return false;
    };
    if norm == "00:00:00:00:00:00" || norm == "FF:FF:FF:FF:FF:FF" {
        return false;
    }
    u8::from_str_radix(&norm[..2], 16).is_ok_and(|first| first & 0x01 == 0)
}
