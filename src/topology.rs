//! OS guess, TTL, route, NetBIOS and SMB exposure of a host.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::config::ScanConfig;
use crate::discovery::PROCESS_GRACE;
use crate::identity::normalize_mac;
use crate::nmap;
use crate::probe::{CommandRunner, Platform, ProbeCommand};
use crate::types::{NetBiosInfo, NetBiosStatus, ERROR, SMB_NOT_DETECTED, UNKNOWN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub os: String,
    pub ttl: String,
    pub traceroute: String,
    pub netbios: NetBiosStatus,
    pub smb_status: String,
}

#[async_trait]
pub trait TopologyProbe: Send + Sync {
    async fn probe(&self, ip: IpAddr) -> Topology;

    /// BSSID of the access point the scanning machine is associated with.
    async fn access_point(&self) -> String;
}

pub struct SystemTopologyProbe {
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    os_timeout: Duration,
    ping_timeout: Duration,
    wireless_timeout: Duration,
    trace_hops: u8,
    trace_wait: Duration,
    trace_timeout: Duration,
    trace_max_len: usize,
    netbios_timeout: Duration,
    smb_timeout: Duration,
}

impl SystemTopologyProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, platform: Platform, config: &ScanConfig) -> Self {
        Self {
            runner,
            platform,
            os_timeout: config.os_scan_timeout(),
            ping_timeout: config.ping_timeout(),
            wireless_timeout: config.wireless_timeout(),
            trace_hops: config.traceroute_max_hops,
            trace_wait: Duration::from_secs(config.traceroute_wait_secs),
            trace_timeout: config.traceroute_timeout(),
            trace_max_len: config.traceroute_max_len,
            netbios_timeout: config.netbios_timeout(),
            smb_timeout: config.smb_timeout(),
        }
    }

    /// Run a single-host nmap scan and return its report, `None` on any failure.
    async fn nmap_host(
        &self,
        ip: IpAddr,
        args: &[&str],
        host_timeout: Duration,
    ) -> Result<Option<nmap::Host>, ()> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        full.push("--host-timeout".into());
        full.push(format!("{}s", host_timeout.as_secs()));
        full.push(ip.to_string());
        let cmd = ProbeCommand::nmap(full);

        let xml = self
            .runner
            .run(&cmd, host_timeout + PROCESS_GRACE)
            .await
            .map_err(|e| debug!(%ip, command = %cmd, error = %e, "scan failed"))?;
        let run = nmap::parse(&xml)
            .map_err(|e| debug!(%ip, command = %cmd, error = %e, "scan output unreadable"))?;
        Ok(run.hosts.into_iter().find(|h| h.ip() == Some(ip)))
    }

    async fn os_guess(&self, ip: IpAddr) -> String {
        match self.nmap_host(ip, &["-O", "--osscan-limit"], self.os_timeout).await {
            Ok(host) => host
                .as_ref()
                .and_then(nmap::Host::best_os_match)
                .map(|m| format!("{} ({}%)", m.name, m.accuracy))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            Err(()) => ERROR.to_string(),
        }
    }

    async fn ttl(&self, ip: IpAddr) -> String {
        match self.runner.run(&self.platform.ping(ip), self.ping_timeout).await {
            Ok(out) => parse_ttl(&out).unwrap_or_else(|| UNKNOWN.to_string()),
            Err(e) => {
                debug!(%ip, error = %e, "TTL ping failed");
                UNKNOWN.to_string()
            }
        }
    }

    async fn traceroute(&self, ip: IpAddr) -> String {
        let cmd = self.platform.traceroute(ip, self.trace_hops, self.trace_wait);
        match self.runner.run(&cmd, self.trace_timeout).await {
            Ok(out) => truncate_chars(out.trim(), self.trace_max_len),
            Err(e) => {
                debug!(%ip, error = %e, "traceroute failed");
                ERROR.to_string()
            }
        }
    }

    async fn netbios(&self, ip: IpAddr) -> NetBiosStatus {
        let args = ["-sU", "-p", "137", "--script", "nbstat.nse"];
        match self.nmap_host(ip, &args, self.netbios_timeout).await {
            Ok(host) => host
                .as_ref()
                .and_then(|h| h.script_output("nbstat"))
                .map(parse_nbstat_output)
                .filter(|info| !info.is_empty())
                .map(NetBiosStatus::Found)
                .unwrap_or(NetBiosStatus::NoData),
            Err(()) => NetBiosStatus::Error,
        }
    }

    async fn smb(&self, ip: IpAddr) -> String {
        match self.nmap_host(ip, &["-p", "445"], self.smb_timeout).await {
            Ok(host) => host
                .as_ref()
                .and_then(|h| h.tcp_port(445))
                .map(|p| format!("SMB ({})", p.state.state))
                .unwrap_or_else(|| SMB_NOT_DETECTED.to_string()),
            Err(()) => ERROR.to_string(),
        }
    }
}

#[async_trait]
impl TopologyProbe for SystemTopologyProbe {
    async fn probe(&self, ip: IpAddr) -> Topology {
        let (os, ttl, traceroute, netbios, smb_status) = tokio::join!(
            self.os_guess(ip),
            self.ttl(ip),
            self.traceroute(ip),
            self.netbios(ip),
            self.smb(ip),
        );
        Topology {
            os,
            ttl,
            traceroute,
            netbios,
            smb_status,
        }
    }

    async fn access_point(&self) -> String {
        match self
            .runner
            .run(&self.platform.wireless_status(), self.wireless_timeout)
            .await
        {
            Ok(out) => parse_bssid(self.platform, &out).unwrap_or_else(|| UNKNOWN.to_string()),
            Err(e) => {
                debug!(error = %e, "wireless status unavailable");
                UNKNOWN.to_string()
            }
        }
    }
}

/// TTL of the echo reply (`ttl=64`, `TTL=128`).
pub fn parse_ttl(output: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)\bttl=(\d+)").expect("ttl pattern is valid"));
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Name/user/MAC from the `nbstat` script summary line.
pub fn parse_nbstat_output(output: &str) -> NetBiosInfo {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    let [name_re, user_re, mac_re] = RE.get_or_init(|| {
        [
            Regex::new(r"NetBIOS name:\s*([^,\s]+)").expect("name pattern is valid"),
            Regex::new(r"NetBIOS user:\s*([^,\r\n]+)").expect("user pattern is valid"),
            Regex::new(r"NetBIOS MAC:\s*([0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5})")
                .expect("mac pattern is valid"),
        ]
    });
    let capture = |re: &Regex| {
        re.captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };
    NetBiosInfo {
        name: capture(name_re),
        user: capture(user_re),
        mac: capture(mac_re).and_then(|m| normalize_mac(&m)),
    }
}

/// Access point BSSID from `iwconfig` or `netsh wlan show interfaces`.
pub fn parse_bssid(platform: Platform, output: &str) -> Option<String> {
    let value = match platform {
        Platform::Posix => output
            .lines()
            .find_map(|l| l.split_once("Access Point:"))
            .and_then(|(_, rest)| rest.split_whitespace().next()),
        Platform::Windows => output
            .lines()
            .find(|l| l.trim_start().starts_with("BSSID"))
            .and_then(|l| l.split_once(':'))
            .map(|(_, rest)| rest.trim()),
    }?;
    if value.is_empty() || value.eq_ignore_ascii_case("Not-Associated") {
        return None;
    }
    Some(value.to_uppercase())
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_from_posix_and_windows_ping() {
        let posix = "64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=1.21 ms";
        let windows = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_ttl(posix).as_deref(), Some("64"));
        assert_eq!(parse_ttl(windows).as_deref(), Some("128"));
        assert_eq!(parse_ttl("Request timed out."), None);
    }

    #[test]
    fn nbstat_summary_fields() {
        let info = parse_nbstat_output(
            "NetBIOS name: DESK01, NetBIOS user: <unknown>, NetBIOS MAC: 00-0c-29-c8-3a-f2 (VMware)\nNames:\n  DESK01<00>  Flags: <unique><active>",
        );
        assert_eq!(info.name.as_deref(), Some("DESK01"));
        assert_eq!(info.user.as_deref(), Some("<unknown>"));
        assert_eq!(info.mac.as_deref(), Some("00:0C:29:C8:3A:F2"));
        assert!(parse_nbstat_output("ERROR: Script execution failed").is_empty());
    }

    #[test]
    fn bssid_from_iwconfig() {
        let out = "wlan0     IEEE 802.11  ESSID:\"home\"\n          Mode:Managed  Frequency:5.18 GHz  Access Point: 4c:ed:fb:01:02:03\n";
        assert_eq!(parse_bssid(Platform::Posix, out).as_deref(), Some("4C:ED:FB:01:02:03"));
        let idle = "wlan0     IEEE 802.11  ESSID:off/any\n          Mode:Managed  Access Point: Not-Associated\n";
        assert_eq!(parse_bssid(Platform::Posix, idle), None);
    }

    #[test]
    fn bssid_from_netsh() {
        let out = "    Name                   : Wi-Fi\r\n    SSID                   : home\r\n    BSSID                  : 4c:ed:fb:01:02:03\r\n";
        assert_eq!(parse_bssid(Platform::Windows, out).as_deref(), Some("4C:ED:FB:01:02:03"));
    }

    #[test]
    fn traceroute_output_is_capped() {
        let long = "x".repeat(800);
        assert_eq!(truncate_chars(&long, 500).len(), 500);
        assert_eq!(truncate_chars("é1", 1), "é");
    }
}
