//! Bounded execution of external probe commands and per-platform command selection.

use std::fmt;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use crate::error::ProbeError;

/// A fully built external command: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl ProbeCommand {
    pub fn new<I, S>(program: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// An `nmap` invocation that writes XML to stdout.
    pub fn nmap<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Self::new("nmap", args);
        cmd.args.push("-oX".into());
        cmd.args.push("-".into());
        cmd
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Runs one external command under a timeout and hands back its stdout.
///
/// Implementations never panic: a missing binary is [`ProbeError::Unavailable`],
/// an overrun is [`ProbeError::Timeout`]. A non-zero exit status is not an
/// error by itself (`ping` exits 1 on a lost reply); callers judge the output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &ProbeCommand, limit: Duration) -> Result<String, ProbeError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &ProbeCommand, limit: Duration) -> Result<String, ProbeError> {
        let child = Command::new(cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::Unavailable(format!("`{}` is not installed", cmd.program))
                }
                _ => ProbeError::Io(e),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match time::timeout(limit, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => return Err(ProbeError::Timeout(limit)),
        };

        if !output.status.success() {
            debug!(
                command = %cmd,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "probe command exited unsuccessfully"
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Command flavour of the host running the scan. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    /// Single ICMP echo.
    pub fn ping(self, ip: IpAddr) -> ProbeCommand {
        match self {
            Platform::Posix => ProbeCommand::new("ping", ["-c", "1"]).arg(ip.to_string()),
            Platform::Windows => ProbeCommand::new("ping", ["-n", "1"]).arg(ip.to_string()),
        }
    }

    /// Dump of the OS neighbour/ARP cache.
    pub fn arp_table(self) -> ProbeCommand {
        match self {
            Platform::Posix => ProbeCommand::new("arp", ["-an"]),
            Platform::Windows => ProbeCommand::new("arp", ["-a"]),
        }
    }

    pub fn traceroute(self, ip: IpAddr, max_hops: u8, wait: Duration) -> ProbeCommand {
        match self {
            Platform::Posix => ProbeCommand::new("traceroute", ["-n"])
                .arg("-w")
                .arg(wait.as_secs().max(1).to_string())
                .arg("-m")
                .arg(max_hops.to_string())
                .arg(ip.to_string()),
            Platform::Windows => ProbeCommand::new("tracert", ["-d"])
                .arg("-w")
                .arg(wait.as_millis().max(1).to_string())
                .arg("-h")
                .arg(max_hops.to_string())
                .arg(ip.to_string()),
        }
    }

    /// Wireless interface status, used to find the associated access point.
    pub fn wireless_status(self) -> ProbeCommand {
        match self {
            Platform::Posix => ProbeCommand::new("iwconfig", Vec::<String>::new()),
            Platform::Windows => ProbeCommand::new("netsh", ["wlan", "show", "interfaces"]),
        }
    }

    /// NetBIOS name-service query for one host; only windows-like hosts ship a tool for it.
    pub fn netbios_name_query(self, ip: IpAddr) -> Option<ProbeCommand> {
        match self {
            Platform::Posix => None,
            Platform::Windows => Some(ProbeCommand::new("nbtstat", ["-A"]).arg(ip.to_string())),
        }
    }
}
