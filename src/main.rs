use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ipnet::Ipv4Net;
use tracing::info;

use lan_profiler::config::ScanConfig;
use lan_profiler::logging::init_logging;
use lan_profiler::orchestrator::{LocalScan, Probes, ScanOrchestrator};
use lan_profiler::repository::SqliteRepository;
use lan_profiler::server::{self, AppState};
use lan_profiler::types::DeviceRecord;
use lan_profiler::ports;

/// lan-profiler: discover live hosts on a LAN and profile each one.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-profiler",
    version,
    about = "Discover live hosts on a LAN and build a profile (MAC, vendor, name, ports, OS, NetBIOS/SMB) for each.",
    long_about = None
)]
struct Cli {
    /// IPv4 CIDR to scan (e.g., 192.168.1.0/24). If omitted, the local /24 is scanned.
    #[arg(long)]
    range: Option<Ipv4Net>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Replace the general port list with the ports in this file (one port, range or comma list per line).
    #[arg(long)]
    ports: Option<PathBuf>,

    /// Hosts enriched in parallel.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON API instead of running a single scan.
    #[arg(long, default_value_t = false)]
    serve: bool,

    /// Address the API listens on.
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Log level used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = match cli.config.as_deref() {
        Some(path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };
    if let Some(db) = cli.db.clone() {
        config.db_path = db;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(path) = cli.ports.as_deref() {
        config.general_ports = ports::load_ports_from_path(path)?;
    }

    let repo = SqliteRepository::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let probes = Probes::system(&config).context("failed to set up probes")?;
    let orchestrator = Arc::new(ScanOrchestrator::new(probes, Arc::new(repo), &config));

    if cli.serve {
        tokio::select! {
            res = server::spawn_server(&cli.bind, AppState::new(orchestrator)) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    let scan = match cli.range {
        Some(range) => {
            let range = range.trunc();
            LocalScan {
                current_ip: None,
                network_range: Some(range.to_string()),
                report: orchestrator.run_scan(range).await,
            }
        }
        None => orchestrator.run_local_scan().await,
    };

    print_results_table(&scan.report.devices);
    if let Some(path) = cli.output.as_deref() {
        match write_results_json(path, &scan) {
            Ok(()) => println!("Wrote JSON results to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {}", path.display(), e),
        }
    }

    if let Some(err) = scan.report.error {
        bail!("scan failed: {err}");
    }
    Ok(())
}

fn print_results_table(devices: &[DeviceRecord]) {
    let ports_of = |d: &DeviceRecord| {
        d.open_ports
            .iter()
            .chain(d.streaming_ports.iter())
            .map(|p| p.port.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut ip_w = "ip".len();
    let mut mac_w = "mac".len();
    let mut host_w = "hostname".len();
    let mut vendor_w = "manufacturer".len();
    let mut os_w = "os".len();
    for d in devices {
        ip_w = ip_w.max(d.ip.len());
        mac_w = mac_w.max(d.mac.len());
        host_w = host_w.max(d.hostname.len().min(24));
        vendor_w = vendor_w.max(d.manufacturer.len().min(24));
        os_w = os_w.max(d.os.len().min(32));
    }

    println!("\nDevices: {}", devices.len());
    println!(
        "{:<ip_w$}  {:<mac_w$}  {:<host_w$}  {:<vendor_w$}  {:<os_w$}  ports",
        "ip", "mac", "hostname", "manufacturer", "os",
    );
    println!(
        "{:-<ip_w$}  {:-<mac_w$}  {:-<host_w$}  {:-<vendor_w$}  {:-<os_w$}  -----",
        "", "", "", "", "",
    );
    for d in devices {
        println!(
            "{:<ip_w$}  {:<mac_w$}  {:<host_w$}  {:<vendor_w$}  {:<os_w$}  {}",
            d.ip,
            d.mac,
            clip(&d.hostname, host_w),
            clip(&d.manufacturer, vendor_w),
            clip(&d.os, os_w),
            ports_of(d),
        );
    }
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn write_results_json(path: &Path, scan: &LocalScan) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, scan)?;
    Ok(())
}
