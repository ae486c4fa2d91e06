//! Library crate for lan-profiler: LAN host discovery and per-host enrichment.
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod logging;
pub mod names;
pub mod netdetect;
pub mod nmap;
pub mod orchestrator;
pub mod ports;
pub mod portscan;
pub mod probe;
pub mod repository;
pub mod server;
pub mod topology;
pub mod types;
