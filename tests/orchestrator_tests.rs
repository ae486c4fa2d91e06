mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use lan_profiler::orchestrator::ScanPhase;
use lan_profiler::repository::Repository;
use lan_profiler::types::NOT_AVAILABLE;
use tokio::time::Instant;

use common::{hosts, ip, FakeIdentity, FakePortProbe, FakeTopology, Harness};

fn lan() -> Ipv4Net {
    "192.168.1.0/24".parse().unwrap()
}

#[tokio::test]
async fn zero_hosts_is_an_empty_success() {
    let (orch, repo) = Harness {
        discovered: Ok(vec![]),
        ..Default::default()
    }
    .build();
    assert_eq!(orch.phase(), ScanPhase::Idle);

    let report = orch.run_scan(lan()).await;
    assert!(report.devices.is_empty());
    assert!(report.error.is_none());
    assert_eq!(orch.phase(), ScanPhase::Aggregated);

    let latest = repo.latest_scan().unwrap().unwrap();
    assert_eq!(latest.device_count, 0);
}

#[tokio::test]
async fn discovery_fault_fails_the_run() {
    let (orch, repo) = Harness {
        discovered: Err("nmap is not installed".into()),
        ..Default::default()
    }
    .build();

    let report = orch.run_scan(lan()).await;
    assert!(report.devices.is_empty());
    assert!(report.error.as_deref().is_some_and(|e| !e.is_empty()));
    assert_eq!(orch.phase(), ScanPhase::Failed);
    assert!(repo.scan_history().unwrap().is_empty());
}

#[tokio::test]
async fn missing_interface_fails_local_scan() {
    let (orch, _repo) = Harness {
        locator: None,
        ..Default::default()
    }
    .build();

    let scan = orch.run_local_scan().await;
    assert!(scan.current_ip.is_none());
    assert!(scan.report.devices.is_empty());
    assert!(scan.report.error.is_some());
    assert_eq!(orch.phase(), ScanPhase::Failed);
}

#[tokio::test]
async fn local_scan_targets_the_local_24() {
    let (orch, _repo) = Harness::default().build();
    let scan = orch.run_local_scan().await;
    assert_eq!(scan.current_ip.as_deref(), Some("192.168.1.2"));
    assert_eq!(scan.network_range.as_deref(), Some("192.168.1.0/24"));
    assert_eq!(scan.report.devices.len(), 3);

    let body = serde_json::to_value(&scan).unwrap();
    assert!(body.get("devices").is_some());
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn records_are_complete_and_sorted() {
    let (orch, _repo) = Harness {
        discovered: Ok(hosts(&[20, 1, 10])),
        ..Default::default()
    }
    .build();

    let report = orch.run_scan(lan()).await;
    let ips: Vec<&str> = report.devices.iter().map(|d| d.ip.as_str()).collect();
    assert_eq!(ips, ["192.168.1.1", "192.168.1.10", "192.168.1.20"]);

    for d in &report.devices {
        for field in [
            &d.mac,
            &d.hostname,
            &d.manufacturer,
            &d.bssid,
            &d.smb_status,
            &d.traceroute,
            &d.ttl,
            &d.os,
        ] {
            assert!(!field.is_empty(), "empty field in {d:?}");
        }
        assert_eq!(d.bssid, "4C:ED:FB:01:02:03");
    }
    assert_eq!(report.devices[0].hostname, "host-1");
    assert_eq!(report.devices[0].mac, "AA:BB:CC:00:00:01");
}

#[tokio::test]
async fn only_requested_ports_are_reported() {
    let mut harness = Harness::default();
    harness.config.general_ports = vec![22, 80];
    harness.config.streaming_ports = vec![554, 8080];
    let probe = harness.ports.clone();
    let (orch, _repo) = harness.build();

    let report = orch.run_scan(lan()).await;
    assert!(!report.devices.is_empty());
    for d in &report.devices {
        let open: Vec<u16> = d.open_ports.iter().map(|p| p.port).collect();
        let streaming: Vec<u16> = d.streaming_ports.iter().map(|p| p.port).collect();
        assert_eq!(open, [22, 80]);
        assert_eq!(streaming, [554]);
    }

    let calls = probe.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&vec![22, 80]));
    assert!(calls.contains(&vec![554, 8080]));
}

#[tokio::test]
async fn failed_port_pass_degrades_to_no_ports() {
    let (orch, _repo) = Harness {
        ports: Arc::new(FakePortProbe::failing()),
        ..Default::default()
    }
    .build();

    let report = orch.run_scan(lan()).await;
    assert!(report.error.is_none());
    assert_eq!(report.devices.len(), 3);
    assert!(report
        .devices
        .iter()
        .all(|d| d.open_ports.is_empty() && d.streaming_ports.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn enrichment_time_is_bounded_by_the_slowest_host() {
    let (orch, _repo) = Harness {
        discovered: Ok(hosts(&[1, 2, 3, 4, 5, 6])),
        identity: FakeIdentity {
            delay: Duration::from_secs(10),
            ..Default::default()
        },
        topology: FakeTopology {
            delay: Duration::from_secs(10),
        },
        ..Default::default()
    }
    .build();

    let started = Instant::now();
    let report = orch.run_scan(lan()).await;
    let elapsed = started.elapsed();

    assert_eq!(report.devices.len(), 6);
    // Sequential enrichment would take at least 6 * 20 s.
    assert!(elapsed < Duration::from_secs(15), "took {elapsed:?}");
}

#[tokio::test]
async fn crashed_host_is_dropped_others_survive() {
    let (orch, _repo) = Harness {
        identity: FakeIdentity {
            panics_on: HashSet::from([ip("192.168.1.10")]),
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let report = orch.run_scan(lan()).await;
    assert!(report.error.is_none());
    let ips: Vec<&str> = report.devices.iter().map(|d| d.ip.as_str()).collect();
    assert_eq!(ips, ["192.168.1.1", "192.168.1.20"]);
}

#[tokio::test]
async fn identities_without_mac_are_not_stored() {
    let (orch, repo) = Harness {
        identity: FakeIdentity {
            unresolved: HashSet::from([ip("192.168.1.20")]),
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let report = orch.run_scan(lan()).await;
    assert_eq!(report.devices.len(), 3);
    assert!(report.devices.iter().any(|d| d.mac == NOT_AVAILABLE));

    let stored = repo.devices().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|d| d.mac != NOT_AVAILABLE));

    let latest = repo.latest_scan().unwrap().unwrap();
    assert_eq!(latest.device_count, 3);
    assert_eq!(latest.open_port_count, report.open_port_count());
}

#[tokio::test]
async fn repeated_scans_accumulate_history() {
    let (orch, repo) = Harness::default().build();
    orch.run_scan(lan()).await;
    orch.run_scan(lan()).await;

    assert_eq!(repo.scan_history().unwrap().len(), 2);
    assert_eq!(repo.total_devices().unwrap(), 3);
}
