use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use lan_profiler::error::ProbeError;
use lan_profiler::identity::{MacVendorsClient, VendorLookup};
use tokio::net::TcpListener;

/// Plain-text vendor directory keyed by OUI, served on a loopback port.
async fn spawn_directory() -> SocketAddr {
    let app = Router::new()
        .route("/A42BB0", get(|| async { "  Acme Corp\n" }))
        .route("/F09FC2", get(|| async { (StatusCode::NOT_FOUND, "Not Found") }))
        .route("/0C0C0C", get(|| async { "" }))
        .route(
            "/001122",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "Too Late Inc"
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn client() -> MacVendorsClient {
    let addr = spawn_directory().await;
    MacVendorsClient::new(format!("http://{addr}/"), Duration::from_secs(1)).unwrap()
}

#[tokio::test]
async fn vendor_body_is_trimmed() {
    let vendors = client().await;
    assert_eq!(
        vendors.vendor("a4:2b:b0:11:22:33").await.unwrap().as_deref(),
        Some("Acme Corp")
    );
}

#[tokio::test]
async fn non_200_and_blank_bodies_are_misses() {
    let vendors = client().await;
    assert_eq!(vendors.vendor("F0-9F-C2-AA-BB-CC").await.unwrap(), None);
    assert_eq!(vendors.vendor("0c:0c:0c:00:00:01").await.unwrap(), None);
    // Not a MAC at all: nothing to look up.
    assert_eq!(vendors.vendor("N/A").await.unwrap(), None);
}

#[tokio::test]
async fn slow_directory_times_out() {
    let vendors = client().await;
    let res = vendors.vendor("00:11:22:33:44:55").await;
    assert!(
        matches!(res, Err(ProbeError::Timeout(t)) if t == Duration::from_secs(1)),
        "unexpected result: {res:?}"
    );
}
