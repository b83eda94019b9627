//! End-to-end pipeline tests: framed socket intake through rendered
//! config and status artifact.

mod harness;

use harness::{push_manifest, push_raw, spawn_agent};
use polaredge_agent::config::QueueFullPolicy;
use polaredge_agent::exposure::ExposureMode;

#[tokio::test]
async fn test_manifest_flows_to_rendered_config_and_status() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Off).await;

    push_manifest(agent.addr, &[("a.com", "svcA", 80)])
        .await
        .unwrap();

    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 1).await.unwrap();

    let config = std::fs::read_to_string(&agent.config_path).unwrap();
    assert!(config.contains("[entryPoints.web]"));
    assert!(config.contains("address = \":80\""));
    assert!(config.contains("rule = \"Host(`a.com`)\""));
    assert!(config.contains("url = \"http://svcA:80\""));

    let status = std::fs::read_to_string(&agent.status_path).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&status).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["routeID"], "svcA@a.com:80");
    assert_eq!(records[0]["status"], "applied");
    assert_eq!(records[0]["mode"], "public");
}

#[tokio::test]
async fn test_manifests_apply_in_arrival_order() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Off).await;

    push_manifest(agent.addr, &[("a.com", "first", 80)])
        .await
        .unwrap();
    push_manifest(agent.addr, &[("b.com", "second", 80)])
        .await
        .unwrap();
    push_manifest(agent.addr, &[("c.com", "third", 80)])
        .await
        .unwrap();

    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 3).await.unwrap();

    // Last write wins: the final manifest is the one on disk.
    let config = std::fs::read_to_string(&agent.config_path).unwrap();
    assert!(config.contains("[http.routers.third]"));
    assert!(!config.contains("first"));
    assert!(!config.contains("second"));
}

#[tokio::test]
async fn test_undecodable_payload_does_not_stall_the_pipeline() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Off).await;

    // The receiver acks the frame; the decode failure is the worker's
    // problem and must not wedge it.
    push_raw(agent.addr, b"definitely not json").await.unwrap();
    push_manifest(agent.addr, &[("a.com", "svcA", 80)])
        .await
        .unwrap();

    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 1).await.unwrap();

    let config = std::fs::read_to_string(&agent.config_path).unwrap();
    assert!(config.contains("[http.routers.svcA]"));
}

#[tokio::test]
async fn test_high_port_routes_are_dropped_in_deny_mode() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Off).await;

    push_manifest(agent.addr, &[("a.com", "svcA", 80), ("b.com", "svcB", 9000)])
        .await
        .unwrap();

    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 1).await.unwrap();

    let config = std::fs::read_to_string(&agent.config_path).unwrap();
    assert!(config.contains("svcA"));
    assert!(!config.contains("svcB"));

    let status = std::fs::read_to_string(&agent.status_path).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&status).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["status"], "dropped");
    assert_eq!(records[1]["mode"], "off");
}

#[tokio::test]
async fn test_admitted_private_routes_render_like_public_ones() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Private).await;

    push_manifest(agent.addr, &[("b.com", "svcB", 9000)])
        .await
        .unwrap();

    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 1).await.unwrap();

    let config = std::fs::read_to_string(&agent.config_path).unwrap();
    assert!(config.contains("[entryPoints.port9000]"));
    assert!(config.contains("url = \"http://svcB:9000\""));

    let status = std::fs::read_to_string(&agent.status_path).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&status).unwrap();
    assert_eq!(records[0]["mode"], "private");
    assert_eq!(records[0]["status"], "applied");
}

#[tokio::test]
async fn test_status_snapshot_is_replaced_per_manifest() {
    let agent = spawn_agent(QueueFullPolicy::Block, ExposureMode::Off).await;

    push_manifest(
        agent.addr,
        &[("a.com", "svcA", 80), ("b.com", "svcB", 443)],
    )
    .await
    .unwrap();
    let mut config_rx = agent.config_rx.clone();
    config_rx.wait_for(|g| *g >= 1).await.unwrap();

    push_manifest(agent.addr, &[("c.com", "svcC", 80)])
        .await
        .unwrap();
    config_rx.wait_for(|g| *g >= 2).await.unwrap();

    let status = std::fs::read_to_string(&agent.status_path).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&status).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["routeID"], "svcC@c.com:80");
}
