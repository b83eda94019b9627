//! Test harness for agent integration tests.
//!
//! Wires a receiver, ingestion queue, and pipeline worker together the
//! way the binary does, against temp paths and a scripted exposure
//! prompt, and provides a minimal in-test client for pushing framed
//! manifests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use polaredge_agent::config::QueueFullPolicy;
use polaredge_agent::exposure::{ExposureMode, ExposurePolicy, StaticPrompt};
use polaredge_agent::pipeline::Pipeline;
use polaredge_agent::ports::PortProbe;
use polaredge_agent::receiver::Receiver;
use polaredge_agent::status::StatusStore;
use polaredge_proto::{encode_manifest, write_frame, RouteDescriptor, ACK};

pub struct AllFreeProbe;

impl PortProbe for AllFreeProbe {
    fn is_free(&self, _port: u16) -> bool {
        true
    }
}

#[allow(dead_code)]
pub struct TestAgent {
    pub addr: SocketAddr,
    pub config_path: PathBuf,
    pub status_path: PathBuf,
    pub config_rx: watch::Receiver<u64>,
    shutdown_tx: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

/// Spawn the receiver + worker stack against temp paths.
#[allow(dead_code)]
pub async fn spawn_agent(queue_policy: QueueFullPolicy, prompt_answer: ExposureMode) -> TestAgent {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("polaredge.toml");
    let status_path = dir.path().join("status").join("status.json");

    let policy = ExposurePolicy::new(
        Arc::new(StaticPrompt {
            answer: prompt_answer,
            accept_switch: false,
        }),
        Arc::new(AllFreeProbe),
        (7000, 7100),
        Duration::from_secs(1),
    );

    let (config_tx, config_rx) = watch::channel(0u64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (queue_tx, queue_rx) = mpsc::channel(4);

    let pipeline = Pipeline::new(
        Arc::new(policy),
        config_path.clone(),
        StatusStore::new(status_path.clone()),
        config_tx,
    );
    tokio::spawn(pipeline.run(queue_rx, shutdown_rx.clone()));

    let receiver = Receiver::bind(
        "127.0.0.1:0".parse().unwrap(),
        queue_tx,
        queue_policy,
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let addr = receiver.local_addr().unwrap();
    tokio::spawn(receiver.run(shutdown_rx));

    TestAgent {
        addr,
        config_path,
        status_path,
        config_rx,
        shutdown_tx,
        _dir: dir,
    }
}

#[allow(dead_code)]
pub fn routes(entries: &[(&str, &str, u16)]) -> Vec<RouteDescriptor> {
    entries
        .iter()
        .map(|(host, service, port)| RouteDescriptor {
            host: host.to_string(),
            service_name: service.to_string(),
            service_port: *port,
        })
        .collect()
}

/// Push one framed payload and wait for the ack.
#[allow(dead_code)]
pub async fn push_raw(addr: SocketAddr, payload: &[u8]) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, payload)
        .await
        .map_err(std::io::Error::other)?;

    let mut ack = [0u8; ACK.len()];
    stream.read_exact(&mut ack).await?;
    assert_eq!(&ack, ACK);
    Ok(())
}

/// Encode and push a manifest, waiting for the ack.
#[allow(dead_code)]
pub async fn push_manifest(
    addr: SocketAddr,
    entries: &[(&str, &str, u16)],
) -> std::io::Result<()> {
    let payload = encode_manifest(&routes(entries)).unwrap();
    push_raw(addr, &payload).await
}
