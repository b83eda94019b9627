//! Manifest delivery with acknowledgment and retry.
//!
//! One delivery is one connection: bounded connect, framed write, bounded
//! ack read, byte-exact ack check. The retry wrapper makes a fixed number
//! of attempts with a fixed delay between them; exhausting them is
//! reported as undelivered, never a panic or process exit.

use std::time::Duration;

use polaredge_proto::{write_frame, TransportError, ACK};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Agent address.
    pub agent_addr: String,

    /// Connect deadline per attempt.
    pub connect_timeout: Duration,

    /// Ack-read deadline per attempt.
    pub ack_timeout: Duration,

    /// Total delivery attempts.
    pub attempts: u32,

    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            agent_addr: "127.0.0.1:9005".to_string(),
            connect_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// All delivery attempts failed; the manifest never got an ack.
#[derive(Debug, Error)]
#[error("manifest undelivered after {attempts} attempts: {last_error}")]
pub struct Undelivered {
    pub attempts: u32,
    #[source]
    pub last_error: TransportError,
}

/// Deliver one manifest payload and wait for the acknowledgment.
pub async fn send_manifest(config: &SenderConfig, payload: &[u8]) -> Result<(), TransportError> {
    let mut stream = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(&config.agent_addr),
    )
    .await
    .map_err(|_| TransportError::ConnectTimeout {
        addr: config.agent_addr.clone(),
        timeout_ms: config.connect_timeout.as_millis() as u64,
    })?
    .map_err(|e| TransportError::Connect {
        addr: config.agent_addr.clone(),
        source: e,
    })?;

    write_frame(&mut stream, payload).await?;

    let mut ack = [0u8; ACK.len()];
    tokio::time::timeout(config.ack_timeout, stream.read_exact(&mut ack))
        .await
        .map_err(|_| TransportError::ReadTimeout)?
        .map_err(TransportError::Read)?;

    if &ack != ACK {
        return Err(TransportError::AckMismatch {
            expected: String::from_utf8_lossy(ACK).into_owned(),
            got: String::from_utf8_lossy(&ack).into_owned(),
        });
    }

    debug!(bytes = payload.len(), "Manifest delivery confirmed");
    Ok(())
}

/// Deliver with the configured attempt budget. The caller decides what to
/// do with an undelivered manifest (the binary prints it to stdout).
pub async fn send_with_retries(
    config: &SenderConfig,
    payload: &[u8],
) -> Result<(), Undelivered> {
    let mut last_error = None;

    for attempt in 1..=config.attempts {
        match send_manifest(config, payload).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, attempts = config.attempts, error = %e, "Delivery attempt failed");
                last_error = Some(e);
                if attempt < config.attempts {
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    Err(Undelivered {
        attempts: config.attempts,
        last_error: last_error.unwrap_or(TransportError::ReadTimeout),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaredge_proto::read_frame;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fast_config(addr: String) -> SenderConfig {
        SenderConfig {
            agent_addr: addr,
            connect_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(500),
            attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    /// Agent stand-in that acks every framed payload.
    async fn spawn_acking_agent() -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = read_frame(&mut stream).await.unwrap();
                    stream.write_all(ACK).await.unwrap();
                });
            }
        });

        (addr, connections)
    }

    #[tokio::test]
    async fn test_delivery_succeeds_against_acking_agent() {
        let (addr, _connections) = spawn_acking_agent().await;
        let config = fast_config(addr);

        send_manifest(&config, b"[]").await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_ack_is_a_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await.unwrap();
            stream.write_all(b"no").await.unwrap();
        });

        let err = send_manifest(&fast_config(addr), b"[]").await.unwrap_err();
        assert!(matches!(err, TransportError::AckMismatch { .. }));
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            // Accept, read, never ack.
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
            std::future::pending::<()>().await;
        });

        let err = send_manifest(&fast_config(addr), b"[]").await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout));
    }

    #[tokio::test]
    async fn test_retries_make_exactly_the_configured_attempts() {
        // Bind then drop so the port refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = fast_config(addr);
        let started = std::time::Instant::now();
        let err = send_with_retries(&config, b"[]").await.unwrap_err();

        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last_error, TransportError::Connect { .. }));
        // Two inter-attempt delays separate three attempts.
        assert!(started.elapsed() >= config.retry_delay * 2);
    }

    #[tokio::test]
    async fn test_retry_recovers_when_agent_comes_back() {
        let (addr, connections) = spawn_acking_agent().await;

        // First attempt hits a dead port, the retry hits the live agent.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap().to_string();
        drop(dead);

        let mut config = fast_config(dead_addr);
        let err = send_with_retries(&config, b"[]").await.unwrap_err();
        assert_eq!(err.attempts, 3);

        config.agent_addr = addr;
        send_with_retries(&config, b"[]").await.unwrap();
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }
}
