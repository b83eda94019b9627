//! Manifest receiver.
//!
//! Accepts connections concurrently, one task per connection. Each
//! connection carries exactly one framed manifest payload: the handler
//! reads the full frame under a deadline, hands the raw payload to the
//! ingestion queue, and answers with the acknowledgment token.
//!
//! The queue-full behavior is an explicit policy choice: `block` applies
//! back-pressure to the connection, `reject` fails it without an ack so
//! the sender's retry loop owns redelivery.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use polaredge_proto::{read_frame, TransportError, ACK};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::QueueFullPolicy;

#[derive(Debug, Error)]
enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("ingestion queue full")]
    QueueFull,

    #[error("ingestion queue closed")]
    QueueClosed,
}

/// TCP receiver feeding the ingestion queue.
pub struct Receiver {
    listener: TcpListener,
    queue: mpsc::Sender<Vec<u8>>,
    policy: QueueFullPolicy,
    read_timeout: Duration,
}

impl Receiver {
    /// Bind the listen socket.
    pub async fn bind(
        addr: SocketAddr,
        queue: mpsc::Sender<Vec<u8>>,
        policy: QueueFullPolicy,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            queue,
            policy,
            read_timeout,
        })
    }

    /// Address the receiver is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and handle connections until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(listen_addr = %local_addr, policy = ?self.policy, "Receiver started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Receiver shutting down");
                        return Ok(());
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let queue = self.queue.clone();
                            let policy = self.policy;
                            let read_timeout = self.read_timeout;

                            tokio::spawn(
                                async move {
                                    if let Err(e) =
                                        handle_connection(stream, queue, policy, read_timeout).await
                                    {
                                        warn!(error = %e, "Connection failed");
                                    }
                                }
                                .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                            // Pace the loop on persistent accept failures
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    queue: mpsc::Sender<Vec<u8>>,
    policy: QueueFullPolicy,
    read_timeout: Duration,
) -> Result<(), ConnectionError> {
    let payload = tokio::time::timeout(read_timeout, read_frame(&mut stream))
        .await
        .map_err(|_| TransportError::ReadTimeout)??;

    debug!(bytes = payload.len(), "Manifest frame received");

    match policy {
        QueueFullPolicy::Block => {
            queue
                .send(payload)
                .await
                .map_err(|_| ConnectionError::QueueClosed)?;
        }
        QueueFullPolicy::Reject => {
            queue.try_send(payload).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::QueueClosed,
            })?;
        }
    }

    stream.write_all(ACK).await.map_err(TransportError::Write)?;
    stream.flush().await.map_err(TransportError::Write)?;

    Ok(())
}
