//! SMTP server implementation
//!
//! The server owns the listening socket and the set of live
//! connections. Accepted sockets above the connection cap are shut down
//! on the spot; everything else gets a [`Connection`] driver on its own
//! task. Drivers report back over a channel when they finish closing,
//! and the accept loop reaps them from the live set.

use std::collections::HashSet;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::smtp::connection::{Connection, ConnectionId};
use crate::smtp::email::Email;
use crate::smtp::error::SmtpError;

/// Server-wide cap on concurrently live connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
/// Seconds a connection may sit idle between commands
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;
/// Seconds one reply write may take
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
/// Seconds a graceful shutdown may take
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;

/// Main SMTP server that accepts connections and hands received
/// messages to a channel
#[derive(Debug, Clone)]
pub struct SmtpServer {
    /// Server hostname, echoed in every reply
    hostname: String,
    max_connections: usize,
    read_timeout_secs: u64,
    write_timeout_secs: u64,
    close_timeout_secs: u64,
    shutdown: CancellationToken,
}

impl SmtpServer {
    /// Create a new SMTP server with default limits and timeouts
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cap the number of concurrently live connections (at least 1)
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit.max(1);
        self
    }

    /// Configure the per-connection timeouts, in seconds
    pub fn timeouts(mut self, read_secs: u64, write_secs: u64, close_secs: u64) -> Self {
        self.read_timeout_secs = read_secs;
        self.write_timeout_secs = write_secs;
        self.close_timeout_secs = close_secs;
        self
    }

    /// Start the server on the specified address.
    /// Received messages are sent to the provided channel.
    pub async fn start(
        &self,
        addr: &str,
        delivery: mpsc::UnboundedSender<Email>,
    ) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr).await?;
        self.start_with_listener(listener, delivery).await
    }

    /// Start the server with an existing listener.
    /// Received messages are sent to the provided channel.
    pub async fn start_with_listener(
        &self,
        listener: TcpListener,
        delivery: mpsc::UnboundedSender<Email>,
    ) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);

        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        let mut live: HashSet<ConnectionId> = HashSet::new();
        let mut next_id: ConnectionId = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if live.len() >= self.max_connections {
                            let refusal = SmtpError::AtCapacity { limit: self.max_connections };
                            warn!(%peer, "{refusal}, refusing socket");
                            if let Ok(stream) = stream.into_std() {
                                let _ = stream.shutdown(std::net::Shutdown::Both);
                            }
                            continue;
                        }

                        next_id += 1;
                        let connection = Connection::new(
                            next_id,
                            stream,
                            peer,
                            self.hostname.clone(),
                            self.read_timeout_secs,
                            self.write_timeout_secs,
                            self.close_timeout_secs,
                            delivery.clone(),
                            disconnect_tx.clone(),
                        );
                        live.insert(next_id);
                        tokio::spawn(connection.run());
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },

                Some(id) = disconnect_rx.recv() => {
                    if !live.remove(&id) {
                        // An unknown id here means a connection was
                        // reaped twice, which the driver contract rules
                        // out.
                        error!(id, "disconnected connection is not in the live set");
                    }
                }
            }
        }

        info!(draining = live.len(), "SMTP listener stopped");
        Ok(())
    }

    /// Stop accepting connections and close the listener. Live
    /// connections are not torn down; they drain under their own
    /// timeouts.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
