//! The per-connection driver
//!
//! A [`Connection`] owns its socket, parser dispatch, FSM, and timeout
//! controller, and walks the conversation through three phases. The
//! write phase sends the pending reply in full and feeds the FSM a
//! write completion. The read phase takes one chunk from the socket and
//! either parses it as a command or, while a DATA body is being
//! collected, appends it to the body buffer and scans for the
//! terminator. The close phase shuts the socket down and notifies the
//! supervisor exactly once. Every phase runs under its own armed timer;
//! a timer expiry cancels the in-flight operation and is fatal.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::smtp::command::{self, Command};
use crate::smtp::email::Email;
use crate::smtp::error::SmtpError;
use crate::smtp::response::SmtpResponse;
use crate::smtp::state::{ProtocolFsm, SmtpState};
use crate::smtp::timeout::{TimeoutController, TimeoutKind};

/// Supervisor-side identifier of a live connection
pub type ConnectionId = u64;

/// How many bytes one read may return
const READ_CHUNK_SIZE: usize = 2048;

/// Terminates the DATA body
const BODY_TERMINATOR: &[u8] = b"\r\n.\r\n";

/// One accepted client connection being driven through the SMTP
/// dialogue.
///
/// Constructing a connection enqueues the 220 greeting and forces the
/// FSM to `GreetingSending`; [`Connection::run`] then drives the
/// conversation to completion and reports the disconnect.
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    hostname: String,
    fsm: ProtocolFsm,
    timeouts: TimeoutController,
    /// Reply bytes pending write, released once fully on the wire
    outbound: Option<Vec<u8>>,
    /// DATA body collected so far, across read chunks
    body: Vec<u8>,
    /// Body bytes already scanned for the terminator
    scanned: usize,
    sender: Option<String>,
    recipients: Vec<String>,
    delivery: mpsc::UnboundedSender<Email>,
    disconnects: mpsc::UnboundedSender<ConnectionId>,
}

impl Connection {
    /// Take ownership of an accepted socket and stage the greeting.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        hostname: String,
        read_timeout_secs: u64,
        write_timeout_secs: u64,
        close_timeout_secs: u64,
        delivery: mpsc::UnboundedSender<Email>,
        disconnects: mpsc::UnboundedSender<ConnectionId>,
    ) -> Self {
        info!(id, %peer, "new remote connection");

        let mut timeouts =
            TimeoutController::new(read_timeout_secs, write_timeout_secs, close_timeout_secs);
        timeouts.on_cancel(move || debug!(id, "pending operation cancelled"));

        let mut fsm = ProtocolFsm::new();
        fsm.force(SmtpState::GreetingSending);

        let outbound = Some(SmtpResponse::greeting(&hostname).into_bytes());

        Self {
            id,
            stream,
            peer,
            hostname,
            fsm,
            timeouts,
            outbound,
            body: Vec::new(),
            scanned: 0,
            sender: None,
            recipients: Vec::new(),
            delivery,
            disconnects,
        }
    }

    /// The configured duration for one timeout kind
    pub fn timeout(&self, kind: TimeoutKind) -> std::time::Duration {
        self.timeouts.get(kind)
    }

    /// Reconfigure one timeout kind, in seconds (clamped to 1–240 s)
    pub fn set_timeout(&mut self, kind: TimeoutKind, secs: u64) {
        self.timeouts.set(kind, secs);
    }

    /// Drive the conversation until it ends, then close and notify the
    /// supervisor. Emits exactly one disconnect over the connection's
    /// lifetime.
    pub async fn run(mut self) {
        if let Err(error) = self.converse().await {
            warn!(id = self.id, peer = %self.peer, %error, "connection failed");
        }
        self.close().await;
        // The receiver only disappears when the supervisor itself is
        // gone, taking the live set with it.
        let _ = self.disconnects.send(self.id);
        info!(id = self.id, peer = %self.peer, "disconnected");
    }

    /// Alternate write and read phases until QUIT completes or
    /// something fatal happens.
    async fn converse(&mut self) -> Result<(), SmtpError> {
        loop {
            self.flush_outbound().await?;
            if self.fsm.state() == SmtpState::Close {
                return Ok(());
            }

            let chunk = self.read_chunk().await?;
            if self.fsm.state() == SmtpState::DataAccepted {
                if self.ingest_body(&chunk) {
                    self.fsm.force(SmtpState::DataEnded);
                    self.deliver();
                    let accepted = SmtpResponse::with_code(250, &self.hostname);
                    self.enqueue(accepted);
                }
                // No terminator yet: loop back into the read phase.
            } else {
                self.ingest_command(&chunk)?;
            }
        }
    }

    /// Write phase: send the pending reply in full under the write
    /// timer, then advance the FSM. No-op when nothing is pending.
    async fn flush_outbound(&mut self) -> Result<(), SmtpError> {
        let Some(bytes) = self.outbound.take() else {
            return Ok(());
        };

        trace!(id = self.id, count = bytes.len(), "sending reply");
        self.timeouts.start(TimeoutKind::Write);
        let token = self.timeouts.token();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SmtpError::Cancelled(TimeoutKind::Write)),
            written = async {
                self.stream.write_all(&bytes).await?;
                self.stream.flush().await
            } => written.map_err(SmtpError::from),
        };
        self.timeouts.stop(TimeoutKind::Write);
        result?;

        if !self.fsm.on_write_complete() {
            return Err(SmtpError::Protocol {
                event: "write-complete",
                state: self.fsm.state(),
            });
        }
        Ok(())
    }

    /// Read phase: take one chunk from the socket under the read timer.
    async fn read_chunk(&mut self) -> Result<Vec<u8>, SmtpError> {
        self.timeouts.start(TimeoutKind::Read);
        let token = self.timeouts.token();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SmtpError::Cancelled(TimeoutKind::Read)),
            read = self.stream.read(&mut buffer) => read.map_err(SmtpError::from),
        };
        self.timeouts.stop(TimeoutKind::Read);

        let count = result?;
        if count == 0 {
            return Err(SmtpError::PeerDisconnected);
        }
        buffer.truncate(count);
        trace!(id = self.id, count, "received chunk");
        Ok(buffer)
    }

    /// Parse one chunk as a command, advance the FSM, and stage the
    /// reply. Unknown verbs and rejected commands are fatal.
    fn ingest_command(&mut self, chunk: &[u8]) -> Result<(), SmtpError> {
        let parsed = command::parse(chunk)?;
        if parsed == Command::Unknown {
            return Err(SmtpError::UnknownCommand);
        }

        let state = self.fsm.state();
        if !self.fsm.on_command(&parsed) {
            return Err(SmtpError::Protocol {
                event: parsed.verb(),
                state,
            });
        }

        match &parsed {
            Command::Helo { domain } | Command::Ehlo { domain } => {
                info!(id = self.id, verb = parsed.verb(), %domain, "client identified");
            }
            Command::Mail { reverse_path } => {
                info!(id = self.id, from = %reverse_path, "envelope sender");
                self.sender = Some(reverse_path.clone());
            }
            Command::Rcpt { forward_path } => {
                info!(id = self.id, to = %forward_path, "envelope recipient");
                self.recipients.push(forward_path.clone());
            }
            _ => {}
        }

        // Every known command has a reply code; Unknown was handled above.
        let code = parsed.reply_code().unwrap_or(250);
        let reply = SmtpResponse::with_code(code, &self.hostname);
        self.enqueue(reply);
        Ok(())
    }

    /// Append one chunk to the body buffer and scan for the terminator
    /// across the chunk boundary. Returns whether the body is complete,
    /// truncating it to exclude the terminator.
    fn ingest_body(&mut self, chunk: &[u8]) -> bool {
        self.body.extend_from_slice(chunk);

        // Rescan from just before the previous end so a terminator
        // split across two reads is still found.
        let from = self.scanned.saturating_sub(BODY_TERMINATOR.len() - 1);
        if let Some(at) = self.body[from..]
            .windows(BODY_TERMINATOR.len())
            .position(|window| window == BODY_TERMINATOR)
        {
            self.body.truncate(from + at);
            debug!(id = self.id, count = self.body.len(), "body complete");
            return true;
        }

        self.scanned = self.body.len();
        false
    }

    /// Hand the finished message to the injection channel. A missing
    /// receiver is not an error; the message is simply dropped.
    fn deliver(&mut self) {
        let data = String::from_utf8_lossy(&self.body).into_owned();
        let email = Email::new(
            self.sender.take().unwrap_or_default(),
            std::mem::take(&mut self.recipients),
            data,
        );
        let _ = self.delivery.send(email);
    }

    fn enqueue(&mut self, response: SmtpResponse) {
        self.outbound = Some(response.into_bytes());
    }

    /// Close phase: shut the socket down under the close timer. If even
    /// the shutdown times out, the socket is dropped, which releases it
    /// forcibly.
    async fn close(&mut self) {
        self.timeouts.start(TimeoutKind::Close);
        let token = self.timeouts.token();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SmtpError::Cancelled(TimeoutKind::Close)),
            shut = self.stream.shutdown() => shut.map_err(SmtpError::from),
        };
        self.timeouts.stop(TimeoutKind::Close);

        match result {
            Ok(()) => debug!(id = self.id, "connection shut down"),
            Err(error) => {
                warn!(id = self.id, %error, "graceful shutdown failed, dropping the socket")
            }
        }
    }
}
