//! Error types for the SMTP server

use thiserror::Error;

use crate::smtp::command::ParseError;
use crate::smtp::state::SmtpState;
use crate::smtp::timeout::TimeoutKind;

/// Everything that can end a connection (or refuse one).
///
/// None of these are retried. Every variant except [`SmtpError::AtCapacity`]
/// is fatal to the connection it occurred on; `AtCapacity` is raised on the
/// accept path before a connection exists and never stops the server.
#[derive(Error, Debug)]
pub enum SmtpError {
    /// Malformed input line. The connection closes without a reply.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The verb did not match any recognised command.
    #[error("command not recognized")]
    UnknownCommand,

    /// A parseable command or write completion arrived in a state where the
    /// protocol does not allow it. The connection closes without a reply.
    #[error("protocol violation: {event} event in state {state:?}")]
    Protocol { event: &'static str, state: SmtpState },

    /// Underlying socket failure, including short writes.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The armed timer expired and cancelled the in-flight operation.
    #[error("{0} operation cancelled by timeout")]
    Cancelled(TimeoutKind),

    /// The peer closed the connection mid-dialogue.
    #[error("connection closed by peer")]
    PeerDisconnected,

    /// Accept refused because the live-connection cap was reached.
    #[error("connection capacity reached ({limit} live connections)")]
    AtCapacity { limit: usize },
}
