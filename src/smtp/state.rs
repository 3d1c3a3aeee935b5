//! The conversation state machine
//!
//! Legal command orderings are enforced by a small FSM driven by two
//! event kinds: a parsed command arriving, and the previous reply being
//! fully on the wire. Each accepted command parks the conversation in a
//! `*Received` state; the matching write completion moves it to
//! `*Accepted`, from which the next command may be taken. No command is
//! legal while a reply is still being written.

use tracing::trace;

use crate::smtp::command::Command;

/// Connection conversation states.
///
/// `Error` is terminal for the transaction, `Close` for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpState {
    Error,
    GreetingSending,
    GreetingSent,
    HeloReceived,
    HeloAccepted,
    EhloReceived,
    EhloAccepted,
    MailReceived,
    MailAccepted,
    RcptReceived,
    RcptAccepted,
    DataReceived,
    DataAccepted,
    DataEnded,
    QuitReceived,
    QuitAccepted,
    Close,
}

/// The per-connection protocol FSM.
///
/// Starts in `Error`; the connection driver forces `GreetingSending`
/// once the greeting is enqueued.
#[derive(Debug, Default)]
pub struct ProtocolFsm {
    state: SmtpState,
}

impl Default for SmtpState {
    fn default() -> Self {
        SmtpState::Error
    }
}

impl ProtocolFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current conversation state
    pub fn state(&self) -> SmtpState {
        self.state
    }

    /// Driver-level override, used for `GreetingSending` right after
    /// construction and `DataEnded` when the body sentinel is observed
    pub fn force(&mut self, state: SmtpState) {
        trace!(from = ?self.state, to = ?state, "state forced");
        self.state = state;
    }

    /// Feed a parsed command. Returns whether the transition was legal;
    /// on rejection the FSM parks in `Error` and the connection must
    /// close.
    pub fn on_command(&mut self, command: &Command) -> bool {
        use SmtpState::*;

        let next = match (self.state, command) {
            (GreetingSending | GreetingSent, Command::Helo { .. }) => HeloReceived,
            (GreetingSending | GreetingSent, Command::Ehlo { .. }) => EhloReceived,
            (HeloAccepted, Command::Mail { .. }) => MailReceived,
            (HeloAccepted, Command::Quit) => QuitAccepted,
            (EhloReceived | EhloAccepted, Command::Mail { .. }) => MailReceived,
            (EhloReceived | EhloAccepted, Command::Quit) => QuitAccepted,
            (MailAccepted, Command::Rcpt { .. }) => RcptReceived,
            (MailAccepted, Command::Quit) => QuitAccepted,
            (RcptAccepted, Command::Rcpt { .. }) => RcptReceived,
            (RcptAccepted, Command::Data) => DataReceived,
            (RcptAccepted, Command::Quit) => QuitAccepted,
            (DataEnded, Command::Quit) => QuitAccepted,
            _ => Error,
        };

        trace!(from = ?self.state, verb = command.verb(), to = ?next, "state by command");
        self.state = next;
        next != Error
    }

    /// Feed a write completion, advancing `*Received` to `*Accepted`.
    /// Returns whether the transition was legal; on rejection the FSM
    /// parks in `Error`.
    pub fn on_write_complete(&mut self) -> bool {
        use SmtpState::*;

        let next = match self.state {
            GreetingSending => GreetingSent,
            HeloReceived => HeloAccepted,
            EhloReceived => EhloAccepted,
            MailReceived => MailAccepted,
            RcptReceived => RcptAccepted,
            DataReceived => DataAccepted,
            DataEnded => DataEnded,
            QuitReceived => QuitAccepted,
            QuitAccepted => Close,
            _ => Error,
        };

        trace!(from = ?self.state, to = ?next, "state by write complete");
        self.state = next;
        next != Error
    }
}
