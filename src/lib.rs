//! # mailsink
//!
//! mailsink is a minimal asynchronous SMTP receiving server.
//!
//! It accepts mail-client connections, drives each one through the
//! RFC 5321 command dialogue, and hands received messages to a channel
//! for downstream processing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mailsink::{Email, SmtpServer};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<Email>();
//!
//!     let server = SmtpServer::new("mail.local");
//!     tokio::spawn(async move {
//!         server.start("127.0.0.1:8425", tx).await.unwrap();
//!     });
//!
//!     // Inspect messages as clients deliver them
//!     while let Some(email) = rx.recv().await {
//!         println!("Received email from: {}", email.from);
//!     }
//! }
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Specify the envelope sender
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message body, terminated by `<CR><LF>.<CR><LF>`
//! - `QUIT` - Close the connection
//!
//! ## Notes
//!
//! - One mail transaction per connection; after the body is accepted
//!   only `QUIT` is honoured.
//! - Every read, write, and close runs under its own timeout; a slow or
//!   silent peer is cut off, never waited on.
//! - Malformed or out-of-order commands close the connection without a
//!   reply.
//! - Runs in-memory only. Message persistence, relaying, AUTH, and TLS
//!   are not supported.

mod smtp;

pub use smtp::{
    parse, Command, Email, ParseError, ProtocolFsm, SmtpError, SmtpResponse, SmtpServer,
    SmtpState, TimeoutController, TimeoutKind,
};
