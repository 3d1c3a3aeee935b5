//! SMTP server implementation

pub mod command;
pub mod connection;
pub mod email;
pub mod error;
pub mod response;
pub mod server;
pub mod state;
pub mod timeout;

pub use command::{parse, Command, ParseError};
pub use email::Email;
pub use error::SmtpError;
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use state::{ProtocolFsm, SmtpState};
pub use timeout::{TimeoutController, TimeoutKind};
