//! Received-message data structures

use std::time::SystemTime;

/// A message received over one SMTP transaction.
///
/// This is the value handed to the injection channel when the body
/// terminator is observed; nothing is persisted.
#[derive(Debug, Clone)]
pub struct Email {
    /// The envelope sender from MAIL FROM (may be empty for `<>`)
    pub from: String,

    /// The envelope recipients from RCPT TO commands
    pub to: Vec<String>,

    /// The message content, headers and body, as received on the wire
    /// with the terminating `CRLF.CRLF` stripped
    pub data: String,

    /// When the message was received by the server
    pub timestamp: SystemTime,
}

impl Email {
    /// Create a new email
    pub fn new(from: String, to: Vec<String>, data: String) -> Self {
        Self {
            from,
            to,
            data,
            timestamp: SystemTime::now(),
        }
    }

    /// Check if this email was sent to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.to.iter().any(|addr| addr == recipient)
    }

    /// Get the subject line from the email headers (if present)
    pub fn get_subject(&self) -> Option<&str> {
        for line in self.data.lines() {
            if line.is_empty() {
                // End of headers
                break;
            }
            if let Some(subject) = line.strip_prefix("Subject: ") {
                return Some(subject);
            }
            if let Some(subject) = line.strip_prefix("subject: ") {
                return Some(subject);
            }
        }
        None
    }

    /// Get the message body (content after the blank line ending the
    /// headers)
    pub fn get_body(&self) -> Option<&str> {
        if let Some(at) = self.data.find("\r\n\r\n") {
            return Some(&self.data[at + 4..]);
        }
        if let Some(at) = self.data.find("\n\n") {
            return Some(&self.data[at + 2..]);
        }
        None
    }
}
