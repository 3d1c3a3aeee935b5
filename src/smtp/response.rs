//! SMTP response handling

/// Represents an SMTP reply that can be sent to a client.
///
/// Every reply on this wire is a single line: the greeting carries a short
/// banner, everything else is just `<code> <hostname>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The three-digit SMTP reply code (e.g. 250, 354, 221)
    pub code: u16,
    /// The text after the code, usually the server hostname
    pub text: String,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Create the 220 greeting banner sent right after accept
    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} SMTP service ready"))
    }

    /// Create a single-line reply carrying only the server hostname
    pub fn with_code(code: u16, hostname: &str) -> Self {
        Self::new(code, hostname)
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }

    /// Consume the response into its wire bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.format().into_bytes()
    }
}
