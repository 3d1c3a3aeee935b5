//! SMTP command parsing
//!
//! [`parse`] maps one received chunk to a typed [`Command`] with its
//! arguments extracted, or to a [`ParseError`]. Only the first
//! CRLF-terminated line of the chunk is considered; bytes after it are
//! ignored. Verbs and the `FROM`/`TO` keywords match ASCII
//! case-insensitively, the address between the angle brackets is kept
//! byte-for-byte.

use thiserror::Error;

/// Shortest chunk that can hold a verb
pub const MIN_COMMAND_LEN: usize = 4;
/// Longest chunk accepted for command parsing
pub const MAX_COMMAND_LEN: usize = 1024;

const CRLF: &[u8] = b"\r\n";

/// A single parsed SMTP command.
///
/// `Unknown` is a successful parse of an unrecognised verb, which is not
/// the same thing as a [`ParseError`]: the line was well-formed enough to
/// read a verb, the verb just isn't one of ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Unknown,
    Helo { domain: String },
    Ehlo { domain: String },
    Mail { reverse_path: String },
    Rcpt { forward_path: String },
    Data,
    Quit,
}

impl Command {
    /// The positive reply code sent when the command is accepted.
    /// `Unknown` has no reply; it closes the connection instead.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Command::Unknown => None,
            Command::Helo { .. } | Command::Ehlo { .. } => Some(250),
            Command::Mail { .. } | Command::Rcpt { .. } => Some(250),
            Command::Data => Some(354),
            Command::Quit => Some(221),
        }
    }

    /// The wire name of the verb, for logs and errors
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Unknown => "unknown",
            Command::Helo { .. } => "HELO",
            Command::Ehlo { .. } => "EHLO",
            Command::Mail { .. } => "MAIL",
            Command::Rcpt { .. } => "RCPT",
            Command::Data => "DATA",
            Command::Quit => "QUIT",
        }
    }
}

/// Ways a received line can fail to parse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("command line too short ({len} bytes, minimum {MIN_COMMAND_LEN})")]
    TooShort { len: usize },

    #[error("command line too long ({len} bytes, maximum {MAX_COMMAND_LEN})")]
    TooLong { len: usize },

    #[error("malformed {verb} command")]
    Syntax { verb: &'static str },
}

/// Parse one received chunk into a command.
pub fn parse(chunk: &[u8]) -> Result<Command, ParseError> {
    if chunk.len() < MIN_COMMAND_LEN {
        return Err(ParseError::TooShort { len: chunk.len() });
    }
    if chunk.len() > MAX_COMMAND_LEN {
        return Err(ParseError::TooLong { len: chunk.len() });
    }

    let mut verb = [0u8; 4];
    verb.copy_from_slice(&chunk[..4]);
    verb.make_ascii_uppercase();

    match &verb {
        b"HELO" => parse_greeting(chunk, "HELO").map(|domain| Command::Helo { domain }),
        b"EHLO" => parse_greeting(chunk, "EHLO").map(|domain| Command::Ehlo { domain }),
        b"MAIL" => {
            parse_path(chunk, b"MAIL", b"FROM", "MAIL").map(|reverse_path| Command::Mail { reverse_path })
        }
        b"RCPT" => {
            parse_path(chunk, b"RCPT", b"TO", "RCPT").map(|forward_path| Command::Rcpt { forward_path })
        }
        b"DATA" => parse_bare(chunk, "DATA").map(|_| Command::Data),
        b"QUIT" => parse_bare(chunk, "QUIT").map(|_| Command::Quit),
        _ => Ok(Command::Unknown),
    }
}

/// The first CRLF-terminated line of the chunk, without the CRLF
fn line_of(chunk: &[u8]) -> Option<&[u8]> {
    chunk
        .windows(CRLF.len())
        .position(|window| window == CRLF)
        .map(|at| &chunk[..at])
}

/// Advance past `literal` if it sits exactly at `at`
fn eat_literal(input: &[u8], at: usize, literal: &[u8]) -> Option<usize> {
    let end = at.checked_add(literal.len())?;
    if end <= input.len() && &input[at..end] == literal {
        Some(end)
    } else {
        None
    }
}

/// Advance past `literal` at `at`, ignoring ASCII case
fn eat_literal_ci(input: &[u8], at: usize, literal: &[u8]) -> Option<usize> {
    let end = at.checked_add(literal.len())?;
    if end <= input.len() && input[at..end].eq_ignore_ascii_case(literal) {
        Some(end)
    } else {
        None
    }
}

/// Scan forward from `at` for `delimiter`, returning its position
fn find_until(input: &[u8], at: usize, delimiter: u8) -> Option<usize> {
    input
        .get(at..)?
        .iter()
        .position(|&byte| byte == delimiter)
        .map(|offset| at + offset)
}

/// The payload strictly between `open` at the cursor and the first
/// following `close`
fn between(input: &[u8], at: usize, open: u8, close: u8) -> Option<&[u8]> {
    let start = eat_literal(input, at, &[open])?;
    let end = find_until(input, start, close)?;
    Some(&input[start..end])
}

/// HELO/EHLO: spaces after the verb, then the domain up to CRLF
fn parse_greeting(chunk: &[u8], verb: &'static str) -> Result<String, ParseError> {
    let line = line_of(chunk).ok_or(ParseError::Syntax { verb })?;
    let mut at = 4;
    while line.get(at) == Some(&b' ') {
        at += 1;
    }
    let domain = String::from_utf8_lossy(&line[at..]).trim().to_string();
    Ok(domain)
}

/// MAIL/RCPT: the verb, a space, `FROM`/`TO`, a colon, then the
/// angle-bracketed path. The path may be empty (`MAIL FROM:<>`).
fn parse_path(
    chunk: &[u8],
    verb: &'static [u8],
    keyword: &'static [u8],
    name: &'static str,
) -> Result<String, ParseError> {
    let line = line_of(chunk).ok_or(ParseError::Syntax { verb: name })?;
    let path = eat_literal_ci(line, 0, verb)
        .and_then(|at| eat_literal(line, at, b" "))
        .and_then(|at| eat_literal_ci(line, at, keyword))
        .and_then(|at| eat_literal(line, at, b":"))
        .and_then(|at| between(line, at, b'<', b'>'))
        .ok_or(ParseError::Syntax { verb: name })?;
    Ok(String::from_utf8_lossy(path).into_owned())
}

/// DATA/QUIT: nothing but optional spaces between the verb and CRLF
fn parse_bare(chunk: &[u8], verb: &'static str) -> Result<(), ParseError> {
    let line = line_of(chunk).ok_or(ParseError::Syntax { verb })?;
    let mut at = 4;
    while line.get(at) == Some(&b' ') {
        at += 1;
    }
    if at == line.len() {
        Ok(())
    } else {
        Err(ParseError::Syntax { verb })
    }
}
