//! Message protocol definitions
//!
//! Text-based, newline-delimited protocol. Every frame has the shape
//! `TYPE[:field[:field...]]`; line splitting itself is left to
//! `LinesCodec`, so frames here never carry the trailing newline.
//!
//! | Frame                       | Direction        |
//! |-----------------------------|------------------|
//! | `AUTH:<username>`           | client → server  |
//! | `AUTH_OK`                   | server → client  |
//! | `AUTH_FAILED:<reason>`      | server → client  |
//! | `MSG:<sender>:<content>`    | both             |
//! | `NOTIFY:<text>`             | server → client  |
//! | `ERROR:<text>`              | server → client  |
//! | `DISCONNECT:<username>`     | client → server  |
//! | `DISCONNECT_ACK`            | server → client  |

use std::fmt;

use crate::error::{ParseError, RegisterError, ValidationError};
use crate::types::Username;

/// Maximum chat content length in bytes
pub const MAX_CONTENT_LEN: usize = 255;

/// Maximum length of a single protocol line in bytes
pub const MAX_LINE_LEN: usize = 1024;

const DELIMITER: char = ':';

/// One protocol frame, in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Authentication request with the candidate (unvalidated) username
    Auth { username: String },
    /// Authentication accepted
    AuthOk,
    /// Authentication rejected
    AuthFailed { reason: String },
    /// Chat message; `content` may itself contain `:`
    Msg { sender: String, content: String },
    /// System notification (joins, leaves)
    Notify { text: String },
    /// Error report
    Error { text: String },
    /// Client leaving
    Disconnect { username: String },
    /// Server acknowledgment of a disconnect
    DisconnectAck,
}

impl Frame {
    /// Decode a single line
    ///
    /// A trailing `\n` or `\r\n` is tolerated. For `MSG`, everything after
    /// the second delimiter is taken as opaque content.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (kind, rest) = match line.split_once(DELIMITER) {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (line, None),
        };

        let frame = match kind {
            "AUTH" => Frame::Auth {
                username: rest.ok_or(ParseError::MissingField("username"))?.to_string(),
            },
            "AUTH_OK" => Frame::AuthOk,
            "AUTH_FAILED" => Frame::AuthFailed {
                reason: rest.ok_or(ParseError::MissingField("reason"))?.to_string(),
            },
            "MSG" => {
                let rest = rest.ok_or(ParseError::MissingField("sender"))?;
                let (sender, content) = rest
                    .split_once(DELIMITER)
                    .ok_or(ParseError::MissingField("content"))?;
                Frame::Msg {
                    sender: sender.to_string(),
                    content: content.to_string(),
                }
            }
            "NOTIFY" => Frame::Notify {
                text: rest.ok_or(ParseError::MissingField("text"))?.to_string(),
            },
            "ERROR" => Frame::Error {
                text: rest.ok_or(ParseError::MissingField("text"))?.to_string(),
            },
            // The username is informational; a bare DISCONNECT is accepted too
            "DISCONNECT" => Frame::Disconnect {
                username: rest.unwrap_or_default().to_string(),
            },
            "DISCONNECT_ACK" => Frame::DisconnectAck,
            other => return Err(ParseError::UnknownType(other.to_string())),
        };

        Ok(frame)
    }

    /// Outbound form of a chat message
    pub fn chat(message: &Message) -> Self {
        Frame::Msg {
            sender: message.sender().to_string(),
            content: message.content().to_string(),
        }
    }

    pub fn notify(text: impl Into<String>) -> Self {
        Frame::Notify { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Frame::Error { text: text.into() }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Auth { username } => write!(f, "AUTH:{}", username),
            Frame::AuthOk => f.write_str("AUTH_OK"),
            Frame::AuthFailed { reason } => write!(f, "AUTH_FAILED:{}", reason),
            Frame::Msg { sender, content } => write!(f, "MSG:{}:{}", sender, content),
            Frame::Notify { text } => write!(f, "NOTIFY:{}", text),
            Frame::Error { text } => write!(f, "ERROR:{}", text),
            Frame::Disconnect { username } => write!(f, "DISCONNECT:{}", username),
            Frame::DisconnectAck => f.write_str("DISCONNECT_ACK"),
        }
    }
}

/// Convert a registration rejection into the response frame sent to the client
impl From<RegisterError> for Frame {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::AlreadyExists | RegisterError::InvalidUsername => Frame::AuthFailed {
                reason: err.to_string(),
            },
            RegisterError::Full => Frame::error(err.to_string()),
        }
    }
}

/// A validated chat record
///
/// Immutable once constructed: the sender is always an authenticated
/// username and the content is 1..=255 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Username,
    content: String,
}

impl Message {
    pub fn new(sender: Username, content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self { sender, content })
    }

    pub fn sender(&self) -> &Username {
        &self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Check chat content bounds
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::ContentTooLong {
            len: content.len(),
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(())
}
