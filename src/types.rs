//! Basic type definitions for the chat relay
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: UUID-based connection identity
//! - `Username`: validated, immutable participant name

use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum username length in bytes
pub const MAX_USERNAME_LEN: usize = 31;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe client identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated username
///
/// 1 to 31 bytes of ASCII letters, digits or underscore. Comparison is
/// case-sensitive. Can only be obtained through [`Username::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    /// Validate a candidate username
    pub fn parse(candidate: &str) -> Result<Self, ValidationError> {
        if candidate.is_empty() || candidate.len() > MAX_USERNAME_LEN {
            return Err(ValidationError::InvalidUsername);
        }
        if !candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(ValidationError::InvalidUsername);
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
