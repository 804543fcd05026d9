//! Identifiers and validated values shared across the relay.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted room code, in characters.
pub const MAX_ROOM_CODE_CHARS: usize = 10;
/// Display names are truncated to this many characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 24;
/// Name used when a join request carries no usable name.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Why a candidate room code was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRoomCode {
    /// Nothing left after trimming.
    #[error("room code is empty")]
    Empty,
    /// More than ten characters after trimming.
    #[error("room code has {0} characters (max 10)")]
    TooLong(usize),
    /// Contains a character that is not a letter or digit.
    #[error("room code contains {0:?}, only letters and digits are allowed")]
    NotAlphanumeric(char),
}

/// A validated room code: 1–10 alphanumeric characters, case preserved.
///
/// `"abc"` and `"ABC"` are different rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Trim surrounding whitespace and validate.
    pub fn parse(raw: &str) -> Result<Self, InvalidRoomCode> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(InvalidRoomCode::Empty);
        }
        if let Some(bad) = code.chars().find(|c| !c.is_alphanumeric()) {
            return Err(InvalidRoomCode::NotAlphanumeric(bad));
        }
        let len = code.chars().count();
        if len > MAX_ROOM_CODE_CHARS {
            return Err(InvalidRoomCode::TooLong(len));
        }
        Ok(Self(code.to_owned()))
    }

    /// The code as sent by the client (after trimming).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label shown next to a member's messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim, keep at most 24 characters, fall back to `Anonymous`.
    ///
    /// Never fails.
    pub fn normalize(raw: &str) -> Self {
        let name: String = raw.trim().chars().take(MAX_DISPLAY_NAME_CHARS).collect();
        if name.is_empty() {
            Self(DEFAULT_DISPLAY_NAME.to_owned())
        } else {
            Self(name)
        }
    }

    /// Borrow the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of one accepted WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}
