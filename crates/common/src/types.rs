//! Common identifier types for session client components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stream identifiers arrive either as JSON strings or as JSON numbers
/// depending on the server build; both decode to the same textual id.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(u64),
}

/// Server-assigned identifier of a published or discovered stream.
///
/// Immutable once assigned. Unique within the registry of its origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "WireId", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Wrap a server-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<WireId> for StreamId {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(text) => Self(text),
            WireId::Number(number) => Self(number.to_string()),
        }
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the session server assigns to this client once connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-side key of a local stream.
///
/// Stable for the lifetime of the caller's stream object, before and after
/// the server assigns a [`StreamId`]. Used to reject publishing the same
/// stream twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalStreamKey(pub Uuid);

impl LocalStreamKey {
    /// Create a new random key
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalStreamKey {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_accepts_numbers_and_strings() {
        let from_number: StreamId = serde_json::from_str("427310").unwrap();
        let from_text: StreamId = serde_json::from_str("\"427310\"").unwrap();

        assert_eq!(from_number, from_text);
        assert_eq!(from_number.as_str(), "427310");
    }

    #[test]
    fn test_stream_id_serializes_as_string() {
        let id = StreamId::new("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_local_stream_keys_are_unique() {
        assert_ne!(LocalStreamKey::new(), LocalStreamKey::new());
    }
}
