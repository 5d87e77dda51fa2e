//! Identity types for Courier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable logical user identity.
///
/// Opaque string chosen by the account layer; the relay never interprets it.
/// Independent of any live connection.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a UserId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identity is the empty string.
    ///
    /// The relay rejects empty identities at identify time.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// A unique identifier for a relayed message.
///
/// UUID v4, assigned by the relay at append time, never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    /// Create a new random MessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create a MessageId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this MessageId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_from_str_and_display() {
        let id = UserId::new("user_42");
        assert_eq!(id.as_str(), "user_42");
        assert_eq!(id.to_string(), "user_42");
    }

    #[test]
    fn user_id_equality_is_by_value() {
        assert_eq!(UserId::new("a"), UserId::from("a"));
        assert_ne!(UserId::new("a"), UserId::new("b"));
    }

    #[test]
    fn user_id_empty_detection() {
        assert!(UserId::new("").is_empty());
        assert!(!UserId::new("x").is_empty());
    }

    #[test]
    fn user_id_serde_is_transparent() {
        let id = UserId::new("user_42");
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let plain: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(plain, "user_42");
    }

    #[test]
    fn message_id_is_uuid_v4() {
        let id = MessageId::new();
        assert_eq!(id.as_bytes().len(), 16);
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn message_id_roundtrip() {
        let original = MessageId::new();
        let restored = MessageId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn message_id_from_invalid_length_fails() {
        assert!(MessageId::from_bytes(&[0u8; 8]).is_none());
        assert!(MessageId::from_bytes(&[0u8; 32]).is_none());
    }
}
