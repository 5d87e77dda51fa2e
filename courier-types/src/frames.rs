//! Protocol frames for Courier.
//!
//! Every client→server request travels as one length-prefixed frame on a
//! bidirectional stream and is answered by exactly one response frame.
//! Server→client deliveries ([`NewMessage`], [`NewMessages`]) travel on
//! server-opened unidirectional streams with the same framing.

use serde::{Deserialize, Serialize};

use crate::{MessageId, UserId, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// All possible protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Bind an identity to this connection
    Identify(Identify),
    /// Server response to Identify
    IdentifyAck(IdentifyAck),
    /// Send a message to another identity
    Send(Send),
    /// Acknowledge a send
    SendAck(SendAck),
    /// Live delivery of a single message
    NewMessage(NewMessage),
    /// Batched delivery of pending messages after identify
    NewMessages(NewMessages),
    /// Explicit rejection of a request
    Error(ErrorReply),
    /// Graceful disconnect
    Bye(Bye),
}

impl Frame {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Frame type name, for logs and error replies.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify(_) => "Identify",
            Self::IdentifyAck(_) => "IdentifyAck",
            Self::Send(_) => "Send",
            Self::SendAck(_) => "SendAck",
            Self::NewMessage(_) => "NewMessage",
            Self::NewMessages(_) => "NewMessages",
            Self::Error(_) => "Error",
            Self::Bye(_) => "Bye",
        }
    }
}

/// Bind an identity to the current connection.
///
/// A later Identify for the same identity (on any connection) supersedes
/// earlier ones; a later Identify on the same connection rebinds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Protocol version (currently 1)
    pub version: u8,
    /// The identity to bind
    pub identity: UserId,
}

/// Server response to a successful Identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyAck {
    /// Protocol version supported by the server
    pub version: u8,
    /// Number of pending messages about to be flushed
    pub pending: u32,
}

/// Send a message to another identity.
///
/// The payload and nonce are opaque to the relay; the payload is typically
/// pre-encrypted by the client and the nonce carried through for decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Send {
    /// Recipient identity
    pub to: UserId,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Opaque auxiliary value, passed through unmodified
    pub nonce: String,
}

/// Acknowledgement that a send was stored.
///
/// Stored, not necessarily delivered: live delivery is best-effort and the
/// message remains queued for the recipient's next identify either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Relay-assigned message id
    pub id: MessageId,
    /// Relay-assigned creation timestamp (unix seconds)
    pub created_at: i64,
}

/// A message as delivered to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Relay-assigned message id
    pub id: MessageId,
    /// Sender identity
    pub from: UserId,
    /// Recipient identity
    pub to: UserId,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Opaque auxiliary value
    pub nonce: String,
    /// Relay-assigned creation timestamp (unix seconds)
    pub created_at: i64,
}

/// Live delivery of a single message to a connected recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The delivered message
    pub message: RelayedMessage,
}

/// Batched delivery of pending messages, sent once after identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessages {
    /// Pending messages in ascending creation order
    pub messages: Vec<RelayedMessage>,
}

/// Machine-readable rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Request requires an identified session
    NotIdentified,
    /// Protocol version not supported
    VersionMismatch,
    /// Request type not valid in the current session state
    Unexpected,
    /// Rate limit exceeded
    RateLimited,
    /// Payload exceeds the configured maximum
    PayloadTooLarge,
    /// Identity rejected (empty or invalid)
    InvalidIdentity,
    /// Internal server failure; safe to retry
    Internal,
}

/// Explicit rejection of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Rejection code
    pub code: ErrorCode,
    /// Human-readable detail
    pub detail: String,
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    /// Optional reason for disconnect
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> RelayedMessage {
        RelayedMessage {
            id: MessageId::new(),
            from: UserId::new("alice"),
            to: UserId::new("bob"),
            payload: b"ciphertext".to_vec(),
            nonce: "n1".to_string(),
            created_at: 1_705_000_000,
        }
    }

    #[test]
    fn identify_roundtrip() {
        let frame = Frame::Identify(Identify {
            version: PROTOCOL_VERSION,
            identity: UserId::new("user_42"),
        });

        let bytes = frame.to_bytes().unwrap();
        let restored = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn send_preserves_opaque_fields() {
        let send = Send {
            to: UserId::new("bob"),
            payload: vec![0u8, 255, 3, 7],
            nonce: "aGVsbG8".to_string(),
        };

        let bytes = rmp_serde::to_vec(&send).unwrap();
        let restored: Send = rmp_serde::from_slice(&bytes).unwrap();

        assert_eq!(restored.payload, send.payload);
        assert_eq!(restored.nonce, send.nonce);
    }

    #[test]
    fn new_messages_batch_keeps_order() {
        let m1 = sample_message();
        let m2 = sample_message();
        let frame = Frame::NewMessages(NewMessages {
            messages: vec![m1.clone(), m2.clone()],
        });

        let bytes = frame.to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::NewMessages(batch) => {
                assert_eq!(batch.messages, vec![m1, m2]);
            }
            other => panic!("expected NewMessages, got {other:?}"),
        }
    }

    #[test]
    fn error_reply_codes_roundtrip() {
        let frame = Frame::Error(ErrorReply {
            code: ErrorCode::NotIdentified,
            detail: "identify first".to_string(),
        });

        let bytes = frame.to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Error(reply) => assert_eq!(reply.code, ErrorCode::NotIdentified),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn bye_without_reason() {
        let frame = Frame::Bye(Bye { reason: None });
        let bytes = frame.to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Bye(bye) => assert!(bye.reason.is_none()),
            other => panic!("expected Bye, got {other:?}"),
        }
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(Frame::from_bytes(&[0xC1, 0xFF, 0x00]).is_err());
    }
}
