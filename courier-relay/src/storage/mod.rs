//! Storage layer for courier-relay.
//!
//! Provides the message store with sequence-based ordering. Messages live
//! until the recipient deletes them or the owning account is removed; there
//! is no delivery-based or time-based expiry.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use courier_types::{MessageId, RelayedMessage, UserId};

/// A message held by the relay, with store-assigned ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Unique identifier, assigned at append.
    pub id: MessageId,
    /// Sender identity.
    pub from: UserId,
    /// Recipient identity.
    pub to: UserId,
    /// Opaque payload (possibly pre-encrypted by the client).
    pub payload: Vec<u8>,
    /// Opaque auxiliary value, passed through unmodified.
    pub nonce: String,
    /// Unix timestamp assigned at append; non-decreasing in insertion order.
    pub created_at: i64,
    /// Store-assigned insertion sequence; the canonical ordering key.
    pub seq: u64,
}

impl From<StoredMessage> for RelayedMessage {
    fn from(m: StoredMessage) -> Self {
        RelayedMessage {
            id: m.id,
            from: m.from,
            to: m.to,
            payload: m.payload,
            nonce: m.nonce,
            created_at: m.created_at,
        }
    }
}

/// Request to append a new message.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    /// Sender identity (the session's bound identity).
    pub from: UserId,
    /// Recipient identity.
    pub to: UserId,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Opaque auxiliary value.
    pub nonce: String,
}

/// Trait for message store backends.
///
/// Each operation is atomic with respect to the others; no transaction
/// spans this store and the presence registry. Callers must append before
/// looking up presence so a message can never be missed by both the live
/// path and the next `pending_for` snapshot.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message, assigning its id, sequence and creation time.
    ///
    /// Returns the full stored record.
    async fn append(&self, req: AppendMessage) -> Result<StoredMessage, StoreError>;

    /// Snapshot of all messages addressed to `identity`, ascending by
    /// sequence. Does not remove anything; removal is explicit.
    async fn pending_for(&self, identity: &UserId) -> Result<Vec<StoredMessage>, StoreError>;

    /// Delete each id in `ids` whose message is addressed to `identity`.
    ///
    /// Ids addressed to others, or unknown, are silently skipped. Returns
    /// how many messages were actually deleted.
    async fn delete_many(&self, identity: &UserId, ids: &[MessageId])
        -> Result<u64, StoreError>;

    /// Delete every message where `identity` is sender or recipient
    /// (account-deletion cascade). Returns the number deleted.
    async fn delete_all_for(&self, identity: &UserId) -> Result<u64, StoreError>;

    /// Total number of messages currently stored (metrics).
    async fn total_messages(&self) -> Result<u64, StoreError>;
}
