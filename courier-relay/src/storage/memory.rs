//! In-memory message store.
//!
//! The reference backend: no durability, full-store scans for recipient
//! and cascade queries. Fine at small scale; the SQLite backend indexes
//! by recipient and sender for anything larger.

use super::{AppendMessage, MessageStore, StoredMessage};
use crate::error::StoreError;
use async_trait::async_trait;
use courier_types::{MessageId, UserId};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    /// Messages keyed by sequence; BTreeMap iteration gives insertion order.
    messages: BTreeMap<u64, StoredMessage>,
    /// Id → sequence index for deletion by id.
    by_id: HashMap<MessageId, u64>,
    /// Next sequence to assign.
    next_seq: u64,
    /// Last assigned timestamp, to keep created_at non-decreasing even if
    /// the wall clock steps backwards.
    last_created_at: i64,
}

/// In-memory implementation of [`MessageStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, req: AppendMessage) -> Result<StoredMessage, StoreError> {
        let mut inner = self.inner.write().await;

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let created_at = Self::current_timestamp().max(inner.last_created_at);
        inner.last_created_at = created_at;

        let message = StoredMessage {
            id: MessageId::new(),
            from: req.from,
            to: req.to,
            payload: req.payload,
            nonce: req.nonce,
            created_at,
            seq,
        };

        inner.by_id.insert(message.id, seq);
        inner.messages.insert(seq, message.clone());

        Ok(message)
    }

    async fn pending_for(&self, identity: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| &m.to == identity)
            .cloned()
            .collect())
    }

    async fn delete_many(
        &self,
        identity: &UserId,
        ids: &[MessageId],
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut deleted = 0;

        for id in ids {
            let Some(&seq) = inner.by_id.get(id) else {
                continue;
            };
            // Ownership check: a recipient may only delete its own inbound
            // messages. Foreign ids are skipped, not an error.
            let owned = inner
                .messages
                .get(&seq)
                .is_some_and(|m| &m.to == identity);
            if owned {
                inner.messages.remove(&seq);
                inner.by_id.remove(id);
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn delete_all_for(&self, identity: &UserId) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;

        let doomed: Vec<(u64, MessageId)> = inner
            .messages
            .values()
            .filter(|m| &m.from == identity || &m.to == identity)
            .map(|m| (m.seq, m.id))
            .collect();

        for (seq, id) in &doomed {
            inner.messages.remove(seq);
            inner.by_id.remove(id);
        }

        Ok(doomed.len() as u64)
    }

    async fn total_messages(&self) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.messages.len() as u64)
    }
}
