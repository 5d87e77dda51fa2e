//! Main relay server coordination.
//!
//! `Relay` owns the message store, the presence registry, and the rate
//! limiters, and implements the relay-side halves of the protocol
//! operations: storing and forwarding sends, flushing queued messages on
//! identify, deletions, and the account-removal cascade.

use crate::account::AccountService;
use crate::config::Config;
use crate::error::{ProtocolError, StoreError};
use crate::limits::RateLimits;
use crate::presence::{ConnId, PresenceRegistry};
use crate::storage::{AppendMessage, MessageStore, StoredMessage};
use async_trait::async_trait;
use courier_types::{Frame, NewMessage, NewMessages, UserId};
use iroh::endpoint::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Server→client delivery seam.
///
/// The relay pushes frames through this instead of holding raw QUIC
/// connections, so delivery semantics stay testable without a transport.
#[async_trait]
pub trait PushTarget: Send + Sync {
    /// Deliver one encoded frame to the client.
    async fn push(&self, frame_bytes: &[u8]) -> Result<(), String>;

    /// Close the underlying connection.
    fn close(&self, reason: &[u8]);
}

/// QUIC-backed push target.
///
/// Each frame goes out on a fresh server-opened unidirectional stream with
/// length-prefixed framing. Clients that don't yet have a push listener
/// will have these streams buffered by the QUIC stack (harmless for small
/// frames).
pub struct QuicPush {
    connection: Connection,
}

impl QuicPush {
    /// Wrap a connection for server→client delivery.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PushTarget for QuicPush {
    async fn push(&self, frame_bytes: &[u8]) -> Result<(), String> {
        let mut send = self
            .connection
            .open_uni()
            .await
            .map_err(|e| format!("open_uni failed: {e}"))?;

        // Length-prefixed framing (4 bytes, big-endian)
        let len = (frame_bytes.len() as u32).to_be_bytes();
        send.write_all(&len)
            .await
            .map_err(|e| format!("write length failed: {e}"))?;

        send.write_all(frame_bytes)
            .await
            .map_err(|e| format!("write payload failed: {e}"))?;

        send.finish().map_err(|e| format!("finish failed: {e}"))?;

        Ok(())
    }

    fn close(&self, reason: &[u8]) {
        self.connection.close(1u32.into(), reason);
    }
}

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64` — no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted (before identification).
    pub connections_total: AtomicU64,
    /// Total successful IDENTIFY handshakes.
    pub identifies_total: AtomicU64,
    /// Total SEND requests handled successfully.
    pub sends_total: AtomicU64,
    /// Total messages pushed to live recipients (single or batched).
    pub deliveries_total: AtomicU64,
    /// Total payload bytes received in SEND requests.
    pub bytes_received: AtomicU64,
    /// Total payload bytes pushed to live recipients.
    pub bytes_sent: AtomicU64,
    /// Total messages removed by recipient deletion requests.
    pub messages_deleted: AtomicU64,
    /// Total rate limit rejections (connection + send + global).
    pub rate_limit_hits: AtomicU64,
    /// Total malformed frames dropped without a reply.
    pub malformed_frames: AtomicU64,
    /// Total protocol errors reported back to clients.
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct Relay {
    config: Config,
    store: Arc<dyn MessageStore>,
    accounts: Arc<dyn AccountService>,
    /// Rate limiters for connections and sends.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
    /// Identity → live push target, for server-initiated delivery.
    presence: PresenceRegistry<Arc<dyn PushTarget>>,
    /// Source of per-connection ids.
    next_conn: AtomicU64,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("presence_count", &self.presence.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a new relay with the given config, store, and account layer.
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        accounts: Arc<dyn AccountService>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            store,
            accounts,
            rate_limits,
            metrics: RelayMetrics::default(),
            presence: PresenceRegistry::new(),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Get access to the account layer.
    pub fn accounts(&self) -> &Arc<dyn AccountService> {
        &self.accounts
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Allocate a fresh connection id.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of identified sessions.
    pub fn online_count(&self) -> usize {
        self.presence.len()
    }

    /// Whether `identity` currently has a live session.
    pub fn is_online(&self, identity: &UserId) -> bool {
        self.presence.lookup(identity).is_some()
    }

    /// Bind `identity` to `handle`, superseding any prior session.
    pub fn register_session(
        &self,
        identity: UserId,
        conn_id: ConnId,
        handle: Arc<dyn PushTarget>,
    ) {
        self.presence.register(identity, conn_id, handle);
    }

    /// Remove the binding for `identity` if it still belongs to `conn_id`.
    ///
    /// A disconnect that races a re-identify on a newer connection leaves
    /// the newer binding untouched.
    pub fn unregister_session(&self, identity: &UserId, conn_id: ConnId) -> bool {
        self.presence.unregister(identity, conn_id)
    }

    /// Complete the identify handshake: bind presence and flush the queue.
    ///
    /// A binding must not outlive a failed handshake: if the flush cannot
    /// reach the client, the fresh binding is released before the error
    /// propagates, so a dead connection never lingers as online. The
    /// unregister is conn-id guarded, so a concurrent identify that has
    /// already superseded the binding is left alone. Returns the number of
    /// messages flushed.
    pub async fn bind_session(
        &self,
        identity: &UserId,
        conn_id: ConnId,
        handle: Arc<dyn PushTarget>,
    ) -> Result<u64, ProtocolError> {
        self.presence
            .register(identity.clone(), conn_id, handle.clone());

        match self.flush_pending(identity, handle.as_ref()).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.presence.unregister(identity, conn_id);
                Err(e)
            }
        }
    }

    /// Store a message and, if the recipient is online, push it to them.
    ///
    /// The append always happens first: a recipient crash mid-delivery
    /// must never lose the message. Push delivery is fire-and-forget; the
    /// queued copy stays until the recipient explicitly deletes it.
    pub async fn relay_send(
        &self,
        from: UserId,
        send: courier_types::Send,
    ) -> Result<StoredMessage, ProtocolError> {
        let payload_len = send.payload.len() as u64;

        let stored = self
            .store
            .append(AppendMessage {
                from,
                to: send.to,
                payload: send.payload,
                nonce: send.nonce,
            })
            .await
            .map_err(|e: StoreError| ProtocolError::Internal(e.to_string()))?;

        self.metrics.sends_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_received
            .fetch_add(payload_len, Ordering::Relaxed);

        tracing::debug!(
            "Stored message {} from {} to {} ({} bytes)",
            stored.id,
            stored.from,
            stored.to,
            payload_len
        );

        self.push_new_message(&stored);

        Ok(stored)
    }

    /// Push a freshly stored message to its recipient, if online.
    fn push_new_message(&self, stored: &StoredMessage) {
        let Some(binding) = self.presence.lookup(&stored.to) else {
            return;
        };

        let frame = Frame::NewMessage(NewMessage {
            message: stored.clone().into(),
        });
        let bytes = match frame.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Failed to serialize push frame: {}", e);
                return;
            }
        };

        let payload_len = stored.payload.len() as u64;
        self.metrics
            .deliveries_total
            .fetch_add(1, Ordering::Relaxed);
        self.metrics.bytes_sent.fetch_add(payload_len, Ordering::Relaxed);

        let recipient = stored.to.clone();
        let target = binding.handle;
        tokio::spawn(async move {
            if let Err(e) = target.push(&bytes).await {
                tracing::debug!("Failed to push to {}: {}", recipient, e);
            }
        });
    }

    /// Count of messages queued for `identity`.
    pub async fn pending_count(&self, identity: &UserId) -> Result<u64, ProtocolError> {
        let pending = self
            .store
            .pending_for(identity)
            .await
            .map_err(|e: StoreError| ProtocolError::Internal(e.to_string()))?;
        Ok(pending.len() as u64)
    }

    /// Push all queued messages for `identity` to `target` as one batch.
    /// No-op when the queue is empty.
    ///
    /// Delivery does not delete: the same batch is re-sent on the next
    /// identify until the recipient acknowledges via deletion.
    pub async fn flush_pending(
        &self,
        identity: &UserId,
        target: &dyn PushTarget,
    ) -> Result<u64, ProtocolError> {
        let pending = self
            .store
            .pending_for(identity)
            .await
            .map_err(|e: StoreError| ProtocolError::Internal(e.to_string()))?;

        if pending.is_empty() {
            return Ok(0);
        }

        let count = pending.len() as u64;
        let total_bytes: u64 = pending.iter().map(|m| m.payload.len() as u64).sum();

        let frame = Frame::NewMessages(NewMessages {
            messages: pending.into_iter().map(Into::into).collect(),
        });
        let bytes = frame
            .to_bytes()
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;

        target.push(&bytes).await.map_err(ProtocolError::Stream)?;

        self.metrics
            .deliveries_total
            .fetch_add(count, Ordering::Relaxed);
        self.metrics
            .bytes_sent
            .fetch_add(total_bytes, Ordering::Relaxed);

        tracing::debug!("Flushed {} queued messages to {}", count, identity);
        Ok(count)
    }

    /// Delete queued messages on behalf of their recipient.
    ///
    /// Ids that don't exist or belong to another recipient are skipped
    /// silently; the returned count covers only actual removals.
    pub async fn delete_messages(
        &self,
        identity: &UserId,
        ids: &[courier_types::MessageId],
    ) -> Result<u64, StoreError> {
        let deleted = self.store.delete_many(identity, ids).await?;
        self.metrics
            .messages_deleted
            .fetch_add(deleted, Ordering::Relaxed);
        tracing::debug!("Deleted {}/{} messages for {}", deleted, ids.len(), identity);
        Ok(deleted)
    }

    /// Cascade for account removal: drop every message sent by or queued
    /// for `identity`, and close its live session if one exists.
    pub async fn account_deleted(&self, identity: &UserId) -> Result<u64, StoreError> {
        let removed = self.store.delete_all_for(identity).await?;

        if let Some(binding) = self.presence.lookup(identity) {
            binding.handle.close(b"account deleted");
            self.presence.unregister(identity, binding.conn_id);
        }

        tracing::info!(
            "Account cascade for {}: removed {} messages",
            identity,
            removed
        );
        Ok(removed)
    }
}
