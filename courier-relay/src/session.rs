//! Per-connection session management.
//!
//! Each accepted connection gets a `Session` that drives the identify /
//! send / disconnect state machine. Requests arrive on client-opened
//! bidirectional streams, one frame per stream; replies go back on the
//! same stream. Server-initiated pushes use unidirectional streams opened
//! by the relay (see `server`).

use crate::error::{ProtocolError, ProtocolResult, RelayError};
use crate::presence::ConnId;
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::server::{PushTarget, QuicPush, Relay};
use courier_types::{Bye, Frame, Identify, IdentifyAck, SendAck, UserId, PROTOCOL_VERSION};
use iroh::endpoint::Connection;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted identity, in bytes.
const MAX_IDENTITY_LEN: usize = 256;

/// Session state machine states.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Waiting for the IDENTIFY frame.
    AwaitingIdentify,
    /// Identity claimed and bound in the presence registry.
    Identified {
        /// The identity this session speaks for.
        identity: UserId,
    },
    /// Session is closing after BYE.
    Closing,
}

/// A per-connection session.
pub struct Session {
    relay: Arc<Relay>,
    connection: Connection,
    conn_id: ConnId,
    /// Delivery handle registered in presence on identify.
    push: Arc<dyn PushTarget>,
    state: SessionState,
}

impl Session {
    /// Create a new session for a connection.
    pub fn new(relay: Arc<Relay>, connection: Connection, conn_id: ConnId) -> Self {
        let push: Arc<dyn PushTarget> = Arc::new(QuicPush::new(connection.clone()));
        Self {
            relay,
            connection,
            conn_id,
            push,
            state: SessionState::AwaitingIdentify,
        }
    }

    /// Run the session until the connection closes.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let remote_id = self.connection.remote_id();
        tracing::info!("New connection from {} (conn {})", remote_id, self.conn_id);

        loop {
            // Unidentified connections must not hold resources forever.
            let stream = if matches!(self.state, SessionState::AwaitingIdentify) {
                let timeout_secs = self.relay.config().limits.identify_timeout_secs;
                match tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    self.connection.accept_bi(),
                )
                .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        tracing::debug!("Connection closed during IDENTIFY wait: {}", e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("IDENTIFY timeout ({}s) for {}", timeout_secs, remote_id);
                        break;
                    }
                }
            } else {
                match self.connection.accept_bi().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("Connection closed: {}", e);
                        break;
                    }
                }
            };

            let (send, recv) = stream;

            if let Err(e) = self.handle_stream(send, recv).await {
                tracing::warn!("Stream error (conn {}): {}", self.conn_id, e);
            }
            if matches!(self.state, SessionState::Closing) {
                break;
            }
        }

        // Cleanup. The conn_id guard means a session superseded by a newer
        // connection for the same identity leaves the new binding alone.
        if let SessionState::Identified { identity } = &self.state {
            self.relay.unregister_session(identity, self.conn_id);
        }

        Ok(())
    }

    /// Handle a single bidirectional stream: one request, one reply.
    async fn handle_stream(
        &mut self,
        mut send: iroh::endpoint::SendStream,
        mut recv: iroh::endpoint::RecvStream,
    ) -> ProtocolResult<()> {
        let frame = match self.read_frame(&mut recv).await {
            Ok(frame) => frame,
            Err(e @ ProtocolError::InvalidFrame { .. }) => {
                // Malformed input gets no reply: parse internals stay
                // server-side. Count it and move on.
                self.relay
                    .metrics()
                    .malformed_frames
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropped malformed frame (conn {}): {}", self.conn_id, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // The global limiter covers both workload frames. IDENTIFY counts
        // too: each one triggers a queue scan and a registry write, so an
        // established connection cannot spam re-identifies. BYE always
        // goes through.
        if counts_against_global(&frame) {
            if let Err(e) = self.relay.rate_limits().check_global() {
                self.relay
                    .metrics()
                    .rate_limit_hits
                    .fetch_add(1, Ordering::Relaxed);
                let err = ProtocolError::RateLimited {
                    reason: e.to_string(),
                };
                return self.reply_error(&mut send, err).await;
            }
        }

        // Per-identity send budget, once identified.
        if let SessionState::Identified { identity } = &self.state {
            if matches!(frame, Frame::Send(_)) {
                if let Err(e) = self.relay.rate_limits().check_send(identity) {
                    tracing::warn!("Send rate limited for {}: {}", identity, e);
                    self.relay
                        .metrics()
                        .rate_limit_hits
                        .fetch_add(1, Ordering::Relaxed);
                    let err = ProtocolError::RateLimited {
                        reason: e.to_string(),
                    };
                    return self.reply_error(&mut send, err).await;
                }
            }
        }

        let outcome = match (&self.state, frame) {
            // IDENTIFY is legal both initially and as a rebind of an
            // already-identified connection.
            (SessionState::AwaitingIdentify | SessionState::Identified { .. }, Frame::Identify(identify)) => {
                self.handle_identify(identify).await
            }
            (SessionState::Identified { .. }, Frame::Send(req)) => self.handle_send(req).await,
            (_, Frame::Bye(bye)) => {
                self.handle_bye(bye);
                self.state = SessionState::Closing;
                return Ok(());
            }
            (SessionState::AwaitingIdentify, _) => Err(ProtocolError::NotIdentified),
            (SessionState::Closing, _) => return Ok(()),
            (_, frame) => Err(ProtocolError::UnexpectedFrame {
                expected: self.expected_frame_types(),
                actual: frame.name().to_string(),
            }),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => return self.reply_error(&mut send, e).await,
        };

        self.write_frame(&mut send, &response).await?;
        send.finish()
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;

        Ok(())
    }

    /// Send an error reply for a reportable failure, or drop silently.
    async fn reply_error(
        &self,
        send: &mut iroh::endpoint::SendStream,
        error: ProtocolError,
    ) -> ProtocolResult<()> {
        if !error.is_reportable() {
            return Err(error);
        }

        self.relay
            .metrics()
            .errors_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Protocol error (conn {}): {}", self.conn_id, error);

        let reply = Frame::Error(error.to_reply());
        self.write_frame(send, &reply).await?;
        send.finish()
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;
        Ok(())
    }

    /// Read a length-prefixed frame from the stream.
    async fn read_frame(&self, recv: &mut iroh::endpoint::RecvStream) -> ProtocolResult<Frame> {
        // 4-byte length prefix, big-endian
        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::InvalidFrame {
                reason: format!("frame too large: {} > {}", len, MAX_MESSAGE_SIZE),
            });
        }

        let mut buf = vec![0u8; len];
        recv.read_exact(&mut buf)
            .await
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;

        Frame::from_bytes(&buf).map_err(|e| ProtocolError::InvalidFrame {
            reason: e.to_string(),
        })
    }

    /// Write a length-prefixed frame to the stream.
    async fn write_frame(
        &self,
        send: &mut iroh::endpoint::SendStream,
        frame: &Frame,
    ) -> ProtocolResult<()> {
        let bytes = frame.to_bytes().map_err(|e| ProtocolError::InvalidFrame {
            reason: e.to_string(),
        })?;

        let len = bytes.len() as u32;
        send.write_all(&len.to_be_bytes())
            .await
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;

        send.write_all(&bytes)
            .await
            .map_err(|e| ProtocolError::Stream(e.to_string()))?;

        Ok(())
    }

    /// Handle IDENTIFY.
    async fn handle_identify(&mut self, identify: Identify) -> ProtocolResult<Frame> {
        if identify.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                client: identify.version as u32,
                server: PROTOCOL_VERSION as u32,
            });
        }

        validate_identity(identify.identity.as_str())?;
        let identity = identify.identity;

        // A rebind of this connection to a different identity releases the
        // old binding first (guarded, in case it was already superseded).
        if let SessionState::Identified { identity: prior } = &self.state {
            if *prior != identity {
                self.relay.unregister_session(prior, self.conn_id);
            }
        }

        // Register + flush as one step; a flush failure releases the fresh
        // binding before the error propagates, so the close path never
        // leaves a dead connection looking online.
        let pending = self
            .relay
            .bind_session(&identity, self.conn_id, self.push.clone())
            .await?;

        self.state = SessionState::Identified {
            identity: identity.clone(),
        };
        self.relay
            .metrics()
            .identifies_total
            .fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            "Session identified: {} on conn {} ({} queued)",
            identity,
            self.conn_id,
            pending
        );

        Ok(Frame::IdentifyAck(IdentifyAck {
            version: PROTOCOL_VERSION,
            pending: clamp_pending(pending),
        }))
    }

    /// Handle SEND.
    async fn handle_send(&self, req: courier_types::Send) -> ProtocolResult<Frame> {
        let identity = self.identified()?;

        if req.payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::InvalidFrame {
                reason: format!(
                    "payload too large: {} > {}",
                    req.payload.len(),
                    MAX_MESSAGE_SIZE
                ),
            });
        }

        let max_payload = self.relay.config().storage.max_payload_size;
        if req.payload.len() > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: req.payload.len(),
                limit: max_payload,
            });
        }

        // Recipient validation is intentionally permissive: messages may
        // target identities that have never connected.
        let stored = self.relay.relay_send(identity, req).await?;

        Ok(Frame::SendAck(SendAck {
            id: stored.id,
            created_at: stored.created_at,
        }))
    }

    /// Handle BYE.
    fn handle_bye(&self, bye: Bye) {
        tracing::info!(
            "Client disconnecting (conn {}): {}",
            self.conn_id,
            bye.reason.as_deref().unwrap_or("no reason")
        );
    }

    /// Get the session identity or fail.
    fn identified(&self) -> ProtocolResult<UserId> {
        match &self.state {
            SessionState::Identified { identity } => Ok(identity.clone()),
            _ => Err(ProtocolError::NotIdentified),
        }
    }

    /// Frame types legal in the current state.
    fn expected_frame_types(&self) -> String {
        match &self.state {
            SessionState::AwaitingIdentify => "Identify, Bye".to_string(),
            SessionState::Identified { .. } => "Identify, Send, Bye".to_string(),
            SessionState::Closing => "none".to_string(),
        }
    }
}

/// Whether a frame counts against the global request limiter.
fn counts_against_global(frame: &Frame) -> bool {
    matches!(frame, Frame::Send(_) | Frame::Identify(_))
}

/// Saturate a queue length into the ack's u32 field.
fn clamp_pending(count: u64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Validate a claimed identity.
///
/// Identity strings are opaque account ids: non-empty, bounded, no
/// control characters.
fn validate_identity(identity: &str) -> ProtocolResult<()> {
    if identity.is_empty() {
        return Err(ProtocolError::InvalidIdentity {
            reason: "identity is empty".to_string(),
        });
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(ProtocolError::InvalidIdentity {
            reason: format!("identity too long: {} > {}", identity.len(), MAX_IDENTITY_LEN),
        });
    }
    if identity.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidIdentity {
            reason: "identity contains control characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_transitions() {
        let state = SessionState::AwaitingIdentify;
        assert!(matches!(state, SessionState::AwaitingIdentify));

        let identified = SessionState::Identified {
            identity: UserId::new("alice"),
        };
        assert!(matches!(identified, SessionState::Identified { .. }));
    }

    #[test]
    fn identity_must_be_non_empty() {
        assert!(validate_identity("alice").is_ok());
        assert!(matches!(
            validate_identity(""),
            Err(ProtocolError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn identity_length_bounded() {
        let ok = "a".repeat(MAX_IDENTITY_LEN);
        assert!(validate_identity(&ok).is_ok());

        let too_long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert!(matches!(
            validate_identity(&too_long),
            Err(ProtocolError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn pending_count_saturates_at_u32_max() {
        assert_eq!(clamp_pending(0), 0);
        assert_eq!(clamp_pending(17), 17);
        assert_eq!(clamp_pending(u32::MAX as u64), u32::MAX);
        assert_eq!(clamp_pending(u32::MAX as u64 + 1), u32::MAX);
        assert_eq!(clamp_pending(u64::MAX), u32::MAX);
    }

    #[test]
    fn identify_and_send_count_against_global_limiter() {
        let identify = Frame::Identify(Identify {
            version: PROTOCOL_VERSION,
            identity: UserId::new("alice"),
        });
        let send = Frame::Send(courier_types::Send {
            to: UserId::new("bob"),
            payload: vec![1, 2, 3],
            nonce: "n".to_string(),
        });
        let bye = Frame::Bye(Bye { reason: None });

        assert!(counts_against_global(&identify));
        assert!(counts_against_global(&send));
        assert!(!counts_against_global(&bye));
    }

    #[test]
    fn identity_rejects_control_characters() {
        assert!(validate_identity("al\nice").is_err());
        assert!(validate_identity("al\0ice").is_err());
        // Unicode letters are fine.
        assert!(validate_identity("алиса").is_ok());
    }
}
