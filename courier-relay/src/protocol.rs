//! Protocol handler for the /courier/1 ALPN.
//!
//! Implements iroh's ProtocolHandler trait to accept incoming connections.

use crate::server::Relay;
use crate::session::Session;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Protocol identifier for Courier.
pub const ALPN: &[u8] = b"/courier/1";

/// Maximum wire frame size (bounds both requests and batched deliveries).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol handler for accepting Courier connections.
#[derive(Clone, Debug)]
pub struct CourierProtocol {
    relay: Arc<Relay>,
}

impl CourierProtocol {
    /// Create a new protocol handler.
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

impl ProtocolHandler for CourierProtocol {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let relay = self.relay.clone();
        async move {
            // Rate limit check: prevent connection flooding from one endpoint
            let remote_id = connection.remote_id();
            if let Err(e) = relay.rate_limits().check_connection(remote_id.as_bytes()) {
                tracing::warn!("Connection rate limited for {}: {}", remote_id, e);
                relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                connection.close(1u32.into(), b"rate limited");
                return Ok(());
            }

            // Reject at session capacity
            let max_sessions = relay.config().limits.max_concurrent_sessions;
            if relay.online_count() >= max_sessions {
                tracing::warn!(
                    "Session limit reached ({}/{}), rejecting {}",
                    relay.online_count(),
                    max_sessions,
                    remote_id
                );
                connection.close(2u32.into(), b"too many sessions");
                return Ok(());
            }

            relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);

            let conn_id = relay.next_conn_id();
            let session = Session::new(relay, connection, conn_id);
            // Spawn session handler - don't block the accept loop
            tokio::spawn(async move {
                if let Err(e) = session.run().await {
                    tracing::warn!("Session error: {}", e);
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_is_versioned() {
        assert_eq!(ALPN, b"/courier/1");
    }

    #[test]
    fn max_message_size_is_1mb() {
        assert_eq!(MAX_MESSAGE_SIZE, 1024 * 1024);
    }
}
