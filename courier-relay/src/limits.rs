//! Rate limiting for courier-relay.
//!
//! Protects against connection flooding and send spam. Connections may
//! arrive through iroh relay servers, so clients cannot be identified by
//! IP address; we key by:
//! - **endpoint id** (32-byte public key) for connection attempts
//! - **identity** for send operations
//!
//! Both use the governor crate's keyed rate limiters backed by DashMap,
//! plus one direct limiter capping aggregate throughput.

use crate::config::LimitsConfig;
use courier_types::UserId;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits connection attempts per endpoint id.
    connection_limiter: Arc<KeyedLimiter<[u8; 32]>>,

    /// Limits send operations per identity.
    message_limiter: Arc<KeyedLimiter<UserId>>,

    /// Global rate limiter across all clients.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<[u8;32]>")
            .field("message_limiter", &"KeyedLimiter<UserId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Panics
    ///
    /// Panics if any configured quota is zero.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections_per_minute = NonZeroU32::new(config.connections_per_endpoint)
            .expect("connections_per_endpoint must be > 0");
        let connection_quota = Quota::per_minute(connections_per_minute);

        let messages_per_minute =
            NonZeroU32::new(config.messages_per_minute).expect("messages_per_minute must be > 0");
        let message_quota = Quota::per_minute(messages_per_minute);

        let global_rps = NonZeroU32::new(config.global_requests_per_second)
            .expect("global_requests_per_second must be > 0");
        let global_quota = Quota::per_second(global_rps);

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            message_limiter: Arc::new(RateLimiter::keyed(message_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a connection attempt from `endpoint_id` is allowed.
    pub fn check_connection(&self, endpoint_id: &[u8; 32]) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(endpoint_id)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if a send from `identity` is allowed.
    pub fn check_send(&self, identity: &UserId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(identity)
            .map_err(|_| RateLimitError::SendLimitExceeded)
    }

    /// Check the server-wide request rate.
    ///
    /// Caps aggregate throughput even when individual clients are within
    /// their own quotas.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Number of tracked identity keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict stale entries from the keyed limiter maps.
    ///
    /// Disconnected clients leave entries behind; `retain_recent()` drops
    /// entries whose cells have fully recharged. Call periodically from a
    /// background task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many connection attempts from this endpoint.
    ConnectionLimitExceeded,
    /// Too many sends from this identity.
    SendLimitExceeded,
    /// Global request rate exceeded across all clients.
    GlobalLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded => write!(f, "connection rate limit exceeded"),
            Self::SendLimitExceeded => write!(f, "send rate limit exceeded"),
            Self::GlobalLimitExceeded => write!(f, "global rate limit exceeded"),
        }
    }
}

impl std::error::Error for RateLimitError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LimitsConfig {
        LimitsConfig {
            connections_per_endpoint: 5,
            messages_per_minute: 10,
            global_requests_per_second: 1000,
            identify_timeout_secs: 10,
            max_concurrent_sessions: 10_000,
        }
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = RateLimits::new(&test_config());
        let endpoint_id = [1u8; 32];

        for _ in 0..5 {
            assert!(limits.check_connection(&endpoint_id).is_ok());
        }

        assert_eq!(
            limits.check_connection(&endpoint_id),
            Err(RateLimitError::ConnectionLimitExceeded)
        );
    }

    #[test]
    fn send_limit_is_per_identity() {
        let config = LimitsConfig {
            messages_per_minute: 2,
            ..test_config()
        };
        let limits = RateLimits::new(&config);

        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        assert!(limits.check_send(&alice).is_ok());
        assert!(limits.check_send(&alice).is_ok());
        assert!(limits.check_send(&alice).is_err());

        // Bob still has full quota.
        assert!(limits.check_send(&bob).is_ok());
        assert!(limits.check_send(&bob).is_ok());
        assert!(limits.check_send(&bob).is_err());
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let config = LimitsConfig {
            global_requests_per_second: 5,
            ..test_config()
        };
        let limits = RateLimits::new(&config);

        for _ in 0..5 {
            assert!(limits.check_global().is_ok());
        }

        assert_eq!(
            limits.check_global(),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn shrink_does_not_panic() {
        let limits = RateLimits::new(&test_config());

        let _ = limits.check_connection(&[1u8; 32]);
        let _ = limits.check_send(&UserId::new("alice"));
        assert!(limits.connection_keys_count() > 0);

        // Freshly used entries may or may not be evicted depending on
        // timing, so we only assert no panic.
        limits.shrink();
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::SendLimitExceeded.to_string(),
            "send rate limit exceeded"
        );
    }
}
