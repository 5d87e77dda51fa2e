//! Prometheus metrics endpoint.

use crate::server::Relay;
use crate::storage::MessageStore;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges — current state
    let online = relay.online_count();

    // Counters — monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let identifies = m.identifies_total.load(Ordering::Relaxed);
    let sends = m.sends_total.load(Ordering::Relaxed);
    let deliveries = m.deliveries_total.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_sent.load(Ordering::Relaxed);
    let deleted = m.messages_deleted.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let malformed = m.malformed_frames.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Store stats (async query — best effort)
    let queued = relay.store().total_messages().await.unwrap_or(0);

    let body = format!(
        r#"# HELP courier_relay_sessions_active Number of identified sessions
# TYPE courier_relay_sessions_active gauge
courier_relay_sessions_active {online}

# HELP courier_relay_info Server information
# TYPE courier_relay_info gauge
courier_relay_info{{version="{version}"}} 1

# HELP courier_relay_connections_total Total connections accepted
# TYPE courier_relay_connections_total counter
courier_relay_connections_total {conns_total}

# HELP courier_relay_identifies_total Total successful identify handshakes
# TYPE courier_relay_identifies_total counter
courier_relay_identifies_total {identifies}

# HELP courier_relay_sends_total Total SEND requests handled
# TYPE courier_relay_sends_total counter
courier_relay_sends_total {sends}

# HELP courier_relay_deliveries_total Total messages pushed to live recipients
# TYPE courier_relay_deliveries_total counter
courier_relay_deliveries_total {deliveries}

# HELP courier_relay_bytes_received_total Total payload bytes received (send payloads)
# TYPE courier_relay_bytes_received_total counter
courier_relay_bytes_received_total {bytes_rx}

# HELP courier_relay_bytes_sent_total Total payload bytes pushed to recipients
# TYPE courier_relay_bytes_sent_total counter
courier_relay_bytes_sent_total {bytes_tx}

# HELP courier_relay_messages_deleted_total Total messages removed by recipients
# TYPE courier_relay_messages_deleted_total counter
courier_relay_messages_deleted_total {deleted}

# HELP courier_relay_rate_limit_hits_total Total rate limit rejections
# TYPE courier_relay_rate_limit_hits_total counter
courier_relay_rate_limit_hits_total {rate_limits}

# HELP courier_relay_malformed_frames_total Total malformed frames dropped
# TYPE courier_relay_malformed_frames_total counter
courier_relay_malformed_frames_total {malformed}

# HELP courier_relay_errors_total Total protocol errors reported
# TYPE courier_relay_errors_total counter
courier_relay_errors_total {errors}

# HELP courier_relay_queued_messages Number of messages currently queued
# TYPE courier_relay_queued_messages gauge
courier_relay_queued_messages {queued}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
