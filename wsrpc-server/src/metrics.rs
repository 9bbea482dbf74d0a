//! Server metrics definitions
//!
//! OpenTelemetry instruments recorded by the connection engine and the
//! dispatcher. They go through the global meter, so they are no-ops until a
//! meter provider is installed (see `wsrpc_core::init_observability`).
//!
//! # Metrics Collected
//!
//! - **wsrpc.server.connections.active**: live connections (gauge)
//! - **wsrpc.server.connections.total**: accepted connections (counter)
//! - **wsrpc.server.connections.rejected**: refused upgrades by reason (counter)
//! - **wsrpc.server.requests.total**: dispatched requests by method and outcome (counter)
//! - **wsrpc.server.request.duration**: dispatch latency in seconds (histogram)
//! - **wsrpc.server.decode.errors**: malformed inbound frames (counter)
//! - **wsrpc.server.messages.dropped**: outbound messages dropped on closing connections (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Server metrics instruments
pub struct ServerMetrics {
    /// Number of live connections
    pub connections_active: Gauge<i64>,
    /// Connections accepted since startup
    pub connections_total: Counter<u64>,
    /// Upgrades refused, by `reason`
    pub connections_rejected: Counter<u64>,
    /// Requests dispatched, by `method` and `status`
    pub requests_total: Counter<u64>,
    /// Dispatch duration in seconds
    pub request_duration: Histogram<f64>,
    /// Inbound frames that failed to decode
    pub decode_errors: Counter<u64>,
    /// Outbound messages dropped because the connection was closing
    pub messages_dropped: Counter<u64>,
}

impl ServerMetrics {
    /// Create instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create instruments on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connections_active: meter
                .i64_gauge("wsrpc.server.connections.active")
                .with_description("Number of live WebSocket connections")
                .build(),
            connections_total: meter
                .u64_counter("wsrpc.server.connections.total")
                .with_description("Total number of connections accepted")
                .build(),
            connections_rejected: meter
                .u64_counter("wsrpc.server.connections.rejected")
                .with_description("Upgrades refused by admission checks")
                .build(),
            requests_total: meter
                .u64_counter("wsrpc.server.requests.total")
                .with_description("Total number of requests dispatched")
                .build(),
            request_duration: meter
                .f64_histogram("wsrpc.server.request.duration")
                .with_description("Request dispatch duration in seconds")
                .build(),
            decode_errors: meter
                .u64_counter("wsrpc.server.decode.errors")
                .with_description("Inbound frames that could not be decoded")
                .build(),
            messages_dropped: meter
                .u64_counter("wsrpc.server.messages.dropped")
                .with_description("Outbound messages dropped on closing connections")
                .build(),
        }
    }

    /// Record an accepted connection
    pub fn record_connection(&self, active: i64) {
        self.connections_active.record(active, &[]);
        self.connections_total.add(1, &[]);
    }

    /// Record a closed connection
    pub fn record_disconnection(&self, active: i64) {
        self.connections_active.record(active, &[]);
    }

    /// Record a refused upgrade
    pub fn record_rejection(&self, reason: &'static str) {
        self.connections_rejected
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    /// Record a dispatched request
    pub fn record_request(&self, method: &str, status: &'static str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record a malformed inbound frame
    pub fn record_decode_error(&self) {
        self.decode_errors.add(1, &[]);
    }

    /// Record an outbound message dropped on a closing connection
    pub fn record_dropped(&self) {
        self.messages_dropped.add(1, &[]);
    }
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_provider() {
        let metrics = ServerMetrics::new("test-server");

        metrics.record_connection(1);
        metrics.record_rejection("max_connections");
        metrics.record_request("echo", "ok", 0.002);
        metrics.record_request("missing", "not_found", 0.0);
        metrics.record_decode_error();
        metrics.record_dropped();
        metrics.record_disconnection(0);
    }
}
