//! Client metrics definitions
//!
//! OpenTelemetry instruments recorded by [`WsrpcClient`](crate::WsrpcClient).
//! They are created on the global meter and do nothing until a meter provider
//! is installed, e.g. by `ClientBuilder::with_observability()`.
//!
//! # Metrics Collected
//!
//! - **wsrpc.client.connected**: 1 while the socket is open, 0 after (gauge)
//! - **wsrpc.client.calls.total**: calls by method and status (counter)
//! - **wsrpc.client.call.duration**: call latency in seconds (histogram)
//! - **wsrpc.client.calls.timeout**: calls that hit their deadline (counter)
//! - **wsrpc.client.pushes.received**: server pushes by method (counter)
//! - **wsrpc.client.responses.unmatched**: responses with no pending call (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics instruments
pub struct ClientMetrics {
    /// 1 while connected, 0 once closed
    pub connected: Gauge<i64>,
    /// Calls completed, by `method` and `status`
    pub calls_total: Counter<u64>,
    /// Call duration in seconds
    pub call_duration: Histogram<f64>,
    /// Calls that timed out, by `method`
    pub calls_timeout: Counter<u64>,
    /// Pushes received, by `method`
    pub pushes_received: Counter<u64>,
    /// Responses that matched no pending call
    pub responses_unmatched: Counter<u64>,
}

impl ClientMetrics {
    /// Create instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create instruments on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connected: meter
                .i64_gauge("wsrpc.client.connected")
                .with_description("1 while the client socket is open")
                .build(),
            calls_total: meter
                .u64_counter("wsrpc.client.calls.total")
                .with_description("Total number of calls completed")
                .build(),
            call_duration: meter
                .f64_histogram("wsrpc.client.call.duration")
                .with_description("Call duration in seconds")
                .build(),
            calls_timeout: meter
                .u64_counter("wsrpc.client.calls.timeout")
                .with_description("Calls abandoned at their deadline")
                .build(),
            pushes_received: meter
                .u64_counter("wsrpc.client.pushes.received")
                .with_description("Server pushes received")
                .build(),
            responses_unmatched: meter
                .u64_counter("wsrpc.client.responses.unmatched")
                .with_description("Responses with no pending call")
                .build(),
        }
    }

    /// Record the socket opening or closing
    pub fn record_connected(&self, connected: bool) {
        self.connected.record(i64::from(connected), &[]);
    }

    /// Record a completed call
    pub fn record_call(&self, method: &str, status: &'static str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
    }

    /// Record a call that hit its deadline
    pub fn record_timeout(&self, method: &str) {
        self.calls_timeout
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    /// Record a server push
    pub fn record_push(&self, method: &str) {
        self.pushes_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    /// Record a response nobody was waiting for
    pub fn record_unmatched(&self) {
        self.responses_unmatched.add(1, &[]);
    }
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}
