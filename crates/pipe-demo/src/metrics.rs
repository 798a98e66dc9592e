use opentelemetry::{KeyValue, global, metrics::Counter};

/// Byte counters for the demo jobs.
///
/// Backed by the global meter provider, which is a no-op until
/// `TelemetryGuard` installs an exporter.
#[derive(Clone)]
pub struct PipeMetrics {
    bytes_transferred: Counter<u64>,
    eof_total: Counter<u64>,
}

impl PipeMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let bytes_transferred = meter
            .u64_counter("pipe_bytes_transferred_total")
            .with_description("Bytes moved through the pipe, by direction")
            .with_unit("By")
            .build();
        let eof_total = meter
            .u64_counter("pipe_eof_total")
            .with_description("Streams drained to end-of-file")
            .build();
        Self {
            bytes_transferred,
            eof_total,
        }
    }

    pub fn noop() -> Self {
        Self::new("pipe-demo-test")
    }

    pub fn record_written(&self, bytes: u64) {
        self.bytes_transferred
            .add(bytes, &[KeyValue::new("direction", "write")]);
    }

    pub fn record_read(&self, bytes: u64) {
        self.bytes_transferred
            .add(bytes, &[KeyValue::new("direction", "read")]);
    }

    pub fn record_eof(&self) {
        self.eof_total.add(1, &[]);
    }
}
