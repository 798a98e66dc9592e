use crate::config::TrafficConfig;
use crate::metrics::PipeMetrics;
use anyhow::{Context, Result, bail};
use spsc::{WriteOptions, Writer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub bytes_written: u64,
    pub writes: u64,
}

/// Stream `traffic.total_bytes` bytes into `writer`, then close it.
///
/// Byte `i` of the stream is `i & 0xff`. Writes are blocking, so each must
/// report the full chunk. Stops early (still closing the writer) when
/// `shutdown` is raised between writes.
pub fn run_producer(
    writer: &mut Writer,
    traffic: &TrafficConfig,
    shutdown: &AtomicBool,
    metrics: &PipeMetrics,
) -> Result<ProducerStats> {
    let _s = common::span!("producer");
    let stats = match stream(writer, traffic, shutdown, metrics) {
        Ok(stats) => stats,
        Err(e) => {
            // The reader must still see the stream end.
            if let Err(close_err) = writer.close() {
                tracing::warn!(error = %close_err, "Failed to close writer after error");
            }
            return Err(e);
        }
    };

    writer.close().context("Failed to close writer")?;
    tracing::info!(
        bytes = stats.bytes_written,
        writes = stats.writes,
        "producer finished and closed the pipe"
    );
    Ok(stats)
}

fn stream(
    writer: &mut Writer,
    traffic: &TrafficConfig,
    shutdown: &AtomicBool,
    metrics: &PipeMetrics,
) -> Result<ProducerStats> {
    let mut rng = traffic.rng();
    let mut stats = ProducerStats::default();
    let mut chunk = Vec::with_capacity(traffic.max_chunk);

    while stats.bytes_written < traffic.total_bytes {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!(written = stats.bytes_written, "producer interrupted");
            break;
        }

        let left = traffic.total_bytes - stats.bytes_written;
        let max = (traffic.max_chunk as u64).min(left) as usize;
        let cnt = rng.usize(1..=max);

        chunk.clear();
        chunk.extend((0..cnt as u64).map(|j| (stats.bytes_written + j) as u8));

        let written = writer
            .write(&chunk, WriteOptions::default())
            .context("Failed to write to pipe")?;
        if written != cnt {
            bail!("short blocking write: asked for {}, wrote {}", cnt, written);
        }

        stats.bytes_written += cnt as u64;
        stats.writes += 1;
        metrics.record_written(cnt as u64);

        if traffic.jitter && rng.f32() < 0.1 {
            std::thread::sleep(Duration::from_micros(rng.u64(0..10_000)));
        }
    }
    Ok(stats)
}
