use crate::config::TrafficConfig;
use crate::metrics::PipeMetrics;
use anyhow::{Context, Result, bail};
use spsc::{ReadOptions, Reader, SpscError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How long a hook-driven consumer sleeps before rechecking shutdown.
const HOOK_WAIT: Duration = Duration::from_millis(100);

/// Logs throughput once per interval.
pub struct ThroughputReport {
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl ThroughputReport {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Account for `bytes`; returns the bytes/sec rate when a window closes.
    pub fn record(&mut self, bytes: u64) -> Option<f64> {
        self.window_bytes += bytes;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let rate = self.window_bytes as f64 / elapsed.as_secs_f64();
        tracing::info!("Throughput: {:.1} KiB/s", rate / 1024.0);
        self.window_start = Instant::now();
        self.window_bytes = 0;
        Some(rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Progress(usize),
    Eof,
    WouldBlock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub bytes_read: u64,
    pub reads: u64,
}

/// Reads random-sized chunks and checks they continue the `i & 0xff` stream.
pub struct Consumer {
    reader: Reader,
    rng: fastrand::Rng,
    max_read: usize,
    buf: Vec<u8>,
    stats: ConsumerStats,
    report: ThroughputReport,
    metrics: PipeMetrics,
}

impl Consumer {
    pub fn new(reader: Reader, traffic: &TrafficConfig, metrics: PipeMetrics) -> Self {
        Self {
            reader,
            rng: traffic.rng(),
            max_read: traffic.max_read,
            buf: vec![0; traffic.max_read],
            stats: ConsumerStats::default(),
            report: ThroughputReport::new(REPORT_INTERVAL),
            metrics,
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    /// Issue one read of 1..=max_read bytes.
    pub fn step(&mut self, nonblock: bool) -> Result<Step> {
        let want = self.rng.usize(1..=self.max_read);
        let options = ReadOptions {
            nonblock,
            into: Some(&mut self.buf[..want]),
        };
        let n = match self.reader.read(want, options) {
            Ok(result) => result.bytes_read,
            Err(SpscError::WouldBlock) => return Ok(Step::WouldBlock),
            Err(e) => return Err(e).context("Failed to read from pipe"),
        };
        if n > want {
            bail!("over-long read: asked for {}, got {}", want, n);
        }
        if n == 0 {
            self.metrics.record_eof();
            return Ok(Step::Eof);
        }

        for (j, &byte) in self.buf[..n].iter().enumerate() {
            let expected = (self.stats.bytes_read + j as u64) as u8;
            if byte != expected {
                bail!(
                    "sequence mismatch at offset {}: expected {}, got {}",
                    self.stats.bytes_read + j as u64,
                    expected,
                    byte
                );
            }
        }

        self.stats.bytes_read += n as u64;
        self.stats.reads += 1;
        self.metrics.record_read(n as u64);
        self.report.record(n as u64);
        Ok(Step::Progress(n))
    }

    /// Check the stream was complete (or interrupted), then close the reader.
    pub fn finish(mut self, expected_total: u64, interrupted: bool) -> Result<ConsumerStats> {
        if !interrupted && self.stats.bytes_read != expected_total {
            bail!(
                "stream length mismatch at EOF: read {} of {} bytes",
                self.stats.bytes_read,
                expected_total
            );
        }

        self.reader.close().context("Failed to close reader")?;
        tracing::info!(
            bytes = self.stats.bytes_read,
            reads = self.stats.reads,
            interrupted,
            "consumer finished and closed the pipe"
        );
        Ok(self.stats)
    }

    /// Close the reader so a blocked writer sees `BrokenPipe`, then hand back `err`.
    fn fail(mut self, err: anyhow::Error) -> Result<ConsumerStats> {
        if let Err(e) = self.reader.close() {
            tracing::warn!(error = %e, "Failed to close reader after error");
        }
        Err(err)
    }

    fn jitter(&mut self, enabled: bool) {
        if enabled && self.rng.f32() < 0.1 {
            std::thread::sleep(Duration::from_micros(self.rng.u64(0..10_000)));
        }
    }
}

/// Drain the pipe with blocking reads until EOF.
pub fn run_consumer(
    mut consumer: Consumer,
    traffic: &TrafficConfig,
    shutdown: &AtomicBool,
) -> Result<ConsumerStats> {
    let _s = common::span!("consumer");
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return consumer.finish(traffic.total_bytes, true);
        }
        let step = match consumer.step(false) {
            Ok(step) => step,
            Err(e) => return consumer.fail(e),
        };
        match step {
            Step::Eof => {
                let interrupted = shutdown.load(Ordering::Relaxed);
                return consumer.finish(traffic.total_bytes, interrupted);
            }
            Step::Progress(_) => consumer.jitter(traffic.jitter),
            Step::WouldBlock => {
                return consumer.fail(anyhow::anyhow!("blocking read returned WouldBlock"));
            }
        }
    }
}

/// Drain the pipe with non-blocking reads, sleeping on `wakeup` in between.
///
/// `wakeup` is signalled by the writer's hook notifier after each publish.
#[tracing::instrument(skip_all, name = "consumer_hooked")]
pub async fn run_consumer_hooked(
    mut consumer: Consumer,
    traffic: &TrafficConfig,
    wakeup: &tokio::sync::Notify,
    shutdown: &AtomicBool,
) -> Result<ConsumerStats> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return consumer.finish(traffic.total_bytes, true);
        }
        let step = match consumer.step(true) {
            Ok(step) => step,
            Err(e) => return consumer.fail(e),
        };
        match step {
            Step::Eof => {
                let interrupted = shutdown.load(Ordering::Relaxed);
                return consumer.finish(traffic.total_bytes, interrupted);
            }
            Step::Progress(_) => {}
            Step::WouldBlock => {
                // notify_one keeps a permit, so a publish between the read
                // and this await is not lost.
                let _ = tokio::time::timeout(HOOK_WAIT, wakeup.notified()).await;
            }
        }
    }
}

/// Drain the pipe with non-blocking reads, sleeping on a named semaphore
/// the writer posts after each publish.
pub fn run_consumer_semaphore(
    mut consumer: Consumer,
    traffic: &TrafficConfig,
    sem: &spsc::Semaphore,
    shutdown: &AtomicBool,
) -> Result<ConsumerStats> {
    let _s = common::span!("consumer_semaphore");
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return consumer.finish(traffic.total_bytes, true);
        }
        let step = match consumer.step(true) {
            Ok(step) => step,
            Err(e) => return consumer.fail(e),
        };
        match step {
            Step::Eof => {
                let interrupted = shutdown.load(Ordering::Relaxed);
                return consumer.finish(traffic.total_bytes, interrupted);
            }
            Step::Progress(_) => consumer.jitter(traffic.jitter),
            Step::WouldBlock => match sem.wait_timeout(HOOK_WAIT) {
                Ok(()) | Err(spsc::SemaphoreError::Timeout) => {}
                Err(e) => {
                    return consumer
                        .fail(anyhow::Error::new(e).context("Failed to wait on pipe semaphore"));
                }
            },
        }
    }
}
