use crate::errors::{Result, SpscError};
use std::time::Duration;

/// Backoff schedule for non-blocking operations that hit `WouldBlock`.
///
/// Default values are tuned for low-latency pipes:
/// - 20 attempts with 100µs base delay
/// - Exponential backoff capped at 2ms
/// - Total worst-case wait: ~7ms
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up with `RetriesExhausted`
    pub max_attempts: u32,
    /// Initial delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap (backoff won't exceed this)
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_micros(100),
            max_delay: Duration::from_millis(2),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt using exponential backoff
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Run `op` until it stops returning `WouldBlock`, sleeping between tries.
///
/// Every other outcome, success or error, is returned as is.
pub(crate) fn retry_would_block<T, F>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    for attempt in 0..config.max_attempts {
        match op() {
            Err(SpscError::WouldBlock) => {
                if attempt + 1 < config.max_attempts {
                    std::thread::sleep(config.delay_for_attempt(attempt));
                }
            }
            other => return other,
        }
    }
    tracing::debug!(attempts = config.max_attempts, "retries exhausted");
    Err(SpscError::RetriesExhausted {
        attempts: config.max_attempts,
    })
}

/// Async version of `retry_would_block` using `tokio::time::sleep`.
#[cfg(feature = "tokio")]
pub(crate) async fn retry_would_block_async<T, F>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    for attempt in 0..config.max_attempts {
        match op() {
            Err(SpscError::WouldBlock) => {
                if attempt + 1 < config.max_attempts {
                    tokio::time::sleep(config.delay_for_attempt(attempt)).await;
                }
            }
            other => return other,
        }
    }
    tracing::debug!(attempts = config.max_attempts, "retries exhausted");
    Err(SpscError::RetriesExhausted {
        attempts: config.max_attempts,
    })
}
