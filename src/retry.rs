//! Retry with exponential backoff and jitter for model-client calls.
//! Ported from the teacher's retry config almost verbatim — same formula,
//! same jitter — retargeted at [`ModelError`] instead of the provider
//! crate's own error type.

use crate::model_client::ModelError;
use std::time::Duration;
use tracing::warn;

/// Configuration for automatic retry of transient model-client errors.
///
/// Defaults: 3 retries, 1s initial delay, 2x backoff, 30s max delay.
/// Use `RetryConfig::none()` to disable retries entirely.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: usize,
    /// Initial delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Maximum delay between retries (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// No retries — fail immediately on any error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt (1-indexed).
    /// Uses exponential backoff with ±20% jitter.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped_ms = base_ms.min(self.max_delay_ms as f64);

        // Jitter: ±20% (multiply by 0.8-1.2)
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Log a retry attempt.
pub(crate) fn log_retry(attempt: usize, max: usize, delay: &Duration, error: &ModelError) {
    warn!(
        "model client error (attempt {}/{}), retrying in {:.1}s: {}",
        attempt,
        max,
        delay.as_secs_f64(),
        error
    );
}

/// Run `f` with retries per `cfg`, retrying only on [`ModelError::is_retryable`]
/// errors.
pub async fn with_retry<F, Fut, T>(cfg: &RetryConfig, mut f: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ModelError>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < cfg.max_retries && err.is_retryable() => {
                attempt += 1;
                let delay = err.retry_after().unwrap_or_else(|| cfg.delay_for_attempt(attempt));
                log_retry(attempt, cfg.max_retries, &delay, &err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
