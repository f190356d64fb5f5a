//! Polling for cloud-side state transitions.
//!
//! Every blocking wait in the pipeline (image becoming available, fleet
//! reaching running, instances terminating) goes through [`wait_until`]: an
//! exponential-backoff poll loop with an overall deadline and cooperative
//! cancellation between attempts.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff and deadline settings for [`wait_until`].
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay before the second check; grows exponentially from here
    pub initial_delay: Duration,
    /// Cap on the per-attempt delay
    pub max_delay: Duration,
    /// Overall deadline for the wait
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Error returned when a wait does not complete.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for {what} after {after:?} ({attempts} attempts)")]
    Timeout {
        what: String,
        after: Duration,
        attempts: u32,
    },

    #[error("wait for {what} cancelled")]
    Cancelled { what: String },

    #[error(transparent)]
    Check(#[from] anyhow::Error),
}

/// Poll `check` until it reports readiness, the deadline passes, or the token
/// is cancelled.
///
/// `check` returns `Ok(true)` when the condition holds, `Ok(false)` to keep
/// polling. A check error aborts the wait; transient provider errors should
/// be mapped to `Ok(false)` by the caller if polling should continue.
pub async fn wait_until<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    what: &str,
    check: F,
) -> Result<(), WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(WaitError::Cancelled {
                    what: what.to_string(),
                });
            }
        }

        if start.elapsed() >= config.timeout {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                after: config.timeout,
                attempts,
            });
        }

        attempts += 1;
        match check().await {
            Ok(true) => {
                debug!(what, attempts, "condition reached");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(what, attempt = attempts, delay_ms = delay.as_millis(), "not ready yet");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        return Err(WaitError::Cancelled { what: what.to_string() });
                    }
                }
            }
            Err(e) => {
                warn!(what, error = ?e, "condition check failed");
                return Err(WaitError::Check(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn succeeds_after_a_few_attempts() {
        let calls = AtomicU32::new(0);
        let result = wait_until(fast_config(), None, "thing", || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .await;
        assert!(result.is_ok());
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let config = WaitConfig {
            timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let result = wait_until(config, None, "thing", || async { Ok(false) }).await;
        assert!(matches!(result, Err(WaitError::Timeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_wins_over_polling() {
        let token = CancellationToken::new();
        token.cancel();
        let result = wait_until(fast_config(), Some(&token), "thing", || async { Ok(false) }).await;
        assert!(matches!(result, Err(WaitError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn check_errors_abort() {
        let result = wait_until(fast_config(), None, "thing", || async {
            anyhow::bail!("provider exploded")
        })
        .await;
        assert!(matches!(result, Err(WaitError::Check(_))));
    }
}
