use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use opendrive_core::OpenDriveError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{FsError, Result};

#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    /// Bigger values make the sleep shrink more slowly after a success.
    pub decay_constant: u32,
    /// Retries allowed after the first attempt; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Overall budget for one call including all of its retries.
    pub call_timeout: Option<Duration>,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(10),
            max_sleep: Duration::from_secs(5 * 60),
            decay_constant: 1,
            max_retries: Some(10),
            call_timeout: None,
        }
    }
}

/// Runs remote calls, sleeping and retrying while they fail in ways the
/// service is expected to recover from.
///
/// The sleep interval is shared by every call going through the same pacer:
/// failures anywhere widen it, successes anywhere narrow it again.
#[derive(Debug)]
pub struct Pacer {
    config: PacerConfig,
    sleep: Mutex<Duration>,
    cancel: CancellationToken,
}

impl Pacer {
    pub fn new(config: PacerConfig) -> Self {
        Self {
            sleep: Mutex::new(config.min_sleep),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    pub fn current_sleep(&self) -> Duration {
        *self.sleep.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Token that aborts every call made with [`Pacer::call`].
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OpenDriveError>>,
    {
        self.call_with(&self.cancel, op).await
    }

    pub async fn call_with<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OpenDriveError>>,
    {
        let deadline = self.config.call_timeout.map(|limit| Instant::now() + limit);
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(FsError::Cancelled);
            }
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FsError::Cancelled),
                _ = sleep_until_deadline(deadline) => {
                    return Err(FsError::DeadlineExceeded { attempts });
                }
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err.into()),
                Err(err) => err,
            };

            if let Some(max_retries) = self.config.max_retries
                && attempts > max_retries
            {
                warn!("giving up after {attempts} attempts: {err}");
                return Err(err.into());
            }

            let delay = self.on_retry();
            if let Some(deadline) = deadline
                && Instant::now() + delay > deadline
            {
                warn!("deadline reached after {attempts} attempts: {err}");
                return Err(FsError::DeadlineExceeded { attempts });
            }
            warn!("retrying in {delay:?} (attempt {attempts}): {err}");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FsError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn on_retry(&self) -> Duration {
        let mut sleep = self.sleep.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *sleep = sleep
            .saturating_mul(2)
            .clamp(self.config.min_sleep, self.config.max_sleep.max(self.config.min_sleep));
        *sleep
    }

    fn on_success(&self) {
        let mut sleep = self.sleep.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let decayed = decay(*sleep, self.config.decay_constant);
        if decayed != *sleep {
            debug!("pacer sleep decayed to {decayed:?}");
        }
        *sleep = decayed.max(self.config.min_sleep);
    }
}

/// `(s * 2^k - s) / 2^k`: with k = 1 the sleep halves, larger k shrink it by
/// a smaller fraction each time.
fn decay(sleep: Duration, decay_constant: u32) -> Duration {
    let k = decay_constant.min(16);
    let nanos = sleep.as_nanos();
    let decayed = ((nanos << k) - nanos) >> k;
    Duration::from_nanos(u64::try_from(decayed).unwrap_or(u64::MAX))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
