//! Bounded retry for remote calls
//!
//! Listing pages from GitHub occasionally fails for transient reasons. Every
//! paginated endpoint goes through [`with_retry`] so the attempt limit lives in
//! one place.

use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of additional attempts allowed for a failing page
pub const MAX_RETRIES: u32 = 2;

/// Delay between attempts unless configured otherwise
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// How often and how patiently to retry a fallible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Pause before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Retry without pausing between attempts.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// Total number of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Build a constant backoff strategy from this policy.
    #[must_use]
    pub fn into_backoff(self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_retries as usize)
    }
}

/// Run `operation` until it succeeds or `policy.max_retries` retries are spent.
///
/// The error of the last attempt is returned when every attempt fails.
/// `label` only appears in log lines.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let retries = AtomicU32::new(0);

    let result = operation
        .retry(policy.into_backoff())
        .notify(|err: &E, dur: Duration| {
            let retry = retries.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                "{} failed (retry {}/{} in {:?}): {}",
                label, retry, policy.max_retries, dur, err
            );
        })
        .await;

    let retries = retries.load(Ordering::SeqCst);
    match &result {
        Ok(_) if retries > 0 => debug!("{} succeeded after {} retries", label, retries),
        Ok(_) => {}
        Err(e) => warn!("{} failed after {} attempts: {}", label, retries + 1, e),
    }
    result
}
