use std::time::Duration;

use crate::calendar::ProviderError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SECONDS: &[u64] = &[2, 4, 8];
/// Upper bound on a server-requested `Retry-After` pause.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Bounded retry for retryable provider errors (rate limits, transient
/// failures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF_SECONDS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Vec::new(),
            max_wait: Duration::ZERO,
        }
    }

    /// Retry without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Vec::new(),
            max_wait: Duration::ZERO,
        }
    }

    /// Pause before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` wins over the backoff table, capped at `max_wait`.
    pub fn wait_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        if let ProviderError::RateLimited {
            retry_after: Some(after),
        } = error
        {
            return (*after).min(self.max_wait);
        }
        self.backoff
            .get(attempt as usize)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Retry a provider call expression while it fails with a retryable error.
///
/// Usage: `retry_provider!(&policy, provider.create_event(&id, &draft))`
///
/// The expression is re-evaluated on each attempt. This is a macro because
/// async closures that return borrowed futures can't satisfy `Fn`.
macro_rules! retry_provider {
    ($policy:expr, $expr:expr) => {{
        let _policy: &$crate::sync::rate_limit::RetryPolicy = $policy;
        let mut _attempt: u32 = 0;
        loop {
            match $expr.await {
                Ok(val) => break Ok::<_, $crate::calendar::ProviderError>(val),
                Err(e) => {
                    if e.is_retryable() && _attempt < _policy.max_retries {
                        let wait = _policy.wait_for(_attempt, &e);
                        log::warn!(
                            "{e}. Waiting {}s before retry {}/{}",
                            wait.as_secs(),
                            _attempt + 1,
                            _policy.max_retries
                        );
                        tokio::time::sleep(wait).await;
                        _attempt += 1;
                    } else {
                        break Err(e);
                    }
                }
            }
        }
    }};
}

pub(crate) use retry_provider;
