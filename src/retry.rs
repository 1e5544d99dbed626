//! Backoff strategies for transient failures.
//!
//! The pipeline decides *whether* a failure is retryable by classifying the
//! attempt into an [`Outcome`](crate::transport::Outcome); a [`RetryStrategy`]
//! decides *how long* to wait and when to give up.

use rand::Rng;
use std::time::Duration;

/// Defines how failed requests are spaced out and when retries stop.
///
/// # Examples
///
/// ```
/// use gridgate::RetryStrategy;
/// use std::time::Duration;
///
/// // Exponential backoff: 100ms, 200ms, 400ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: 3,
///     jitter: false,
/// };
/// assert_eq!(exponential.delay_for_attempt(3), Some(Duration::from_millis(400)));
/// assert_eq!(exponential.delay_for_attempt(4), None);
///
/// // Linear backoff: 1s, 1s, 1s
/// let linear = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
/// assert_eq!(linear.max_retries(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Do not retry failed requests.
    #[default]
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Retry `n` (1-indexed) waits `initial_delay * 2^(n-1)`, capped at `max_delay`.
    /// Jitter scales each delay into 50-100% of its value, which gives up the
    /// strictly increasing sequence.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// The maximum number of retry attempts.
        max_retries: usize,
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Linear {
        /// The delay between retry attempts.
        delay: Duration,
        /// The maximum number of retry attempts.
        max_retries: usize,
    },
}

impl RetryStrategy {
    /// Exponential backoff without jitter starting at `base_delay`.
    pub fn exponential(base_delay: Duration, max_retries: usize) -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: base_delay,
            max_delay: Duration::from_secs(30),
            max_retries,
            jitter: false,
        }
    }

    /// Returns the delay before the given retry, or `None` if retries are exhausted.
    ///
    /// # Arguments
    ///
    /// * `retry` - The retry number (1-indexed, so 1 = first retry)
    pub fn delay_for_attempt(&self, retry: usize) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries() {
            return None;
        }

        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                jitter,
                ..
            } => {
                let multiplier = 2u32.saturating_pow(retry.saturating_sub(1) as u32);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, .. } => Some(*delay),
        }
    }

    /// Returns the maximum number of retries.
    pub fn max_retries(&self) -> usize {
        match self {
            RetryStrategy::None => 0,
            RetryStrategy::ExponentialBackoff { max_retries, .. } => *max_retries,
            RetryStrategy::Linear { max_retries, .. } => *max_retries,
        }
    }
}
