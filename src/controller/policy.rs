use std::rc::Rc;
use std::time::Duration;

use super::LoadError;

/// Decides whether a failed attempt may be retried.
///
/// Receives the error of the failed attempt and the number of attempts made
/// so far in the current chain (starting at 1).
pub type RetryPredicate = Rc<dyn Fn(&LoadError, u32) -> bool>;

/// Timing and retry policy applied around one deferred unit.
///
/// A zero `minimum_visible_time` or `delay_before_loading` disables the
/// corresponding timer. `timeout: None` never times out.
#[derive(Clone, Default)]
pub struct LoadPolicy {
    /// The unit does not reach `Resolved` before this much time has elapsed
    /// since the attempt started, so placeholders do not flash.
    pub minimum_visible_time: Duration,
    pub timeout: Option<Duration>,
    /// The placeholder is suppressed during this delay. A fetch settling
    /// before the delay elapses never shows the placeholder at all.
    pub delay_before_loading: Duration,
    /// Upper bound on the attempt count for which a retry is still accepted.
    /// `None` means retries are only limited by the predicate.
    pub max_attempts: Option<u32>,
    pub retry_predicate: Option<RetryPredicate>,
    /// Retry on failure without waiting for a `retry()` call
    pub auto_retry: bool,
    /// Automatic retries wait `retry_backoff * attempt` before relaunching
    pub retry_backoff: Duration,
}

impl LoadPolicy {
    /// Holds back the resolution until `duration` has elapsed since the
    /// attempt started. Failures are never held back.
    pub fn with_minimum_visible_time(mut self, duration: Duration) -> Self {
        self.minimum_visible_time = duration;
        self
    }

    /// A zero duration disables the timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = (!duration.is_zero()).then_some(duration);
        self
    }

    /// Shows the placeholder only once `duration` has elapsed without the
    /// fetch settling. A zero duration shows it immediately.
    pub fn with_delay_before_loading(mut self, duration: Duration) -> Self {
        self.delay_before_loading = duration;
        self
    }

    /// Refuses retries once more than `max_attempts` attempts have been made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the predicate consulted before every retry.
    ///
    /// # Parameters
    ///
    /// * `predicate` - Called with the error of the failed attempt and the
    ///   number of attempts made so far; returning `false` refuses the retry
    ///   and makes the failure terminal
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&LoadError, u32) -> bool + 'static,
    {
        self.retry_predicate = Some(Rc::new(predicate));
        self
    }

    /// Retries on failure without waiting for a `retry()` call, after
    /// `backoff * attempt`. The same acceptance rules apply.
    pub fn with_auto_retry(mut self, backoff: Duration) -> Self {
        self.auto_retry = true;
        self.retry_backoff = backoff;
        self
    }

    /// Whether a chain that failed with `error` after `attempts` attempts
    /// may start another one.
    pub fn accepts_retry(&self, error: &LoadError, attempts: u32) -> bool {
        if error.is_terminal() {
            return false;
        }
        if self.max_attempts.is_some_and(|max| attempts > max) {
            return false;
        }
        self.retry_predicate
            .as_ref()
            .is_none_or(|predicate| predicate(error, attempts))
    }

    pub(super) fn backoff_for(&self, attempts: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempts)
    }
}

impl core::fmt::Debug for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPolicy")
            .field("minimum_visible_time", &self.minimum_visible_time)
            .field("timeout", &self.timeout)
            .field("delay_before_loading", &self.delay_before_loading)
            .field("max_attempts", &self.max_attempts)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("auto_retry", &self.auto_retry)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

// Predicates compare by identity, which is what Dioxus props need to decide
// whether a component must re-render.
impl PartialEq for LoadPolicy {
    fn eq(&self, other: &Self) -> bool {
        let same_predicate = match (&self.retry_predicate, &other.retry_predicate) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        same_predicate
            && self.minimum_visible_time == other.minimum_visible_time
            && self.timeout == other.timeout
            && self.delay_before_loading == other.delay_before_loading
            && self.max_attempts == other.max_attempts
            && self.auto_retry == other.auto_retry
            && self.retry_backoff == other.retry_backoff
    }
}
