use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::{LoadPolicy, LoadRequest, Reference};
use crate::utils::{join_path, CCStr};

/// Loader configuration, given explicitly to each loader or provided to a
/// subtree of the UI with [`use_loader_options`](crate::helper_hooks::use_loader_options).
///
/// All durations are expressed in milliseconds and `0` disables the
/// corresponding timer. Missing fields take their default value when
/// deserializing.
///
/// # Examples
///
/// ```rust
/// use async_loader::config::LoaderOptions;
///
/// let options: LoaderOptions = serde_json::from_str(
///     r#"{ "base_path": "~components", "timeout_ms": 1000, "max_attempts": 1 }"#,
/// ).unwrap();
/// assert_eq!(options.timeout_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Prefix prepended to every path reference
    pub base_path: CCStr,
    pub minimum_visible_time_ms: u64,
    pub timeout_ms: u64,
    pub delay_before_loading_ms: u64,
    pub max_attempts: Option<u32>,
    pub auto_retry: bool,
    pub retry_backoff_ms: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            base_path: CCStr::default(),
            minimum_visible_time_ms: 0,
            timeout_ms: 0,
            delay_before_loading_ms: 0,
            max_attempts: None,
            auto_retry: false,
            retry_backoff_ms: 0,
        }
    }
}

impl LoaderOptions {
    pub fn with_base_path(mut self, base_path: impl Into<CCStr>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_minimum_visible_time(mut self, minimum_visible_time_ms: u64) -> Self {
        self.minimum_visible_time_ms = minimum_visible_time_ms;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_delay_before_loading(mut self, delay_before_loading_ms: u64) -> Self {
        self.delay_before_loading_ms = delay_before_loading_ms;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_auto_retry(mut self, retry_backoff_ms: u64) -> Self {
        self.auto_retry = true;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    /// The policy described by these options, without retry predicate.
    pub fn policy(&self) -> LoadPolicy {
        LoadPolicy {
            minimum_visible_time: Duration::from_millis(self.minimum_visible_time_ms),
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            delay_before_loading: Duration::from_millis(self.delay_before_loading_ms),
            max_attempts: self.max_attempts,
            retry_predicate: None,
            auto_retry: self.auto_retry,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Builds the request for `reference`, prefixing paths with the base path.
    ///
    /// `policy` overrides the policy derived from the options when given.
    pub fn request<M>(&self, reference: Reference<M>, policy: Option<LoadPolicy>) -> LoadRequest<M> {
        let reference = match reference {
            Reference::Path(path) => Reference::Path(join_path(&self.base_path, &path)),
            other => other,
        };
        LoadRequest::new(reference, policy.unwrap_or_else(|| self.policy()))
    }
}
