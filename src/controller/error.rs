use std::time::Duration;

use crate::utils::CCStr;

/// Reasons a deferred unit ends up in the `Failed` state.
///
/// Errors never cross the controller boundary as panics or `Err` returns:
/// they are committed into [`LoadState::Failed`](super::LoadState::Failed)
/// and delivered to subscribers with [`LoaderEvent::Failed`](super::LoaderEvent::Failed).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The timeout timer fired before the fetch settled
    #[error("load {reference} timeout")]
    Timeout { reference: CCStr, after: Duration },
    /// The underlying fetch rejected
    #[error("load {reference} failed: {message}")]
    Failure { reference: CCStr, message: CCStr },
    /// A retry was declined, either by the predicate or because the attempt
    /// count exceeded the configured maximum
    #[error("giving up on {reference} after {attempts} attempt(s): {last}")]
    RetryExhausted {
        reference: CCStr,
        attempts: u32,
        last: Box<LoadError>,
    },
}

impl LoadError {
    pub fn reference(&self) -> &CCStr {
        match self {
            Self::Timeout { reference, .. }
            | Self::Failure { reference, .. }
            | Self::RetryExhausted { reference, .. } => reference,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// `true` once no retry can be accepted anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// The error that caused the chain to fail, looking through
    /// [`LoadError::RetryExhausted`].
    pub fn root_cause(&self) -> &LoadError {
        match self {
            Self::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
