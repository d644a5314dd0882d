use super::LoadError;

/// Where a deferred unit currently is in its loading lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<M> {
    Idle,
    Pending,
    Resolved(M),
    Failed(LoadError),
    /// A retry was accepted and the next attempt is about to start
    Retrying { attempt: u32 },
}

impl<M> Default for LoadState<M> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<M> LoadState<M> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying { .. })
    }

    pub fn resolved(&self) -> Option<&M> {
        match self {
            Self::Resolved(module) => Some(module),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Notifications sent to subscribers, one per committed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent<M> {
    /// A new attempt started
    Pending { attempt: u32 },
    /// The delay before loading elapsed while the attempt was still pending
    FallbackShown { attempt: u32 },
    Resolved(M),
    Failed(LoadError),
    /// A retry was accepted, `attempt` is the number of the upcoming attempt
    Retrying { attempt: u32 },
}
