use futures_util::future::LocalBoxFuture;

/// Handle to a task started through [`Spawn`].
///
/// Dropping the handle detaches the task, only [`SpawnedTask::cancel`] stops it.
pub struct SpawnedTask(Box<dyn FnOnce()>);

impl SpawnedTask {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self(Box::new(cancel))
    }

    pub fn cancel(self) {
        (self.0)()
    }
}

impl core::fmt::Debug for SpawnedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedTask").finish_non_exhaustive()
    }
}

/// Host capability to run `!Send` futures on the current thread.
pub trait Spawn {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) -> SpawnedTask;
}

/// Spawns on the current [`tokio::task::LocalSet`].
///
/// # Panics
///
/// Spawning panics when called outside of a `LocalSet`, as
/// [`tokio::task::spawn_local`] does.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalSpawner;

impl Spawn for TokioLocalSpawner {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) -> SpawnedTask {
        let handle = tokio::task::spawn_local(fut);
        SpawnedTask::new(move || handle.abort())
    }
}
