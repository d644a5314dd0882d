//! # Controller Module
//!
//! The loading lifecycle of one deferred unit, independent of any rendering
//! framework.
//!
//! An [`AsyncLoadController`] issues the fetch of a [`Reference`], races it
//! against the timers of its [`LoadPolicy`] (timeout, minimum visible time,
//! delay before loading) and commits the outcome as a [`LoadState`]
//! transition, notifying subscribers with a [`LoaderEvent`].
//!
//! Every attempt gets a new generation number. Timers and fetches of an
//! attempt only commit while their generation is the current one, so a late
//! resolution from a superseded attempt is silently discarded.
//!
//! ```text
//! Idle --start()--> Pending
//! Pending --fetch ok & minimum time elapsed--> Resolved
//! Pending --fetch error | timeout--> Failed
//! Failed --retry() accepted--> Retrying --> Pending
//! Failed --retry() rejected--> Failed(RetryExhausted)
//! ```

mod error;
mod policy;
mod reference;
mod spawner;
mod state;
#[cfg(test)]
mod tests;

pub use error::LoadError;
pub use policy::{LoadPolicy, RetryPredicate};
pub use reference::{
    LoadRequest, ModuleFetch, ModuleResolver, NoResolver, Reference, RegistryResolver,
};
pub use spawner::{Spawn, SpawnedTask, TokioLocalSpawner};
pub use state::{LoadState, LoaderEvent};

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::future::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::utils::CCStr;

type Handler<M> = Rc<dyn Fn(&LoaderEvent<M>)>;

struct Inner<M> {
    id: Uuid,
    request: Option<LoadRequest<M>>,
    label: CCStr,
    state: LoadState<M>,
    generation: u64,
    attempts: u32,
    fallback_visible: bool,
    /// The task owning the timers of the current attempt, or the retry backoff
    driver: Option<SpawnedTask>,
    torn_down: bool,
    handlers: Vec<Handler<M>>,
}

impl<M> Inner<M> {
    fn is_current(&self, generation: u64) -> bool {
        !self.torn_down && self.generation == generation
    }
}

/// Owns the loading lifecycle of one deferred unit.
///
/// The controller is a cheap-to-clone handle; clones share the same state.
/// It is meant to live on a single thread, all its tasks are spawned through
/// the [`Spawn`] implementation it was created with.
pub struct AsyncLoadController<M: 'static> {
    inner: Rc<RefCell<Inner<M>>>,
    resolver: Rc<dyn ModuleResolver<M>>,
    spawner: Rc<dyn Spawn>,
}

/// The handle given to hosts by [`create_loader`].
pub type LoaderHandle<M> = AsyncLoadController<M>;

impl<M: 'static> Clone for AsyncLoadController<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            resolver: Rc::clone(&self.resolver),
            spawner: Rc::clone(&self.spawner),
        }
    }
}

impl<M: 'static> PartialEq for AsyncLoadController<M> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M: 'static> core::fmt::Debug for AsyncLoadController<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AsyncLoadController")
            .field("id", &inner.id)
            .field("label", &inner.label)
            .field("generation", &inner.generation)
            .field("attempts", &inner.attempts)
            .field("torn_down", &inner.torn_down)
            .finish_non_exhaustive()
    }
}

/// Creates a controller, subscribes `on_event` to its transitions and starts
/// loading `request`.
pub fn create_loader<M, F>(
    request: LoadRequest<M>,
    resolver: Rc<dyn ModuleResolver<M>>,
    spawner: Rc<dyn Spawn>,
    on_event: F,
) -> LoaderHandle<M>
where
    M: Clone + 'static,
    F: Fn(&LoaderEvent<M>) + 'static,
{
    let controller = AsyncLoadController::new(resolver, spawner);
    controller.on_event(on_event);
    controller.start(request);
    controller
}

impl<M: Clone + 'static> AsyncLoadController<M> {
    /// Creates an idle controller.
    ///
    /// Nothing is fetched until [`start`](Self::start) is called.
    ///
    /// # Parameters
    ///
    /// * `resolver` - Turns [`Reference::Path`] references into modules
    /// * `spawner` - Runs the fetch, timer and retry tasks of every attempt
    ///
    /// # Returns
    ///
    /// A controller in the [`LoadState::Idle`] state, without subscribers
    pub fn new(resolver: Rc<dyn ModuleResolver<M>>, spawner: Rc<dyn Spawn>) -> Self {
        let id = Uuid::new_v4();
        log::debug!("loader {id} - created");
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id,
                request: None,
                label: CCStr::default(),
                state: LoadState::Idle,
                generation: 0,
                attempts: 0,
                fallback_visible: false,
                driver: None,
                torn_down: false,
                handlers: Vec::new(),
            })),
            resolver,
            spawner,
        }
    }

    /// Random identifier of this controller, used in its log lines
    pub fn id(&self) -> Uuid {
        self.inner.borrow().id
    }

    /// A snapshot of the current state.
    ///
    /// # Returns
    ///
    /// A clone of the state, the resolved module included
    pub fn state(&self) -> LoadState<M> {
        self.inner.borrow().state.clone()
    }

    /// Number of attempts made in the current chain
    pub fn attempts(&self) -> u32 {
        self.inner.borrow().attempts
    }

    /// The attempt generation.
    ///
    /// Bumped by every attempt and by [`teardown`](Self::teardown); only tasks
    /// of the current generation may commit a transition.
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    /// Whether the placeholder should currently be displayed
    pub fn fallback_visible(&self) -> bool {
        let inner = self.inner.borrow();
        inner.fallback_visible && inner.state.is_pending()
    }

    /// Whether [`teardown`](Self::teardown) was called
    pub fn is_torn_down(&self) -> bool {
        self.inner.borrow().torn_down
    }

    /// Registers a subscriber called synchronously on every transition.
    ///
    /// Subscribers may call back into the controller (`retry`, `teardown`...).
    pub fn on_event(&self, handler: impl Fn(&LoaderEvent<M>) + 'static) {
        self.inner.borrow_mut().handlers.push(Rc::new(handler));
    }

    /// Subscribes through a channel instead of a callback.
    pub fn events(&self) -> mpsc::UnboundedReceiver<LoaderEvent<M>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_event(move |event| {
            // The receiver going away only means nobody listens anymore
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Starts a new attempt chain for `request`, superseding any attempt in
    /// flight.
    ///
    /// Returns `false` if the controller was torn down.
    pub fn start(&self, request: LoadRequest<M>) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.torn_down {
                log::warn!("loader {} - start ignored, controller torn down", inner.id);
                return false;
            }
            inner.label = request.reference.label();
            inner.request = Some(request);
            inner.attempts = 0;
        }
        self.launch_attempt();
        true
    }

    /// Asks for a new attempt after a failure.
    ///
    /// Only meaningful in the `Failed` state, anywhere else this is a no-op.
    /// Returns whether a new attempt was launched. A rejected retry moves the
    /// controller to the terminal `Failed(RetryExhausted)` state.
    pub fn retry(&self) -> bool {
        let (error, attempts, policy) = {
            let inner = self.inner.borrow();
            let LoadState::Failed(error) = &inner.state else {
                log::debug!("loader {} - retry ignored, not in failed state", inner.id);
                return false;
            };
            let Some(request) = inner.request.as_ref() else {
                return false;
            };
            if inner.torn_down || error.is_terminal() {
                return false;
            }
            (error.clone(), inner.attempts, request.policy.clone())
        };

        if !policy.accepts_retry(&error, attempts) {
            self.exhaust(error, attempts);
            return false;
        }
        if self.enter_retrying(attempts + 1) {
            self.launch_attempt();
        }
        true
    }

    /// Stops every pending timer and drops the subscribers.
    ///
    /// Fetches already in flight are left to complete, their result is
    /// ignored. The controller cannot be started again.
    pub fn teardown(&self) {
        let driver = {
            let mut inner = self.inner.borrow_mut();
            if inner.torn_down {
                return;
            }
            log::debug!("loader {} - teardown", inner.id);
            inner.torn_down = true;
            inner.generation += 1;
            inner.handlers.clear();
            inner.driver.take()
        };
        if let Some(task) = driver {
            task.cancel();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.borrow().is_current(generation)
    }

    fn emit(&self, event: LoaderEvent<M>) {
        let handlers = self.inner.borrow().handlers.clone();
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    fn launch_attempt(&self) {
        let (reference, policy) = {
            let inner = self.inner.borrow();
            let Some(request) = inner.request.as_ref() else {
                return;
            };
            if inner.torn_down {
                return;
            }
            (request.reference.clone(), request.policy.clone())
        };
        let fetch = reference.fetch(self.resolver.as_ref());

        let show_fallback_now = policy.delay_before_loading.is_zero();
        let (previous, generation, attempt, label, id) = {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            inner.attempts += 1;
            inner.state = LoadState::Pending;
            inner.fallback_visible = show_fallback_now;
            (
                inner.driver.take(),
                inner.generation,
                inner.attempts,
                inner.label.clone(),
                inner.id,
            )
        };
        if let Some(task) = previous {
            task.cancel();
        }
        log::debug!("loader {id} - attempt {attempt} for {label} started (generation {generation})");

        self.emit(LoaderEvent::Pending { attempt });
        if show_fallback_now && self.is_current(generation) {
            self.emit(LoaderEvent::FallbackShown { attempt });
        }
        // A subscriber may have superseded this attempt
        if !self.is_current(generation) {
            return;
        }

        let (tx, rx) = oneshot::channel();
        // The fetch gets its own task: superseded fetches are ignored, never aborted
        let _ = self.spawner.spawn(
            async move {
                let _ = tx.send(fetch.await);
            }
            .boxed_local(),
        );
        let driver = self
            .spawner
            .spawn(self.clone().drive(generation, attempt, rx, policy, label).boxed_local());

        let mut inner = self.inner.borrow_mut();
        if inner.is_current(generation) {
            inner.driver = Some(driver);
        } else {
            drop(inner);
            driver.cancel();
        }
    }

    async fn drive(
        self,
        generation: u64,
        attempt: u32,
        mut fetch: oneshot::Receiver<Result<M, CCStr>>,
        policy: LoadPolicy,
        label: CCStr,
    ) {
        let started = Instant::now();
        let timeout = policy.timeout;
        let deadline = tokio::time::sleep(timeout.unwrap_or_default());
        let delay = tokio::time::sleep(policy.delay_before_loading);
        tokio::pin!(deadline, delay);
        let mut fallback_pending = !policy.delay_before_loading.is_zero();

        let outcome = loop {
            tokio::select! {
                biased;
                settled = &mut fetch => break match settled {
                    Ok(result) => result.map_err(|message| LoadError::Failure {
                        reference: label.clone(),
                        message,
                    }),
                    Err(_) => Err(LoadError::Failure {
                        reference: label.clone(),
                        message: CCStr::from("fetch task ended without a result"),
                    }),
                },
                _ = &mut deadline, if timeout.is_some() => break Err(LoadError::Timeout {
                    reference: label.clone(),
                    after: timeout.unwrap_or_default(),
                }),
                _ = &mut delay, if fallback_pending => {
                    fallback_pending = false;
                    self.show_fallback(generation, attempt);
                }
            }
        };

        match outcome {
            Ok(module) => {
                // `sleep` saturates on durations too large for an `Instant`
                let remaining = policy.minimum_visible_time.saturating_sub(started.elapsed());
                if !remaining.is_zero() {
                    tokio::time::sleep(remaining).await;
                }
                self.commit_resolved(generation, module);
            }
            Err(error) => self.commit_failed(generation, error, &policy),
        }
    }

    fn show_fallback(&self, generation: u64, attempt: u32) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_current(generation) || !matches!(inner.state, LoadState::Pending) {
                return;
            }
            inner.fallback_visible = true;
            log::debug!("loader {} - showing placeholder for {}", inner.id, inner.label);
        }
        self.emit(LoaderEvent::FallbackShown { attempt });
    }

    fn commit_resolved(&self, generation: u64, module: M) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_current(generation) {
                log::debug!("loader {} - discarding stale resolution", inner.id);
                return;
            }
            // Detach, this very task is the driver
            inner.driver = None;
            inner.state = LoadState::Resolved(module.clone());
            inner.fallback_visible = false;
            log::debug!(
                "loader {} - {} resolved after {} attempt(s)",
                inner.id,
                inner.label,
                inner.attempts
            );
        }
        self.emit(LoaderEvent::Resolved(module));
    }

    fn commit_failed(&self, generation: u64, error: LoadError, policy: &LoadPolicy) {
        let attempts = {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_current(generation) {
                log::debug!("loader {} - discarding stale failure: {error}", inner.id);
                return;
            }
            inner.driver = None;
            inner.state = LoadState::Failed(error.clone());
            inner.fallback_visible = false;
            log::error!("loader {} - attempt {}: {error}", inner.id, inner.attempts);
            inner.attempts
        };
        self.emit(LoaderEvent::Failed(error.clone()));

        if policy.auto_retry && self.is_current(generation) {
            self.schedule_retry(generation, error, attempts, policy);
        }
    }

    fn schedule_retry(&self, generation: u64, error: LoadError, attempts: u32, policy: &LoadPolicy) {
        if !policy.accepts_retry(&error, attempts) {
            self.exhaust(error, attempts);
            return;
        }
        if !self.enter_retrying(attempts + 1) {
            return;
        }
        let backoff = policy.backoff_for(attempts);
        if backoff.is_zero() {
            self.launch_attempt();
            return;
        }

        log::debug!(
            "loader {} - next attempt in {}ms",
            self.id(),
            backoff.as_millis()
        );
        let this = self.clone();
        let timer = self.spawner.spawn(
            async move {
                tokio::time::sleep(backoff).await;
                let still_waiting = {
                    let mut inner = this.inner.borrow_mut();
                    let waiting = inner.is_current(generation)
                        && matches!(inner.state, LoadState::Retrying { .. });
                    if waiting {
                        inner.driver = None;
                    }
                    waiting
                };
                if still_waiting {
                    this.launch_attempt();
                }
            }
            .boxed_local(),
        );
        let mut inner = self.inner.borrow_mut();
        if inner.is_current(generation) {
            inner.driver = Some(timer);
        } else {
            drop(inner);
            timer.cancel();
        }
    }

    /// Moves to `Retrying`. Returns `false` if a subscriber changed the state
    /// meanwhile.
    fn enter_retrying(&self, attempt: u32) -> bool {
        let generation = {
            let mut inner = self.inner.borrow_mut();
            inner.state = LoadState::Retrying { attempt };
            log::info!("loader {} - retrying {} (attempt {attempt})", inner.id, inner.label);
            inner.generation
        };
        self.emit(LoaderEvent::Retrying { attempt });
        let inner = self.inner.borrow();
        inner.is_current(generation) && matches!(inner.state, LoadState::Retrying { .. })
    }

    fn exhaust(&self, last: LoadError, attempts: u32) {
        let error = {
            let mut inner = self.inner.borrow_mut();
            let error = LoadError::RetryExhausted {
                reference: inner.label.clone(),
                attempts,
                last: Box::new(last),
            };
            inner.state = LoadState::Failed(error.clone());
            log::warn!("loader {} - {error}", inner.id);
            error
        };
        self.emit(LoaderEvent::Failed(error));
    }
}
