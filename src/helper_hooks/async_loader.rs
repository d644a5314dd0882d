use dioxus::prelude::*;

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::config::LoaderOptions;
use crate::controller::{
    AsyncLoadController, LoadPolicy, LoadState, LoaderEvent, ModuleResolver, NoResolver,
    Reference, Spawn, SpawnedTask,
};

/// Runs controller tasks on the Dioxus runtime, scoped to the calling component.
#[derive(Debug, Clone, Copy, Default)]
pub struct DioxusSpawner;
impl Spawn for DioxusSpawner {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) -> SpawnedTask {
        let task = dioxus::prelude::spawn(fut);
        SpawnedTask::new(move || task.cancel())
    }
}

/// Resolver shared with every loader of a subtree through the context.
pub struct SharedResolver<M: 'static>(Rc<dyn ModuleResolver<M>>);
impl<M: 'static> Clone for SharedResolver<M> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

/// Provides `options` to every loader below the calling component.
///
/// This replaces installing global plugin options: two subtrees may use
/// different options.
pub fn use_loader_options(options: LoaderOptions) -> LoaderOptions {
    use_context_provider(move || options)
}

/// Provides the resolver used by loaders of `M` below the calling component
/// to turn path references into modules.
pub fn use_module_resolver<M: 'static>(
    resolver: impl ModuleResolver<M> + 'static,
) -> SharedResolver<M> {
    use_context_provider(move || SharedResolver(Rc::new(resolver)))
}

/// What a component needs to render a loader, mirrored from its controller.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderView<M> {
    pub state: LoadState<M>,
    pub fallback_visible: bool,
    pub attempts: u32,
}
impl<M> Default for LoaderView<M> {
    fn default() -> Self {
        Self {
            state: LoadState::Idle,
            fallback_visible: false,
            attempts: 0,
        }
    }
}

/// Handle returned by [`use_async_loader`].
pub struct LoaderSignal<M: 'static> {
    view: Signal<LoaderView<M>>,
    controller: AsyncLoadController<M>,
}
impl<M: 'static> Clone for LoaderSignal<M> {
    fn clone(&self) -> Self {
        Self {
            view: self.view,
            controller: self.controller.clone(),
        }
    }
}
impl<M: 'static> PartialEq for LoaderSignal<M> {
    fn eq(&self, other: &Self) -> bool {
        self.view == other.view && self.controller == other.controller
    }
}

impl<M: Clone + 'static> LoaderSignal<M> {
    /// Reads the current view, subscribing the calling component to changes.
    pub fn view(&self) -> LoaderView<M> {
        self.view.read().clone()
    }

    pub fn retry(&self) -> bool {
        self.controller.retry()
    }

    pub fn controller(&self) -> &AsyncLoadController<M> {
        &self.controller
    }
}

/// Loads `reference` for the lifetime of the calling component.
///
/// The options and resolver come from the context (see [`use_loader_options`]
/// and [`use_module_resolver`]); `policy` overrides the options' policy when
/// given. `on_event` observes every transition. Everything is captured on the
/// first render only: the loader is not restarted when the arguments change.
///
/// Loading starts right after the first render, which therefore sees
/// [`LoadState::Idle`]. The controller is torn down when the component is
/// dropped.
pub fn use_async_loader<M: Clone + 'static>(
    reference: Reference<M>,
    policy: Option<LoadPolicy>,
    on_event: impl Fn(&LoaderEvent<M>) + 'static,
) -> LoaderSignal<M> {
    let options = try_use_context::<LoaderOptions>().unwrap_or_default();
    let resolver = try_use_context::<SharedResolver<M>>();
    let view = use_signal(LoaderView::default);

    let controller = use_hook(move || {
        let resolver: Rc<dyn ModuleResolver<M>> = match resolver {
            Some(SharedResolver(resolver)) => resolver,
            None => Rc::new(NoResolver),
        };
        let controller = AsyncLoadController::new(resolver, Rc::new(DioxusSpawner));

        // Torn down with the component, which also drops this subscriber
        let observed = controller.clone();
        controller.on_event(move |event| {
            let mut view = view;
            view.set(LoaderView {
                state: observed.state(),
                fallback_visible: observed.fallback_visible(),
                attempts: observed.attempts(),
            });
            on_event(event);
        });

        // Started from a task so that no signal is written during the render
        let request = options.request(reference, policy);
        let starter = controller.clone();
        spawn(async move {
            starter.start(request);
        });
        controller
    });

    use_drop({
        let controller = controller.clone();
        move || controller.teardown()
    });

    LoaderSignal { view, controller }
}
