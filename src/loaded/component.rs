use dioxus::prelude::*;

use super::loaders::{ErrorComponent, LazyComponent, LoadErrorProps, LoaderComponents};
use crate::controller::{LoadError, LoadPolicy, LoadState, LoaderEvent, Reference};
use crate::helper_hooks::use_async_loader;
use crate::utils::CCStr;

/// A component loaded on demand, shown through the loading state machine.
///
/// While the reference is pending, the loading view is displayed once the
/// delay before loading has elapsed. On failure, the error view receives the
/// error and a retry handler. Once resolved, the loaded component replaces
/// them. Errors raised while rendering the loaded component are shown in the
/// same error view, whose retry then mounts the component again.
///
/// # Parameters
///
/// * `reference` - What to load. Path references are resolved through the
///   resolver provided with `use_module_resolver`
/// * `policy` - Overrides the policy of the `LoaderOptions` in context
/// * `loading` / `error` - Override the views of the `LoaderComponents` in context
/// * `on_pending`, `on_fallback`, `on_resolve` - Called when an attempt
///   starts, when the loading view appears and when the component is resolved
///
/// # Examples
///
/// ```rust,ignore
/// #[component]
/// fn Page() -> Element {
///     rsx! {
///         AsyncLoader {
///             reference: Reference::path("views/settings"),
///             policy: LoadPolicy::default().with_timeout(Duration::from_secs(2)),
///             on_resolve: |_| log::info!("settings ready"),
///         }
///     }
/// }
/// ```
#[component]
pub fn AsyncLoader(
    reference: Reference<LazyComponent>,
    policy: Option<LoadPolicy>,
    loading: Option<LazyComponent>,
    error: Option<ErrorComponent>,
    on_pending: Option<EventHandler<()>>,
    on_fallback: Option<EventHandler<()>>,
    on_resolve: Option<EventHandler<()>>,
) -> Element {
    let components = try_use_context::<LoaderComponents>().unwrap_or_default();
    let loading = loading.unwrap_or(components.loading);
    let error_view = error.unwrap_or(components.error);
    let label = reference.label();
    // Bumped to remount the loaded component after a render error
    let remounts = use_signal(|| 0u32);

    let loader = use_async_loader(reference, policy, move |event| {
        let handler = match event {
            LoaderEvent::Pending { .. } => on_pending,
            LoaderEvent::FallbackShown { .. } => on_fallback,
            LoaderEvent::Resolved(_) => on_resolve,
            LoaderEvent::Failed(_) | LoaderEvent::Retrying { .. } => None,
        };
        if let Some(handler) = handler {
            handler.call(());
        }
    });

    let view = loader.view();
    match view.state {
        LoadState::Resolved(module) => rsx! {
            ErrorBoundary {
                key: "{remounts}",
                handle_error: move |errors: ErrorContext| {
                    let message = errors
                        .errors()
                        .first()
                        .map(render_error_message)
                        .unwrap_or_default();
                    log::warn!("{label} failed to render: {message}");
                    let error = LoadError::Failure {
                        reference: label.clone(),
                        message,
                    };
                    let mut remounts = remounts;
                    rsx! {
                        DynamicErrorComponent {
                            component: error_view,
                            error,
                            retry: move |_| remounts += 1,
                        }
                    }
                },
                DynamicComponent { component: module }
            }
        },
        LoadState::Failed(error) => rsx! {
            DynamicErrorComponent {
                component: error_view,
                error,
                retry: move |_| {
                    loader.retry();
                },
            }
        },
        _ if view.fallback_visible => rsx! {
            DynamicComponent { component: loading }
        },
        _ => rsx! {},
    }
}

/// The error line of a captured render error, without scope and backtrace.
fn render_error_message(error: &dioxus::CapturedError) -> CCStr {
    let text = error.to_string();
    let first = text.lines().next().unwrap_or_default();
    CCStr::from(first.trim_start_matches("Encountered error: "))
}

/// Gives a dynamically chosen component its own scope, so its hooks stay
/// attached to it.
#[component]
fn DynamicComponent(component: LazyComponent) -> Element {
    component()
}

#[component]
fn DynamicErrorComponent(component: ErrorComponent, error: LoadError, retry: EventHandler<()>) -> Element {
    component(LoadErrorProps { error, retry })
}
