use dioxus::prelude::*;

use crate::controller::LoadError;

/// A lazily loaded component: a Dioxus component without props.
pub type LazyComponent = fn() -> Element;

/// A component rendering a loading failure.
pub type ErrorComponent = fn(LoadErrorProps) -> Element;

/// What an error view receives: the error, and a way to ask for another attempt.
#[derive(Props, Clone, PartialEq)]
pub struct LoadErrorProps {
    pub error: LoadError,
    pub retry: EventHandler<()>,
}

/// The views used while a unit is pending and once it failed.
///
/// Provide it with [`use_loader_components`] to change the views of a whole
/// subtree, or override them per loader through the `AsyncLoader` props.
#[derive(Clone, Copy, PartialEq)]
pub struct LoaderComponents {
    pub loading: LazyComponent,
    pub error: ErrorComponent,
}
impl Default for LoaderComponents {
    fn default() -> Self {
        Self {
            loading: DefaultLoading,
            error: DefaultError,
        }
    }
}
impl LoaderComponents {
    /// Skeleton animation while loading and an "ERROR" badge on failure
    pub fn skeleton() -> Self {
        Self {
            loading: SkeletonLoading,
            error: SkeletonError,
        }
    }
}

pub fn use_loader_components(components: LoaderComponents) -> LoaderComponents {
    use_context_provider(move || components)
}

#[allow(non_snake_case)]
pub fn DefaultLoading() -> Element {
    rsx! {
        div { class: "async-loader-loading", "loading..." }
    }
}

#[allow(non_snake_case)]
pub fn DefaultError(props: LoadErrorProps) -> Element {
    let LoadErrorProps { error, retry } = props;
    rsx! {
        div { class: "async-loader-error",
            span { "{error}" }
            if !error.is_terminal() {
                button { class: "btn btn-xs", onclick: move |_| retry.call(()), "Retry" }
            }
        }
    }
}

/// A skeleton block standing in for the component while it loads.
///
/// Keeps some room in the layout so the resolved component does not shift
/// its surroundings too much.
#[allow(non_snake_case)]
pub fn SkeletonLoading() -> Element {
    rsx! {
        span { class: "skeleton",
            span { class: "invisible inline-block", "Loading..." }
        }
    }
}

#[allow(non_snake_case)]
pub fn SkeletonError(props: LoadErrorProps) -> Element {
    let LoadErrorProps { error, retry } = props;
    log::debug!("SkeletonError Rendered: {error}");
    rsx! {
        span {
            class: "bg-error rounded-xs relative",
            title: "{error}",
            onclick: move |_| retry.call(()),
            span { class: "absolute top-0 left-0 size-full text-error-content text-center",
                "ERROR"
            }
            span { class: "invisible inline-block", "Loading..." }
        }
    }
}
