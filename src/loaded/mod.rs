//! # Loaded Module
//!
//! Dioxus components displaying lazily loaded components through the
//! loading state machine of [`crate::controller`].
//!
//! ## Core Concepts
//!
//! - [`AsyncLoader`](component::AsyncLoader): renders the loading view, the
//!   error view or the loaded component depending on the loader state
//! - [`LoaderComponents`](loaders::LoaderComponents): the loading and error
//!   views of a subtree (default, skeleton or custom)
//! - [`LazyComponent`](loaders::LazyComponent): what a reference resolves to
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use async_loader::prelude::*;
//!
//! #[component]
//! fn App() -> Element {
//!     use_loader_options(LoaderOptions::default().with_base_path("~components"));
//!     use_module_resolver::<LazyComponent>(
//!         RegistryResolver::default().register("~components/comp-a", CompA as LazyComponent),
//!     );
//!     rsx! {
//!         AsyncLoader { reference: Reference::path("comp-a") }
//!     }
//! }
//! ```

pub mod component;
pub mod loaders;

/// Prelude module that re-exports the components and views.
pub mod prelude {
    pub use super::component::AsyncLoader;
    pub use super::loaders::{
        use_loader_components, DefaultError, DefaultLoading, ErrorComponent, LazyComponent,
        LoadErrorProps, LoaderComponents, SkeletonError, SkeletonLoading,
    };
}
