//! Lazy loading of Dioxus components with loading placeholders, error
//! fallbacks, minimum display time, timeout detection and retry policy.
//!
//! The loading lifecycle itself lives in [`controller`] and does not depend
//! on Dioxus; [`helper_hooks`] and [`loaded`] bind it to components.

pub mod config;
pub mod controller;
pub mod helper_hooks;
pub mod loaded;
pub mod utils;

pub mod prelude {
    pub use super::config::LoaderOptions;
    pub use super::controller::{
        create_loader, AsyncLoadController, LoadError, LoadPolicy, LoadRequest, LoadState,
        LoaderEvent, LoaderHandle, ModuleResolver, NoResolver, Reference, RegistryResolver,
    };
    pub use super::helper_hooks::prelude::*;
    pub use super::helper_hooks::{use_async_loader, use_loader_options, use_module_resolver};
    pub use super::loaded::prelude::*;
    pub use super::utils::CCStr;
    pub use dioxus::prelude::*;
}
