mod async_loader;

pub use async_loader::{use_async_loader, use_loader_options, use_module_resolver};

pub mod prelude {
    pub use super::async_loader::{DioxusSpawner, LoaderSignal, LoaderView, SharedResolver};
    pub mod helper_hooks {
        pub use super::super::async_loader::{
            use_async_loader, use_loader_options, use_module_resolver,
        };
    }
}
