use std::future::Future;
use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};

use super::LoadPolicy;
use crate::utils::CCStr;

/// The future produced when fetching a module.
pub type ModuleFetch<M> = LocalBoxFuture<'static, Result<M, CCStr>>;

type Factory<M> = Rc<dyn Fn() -> ModuleFetch<M>>;

/// What to load.
pub enum Reference<M> {
    /// Resolved through the [`ModuleResolver`] given to the controller
    Path(CCStr),
    /// Called once per attempt
    Factory(Factory<M>),
    /// Already available, only the timing policy applies
    Inline(M),
}

impl<M: 'static> Reference<M> {
    pub fn path(path: impl Into<CCStr>) -> Self {
        Self::Path(path.into())
    }

    pub fn factory<F, Fut, E>(factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<M, E>> + 'static,
        E: core::fmt::Display,
    {
        Self::Factory(Rc::new(move || {
            factory()
                .map(|result| result.map_err(|e| CCStr::from(e.to_string())))
                .boxed_local()
        }))
    }

    /// Short human readable description used in logs and error messages.
    pub fn label(&self) -> CCStr {
        match self {
            Self::Path(path) => path.clone(),
            Self::Factory(_) => CCStr::from("factory"),
            Self::Inline(_) => CCStr::from("inline"),
        }
    }
}

impl<M: Clone + 'static> Reference<M> {
    pub(super) fn fetch(&self, resolver: &dyn ModuleResolver<M>) -> ModuleFetch<M> {
        match self {
            Self::Path(path) => resolver.resolve(path),
            Self::Factory(factory) => factory(),
            Self::Inline(module) => future::ready(Ok(module.clone())).boxed_local(),
        }
    }
}

impl<M: Clone> Clone for Reference<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Path(path) => Self::Path(path.clone()),
            Self::Factory(factory) => Self::Factory(Rc::clone(factory)),
            Self::Inline(module) => Self::Inline(module.clone()),
        }
    }
}

impl<M: PartialEq> PartialEq for Reference<M> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Factory(a), Self::Factory(b)) => Rc::ptr_eq(a, b),
            (Self::Inline(a), Self::Inline(b)) => a == b,
            _ => false,
        }
    }
}

impl<M> core::fmt::Debug for Reference<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Factory(_) => f.debug_tuple("Factory").finish_non_exhaustive(),
            Self::Inline(_) => f.debug_tuple("Inline").finish_non_exhaustive(),
        }
    }
}

/// A deferred unit together with the policy to load it with.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest<M> {
    pub reference: Reference<M>,
    pub policy: LoadPolicy,
}

impl<M> LoadRequest<M> {
    pub fn new(reference: Reference<M>, policy: LoadPolicy) -> Self {
        Self { reference, policy }
    }
}

/// Host capability turning a path into a module.
pub trait ModuleResolver<M> {
    fn resolve(&self, path: &str) -> ModuleFetch<M>;
}

impl<M, F> ModuleResolver<M> for F
where
    F: Fn(&str) -> ModuleFetch<M>,
{
    fn resolve(&self, path: &str) -> ModuleFetch<M> {
        self(path)
    }
}

/// Resolver for hosts that only use factories and inline modules.
pub struct NoResolver;
impl<M: 'static> ModuleResolver<M> for NoResolver {
    fn resolve(&self, path: &str) -> ModuleFetch<M> {
        let message = CCStr::from(format!("no module resolver configured for {path}"));
        future::ready(Err(message)).boxed_local()
    }
}

/// Resolver backed by a fixed table of modules, keyed by full path.
pub struct RegistryResolver<M> {
    modules: std::collections::HashMap<CCStr, M>,
}

impl<M> Default for RegistryResolver<M> {
    fn default() -> Self {
        Self {
            modules: Default::default(),
        }
    }
}

impl<M> RegistryResolver<M> {
    pub fn register(mut self, path: impl Into<CCStr>, module: M) -> Self {
        self.modules.insert(path.into(), module);
        self
    }
}

impl<M: Clone + 'static> ModuleResolver<M> for RegistryResolver<M> {
    fn resolve(&self, path: &str) -> ModuleFetch<M> {
        let result = self
            .modules
            .get(path)
            .cloned()
            .ok_or_else(|| CCStr::from(format!("cannot find module {path}")));
        future::ready(result).boxed_local()
    }
}
