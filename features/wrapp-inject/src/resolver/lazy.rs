use std::{
    fmt::Debug,
    future::Future,
    sync::{Arc, OnceLock},
};

use crate::{
    errors::InjectError,
    resolver::{DiHandle, Resolver},
    types::{DependencyInfo, DependencyKey, Injectable},
};

/// Lazily resolved dependency
///
/// Resolution happens on first access, with the scopes that were visible when the `Lazy` was
/// created. A lazy edge is not followed by graph validation, so it can close a cycle that would
/// otherwise be rejected.
///
/// Failed accesses are not remembered, the next access tries again.
pub struct Lazy<T: Injectable>(Arc<LazyInner<T>>);
struct LazyInner<T: Injectable> {
    once: OnceLock<Arc<T>>,
    handle: DiHandle,
}
impl<T: Injectable> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
impl<T: Injectable + Debug> Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Lazy").field(&self.0.once.get()).finish()
    }
}
impl<T: Injectable> Resolver for Lazy<T> {
    fn resolve(handle: &DiHandle) -> Result<Self, InjectError> {
        Ok(Lazy(Arc::new(LazyInner {
            once: OnceLock::new(),
            handle: handle.detached(),
        })))
    }

    fn aresolve(handle: &DiHandle) -> impl Future<Output = Result<Self, InjectError>> + Send {
        std::future::ready(Self::resolve(handle))
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo {
            key: DependencyKey::of::<T>(),
            optional: false,
            lazy: true,
        }
    }
}
impl<T: Injectable> Lazy<T> {
    /// Accesses the Lazy Dependency, resolving it on first use
    pub fn get(&self) -> Result<Arc<T>, InjectError> {
        if let Some(resolved) = self.0.once.get() {
            return Ok(resolved.clone());
        }
        let resolved = self.0.handle.resolve::<T>()?;
        Ok(self.0.once.get_or_init(|| resolved).clone())
    }

    /// Async access, required when the dependency has an async provider
    pub async fn aget(&self) -> Result<Arc<T>, InjectError> {
        if let Some(resolved) = self.0.once.get() {
            return Ok(resolved.clone());
        }
        let resolved = self.0.handle.aresolve::<T>().await?;
        Ok(self.0.once.get_or_init(|| resolved).clone())
    }

    /// Already resolved value, never triggers resolution
    pub fn try_get(&self) -> Option<&Arc<T>> {
        self.0.once.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.once.get().is_some()
    }
}
