use std::{future::Future, sync::Arc};

use crate::{
    errors::InjectError,
    resolver::{DiHandle, Resolver},
    types::{DependencyInfo, DependencyKey, Injectable},
};

impl<T: Injectable> Resolver for Arc<T> {
    fn resolve(handle: &DiHandle) -> Result<Self, InjectError> {
        handle.resolve::<T>()
    }

    fn aresolve(handle: &DiHandle) -> impl Future<Output = Result<Self, InjectError>> + Send {
        handle.aresolve::<T>()
    }

    fn dependency_info() -> DependencyInfo {
        DependencyInfo::required(DependencyKey::of::<T>())
    }
}

impl<Resolvable: Resolver> Resolver for Option<Resolvable> {
    fn resolve(handle: &DiHandle) -> Result<Self, InjectError> {
        absent_as_none::<Resolvable>(Resolvable::resolve(handle))
    }

    fn aresolve(handle: &DiHandle) -> impl Future<Output = Result<Self, InjectError>> + Send {
        let resolving = Resolvable::aresolve(handle);
        async move { absent_as_none::<Resolvable>(resolving.await) }
    }

    fn dependency_info() -> DependencyInfo {
        let original = Resolvable::dependency_info();
        DependencyInfo {
            optional: true,
            ..original
        }
    }
}

/// Only the wrapped key being unregistered yields `None`
///
/// A missing transitive dependency still fails.
fn absent_as_none<Resolvable: Resolver>(
    resolved: Result<Resolvable, InjectError>,
) -> Result<Option<Resolvable>, InjectError> {
    match resolved {
        Ok(resolved) => Ok(Some(resolved)),
        Err(InjectError::UnregisteredDependency { key, .. })
            if key == Resolvable::dependency_info().key =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
