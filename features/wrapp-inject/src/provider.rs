use std::{fmt::Debug, future::Future, marker::PhantomData, sync::Arc};

use futures::{future::BoxFuture, FutureExt, TryFutureExt};

use crate::{
    context::Cleanup,
    resolver::{DiHandle, Resolver},
    scope::Scope,
    types::{DependencyInfo, DependencyKey, DynError, Injectable, Instance},
};

/// A value with a release step, produced by a resource factory
///
/// The release closure runs once, when the scope that cached the value is closed.
pub struct Resource<T: Injectable> {
    value: T,
    release: Box<dyn FnOnce(&T) -> Result<(), DynError> + Send>,
}
impl<T: Injectable> Resource<T> {
    pub fn new<F, E>(value: T, release: F) -> Self
    where
        F: FnOnce(&T) -> Result<(), E> + Send + 'static,
        E: Into<DynError>,
    {
        Self {
            value,
            release: Box::new(move |value: &T| -> Result<(), DynError> {
                release(value).map_err(Into::into)
            }),
        }
    }

    fn into_built(self) -> Built {
        let value = Arc::new(self.value);
        let held = value.clone();
        let release = self.release;

        Built {
            instance: Instance::from_arc(value),
            cleanup: Some(Cleanup::Sync(Box::new(move || release(&held)))),
        }
    }
}

/// A value with an asynchronous release step, produced by an async resource factory
pub struct AsyncResource<T: Injectable> {
    value: T,
    release: Box<dyn FnOnce(Arc<T>) -> BoxFuture<'static, Result<(), DynError>> + Send>,
}
impl<T: Injectable> AsyncResource<T> {
    pub fn new<F, Fut, E>(value: T, release: F) -> Self
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<DynError> + 'static,
    {
        Self {
            value,
            release: Box::new(move |value: Arc<T>| {
                release(value).map_err(Into::<DynError>::into).boxed()
            }),
        }
    }

    fn into_built(self) -> Built {
        let value = Arc::new(self.value);
        let held = value.clone();
        let release = self.release;

        Built {
            instance: Instance::from_arc(value),
            cleanup: Some(Cleanup::Async(Box::new(move || release(held)))),
        }
    }
}

/// Opt-in for types that need setup and teardown around their cached lifetime
///
/// Registered through [Provider::closable], `open` runs right after construction and
/// `close` when the owning scope is closed. Transient registrations skip both.
pub trait Closable: Injectable {
    fn open(&self) -> Result<(), DynError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DynError>;
}

/// Asynchronous counterpart of [Closable], registered through [Provider::async_closable]
pub trait AsyncClosable: Injectable {
    fn open(&self) -> impl Future<Output = Result<(), DynError>> + Send {
        async { Ok(()) }
    }

    fn close(&self) -> impl Future<Output = Result<(), DynError>> + Send;
}

/// A constructed value plus the cleanup it pushes
pub(crate) struct Built {
    pub instance: Instance,
    pub cleanup: Option<Cleanup>,
}
impl Built {
    fn plain<T: Injectable>(value: T) -> Self {
        Built {
            instance: Instance::new(value),
            cleanup: None,
        }
    }
}

pub(crate) type SyncFactory = Box<dyn Fn(&DiHandle) -> Result<Built, DynError> + Send + Sync>;
pub(crate) type AsyncFactory =
    Box<dyn Fn(DiHandle) -> BoxFuture<'static, Result<Built, DynError>> + Send + Sync>;

pub(crate) enum Factory {
    /// Always returns the same pre-built value
    Value(Instance),
    Sync(SyncFactory),
    Async(AsyncFactory),
    /// Never constructed, the value must be set on the scoped context
    FromContext,
}

/// A registered provider: how to build one key and under which scope
///
/// Created with the [Provider] builder and handed to the container or [crate::DiBuilder].
pub struct ProviderDefinition {
    pub(crate) key: DependencyKey,
    pub(crate) scope: Scope,
    pub(crate) factory: Factory,
    pub(crate) dependencies: Vec<DependencyInfo>,
    pub(crate) is_resource: bool,
    pub(crate) override_existing: bool,
    pub(crate) eager: bool,
}
impl Debug for ProviderDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDefinition")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .field("is_resource", &self.is_resource)
            .field("is_async", &self.is_async())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}
impl ProviderDefinition {
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn dependencies(&self) -> &[DependencyInfo] {
        &self.dependencies
    }

    pub fn is_resource(&self) -> bool {
        self.is_resource
    }

    pub fn is_async(&self) -> bool {
        matches!(self.factory, Factory::Async(_))
    }

    pub fn is_from_context(&self) -> bool {
        matches!(self.factory, Factory::FromContext)
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn overrides_existing(&self) -> bool {
        self.override_existing
    }

    /// Checks shape rules that depend on the scope
    pub(crate) fn validate_shape(&self) -> Result<(), &'static str> {
        if self.scope.is_transient() {
            if self.is_resource {
                return Err("resources cannot be transient, nothing would release them");
            }
            if matches!(self.factory, Factory::Value(_)) {
                return Err("a fixed value cannot be transient");
            }
            if self.eager {
                return Err("transient providers cannot be eager");
            }
        }
        if self.is_from_context() && self.scope.is_builtin() {
            return Err("from-context providers need a request or custom scope");
        }
        if self.eager && !self.is_resource {
            return Err("only resources can be eager");
        }
        Ok(())
    }
}

/// Builder for a [ProviderDefinition]
///
/// ```rust,ignore
/// let repository = Provider::<Repository>::singleton()
///     .depends_on::<Arc<Database>>()
///     .factory(|di| Ok::<_, InjectError>(Repository::new(di.resolve()?)));
/// ```
pub struct Provider<T> {
    key: DependencyKey,
    scope: Scope,
    dependencies: Vec<DependencyInfo>,
    override_existing: bool,
    eager: bool,
    _marker: PhantomData<fn() -> T>,
}
impl<T: Injectable> Provider<T> {
    pub fn scoped(scope: impl Into<Scope>) -> Self {
        Self {
            key: DependencyKey::of::<T>(),
            scope: scope.into(),
            dependencies: Vec::new(),
            override_existing: false,
            eager: false,
            _marker: PhantomData,
        }
    }

    pub fn singleton() -> Self {
        Self::scoped(Scope::SINGLETON)
    }

    pub fn transient() -> Self {
        Self::scoped(Scope::TRANSIENT)
    }

    pub fn request() -> Self {
        Self::scoped(Scope::REQUEST)
    }

    /// Registers under a qualified key, resolved with `resolve_named`
    pub fn named(mut self, qualifier: &'static str) -> Self {
        self.key.qualifier = Some(qualifier);
        self
    }

    /// Declares a dependency for graph validation
    pub fn depends_on<R: Resolver>(mut self) -> Self {
        self.dependencies.push(R::dependency_info());
        self
    }

    pub fn depends_on_named<D: Injectable>(mut self, qualifier: &'static str) -> Self {
        self.dependencies
            .push(DependencyInfo::required(DependencyKey::named::<D>(qualifier)));
        self
    }

    /// Replaces an existing registration of the same key instead of failing
    pub fn override_existing(mut self) -> Self {
        self.override_existing = true;
        self
    }

    /// Constructs this resource when its scope is entered instead of on first use
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    fn finish(self, factory: Factory, is_resource: bool) -> ProviderDefinition {
        ProviderDefinition {
            key: self.key,
            scope: self.scope,
            factory,
            dependencies: self.dependencies,
            is_resource,
            override_existing: self.override_existing,
            eager: self.eager,
        }
    }

    pub fn factory<F, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(&DiHandle) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        let factory: SyncFactory = Box::new(move |di: &DiHandle| -> Result<Built, DynError> {
            factory(di).map(Built::plain).map_err(Into::into)
        });
        self.finish(Factory::Sync(factory), false)
    }

    pub fn async_factory<F, Fut, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(DiHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError> + 'static,
    {
        let factory: AsyncFactory = Box::new(move |di: DiHandle| {
            factory(di)
                .map_ok(Built::plain)
                .map_err(Into::<DynError>::into)
                .boxed()
        });
        self.finish(Factory::Async(factory), false)
    }

    pub fn resource<F, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(&DiHandle) -> Result<Resource<T>, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        let factory: SyncFactory = Box::new(move |di: &DiHandle| -> Result<Built, DynError> {
            factory(di)
                .map(Resource::into_built)
                .map_err(Into::into)
        });
        self.finish(Factory::Sync(factory), true)
    }

    pub fn async_resource<F, Fut, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(DiHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AsyncResource<T>, E>> + Send + 'static,
        E: Into<DynError> + 'static,
    {
        let factory: AsyncFactory = Box::new(move |di: DiHandle| {
            factory(di)
                .map_ok(AsyncResource::into_built)
                .map_err(Into::<DynError>::into)
                .boxed()
        });
        self.finish(Factory::Async(factory), true)
    }

    /// Registers a value that is set from outside the graph with `ScopedContext::set`
    pub fn from_context(self) -> ProviderDefinition {
        self.finish(Factory::FromContext, false)
    }

    /// Registers a pre-built value
    pub fn value(self, value: T) -> ProviderDefinition {
        self.finish(Factory::Value(Instance::new(value)), false)
    }
}

impl<T: Closable> Provider<T> {
    pub fn closable<F, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(&DiHandle) -> Result<T, E> + Send + Sync + 'static,
        E: Into<DynError>,
    {
        if self.scope.is_transient() {
            return self.factory(factory);
        }

        let factory: SyncFactory = Box::new(move |di: &DiHandle| -> Result<Built, DynError> {
            let value = Arc::new(factory(di).map_err(Into::into)?);
            value.open()?;
            let held = value.clone();
            Ok(Built {
                instance: Instance::from_arc(value),
                cleanup: Some(Cleanup::Sync(Box::new(move || held.close()))),
            })
        });
        self.finish(Factory::Sync(factory), true)
    }
}

impl<T: AsyncClosable> Provider<T> {
    pub fn async_closable<F, Fut, E>(self, factory: F) -> ProviderDefinition
    where
        F: Fn(DiHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DynError> + 'static,
    {
        if self.scope.is_transient() {
            return self.async_factory(factory);
        }

        let factory: AsyncFactory = Box::new(move |di: DiHandle| {
            let constructing = factory(di);
            async move {
                let value = Arc::new(constructing.await.map_err(Into::<DynError>::into)?);
                value.open().await?;
                let held = value.clone();
                Ok::<_, DynError>(Built {
                    instance: Instance::from_arc(value),
                    cleanup: Some(Cleanup::Async(Box::new(move || {
                        async move { held.close().await }.boxed()
                    }))),
                })
            }
            .boxed()
        });
        self.finish(Factory::Async(factory), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InjectError;

    struct Pool;
    impl Closable for Pool {
        fn close(&self) -> Result<(), DynError> {
            Ok(())
        }
    }

    #[test]
    fn builder_records_metadata() {
        let definition = Provider::<String>::request()
            .named("greeting")
            .depends_on::<Arc<u32>>()
            .override_existing()
            .factory(|_| Ok::<_, InjectError>("hi".to_string()));

        assert_eq!(definition.key(), &DependencyKey::named::<String>("greeting"));
        assert_eq!(definition.scope(), &Scope::REQUEST);
        assert_eq!(definition.dependencies().len(), 1);
        assert!(definition.overrides_existing());
        assert!(!definition.is_resource());
        assert!(!definition.is_async());
    }

    #[test]
    fn transient_shapes_are_rejected() {
        let resource = Provider::<u32>::transient()
            .resource(|_| Ok::<_, InjectError>(Resource::new(1, |_| Ok::<_, InjectError>(()))));
        assert!(resource.validate_shape().is_err());

        let from_context = Provider::<u32>::singleton().from_context();
        assert!(from_context.validate_shape().is_err());

        let eager_plain = Provider::<u32>::request()
            .eager()
            .factory(|_| Ok::<_, InjectError>(1));
        assert!(eager_plain.validate_shape().is_err());
    }

    #[test]
    fn transient_closable_is_a_plain_value() {
        let transient = Provider::<Pool>::transient().closable(|_| Ok::<_, InjectError>(Pool));
        let singleton = Provider::<Pool>::singleton().closable(|_| Ok::<_, InjectError>(Pool));

        assert!(!transient.is_resource());
        assert!(singleton.is_resource());
        assert!(transient.validate_shape().is_ok());
    }
}
