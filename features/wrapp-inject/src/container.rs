use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use crate::{
    builder::DiBuilder,
    config::ContainerConfig,
    context::ScopeContext,
    dependency_graph::DependencyGraph,
    errors::InjectError,
    overrides::{OverrideGuard, OverrideStack},
    provider::ProviderDefinition,
    registry::Registry,
    resolver::{
        strategy::{self, ResolutionStrategy},
        DiHandle, Resolver,
    },
    scope::{Scope, ScopeGraph},
    types::{DependencyKey, Injectable, Instance},
};

/// Container holding providers, scopes and the singleton instances
///
/// Cheap to clone, all clones share the same state. Registration is expected to happen before
/// resolution starts, mutating the registry while other threads resolve is not coordinated.
#[derive(Clone)]
pub struct Container(pub(crate) Arc<ContainerInner>);
pub(crate) struct ContainerInner {
    config: ContainerConfig,
    registry: RwLock<Registry>,
    scopes: RwLock<ScopeGraph>,
    singleton: RwLock<Arc<ScopeContext>>,
    started: AtomicBool,
    pub(crate) overrides: Arc<OverrideStack>,
    pub(crate) strategy: Box<dyn ResolutionStrategy>,
}
impl ContainerInner {
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn scopes(&self) -> RwLockReadGuard<'_, ScopeGraph> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn singleton(&self) -> Arc<ScopeContext> {
        self.singleton
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in a fresh singleton context, returning the old one for teardown
    fn replace_singleton(&self) -> Arc<ScopeContext> {
        let fresh = ScopeContext::new(Scope::SINGLETON, None);
        let mut singleton = self.singleton.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *singleton, fresh)
    }
}
impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.0.registry();
        let mut map = f.debug_map();
        for provider in registry.iter() {
            map.entry(&provider.key.to_string(), &provider.scope.name());
        }
        map.finish()
    }
}
impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self(Arc::new(ContainerInner {
            config,
            registry: RwLock::new(Registry::default()),
            scopes: RwLock::new(ScopeGraph::new()),
            singleton: RwLock::new(ScopeContext::new(Scope::SINGLETON, None)),
            started: AtomicBool::new(false),
            overrides: Arc::new(OverrideStack::default()),
            strategy: strategy::for_testing(config.testing),
        }))
    }

    pub fn builder() -> DiBuilder {
        DiBuilder::new()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.0.config
    }

    /// Handle resolving against the singleton context only
    pub fn handle(&self) -> DiHandle {
        DiHandle::new(self.0.clone(), None)
    }
}

// Registration
impl Container {
    /// Registers a provider
    ///
    /// The dependency graph is not checked here, so providers can be registered in any order.
    /// Use [Container::build] to validate everything up front.
    pub fn register(&self, definition: ProviderDefinition) -> Result<(), InjectError> {
        let key = definition.key;
        definition
            .validate_shape()
            .map_err(|reason| InjectError::InvalidProvider { key, reason })?;

        let mut registry = self.0.registry_mut();
        if !self.0.scopes().contains(&definition.scope) {
            return Err(InjectError::UnknownScope(definition.scope));
        }
        let replaces = registry.contains(&key);
        registry.register(definition)?;
        self.0.strategy.invalidate();
        drop(registry);

        if replaces {
            self.0.singleton().release(&key);
        }
        Ok(())
    }

    /// Removes a provider and evicts its cached singleton
    ///
    /// Unknown keys are ignored unless the container is strict.
    pub fn unregister(&self, key: &DependencyKey) -> Result<(), InjectError> {
        let mut registry = self.0.registry_mut();
        if registry.unregister(key).is_none() {
            if self.0.config.strict {
                return Err(InjectError::NotRegistered(*key));
            }
            return Ok(());
        }
        self.0.strategy.invalidate();
        drop(registry);

        self.0.singleton().release(key);
        Ok(())
    }

    pub fn is_registered(&self, key: &DependencyKey) -> bool {
        self.0.registry().contains(key)
    }

    /// Registers a custom scope, parents must be registered first
    pub fn register_scope(
        &self,
        scope: impl Into<Scope>,
        parents: &[Scope],
    ) -> Result<(), InjectError> {
        let scope = scope.into();
        let mut scopes = self.0.scopes.write().unwrap_or_else(PoisonError::into_inner);
        scopes.register(scope, parents.to_vec())
    }

    /// Validates the whole dependency graph
    ///
    /// Reports every missing dependency, cycle and scope mismatch at once. No factory is run.
    pub fn build(&self) -> Result<(), InjectError> {
        {
            let registry = self.0.registry();
            let scopes = self.0.scopes();
            tracing::debug!("Validating {} provider(s)", registry.len());
            DependencyGraph::new(&registry, &scopes).check()?;
        }
        self.0.strategy.compile(&self.0);
        Ok(())
    }
}

// Resolution
impl Container {
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.handle().resolve::<T>()
    }

    pub fn resolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.handle().resolve_named::<T>(qualifier)
    }

    pub async fn aresolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.handle().aresolve::<T>().await
    }

    pub async fn aresolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.handle().aresolve_named::<T>(qualifier).await
    }

    pub fn get<R: Resolver>(&self) -> Result<R, InjectError> {
        self.handle().get::<R>()
    }

    pub async fn aget<R: Resolver>(&self) -> Result<R, InjectError> {
        self.handle().aget::<R>().await
    }

    /// Whether a singleton instance is currently cached
    pub fn is_resolved(&self, key: &DependencyKey) -> bool {
        self.0.singleton().contains(key)
    }

    /// Evicts a cached singleton, its cleanup still runs on `close`
    pub fn release(&self, key: &DependencyKey) -> bool {
        self.0.singleton().release(key)
    }

    /// Evicts every cached singleton
    pub fn reset(&self) {
        tracing::debug!("Resetting singleton instances");
        self.0.singleton().release_all();
    }
}

// Lifecycle
impl Container {
    pub fn is_started(&self) -> bool {
        self.0.started.load(Ordering::Acquire)
    }

    /// Starts the container, constructing every singleton resource in registration order
    ///
    /// If a resource fails, the ones already constructed are released again.
    pub fn start(&self) -> Result<(), InjectError> {
        self.mark_started()?;
        let eager = self.0.registry().eager_in(&Scope::SINGLETON);
        tracing::debug!("Starting container with {} singleton resource(s)", eager.len());

        let handle = self.handle();
        for key in eager {
            if let Err(error) = handle.resolve_key(&key) {
                self.0.started.store(false, Ordering::Release);
                if let Err(cleanup) = self.0.replace_singleton().close() {
                    tracing::error!("{}", cleanup);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    pub async fn astart(&self) -> Result<(), InjectError> {
        self.mark_started()?;
        let eager = self.0.registry().eager_in(&Scope::SINGLETON);
        tracing::debug!("Starting container with {} singleton resource(s)", eager.len());

        let handle = self.handle();
        for key in eager {
            if let Err(error) = handle.aresolve_key(key).await {
                self.0.started.store(false, Ordering::Release);
                if let Err(cleanup) = self.0.replace_singleton().aclose().await {
                    tracing::error!("{}", cleanup);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Releases all singleton resources in reverse construction order
    ///
    /// Every cleanup runs even if earlier ones fail, failures are returned together.
    /// The container starts over with an empty singleton context and can be started again.
    pub fn close(&self) -> Result<(), InjectError> {
        self.mark_stopped()?;
        self.0.replace_singleton().close()?;
        Ok(())
    }

    pub async fn aclose(&self) -> Result<(), InjectError> {
        self.mark_stopped()?;
        self.0.replace_singleton().aclose().await?;
        Ok(())
    }

    fn mark_started(&self) -> Result<(), InjectError> {
        if self.0.started.swap(true, Ordering::AcqRel) {
            return Err(InjectError::AlreadyStarted);
        }
        Ok(())
    }

    fn mark_stopped(&self) -> Result<(), InjectError> {
        if !self.0.started.swap(false, Ordering::AcqRel) {
            return Err(InjectError::NotStarted);
        }
        tracing::debug!("Closing container");
        Ok(())
    }
}

// Scopes
impl Container {
    /// Activates a scope, the returned guard owns the activation
    ///
    /// Eager resources of the scope are constructed before this returns.
    pub fn scoped_context(&self, scope: impl Into<Scope>) -> Result<ScopedContext, InjectError> {
        ScopedContext::enter(self.handle(), scope.into())
    }

    pub async fn ascoped_context(
        &self,
        scope: impl Into<Scope>,
    ) -> Result<ScopedContext, InjectError> {
        ScopedContext::aenter(self.handle(), scope.into()).await
    }
}

// Overrides
impl Container {
    /// Substitutes `value` for every resolution of `T` until the guard is dropped
    ///
    /// Only available on containers configured for testing.
    pub fn override_with<T: Injectable>(&self, value: T) -> Result<OverrideGuard, InjectError> {
        self.override_instance(DependencyKey::of::<T>(), Instance::new(value))
    }

    pub fn override_named<T: Injectable>(
        &self,
        qualifier: &'static str,
        value: T,
    ) -> Result<OverrideGuard, InjectError> {
        self.override_instance(DependencyKey::named::<T>(qualifier), Instance::new(value))
    }

    fn override_instance(
        &self,
        key: DependencyKey,
        instance: Instance,
    ) -> Result<OverrideGuard, InjectError> {
        if !self.0.strategy.supports_overrides() {
            return Err(InjectError::OverridesDisabled);
        }
        if self.0.config.strict && !self.is_registered(&key) {
            return Err(InjectError::NotRegistered(key));
        }

        let id = self.0.overrides.push(key, instance);
        Ok(OverrideGuard {
            stack: self.0.overrides.clone(),
            key,
            id,
        })
    }
}

/// One activation of a scope, closed when the guard is closed or dropped
///
/// Resolutions through the guard, or through handles derived from it, see this activation, its
/// enclosing activations and the singleton context. Another guard for the same scope never
/// shares instances with this one.
///
/// Dropping the guard runs all releases on the dropping thread, async releases included.
/// Prefer [ScopedContext::aclose] inside async code.
pub struct ScopedContext {
    handle: DiHandle,
    context: Arc<ScopeContext>,
}
impl Debug for ScopedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedContext")
            .field("scope", self.context.scope())
            .field("id", &self.context.id())
            .finish()
    }
}

impl ScopedContext {
    fn activate(parent: DiHandle, scope: Scope) -> Result<Self, InjectError> {
        if scope.is_builtin() {
            return Err(InjectError::ReservedScope(scope));
        }
        if !parent.inner.scopes().contains(&scope) {
            return Err(InjectError::UnknownScope(scope));
        }

        let context = ScopeContext::new(scope, parent.active.clone());
        let handle = DiHandle::new(parent.inner, Some(context.clone()));
        Ok(Self { handle, context })
    }

    fn enter(parent: DiHandle, scope: Scope) -> Result<Self, InjectError> {
        let scoped = Self::activate(parent, scope)?;
        let eager = scoped.handle.inner.registry().eager_in(scoped.scope());
        for key in eager {
            if let Err(error) = scoped.handle.resolve_key(&key) {
                if let Err(cleanup) = scoped.context.close() {
                    tracing::error!("{}", cleanup);
                }
                return Err(error);
            }
        }
        Ok(scoped)
    }

    async fn aenter(parent: DiHandle, scope: Scope) -> Result<Self, InjectError> {
        let scoped = Self::activate(parent, scope)?;
        let eager = scoped.handle.inner.registry().eager_in(scoped.scope());
        for key in eager {
            if let Err(error) = scoped.handle.aresolve_key(key).await {
                if let Err(cleanup) = scoped.context.aclose().await {
                    tracing::error!("{}", cleanup);
                }
                return Err(error);
            }
        }
        Ok(scoped)
    }

    pub fn scope(&self) -> &Scope {
        self.context.scope()
    }

    /// Unique id of this activation
    pub fn id(&self) -> u64 {
        self.context.id()
    }

    /// Handle resolving within this activation, can be cloned into spawned tasks
    pub fn handle(&self) -> DiHandle {
        self.handle.clone()
    }

    /// Makes a value available to resolutions in this activation
    pub fn set<T: Injectable>(&self, value: T) {
        self.context
            .set_external(DependencyKey::of::<T>(), Instance::new(value));
    }

    pub fn set_named<T: Injectable>(&self, qualifier: &'static str, value: T) {
        self.context
            .set_external(DependencyKey::named::<T>(qualifier), Instance::new(value));
    }

    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.handle.resolve::<T>()
    }

    pub fn resolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.handle.resolve_named::<T>(qualifier)
    }

    pub async fn aresolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.handle.aresolve::<T>().await
    }

    pub async fn aresolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.handle.aresolve_named::<T>(qualifier).await
    }

    pub fn get<R: Resolver>(&self) -> Result<R, InjectError> {
        self.handle.get::<R>()
    }

    pub async fn aget<R: Resolver>(&self) -> Result<R, InjectError> {
        self.handle.aget::<R>().await
    }

    /// Whether an instance or value for the key is held by a visible activation
    pub fn is_resolved(&self, key: &DependencyKey) -> bool {
        let mut current = Some(&self.context);
        while let Some(context) = current {
            if context.contains(key) {
                return true;
            }
            current = context.parent();
        }
        self.handle.inner.singleton().contains(key)
    }

    /// Activates a child scope whose lookups fall back to this activation
    pub fn scoped_context(&self, scope: impl Into<Scope>) -> Result<ScopedContext, InjectError> {
        ScopedContext::enter(self.handle.clone(), scope.into())
    }

    pub async fn ascoped_context(
        &self,
        scope: impl Into<Scope>,
    ) -> Result<ScopedContext, InjectError> {
        ScopedContext::aenter(self.handle.clone(), scope.into()).await
    }

    /// Runs every release of this activation in reverse construction order
    pub fn close(self) -> Result<(), InjectError> {
        self.context.close()?;
        Ok(())
    }

    pub async fn aclose(self) -> Result<(), InjectError> {
        self.context.aclose().await?;
        Ok(())
    }
}
impl Drop for ScopedContext {
    fn drop(&mut self) {
        if self.context.is_closed() {
            return;
        }
        if let Err(errors) = self.context.close() {
            tracing::error!("{}", errors);
        }
    }
}
