use std::{
    any::type_name,
    collections::HashMap,
    fmt::Debug,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{future::BoxFuture, FutureExt};

use crate::{
    container::{Container, ContainerInner},
    context::{Cleanup, Commit, ScopeContext},
    errors::InjectError,
    provider::{Built, Factory, ProviderDefinition},
    scope::Scope,
    types::{DependencyInfo, DependencyKey, Injectable, Instance},
};

pub mod arc;
pub mod lazy;
pub(crate) mod strategy;

pub use lazy::Lazy;

/// Allows custom behaviour on injection
///
/// Implemented for `Arc<T>`, `Option<R>` and [Lazy]. Providers declare their dependencies
/// as resolvers, see [crate::Provider::depends_on].
pub trait Resolver: Sized + Send {
    fn resolve(handle: &DiHandle) -> Result<Self, InjectError>;

    fn aresolve(handle: &DiHandle) -> impl Future<Output = Result<Self, InjectError>> + Send;

    fn dependency_info() -> DependencyInfo;
}

/// The provider currently being constructed
#[derive(Clone)]
struct Consumer {
    key: DependencyKey,
    /// Scope used for compatibility checks, a transient inherits it from its own consumer
    scope: Option<Scope>,
}

/// One provider on the chain, `building` is cleared once its factory has returned
#[derive(Clone)]
struct Link {
    key: DependencyKey,
    building: Arc<AtomicBool>,
}

/// Marks a link finished when dropped, also when the construction is cancelled
struct Building(Arc<AtomicBool>);
impl Drop for Building {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What a resolution needs after lookups
enum Step {
    Ready(Instance),
    Construct {
        provider: Arc<ProviderDefinition>,
        context: Option<Arc<ScopeContext>>,
    },
}

/// Outcome of storing a built instance, plus a release the caller still has to run
struct Settled {
    result: Result<Instance, InjectError>,
    leftover: Option<(DependencyKey, Cleanup)>,
}

/// DI Handle for resolving dependencies
///
/// Handed to every factory and exposed by the container and scoped contexts. A handle sees the
/// singleton context plus the scope activation it was derived from (and that activation's
/// parents), and tracks the chain of providers under construction to detect cycles.
#[derive(Clone)]
pub struct DiHandle {
    pub(crate) inner: Arc<ContainerInner>,
    pub(crate) active: Option<Arc<ScopeContext>>,
    chain: Vec<Link>,
    consumer: Option<Consumer>,
    /// Set when this construction consumed an overridden value somewhere below it
    tainted: Arc<AtomicBool>,
    /// Dependencies awaited ahead of a synchronous factory in async mode
    prefetched: Arc<HashMap<DependencyKey, Instance>>,
}
impl Debug for DiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiHandle")
            .field("active", &self.active.as_ref().map(|c| (c.scope().clone(), c.id())))
            .field("chain", &self.building_chain())
            .finish()
    }
}

impl DiHandle {
    pub(crate) fn new(inner: Arc<ContainerInner>, active: Option<Arc<ScopeContext>>) -> Self {
        Self {
            inner,
            active,
            chain: Vec::new(),
            consumer: None,
            tainted: Arc::new(AtomicBool::new(false)),
            prefetched: Arc::default(),
        }
    }

    /// The container this handle resolves from
    pub fn container(&self) -> Container {
        Container(self.inner.clone())
    }

    /// Scope of the innermost activation visible to this handle
    pub fn active_scope(&self) -> Option<&Scope> {
        self.active.as_ref().map(|c| c.scope())
    }

    pub fn get<R: Resolver>(&self) -> Result<R, InjectError> {
        R::resolve(self)
    }

    pub async fn aget<R: Resolver>(&self) -> Result<R, InjectError> {
        R::aresolve(self).await
    }

    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.resolve_key(&DependencyKey::of::<T>()).and_then(downcast)
    }

    pub fn resolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.resolve_key(&DependencyKey::named::<T>(qualifier))
            .and_then(downcast)
    }

    pub async fn aresolve<T: Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.aresolve_key(DependencyKey::of::<T>())
            .await
            .and_then(downcast)
    }

    pub async fn aresolve_named<T: Injectable>(
        &self,
        qualifier: &'static str,
    ) -> Result<Arc<T>, InjectError> {
        self.aresolve_key(DependencyKey::named::<T>(qualifier))
            .await
            .and_then(downcast)
    }

    /// Resolves a key synchronously, failing on async providers
    pub fn resolve_key(&self, key: &DependencyKey) -> Result<Instance, InjectError> {
        match self.prepare(key)? {
            Step::Ready(instance) => Ok(instance),
            Step::Construct { provider, context } => self.construct(provider, context),
        }
    }

    /// Resolves a key, awaiting async factories and resources
    pub fn aresolve_key(
        &self,
        key: DependencyKey,
    ) -> BoxFuture<'static, Result<Instance, InjectError>> {
        let this = self.clone();
        async move {
            match this.prepare(&key)? {
                Step::Ready(instance) => Ok(instance),
                Step::Construct { provider, context } => this.aconstruct(provider, context).await,
            }
        }
        .boxed()
    }

    /// Handle for deferred resolution
    ///
    /// Keeps the visible scopes, the consumer and the chain. Links drop out of the chain as their
    /// constructions finish, so only an access while an owner is still being built is a cycle.
    pub(crate) fn detached(&self) -> DiHandle {
        DiHandle {
            inner: self.inner.clone(),
            active: self.active.clone(),
            chain: self.chain.clone(),
            consumer: self.consumer.clone(),
            tainted: Arc::new(AtomicBool::new(false)),
            prefetched: Arc::default(),
        }
    }

    /// Keys still under construction, outermost first
    fn building_chain(&self) -> Vec<DependencyKey> {
        self.chain
            .iter()
            .filter(|link| link.building.load(Ordering::Acquire))
            .map(|link| link.key)
            .collect()
    }

    fn taint(&self) {
        self.tainted.store(true, Ordering::Release);
    }

    fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }

    /// Overrides, validation and cache lookups shared by both execution models
    fn prepare(&self, key: &DependencyKey) -> Result<Step, InjectError> {
        if let Some(instance) = self.inner.strategy.intercept(&self.inner.overrides, key) {
            tracing::trace!("Resolved '{}' from override", key);
            self.taint();
            return Ok(Step::Ready(instance));
        }
        if let Some(instance) = self.prefetched.get(key) {
            return Ok(Step::Ready(instance.clone()));
        }

        let Some(provider) = self.inner.strategy.provider(&self.inner, key)? else {
            // Values set on an activation resolve even without a provider
            return self.external(key).map(Step::Ready).ok_or_else(|| {
                InjectError::UnregisteredDependency {
                    key: *key,
                    required_by: self.consumer.as_ref().map(|c| c.key),
                }
            });
        };

        if let Some(Consumer {
            key: consumer,
            scope: Some(consumer_scope),
        }) = &self.consumer
        {
            if !self.inner.scopes().allows(consumer_scope, &provider.scope) {
                return Err(InjectError::ScopeMismatch {
                    consumer: *consumer,
                    consumer_scope: consumer_scope.clone(),
                    dependency: *key,
                    dependency_scope: provider.scope.clone(),
                });
            }
        }

        let building = self.building_chain();
        if let Some(start) = building.iter().position(|k| k == key) {
            let mut chain = building[start..].to_vec();
            chain.push(*key);
            return Err(InjectError::CircularDependency { chain });
        }

        if provider.scope.is_transient() {
            return Ok(Step::Construct {
                provider,
                context: None,
            });
        }

        let context = self.locate(&provider.scope, key)?;
        if let Some(instance) = context.lookup(key) {
            if !self.inner.strategy.shadowed(&self.inner, key) {
                tracing::trace!(
                    "Resolved '{}' from '{}' scope #{}",
                    key,
                    context.scope(),
                    context.id()
                );
                return Ok(Step::Ready(instance));
            }
            // The cached instance was built from what an override now replaces
            tracing::trace!("Rebuilding '{}' around an active override", key);
        }
        if provider.is_from_context() {
            return Err(InjectError::ContextValueMissing {
                scope: provider.scope.clone(),
                key: *key,
            });
        }

        Ok(Step::Construct {
            provider,
            context: Some(context),
        })
    }

    /// Finds the activation that owns instances of `scope`
    fn locate(&self, scope: &Scope, key: &DependencyKey) -> Result<Arc<ScopeContext>, InjectError> {
        if scope.is_singleton() {
            return Ok(self.inner.singleton());
        }

        let mut current = self.active.as_ref();
        while let Some(context) = current {
            if context.scope() == scope && !context.is_closed() {
                return Ok(context.clone());
            }
            current = context.parent();
        }
        Err(InjectError::ScopeNotActive {
            scope: scope.clone(),
            key: *key,
        })
    }

    fn external(&self, key: &DependencyKey) -> Option<Instance> {
        let mut current = self.active.as_ref();
        while let Some(context) = current {
            if let Some(instance) = context.lookup(key) {
                return Some(instance);
            }
            current = context.parent();
        }
        None
    }

    /// Handle passed to the factory of `provider`, finished links are left behind
    fn child(&self, provider: &ProviderDefinition) -> (DiHandle, Building) {
        let building = Arc::new(AtomicBool::new(true));
        let mut chain: Vec<Link> = self
            .chain
            .iter()
            .filter(|link| link.building.load(Ordering::Acquire))
            .cloned()
            .collect();
        chain.push(Link {
            key: provider.key,
            building: building.clone(),
        });

        let scope = match provider.scope.is_transient() {
            true => self.consumer.as_ref().and_then(|c| c.scope.clone()),
            false => Some(provider.scope.clone()),
        };

        let child = DiHandle {
            inner: self.inner.clone(),
            active: self.active.clone(),
            chain,
            consumer: Some(Consumer {
                key: provider.key,
                scope,
            }),
            tainted: Arc::new(AtomicBool::new(false)),
            prefetched: Arc::default(),
        };
        (child, Building(building))
    }

    /// Awaits the declared dependencies a synchronous factory is about to resolve
    ///
    /// Cached values land in their scopes anyway, the rest is kept on the handle so the factory
    /// finds transient and uncached instances without running their async providers itself.
    async fn prefetch(&mut self, provider: &ProviderDefinition) -> Result<(), InjectError> {
        let mut prefetched = HashMap::new();
        for dependency in provider.dependencies.iter().filter(|d| !d.lazy) {
            match self.aresolve_key(dependency.key).await {
                Ok(instance) => {
                    prefetched.insert(dependency.key, instance);
                }
                Err(InjectError::UnregisteredDependency { key, .. })
                    if dependency.optional && key == dependency.key => {}
                Err(error) => return Err(error),
            }
        }
        self.prefetched = Arc::new(prefetched);
        Ok(())
    }

    fn construct(
        &self,
        provider: Arc<ProviderDefinition>,
        context: Option<Arc<ScopeContext>>,
    ) -> Result<Instance, InjectError> {
        let key = provider.key;
        let (child, building) = self.child(&provider);
        let built = match &provider.factory {
            Factory::Value(instance) => Built {
                instance: instance.clone(),
                cleanup: None,
            },
            Factory::Sync(factory) => {
                tracing::debug!("Constructing '{}'", key);
                factory(&child).map_err(|error| InjectError::from_factory(key, error))?
            }
            Factory::Async(_) => return Err(InjectError::AsyncOnlyProvider(key)),
            Factory::FromContext => {
                return Err(InjectError::ContextValueMissing {
                    scope: provider.scope.clone(),
                    key,
                })
            }
        };
        drop(building);

        let settled = self.settle(&provider, context, built, child.is_tainted());
        if let Some((key, cleanup)) = settled.leftover {
            if let Err(error) = cleanup.run_blocking() {
                tracing::error!("Cleanup of discarded '{}' failed: {}", key, error);
            }
        }
        settled.result
    }

    async fn aconstruct(
        &self,
        provider: Arc<ProviderDefinition>,
        context: Option<Arc<ScopeContext>>,
    ) -> Result<Instance, InjectError> {
        let key = provider.key;
        let (mut child, building) = self.child(&provider);
        let built = match &provider.factory {
            Factory::Value(instance) => Built {
                instance: instance.clone(),
                cleanup: None,
            },
            Factory::Sync(factory) => {
                child.prefetch(&provider).await?;
                tracing::debug!("Constructing '{}'", key);
                factory(&child).map_err(|error| InjectError::from_factory(key, error))?
            }
            Factory::Async(factory) => {
                tracing::debug!("Constructing '{}' asynchronously", key);
                factory(child.clone())
                    .await
                    .map_err(|error| InjectError::from_factory(key, error))?
            }
            Factory::FromContext => {
                return Err(InjectError::ContextValueMissing {
                    scope: provider.scope.clone(),
                    key,
                })
            }
        };
        drop(building);

        let settled = self.settle(&provider, context, built, child.is_tainted());
        if let Some((key, cleanup)) = settled.leftover {
            if let Err(error) = cleanup.run().await {
                tracing::error!("Cleanup of discarded '{}' failed: {}", key, error);
            }
        }
        settled.result
    }

    /// Stores a built instance in its activation and registers its release
    fn settle(
        &self,
        provider: &ProviderDefinition,
        context: Option<Arc<ScopeContext>>,
        built: Built,
        tainted: bool,
    ) -> Settled {
        let key = provider.key;
        let Built { instance, cleanup } = built;

        if tainted {
            // Built from an override, must not outlive it through the cache
            self.taint();
        }

        let Some(context) = context else {
            return Settled {
                result: Ok(instance),
                leftover: cleanup.map(|c| (key, c)),
            };
        };

        if tainted {
            let leftover = cleanup.and_then(|c| context.push_cleanup(key, c).err());
            let result = match leftover {
                Some(_) => Err(InjectError::ScopeNotActive {
                    scope: provider.scope.clone(),
                    key,
                }),
                None => Ok(instance),
            };
            return Settled {
                result,
                leftover: leftover.map(|c| (key, c)),
            };
        }

        match context.commit(key, instance, cleanup) {
            Commit::Stored(instance) => Settled {
                result: Ok(instance),
                leftover: None,
            },
            Commit::Lost { winner, cleanup } => {
                tracing::warn!(
                    "'{}' was constructed concurrently, keeping the first instance",
                    key
                );
                Settled {
                    result: Ok(winner),
                    leftover: cleanup.map(|c| (key, c)),
                }
            }
            Commit::Closed(cleanup) => Settled {
                result: Err(InjectError::ScopeNotActive {
                    scope: provider.scope.clone(),
                    key,
                }),
                leftover: cleanup.map(|c| (key, c)),
            },
        }
    }
}

fn downcast<T: Injectable>(instance: Instance) -> Result<Arc<T>, InjectError> {
    instance
        .downcast::<T>()
        .map_err(|actual_type| InjectError::DowncastFailed {
            required_type: type_name::<T>(),
            actual_type,
        })
}
