use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::BoxFuture;

use crate::{
    errors::{CleanupError, CleanupErrors},
    scope::Scope,
    types::{DependencyKey, DynError, Instance},
};

/// Release step pushed when a resource is constructed
pub(crate) enum Cleanup {
    Sync(Box<dyn FnOnce() -> Result<(), DynError> + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), DynError>> + Send>),
}
impl Cleanup {
    /// Runs on the calling thread, asynchronous releases are driven to completion in place
    pub fn run_blocking(self) -> Result<(), DynError> {
        match self {
            Cleanup::Sync(release) => release(),
            Cleanup::Async(release) => futures::executor::block_on(release()),
        }
    }

    pub async fn run(self) -> Result<(), DynError> {
        match self {
            Cleanup::Sync(release) => release(),
            Cleanup::Async(release) => release().await,
        }
    }
}

static NEXT_ACTIVATION: AtomicU64 = AtomicU64::new(1);

/// Result of trying to store a freshly built instance
pub(crate) enum Commit {
    /// Stored, this instance is now the cached one
    Stored(Instance),
    /// Someone else stored first, the caller must release its own cleanup and use theirs
    Lost {
        winner: Instance,
        cleanup: Option<Cleanup>,
    },
    /// The activation was closed while the instance was built
    Closed(Option<Cleanup>),
}

#[derive(Default)]
struct ContextState {
    instances: HashMap<DependencyKey, Instance>,
    external: HashMap<DependencyKey, Instance>,
    cleanups: Vec<(DependencyKey, Cleanup)>,
    closed: bool,
}

/// One activation of a scope
///
/// Holds the instances built for this activation, values set from outside the graph and the
/// stack of releases. Releases run last in, first out when the activation is closed.
pub(crate) struct ScopeContext {
    scope: Scope,
    id: u64,
    parent: Option<Arc<ScopeContext>>,
    state: Mutex<ContextState>,
}
impl ScopeContext {
    pub fn new(scope: Scope, parent: Option<Arc<ScopeContext>>) -> Arc<Self> {
        let id = NEXT_ACTIVATION.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Activated '{}' scope #{}", scope, id);
        Arc::new(Self {
            scope,
            id,
            parent,
            state: Mutex::new(ContextState::default()),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent(&self) -> Option<&Arc<ScopeContext>> {
        self.parent.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Cached or externally set value for the key
    pub fn lookup(&self, key: &DependencyKey) -> Option<Instance> {
        let state = self.state();
        state
            .instances
            .get(key)
            .or_else(|| state.external.get(key))
            .cloned()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        let state = self.state();
        state.instances.contains_key(key) || state.external.contains_key(key)
    }

    pub fn set_external(&self, key: DependencyKey, instance: Instance) {
        tracing::debug!("Set '{}' on '{}' scope #{}", key, self.scope, self.id);
        self.state().external.insert(key, instance);
    }

    /// Stores a built instance unless another one won the race
    pub fn commit(
        &self,
        key: DependencyKey,
        instance: Instance,
        cleanup: Option<Cleanup>,
    ) -> Commit {
        let mut state = self.state();
        if state.closed {
            return Commit::Closed(cleanup);
        }
        if let Some(winner) = state.instances.get(&key) {
            return Commit::Lost {
                winner: winner.clone(),
                cleanup,
            };
        }

        state.instances.insert(key, instance.clone());
        if let Some(cleanup) = cleanup {
            state.cleanups.push((key, cleanup));
        }
        Commit::Stored(instance)
    }

    /// Keeps the release of an instance that is not cached
    pub fn push_cleanup(&self, key: DependencyKey, cleanup: Cleanup) -> Result<(), Cleanup> {
        let mut state = self.state();
        if state.closed {
            return Err(cleanup);
        }
        state.cleanups.push((key, cleanup));
        Ok(())
    }

    /// Evicts a cached instance, its release stays on the stack
    pub fn release(&self, key: &DependencyKey) -> bool {
        self.state().instances.remove(key).is_some()
    }

    pub fn release_all(&self) {
        self.state().instances.clear();
    }

    /// Marks the activation closed and hands out the releases in the order they must run
    fn take_cleanups(&self) -> Vec<(DependencyKey, Cleanup)> {
        let mut state = self.state();
        state.closed = true;
        state.instances.clear();
        state.external.clear();
        let mut cleanups = std::mem::take(&mut state.cleanups);
        cleanups.reverse();
        cleanups
    }

    /// Runs every release, collecting failures instead of stopping at the first one
    pub fn close(&self) -> Result<(), CleanupErrors> {
        let cleanups = self.take_cleanups();
        tracing::debug!(
            "Closing '{}' scope #{} with {} cleanup(s)",
            self.scope,
            self.id,
            cleanups.len()
        );

        let mut errors = Vec::new();
        for (key, cleanup) in cleanups {
            if let Err(error) = cleanup.run_blocking() {
                tracing::error!("Cleanup of '{}' failed: {}", key, error);
                errors.push(CleanupError {
                    key,
                    error: Arc::new(error),
                });
            }
        }
        self.finish(errors)
    }

    pub async fn aclose(&self) -> Result<(), CleanupErrors> {
        let cleanups = self.take_cleanups();
        tracing::debug!(
            "Closing '{}' scope #{} with {} cleanup(s)",
            self.scope,
            self.id,
            cleanups.len()
        );

        let mut errors = Vec::new();
        for (key, cleanup) in cleanups {
            if let Err(error) = cleanup.run().await {
                tracing::error!("Cleanup of '{}' failed: {}", key, error);
                errors.push(CleanupError {
                    key,
                    error: Arc::new(error),
                });
            }
        }
        self.finish(errors)
    }

    fn finish(&self, errors: Vec<CleanupError>) -> Result<(), CleanupErrors> {
        if errors.is_empty() {
            return Ok(());
        }
        Err(CleanupErrors {
            scope: self.scope.clone(),
            errors,
        })
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.cleanups.is_empty() {
            return;
        }

        tracing::warn!(
            "'{}' scope #{} dropped without being closed, releasing {} resource(s)",
            self.scope,
            self.id,
            state.cleanups.len()
        );
        if let Err(errors) = self.close() {
            tracing::error!("{}", errors);
        }
    }
}
