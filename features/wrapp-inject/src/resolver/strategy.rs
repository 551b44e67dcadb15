use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    container::ContainerInner,
    dependency_graph::DependencyGraph,
    errors::InjectError,
    overrides::OverrideStack,
    provider::ProviderDefinition,
    types::{DependencyKey, Instance},
};

/// How a container finds providers while resolving
///
/// Both strategies validate the declared subtree of a provider the first time it is resolved.
pub(crate) trait ResolutionStrategy: Send + Sync {
    /// A value that replaces normal resolution of the key
    fn intercept(&self, overrides: &OverrideStack, key: &DependencyKey) -> Option<Instance>;

    /// Whether a cached instance of the key was built from something an override now replaces
    fn shadowed(&self, inner: &ContainerInner, key: &DependencyKey) -> bool;

    /// The provider for the key, `None` if it is not registered
    fn provider(
        &self,
        inner: &ContainerInner,
        key: &DependencyKey,
    ) -> Result<Option<Arc<ProviderDefinition>>, InjectError>;

    /// Compiles every registered provider after the whole graph was validated
    fn compile(&self, inner: &ContainerInner);

    /// Forgets compiled state, called with the registry write lock held
    fn invalidate(&self);

    fn supports_overrides(&self) -> bool;
}

pub(crate) fn for_testing(testing: bool) -> Box<dyn ResolutionStrategy> {
    match testing {
        true => Box::new(Checked::default()),
        false => Box::new(Planned::default()),
    }
}

/// Precompiled plans, overrides are never consulted
#[derive(Default)]
pub(crate) struct Planned {
    plans: RwLock<HashMap<DependencyKey, Arc<ProviderDefinition>>>,
}
impl ResolutionStrategy for Planned {
    fn intercept(&self, _: &OverrideStack, _: &DependencyKey) -> Option<Instance> {
        None
    }

    fn shadowed(&self, _: &ContainerInner, _: &DependencyKey) -> bool {
        false
    }

    fn provider(
        &self,
        inner: &ContainerInner,
        key: &DependencyKey,
    ) -> Result<Option<Arc<ProviderDefinition>>, InjectError> {
        let plans = self.plans.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(plan) = plans.get(key) {
            return Ok(Some(plan.clone()));
        }
        drop(plans);

        // Lock order is registry, scopes, plans
        let registry = inner.registry();
        let Some(provider) = registry.get(key).cloned() else {
            return Ok(None);
        };
        DependencyGraph::new(&registry, &inner.scopes())
            .check_from(*key)
            .map_err(|e| e.into_first())?;

        tracing::trace!("Compiled resolution plan for '{}'", key);
        self.plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*key, provider.clone());
        Ok(Some(provider))
    }

    fn compile(&self, inner: &ContainerInner) {
        let registry = inner.registry();
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        plans.extend(registry.iter().map(|p| (p.key, p.clone())));
        tracing::debug!("Compiled {} resolution plan(s)", plans.len());
    }

    fn invalidate(&self) {
        self.plans.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn supports_overrides(&self) -> bool {
        false
    }
}

/// Looks up the registry on every resolution and consults overrides at every level
#[derive(Default)]
pub(crate) struct Checked {
    validated: RwLock<HashSet<DependencyKey>>,
}
impl ResolutionStrategy for Checked {
    fn intercept(&self, overrides: &OverrideStack, key: &DependencyKey) -> Option<Instance> {
        overrides.top(key)
    }

    fn shadowed(&self, inner: &ContainerInner, key: &DependencyKey) -> bool {
        if inner.overrides.is_empty() {
            return false;
        }

        // Walks the declared subtree, lazy edges resolve on their own later
        let registry = inner.registry();
        let mut visited = HashSet::new();
        let mut pending = vec![*key];
        while let Some(current) = pending.pop() {
            let Some(provider) = registry.get(&current) else {
                continue;
            };
            for dependency in provider.dependencies.iter().filter(|d| !d.lazy) {
                if inner.overrides.top(&dependency.key).is_some() {
                    return true;
                }
                if visited.insert(dependency.key) {
                    pending.push(dependency.key);
                }
            }
        }
        false
    }

    fn provider(
        &self,
        inner: &ContainerInner,
        key: &DependencyKey,
    ) -> Result<Option<Arc<ProviderDefinition>>, InjectError> {
        let registry = inner.registry();
        let Some(provider) = registry.get(key).cloned() else {
            return Ok(None);
        };

        let validated = self
            .validated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if !validated {
            DependencyGraph::new(&registry, &inner.scopes())
                .check_from(*key)
                .map_err(|e| e.into_first())?;
            self.validated
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(*key);
        }
        Ok(Some(provider))
    }

    fn compile(&self, inner: &ContainerInner) {
        let registry = inner.registry();
        self.validated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(registry.iter().map(|p| p.key));
    }

    fn invalidate(&self) {
        self.validated.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn supports_overrides(&self) -> bool {
        true
    }
}
