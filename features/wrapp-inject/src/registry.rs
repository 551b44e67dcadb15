use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    errors::InjectError,
    provider::ProviderDefinition,
    scope::Scope,
    types::DependencyKey,
};

/// All registered providers, kept in registration order
#[derive(Default)]
pub(crate) struct Registry {
    providers: IndexMap<DependencyKey, Arc<ProviderDefinition>>,
}
impl Registry {
    /// Adds a provider, replacing an existing one only if the definition asks for it
    pub fn register(&mut self, definition: ProviderDefinition) -> Result<(), InjectError> {
        let key = definition.key;
        if self.providers.contains_key(&key) && !definition.override_existing {
            return Err(InjectError::DuplicateProvider(key));
        }

        tracing::debug!(
            "Registered '{}' in '{}' scope{}",
            key,
            definition.scope,
            if definition.override_existing { " (override)" } else { "" }
        );
        // Replacing keeps the original position, so eager start order stays stable
        self.providers.insert(key, Arc::new(definition));
        Ok(())
    }

    pub fn unregister(&mut self, key: &DependencyKey) -> Option<Arc<ProviderDefinition>> {
        let removed = self.providers.shift_remove(key);
        if removed.is_some() {
            tracing::debug!("Unregistered '{}'", key);
        }
        removed
    }

    pub fn get(&self, key: &DependencyKey) -> Option<&Arc<ProviderDefinition>> {
        self.providers.get(key)
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.providers.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderDefinition>> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Providers built when `scope` is activated
    ///
    /// Every singleton resource is, elsewhere only eager resources are.
    pub fn eager_in(&self, scope: &Scope) -> Vec<DependencyKey> {
        self.providers
            .values()
            .filter(|p| &p.scope == scope && p.is_resource)
            .filter(|p| scope.is_singleton() || p.eager)
            .map(|p| p.key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, Resource};

    fn resource<T: Default + Send + Sync + 'static>(scope: Scope) -> ProviderDefinition {
        Provider::<T>::scoped(scope).resource(|_| {
            Ok::<_, InjectError>(Resource::new(T::default(), |_| Ok::<_, InjectError>(())))
        })
    }

    #[test]
    fn duplicate_needs_override() {
        let mut registry = Registry::default();
        registry.register(Provider::<u32>::singleton().value(1)).unwrap();

        assert!(matches!(
            registry.register(Provider::<u32>::singleton().value(2)),
            Err(InjectError::DuplicateProvider(_))
        ));
        registry
            .register(
                Provider::<u32>::transient()
                    .override_existing()
                    .factory(|_| Ok::<_, InjectError>(3)),
            )
            .unwrap();
        assert_eq!(registry.get(&DependencyKey::of::<u32>()).unwrap().scope, Scope::TRANSIENT);
    }

    #[test]
    fn eager_keys_follow_registration_order() {
        let mut registry = Registry::default();
        registry.register(resource::<u8>(Scope::SINGLETON)).unwrap();
        registry.register(Provider::<u16>::singleton().value(0)).unwrap();
        registry.register(resource::<u32>(Scope::SINGLETON)).unwrap();
        registry.register(resource::<u64>(Scope::REQUEST)).unwrap();

        assert_eq!(
            registry.eager_in(&Scope::SINGLETON),
            vec![DependencyKey::of::<u8>(), DependencyKey::of::<u32>()]
        );
        assert!(registry.eager_in(&Scope::REQUEST).is_empty());

        registry.unregister(&DependencyKey::of::<u8>());
        assert_eq!(registry.eager_in(&Scope::SINGLETON), vec![DependencyKey::of::<u32>()]);
        assert_eq!(registry.len(), 3);
    }
}
