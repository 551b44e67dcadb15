use std::collections::HashSet;

use crate::{
    errors::{GraphErrors, InjectError},
    provider::ProviderDefinition,
    registry::Registry,
    scope::{Scope, ScopeGraph},
    types::DependencyKey,
};

/// Static view over the declared dependencies of all providers
///
/// Used to find missing dependencies, cycles and scope violations without running a factory.
pub(crate) struct DependencyGraph<'a> {
    registry: &'a Registry,
    scopes: &'a ScopeGraph,
}
impl<'a> DependencyGraph<'a> {
    pub fn new(registry: &'a Registry, scopes: &'a ScopeGraph) -> Self {
        Self { registry, scopes }
    }

    /// Validate the whole graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), GraphErrors> {
        self.check_roots(self.registry.iter().map(|p| p.key))
    }

    /// Validate everything reachable from one key
    pub fn check_from(&self, key: DependencyKey) -> Result<(), GraphErrors> {
        self.check_roots(std::iter::once(key))
    }

    fn check_roots(&self, roots: impl Iterator<Item = DependencyKey>) -> Result<(), GraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = Vec::new();
        for key in roots {
            let Some(entry) = self.registry.get(&key) else {
                continue;
            };
            let mut dependency_chain = Vec::new();
            self.check_recurse(&mut checked, &mut errors, &mut dependency_chain, entry, None);
        }

        if !errors.is_empty() {
            return Err(GraphErrors { errors });
        }
        Ok(())
    }

    /// `inherited` is the scope of the nearest non-transient consumer on the current path
    fn check_recurse(
        &self,
        checked: &mut HashSet<(DependencyKey, Option<Scope>)>,
        errors: &mut Vec<InjectError>,
        dependency_chain: &mut Vec<DependencyKey>,
        entry: &ProviderDefinition,
        inherited: Option<&Scope>,
    ) {
        // Circular Dependency Check
        if let Some(start) = dependency_chain.iter().position(|key| *key == entry.key) {
            let mut chain = dependency_chain[start..].to_vec();
            chain.push(entry.key); // Add current so chain is complete
            errors.push(InjectError::CircularDependency { chain });
            return;
        }

        let effective = match entry.scope.is_transient() {
            true => inherited.cloned(),
            false => Some(entry.scope.clone()),
        };

        // Skip other checks if already checked
        if !checked.insert((entry.key, effective.clone())) {
            return;
        }

        dependency_chain.push(entry.key);

        for dependency in &entry.dependencies {
            let Some(next_entry) = self.registry.get(&dependency.key) else {
                if !dependency.optional {
                    errors.push(InjectError::UnregisteredDependency {
                        key: dependency.key,
                        required_by: Some(entry.key),
                    });
                }
                continue;
            };

            if let Some(consumer_scope) = &effective {
                if !self.scopes.allows(consumer_scope, &next_entry.scope) {
                    errors.push(InjectError::ScopeMismatch {
                        consumer: entry.key,
                        consumer_scope: consumer_scope.clone(),
                        dependency: next_entry.key,
                        dependency_scope: next_entry.scope.clone(),
                    });
                    continue;
                }
            }

            if dependency.lazy {
                // Don't recurse, this will be checked by itself
                continue;
            }

            self.check_recurse(checked, errors, dependency_chain, next_entry, effective.as_ref());
        }

        dependency_chain.pop();
    }
}
