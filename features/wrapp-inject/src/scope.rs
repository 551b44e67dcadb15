use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt::Display,
};

use crate::errors::InjectError;

/// Name of a lifetime policy
///
/// `singleton` and `transient` are built in, `request` is registered by default.
/// Custom scopes are added with [ScopeGraph::register].
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope(Cow<'static, str>);

impl Scope {
    /// Lives as long as the container's singleton context
    pub const SINGLETON: Scope = Scope(Cow::Borrowed("singleton"));
    /// Never cached, rebuilt on every resolution
    pub const TRANSIENT: Scope = Scope(Cow::Borrowed("transient"));
    /// One instance per request activation
    pub const REQUEST: Scope = Scope(Cow::Borrowed("request"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Scope(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_singleton(&self) -> bool {
        *self == Scope::SINGLETON
    }

    pub fn is_transient(&self) -> bool {
        *self == Scope::TRANSIENT
    }

    /// Scopes that cannot be entered with a scoped context
    pub(crate) fn is_builtin(&self) -> bool {
        self.is_singleton() || self.is_transient()
    }
}
impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
impl From<&'static str> for Scope {
    fn from(name: &'static str) -> Self {
        Scope(Cow::Borrowed(name))
    }
}
impl From<String> for Scope {
    fn from(name: String) -> Self {
        Scope(Cow::Owned(name))
    }
}
impl From<&Scope> for Scope {
    fn from(scope: &Scope) -> Self {
        scope.clone()
    }
}

struct ScopeDefinition {
    /// Every transitive parent, computed on registration
    ancestors: HashSet<Scope>,
}

/// The registered scopes and their parent edges
///
/// Parents must be registered before their children, so the graph is acyclic by construction.
pub(crate) struct ScopeGraph {
    scopes: HashMap<Scope, ScopeDefinition>,
}
impl Default for ScopeGraph {
    fn default() -> Self {
        Self::new()
    }
}
impl ScopeGraph {
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        for builtin in [Scope::SINGLETON, Scope::TRANSIENT, Scope::REQUEST] {
            scopes.insert(
                builtin,
                ScopeDefinition {
                    ancestors: HashSet::new(),
                },
            );
        }
        Self { scopes }
    }

    pub fn register(&mut self, scope: Scope, parents: Vec<Scope>) -> Result<(), InjectError> {
        if scope.is_builtin() {
            return Err(InjectError::ReservedScope(scope));
        }
        if self.scopes.contains_key(&scope) {
            return Err(InjectError::DuplicateScope(scope));
        }

        let mut ancestors = HashSet::new();
        for parent in &parents {
            let Some(definition) = self.scopes.get(parent) else {
                return Err(InjectError::UnknownParentScope {
                    scope,
                    parent: parent.clone(),
                });
            };
            if parent.is_transient() {
                return Err(InjectError::ReservedScope(parent.clone()));
            }
            ancestors.insert(parent.clone());
            ancestors.extend(definition.ancestors.iter().cloned());
        }

        tracing::debug!("Registered scope '{}' with parents {:?}", scope, parents);
        self.scopes.insert(scope, ScopeDefinition { ancestors });
        Ok(())
    }

    pub fn contains(&self, scope: &Scope) -> bool {
        self.scopes.contains_key(scope)
    }

    /// True if `ancestor` is a transitive parent of `scope`
    pub fn is_ancestor(&self, scope: &Scope, ancestor: &Scope) -> bool {
        self.scopes
            .get(scope)
            .is_some_and(|d| d.ancestors.contains(ancestor))
    }

    /// Whether a provider living in `consumer` may hold a value from `dependency`
    ///
    /// `transient` and `singleton` dependencies are always allowed, as are the consumer's own
    /// scope and its ancestors. A transient consumer is checked with the scope of whoever
    /// consumes it, callers pass that effective scope here.
    pub fn allows(&self, consumer: &Scope, dependency: &Scope) -> bool {
        dependency.is_transient()
            || dependency.is_singleton()
            || consumer.is_transient()
            || consumer == dependency
            || self.is_ancestor(consumer, dependency)
    }
}
