use std::{fmt::Display, sync::Arc};

use thiserror::Error;

use crate::{
    scope::Scope,
    types::{DependencyKey, DynError},
};

/// Errors raised while registering, validating or resolving dependencies
#[derive(Error, Debug, Clone)]
pub enum InjectError {
    /// The key has no provider and no value was set for it
    #[error("'{key}' is not registered{}", required_by_suffix(.required_by))]
    UnregisteredDependency {
        key: DependencyKey,
        required_by: Option<DependencyKey>,
    },
    /// A provider (transitively) requires itself
    #[error("A Circular Dependency exists through {}", format_chain(.chain))]
    CircularDependency { chain: Vec<DependencyKey> },
    /// A provider consumes a dependency from a scope that may outlive it
    #[error("'{consumer}' ({consumer_scope}) cannot depend on '{dependency}' ({dependency_scope})")]
    ScopeMismatch {
        consumer: DependencyKey,
        consumer_scope: Scope,
        dependency: DependencyKey,
        dependency_scope: Scope,
    },
    /// No activation of the required scope is visible to the caller
    #[error("'{key}' lives in the '{scope}' scope, which is not active")]
    ScopeNotActive { scope: Scope, key: DependencyKey },
    /// A synchronous resolution reached an async provider
    #[error("'{0}' can only be resolved asynchronously")]
    AsyncOnlyProvider(DependencyKey),
    /// The key was registered before and the registration did not ask to override it
    #[error("'{0}' is already registered")]
    DuplicateProvider(DependencyKey),
    /// The key is not registered (strict mode)
    #[error("'{0}' is not registered")]
    NotRegistered(DependencyKey),
    /// A provider has a shape its scope does not allow
    #[error("Invalid provider for '{key}': {reason}")]
    InvalidProvider {
        key: DependencyKey,
        reason: &'static str,
    },
    /// The scope was never registered
    #[error("The scope '{0}' is not registered")]
    UnknownScope(Scope),
    /// A scope names a parent that was never registered
    #[error("The scope '{scope}' names the unknown parent '{parent}'")]
    UnknownParentScope { scope: Scope, parent: Scope },
    /// The scope was registered twice
    #[error("The scope '{0}' is already registered")]
    DuplicateScope(Scope),
    /// `singleton` and `transient` are built in and cannot be registered or entered
    #[error("The scope '{0}' is reserved")]
    ReservedScope(Scope),
    /// A from-context provider was resolved before a value was set
    #[error("'{key}' must be set on the '{scope}' context before it is resolved")]
    ContextValueMissing { scope: Scope, key: DependencyKey },
    /// Overrides need a container configured for testing
    #[error("Overrides are disabled, configure the container with `testing(true)`")]
    OverridesDisabled,
    #[error("The container is already started")]
    AlreadyStarted,
    #[error("The container is not started")]
    NotStarted,
    /// A factory returned an error
    #[error("Factory for '{key}' failed - error: {error}")]
    FactoryFailed {
        key: DependencyKey,
        error: Arc<DynError>,
    },
    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// `build()` found one or more problems
    #[error(transparent)]
    InvalidGraph(#[from] GraphErrors),
    /// One or more teardowns failed, all others still ran
    #[error(transparent)]
    Cleanup(#[from] CleanupErrors),
}

impl InjectError {
    /// Wraps a factory error, passing resolution errors raised inside the factory through unchanged
    pub(crate) fn from_factory(key: DependencyKey, error: DynError) -> Self {
        match error.downcast::<InjectError>() {
            Ok(inject_error) => *inject_error,
            Err(error) => InjectError::FactoryFailed {
                key,
                error: Arc::new(error),
            },
        }
    }
}

fn required_by_suffix(required_by: &Option<DependencyKey>) -> String {
    match required_by {
        Some(key) => format!(" (required by '{key}')"),
        None => String::new(),
    }
}

fn format_chain(chain: &[DependencyKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// All problems found in the dependency graph
#[derive(Error, Debug, Clone)]
pub struct GraphErrors {
    pub errors: Vec<InjectError>,
}
impl Display for GraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}
impl GraphErrors {
    /// First error, used where a single resolution fails on validation
    pub(crate) fn into_first(mut self) -> InjectError {
        match self.errors.len() {
            1 => self.errors.remove(0),
            _ => InjectError::InvalidGraph(self),
        }
    }
}

/// A single failed teardown
#[derive(Debug, Clone)]
pub struct CleanupError {
    pub key: DependencyKey,
    pub error: Arc<DynError>,
}

/// Teardowns that failed while a scope was unwound
#[derive(Error, Debug, Clone)]
pub struct CleanupErrors {
    pub scope: Scope,
    pub errors: Vec<CleanupError>,
}
impl Display for CleanupErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push(format!(
            "{} cleanup(s) failed while closing the '{}' scope:",
            self.errors.len(),
            self.scope
        ));
        for failure in &self.errors {
            display.push(format!("- '{}': {}", failure.key, failure.error));
        }
        f.write_str(&display.join("\n"))
    }
}
