use crate::{
    config::ContainerConfig,
    container::Container,
    errors::InjectError,
    provider::{Provider, ProviderDefinition},
    scope::Scope,
    types::Injectable,
};

/// A group of registrations added together
///
/// ```rust,ignore
/// struct Persistence;
/// impl Module for Persistence {
///     fn configure(&self, builder: DiBuilder) -> DiBuilder {
///         builder
///             .add_provider(Provider::<Database>::singleton().closable(|_| Database::connect()))
///             .add_provider(Provider::<Repository>::singleton().factory(Repository::new))
///     }
/// }
/// ```
pub trait Module {
    fn configure(&self, builder: DiBuilder) -> DiBuilder;
}

/// Collects scopes and providers, then creates a [Container]
///
/// Scopes are registered before providers, each in the order they were added.
#[derive(Default)]
pub struct DiBuilder {
    config: ContainerConfig,
    /// Custom scopes with their parents
    scopes: Vec<(Scope, Vec<Scope>)>,
    /// Registered providers, including pre-built instances
    providers: Vec<ProviderDefinition>,
}

impl DiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_scope(mut self, scope: impl Into<Scope>, parents: &[Scope]) -> Self {
        self.scopes.push((scope.into(), parents.to_vec()));
        self
    }

    pub fn add_provider(mut self, definition: ProviderDefinition) -> Self {
        self.providers.push(definition);
        self
    }

    /// Registers an already created singleton
    pub fn add_instance<T: Injectable>(self, instance: T) -> Self {
        self.add_provider(Provider::<T>::singleton().value(instance))
    }

    pub fn add_module<M: Module>(self, module: M) -> Self {
        module.configure(self)
    }

    /// Creates the container and validates the whole dependency graph
    pub fn build(self) -> Result<Container, InjectError> {
        let container = self.build_lazy()?;
        container.build()?;
        Ok(container)
    }

    /// Creates the container, checks are deferred to the first resolution of each provider
    pub fn build_lazy(self) -> Result<Container, InjectError> {
        let DiBuilder {
            config,
            scopes,
            providers,
        } = self;
        tracing::debug!(
            "Building container with {} scope(s) and {} provider(s)",
            scopes.len(),
            providers.len()
        );

        let container = Container::with_config(config);
        for (scope, parents) in scopes {
            container.register_scope(scope, &parents)?;
        }
        for definition in providers {
            container.register(definition)?;
        }
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::DependencyKey;

    struct Settings {
        name: &'static str,
    }
    struct Greeter {
        greeting: String,
    }

    struct GreetingModule;
    impl Module for GreetingModule {
        fn configure(&self, builder: DiBuilder) -> DiBuilder {
            builder.add_provider(
                Provider::<Greeter>::singleton()
                    .depends_on::<Arc<Settings>>()
                    .factory(|di| {
                        let settings = di.resolve::<Settings>()?;
                        Ok::<_, InjectError>(Greeter {
                            greeting: format!("hello {}", settings.name),
                        })
                    }),
            )
        }
    }

    #[test]
    fn modules_and_instances_are_registered() {
        let container = DiBuilder::new()
            .add_instance(Settings { name: "world" })
            .add_module(GreetingModule)
            .build()
            .unwrap();

        assert!(container.is_registered(&DependencyKey::of::<Settings>()));
        assert_eq!(container.resolve::<Greeter>().unwrap().greeting, "hello world");
    }

    #[test]
    fn build_reports_missing_dependencies() {
        let error = DiBuilder::new().add_module(GreetingModule).build().unwrap_err();
        match error {
            InjectError::InvalidGraph(errors) => {
                assert_eq!(errors.errors.len(), 1);
                assert!(matches!(
                    &errors.errors[0],
                    InjectError::UnregisteredDependency { key, .. }
                        if *key == DependencyKey::of::<Settings>()
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Deferred until first resolution
        let container = DiBuilder::new().add_module(GreetingModule).build_lazy().unwrap();
        assert!(matches!(
            container.resolve::<Greeter>(),
            Err(InjectError::UnregisteredDependency { .. })
        ));
    }

    #[test]
    fn scopes_must_exist_before_providers_use_them() {
        let error = DiBuilder::new()
            .add_provider(Provider::<u32>::scoped("task").factory(|_| Ok::<_, InjectError>(1)))
            .build_lazy()
            .unwrap_err();
        assert!(matches!(error, InjectError::UnknownScope(_)));

        let container = DiBuilder::new()
            .add_scope("batch", &[])
            .add_scope("task", &[Scope::new("batch")])
            .add_provider(Provider::<u32>::scoped("task").factory(|_| Ok::<_, InjectError>(1)))
            .build()
            .unwrap();
        let batch = container.scoped_context("batch").unwrap();
        let task = batch.scoped_context("task").unwrap();
        assert_eq!(*task.resolve::<u32>().unwrap(), 1);
    }
}
