//! Runtime dependency injection with scoped lifetimes
//!
//! Providers are registered per [DependencyKey] under a [Scope]. The [Container] resolves them
//! on demand, caching instances in the context of their scope and releasing resources in
//! reverse construction order when that context is closed.
//!
//! ```rust,ignore
//! let container = Container::new();
//! container.register(Provider::<Database>::singleton().closable(|_| Database::connect()))?;
//! container.register(
//!     Provider::<Repository>::singleton()
//!         .depends_on::<Arc<Database>>()
//!         .factory(|di| Ok::<_, InjectError>(Repository::new(di.resolve()?))),
//! )?;
//! container.build()?;
//! container.start()?;
//!
//! let request = container.scoped_context(Scope::REQUEST)?;
//! let repository = request.resolve::<Repository>()?;
//! ```

pub mod builder;
pub mod config;
pub(crate) mod context;
pub mod container;
pub(crate) mod dependency_graph;
pub mod errors;
pub mod overrides;
pub mod provider;
pub(crate) mod registry;
pub mod resolver;
pub mod scope;
pub mod types;

pub use builder::{DiBuilder, Module};
pub use config::ContainerConfig;
pub use container::{Container, ScopedContext};
pub use errors::{CleanupError, CleanupErrors, GraphErrors, InjectError};
pub use overrides::OverrideGuard;
pub use provider::{AsyncClosable, AsyncResource, Closable, Provider, ProviderDefinition, Resource};
pub use resolver::{DiHandle, Lazy, Resolver};
pub use scope::Scope;
pub use types::{DependencyInfo, DependencyKey, DynError, Injectable, Instance, TypeInfo};
