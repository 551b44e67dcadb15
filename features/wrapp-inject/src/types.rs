use std::{
    any::{Any, TypeId},
    fmt::{Debug, Display},
    sync::Arc,
};

/// All errors must be Send + Sync so they can cross await points
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// We assume that we are using a multithreaded async runtime
/// So anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Identifies what is being resolved: a type plus an optional qualifier
///
/// Two keys are equal when both the type and the qualifier match, so
/// `Database` and `Database["replica"]` are independent registrations.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct DependencyKey {
    pub type_info: TypeInfo,
    pub qualifier: Option<&'static str>,
}
impl DependencyKey {
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifier: None,
        }
    }

    pub fn named<T: 'static + ?Sized>(qualifier: &'static str) -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            qualifier: Some(qualifier),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_info.type_name
    }
}
impl Display for DependencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.qualifier {
            Some(qualifier) => write!(f, "{}[{}]", self.type_info, qualifier),
            None => write!(f, "{}", self.type_info),
        }
    }
}

/// Instance of a Provider
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Arc<dyn Any + Send + Sync + 'static>,
}
impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.info.type_name)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub(crate) fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance,
        }
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    /// True if both handles point at the same allocation
    pub fn same_as(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

/// Information about a Provider dependency
#[derive(Debug, Clone, Copy)]
pub struct DependencyInfo {
    /// The required key
    pub key: DependencyKey,
    /// If it is optional or required
    pub optional: bool,
    /// If the Dependency is resolved lazily
    pub lazy: bool,
}
impl DependencyInfo {
    pub fn required(key: DependencyKey) -> Self {
        Self {
            key,
            optional: false,
            lazy: false,
        }
    }
}
