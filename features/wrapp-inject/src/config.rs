/// Behaviour switches fixed when a container is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Unregistering an unknown key or overriding an unregistered one is an error
    pub strict: bool,
    /// Resolution checks overrides at every level instead of using precompiled plans
    pub testing: bool,
}
impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }
}
