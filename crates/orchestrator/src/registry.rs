//! Type name to implementation registries.
//!
//! Registries are populated once while the engine is built and never change
//! afterwards, so lookups need no synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use crate::advisers::Adviser;
use crate::error::{OrchestratorError, RegistryError, Result};
use crate::facilitators::Facilitator;
use crate::services::Resolver;
use crate::steps::Executable;

pub struct TypedRegistry<T> {
    kind: &'static str,
    entries: HashMap<String, T>,
}

impl<T> TypedRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        value: T,
    ) -> std::result::Result<(), RegistryError> {
        let type_name = type_name.into();
        if type_name.trim().is_empty() {
            return Err(RegistryError::EmptyType { kind: self.kind });
        }
        if self.entries.contains_key(&type_name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                type_name,
            });
        }
        self.entries.insert(type_name, value);
        Ok(())
    }

    pub fn obtain(&self, type_name: &str) -> Result<&T> {
        self.entries
            .get(type_name)
            .ok_or_else(|| OrchestratorError::not_registered(self.kind, type_name))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

pub type FacilitatorRegistry = TypedRegistry<Arc<dyn Facilitator>>;
pub type AdviserRegistry = TypedRegistry<Arc<dyn Adviser>>;
pub type StepRegistry = TypedRegistry<Executable>;
pub type ResolverRegistry = TypedRegistry<Arc<dyn Resolver>>;

pub trait FacilitatorRegistrar: Send + Sync {
    fn register_facilitators(
        &self,
        registry: &mut FacilitatorRegistry,
    ) -> std::result::Result<(), RegistryError>;
}

pub trait AdviserRegistrar: Send + Sync {
    fn register_advisers(
        &self,
        registry: &mut AdviserRegistry,
    ) -> std::result::Result<(), RegistryError>;
}

pub trait StepRegistrar: Send + Sync {
    fn register_steps(&self, registry: &mut StepRegistry) -> std::result::Result<(), RegistryError>;
}

pub trait ResolverRegistrar: Send + Sync {
    fn register_resolvers(
        &self,
        registry: &mut ResolverRegistry,
    ) -> std::result::Result<(), RegistryError>;
}

/// All plan-node registries, shared read-only by `Arc` once built.
pub struct Registries {
    pub facilitators: FacilitatorRegistry,
    pub advisers: AdviserRegistry,
    pub steps: StepRegistry,
    pub resolvers: ResolverRegistry,
}

impl Registries {
    pub fn builder() -> RegistriesBuilder {
        RegistriesBuilder::default()
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("facilitators", &self.facilitators.types())
            .field("advisers", &self.advisers.types())
            .field("steps", &self.steps.types())
            .field("resolvers", &self.resolvers.types())
            .finish()
    }
}

pub struct RegistriesBuilder {
    registries: Registries,
}

impl Default for RegistriesBuilder {
    fn default() -> Self {
        Self {
            registries: Registries {
                facilitators: TypedRegistry::new("facilitator"),
                advisers: TypedRegistry::new("adviser"),
                steps: TypedRegistry::new("step"),
                resolvers: TypedRegistry::new("resolver"),
            },
        }
    }
}

impl RegistriesBuilder {
    pub fn facilitator(
        mut self,
        type_name: impl Into<String>,
        facilitator: Arc<dyn Facilitator>,
    ) -> std::result::Result<Self, RegistryError> {
        self.registries.facilitators.register(type_name, facilitator)?;
        Ok(self)
    }

    pub fn adviser(
        mut self,
        type_name: impl Into<String>,
        adviser: Arc<dyn Adviser>,
    ) -> std::result::Result<Self, RegistryError> {
        self.registries.advisers.register(type_name, adviser)?;
        Ok(self)
    }

    pub fn step(
        mut self,
        type_name: impl Into<String>,
        step: Executable,
    ) -> std::result::Result<Self, RegistryError> {
        self.registries.steps.register(type_name, step)?;
        Ok(self)
    }

    pub fn resolver(
        mut self,
        type_name: impl Into<String>,
        resolver: Arc<dyn Resolver>,
    ) -> std::result::Result<Self, RegistryError> {
        self.registries.resolvers.register(type_name, resolver)?;
        Ok(self)
    }

    pub fn facilitator_registrar(
        mut self,
        registrar: &dyn FacilitatorRegistrar,
    ) -> std::result::Result<Self, RegistryError> {
        registrar.register_facilitators(&mut self.registries.facilitators)?;
        Ok(self)
    }

    pub fn adviser_registrar(
        mut self,
        registrar: &dyn AdviserRegistrar,
    ) -> std::result::Result<Self, RegistryError> {
        registrar.register_advisers(&mut self.registries.advisers)?;
        Ok(self)
    }

    pub fn step_registrar(
        mut self,
        registrar: &dyn StepRegistrar,
    ) -> std::result::Result<Self, RegistryError> {
        registrar.register_steps(&mut self.registries.steps)?;
        Ok(self)
    }

    pub fn resolver_registrar(
        mut self,
        registrar: &dyn ResolverRegistrar,
    ) -> std::result::Result<Self, RegistryError> {
        registrar.register_resolvers(&mut self.registries.resolvers)?;
        Ok(self)
    }

    pub fn build(self) -> Registries {
        self.registries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facilitators::ModeFacilitator;
    use crate::steps::BuiltinStepRegistrar;
    use pipeline_core::ExecutionMode;

    struct DuplicateSteps;

    impl StepRegistrar for DuplicateSteps {
        fn register_steps(
            &self,
            registry: &mut StepRegistry,
        ) -> std::result::Result<(), RegistryError> {
            BuiltinStepRegistrar.register_steps(registry)
        }
    }

    #[test]
    fn test_register_and_obtain() {
        let registries = Registries::builder()
            .facilitator("SYNC", Arc::new(ModeFacilitator::new(ExecutionMode::Sync)))
            .unwrap()
            .build();

        assert!(registries.facilitators.obtain("SYNC").is_ok());
        assert!(matches!(
            registries.facilitators.obtain("ASYNC"),
            Err(OrchestratorError::NotRegistered { kind: "facilitator", .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = Registries::builder()
            .facilitator("SYNC", Arc::new(ModeFacilitator::new(ExecutionMode::Sync)))
            .unwrap()
            .facilitator("SYNC", Arc::new(ModeFacilitator::new(ExecutionMode::Async)));

        assert!(matches!(
            result,
            Err(RegistryError::Duplicate { kind: "facilitator", type_name }) if type_name == "SYNC"
        ));
    }

    #[test]
    fn test_duplicate_registrar_rejected() {
        let result = Registries::builder()
            .step_registrar(&BuiltinStepRegistrar)
            .unwrap()
            .step_registrar(&DuplicateSteps);
        assert!(matches!(result, Err(RegistryError::Duplicate { kind: "step", .. })));
    }

    #[test]
    fn test_empty_type_rejected() {
        let mut registry: TypedRegistry<u8> = TypedRegistry::new("step");
        assert!(matches!(
            registry.register(" ", 1),
            Err(RegistryError::EmptyType { kind: "step" })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_types_sorted() {
        let mut registry: TypedRegistry<u8> = TypedRegistry::new("step");
        registry.register("b", 1).unwrap();
        registry.register("a", 2).unwrap();
        assert_eq!(registry.types(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
    }
}
