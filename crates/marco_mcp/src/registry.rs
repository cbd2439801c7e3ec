//! Capability Registry - module discovery and dispatch by name.
//!
//! Two-phase lifecycle: modules are registered while the registry is open,
//! then [`CapabilityRegistry::seal`] freezes it. After sealing, reads go
//! through a `OnceLock` and take no lock.

use crate::module::Module;
use marco_intent::CapabilityDescriptor;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is sealed; module '{0}' must be registered at startup")]
    RegistrationClosed(String),

    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("unknown module: {0}")]
    NotFound(String),

    #[error("registry has not been sealed")]
    NotSealed,
}

#[derive(Clone)]
struct Entry {
    descriptor: Arc<CapabilityDescriptor>,
    module: Arc<dyn Module>,
}

/// Registry of capability modules keyed by module name.
#[derive(Default)]
pub struct CapabilityRegistry {
    pending: Mutex<BTreeMap<String, Entry>>,
    sealed: OnceLock<BTreeMap<String, Entry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry. Populate it before the first command.
    pub fn global() -> &'static CapabilityRegistry {
        static GLOBAL: OnceLock<CapabilityRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CapabilityRegistry::new)
    }

    /// Register a module under the name from its descriptor.
    pub fn register(&self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let descriptor = module.capabilities();
        let name = descriptor.name.clone();
        if self.is_sealed() {
            return Err(RegistryError::RegistrationClosed(name));
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| RegistryError::RegistrationClosed(name.clone()))?;
        // seal() may have won the race while we waited on the lock
        if self.is_sealed() {
            return Err(RegistryError::RegistrationClosed(name));
        }
        if pending.contains_key(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }

        debug!(
            module = %name,
            actions = descriptor.actions.len(),
            "Registering module"
        );
        pending.insert(
            name,
            Entry {
                descriptor: Arc::new(descriptor),
                module,
            },
        );
        Ok(())
    }

    /// Close the startup phase. Sealing twice is a no-op.
    pub fn seal(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let entries = std::mem::take(&mut *pending);
        let count = entries.len();
        if self.sealed.set(entries).is_ok() {
            debug!(modules = count, "Capability registry sealed");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    fn entries(&self) -> Result<&BTreeMap<String, Entry>, RegistryError> {
        self.sealed.get().ok_or(RegistryError::NotSealed)
    }

    pub fn lookup(&self, module: &str) -> Result<Arc<CapabilityDescriptor>, RegistryError> {
        self.entries()?
            .get(module)
            .map(|e| Arc::clone(&e.descriptor))
            .ok_or_else(|| RegistryError::NotFound(module.to_string()))
    }

    /// Unknown modules and actions count as not destructive; they are
    /// rejected by validation before this matters.
    pub fn is_destructive(&self, module: &str, action: &str) -> Result<bool, RegistryError> {
        Ok(self
            .entries()?
            .get(module)
            .map(|e| e.descriptor.is_destructive(action))
            .unwrap_or(false))
    }

    pub fn module(&self, module: &str) -> Result<Arc<dyn Module>, RegistryError> {
        self.entries()?
            .get(module)
            .map(|e| Arc::clone(&e.module))
            .ok_or_else(|| RegistryError::NotFound(module.to_string()))
    }

    /// All descriptors sorted by module name.
    pub fn catalog(&self) -> Result<Vec<Arc<CapabilityDescriptor>>, RegistryError> {
        Ok(self
            .entries()?
            .values()
            .map(|e| Arc::clone(&e.descriptor))
            .collect())
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = match self.sealed.get() {
            Some(entries) => entries.keys().cloned().collect(),
            None => self
                .pending
                .lock()
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default(),
        };
        f.debug_struct("CapabilityRegistry")
            .field("sealed", &self.is_sealed())
            .field("modules", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleError;
    use async_trait::async_trait;
    use marco_intent::{ActionSchema, ExecutionResult, ParamKind, Parameters};

    struct Stub(&'static str);

    #[async_trait]
    impl Module for Stub {
        fn capabilities(&self) -> CapabilityDescriptor {
            CapabilityDescriptor::new(self.0, "stub")
                .with_action("ping", ActionSchema::read_only("ping"))
                .with_destructive_action(
                    "wipe",
                    ActionSchema::write("wipe").required("target", ParamKind::String, "what"),
                )
        }

        async fn execute(
            &self,
            _action: &str,
            _parameters: &Parameters,
        ) -> Result<ExecutionResult, ModuleError> {
            Ok(ExecutionResult::default())
        }
    }

    #[test]
    fn test_lookup_after_register() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        registry.seal();

        let descriptor = registry.lookup("alpha").unwrap();
        assert_eq!(descriptor.name, "alpha");
        assert!(descriptor.supports("ping"));
        assert!(registry.module("alpha").is_ok());
    }

    #[test]
    fn test_register_after_seal_is_closed() {
        let registry = CapabilityRegistry::new();
        registry.seal();
        assert_eq!(
            registry.register(Arc::new(Stub("late"))).unwrap_err(),
            RegistryError::RegistrationClosed("late".to_string())
        );
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        assert_eq!(
            registry.register(Arc::new(Stub("alpha"))).unwrap_err(),
            RegistryError::DuplicateModule("alpha".to_string())
        );
    }

    #[test]
    fn test_lookup_before_seal_fails() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        assert_eq!(registry.lookup("alpha").unwrap_err(), RegistryError::NotSealed);
    }

    #[test]
    fn test_unknown_module_not_found() {
        let registry = CapabilityRegistry::new();
        registry.seal();
        assert_eq!(
            registry.lookup("canvas").unwrap_err(),
            RegistryError::NotFound("canvas".to_string())
        );
    }

    #[test]
    fn test_is_destructive() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        registry.seal();
        assert!(registry.is_destructive("alpha", "wipe").unwrap());
        assert!(!registry.is_destructive("alpha", "ping").unwrap());
        assert!(!registry.is_destructive("beta", "wipe").unwrap());
    }

    #[test]
    fn test_catalog_sorted_by_name() {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(Stub("zeta"))).unwrap();
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        registry.seal();
        let names: Vec<String> = registry
            .catalog()
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(Stub("alpha"))).unwrap();
        registry.seal();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.lookup("alpha").map(|d| d.name.clone()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "alpha");
        }
    }
}
