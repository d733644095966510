//! Capability registry.
//!
//! Populated during startup, then locked. Post-lock registration and
//! duplicate names fail loudly; lookups hand out shared immutable
//! references for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::capability::contract::CapabilityContract;
use crate::error::KernelError;

#[derive(Default)]
struct RegistryInner {
    capabilities: HashMap<String, Arc<CapabilityContract>>,
    locked: bool,
}

/// Startup-only registry of capability contracts.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract. Fails after [`lock`](Self::lock) and on
    /// duplicate names.
    pub fn register(&self, contract: CapabilityContract) -> Result<(), KernelError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.locked {
            return Err(KernelError::InvariantViolation(format!(
                "capability '{}' registered after registry lock",
                contract.name()
            )));
        }
        if inner.capabilities.contains_key(contract.name()) {
            return Err(KernelError::InvariantViolation(format!(
                "capability '{}' already registered",
                contract.name()
            )));
        }
        log::debug!(target: "mek::registry", "registered capability '{}'", contract.name());
        inner
            .capabilities
            .insert(contract.name().to_string(), Arc::new(contract));
        Ok(())
    }

    /// Startup terminator. The registered set is frozen from here on.
    pub fn lock(&self) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.locked = true;
        log::info!(
            target: "mek::registry",
            "registry locked with {} capabilities",
            inner.capabilities.len()
        );
    }

    pub fn is_locked(&self) -> bool {
        self.inner.read().expect("registry lock poisoned").locked
    }

    pub fn get(&self, name: &str) -> Option<Arc<CapabilityContract>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .capabilities
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .capabilities
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
