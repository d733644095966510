//! Capability contracts.
//!
//! A contract is declared power: a name, a consequence level, the context
//! fields execution requires, and an execution function. The function is
//! crate-private; the only public `execute` is a trap that unconditionally
//! fails, so the guard remains the sole door at compile time and at runtime.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CapabilityError, KernelError, ValidationError};
use crate::snapshot::canonical;
use crate::types::{ConsequenceLevel, Context};

/// Execution function of a capability. Only the guard may reach it.
pub(crate) type CapabilityHandler =
    Arc<dyn Fn(&Context) -> Result<Value, CapabilityError> + Send + Sync>;

/// Immutable capability contract, registered once at startup.
#[derive(Clone)]
pub struct CapabilityContract {
    name: String,
    consequence_level: ConsequenceLevel,
    required_context_fields: BTreeSet<String>,
    handler: CapabilityHandler,
}

impl fmt::Debug for CapabilityContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityContract")
            .field("name", &self.name)
            .field("consequence_level", &self.consequence_level)
            .field("required_context_fields", &self.required_context_fields)
            .finish()
    }
}

impl CapabilityContract {
    pub fn new(
        name: impl Into<String>,
        consequence_level: ConsequenceLevel,
        required_context_fields: impl IntoIterator<Item = String>,
        handler: impl Fn(&Context) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Contract("name is required".to_string()));
        }
        Ok(Self {
            name,
            consequence_level,
            required_context_fields: required_context_fields.into_iter().collect(),
            handler: Arc::new(handler),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consequence_level(&self) -> ConsequenceLevel {
        self.consequence_level
    }

    pub fn required_context_fields(&self) -> &BTreeSet<String> {
        &self.required_context_fields
    }

    /// Check that the context carries every required field with a non-null
    /// value. Returns the missing field names.
    pub fn validate_context(&self, context: &Context) -> Vec<String> {
        self.required_context_fields
            .iter()
            .filter(|field| {
                matches!(context.fields().get(*field), None | Some(Value::Null))
            })
            .cloned()
            .collect()
    }

    /// Deterministic digest of the contract's scope: name, consequence
    /// level and required fields. Recorded in snapshots and re-checked
    /// across the friction boundary.
    pub fn scope_hash(&self) -> String {
        let fields: Vec<Value> = self
            .required_context_fields
            .iter()
            .map(|f| Value::from(f.as_str()))
            .collect();
        let scope = serde_json::json!({
            "name": self.name,
            "consequence_level": self.consequence_level.as_str(),
            "required_context_fields": fields,
        });
        canonical::hash_value(&scope)
    }

    /// Direct execution is forbidden.
    ///
    /// All execution must pass through the guard; this method exists only
    /// to fail loudly when something reaches for the contract itself.
    pub fn execute(&self, _context: &Context) -> Result<Value, KernelError> {
        Err(KernelError::InvariantViolation(format!(
            "direct execution of capability '{}' is forbidden; \
             all execution must pass through the guard",
            self.name
        )))
    }

    /// The real execution path. Crate-private: reachable only from the
    /// guard's final gate.
    pub(crate) fn invoke(&self, context: &Context) -> Result<Value, CapabilityError> {
        (self.handler)(context)
    }
}
