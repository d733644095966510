//! Negative-capability traps.
//!
//! The kernel's non-goals are enforced in two layers. The primary layer is
//! structural: no type in this crate carries retry state, learned state, or
//! an escalation constructor. The second layer is the runtime traps below —
//! every code site that historically performed (or could plausibly grow) a
//! prohibited operation calls one of these helpers and returns the error.
//!
//! Removing a trap requires editing the kernel core; the test suite pins
//! each one.

use std::fmt;

use thiserror::Error;

/// The classes of behavior the kernel must never exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProhibitedClass {
    Learning,
    AdaptiveThresholds,
    AutoRetry,
    AutonomousEscalation,
    UrgencyShortcut,
    PathOptimization,
    IntentInference,
}

impl ProhibitedClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProhibitedClass::Learning => "learning",
            ProhibitedClass::AdaptiveThresholds => "adaptive_thresholds",
            ProhibitedClass::AutoRetry => "auto_retry",
            ProhibitedClass::AutonomousEscalation => "autonomous_escalation",
            ProhibitedClass::UrgencyShortcut => "urgency_shortcut",
            ProhibitedClass::PathOptimization => "path_optimization",
            ProhibitedClass::IntentInference => "intent_inference",
        }
    }
}

impl fmt::Display for ProhibitedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a prohibited behavior is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("prohibited behavior '{class}' attempted: {operation}")]
pub struct ProhibitedBehaviorError {
    pub class: ProhibitedClass,
    pub operation: String,
}

impl ProhibitedBehaviorError {
    pub fn new(class: ProhibitedClass, operation: impl Into<String>) -> Self {
        Self {
            class,
            operation: operation.into(),
        }
    }
}

pub fn block_learning(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::Learning, operation)
}

pub fn block_adaptive_thresholds(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::AdaptiveThresholds, operation)
}

pub fn block_auto_retry(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::AutoRetry, operation)
}

pub fn block_escalation(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::AutonomousEscalation, operation)
}

pub fn block_urgency_shortcut(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::UrgencyShortcut, operation)
}

pub fn block_path_optimization(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::PathOptimization, operation)
}

pub fn block_intent_inference(operation: &str) -> ProhibitedBehaviorError {
    ProhibitedBehaviorError::new(ProhibitedClass::IntentInference, operation)
}
