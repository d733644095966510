//! Adapter contracts for the MEK kernel.
//!
//! This crate defines the handler signatures an HTTP, CLI or UI adapter
//! must implement, and nothing else: no server, no REPL, no rendering.
//! Adapters consume the kernel's public [`Outcome`] and [`ExternalRequest`]
//! types; the guard's internals and the capability execution functions are
//! private to the `mek` crate and unreachable from here, so an adapter
//! cannot grow an execution path of its own.
//!
//! Adapters are required to surface a Non-Action verbatim. Translating one
//! into an error code that invites a retry is a contract violation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mek::{ExternalRequest, Outcome};

/// The wire shape every adapter returns to its caller.
///
/// The outcome is embedded untranslated; `kind` is derived from it so
/// transport layers can route without inspecting the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub kind: ResponseKind,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Success,
    NonAction,
}

impl AdapterResponse {
    pub fn from_outcome(outcome: Outcome) -> Self {
        let kind = if outcome.is_success() {
            ResponseKind::Success
        } else {
            ResponseKind::NonAction
        };
        Self { kind, outcome }
    }
}

/// Base adapter lifecycle contract.
pub trait AdapterContract {
    fn initialize(&mut self);
    fn shutdown(&mut self);
}

/// HTTP adapter contract. Defines the handler signature only; an
/// implementation lives outside the kernel workspace and cannot start from
/// anything but an [`ExternalRequest`].
pub trait HttpAdapterContract: AdapterContract {
    /// Translate one HTTP request into an [`ExternalRequest`].
    fn parse_request(&self, method: &str, path: &str, body: Option<&Value>) -> ExternalRequest;

    /// Handle the translated request and wrap the outcome verbatim.
    fn handle_request(&self, request: &ExternalRequest) -> AdapterResponse;

    // Intentionally no run(): adapters cannot listen on ports.
}

/// CLI adapter contract.
pub trait CliAdapterContract: AdapterContract {
    fn parse_command(&self, command: &str, args: &[String]) -> ExternalRequest;

    fn handle_command(&self, request: &ExternalRequest) -> AdapterResponse;

    // Intentionally no run(): adapters cannot start REPLs.
}

/// UI adapter contract.
pub trait UiAdapterContract: AdapterContract {
    /// Render from state. Side-effect-only.
    fn render(&self, state: &Value);

    fn handle_action(&self, request: &ExternalRequest) -> AdapterResponse;
}
