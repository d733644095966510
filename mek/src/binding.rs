//! Client binding layer.
//!
//! Thin, stateless translation from an external request shape into a kernel
//! [`Context`] and a guard dispatch. The rules are strict: absent
//! confidence or intent is refused here, never defaulted; a Non-Action is
//! propagated to the adapter verbatim and never translated into an error
//! code that suggests retry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::Kernel;
use crate::negative::{block_intent_inference, ProhibitedBehaviorError};
use crate::types::{Context, Intent, NonActionReason, Outcome};

/// The external representation of a request, as adapters deliver it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalRequest {
    #[serde(default)]
    pub principal_id: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Stateless request translator.
pub struct ClientBinding;

impl ClientBinding {
    /// Translate and dispatch. Requests carrying both a principal and a
    /// grant take the snapshot-guarded path; everything else takes the
    /// plain capability path.
    pub fn dispatch(kernel: &Kernel, request: &ExternalRequest) -> Outcome {
        let intent = match request
            .intent
            .as_deref()
            .map(|name| Intent::new(name, format!("external intent: {}", name)))
        {
            Some(Ok(intent)) => intent,
            _ => {
                let mut details = BTreeMap::new();
                details.insert(
                    "error".to_string(),
                    Value::from("intent is required and is never inferred"),
                );
                return kernel.ingress_refusal(NonActionReason::MissingContext, details);
            }
        };

        let confidence = match request.confidence {
            Some(confidence) => confidence,
            None => {
                let mut details = BTreeMap::new();
                details.insert("intent".to_string(), Value::from(intent.name()));
                details.insert(
                    "error".to_string(),
                    Value::from("confidence is required and is never synthesized"),
                );
                return kernel.ingress_refusal(NonActionReason::MissingConfidence, details);
            }
        };

        let context_id = request
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut context =
            match Context::new(context_id, confidence, intent.name(), request.fields.clone()) {
                Ok(context) => context,
                Err(err) => {
                    let mut details = BTreeMap::new();
                    details.insert("intent".to_string(), Value::from(intent.name()));
                    details.insert("confidence".to_string(), Value::from(confidence));
                    details.insert("error".to_string(), Value::from(err.to_string()));
                    return kernel.ingress_refusal(NonActionReason::InvalidConfidence, details);
                }
            };
        if let Some(profile_id) = &request.profile_id {
            context = context.with_profile_id(profile_id.clone());
        }
        if let Some(session_id) = &request.session_id {
            context = context.with_session_id(session_id.clone());
        }

        match (request.principal_id.as_deref(), request.grant_id.as_deref()) {
            (Some(principal_id), Some(grant_id)) => {
                kernel.execute_with_snapshot(principal_id, grant_id, intent.name(), &context, confidence)
            }
            _ => kernel.execute(intent.name(), &context),
        }
    }

    /// Guessing an intent from the request shape is structurally
    /// impossible.
    pub fn infer_intent(_request: &ExternalRequest) -> Result<String, ProhibitedBehaviorError> {
        Err(block_intent_inference(
            "intent inference from external request shape",
        ))
    }
}
