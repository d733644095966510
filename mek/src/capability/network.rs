//! Strict network capability.
//!
//! One contract: `net.fetch` (MEDIUM), outbound only. HTTPS is mandatory,
//! domains and methods are allowlisted, payloads are bounded and cookies
//! are stripped. The HTTP client itself is an external collaborator: the
//! caller supplies a transport function and this module supplies the
//! refusal taxonomy in front of it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capability::contract::CapabilityContract;
use crate::error::{CapabilityError, ValidationError};
use crate::types::ConsequenceLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRefusal {
    UrlNotAllowed,
    MethodNotAllowed,
    RedirectDetected,
    PayloadTooLarge,
    MissingUrl,
    UnsafeScheme,
}

impl NetworkRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkRefusal::UrlNotAllowed => "url_not_allowed",
            NetworkRefusal::MethodNotAllowed => "method_not_allowed",
            NetworkRefusal::RedirectDetected => "redirect_detected",
            NetworkRefusal::PayloadTooLarge => "payload_too_large",
            NetworkRefusal::MissingUrl => "missing_url",
            NetworkRefusal::UnsafeScheme => "unsafe_scheme",
        }
    }
}

impl fmt::Display for NetworkRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{refusal}] {details}")]
pub struct NetworkError {
    pub refusal: NetworkRefusal,
    pub details: String,
}

impl NetworkError {
    fn new(refusal: NetworkRefusal, details: impl Into<String>) -> Self {
        Self {
            refusal,
            details: details.into(),
        }
    }
}

impl From<NetworkError> for CapabilityError {
    fn from(err: NetworkError) -> Self {
        CapabilityError::new(err.refusal.as_str(), err.details)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Empty means unrestricted.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_true")]
    pub https_only: bool,
    #[serde(default = "default_true")]
    pub forbid_cookies: bool,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string()]
}

fn default_max_payload() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            allowed_methods: default_methods(),
            max_payload_bytes: default_max_payload(),
            https_only: true,
            forbid_cookies: true,
        }
    }
}

/// A validated outbound request handed to the caller-supplied transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout_seconds: u64,
}

pub fn validate_url_scheme(url: &str, config: &NetworkConfig) -> Result<(), NetworkError> {
    if url.is_empty() {
        return Err(NetworkError::new(NetworkRefusal::MissingUrl, "url required"));
    }
    if config.https_only && !url.starts_with("https://") {
        return Err(NetworkError::new(
            NetworkRefusal::UnsafeScheme,
            format!("https required: {}", url),
        ));
    }
    Ok(())
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

pub fn validate_url_allowed(url: &str, config: &NetworkConfig) -> Result<(), NetworkError> {
    let domain = host_of(url)
        .map(str::to_lowercase)
        .ok_or_else(|| NetworkError::new(NetworkRefusal::UrlNotAllowed, format!("invalid url: {}", url)))?;
    if config.allowed_domains.is_empty() {
        return Ok(());
    }
    for allowed in &config.allowed_domains {
        let allowed = allowed.to_lowercase();
        if domain == allowed || domain.ends_with(&format!(".{}", allowed)) {
            return Ok(());
        }
    }
    Err(NetworkError::new(
        NetworkRefusal::UrlNotAllowed,
        format!("domain not allowed: {}", domain),
    ))
}

pub fn validate_method(method: &str, config: &NetworkConfig) -> Result<(), NetworkError> {
    if method.is_empty() {
        return Err(NetworkError::new(
            NetworkRefusal::MethodNotAllowed,
            "method required",
        ));
    }
    let upper = method.to_uppercase();
    if !config.allowed_methods.iter().any(|m| m.to_uppercase() == upper) {
        return Err(NetworkError::new(
            NetworkRefusal::MethodNotAllowed,
            format!("method not allowed: {}", method),
        ));
    }
    Ok(())
}

pub fn validate_payload_size(payload: &[u8], config: &NetworkConfig) -> Result<(), NetworkError> {
    if payload.len() > config.max_payload_bytes {
        return Err(NetworkError::new(
            NetworkRefusal::PayloadTooLarge,
            format!(
                "payload size {} exceeds limit {}",
                payload.len(),
                config.max_payload_bytes
            ),
        ));
    }
    Ok(())
}

/// `net.fetch` contract: MEDIUM consequence, requires `url` and `method`.
///
/// `transport` performs the actual outbound call once validation passes.
pub fn fetch_contract(
    config: NetworkConfig,
    transport: impl Fn(&NetworkRequest) -> Result<Value, CapabilityError> + Send + Sync + 'static,
) -> Result<CapabilityContract, ValidationError> {
    CapabilityContract::new(
        "net.fetch",
        ConsequenceLevel::Medium,
        ["url".to_string(), "method".to_string()],
        move |context| {
            let url = context
                .fields()
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| NetworkError::new(NetworkRefusal::MissingUrl, "url field required"))?
                .to_string();
            let method = context
                .fields()
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase();
            let timeout_seconds = context
                .fields()
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(30);

            validate_url_scheme(&url, &config)?;
            validate_url_allowed(&url, &config)?;
            validate_method(&method, &config)?;

            let body = match context.fields().get("body").and_then(Value::as_str) {
                Some(s) => {
                    let bytes = s.as_bytes().to_vec();
                    validate_payload_size(&bytes, &config)?;
                    Some(bytes)
                }
                None => None,
            };

            let mut headers: BTreeMap<String, String> = match context.fields().get("headers") {
                Some(Value::Object(map)) => map
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect(),
                _ => BTreeMap::new(),
            };
            if config.forbid_cookies {
                headers.retain(|k, _| k.to_lowercase() != "cookie");
            }

            let request = NetworkRequest {
                url,
                method,
                headers,
                body,
                timeout_seconds,
            };
            transport(&request)
        },
    )
}
