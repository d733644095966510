//! Strict screen capability.
//!
//! One contract: `screen.capture` (LOW). The region must be explicit and
//! within bounds, and captures are rate limited. The frame grabber is an
//! external collaborator supplied by the caller; this module owns the
//! refusal taxonomy.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capability::contract::CapabilityContract;
use crate::error::{CapabilityError, ValidationError};
use crate::types::ConsequenceLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenRefusal {
    RegionInvalid,
    RateLimitExceeded,
    UnspecifiedRegion,
}

impl ScreenRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenRefusal::RegionInvalid => "region_invalid",
            ScreenRefusal::RateLimitExceeded => "rate_limit_exceeded",
            ScreenRefusal::UnspecifiedRegion => "unspecified_region",
        }
    }
}

impl fmt::Display for ScreenRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{refusal}] {details}")]
pub struct ScreenError {
    pub refusal: ScreenRefusal,
    pub details: String,
}

impl ScreenError {
    fn new(refusal: ScreenRefusal, details: impl Into<String>) -> Self {
        Self {
            refusal,
            details: details.into(),
        }
    }
}

impl From<ScreenError> for CapabilityError {
    fn from(err: ScreenError) -> Self {
        CapabilityError::new(err.refusal.as_str(), err.details)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u64,
    #[serde(default = "default_max_height")]
    pub max_height: u64,
    /// Minimum spacing between captures.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_max_width() -> u64 {
    3840
}

fn default_max_height() -> u64 {
    2160
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            max_height: default_max_height(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

/// A validated capture region handed to the caller-supplied grabber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

pub fn validate_region(region: &Value, config: &ScreenConfig) -> Result<CaptureRegion, ScreenError> {
    let obj = region.as_object().ok_or_else(|| {
        ScreenError::new(ScreenRefusal::UnspecifiedRegion, "region must be an object")
    })?;
    let field = |name: &str| -> Result<u64, ScreenError> {
        obj.get(name).and_then(Value::as_u64).ok_or_else(|| {
            ScreenError::new(
                ScreenRefusal::UnspecifiedRegion,
                format!("region.{} required", name),
            )
        })
    };
    let region = CaptureRegion {
        x: field("x")?,
        y: field("y")?,
        width: field("width")?,
        height: field("height")?,
    };
    if region.width == 0 || region.height == 0 {
        return Err(ScreenError::new(
            ScreenRefusal::RegionInvalid,
            "region must have non-zero width and height",
        ));
    }
    if region.width > config.max_width || region.height > config.max_height {
        return Err(ScreenError::new(
            ScreenRefusal::RegionInvalid,
            format!(
                "region {}x{} exceeds limit {}x{}",
                region.width, region.height, config.max_width, config.max_height
            ),
        ));
    }
    Ok(region)
}

/// `screen.capture` contract: LOW consequence, requires `region`.
pub fn capture_contract(
    config: ScreenConfig,
    grabber: impl Fn(&CaptureRegion) -> Result<Value, CapabilityError> + Send + Sync + 'static,
) -> Result<CapabilityContract, ValidationError> {
    let last_capture: Mutex<Option<Instant>> = Mutex::new(None);
    CapabilityContract::new(
        "screen.capture",
        ConsequenceLevel::Low,
        ["region".to_string()],
        move |context| {
            let region_value = context.fields().get("region").ok_or_else(|| {
                ScreenError::new(ScreenRefusal::UnspecifiedRegion, "region field required")
            })?;
            let region = validate_region(region_value, &config)?;

            let min_interval = Duration::from_millis(config.min_interval_ms);
            {
                let mut last = last_capture.lock().expect("capture rate lock poisoned");
                let now = Instant::now();
                if let Some(prev) = *last {
                    if now.duration_since(prev) < min_interval {
                        return Err(ScreenError::new(
                            ScreenRefusal::RateLimitExceeded,
                            format!("captures limited to one per {}ms", config.min_interval_ms),
                        )
                        .into());
                    }
                }
                *last = Some(now);
            }

            grabber(&region)
        },
    )
}
