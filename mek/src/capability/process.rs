//! Strict process capability.
//!
//! One contract: `proc.run` (HIGH). Shell invocation is forbidden outright,
//! executables must be allowlisted, timeouts are capped, output is bounded.

use std::fmt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::capability::contract::CapabilityContract;
use crate::error::{CapabilityError, ValidationError};
use crate::types::ConsequenceLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRefusal {
    ExecutableNotAllowed,
    TimeoutExceeded,
    OutputLimitExceeded,
    ShellInvocationForbidden,
    MissingExecutable,
    MissingArgs,
}

impl ProcessRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRefusal::ExecutableNotAllowed => "executable_not_allowed",
            ProcessRefusal::TimeoutExceeded => "timeout_exceeded",
            ProcessRefusal::OutputLimitExceeded => "output_limit_exceeded",
            ProcessRefusal::ShellInvocationForbidden => "shell_invocation_forbidden",
            ProcessRefusal::MissingExecutable => "missing_executable",
            ProcessRefusal::MissingArgs => "missing_args",
        }
    }
}

impl fmt::Display for ProcessRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{refusal}] {details}")]
pub struct ProcessError {
    pub refusal: ProcessRefusal,
    pub details: String,
}

impl ProcessError {
    fn new(refusal: ProcessRefusal, details: impl Into<String>) -> Self {
        Self {
            refusal,
            details: details.into(),
        }
    }
}

impl From<ProcessError> for CapabilityError {
    fn from(err: ProcessError) -> Self {
        CapabilityError::new(err.refusal.as_str(), err.details)
    }
}

const SHELL_NAMES: &[&str] = &["sh", "bash", "zsh", "dash", "fish", "cmd", "cmd.exe", "powershell"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executables that may be spawned. Empty means nothing is allowed.
    #[serde(default)]
    pub allowed_executables: Vec<String>,
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

fn default_max_timeout() -> u64 {
    30
}

fn default_max_output() -> usize {
    1024 * 1024
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            allowed_executables: Vec::new(),
            max_timeout_seconds: default_max_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

pub fn validate_executable(executable: &str, config: &ProcessConfig) -> Result<(), ProcessError> {
    if executable.is_empty() {
        return Err(ProcessError::new(
            ProcessRefusal::MissingExecutable,
            "executable field required",
        ));
    }
    let basename = executable.rsplit('/').next().unwrap_or(executable);
    if SHELL_NAMES.contains(&basename) {
        return Err(ProcessError::new(
            ProcessRefusal::ShellInvocationForbidden,
            format!("shell invocation forbidden: {}", executable),
        ));
    }
    if !config
        .allowed_executables
        .iter()
        .any(|allowed| allowed == executable)
    {
        return Err(ProcessError::new(
            ProcessRefusal::ExecutableNotAllowed,
            format!("executable not allowed: {}", executable),
        ));
    }
    Ok(())
}

pub fn validate_timeout(timeout_seconds: u64, config: &ProcessConfig) -> Result<(), ProcessError> {
    if timeout_seconds > config.max_timeout_seconds {
        return Err(ProcessError::new(
            ProcessRefusal::TimeoutExceeded,
            format!(
                "timeout {}s exceeds limit {}s",
                timeout_seconds, config.max_timeout_seconds
            ),
        ));
    }
    Ok(())
}

/// `proc.run` contract: HIGH consequence, requires `executable` and `args`.
pub fn run_contract(config: ProcessConfig) -> Result<CapabilityContract, ValidationError> {
    CapabilityContract::new(
        "proc.run",
        ConsequenceLevel::High,
        ["executable".to_string(), "args".to_string()],
        move |context| {
            let executable = context
                .fields()
                .get("executable")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ProcessError::new(ProcessRefusal::MissingExecutable, "executable field required")
                })?;
            let args: Vec<String> = match context.fields().get("args") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            ProcessError::new(
                                ProcessRefusal::MissingArgs,
                                "args must be an array of strings",
                            )
                        })
                    })
                    .collect::<Result<_, _>>()?,
                _ => {
                    return Err(ProcessError::new(
                        ProcessRefusal::MissingArgs,
                        "args field required",
                    )
                    .into())
                }
            };
            let timeout_seconds = context
                .fields()
                .get("timeout_seconds")
                .and_then(Value::as_u64)
                .unwrap_or(config.max_timeout_seconds);

            validate_executable(executable, &config)?;
            validate_timeout(timeout_seconds, &config)?;

            let mut child = Command::new(executable)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    ProcessError::new(
                        ProcessRefusal::ExecutableNotAllowed,
                        format!("failed to spawn '{}': {}", executable, e),
                    )
                })?;

            let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(ProcessError::new(
                                ProcessRefusal::TimeoutExceeded,
                                format!("process exceeded {}s timeout", timeout_seconds),
                            )
                            .into());
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => {
                        return Err(ProcessError::new(
                            ProcessRefusal::ExecutableNotAllowed,
                            format!("failed to wait on process: {}", e),
                        )
                        .into())
                    }
                }
            }

            let output = child.wait_with_output().map_err(|e| {
                ProcessError::new(
                    ProcessRefusal::ExecutableNotAllowed,
                    format!("failed to collect output: {}", e),
                )
            })?;
            if output.stdout.len() + output.stderr.len() > config.max_output_bytes {
                return Err(ProcessError::new(
                    ProcessRefusal::OutputLimitExceeded,
                    format!(
                        "output {} bytes exceeds limit {}",
                        output.stdout.len() + output.stderr.len(),
                        config.max_output_bytes
                    ),
                )
                .into());
            }
            Ok(json!({
                "exit_code": output.status.code(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProcessConfig {
        ProcessConfig {
            allowed_executables: vec!["/bin/echo".to_string()],
            ..ProcessConfig::default()
        }
    }

    #[test]
    fn shell_invocation_is_forbidden() {
        let err = validate_executable("/bin/bash", &config()).unwrap_err();
        assert_eq!(err.refusal, ProcessRefusal::ShellInvocationForbidden);
        let err = validate_executable("sh", &config()).unwrap_err();
        assert_eq!(err.refusal, ProcessRefusal::ShellInvocationForbidden);
    }

    #[test]
    fn non_allowlisted_executable_is_refused() {
        let err = validate_executable("/usr/bin/curl", &config()).unwrap_err();
        assert_eq!(err.refusal, ProcessRefusal::ExecutableNotAllowed);
        assert!(validate_executable("/bin/echo", &config()).is_ok());
    }

    #[test]
    fn empty_allowlist_refuses_everything() {
        let err = validate_executable("/bin/echo", &ProcessConfig::default()).unwrap_err();
        assert_eq!(err.refusal, ProcessRefusal::ExecutableNotAllowed);
    }

    #[test]
    fn excessive_timeout_is_refused() {
        let err = validate_timeout(120, &config()).unwrap_err();
        assert_eq!(err.refusal, ProcessRefusal::TimeoutExceeded);
        assert!(validate_timeout(5, &config()).is_ok());
    }
}
