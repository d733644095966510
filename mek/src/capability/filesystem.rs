//! Strict filesystem capabilities.
//!
//! Three separate contracts: `fs.read` (LOW), `fs.write` (HIGH),
//! `fs.delete` (HIGH). No inference, no defaults: relative paths,
//! directories, symlinks, out-of-scope paths and oversize content are all
//! refused before any I/O happens.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::capability::contract::CapabilityContract;
use crate::error::{CapabilityError, ValidationError};
use crate::types::{ConsequenceLevel, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemRefusal {
    PathNotExplicit,
    PathOutOfScope,
    FileTooLarge,
    TypeNotAllowed,
    PathIsSymlink,
    IsDirectory,
    FileNotFound,
}

impl FilesystemRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemRefusal::PathNotExplicit => "path_not_explicit",
            FilesystemRefusal::PathOutOfScope => "path_out_of_scope",
            FilesystemRefusal::FileTooLarge => "file_too_large",
            FilesystemRefusal::TypeNotAllowed => "type_not_allowed",
            FilesystemRefusal::PathIsSymlink => "path_is_symlink",
            FilesystemRefusal::IsDirectory => "is_directory",
            FilesystemRefusal::FileNotFound => "file_not_found",
        }
    }
}

impl fmt::Display for FilesystemRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{refusal}] {details}")]
pub struct FilesystemError {
    pub refusal: FilesystemRefusal,
    pub details: String,
}

impl FilesystemError {
    fn new(refusal: FilesystemRefusal, details: impl Into<String>) -> Self {
        Self {
            refusal,
            details: details.into(),
        }
    }
}

impl From<FilesystemError> for CapabilityError {
    fn from(err: FilesystemError) -> Self {
        CapabilityError::new(err.refusal.as_str(), err.details)
    }
}

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Empty means unrestricted.
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub forbid_symlinks: bool,
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            allowed_directories: Vec::new(),
            forbid_symlinks: true,
        }
    }
}

pub fn validate_path_is_absolute(path_str: &str) -> Result<(), FilesystemError> {
    if path_str.is_empty() {
        return Err(FilesystemError::new(
            FilesystemRefusal::PathNotExplicit,
            "path is empty",
        ));
    }
    if !Path::new(path_str).is_absolute() {
        return Err(FilesystemError::new(
            FilesystemRefusal::PathNotExplicit,
            format!("path must be absolute: {}", path_str),
        ));
    }
    Ok(())
}

pub fn validate_path_in_scope(
    path: &Path,
    config: &FilesystemConfig,
) -> Result<(), FilesystemError> {
    if config.allowed_directories.is_empty() {
        return Ok(());
    }
    for allowed in &config.allowed_directories {
        if path.starts_with(allowed) {
            return Ok(());
        }
    }
    Err(FilesystemError::new(
        FilesystemRefusal::PathOutOfScope,
        format!("path outside allowed directories: {}", path.display()),
    ))
}

pub fn validate_not_symlink(path: &Path, config: &FilesystemConfig) -> Result<(), FilesystemError> {
    if !config.forbid_symlinks {
        return Ok(());
    }
    let is_symlink = path
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_symlink {
        return Err(FilesystemError::new(
            FilesystemRefusal::PathIsSymlink,
            format!("symlinks forbidden: {}", path.display()),
        ));
    }
    Ok(())
}

pub fn validate_file_size(path: &Path, config: &FilesystemConfig) -> Result<(), FilesystemError> {
    let metadata = match path.metadata() {
        Ok(m) if m.is_file() => m,
        _ => return Ok(()),
    };
    if metadata.len() > config.max_file_size {
        return Err(FilesystemError::new(
            FilesystemRefusal::FileTooLarge,
            format!(
                "file size {} exceeds limit {}: {}",
                metadata.len(),
                config.max_file_size,
                path.display()
            ),
        ));
    }
    Ok(())
}

fn path_field(context: &Context) -> Result<PathBuf, FilesystemError> {
    let path_str = context
        .fields()
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            FilesystemError::new(FilesystemRefusal::PathNotExplicit, "path field required")
        })?;
    validate_path_is_absolute(path_str)?;
    Ok(PathBuf::from(path_str))
}

/// `fs.read` contract: LOW consequence, requires `path`.
pub fn read_contract(config: FilesystemConfig) -> Result<CapabilityContract, ValidationError> {
    CapabilityContract::new(
        "fs.read",
        ConsequenceLevel::Low,
        ["path".to_string()],
        move |context| {
            let path = path_field(context)?;
            if !path.exists() {
                return Err(FilesystemError::new(
                    FilesystemRefusal::FileNotFound,
                    format!("file not found: {}", path.display()),
                )
                .into());
            }
            if path.is_dir() {
                return Err(FilesystemError::new(
                    FilesystemRefusal::IsDirectory,
                    format!("path is directory, not file: {}", path.display()),
                )
                .into());
            }
            validate_path_in_scope(&path, &config)?;
            validate_not_symlink(&path, &config)?;
            validate_file_size(&path, &config)?;

            let content = std::fs::read_to_string(&path).map_err(|e| {
                FilesystemError::new(
                    FilesystemRefusal::TypeNotAllowed,
                    format!("failed to read file: {}", e),
                )
            })?;
            Ok(json!({
                "content": content,
                "size": content.len(),
                "path": path.to_string_lossy(),
            }))
        },
    )
}

/// `fs.write` contract: HIGH consequence, requires `path` and `content`.
pub fn write_contract(config: FilesystemConfig) -> Result<CapabilityContract, ValidationError> {
    CapabilityContract::new(
        "fs.write",
        ConsequenceLevel::High,
        ["path".to_string(), "content".to_string()],
        move |context| {
            let path = path_field(context)?;
            let content = context
                .fields()
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    FilesystemError::new(
                        FilesystemRefusal::PathNotExplicit,
                        "content field required",
                    )
                })?;
            if content.len() as u64 > config.max_file_size {
                return Err(FilesystemError::new(
                    FilesystemRefusal::FileTooLarge,
                    format!(
                        "content size {} exceeds limit {}",
                        content.len(),
                        config.max_file_size
                    ),
                )
                .into());
            }
            validate_not_symlink(&path, &config)?;
            validate_path_in_scope(&path, &config)?;
            if path.is_dir() {
                return Err(FilesystemError::new(
                    FilesystemRefusal::IsDirectory,
                    format!("path is directory, not file: {}", path.display()),
                )
                .into());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FilesystemError::new(
                        FilesystemRefusal::TypeNotAllowed,
                        format!("failed to create parent directory: {}", e),
                    )
                })?;
            }
            std::fs::write(&path, content).map_err(|e| {
                FilesystemError::new(
                    FilesystemRefusal::TypeNotAllowed,
                    format!("failed to write file: {}", e),
                )
            })?;
            Ok(json!({
                "size": content.len(),
                "path": path.to_string_lossy(),
            }))
        },
    )
}

/// `fs.delete` contract: HIGH consequence, requires `path`. Directories and
/// symlinks are never deleted; a missing file reports rather than errors.
pub fn delete_contract(config: FilesystemConfig) -> Result<CapabilityContract, ValidationError> {
    CapabilityContract::new(
        "fs.delete",
        ConsequenceLevel::High,
        ["path".to_string()],
        move |context| {
            let path = path_field(context)?;
            if !path.exists() {
                return Ok(json!({
                    "deleted": false,
                    "path": path.to_string_lossy(),
                    "reason": "file_not_found",
                }));
            }
            if path.is_dir() {
                return Err(FilesystemError::new(
                    FilesystemRefusal::IsDirectory,
                    format!("recursive delete forbidden (directory): {}", path.display()),
                )
                .into());
            }
            validate_not_symlink(&path, &config)?;
            validate_path_in_scope(&path, &config)?;

            std::fs::remove_file(&path).map_err(|e| {
                FilesystemError::new(
                    FilesystemRefusal::TypeNotAllowed,
                    format!("failed to delete file: {}", e),
                )
            })?;
            Ok(json!({
                "deleted": true,
                "path": path.to_string_lossy(),
            }))
        },
    )
}
