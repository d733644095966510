//! Kernel configuration records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::capability::filesystem::FilesystemConfig;
use crate::capability::network::NetworkConfig;
use crate::capability::process::ProcessConfig;
use crate::capability::screen::ScreenConfig;

/// Paths for the append-only stores. `None` keeps a store in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub snapshot_db: Option<PathBuf>,
    #[serde(default)]
    pub pattern_db: Option<PathBuf>,
    /// Authority version log. Without it, a restart starts a new version
    /// epoch and no prior snapshot can validate.
    #[serde(default)]
    pub authority_db: Option<PathBuf>,
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
}
