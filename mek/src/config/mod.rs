//! Configuration module for the kernel runtime.
//!
//! TOML-backed configuration for storage paths and the strict capability
//! policies. Everything defaults to the in-memory, most-restrictive
//! settings.

pub mod types;

use std::path::Path;

use crate::error::KernelError;

pub use types::{KernelConfig, StorageConfig};

impl KernelConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, KernelError> {
        toml::from_str(raw).map_err(|e| KernelError::Config(format!("parse config: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, KernelError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("read config {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = KernelConfig::from_toml_str("").unwrap();
        assert_eq!(config, KernelConfig::default());
        assert!(config.storage.snapshot_db.is_none());
        assert!(config.process.allowed_executables.is_empty());
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let config = KernelConfig::from_toml_str(
            r#"
            [storage]
            snapshot_db = "/var/lib/mek/snapshots.db"

            [network]
            allowed_domains = ["api.example.com"]
            https_only = true

            [process]
            allowed_executables = ["/bin/echo"]
            max_timeout_seconds = 10
            "#,
        )
        .unwrap();
        assert_eq!(
            config.storage.snapshot_db.as_deref(),
            Some(std::path::Path::new("/var/lib/mek/snapshots.db"))
        );
        assert_eq!(config.network.allowed_domains, vec!["api.example.com"]);
        assert_eq!(config.process.max_timeout_seconds, 10);
        // Untouched sections keep their defaults.
        assert_eq!(config.filesystem, Default::default());
    }
}
