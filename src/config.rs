//! Configuration management for the schema registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [registry]
//! default_group = "default"
//! compatibility = "BACKWARD"
//! dedup_scope = "subject"
//! normalize = false
//! protobuf_file_name = "schema.proto"
//!
//! [storage]
//! snapshot_path = "./registry-snapshot.json"
//! output_format = "pretty"
//! ```
//!
//! Environment variables use `__` between the prefix, section and key, e.g.
//! `REGISTRY__REGISTRY__COMPATIBILITY=FULL`.

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compatibility::CompatibilityLevel;
use crate::content::DedupScope;
use crate::schema::DEFAULT_GROUP;

/// Main configuration for the schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry behavior
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Snapshot persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Registry behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Group used for subjects given without one
    #[serde(default = "default_group")]
    pub default_group: String,

    /// Global compatibility level, used by subjects without an override
    #[serde(default)]
    pub compatibility: CompatibilityLevel,

    /// Where normalized registrations look for equivalent content
    #[serde(default)]
    pub dedup_scope: DedupScope,

    /// Normalize registrations unless the caller says otherwise
    #[serde(default)]
    pub normalize: bool,

    /// Name given to the root file when linking protobuf schemas
    #[serde(default = "default_protobuf_file_name")]
    pub protobuf_file_name: String,
}

/// Snapshot persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshot file loaded at startup and written on save
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Output format (pretty or compact)
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

// Default value functions
fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_protobuf_file_name() -> String {
    "schema.proto".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_group: default_group(),
            compatibility: CompatibilityLevel::default(),
            dedup_scope: DedupScope::default(),
            normalize: false,
            protobuf_file_name: default_protobuf_file_name(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schema-registry", "registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (REGISTRY__*)
        builder = builder.add_source(Environment::with_prefix("REGISTRY").separator("__").try_parsing(true));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Snapshot path with relative paths resolved against the working directory
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.storage.snapshot_path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                std::env::current_dir().unwrap_or_default().join(p)
            }
        })
    }

    pub fn pretty_output(&self) -> bool {
        self.storage.output_format == OutputFormat::Pretty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.registry.default_group, "default");
        assert_eq!(config.registry.compatibility, CompatibilityLevel::None);
        assert_eq!(config.registry.dedup_scope, DedupScope::Subject);
        assert!(!config.registry.normalize);
        assert!(config.snapshot_path().is_none());
    }

    #[test]
    fn test_serialize_config() {
        let config = RegistryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[registry]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("compatibility = \"NONE\""));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[registry]\ncompatibility = \"FULL_TRANSITIVE\"\ndedup_scope = \"global\"\n\n[storage]\noutput_format = \"compact\"\n",
        )
        .unwrap();

        let config = RegistryConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.registry.compatibility, CompatibilityLevel::FullTransitive);
        assert_eq!(config.registry.dedup_scope, DedupScope::Global);
        assert!(!config.pretty_output());
        assert_eq!(config.registry.protobuf_file_name, "schema.proto");
    }
}
