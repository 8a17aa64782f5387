//! Configuration management for the marshalling engine
//!
//! Supports loading engine-wide schema defaults from:
//! - Default values
//! - Config file (marshal.toml)
//! - Environment variables (MARSHAL__*)
//!
//! ## Example config file (marshal.toml):
//! ```toml
//! [defaults]
//! strict = false
//! ordered = true
//! dateformat = "iso"
//! unknown = "raise"
//! ```
//!
//! Nothing in the engine reads configuration implicitly; callers seed
//! options with [`SchemaOpts::from_config`](crate::SchemaOpts::from_config).

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::dates::DateFormat;
use crate::error::{Result, SchemaError};
use crate::options::UnknownPolicy;

/// Main configuration for the marshalling engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarshalConfig {
    /// Defaults applied to new schema options
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Default schema option values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Return strict-mode errors instead of reports
    #[serde(default)]
    pub strict: bool,

    /// Keep field order in dumped mappings
    #[serde(default = "default_true")]
    pub ordered: bool,

    /// Datetime format name or strftime pattern
    #[serde(default)]
    pub dateformat: DateFormat,

    /// Unknown input key policy
    #[serde(default)]
    pub unknown: UnknownPolicy,
}

fn default_true() -> bool {
    true
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            strict: false,
            ordered: true,
            dateformat: DateFormat::Iso,
            unknown: UnknownPolicy::Ignore,
        }
    }
}

impl MarshalConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = ["marshal.toml", ".marshal.toml", "config/marshal.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "marshal") {
            let xdg_config = config_dir.config_dir().join("marshal.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MARSHAL__DEFAULTS__STRICT=true and friends
        builder = builder.add_source(
            Environment::with_prefix("MARSHAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let loaded: Self = config.try_deserialize()?;
        tracing::debug!(
            strict = loaded.defaults.strict,
            unknown = ?loaded.defaults.unknown,
            dateformat = %loaded.defaults.dateformat,
            "loaded marshal configuration"
        );
        Ok(loaded)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SchemaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MarshalConfig::default();
        assert!(!config.defaults.strict);
        assert!(config.defaults.ordered);
        assert_eq!(config.defaults.unknown, UnknownPolicy::Ignore);
    }

    #[test]
    fn test_serialize_config() {
        let config = MarshalConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[defaults]"));
        assert!(toml_str.contains("dateformat = \"iso\""));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[defaults]\nstrict = true\nunknown = \"include\"\ndateformat = \"%Y\"\n",
        )
        .unwrap();

        let config = MarshalConfig::load_from(path.to_str()).unwrap();
        assert!(config.defaults.strict);
        assert_eq!(config.defaults.unknown, UnknownPolicy::Include);
        assert_eq!(config.defaults.dateformat, DateFormat::Custom("%Y".to_string()));
    }

    #[test]
    fn test_errors_map_into_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            MarshalConfig::load_from(missing.to_str()),
            Err(SchemaError::Settings(_))
        ));

        let unwritable = dir.path().join("no-such-dir").join("saved.toml");
        assert!(matches!(
            MarshalConfig::default().save(unwritable.to_str().unwrap()),
            Err(SchemaError::Io(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = MarshalConfig::default();
        config.defaults.ordered = false;
        config.save(path.to_str().unwrap()).unwrap();

        let reloaded = MarshalConfig::load_from(path.to_str()).unwrap();
        assert!(!reloaded.defaults.ordered);
    }
}
