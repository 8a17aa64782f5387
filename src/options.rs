//! Schema options
//!
//! Options are attached to a schema definition once, when it is built.
//! Their defaults come from [`MarshalConfig`](crate::config::MarshalConfig).

use serde::{Deserialize, Serialize};

use crate::config::MarshalConfig;
use crate::dates::DateFormat;
use crate::error::{Result, SchemaError};

/// What load does with input keys that match no field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Drop the key silently
    #[default]
    Ignore,
    /// Report an "Unknown field." error under the key
    Raise,
    /// Pass the raw value through into the output
    Include,
}

/// Parsed schema configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaOpts {
    /// Include-list; also fixes the output order when set
    #[serde(default)]
    pub only: Option<Vec<String>>,

    /// Exclude-list
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Turn a non-empty error report into an `Err`
    #[serde(default)]
    pub strict: bool,

    /// Emit dump keys in field order (otherwise sorted)
    #[serde(default = "default_true")]
    pub ordered: bool,

    /// Format for datetime fields that do not set their own
    #[serde(default)]
    pub dateformat: DateFormat,

    #[serde(default)]
    pub unknown: UnknownPolicy,
}

fn default_true() -> bool {
    true
}

impl Default for SchemaOpts {
    fn default() -> Self {
        Self {
            only: None,
            exclude: Vec::new(),
            strict: false,
            ordered: true,
            dateformat: DateFormat::Iso,
            unknown: UnknownPolicy::Ignore,
        }
    }
}

impl SchemaOpts {
    /// Options seeded from the engine-wide defaults
    pub fn from_config(config: &MarshalConfig) -> Self {
        let defaults = &config.defaults;
        Self {
            strict: defaults.strict,
            ordered: defaults.ordered,
            dateformat: defaults.dateformat.clone(),
            unknown: defaults.unknown,
            ..Self::default()
        }
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn dateformat(mut self, format: impl Into<DateFormat>) -> Self {
        self.dateformat = format.into();
        self
    }

    pub fn unknown(mut self, policy: UnknownPolicy) -> Self {
        self.unknown = policy;
        self
    }

    /// Reject configurations that cannot be applied
    pub fn validate(&self) -> Result<()> {
        check_exclusive(self.only.as_deref(), &self.exclude)?;
        self.dateformat.check()
    }
}

/// `only` and `exclude` may not both be given at the same layer
pub(crate) fn check_exclusive(only: Option<&[String]>, exclude: &[String]) -> Result<()> {
    if only.is_some() && !exclude.is_empty() {
        return Err(SchemaError::Config(
            "`only` and `exclude` are mutually exclusive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SchemaOpts::default();
        assert!(!opts.strict);
        assert!(opts.ordered);
        assert_eq!(opts.unknown, UnknownPolicy::Ignore);
        assert_eq!(opts.dateformat, DateFormat::Iso);
    }

    #[test]
    fn test_only_and_exclude_conflict() {
        let opts = SchemaOpts::default().only(["a"]).exclude(["b"]);
        assert!(matches!(opts.validate(), Err(SchemaError::Config(_))));
        assert!(SchemaOpts::default().exclude(["b"]).validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let opts: SchemaOpts = toml::from_str(
            r#"
            strict = true
            unknown = "raise"
            dateformat = "rfc"
            "#,
        )
        .unwrap();
        assert!(opts.strict);
        assert!(opts.ordered);
        assert_eq!(opts.unknown, UnknownPolicy::Raise);
        assert_eq!(opts.dateformat, DateFormat::Rfc);
    }
}
