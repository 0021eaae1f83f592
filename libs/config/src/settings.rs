//! Cell Settings Module
//!
//! Provides the validated settings struct every cell is initialized with.
//! Settings are loaded from a TOML file, optionally merged with an
//! environment-specific file, and finally overridden by `CELL_` prefixed
//! environment variables (nested keys separated by `__`, e.g.
//! `CELL_TIMEOUT__INTERVAL_MS=5000`).

use crate::defaults;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Settings validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("cell_name is a required setting")]
    MissingCellName,

    #[error("cell_name '{0}' must not contain '@' or ':'")]
    InvalidCellName(String),

    #[error("timeout.interval_ms must be >= {min}, got {actual}")]
    IntervalTooShort { min: u64, actual: u64 },

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for SettingsError {
    fn from(e: toml::de::Error) -> Self {
        SettingsError::Parse(e.to_string())
    }
}

/// Wait queue timeout task settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Delay before the first sweep (milliseconds)
    pub initial_delay_ms: u64,
    /// Period between sweeps (milliseconds)
    pub interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: defaults::timeout::INITIAL_DELAY_MS,
            interval_ms: defaults::timeout::INTERVAL_MS,
        }
    }
}

impl TimeoutSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Settings of one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellSettings {
    pub cell_name: String,

    /// Cell message monitoring
    pub monitor: bool,

    /// Cell classification
    pub cell_class: Option<String>,

    /// Name of the domain context executed as defined setup
    pub defined_setup: Option<String>,

    pub timeout: TimeoutSettings,

    /// Application specific options
    pub options: BTreeMap<String, String>,

    /// Names of options whose values are never logged
    pub sensitive: BTreeSet<String>,
}

impl Default for CellSettings {
    fn default() -> Self {
        Self {
            cell_name: String::new(),
            monitor: false,
            cell_class: None,
            defined_setup: None,
            timeout: TimeoutSettings::default(),
            options: BTreeMap::new(),
            sensitive: BTreeSet::new(),
        }
    }
}

/// One option as reported during startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionValue {
    pub name: String,
    pub description: String,
    pub value: String,
    pub unit: &'static str,
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{} set to {}", self.description, self.value)
        } else {
            write!(f, "{} set to {} {}", self.description, self.value, self.unit)
        }
    }
}

impl CellSettings {
    /// Default settings for the named cell
    pub fn for_cell(cell_name: impl Into<String>) -> Self {
        Self {
            cell_name: cell_name.into(),
            ..Self::default()
        }
    }

    /// Load settings from a TOML file with environment overrides.
    ///
    /// When `environment` is given, `environments/<environment>.toml` next to
    /// the base file is merged on top if it exists.
    pub fn load(base_path: &Path, environment: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from(base_path).required(true));

        if let Some(env) = environment {
            let env_file = base_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(PathBuf::new)
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment settings: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment settings not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::cells::ENV_PREFIX)
                .prefix_separator("_")
                .separator(defaults::cells::ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build cell settings")?;

        let settings: CellSettings = config
            .try_deserialize()
            .context("Failed to deserialize cell settings")?;
        let settings = settings.normalized();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from an inline TOML document
    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, SettingsError> {
        let settings: CellSettings = toml::from_str(contents)?;
        let settings = settings.normalized();
        settings.validate()?;
        Ok(settings)
    }

    /// Empty strings mean "not set"
    fn normalized(mut self) -> Self {
        if self.cell_class.as_deref() == Some("") {
            self.cell_class = None;
        }
        if self.defined_setup.as_deref() == Some("") {
            self.defined_setup = None;
        }
        self
    }

    /// Validate settings
    pub fn validate(&self) -> std::result::Result<(), SettingsError> {
        if self.cell_name.is_empty() {
            return Err(SettingsError::MissingCellName);
        }

        if self.cell_name.contains('@') || self.cell_name.contains(':') {
            return Err(SettingsError::InvalidCellName(self.cell_name.clone()));
        }

        if self.timeout.interval_ms < defaults::timeout::MIN_INTERVAL_MS {
            return Err(SettingsError::IntervalTooShort {
                min: defaults::timeout::MIN_INTERVAL_MS,
                actual: self.timeout.interval_ms,
            });
        }

        Ok(())
    }

    /// Options reported at startup, sensitive ones excluded
    pub fn option_values(&self) -> Vec<OptionValue> {
        let cell_class = self.cell_class.as_deref().unwrap_or("none").to_string();
        let mut values = vec![
            option("monitor", "Cell message monitoring", self.monitor.to_string(), ""),
            option("cell_class", "Cell classification", cell_class, ""),
            option(
                "timeout.initial_delay_ms",
                "Wait queue sweep delay",
                self.timeout.initial_delay_ms.to_string(),
                "ms",
            ),
            option(
                "timeout.interval_ms",
                "Wait queue sweep period",
                self.timeout.interval_ms.to_string(),
                "ms",
            ),
        ];

        values.extend(
            self.options
                .iter()
                .map(|(name, value)| option(name, name, value.clone(), "")),
        );

        values.retain(|v| !self.sensitive.contains(&v.name));
        values
    }

    /// Log every non-sensitive option as "<description> set to <value> <unit>"
    pub fn log_values(&self) {
        for value in self.option_values() {
            info!(option = %value.name, "{}", value);
        }
    }

    /// Application option by name
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

fn option(name: &str, description: &str, value: String, unit: &'static str) -> OptionValue {
    OptionValue {
        name: name.to_string(),
        description: description.to_string(),
        value,
        unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = CellSettings::for_cell("PoolManager");
        assert!(settings.validate().is_ok());
        assert!(!settings.monitor);
        assert_eq!(settings.timeout.interval(), Duration::from_secs(30));
        assert_eq!(settings.timeout.initial_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_base_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cell.toml");

        let contents = r#"
cell_name = "pool_1"
monitor = true
cell_class = "Pool"
defined_setup = ""

[timeout]
interval_ms = 5000

[options]
max_pin_duration = "86400000"
"#;
        fs::write(&path, contents).unwrap();

        let settings = CellSettings::load(&path, None).unwrap();
        assert_eq!(settings.cell_name, "pool_1");
        assert!(settings.monitor);
        assert_eq!(settings.cell_class.as_deref(), Some("Pool"));
        assert_eq!(settings.defined_setup, None);
        assert_eq!(settings.timeout.interval_ms, 5000);
        assert_eq!(settings.timeout.initial_delay_ms, 30_000);
        assert_eq!(settings.option("max_pin_duration"), Some("86400000"));
    }

    #[test]
    fn test_environment_file_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cell.toml");
        fs::write(&path, "cell_name = \"pool_1\"\n").unwrap();

        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("test.toml"),
            "monitor = true\n",
        )
        .unwrap();

        let settings = CellSettings::load(&path, Some("test")).unwrap();
        assert!(settings.monitor);

        let settings = CellSettings::load(&path, Some("missing")).unwrap();
        assert!(!settings.monitor);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            CellSettings::default().validate(),
            Err(SettingsError::MissingCellName)
        );
        assert!(matches!(
            CellSettings::for_cell("a@b").validate(),
            Err(SettingsError::InvalidCellName(_))
        ));

        let mut settings = CellSettings::for_cell("pool");
        settings.timeout.interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::IntervalTooShort { .. })
        ));

        assert!(matches!(
            CellSettings::from_toml_str("cell_name = 42"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_option_values_skip_sensitive() {
        let settings = CellSettings::from_toml_str(
            r#"
cell_name = "gplazma"
sensitive = ["password"]

[options]
password = "secret"
realm = "EXAMPLE.ORG"
"#,
        )
        .unwrap();

        let lines: Vec<String> = settings.option_values().iter().map(|v| v.to_string()).collect();
        assert!(lines.contains(&"Cell message monitoring set to false".to_string()));
        assert!(lines.contains(&"Wait queue sweep period set to 30000 ms".to_string()));
        assert!(lines.contains(&"realm set to EXAMPLE.ORG".to_string()));
        assert!(!lines.iter().any(|l| l.contains("secret")));
    }
}
