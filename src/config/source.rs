//! A [`config::Source`] reading one scope out of the pipeline's TOML file.
//!
//! ```toml
//! version = 1                        # global scope
//! base_url = "https://api.example.com"
//!
//! [profiles.staging]                 # profile scope
//! base_url = "https://staging.example.com"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{ConfigError, Source, Value, ValueKind};

#[derive(thiserror::Error, Debug)]
pub enum ConfigSourceError {
    #[error("Failed to read file {0}: {1}")]
    FailedToReadFile(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    FailedToParseTOML(#[from] toml::de::Error),

    #[error("Invalid table {0:?}, was expecting a table")]
    ExpectedTable(String),

    #[error("Unsupported value for key {0:?}, only scalars are allowed")]
    UnsupportedValue(String),
}

impl From<ConfigSourceError> for ConfigError {
    fn from(error: ConfigSourceError) -> Self {
        ConfigError::Foreign(Box::new(error))
    }
}

/// Which part of the file a [`TomlScopeSource`] reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// The top-level scalar keys.
    Global,
    /// The `[profiles.<name>]` table. A missing profile is an empty source.
    Profile(String),
}

#[derive(Clone, Debug)]
pub struct TomlScopeSource {
    path: PathBuf,
    scope: Scope,
    required: bool,
}

impl TomlScopeSource {
    pub fn global(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scope: Scope::Global,
            required: true,
        }
    }

    pub fn profile(path: impl Into<PathBuf>, profile_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scope: Scope::Profile(profile_name.into()),
            required: true,
        }
    }

    /// Treat a missing file as an empty source instead of an error.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    fn origin(&self) -> String {
        match &self.scope {
            Scope::Global => format!("{}", self.path.display()),
            Scope::Profile(name) => format!("{}#profiles.{name}", self.path.display()),
        }
    }
}

impl Source for TomlScopeSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let Some(root) = read_table(&self.path, self.required)? else {
            return Ok(HashMap::new());
        };

        let table = match &self.scope {
            Scope::Global => root,
            Scope::Profile(name) => match profile_table(root, name)? {
                Some(table) => table,
                None => return Ok(HashMap::new()),
            },
        };

        Ok(scalars(&self.origin(), table)?)
    }
}

fn read_table(path: &Path, required: bool) -> Result<Option<toml::Table>, ConfigSourceError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigSourceError::FailedToReadFile(path.to_path_buf(), e)),
    };
    Ok(Some(content.parse::<toml::Table>()?))
}

fn profile_table(
    mut root: toml::Table,
    name: &str,
) -> Result<Option<toml::Table>, ConfigSourceError> {
    let Some(profiles) = root.remove("profiles") else {
        return Ok(None);
    };
    let toml::Value::Table(mut profiles) = profiles else {
        return Err(ConfigSourceError::ExpectedTable("profiles".to_string()));
    };
    match profiles.remove(name) {
        None => Ok(None),
        Some(toml::Value::Table(table)) => Ok(Some(table)),
        Some(_) => Err(ConfigSourceError::ExpectedTable(format!("profiles.{name}"))),
    }
}

/// Flatten a table's scalar entries into config values. Nested tables are
/// skipped (the `profiles` table lives next to the global keys); arrays and
/// datetimes are rejected since no setting takes them.
fn scalars(
    origin: &str,
    table: toml::Table,
) -> Result<HashMap<String, Value>, ConfigSourceError> {
    let mut values = HashMap::new();
    for (key, value) in table {
        let kind = match value {
            toml::Value::String(s) => ValueKind::String(s),
            toml::Value::Integer(i) => ValueKind::I64(i),
            toml::Value::Float(f) => ValueKind::Float(f),
            toml::Value::Boolean(b) => ValueKind::Boolean(b),
            toml::Value::Table(_) => continue,
            toml::Value::Array(_) | toml::Value::Datetime(_) => {
                return Err(ConfigSourceError::UnsupportedValue(key));
            }
        };
        values.insert(key, Value::new(Some(&origin.to_string()), kind));
    }
    Ok(values)
}
