//! Configuration collaborator and engine settings.
//!
//! The engine never owns persisted state. It reads and writes flat boolean
//! and integer keys through a [`ConfigStore`], keyed by feature path under a
//! fixed namespace prefix.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{EngineError, Result};

/// Namespace for the persisted state of switchable features.
pub const SWITCH_KEY_PREFIX: &str = "setting_switch_value_";

/// Namespace for the persisted state of clickable features.
pub const CLICKABLE_KEY_PREFIX: &str = "clickable_setting_switch_value_";

/// Namespace for engine-wide settings.
pub const SETTING_KEY_PREFIX: &str = "setting_cfg_value_";

/// Persisted key for a switchable feature.
pub fn switch_key(path: &str) -> String {
    format!("{SWITCH_KEY_PREFIX}{path}")
}

/// Persisted key for a clickable feature.
pub fn clickable_key(path: &str) -> String {
    format!("{CLICKABLE_KEY_PREFIX}{path}")
}

/// Persisted key for an engine setting.
pub fn setting_key(name: &str) -> String {
    format!("{SETTING_KEY_PREFIX}{name}")
}

/// Key/value storage supplied by the host.
pub trait ConfigStore: Send + Sync {
    /// Read a boolean, falling back to `default` when absent or mistyped.
    fn get_bool(&self, key: &str, default: bool) -> bool;

    /// Persist a boolean.
    fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Read an integer, falling back to `default` when absent or mistyped.
    fn get_int(&self, key: &str, default: i64) -> i64;
}

/// Process-local store, used by tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RwLock<HashMap<String, toml::Value>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an integer value.
    pub fn set_int(&self, key: &str, value: i64) {
        self.values
            .write()
            .insert(key.to_string(), toml::Value::Integer(value));
    }

    /// Builder-style boolean preset.
    pub fn with_bool(self, key: impl Into<String>, value: bool) -> Self {
        self.values
            .write()
            .insert(key.into(), toml::Value::Boolean(value));
        self
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .read()
            .get(key)
            .and_then(toml::Value::as_bool)
            .unwrap_or(default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.values
            .write()
            .insert(key.to_string(), toml::Value::Boolean(value));
        Ok(())
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .read()
            .get(key)
            .and_then(toml::Value::as_integer)
            .unwrap_or(default)
    }
}

/// File-backed store holding a flat TOML table.
///
/// Every write rewrites the whole file; writes happen only on the toggle path,
/// never inside an intercept callback.
#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    table: RwLock<toml::Table>,
}

impl TomlConfigStore {
    /// Open a store at `path`. A missing file yields an empty table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = match std::fs::read_to_string(&path) {
            Ok(content) => content.parse::<toml::Table>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    /// Open the store at its default location.
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path().ok_or_else(|| {
            EngineError::ConfigError("no configuration directory available".to_string())
        })?;
        Self::open(path)
    }

    /// Default location: `<config dir>/hookkit/features.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hookkit").join("features.toml"))
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, table: &toml::Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(table)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ConfigStore for TomlConfigStore {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.table
            .read()
            .get(key)
            .and_then(toml::Value::as_bool)
            .unwrap_or(default)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        let mut table = self.table.write();
        table.insert(key.to_string(), toml::Value::Boolean(value));
        self.save(&table)
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.table
            .read()
            .get(key)
            .and_then(toml::Value::as_integer)
            .unwrap_or(default)
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Emit verbose lifecycle diagnostics
    #[serde(default)]
    pub verbose_log: bool,

    /// Priority for intercepts installed without an explicit one
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            verbose_log: false,
            default_priority: default_priority(),
        }
    }
}

impl EngineSettings {
    /// Read settings from the `setting_cfg_value_` namespace of a store.
    pub fn from_store(store: &dyn ConfigStore) -> Self {
        let priority = store.get_int(&setting_key("hook_priority"), default_priority() as i64);

        Self {
            verbose_log: store.get_bool(&setting_key("verbose_log"), false),
            default_priority: i32::try_from(priority).unwrap_or_else(|_| default_priority()),
        }
    }
}

fn default_priority() -> i32 {
    50
}
