//! core::config
//!
//! Key-value configuration store.
//!
//! # Overview
//!
//! Every command reads its configuration through a single [`ConfigStore`].
//! Values come from layered sources and are read back through typed getters
//! (`get_string`, `get_bool`, `get_int`, `get_duration`).
//!
//! # Precedence
//!
//! A lookup resolves, highest first:
//! 1. Values written with [`ConfigStore::set`]
//! 2. Bound flags that were given on the command line
//! 3. Bound environment variables present in the environment
//! 4. Config files ([`ConfigStore::load_defaults`], [`ConfigStore::merge_file`])
//! 5. Defaults of bound flags that were not given
//!
//! Keys are case-insensitive.
//!
//! # Config File Locations
//!
//! [`ConfigStore::load_defaults`] layers, later overriding earlier:
//! 1. The embedded `defaults.toml`
//! 2. The embedded `dev.toml` when `APP_ENV` is unset or `dev`
//! 3. The first existing user file of:
//!    - `$DEPLOY_RUNNER_CONFIG`
//!    - `$XDG_CONFIG_HOME/deploy-runner/config.toml`
//!    - `~/.deploy-runner/config.toml`
//!
//! # Concurrency
//!
//! The store is shared as `Arc<ConfigStore>`. Binding happens once before a
//! command runs; afterwards constructed dependencies only read.
//!
//! # Example
//!
//! ```
//! use deploy_runner::core::config::{keys, ConfigStore};
//!
//! let store = ConfigStore::with_env([("LOG_LEVEL", "warn")]);
//! store.bind_env(keys::LOG_LEVEL.as_str(), "LOG_LEVEL").unwrap();
//! assert_eq!(store.get_string("log_level"), "warn");
//!
//! store.set("LOG_LEVEL", "error");
//! assert_eq!(store.get_string("LOG_LEVEL"), "error");
//! ```

pub mod env;
pub mod keys;
pub mod value;

pub use env::EnvVar;
pub use keys::Key;
pub use value::{format_duration, parse_duration, ConfigValue};

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;

const DEFAULTS_TOML: &str = include_str!("defaults/defaults.toml");
const DEV_TOML: &str = include_str!("defaults/dev.toml");

/// Environment variable naming an explicit user config file.
pub const CONFIG_PATH_ENV: &str = "DEPLOY_RUNNER_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config '{origin}': {message}")]
    ParseError { origin: String, message: String },

    #[error("config key must not be empty")]
    EmptyKey,

    #[error("environment variable name for key '{key}' must not be empty")]
    EmptyEnvName { key: String },
}

/// A flag value captured from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagValue {
    /// Raw textual value (the flag default when not given).
    pub raw: String,
    /// Whether the user passed the flag explicitly.
    pub changed: bool,
}

impl FlagValue {
    /// A flag given on the command line.
    pub fn given(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            changed: true,
        }
    }

    /// A flag left at its default.
    pub fn default_value(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            changed: false,
        }
    }
}

/// Source of environment variable values.
type EnvSource = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct Layers {
    overrides: HashMap<String, ConfigValue>,
    flags: HashMap<String, FlagValue>,
    env_bindings: HashMap<String, Vec<String>>,
    files: HashMap<String, ConfigValue>,
}

/// Layered key-value configuration store.
pub struct ConfigStore {
    layers: RwLock<Layers>,
    env: EnvSource,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers = self.read();
        f.debug_struct("ConfigStore")
            .field("overrides", &layers.overrides.len())
            .field("flags", &layers.flags.len())
            .field("env_bindings", &layers.env_bindings.len())
            .field("files", &layers.files.len())
            .finish()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl ConfigStore {
    /// Create an empty store reading the process environment.
    pub fn new() -> Self {
        Self::with_env_source(|name| std::env::var(name).ok())
    }

    /// Create an empty store reading a fixed set of environment variables.
    pub fn with_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_env_source(move |name| vars.get(name).cloned())
    }

    /// Create an empty store with a custom environment lookup.
    pub fn with_env_source<F>(source: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            layers: RwLock::new(Layers::default()),
            env: Arc::new(source),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Layers> {
        self.layers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Layers> {
        self.layers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a variable in this store's environment source.
    pub fn lookup_env(&self, name: &str) -> Option<String> {
        (self.env)(name)
    }

    // =========================================================================
    // Writes and bindings
    // =========================================================================

    /// Set an override value. Overrides beat every other source.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) {
        self.write().overrides.insert(normalize(key), value.into());
    }

    /// Bind an environment variable name to a key.
    ///
    /// A key may have several variables; the first one present wins.
    /// Binding the same name twice is a no-op.
    pub fn bind_env(&self, key: &str, name: &str) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if name.is_empty() {
            return Err(ConfigError::EmptyEnvName {
                key: key.to_string(),
            });
        }
        let mut layers = self.write();
        let names = layers.env_bindings.entry(normalize(key)).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        Ok(())
    }

    /// Bind a captured flag value to a key, replacing any earlier binding.
    pub fn bind_flag(&self, key: &str, flag: FlagValue) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        self.write().flags.insert(normalize(key), flag);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Resolve a key through all layers.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let key = normalize(key);
        let layers = self.read();

        if let Some(v) = layers.overrides.get(&key) {
            return Some(v.clone());
        }
        if let Some(flag) = layers.flags.get(&key).filter(|f| f.changed) {
            return Some(ConfigValue::String(flag.raw.clone()));
        }
        if let Some(names) = layers.env_bindings.get(&key) {
            if let Some(value) = names.iter().find_map(|n| self.lookup_env(n)) {
                return Some(ConfigValue::String(value));
            }
        }
        if let Some(v) = layers.files.get(&key) {
            return Some(v.clone());
        }
        layers
            .flags
            .get(&key)
            .map(|f| ConfigValue::String(f.raw.clone()))
    }

    /// Whether any layer has a value for the key.
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Read a string, empty when unset.
    pub fn get_string(&self, key: &str) -> String {
        self.get(key).map(|v| v.as_string()).unwrap_or_default()
    }

    /// Read a boolean, `false` when unset or not a boolean.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Read an integer, `0` when unset or not an integer.
    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or(0)
    }

    /// Read a duration, zero when unset or malformed.
    pub fn get_duration(&self, key: &str) -> Duration {
        self.get(key)
            .and_then(|v| v.as_duration())
            .unwrap_or(Duration::ZERO)
    }

    // =========================================================================
    // Config files
    // =========================================================================

    /// Merge TOML text into the file layer. Nested tables become dotted keys.
    pub fn merge_toml(&self, origin: &str, contents: &str) -> Result<(), ConfigError> {
        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| {
            ConfigError::ParseError {
                origin: origin.to_string(),
                message: e.to_string(),
            }
        })?;

        let mut flat = Vec::new();
        flatten_table("", &table, &mut flat);

        let mut layers = self.write();
        for (key, value) in flat {
            layers.files.insert(normalize(&key), value);
        }
        Ok(())
    }

    /// Merge a TOML file into the file layer.
    pub fn merge_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.merge_toml(&path.display().to_string(), &contents)
    }

    /// Load the embedded defaults and the user config file, if any.
    pub fn load_defaults(&self) -> Result<(), ConfigError> {
        self.merge_toml("defaults.toml", DEFAULTS_TOML)?;

        let app_env = self
            .lookup_env(keys::APP_ENV.as_str())
            .unwrap_or_else(|| "dev".to_string());
        if app_env == "dev" {
            self.merge_toml("dev.toml", DEV_TOML)?;
        }

        if let Some(path) = self.user_config_path() {
            self.merge_file(&path)?;
        }
        Ok(())
    }

    /// Locate the user config file.
    ///
    /// Returns the first existing path of `$DEPLOY_RUNNER_CONFIG`,
    /// `$XDG_CONFIG_HOME/deploy-runner/config.toml` and
    /// `~/.deploy-runner/config.toml`.
    pub fn user_config_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.lookup_env(CONFIG_PATH_ENV).map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(xdg_home) = self.lookup_env("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("deploy-runner/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".deploy-runner/config.toml"))
            .filter(|path| path.exists())
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut Vec<(String, ConfigValue)>) {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&key, nested, out),
            other => {
                if let Some(v) = ConfigValue::from_toml(other) {
                    out.push((key, v));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn unset_keys_read_as_zero_values() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        assert_eq!(store.get_string("missing"), "");
        assert!(!store.get_bool("missing"));
        assert_eq!(store.get_int("missing"), 0);
        assert_eq!(store.get_duration("missing"), Duration::ZERO);
        assert!(!store.is_set("missing"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.set("Log_Level", "warn");
        assert_eq!(store.get_string("LOG_LEVEL"), "warn");
        assert_eq!(store.get_string("log_level"), "warn");
    }

    #[test]
    fn set_beats_flag_env_and_file() {
        let store = ConfigStore::with_env([("PORT_VAR", "2")]);
        store.merge_toml("test", "PORT = 1").unwrap();
        store.bind_env("PORT", "PORT_VAR").unwrap();
        store.bind_flag("PORT", FlagValue::given("3")).unwrap();
        store.set("PORT", 4i64);
        assert_eq!(store.get_int("PORT"), 4);
    }

    #[test]
    fn changed_flag_beats_env() {
        let store = ConfigStore::with_env([("PORT_VAR", "2")]);
        store.bind_env("PORT", "PORT_VAR").unwrap();
        store.bind_flag("PORT", FlagValue::given("3")).unwrap();
        assert_eq!(store.get_int("PORT"), 3);
    }

    #[test]
    fn env_beats_file_and_unchanged_flag() {
        let store = ConfigStore::with_env([("PORT_VAR", "2")]);
        store.merge_toml("test", "PORT = 1").unwrap();
        store
            .bind_flag("PORT", FlagValue::default_value("0"))
            .unwrap();
        store.bind_env("PORT", "PORT_VAR").unwrap();
        assert_eq!(store.get_int("PORT"), 2);
    }

    #[test]
    fn file_beats_unchanged_flag_default() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.merge_toml("test", "PORT = 1").unwrap();
        store
            .bind_flag("PORT", FlagValue::default_value("0"))
            .unwrap();
        assert_eq!(store.get_int("PORT"), 1);
    }

    #[test]
    fn unchanged_flag_default_is_last_resort() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store
            .bind_flag("TIMEOUT", FlagValue::default_value("1s"))
            .unwrap();
        assert_eq!(store.get_duration("TIMEOUT"), Duration::from_secs(1));
    }

    #[test]
    fn first_present_env_name_wins() {
        let store = ConfigStore::with_env([("SECOND", "b")]);
        store.bind_env("KEY", "FIRST").unwrap();
        store.bind_env("KEY", "SECOND").unwrap();
        assert_eq!(store.get_string("KEY"), "b");
    }

    #[test]
    fn binding_rejects_empty_names() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        assert!(matches!(store.bind_env("", "X"), Err(ConfigError::EmptyKey)));
        assert!(matches!(
            store.bind_env("KEY", ""),
            Err(ConfigError::EmptyEnvName { .. })
        ));
        assert!(matches!(
            store.bind_flag("", FlagValue::given("1")),
            Err(ConfigError::EmptyKey)
        ));
    }

    #[test]
    fn nested_tables_flatten_to_dotted_keys() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store
            .merge_toml("test", "[server]\nport = 9000\n[server.tls]\nenabled = true\n")
            .unwrap();
        assert_eq!(store.get_int("server.port"), 9000);
        assert!(store.get_bool("server.tls.enabled"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        let err = store.merge_toml("broken", "LOG_LEVEL = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn dev_defaults_apply_without_app_env() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.load_defaults().unwrap();
        assert_eq!(store.get_string(keys::LOG_FORMAT.as_str()), "console");
        assert!(store.get_bool(keys::DEV_MODE.as_str()));
        assert_eq!(store.get_int(keys::LOG_SAMPLE_EVERY.as_str()), 50);
    }

    #[test]
    fn production_skips_dev_defaults() {
        let store = ConfigStore::with_env([("APP_ENV", "prod")]);
        store.load_defaults().unwrap();
        assert_eq!(store.get_string(keys::LOG_FORMAT.as_str()), "json");
        assert!(!store.get_bool(keys::DEV_MODE.as_str()));
    }

    #[test]
    fn explicit_user_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "LOG_LEVEL = \"error\"").unwrap();
        let path = file.path().display().to_string();

        let store = ConfigStore::with_env([("APP_ENV", "prod".to_string()), (CONFIG_PATH_ENV, path)]);
        store.load_defaults().unwrap();
        assert_eq!(store.get_string(keys::LOG_LEVEL.as_str()), "error");
        assert_eq!(store.user_config_path().as_deref(), Some(file.path()));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        let err = store
            .merge_file(Path::new("/nonexistent/deploy-runner.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
