//! # moodconfig - configuration for the mood stream workspace
//!
//! This crate provides configuration management for every crate of the
//! workspace:
//! - Loading configuration from a YAML file
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed section access for the library crates
//! - A lazily loaded process-wide instance for the binary
//!
//! ## Usage
//!
//! ```no_run
//! use moodconfig::get_config;
//!
//! let config = get_config();
//! let timeout = config.get_generation_timeout_seconds()?;
//! config.set_value(&["playback", "initial_volume"], serde_yaml::Value::from(0.5))?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Library crates never reach for the global instance. They deserialize
//! their own section with [`Config::get_section`] and take the typed struct
//! as a constructor argument.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

const DEFAULT_CONFIG: &str = include_str!("moodstream.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load mood stream configuration"));
}

const ENV_CONFIG_DIR: &str = "MOODSTREAM_CONFIG";
const ENV_PREFIX: &str = "MOODSTREAM_CONFIG__";
const CONFIG_DIR_NAME: &str = ".moodstream";

const DEFAULT_GENERATION_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Configuration manager
///
/// Holds the merged YAML tree. Keys are lower-cased on load so lookups are
/// case-insensitive, which keeps environment overrides simple.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data.lock().clone()),
        }
    }
}

impl Config {
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `MOODSTREAM_CONFIG` environment variable
    /// 3. `.moodstream` in the current directory
    /// 4. `.moodstream` in the user's home directory
    ///
    /// The embedded defaults are merged with `config.yaml` when present,
    /// then `MOODSTREAM_CONFIG__SECTION__KEY=value` variables are applied and
    /// the merged result is written back.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&config_dir))?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir).join("config.yaml");

        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut value, &external);
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
            }
        }

        let mut value = lower_keys_value(value);
        apply_env_overrides(&mut value);

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(value),
        };
        config.save()?;
        Ok(config)
    }

    /// Builds a configuration that lives only in memory
    ///
    /// `overrides` is merged on top of the embedded defaults. Nothing is read
    /// from or written to disk, and environment overrides are not applied.
    pub fn from_yaml_str(overrides: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !overrides.trim().is_empty() {
            let external: Value = serde_yaml::from_str(overrides)?;
            merge_yaml(&mut value, &external);
        }
        Ok(Config {
            config_dir: String::new(),
            path: None,
            data: Mutex::new(lower_keys_value(value)),
        })
    }

    /// Directory holding `config.yaml` (empty for in-memory configurations)
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.data.lock())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            match current {
                Value::Mapping(map) => match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                },
                _ => return Err(anyhow!("Path {} is not a mapping", path[..i].join("."))),
            }
        }
        Ok(current.clone())
    }

    /// Deserializes the subtree at `path` into a typed section
    ///
    /// A missing path yields `T::default()`, so sections can rely on their
    /// own serde defaults.
    pub fn get_section<T>(&self, path: &[&str]) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.get_value(path) {
            Ok(value) => Ok(serde_yaml::from_value(value)?),
            Err(_) => Ok(T::default()),
        }
    }

    /// Resolves a path from the configuration against the config directory
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() || self.config_dir.is_empty() {
            candidate.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(candidate)
        }
    }

    /// Base URL of the generation service
    pub fn get_generation_base_url(&self) -> Result<String> {
        match self.get_value(&["generation", "base_url"])? {
            Value::String(s) if !s.is_empty() => Ok(s),
            _ => Err(anyhow!("generation.base_url is not configured")),
        }
    }

    impl_u64_config!(
        get_generation_timeout_seconds,
        set_generation_timeout_seconds,
        &["generation", "timeout_seconds"],
        DEFAULT_GENERATION_TIMEOUT_SECONDS
    );

    impl_u64_config!(
        get_device_debounce_ms,
        set_device_debounce_ms,
        &["devices", "debounce_ms"],
        DEFAULT_DEBOUNCE_MS
    );
}

/// Returns the global configuration instance
///
/// Lazily loaded on first access. Panics if the configuration directory
/// cannot be created or the YAML is invalid.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn apply_env_overrides(config: &mut Value) {
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let _ = set_value_internal(config, &key_path, convert_env_value(&value));
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct MergeSection {
        initial_count: usize,
        keep_generated_count: usize,
    }

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_generation_timeout_seconds().unwrap(), 120);
        assert_eq!(config.get_device_debounce_ms().unwrap(), 300);
        assert_eq!(
            config.get_generation_base_url().unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_overrides_merge_per_key() {
        let config = Config::from_yaml_str("merge:\n  keep_generated_count: 5\n").unwrap();
        let merge: MergeSection = config.get_section(&["merge"]).unwrap();
        assert_eq!(merge.initial_count, 3);
        assert_eq!(merge.keep_generated_count, 5);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let config = Config::from_yaml_str("Retry:\n  Max_Attempts: 5\n").unwrap();
        let value = config.get_value(&["retry", "max_attempts"]).unwrap();
        assert_eq!(value.as_u64(), Some(5));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config = Config::from_yaml_str("").unwrap();
        let section: MergeSection = config.get_section(&["does", "not", "exist"]).unwrap();
        assert_eq!(section.initial_count, 0);
    }

    #[test]
    fn test_load_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();
        fs::write(
            dir.path().join("config.yaml"),
            "devices:\n  debounce_ms: 120\n",
        )
        .unwrap();

        let config = Config::load_config(&dir_str).unwrap();
        assert_eq!(config.get_device_debounce_ms().unwrap(), 120);

        config.set_generation_timeout_seconds(60).unwrap();
        let reloaded = Config::load_config(&dir_str).unwrap();
        assert_eq!(reloaded.get_generation_timeout_seconds().unwrap(), 60);
        assert_eq!(reloaded.get_device_debounce_ms().unwrap(), 120);
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(config.resolve_path("media"), dir.path().join("media"));
        assert_eq!(config.resolve_path("/abs/media"), PathBuf::from("/abs/media"));
    }
}
