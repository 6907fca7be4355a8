//! # castbot configuration
//!
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters
//! - Process-wide instance through [`get_config`]
//!
//! ## Usage
//!
//! ```no_run
//! use castconfig::get_config;
//!
//! let config = get_config();
//! let timeout = config.get_discovery_timeout();
//! let log_dir = config.get_log_directory()?;
//!
//! config.set_preferred_device(Some("Kitchen".to_string()))?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{error, info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("castbot.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_or_defaults(""));
}

pub const ENV_CONFIG_DIR: &str = "CASTBOT_CONFIG";
pub const ENV_PREFIX: &str = "CASTBOT_CONFIG__";
const DIR_NAME: &str = ".castbot";

const DEFAULT_DISCOVERY_TIMEOUT_SECS: usize = 5;
const DEFAULT_REFRESH_INTERVAL_SECS: usize = 300;
const DEFAULT_READY_TIMEOUT_MS: usize = 10_000;
const DEFAULT_READY_POLL_MS: usize = 250;
const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";
const DEFAULT_VOLUME_STEP: f64 = 0.1;
const DEFAULT_HTTP_TIMEOUT_SECS: usize = 15;
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4096;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_LOG_DIRECTORY: &str = "logs";
const DEFAULT_LOG_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_LOG_MAX_FILES: usize = 5;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse().unwrap_or($default),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value as u64)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// castbot configuration.
///
/// Values live in one YAML tree; getters fall back to the built-in default
/// when a key is missing or has the wrong type.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    /// Empty when running on the embedded defaults only.
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.lock().clone()),
        }
    }
}

impl Config {
    fn lock(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(DIR_NAME).exists() {
            return DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        DIR_NAME.to_string()
    }

    /// Creates the directory if needed and checks it is readable and writable
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

        fs::read_dir(path)?;
        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `CASTBOT_CONFIG` environment variable
    /// 3. `.castbot` in the current directory
    /// 4. `.castbot` in the user's home directory
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid config directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file=%path, "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &Self::lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file=%path, "Config file not found, using default embedded config")
            }
        }

        let mut config_value = Self::lower_keys_value(config_value);
        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Embedded defaults plus environment overrides, never written to disk.
    pub fn from_defaults() -> Self {
        let mut value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap_or(Value::Mapping(Mapping::new()));
        Self::apply_env_overrides(&mut value);
        Config {
            config_dir: ".".to_string(),
            path: String::new(),
            data: Mutex::new(value),
        }
    }

    fn load_or_defaults(directory: &str) -> Self {
        match Self::load_config(directory) {
            Ok(config) => config,
            Err(e) => {
                error!("Cannot load configuration ({:#}), running on defaults", e);
                Self::from_defaults()
            }
        }
    }

    pub fn config_directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// `path` is an array of keys, e.g. `&["devices", "preferred_name"]`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if data.is_null() {
            *data = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        Self::get_value_internal(&self.lock(), path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(e) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var=%key, "Ignoring override: {}", e);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif au répertoire de configuration et le crée si besoin
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory=%absolute_path.display(), "Created directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Absolu ou relatif au répertoire de configuration ; créé s'il
    /// n'existe pas.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    // ------------------------------------------------------------------
    // devices
    // ------------------------------------------------------------------

    impl_usize_config!(
        get_discovery_timeout_secs,
        set_discovery_timeout_secs,
        &["devices", "discovery_timeout_secs"],
        DEFAULT_DISCOVERY_TIMEOUT_SECS
    );

    impl_usize_config!(
        get_refresh_interval_secs,
        set_refresh_interval_secs,
        &["devices", "refresh_interval_secs"],
        DEFAULT_REFRESH_INTERVAL_SECS
    );

    pub fn get_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.get_discovery_timeout_secs().max(1) as u64)
    }

    /// `None` disables the periodic refresh.
    pub fn get_refresh_interval(&self) -> Option<Duration> {
        match self.get_refresh_interval_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs as u64)),
        }
    }

    pub fn get_preferred_device(&self) -> Option<String> {
        match self.get_value(&["devices", "preferred_name"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    pub fn set_preferred_device(&self, name: Option<String>) -> Result<()> {
        let value = name.map(Value::String).unwrap_or(Value::Null);
        self.set_value(&["devices", "preferred_name"], value)
    }

    // ------------------------------------------------------------------
    // playback
    // ------------------------------------------------------------------

    impl_usize_config!(
        get_ready_timeout_ms,
        set_ready_timeout_ms,
        &["playback", "ready_timeout_ms"],
        DEFAULT_READY_TIMEOUT_MS
    );

    impl_usize_config!(
        get_ready_poll_ms,
        set_ready_poll_ms,
        &["playback", "ready_poll_ms"],
        DEFAULT_READY_POLL_MS
    );

    impl_string_config!(
        get_content_type,
        set_content_type,
        &["playback", "content_type"],
        DEFAULT_CONTENT_TYPE
    );

    pub fn get_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.get_ready_timeout_ms() as u64)
    }

    pub fn get_ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.get_ready_poll_ms().max(1) as u64)
    }

    /// Volume increment, on the receiver 0.0-1.0 scale.
    pub fn get_volume_step(&self) -> f64 {
        let step = match self.get_value(&["playback", "volume_step"]) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT_VOLUME_STEP),
            _ => DEFAULT_VOLUME_STEP,
        };
        if step > 0.0 && step <= 1.0 {
            step
        } else {
            warn!("Invalid volume step {}, using default {}", step, DEFAULT_VOLUME_STEP);
            DEFAULT_VOLUME_STEP
        }
    }

    pub fn set_volume_step(&self, step: f64) -> Result<()> {
        self.set_value(&["playback", "volume_step"], Value::Number(Number::from(step)))
    }

    // ------------------------------------------------------------------
    // catalog / chat
    // ------------------------------------------------------------------

    impl_usize_config!(
        get_http_timeout_secs,
        set_http_timeout_secs,
        &["catalog", "http_timeout_secs"],
        DEFAULT_HTTP_TIMEOUT_SECS
    );

    pub fn get_http_timeout(&self) -> Duration {
        Duration::from_secs(self.get_http_timeout_secs().max(1) as u64)
    }

    impl_usize_config!(
        get_max_message_length,
        set_max_message_length,
        &["chat", "max_message_length"],
        DEFAULT_MAX_MESSAGE_LENGTH
    );

    // ------------------------------------------------------------------
    // host.logger
    // ------------------------------------------------------------------

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_usize_config!(
        get_log_max_file_size,
        set_log_max_file_size,
        &["host", "logger", "max_file_size"],
        DEFAULT_LOG_MAX_FILE_SIZE
    );

    impl_usize_config!(
        get_log_max_files,
        set_log_max_files,
        &["host", "logger", "max_files"],
        DEFAULT_LOG_MAX_FILES
    );

    /// Log directory, created if needed.
    pub fn get_log_directory(&self) -> Result<String> {
        self.get_managed_dir(&["host", "logger", "directory"], DEFAULT_LOG_DIRECTORY)
    }
}

/// Returns the global configuration instance, loaded on first access.
///
/// When the configuration directory cannot be used the embedded defaults
/// are served instead (and nothing is written).
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
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
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
