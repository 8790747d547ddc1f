//! # fsfault-config
//!
//! Configuration management for fsfault.
//!
//! Loads configuration from:
//! 1. `~/.fsfault/config.toml` (global)
//! 2. `.fsfault/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

pub use fsfault_engine::InjectorConfig;

/// Injector environment contract shared by the controller and the preload layer.
pub const ENV_TARGET: &str = "FSFAULT_TARGET";
pub const ENV_PID: &str = "FSFAULT_PID";
pub const ENV_ERRNO: &str = "FSFAULT_ERRNO";
pub const ENV_MAX_INJECTIONS: &str = "FSFAULT_MAX_INJECTIONS";
pub const ENV_AGGRESSIVE: &str = "FSFAULT_AGGRESSIVE";
pub const ENV_EVENT_LOG: &str = "FSFAULT_EVENT_LOG";
/// When truthy the preload layer waits for the host to call `fsfault_activate`.
pub const ENV_DEFER: &str = "FSFAULT_DEFER";
/// Log filter for fsfault binaries and the preload layer (falls back to `RUST_LOG`).
pub const ENV_LOG: &str = "FSFAULT_LOG";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub injector: InjectorConfig,
    pub exerciser: ExerciserConfig,
    pub controller: ControllerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_layers(global.as_deref(), Path::new(Self::PROJECT_CONFIG))?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub const PROJECT_CONFIG: &'static str = ".fsfault/config.toml";

    /// Global config path: ~/.fsfault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fsfault/config.toml"))
    }

    /// Reads the global file, then lays the project file over it key by key.
    /// Missing files are skipped.
    pub fn load_layers(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in global.into_iter().chain(std::iter::once(project)) {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, layer);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Apply environment variable overrides. `lookup` stands in for the process
    /// environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        apply_injector_env(&mut self.injector, &lookup)?;
        if let Some(path) = lookup(ENV_EVENT_LOG) {
            self.controller.event_log = PathBuf::from(path);
        }
        Ok(())
    }

    /// Environment for a child process that should run under the injector.
    pub fn injector_env(&self) -> Vec<(String, String)> {
        injector_env(&self.injector, &self.controller.event_log)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Renders `injector` as the environment contract read by the preload layer.
pub fn injector_env(injector: &InjectorConfig, event_log: &Path) -> Vec<(String, String)> {
    vec![
        (ENV_TARGET.to_string(), injector.target.clone()),
        (ENV_PID.to_string(), injector.pid.to_string()),
        (ENV_ERRNO.to_string(), injector.errno.to_string()),
        (ENV_MAX_INJECTIONS.to_string(), injector.max_injections.to_string()),
        (
            ENV_AGGRESSIVE.to_string(),
            u8::from(injector.aggressive).to_string(),
        ),
        (ENV_EVENT_LOG.to_string(), event_log.display().to_string()),
    ]
}

/// Injector settings from the environment alone, on top of the defaults.
pub fn injector_from_env<F>(lookup: F) -> Result<InjectorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut injector = InjectorConfig::default();
    apply_injector_env(&mut injector, &lookup)?;
    Ok(injector)
}

fn apply_injector_env<F>(injector: &mut InjectorConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(target) = lookup(ENV_TARGET) {
        injector.target = target;
    }
    if let Some(pid) = parse_env(lookup, ENV_PID)? {
        injector.pid = pid;
    }
    if let Some(errno) = parse_env(lookup, ENV_ERRNO)? {
        injector.errno = errno;
    }
    if let Some(max) = parse_env(lookup, ENV_MAX_INJECTIONS)? {
        injector.max_injections = max;
    }
    if let Some(value) = lookup(ENV_AGGRESSIVE) {
        injector.aggressive = parse_flag(&value).ok_or(ConfigError::InvalidEnv {
            key: ENV_AGGRESSIVE,
            value,
        })?;
    }
    Ok(())
}

fn parse_env<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Exerciser configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciserConfig {
    /// Delay between scenario runs
    pub interval_ms: u64,
    /// Scratch directory the exerciser creates and works in
    pub sandbox_dir: PathBuf,
}

impl Default for ExerciserConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            sandbox_dir: PathBuf::from("fs_sandbox"),
        }
    }
}

/// Controller (`fsfault` CLI) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds to wait for an override record per error variant
    pub variant_timeout_secs: u64,
    /// Injection ceiling used for each sweep variant
    pub sweep_max_injections: u64,
    /// Preload library (None = search next to the executable)
    pub preload_path: Option<PathBuf>,
    /// Exerciser binary (None = search next to the executable)
    pub exerciser_path: Option<PathBuf>,
    /// Where the injector appends event records
    pub event_log: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            variant_timeout_secs: 10,
            sweep_max_injections: 1000,
            preload_path: None,
            exerciser_path: None,
            event_log: PathBuf::from("fsfault-events.log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.injector.target, "readlink");
        assert_eq!(config.injector.errno, 13);
        assert_eq!(config.injector.max_injections, 1);
        assert!(config.injector.aggressive);
        assert_eq!(config.exerciser.interval_ms, 200);
        assert_eq!(config.controller.variant_timeout_secs, 10);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[injector]"));
        assert!(toml_str.contains("[exerciser]"));
        assert!(toml_str.contains("[controller]"));
        assert!(toml_str.contains("readlink"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                (ENV_TARGET, "unlinkat"),
                (ENV_PID, "4242"),
                (ENV_ERRNO, "28"),
                (ENV_MAX_INJECTIONS, "5"),
                (ENV_AGGRESSIVE, "off"),
                (ENV_EVENT_LOG, "/tmp/ev.log"),
            ]))
            .unwrap();
        assert_eq!(config.injector.target, "unlinkat");
        assert_eq!(config.injector.pid, 4242);
        assert_eq!(config.injector.errno, 28);
        assert_eq!(config.injector.max_injections, 5);
        assert!(!config.injector.aggressive);
        assert_eq!(config.controller.event_log, PathBuf::from("/tmp/ev.log"));
    }

    #[test]
    fn test_unparsable_env_is_an_error() {
        let err = injector_from_env(env(&[(ENV_ERRNO, "EACCES")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: ENV_ERRNO, .. }));

        let err = injector_from_env(env(&[(ENV_AGGRESSIVE, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: ENV_AGGRESSIVE, .. }));
    }

    #[test]
    fn test_negative_errno_parses_and_fails_validation_later() {
        let injector = injector_from_env(env(&[(ENV_ERRNO, "-5")])).unwrap();
        assert_eq!(injector.errno, -5);
        assert!(injector.validate().is_err());
    }

    #[test]
    fn test_injector_env_matches_from_env() {
        let injector = InjectorConfig {
            target: "mkdir".into(),
            pid: 7,
            errno: 2,
            max_injections: 3,
            aggressive: false,
        };
        let vars = injector_env(&injector, Path::new("ev.log"));
        let lookup = |key: &str| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        assert_eq!(injector_from_env(lookup).unwrap(), injector);
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let mut base: toml::Table = toml::from_str("[injector]\ntarget = \"stat\"\nerrno = 2\n").unwrap();
        let overlay: toml::Table = toml::from_str("[injector]\nerrno = 5\n").unwrap();
        merge_tables(&mut base, overlay);
        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.injector.target, "stat");
        assert_eq!(config.injector.errno, 5);
    }
}
