//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary root holding the exerciser sandbox
//! - An isolated event log path
//! - The injector environment for child processes
//! - The preload library and exerciser that end-to-end tests run against
//!
//! # Usage
//!
//! ```ignore
//! use fsfault_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let vars = env.injector_env(&InjectorConfig::default());
//! // spawn a child with `vars`, then inspect env.read_events()
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

use fsfault_engine::{InjectorConfig, ParsedEvent};
use once_cell::sync::OnceCell;
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root of everything this environment owns
    pub root: PathBuf,
    /// Sandbox directory handed to the exerciser
    pub sandbox_dir: PathBuf,
    /// Event log the injector appends to
    pub event_log: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();

        let sandbox_dir = root.join("fs_sandbox");
        let event_log = root.join(format!("fsfault-events-{}.log", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            sandbox_dir,
            event_log,
            test_id,
        })
    }

    /// Create a test file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a test directory
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Write `config` as this environment's project config, so an `fsfault`
    /// started in `root` picks it up.
    pub fn write_project_config(&self, config: &Config) -> anyhow::Result<PathBuf> {
        self.create_file(Config::PROJECT_CONFIG, toml::to_string_pretty(config)?.as_bytes())
    }

    /// Environment for a child that should run under `injector`, logging to
    /// this environment's event log.
    pub fn injector_env(&self, injector: &InjectorConfig) -> Vec<(String, String)> {
        crate::injector_env(injector, &self.event_log)
    }

    /// Event records appended so far; an absent log reads as empty.
    pub fn read_events(&self) -> Vec<ParsedEvent> {
        std::fs::read_to_string(&self.event_log)
            .map(|text| text.lines().filter_map(ParsedEvent::parse).collect())
            .unwrap_or_default()
    }
}

/// Preload library and exerciser built for end-to-end tests.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub preload_library: PathBuf,
    pub exerciser: PathBuf,
}

static ARTIFACTS: OnceCell<Artifacts> = OnceCell::new();

/// Builds `fsfault-preload` and `fsfault-exerciser` into `target_dir`, once
/// per test process. `cargo test` never builds the cdylib on its own.
pub fn build_artifacts(target_dir: &Path) -> anyhow::Result<&'static Artifacts> {
    ARTIFACTS.get_or_try_init(|| {
        let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../Cargo.toml");
        let output = Command::new(cargo)
            .args(["build", "--quiet", "-p", "fsfault-preload", "-p", "fsfault-exerciser"])
            .arg("--manifest-path")
            .arg(&manifest)
            .arg("--target-dir")
            .arg(target_dir)
            .env_remove("LD_PRELOAD")
            .output()?;
        if !output.status.success() {
            anyhow::bail!(
                "cargo build of the preload library failed:\n{}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let dir = target_dir.join("debug");
        let artifacts = Artifacts {
            preload_library: dir.join("libfsfault_preload.so"),
            exerciser: dir.join("fsfault-exerciser"),
        };
        for path in [&artifacts.preload_library, &artifacts.exerciser] {
            if !path.exists() {
                anyhow::bail!("build finished without {}", path.display());
            }
        }
        Ok(artifacts)
    })
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_paths_are_isolated() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert!(env1.root.exists());
        assert_ne!(env1.event_log, env2.event_log);
        assert!(env1.sandbox_dir.starts_with(&env1.root));
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("nested/data.txt", b"payload").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn test_injector_env_points_at_event_log() {
        let env = TestEnvironment::new().unwrap();
        let vars = env.injector_env(&InjectorConfig::default());
        let log = vars.iter().find(|(k, _)| k == crate::ENV_EVENT_LOG).unwrap();
        assert_eq!(PathBuf::from(&log.1), env.event_log);
        assert!(vars.iter().any(|(k, v)| k == crate::ENV_TARGET && v == "readlink"));
    }

    #[test]
    fn test_project_config_is_toml() {
        let env = TestEnvironment::new().unwrap();
        let mut config = Config::default();
        config.controller.preload_path = Some(env.root.join("lib.so"));
        let path = env.write_project_config(&config).unwrap();

        assert!(path.ends_with(".fsfault/config.toml"));
        let parsed: Config = toml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.controller.preload_path, config.controller.preload_path);
    }

    #[test]
    fn test_read_events_skips_foreign_lines() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.read_events().is_empty());
        std::fs::write(
            &env.event_log,
            "noise\nfsfault: inj_id=0 pid=9 comm=x symbol=stat old_ret=0 new_ret=-13 ts_ns=1 aggressive=1 decision=override\n",
        )
        .unwrap();
        let events = env.read_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_override());
    }
}
