//! Integration tests for the fsfault command line

use std::path::Path;
use std::process::{Command, Output};

use fsfault_config::testing::{build_artifacts, Artifacts, TestEnvironment};
use fsfault_config::Config;

const FSFAULT: &str = env!("CARGO_BIN_EXE_fsfault");

/// Run fsfault in `cwd` with a private HOME, so no user config leaks in.
fn fsfault(cwd: &Path, args: &[&str]) -> Output {
    Command::new(FSFAULT)
        .current_dir(cwd)
        .env("HOME", cwd)
        .env_remove("LD_PRELOAD")
        .env_remove("FSFAULT_EVENT_LOG")
        .args(args)
        .output()
        .expect("Failed to execute fsfault")
}

/// Test environment whose project config points fsfault at freshly built
/// preload and exerciser artifacts.
fn armed_environment() -> (TestEnvironment, &'static Artifacts) {
    let artifacts = build_artifacts(&Path::new(env!("CARGO_TARGET_TMPDIR")).join("fsfault-e2e"))
        .expect("Failed to build preload library and exerciser");
    let env = TestEnvironment::new().unwrap();
    let mut config = Config::default();
    config.controller.preload_path = Some(artifacts.preload_library.clone());
    config.controller.exerciser_path = Some(artifacts.exerciser.clone());
    config.controller.event_log = env.event_log.clone();
    env.write_project_config(&config).unwrap();
    (env, artifacts)
}

#[test]
fn test_catalog_to_stdout() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["catalog"]);
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 63);

    let readlink = entries.iter().find(|e| e["name"] == "readlink").unwrap();
    assert_eq!(readlink["category"], "file");
    assert_eq!(readlink["interposable"], true);
    assert_eq!(readlink["libc_symbol"], "readlink");
    assert!(readlink["kernel_symbol"].as_str().unwrap().ends_with("_sys_readlink"));
}

#[test]
fn test_catalog_to_file() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["catalog", "-o", "catalog.json"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Wrote 63 entries"));

    let raw = std::fs::read_to_string(env.root.join("catalog.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value[0]["error_variants"].as_array().unwrap().len(), 27);
}

#[test]
fn test_config_show_returns_valid_toml() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());

    let parsed: Config = toml::from_str(&stdout).expect("config show should be TOML");
    assert_eq!(parsed.injector.target, "readlink");
    assert!(stdout.contains("[injector]"));
    assert!(stdout.contains("[exerciser]"));
    assert!(stdout.contains("[controller]"));
}

#[test]
fn test_config_show_honors_project_file() {
    let env = TestEnvironment::new().unwrap();
    env.create_file(
        Config::PROJECT_CONFIG,
        b"[injector]\ntarget = \"unlinkat\"\nerrno = 28\n",
    )
    .unwrap();

    let output = fsfault(&env.root, &["config", "show"]);
    let parsed: Config = toml::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(parsed.injector.target, "unlinkat");
    assert_eq!(parsed.injector.errno, 28);
}

#[test]
fn test_config_path() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["config", "path"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Global:"));
    assert!(stdout.contains("Project:"));
    assert!(stdout.contains(".fsfault/config.toml"));
}

#[test]
fn test_run_requires_command() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["run", "--errno", "EIO"]);
    assert!(!output.status.success());
}

#[test]
fn test_run_rejects_unknown_errno() {
    let env = TestEnvironment::new().unwrap();
    let output = fsfault(&env.root, &["run", "--errno", "EBOGUS", "--", "true"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown errno"));
}

#[test]
fn test_sweep_rejects_unreachable_mode() {
    let env = TestEnvironment::new().unwrap();

    let output = fsfault(&env.root, &["sweep", "--mode", "mount"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no interposable entry point"));

    let output = fsfault(&env.root, &["sweep", "--mode", "nonsense"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No catalog entry"));
}

#[test]
fn test_run_injects_into_exerciser() {
    let (env, artifacts) = armed_environment();
    let exerciser = artifacts.exerciser.to_string_lossy().into_owned();
    let log_arg = env.event_log.to_string_lossy().into_owned();

    let output = fsfault(
        &env.root,
        &[
            "run",
            "--target",
            "readlink",
            "--errno",
            "ENOENT",
            "--max-injections",
            "1",
            "--event-log",
            &log_arg,
            "--",
            &exerciser,
            "--mode=readlink",
            "--iterations",
            "3",
            "--interval-ms",
            "1",
        ],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let events = env.read_events();
    let overrides: Vec<_> = events.iter().filter(|e| e.is_override()).collect();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].new_ret, Some(-2));
    assert_eq!(overrides[0].target, "readlink");
    // One reported decision per readlink call; the rest hit the ceiling.
    assert!(events.len() >= 3);
    assert!(events.iter().filter(|e| !e.is_override()).all(|e| e.decision == "ceiling"));

    // The overridden readlink surfaced to the exerciser as ENOENT.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("scenario failed"), "stderr: {stderr}");
}

#[test]
fn test_sweep_injects_selected_variants() {
    let (env, _) = armed_environment();
    let output = fsfault(
        &env.root,
        &["sweep", "--mode", "readlink", "--errno", "EACCES", "--errno", "ENOSPC", "--timeout", "10"],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {stdout}\nstderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("EACCES(13): injected"));
    assert!(stdout.contains("ENOSPC(28): injected"));
    assert!(stdout.contains("Summary: 2/2 variants injected"));
    assert!(env.sandbox_dir.join("file_ok.txt").exists());
}

#[test]
fn test_sweep_reports_missed_variant() {
    let (env, _) = armed_environment();
    // The exerciser's stat scenario never calls readlink, so nothing can be injected.
    let catalog = r#"[{"name": "stat", "kernel_symbol": "__x64_sys_newstat",
        "libc_symbol": "readlink", "interposable": true, "category": "file",
        "error_variants": [{"errno_name": "EIO", "errno_num": 5, "kernel_ret": -5}]}]"#;
    let catalog_path = env.create_file("catalog.json", catalog.as_bytes()).unwrap();
    let catalog_arg = catalog_path.to_string_lossy().into_owned();

    let output = fsfault(
        &env.root,
        &["sweep", "--mode", "stat", "--catalog", &catalog_arg, "--timeout", "1"],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stdout.contains("EIO(5): no injection within 1s"), "stdout: {stdout}");
    assert!(stdout.contains("Summary: 0/1 variants injected"));
    assert!(stderr.contains("sweep incomplete"), "stderr: {stderr}");
    assert!(stderr.contains("No injection observed for: EIO"));
}
