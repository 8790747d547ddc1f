//! `fsfault sweep`: every error variant of one operation, one fresh exerciser each.
//!
//! A validated injector configuration never changes, so each variant gets its
//! own exerciser process armed with that variant's errno. The variant counts
//! as injected once an override record for its errno shows up in the event log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use fsfault_config::{
    injector_env, log_controller_debug, log_controller_error, log_controller_info,
    log_controller_warn, InjectorConfig, ENV_DEFER,
};
use fsfault_engine::ParsedEvent;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::catalog::{parse_errno, Catalog, ErrorVariant};
use crate::locate::{find_exerciser, find_preload_library, preload_value};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Exerciser mode to sweep (see `fsfault catalog`)
    #[arg(long, value_name = "NAME")]
    pub mode: String,

    /// Catalog JSON to read instead of the built-in one
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Seconds to wait for an injection per variant [default: from config]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Only these error variants, by name or number (repeatable)
    #[arg(long = "errno", value_name = "ERRNO")]
    pub only: Vec<String>,

    /// Directory the exerciser runs in [default: current directory]
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Pass the exerciser's output through
    #[arg(long)]
    pub show_output: bool,
}

/// Everything one sweep needs, resolved before the first process starts.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub mode: String,
    pub target: String,
    pub variants: Vec<ErrorVariant>,
    pub timeout: Duration,
    pub max_injections: u64,
    pub aggressive: bool,
    pub workdir: PathBuf,
    pub event_log: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantStatus {
    Injected,
    TimedOut,
    Exited(Option<i32>),
}

#[derive(Debug, Clone)]
pub struct VariantReport {
    pub variant: ErrorVariant,
    pub status: VariantStatus,
    pub overrides: usize,
}

impl SweepPlan {
    pub fn new(args: &SweepArgs, catalog: &Catalog, config: &fsfault_config::Config, cwd: &Path) -> Result<Self> {
        let entry = catalog
            .entry(&args.mode)
            .with_context(|| format!("No catalog entry for '{}'", args.mode))?;
        let target = match (&entry.libc_symbol, entry.interposable) {
            (Some(symbol), true) => symbol.clone(),
            _ => anyhow::bail!(
                "'{}' has no interposable entry point ({}); the preload injector cannot reach it",
                entry.name,
                entry.kernel_symbol
            ),
        };

        let wanted = args
            .only
            .iter()
            .map(|raw| parse_errno(raw).with_context(|| format!("Unknown errno: {raw}")))
            .collect::<Result<Vec<_>>>()?;
        let variants: Vec<ErrorVariant> = entry
            .error_variants
            .iter()
            .filter(|v| wanted.is_empty() || wanted.contains(&v.errno_num))
            .cloned()
            .collect();
        if variants.is_empty() {
            anyhow::bail!("No error variants to sweep for '{}'", entry.name);
        }

        let workdir = match &args.workdir {
            Some(dir) => cwd.join(dir),
            None => cwd.to_path_buf(),
        };
        // The exerciser changes into its sandbox before arming, so the log path must be absolute.
        let event_log = workdir.join(&config.controller.event_log);

        Ok(Self {
            mode: entry.name.clone(),
            target,
            variants,
            timeout: Duration::from_secs(args.timeout.unwrap_or(config.controller.variant_timeout_secs)),
            max_injections: config.controller.sweep_max_injections,
            aggressive: config.injector.aggressive,
            workdir,
            event_log,
        })
    }

    pub fn injector(&self, variant: &ErrorVariant) -> InjectorConfig {
        InjectorConfig {
            target: self.target.clone(),
            pid: 0,
            errno: variant.errno_num,
            max_injections: self.max_injections,
            aggressive: self.aggressive,
        }
    }
}

/// Override records carrying `-errno` in an event log's contents.
pub fn overrides_for(log: &str, errno: i32) -> usize {
    log.lines()
        .filter_map(ParsedEvent::parse)
        .filter(|e| e.is_override() && e.new_ret == Some(-i64::from(errno)))
        .count()
}

async fn overrides_in(path: &Path, errno: i32) -> usize {
    tokio::fs::read_to_string(path)
        .await
        .map(|log| overrides_for(&log, errno))
        .unwrap_or(0)
}

/// SIGTERM first, SIGKILL if the exerciser lingers.
async fn stop(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

struct Tools {
    exerciser: PathBuf,
    library: PathBuf,
    show_output: bool,
}

async fn run_variant(plan: &SweepPlan, tools: &Tools, variant: &ErrorVariant) -> Result<VariantReport> {
    match tokio::fs::remove_file(&plan.event_log).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to reset {}", plan.event_log.display())),
    }

    let output = || if tools.show_output { Stdio::inherit() } else { Stdio::null() };
    let mut child = Command::new(&tools.exerciser)
        .arg(format!("--mode={}", plan.mode))
        .current_dir(&plan.workdir)
        .env("LD_PRELOAD", preload_value(&tools.library, None))
        .envs(injector_env(&plan.injector(variant), &plan.event_log))
        .env(ENV_DEFER, "1")
        .stdin(Stdio::null())
        .stdout(output())
        .stderr(output())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", tools.exerciser.display()))?;
    log_controller_debug!(
        "exerciser started",
        pid = child.id().unwrap_or(0),
        errno = variant.errno_num
    );

    let deadline = tokio::time::sleep(plan.timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(POLL_INTERVAL);

    let mut status = loop {
        tokio::select! {
            exit = child.wait() => break VariantStatus::Exited(exit?.code()),
            _ = &mut deadline => break VariantStatus::TimedOut,
            _ = poll.tick() => {
                if overrides_in(&plan.event_log, variant.errno_num).await > 0 {
                    break VariantStatus::Injected;
                }
            }
        }
    };
    stop(&mut child).await;

    let overrides = overrides_in(&plan.event_log, variant.errno_num).await;
    if overrides > 0 {
        status = VariantStatus::Injected;
    }
    Ok(VariantReport {
        variant: variant.clone(),
        status,
        overrides,
    })
}

fn describe(report: &VariantReport, timeout: Duration) -> String {
    match report.status {
        VariantStatus::Injected => format!("injected ({} override records)", report.overrides),
        VariantStatus::TimedOut => format!("no injection within {}s", timeout.as_secs()),
        VariantStatus::Exited(Some(code)) => format!("exerciser exited early (status {code})"),
        VariantStatus::Exited(None) => "exerciser killed by a signal".to_string(),
    }
}

pub async fn cmd_sweep(args: SweepArgs) -> Result<()> {
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin(),
    };
    let cwd = std::env::current_dir().context("cwd")?;

    let (plan, tools) = {
        let config = fsfault_config::config();
        let plan = SweepPlan::new(&args, &catalog, &config, &cwd)?;
        let tools = Tools {
            exerciser: find_exerciser(config.controller.exerciser_path.as_deref())?,
            library: find_preload_library(config.controller.preload_path.as_deref())?,
            show_output: args.show_output,
        };
        (plan, tools)
    };

    println!(
        "Sweeping '{}' (target {}) over {} error variants",
        plan.mode,
        plan.target,
        plan.variants.len()
    );
    log_controller_info!(
        "sweep started",
        mode = plan.mode.as_str(),
        exerciser = tracing::field::display(tools.exerciser.display()),
        library = tracing::field::display(tools.library.display())
    );

    let total = plan.variants.len();
    let mut missed = Vec::new();
    for (idx, variant) in plan.variants.iter().enumerate() {
        let report = match run_variant(&plan, &tools, variant).await {
            Ok(report) => report,
            Err(err) => {
                log_controller_error!(
                    "variant aborted",
                    errno = variant.errno_num,
                    error = tracing::field::display(&err)
                );
                return Err(err);
            }
        };
        println!(
            "  [{:>2}/{}] {}({}): {}",
            idx + 1,
            total,
            variant.errno_name,
            variant.errno_num,
            describe(&report, plan.timeout)
        );
        if report.status != VariantStatus::Injected {
            log_controller_warn!(
                "variant not injected",
                errno = variant.errno_num,
                status = tracing::field::debug(report.status)
            );
            missed.push(variant.errno_name.clone());
        }
    }

    println!("Summary: {}/{} variants injected", total - missed.len(), total);
    if !missed.is_empty() {
        log_controller_error!("sweep incomplete", missed = missed.len(), total = total);
        anyhow::bail!("No injection observed for: {}", missed.join(", "));
    }
    Ok(())
}
