//! `fsfault run`: a command under the preload injector.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fsfault_config::{log_controller_info, InjectorConfig, ENV_DEFER};

use crate::catalog::parse_errno;
use crate::locate::{find_preload_library, preload_value};

/// Injector settings on the command line; anything omitted comes from config.
#[derive(Args, Debug, Default, Clone)]
pub struct InjectorArgs {
    /// Operation to intercept (libc or kernel entry name)
    #[arg(long, value_name = "NAME")]
    pub target: Option<String>,

    /// Only inject for this process id (0 = any caller)
    #[arg(long)]
    pub pid: Option<u32>,

    /// Error to inject, by name (EACCES) or number
    #[arg(long, value_parser = errno_arg)]
    pub errno: Option<i32>,

    /// Overrides before the injector goes inert
    #[arg(long, value_name = "N")]
    pub max_injections: Option<u64>,

    /// Only fail calls that were already failing
    #[arg(long)]
    pub conservative: bool,

    /// Append event records here instead of stderr
    #[arg(long, value_name = "FILE")]
    pub event_log: Option<PathBuf>,
}

fn errno_arg(value: &str) -> Result<i32, String> {
    parse_errno(value).ok_or_else(|| format!("unknown errno: {value}"))
}

impl InjectorArgs {
    pub fn apply(&self, mut injector: InjectorConfig) -> InjectorConfig {
        if let Some(target) = &self.target {
            injector.target = target.clone();
        }
        if let Some(pid) = self.pid {
            injector.pid = pid;
        }
        if let Some(errno) = self.errno {
            injector.errno = errno;
        }
        if let Some(max) = self.max_injections {
            injector.max_injections = max;
        }
        if self.conservative {
            injector.aggressive = false;
        }
        injector
    }
}

pub fn cmd_run(args: &InjectorArgs, command: &[String]) -> Result<()> {
    if command.is_empty() {
        anyhow::bail!("No command specified");
    }

    let (injector, preload_path) = {
        let config = fsfault_config::config();
        (args.apply(config.injector.clone()), config.controller.preload_path.clone())
    };
    injector
        .validate()
        .with_context(|| format!("Invalid injector settings for {}", injector.target))?;
    let library = find_preload_library(preload_path.as_deref())?;

    let mut cmd = std::process::Command::new(&command[0]);
    cmd.args(&command[1..]);
    cmd.env(
        "LD_PRELOAD",
        preload_value(&library, std::env::var("LD_PRELOAD").ok().as_deref()),
    );
    // Arm from the constructor; never wait for a handshake the command won't make.
    cmd.env_remove(ENV_DEFER);
    // An empty event log path sends records to the command's stderr.
    let event_log = args.event_log.clone().unwrap_or_default();
    cmd.envs(fsfault_config::injector_env(&injector, &event_log));

    log_controller_info!(
        "running under injector",
        command = command[0].as_str(),
        target = injector.target.as_str(),
        errno = injector.errno
    );

    let status = cmd
        .status()
        .with_context(|| format!("Failed to execute: {}", command[0]))?;
    std::process::exit(status.code().unwrap_or(1));
}
