//! fsfault-exerciser: repeats one filesystem operation so an injector has
//! something to intercept.
//!
//! Usage: fsfault-exerciser --mode=<name> [--interval-ms N] [--iterations N] [--sandbox DIR]

mod sandbox;
mod scenarios;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fsfault_config::logging::{init_logging, LogLevel};
use fsfault_config::{log_exerciser_debug, log_exerciser_info, log_exerciser_warn};

use crate::scenarios::Scenario;

#[derive(Parser)]
#[command(name = "fsfault-exerciser")]
#[command(author, version, about = "Repeat one filesystem operation inside a sandbox")]
struct Cli {
    /// Scenario to repeat (one per filesystem operation)
    #[arg(long, value_name = "NAME")]
    mode: Option<String>,

    /// Delay between runs [default: from config]
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Stop after N runs (default: run until killed)
    #[arg(long, value_name = "N")]
    iterations: Option<u64>,

    /// Sandbox directory [default: from config]
    #[arg(long, value_name = "DIR")]
    sandbox: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(scenario) = cli.mode.as_deref().and_then(scenarios::find) else {
        if let Some(mode) = &cli.mode {
            eprintln!("unknown mode: {mode}");
        }
        print_usage();
        std::process::exit(1);
    };

    init_logging(LogLevel::Info);

    let (interval, sandbox_dir) = {
        let config = fsfault_config::config();
        (
            Duration::from_millis(cli.interval_ms.unwrap_or(config.exerciser.interval_ms)),
            cli.sandbox.unwrap_or_else(|| config.exerciser.sandbox_dir.clone()),
        )
    };

    println!("exerciser pid: {}", std::process::id());
    println!("mode={}", scenario.name);
    io::stdout().flush()?;

    sandbox::prepare(&sandbox_dir)?;
    std::env::set_current_dir(&sandbox_dir)
        .with_context(|| format!("Failed to enter sandbox {}", sandbox_dir.display()))?;

    arm_injector();
    let runs = repeat(scenario, interval, cli.iterations);
    log_exerciser_info!("finished", scenario = scenario.name, runs = runs);
    Ok(())
}

fn print_usage() {
    println!("Usage: fsfault-exerciser --mode=<name> [--interval-ms N] [--iterations N] [--sandbox DIR]");
    println!("Available modes:");
    for name in scenarios::names() {
        println!("  {name}");
    }
}

fn repeat(scenario: &Scenario, interval: Duration, iterations: Option<u64>) -> u64 {
    let mut runs = 0u64;
    loop {
        if let Err(failure) = scenario.run() {
            failure.log(scenario.name);
        }
        runs += 1;
        if iterations.is_some_and(|limit| runs >= limit) {
            return runs;
        }
        std::thread::sleep(interval);
    }
}

/// A preload layer started with `FSFAULT_DEFER=1` waits for this call, so
/// sandbox setup above never sees an injected failure.
fn arm_injector() {
    // Safety: the name is NUL-terminated; RTLD_DEFAULT searches the global scope.
    let sym = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c"fsfault_activate".as_ptr()) };
    if sym.is_null() {
        log_exerciser_debug!("no injector loaded");
        return;
    }

    // Safety: the preload layer exports `fsfault_activate` with this signature.
    let activate: extern "C" fn() -> libc::c_int = unsafe { std::mem::transmute(sym) };
    match activate() {
        0 => log_exerciser_info!("injector armed"),
        1 => log_exerciser_debug!("injector already armed"),
        code => log_exerciser_warn!("injector did not arm", code = code),
    }
}
