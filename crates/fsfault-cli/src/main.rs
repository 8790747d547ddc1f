//! fsfault: controller for the filesystem fault injector.

mod catalog;
mod locate;
mod run;
mod sweep;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fsfault_config::logging::{init_logging, LogLevel};
use fsfault_config::Config;

use crate::catalog::Catalog;
use crate::run::InjectorArgs;
use crate::sweep::SweepArgs;

#[derive(Parser)]
#[command(name = "fsfault")]
#[command(author, version, about = "Filesystem fault injection controller", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the filesystem operation catalog as JSON
    Catalog {
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run a command with the preload injector armed
    Run {
        #[command(flatten)]
        injector: InjectorArgs,

        /// Command and arguments (after `--`)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Inject every error variant of one operation into the exerciser
    Sweep(SweepArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print configuration file locations
    Path,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(LogLevel::Warn, cli.verbose));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Catalog { output } => cmd_catalog(output.as_deref()),
        Commands::Run { injector, command } => run::cmd_run(&injector, &command),
        Commands::Sweep(args) => sweep::cmd_sweep(args).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd_config_show(),
            ConfigCommands::Path => cmd_config_path(),
        },
    }
}

fn cmd_catalog(output: Option<&std::path::Path>) -> Result<()> {
    let catalog = Catalog::builtin();
    let json = catalog.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} entries to {}", catalog.entries.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = fsfault_config::config();
    print!("{}", toml::to_string_pretty(&*config)?);
    Ok(())
}

fn cmd_config_path() -> Result<()> {
    let global = Config::global_config_path();
    let project = std::env::current_dir()?.join(Config::PROJECT_CONFIG);
    let status = |exists: bool| if exists { "" } else { " (not found)" };

    match global {
        Some(path) => println!("Global:  {}{}", path.display(), status(path.exists())),
        None => println!("Global:  (no home directory)"),
    }
    println!("Project: {}{}", project.display(), status(project.exists()));
    Ok(())
}
