//! rackflow CLI - unattended factory resets over serial consoles.
//!
//! ## Features
//!
//! - Run a reset workflow against one device (`run`)
//! - Drive a whole bench of devices in parallel (`hub`)
//! - Validate workflow documents without hardware (`validate`)
//! - Manual serial console with break support (`monitor`)
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use env_logger::Env;
use log::debug;
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// rackflow - unattended factory-reset automation for network devices.
///
/// Environment variables:
///   RACKFLOW_PORT              - Default serial port
///   RACKFLOW_BAUD              - Default baud rate (default: 9600)
///   RACKFLOW_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rackflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "RACKFLOW_PORT")]
    port: Option<String>,

    /// Baud rate for the console connection (default: 9600).
    #[arg(short, long, global = true, env = "RACKFLOW_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RACKFLOW_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a reset workflow against a single device.
    ///
    /// Status events go to stdout as `STATUS_FLAG::` lines; the raw console
    /// transcript goes to stderr. This is the engine the `hub` command
    /// supervises.
    Run {
        /// Path to the workflow definition (JSON).
        workflow: PathBuf,
    },

    /// Reset several devices in parallel, one engine process per port.
    Hub {
        /// Path to the workflow definition (JSON).
        workflow: PathBuf,

        /// Serial ports to drive (repeat or comma-separate).
        #[arg(long = "ports", value_delimiter = ',', required = true)]
        ports: Vec<String>,

        /// Skip the launch confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Validate a workflow definition without touching hardware.
    Validate {
        /// Path to the workflow definition (JSON).
        workflow: PathBuf,

        /// Output the validation report as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open a manual serial console.
    Monitor {
        /// Show a timestamp at the start of each line.
        #[arg(long)]
        timestamps: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was received.
pub(crate) fn was_cancelled() -> bool {
    CANCELLED.load(Ordering::Relaxed)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!(
        "rackflow v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C flips a flag the library polls; long waits abort promptly
    // instead of blocking until their deadline.
    rackflow::set_cancel_checker(|| CANCELLED.load(Ordering::Relaxed));
    ctrlc::set_handler(|| {
        CANCELLED.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl-C handler")?;

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Run { workflow } => {
            commands::run::cmd_run(&cli, &config, workflow)?;
        },
        Commands::Hub {
            workflow,
            ports,
            yes,
        } => {
            commands::hub::cmd_hub(&cli, &config, workflow, ports, *yes)?;
        },
        Commands::Validate { workflow, json } => {
            commands::validate::cmd_validate(workflow, *json)?;
        },
        Commands::Monitor { timestamps } => {
            commands::monitor::cmd_monitor(&cli, &config, *timestamps)?;
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

/// Resolve the serial port from CLI args or config.
pub(crate) fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .connection
                .port
                .clone()
        })
        .context("No serial port specified (use --port, RACKFLOW_PORT, or a config file)")
}

/// Resolve the baud rate from CLI args, config, or the console default.
pub(crate) fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config
            .connection
            .baud)
        .unwrap_or(rackflow::DEFAULT_BAUD_RATE)
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
