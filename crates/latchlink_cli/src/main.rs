//! LatchLink CLI
//!
//! Command-line tools for LatchLink gateway configuration and simulation.
//!
//! # Commands
//!
//! - `check-config` - Validate a persisted configuration file
//! - `default-config` - Print the default configuration
//! - `simulate` - Run the engine against a scripted device

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use latchlink_protocol::DeviceKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LatchLink gateway tools.
#[derive(Parser)]
#[command(name = "latchlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Device kind accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    /// Smart lock
    Lock,
    /// Intercom opener
    Opener,
}

impl From<DeviceArg> for DeviceKind {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Lock => DeviceKind::Lock,
            DeviceArg::Opener => DeviceKind::Opener,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// Path to the JSON configuration
        file: PathBuf,
    },

    /// Print the default configuration
    DefaultConfig {
        /// Device kind
        #[arg(short, long, value_enum, default_value = "lock")]
        device: DeviceArg,
    },

    /// Run the engine against a scripted device
    Simulate {
        /// Path to the JSON configuration (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Device kind, overriding the configuration
        #[arg(short, long, value_enum)]
        device: Option<DeviceArg>,

        /// Number of ticks to run
        #[arg(short, long, default_value = "120")]
        ticks: u32,

        /// Simulated milliseconds per tick
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Action to send once paired
        #[arg(short, long)]
        action: Option<String>,

        /// Number of leading action attempts that fail
        #[arg(short, long, default_value = "0")]
        fail_first: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::CheckConfig { file } => {
            commands::check_config::run(&file)?;
        }
        Commands::DefaultConfig { device } => {
            commands::default_config::run(device.into())?;
        }
        Commands::Simulate {
            config,
            device,
            ticks,
            tick_ms,
            action,
            fail_first,
        } => {
            let options = commands::simulate::SimulateOptions {
                config,
                device: device.map(Into::into),
                ticks,
                tick_ms,
                action,
                fail_first,
            };
            commands::simulate::run(&options)?;
        }
        Commands::Version => {
            commands::version::run();
        }
    }

    Ok(())
}
