// SPDX-License-Identifier: GPL-3.0-only

use camhub::Config;
use camhub::session::RecordingVariant;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camhub")]
#[command(about = "Live camera fan-out hub")]
#[command(version = camhub::constants::app_info::version())]
#[command(subcommand_required = false)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/camhub/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture graph until interrupted (default)
    Run,

    /// Run the capture graph and record for a fixed time
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Where the recording takes its streams from
        #[arg(short, long, value_enum, default_value_t = VariantArg::Loopback)]
        variant: VariantArg,
    },

    /// List available encoders and decoders
    Encoders,

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Loopback,
    Injection,
}

impl From<VariantArg> for RecordingVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Loopback => RecordingVariant::Loopback,
            VariantArg::Injection => RecordingVariant::Injection,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls the level, e.g. RUST_LOG=camhub=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        None | Some(Commands::Run) => cli::run(config),
        Some(Commands::Record { duration, variant }) => cli::record(config, duration, variant.into()),
        Some(Commands::Encoders) => cli::list_encoders(),
        Some(Commands::Config) => cli::print_config(&config),
    }
}
