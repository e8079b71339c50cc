// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(name = "qcap-source")]
#[command(about = "Live capture source running against the simulated capture card")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture source for a number of ticks
    Run(cli::RunArgs),

    /// List raw pixel formats and their frame sizes
    Formats {
        #[arg(long, default_value = "1920")]
        width: u32,

        #[arg(long, default_value = "1080")]
        height: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=qcap_source=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => cli::run_capture(args),
        Some(Commands::Formats { width, height }) => {
            cli::list_formats(width, height);
            Ok(())
        }
        None => cli::run_capture(cli::RunArgs::parse_from(["run"])),
    }
}
