//! Sunder CLI: inspect and exercise the size-targeted render controller.
//!
//! Usage:
//!   sunder compile [OPTIONS]      Print the encoder arguments for a render
//!   sunder simulate [OPTIONS]     Run the bitrate search against a simulated encoder
//!   sunder replay <LOG>           Parse a recorded progress log
//!   sunder config                 Show or initialize the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sunder_common::config::AppConfig;

mod commands;

use commands::SettingsArgs;

#[derive(Parser)]
#[command(
    name = "sunder",
    about = "Render clips to a target file size",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the encoder arguments for a render
    Compile {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Seed bitrates from a target size (megabytes)
        #[arg(long)]
        max_size_mb: Option<f64>,

        /// Print the compiled settings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the size-targeting loop against a simulated encoder
    Simulate {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Target size (megabytes)
        #[arg(long)]
        max_size_mb: f64,

        /// Attempts allowed (defaults to the config file)
        #[arg(long)]
        attempts: Option<u32>,

        /// Acceptable undershoot fraction (defaults to the config file)
        #[arg(long)]
        threshold: Option<f64>,

        /// Ratio of produced size to nominal bitrate size
        #[arg(long, default_value = "1.15")]
        efficiency: f64,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a recorded encoder progress log
    Replay {
        /// Path to the log (one `key=value` per line)
        path: PathBuf,

        /// Length of the trimmed range (seconds)
        #[arg(long)]
        duration: f64,

        /// Print each snapshot as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    sunder_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Compile {
            settings,
            max_size_mb,
            json,
        } => commands::compile::run(settings, max_size_mb, &config, json),
        Commands::Simulate {
            settings,
            max_size_mb,
            attempts,
            threshold,
            efficiency,
            json,
        } => {
            commands::simulate::run(
                settings,
                max_size_mb,
                attempts,
                threshold,
                efficiency,
                &config,
                json,
            )
            .await
        }
        Commands::Replay {
            path,
            duration,
            json,
        } => commands::replay::run(path, duration, json),
        Commands::Config { init } => commands::config::run(&config, init),
    }
}
