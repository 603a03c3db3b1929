//! AI Defense System - Main Entry Point
//!
//! CLI surface over the response pipeline. One mode per pipeline stage;
//! exit code 0 means success (or a clean scan), 1 a usage or operational
//! error, 2 that the scan detected threats.

mod analyze;
mod config;
mod contain;
mod detect;
mod neutralize;
mod pipeline;
mod verify;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use config::DefenseConfig;
use pipeline::DefensePipeline;

const EXIT_THREATS_DETECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "ai-defense")]
#[command(version, about = "Detects and neutralizes hostile AI agents")]
struct Cli {
    /// Operation mode
    #[arg(long, value_enum)]
    mode: Mode,

    /// Configuration file path
    #[arg(long, default_value = "config/defense.yaml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Output results as JSON
    #[arg(long)]
    output_json: bool,

    /// Input file for analyze mode
    #[arg(long)]
    input: Option<PathBuf>,

    /// Deploy firewall rules (firewall mode)
    #[arg(long)]
    deploy: bool,

    /// Remove firewall rules (firewall mode)
    #[arg(long)]
    remove: bool,

    /// Confirm defensive action (defend mode)
    #[arg(long)]
    execute: bool,

    /// Post-action verification (verify mode)
    #[arg(long)]
    post_action: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Init,
    Detect,
    Analyze,
    Firewall,
    Defend,
    Verify,
}

fn init_logging(config: &DefenseConfig, verbose: bool) {
    let filter = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter.as_str()))
        .init();
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("Error: {}", message);
    ExitCode::from(1)
}

async fn run(cli: Cli, config: DefenseConfig) -> ExitCode {
    let mut pipeline = DefensePipeline::build(config);

    let outcome = match cli.mode {
        Mode::Init => {
            return if pipeline.init(cli.verbose).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
        }

        Mode::Detect => match pipeline.detect().await {
            Ok(report) => {
                if cli.output_json {
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => println!("{}", json),
                        Err(e) => log::error!("Failed to render report: {}", e),
                    }
                }
                return if report.threats_detected {
                    ExitCode::from(EXIT_THREATS_DETECTED)
                } else {
                    ExitCode::SUCCESS
                };
            }
            Err(e) => Err(e),
        },

        Mode::Analyze => match &cli.input {
            Some(input) => pipeline.analyze(input).map(|_| ()),
            None => return usage_error("--input required for analyze mode"),
        },

        Mode::Firewall => {
            if cli.deploy {
                pipeline.contain_deploy().map(|_| ())
            } else if cli.remove {
                pipeline.contain_remove();
                Ok(())
            } else {
                return usage_error("Specify --deploy or --remove");
            }
        }

        Mode::Defend => {
            if cli.execute {
                pipeline.defend().map(|_| ())
            } else {
                return usage_error("Use --execute to confirm defensive action");
            }
        }

        Mode::Verify => {
            if cli.post_action {
                pipeline.verify().await.map(|_| ())
            } else {
                return usage_error("Use --post-action for verification");
            }
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match DefenseConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(1);
        }
    };

    init_logging(&config, cli.verbose);
    run(cli, config).await
}
