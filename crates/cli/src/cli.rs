//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Frame Relay - ring-buffered multi-consumer frame dispatch
#[derive(Parser, Debug)]
#[command(
    name = "frame-relay",
    author,
    version,
    about = "Ring-buffered multi-consumer frame dispatch",
    long_about = "Streams frames from a producer through a fixed-size ring buffer and fans \n\
                  them out to independent consumers with per-consumer backpressure and \n\
                  failure isolation. `run` drives a synthetic acquisition from a config file."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FRAME_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FRAME_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synthetic acquisition through the buffer and dispatcher
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "relay.toml",
        env = "FRAME_RELAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the number of frames to acquire
    #[arg(long, env = "FRAME_RELAY_FRAMES")]
    pub frames: Option<u64>,

    /// Override the delay between frames in milliseconds
    #[arg(long, env = "FRAME_RELAY_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Override the ring buffer size in MiB
    #[arg(long, env = "FRAME_RELAY_BUFFER_MB")]
    pub buffer_mb: Option<usize>,

    /// Run timeout in seconds (0 = no timeout); the run is canceled on expiry
    #[arg(long, default_value = "0", env = "FRAME_RELAY_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final run report as JSON
    #[arg(long)]
    pub report_json: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "FRAME_RELAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show consumer configuration
    #[arg(long)]
    pub consumers: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "frame-relay",
            "-v",
            "run",
            "-c",
            "demo.toml",
            "--frames",
            "50",
            "--report-json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("demo.toml"));
                assert_eq!(args.frames, Some(50));
                assert!(args.report_json);
                assert_eq!(args.metrics_port, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["frame-relay", "-q", "-v", "info"]).is_err());
    }
}
