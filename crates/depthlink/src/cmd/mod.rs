use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use depthlink_frame::{DEFAULT_MAX_PAYLOAD, DEPTH_HEIGHT, DEPTH_WIDTH};
use depthlink_peer::{parse_duration, RetryPolicy};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod probe;
pub mod receive;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept a sender and print a summary of every received frame.
    Receive(ReceiveArgs),
    /// Stream synthetic frames to a receiver.
    Stream(StreamArgs),
    /// Check which candidate receivers accept TCP connections.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Receive(args) => receive::run(args, format),
        Command::Stream(args) => stream::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9999")]
    pub bind: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// Write color and depth PNG previews of every frame into this directory.
    #[arg(long, value_name = "DIR")]
    pub preview_dir: Option<PathBuf>,
    /// Depth grid width the sender uses.
    #[arg(long, default_value_t = DEPTH_WIDTH)]
    pub depth_width: usize,
    /// Depth grid height the sender uses.
    #[arg(long, default_value_t = DEPTH_HEIGHT)]
    pub depth_height: usize,
    /// Largest payload accepted, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
    /// Per-read deadline on a connected sender (e.g. 10s, 500ms). 0 waits forever.
    #[arg(long, default_value = "10s")]
    pub io_timeout: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RetryPolicyArg {
    Head,
    RoundRobin,
}

impl From<RetryPolicyArg> for RetryPolicy {
    fn from(arg: RetryPolicyArg) -> Self {
        match arg {
            RetryPolicyArg::Head => RetryPolicy::Head,
            RetryPolicyArg::RoundRobin => RetryPolicy::RoundRobin,
        }
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Candidate receivers in priority order (comma-separated, `host` or `host:port`).
    #[arg(long = "host", value_delimiter = ',')]
    pub hosts: Vec<String>,
    /// Port for hosts that do not name one.
    #[arg(long)]
    pub port: Option<u16>,
    /// Session configuration file (JSON). Flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Which candidate to retry after a failed attempt.
    #[arg(long)]
    pub retry_policy: Option<RetryPolicyArg>,
    /// Number of frames to deliver.
    #[arg(long, default_value_t = 10)]
    pub frames: u64,
    /// Minimum spacing between frames (e.g. 100ms).
    #[arg(long)]
    pub interval: Option<String>,
    /// How long to wait for a connection before giving up (e.g. 10s).
    #[arg(long, default_value = "10s")]
    pub wait: String,
    /// Synthetic color image width before normalization.
    #[arg(long, default_value_t = depthlink_frame::COLOR_WIDTH)]
    pub color_width: usize,
    /// Synthetic color image height before normalization.
    #[arg(long, default_value_t = depthlink_frame::COLOR_HEIGHT)]
    pub color_height: usize,
    /// Synthetic depth grid width.
    #[arg(long, default_value_t = DEPTH_WIDTH)]
    pub depth_width: usize,
    /// Synthetic depth grid height.
    #[arg(long, default_value_t = DEPTH_HEIGHT)]
    pub depth_height: usize,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Endpoints to try (`host` or `host:port`). Defaults to the built-in candidate list.
    pub endpoints: Vec<String>,
    /// Port for endpoints that do not name one.
    #[arg(long, default_value_t = depthlink_transport::DEFAULT_PORT)]
    pub port: u16,
    /// Connect timeout per endpoint (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
    /// Try every endpoint instead of stopping at the first reachable one.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a duration flag, attributing errors to `flag`.
pub fn duration_arg(flag: &str, input: &str) -> CliResult<Duration> {
    parse_duration(input).map_err(|err| CliError::new(USAGE, format!("--{flag}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arg_accepts_units() {
        assert_eq!(duration_arg("wait", "2s").unwrap(), Duration::from_secs(2));
        assert_eq!(
            duration_arg("wait", "150ms").unwrap(),
            Duration::from_millis(150)
        );
    }

    #[test]
    fn duration_arg_names_the_flag() {
        let err = duration_arg("interval", "soon").unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("--interval:"));
    }
}
