//! Command-line and environment configuration for the benchmark.

use std::fmt;
use std::time::Duration;

use clap::Parser;
use clap::ValueEnum;
use workrpc::WorkerConfig;
use workrpc::progress::DEFAULT_CAPACITY;

use crate::family::MAX_ITERATIONS;

pub const DEFAULT_ITERATIONS: u32 = 200;

/// Where the filter runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// On the calling thread.
    Plain,
    /// Through the image worker.
    Worker,
    /// Both, and check that they agree.
    Both,
}

impl Mode {
    pub fn runs_plain(self) -> bool {
        matches!(self, Self::Plain | Self::Both)
    }

    pub fn runs_worker(self) -> bool {
        matches!(self, Self::Worker | Self::Both)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::Worker => "worker",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imgbench")]
#[command(about = "Compare an in-thread image filter with the same filter run on a worker")]
#[command(version)]
pub struct BenchConfig {
    /// Image width in pixels
    #[arg(
        long,
        env = "IMGBENCH_WIDTH",
        default_value_t = 512,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub width: u32,

    /// Image height in pixels
    #[arg(
        long,
        env = "IMGBENCH_HEIGHT",
        default_value_t = 512,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub height: u32,

    /// Filter passes per run
    #[arg(
        short,
        long,
        env = "IMGBENCH_ITERATIONS",
        default_value_t = DEFAULT_ITERATIONS,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_ITERATIONS))
    )]
    pub iterations: u32,

    /// Which runs to perform
    #[arg(short, long, env = "IMGBENCH_MODE", value_enum, default_value_t = Mode::Both)]
    pub mode: Mode,

    /// Give up on the worker run after this many seconds
    #[arg(long, env = "IMGBENCH_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Progress queue depth for the worker run
    #[arg(long, env = "IMGBENCH_PROGRESS_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub progress_capacity: usize,
}

impl BenchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new("imgbench-worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = BenchConfig::try_parse_from([
            "imgbench",
            "--width",
            "64",
            "--height",
            "32",
            "--iterations",
            "500",
            "--mode",
            "worker",
        ])
        .unwrap();

        assert_eq!((config.width, config.height), (64, 32));
        assert_eq!(config.iterations, 500);
        assert_eq!(config.mode, Mode::Worker);
        assert!(config.mode.runs_worker() && !config.mode.runs_plain());
    }

    #[test]
    fn test_iterations_above_cap_are_rejected() {
        assert!(BenchConfig::try_parse_from(["imgbench", "--iterations", "501"]).is_err());
    }

    #[test]
    fn test_zero_width_is_rejected() {
        assert!(BenchConfig::try_parse_from(["imgbench", "--width", "0"]).is_err());
    }
}
