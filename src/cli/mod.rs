//! Command-line interface for testvnf
//!
//! `testvnf` plays every scenario named by the `SCENARIOS` setting (or given
//! on the command line) and prints one JSON run record per scenario.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

mod display;

pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "testvnf")]
#[command(about = "Deploy OpenStack test topologies for network benchmarking")]
#[command(version)]
pub struct Args {
    /// Scenario files to play instead of the SCENARIOS setting
    #[arg(value_name = "SCENARIO")]
    pub scenarios: Vec<PathBuf>,

    /// Directory of YAML settings files (default: ~/.testvnf/conf)
    #[arg(long, value_name = "DIR", env = "TESTVNF_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Path to a .env file with OpenStack credentials
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Traffic generator to write a VSPERF config for (spirent, ixnet)
    #[arg(long, value_name = "NAME")]
    pub tgen: Option<String>,

    /// Directory holding the vsperf-<tgen>.conf base files
    #[arg(long, value_name = "DIR", default_value = "./testconfs")]
    pub testconf_dir: PathBuf,

    /// Print summary and agent tables instead of JSON run records
    #[arg(long)]
    pub summary: bool,
}

impl Args {
    /// Logging filter for the verbosity level
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
