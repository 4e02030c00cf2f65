use std::path::PathBuf;

use clap::Parser;
use edgecov::coverage::DEFAULT_SHM_PATH;

/// Command line surface of the supervisor.
#[derive(Parser, Debug)]
#[command(
    name = "edgecov_monitor",
    about = "Run a target under edge-coverage observation",
    long_about = "Creates the shared coverage map, launches the target as a child process, \
relays its output, and reports the number of covered edges periodically and on shutdown."
)]
pub struct MonitorOptions {
    #[arg(
        long,
        help = "Path token the shared coverage map key is derived from",
        default_value = DEFAULT_SHM_PATH
    )]
    pub shm_path: PathBuf,

    #[arg(
        short,
        long,
        help = "Seconds between periodic coverage reports",
        default_value_t = 5
    )]
    pub interval: u64,

    #[arg(
        short,
        long,
        help = "Seconds before the first periodic report (defaults to the interval)"
    )]
    pub delay: Option<u64>,

    #[arg(help = "The target binary to observe", required = true)]
    pub target: String,

    #[arg(
        help = "Arguments passed through to the target, verbatim",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub target_args: Vec<String>,
}
