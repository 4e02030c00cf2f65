//! `edgecov_monitor <target> [target_args...]`
//!
//! The standalone coverage supervisor: owns the shared coverage map's
//! lifecycle, launches the target binary as a child, relays its output,
//! and reports covered edges periodically and on shutdown.

use std::process::exit;

use clap::Parser;
use edgecov_bolts::SimpleStderrLogger;
use log::LevelFilter;

mod options;
mod supervisor;

use options::MonitorOptions;
use supervisor::Supervisor;

fn main() {
    let opts = MonitorOptions::parse();

    if SimpleStderrLogger::set_logger().is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    // setup must fully succeed before any child is spawned
    let mut supervisor = match Supervisor::init(&opts) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            log::error!("supervisor setup failed: {err}");
            exit(1);
        }
    };

    match supervisor.run(&opts.target, &opts.target_args) {
        Ok(Some(status)) => log::info!("target exited with status {status}"),
        Ok(None) => {}
        Err(err) => {
            log::error!("supervisor failed: {err}");
            exit(1);
        }
    }
}
