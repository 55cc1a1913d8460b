//! Entry point for the `tether-worker` binary.

use std::io::{self, BufReader, Write};
use std::process::ExitCode;

use tether_worker::{LoopbackSurface, SystemConfigLoader, run_with};

fn main() -> ExitCode {
    let input = BufReader::new(io::stdin());
    match run_with(&SystemConfigLoader, LoopbackSurface::new(), input, io::stdout()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed yet, so report on stderr directly.
            drop(writeln!(io::stderr().lock(), "tether-worker: {error}"));
            ExitCode::FAILURE
        }
    }
}
