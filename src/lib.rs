pub mod adapters;
pub mod core;
pub mod error;
pub mod runtime;

use std::process::ExitCode;

pub fn run() -> ExitCode {
    runtime::cli::run()
}
