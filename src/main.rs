//! `usut` command line entry point

use std::process::ExitCode;

fn main() -> ExitCode {
    usut_lib::run()
}
