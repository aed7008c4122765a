//! `usut` - user space USB bulk transfer tester
//!
//! Finds attached devices running known test firmware (EZ-USB bulk
//! source/sink, Linux "gadget zero" and friends), takes them over from
//! the kernel and exercises their bulk endpoints with a self-verifying
//! byte pattern.
//!
//! ```text
//! discover -> Registry -> harness -> dispatch -> transfer -> pattern
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod harness;
pub mod host;
pub mod libusb;
pub mod matcher;
pub mod pattern;
pub mod registry;
pub mod test_utils;
pub mod transfer;

use anyhow::Context;
use std::ops::ControlFlow;
use std::process::ExitCode;

use crate::cli::{exit, Cli};
use crate::config::{DeviceSelection, RunConfig, TestParameters};
use crate::harness::{run_registry, RunHeader, RunSummary};
use crate::host::DeviceHandle;
use crate::libusb::LibusbContext;
use crate::registry::{discover, Registry};

/// Run the `usut` command line tool
///
/// Parses arguments, initializes logging, discovers test devices and runs
/// the selected tests on them.
pub fn run() -> ExitCode {
    let cli = match cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let (params, config) = match cli.to_config() {
        Ok(split) => split,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(exit::USAGE);
        }
    };

    match run_tests(&cli, &params, &config) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::from(exit::INIT_FAILURE)
        }
    }
}

fn run_tests(cli: &Cli, params: &TestParameters, config: &RunConfig) -> anyhow::Result<u8> {
    log::debug!("Parameters: {:?}, run: {:?}", params, config);

    let context = LibusbContext::new().context("libusb couldn't initialize")?;
    let host = &context;
    let mut registry = discover(&host).context("test device discovery failed")?;

    let selected = registry
        .iter()
        .filter(|dev| config.selection.matches(dev.location))
        .count();
    if selected == 0 {
        anyhow::bail!("no test devices recognized");
    }
    if let DeviceSelection::One(location) = config.selection {
        log::info!("Testing only device {}", location);
    }

    if config.dry_run {
        list_devices(&registry);
        return Ok(exit::SUCCESS);
    }

    let json = cli.json;
    if json {
        let header = RunHeader {
            parameters: params,
            config,
        };
        match serde_json::to_string(&header) {
            Ok(line) => println!("{}", line),
            Err(err) => log::warn!("Can't serialize run configuration: {}", err),
        }
    }

    let summary: RunSummary = run_registry(&mut registry, params, config, |outcome| {
        if json {
            match serde_json::to_string(outcome) {
                Ok(line) => println!("{}", line),
                Err(err) => log::warn!("Can't serialize test outcome: {}", err),
            }
        }
        ControlFlow::Continue(())
    });

    println!(
        "{} device(s), {} passed, {} failed",
        summary.devices, summary.passed, summary.failed
    );

    if summary.all_passed() {
        Ok(exit::SUCCESS)
    } else {
        Ok(exit::TEST_FAILURE)
    }
}

fn list_devices<H: DeviceHandle>(registry: &Registry<H>) {
    for dev in registry.iter() {
        println!(
            "{} {:04x}:{:04x} {} (configuration {})",
            dev.location,
            dev.vendor_id,
            dev.product_id,
            dev.label,
            dev.configuration
                .map_or_else(|| "unknown".to_string(), |value| value.to_string())
        );
    }
}
