//! Command line interface
//!
//! Flag letters follow the classic `testusb` tool. The parsed command line
//! is turned into [`TestParameters`] and a [`RunConfig`] before anything
//! touches the bus.

use clap::{Parser, ValueEnum};

use crate::config::{BusLocation, DeviceSelection, RunConfig, TestParameters, TEST_CASES};
use crate::pattern::PatternMode;

/// Process exit statuses
pub mod exit {
    /// Every test passed, or dry run
    pub const SUCCESS: u8 = 0;
    /// Invalid command line
    pub const USAGE: u8 = 1;
    /// At least one test failed
    pub const TEST_FAILURE: u8 = 2;
    /// libusb initialization or discovery failed, or no test device found
    pub const INIT_FAILURE: u8 = 255;
}

/// Version string including build metadata
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Pattern names accepted by `-p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PatternArg {
    /// All zero bytes
    #[value(alias = "0")]
    Zero,
    /// Byte `i % 63` at offset `i`
    #[value(alias = "1")]
    Mod63,
}

impl From<PatternArg> for PatternMode {
    fn from(arg: PatternArg) -> Self {
        match arg {
            PatternArg::Zero => PatternMode::Zero,
            PatternArg::Mod63 => PatternMode::Mod63,
        }
    }
}

/// User space USB bulk transfer tester for devices running test firmware
#[derive(Parser, Debug)]
#[command(name = "usut", version, long_version = LONG_VERSION)]
pub struct Cli {
    /// Test every recognized device
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Test only the device at BBB/DDD (or /dev/bus/usb/BBB/DDD)
    #[arg(short = 'D', long = "device", env = "DEVICE", value_name = "DEV")]
    pub device: Option<BusLocation>,

    /// Iterations per test
    #[arg(short = 'c', long = "count", default_value_t = 1000)]
    pub count: u32,

    /// Transfer size in bytes
    #[arg(
        short = 's',
        long = "size",
        default_value_t = 512,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub size: u32,

    /// Length ramp step in bytes for tests 3 and 4
    #[arg(short = 'v', long = "vary", default_value_t = 512)]
    pub vary: u32,

    /// Scatter-gather entries (accepted, unused)
    #[arg(short = 'g', long = "sglen", default_value_t = 32)]
    pub sglen: u32,

    /// Run only this test
    #[arg(
        short = 't',
        long = "test",
        value_parser = clap::value_parser!(u32).range(0..i64::from(TEST_CASES))
    )]
    pub test: Option<u32>,

    /// Repeat the tests until interrupted
    #[arg(short = 'l', long = "forever")]
    pub forever: bool,

    /// Discover devices without running any test
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Data pattern; `-p` alone selects mod63
    #[arg(
        short = 'p',
        long = "pattern",
        value_enum,
        num_args = 0..=1,
        default_value = "zero",
        default_missing_value = "mod63"
    )]
    pub pattern: PatternArg,

    /// Print each test outcome as a JSON line
    #[arg(long = "json")]
    pub json: bool,

    /// Enable debug logging
    #[arg(long = "verbose")]
    pub verbose: bool,
}

/// Command line that parses but can't be run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// Neither `-a` nor `-D` given
    #[error("must specify '-a' or '-D dev', or DEVICE=/dev/bus/usb/BBB/DDD in env")]
    NoDeviceSelected,
}

impl Cli {
    /// Split the command line into per-test parameters and run settings
    ///
    /// `-a` takes precedence over `-D` and `DEVICE`.
    ///
    /// # Errors
    /// Returns [`UsageError::NoDeviceSelected`] without `-a` or a device.
    pub fn to_config(&self) -> Result<(TestParameters, RunConfig), UsageError> {
        let selection = match (self.all, self.device) {
            (true, _) => DeviceSelection::All,
            (false, Some(location)) => DeviceSelection::One(location),
            (false, None) => return Err(UsageError::NoDeviceSelected),
        };

        let params = TestParameters {
            test_num: 0,
            iterations: self.count,
            length: self.size as usize,
            vary: self.vary as usize,
            sglen: self.sglen,
        };

        let config = RunConfig {
            selection,
            test: self.test,
            forever: self.forever,
            dry_run: self.dry_run,
            pattern: self.pattern.into(),
        };

        Ok((params, config))
    }
}

/// Parse the command line, mapping failures to an exit status
///
/// Help and version output exit with [`exit::SUCCESS`], everything else
/// clap rejects with [`exit::USAGE`].
///
/// # Errors
/// The exit status to terminate with when no run should happen.
pub fn parse_args<I, T>(args: I) -> Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| {
        let _ = err.print();
        if err.use_stderr() {
            exit::USAGE
        } else {
            exit::SUCCESS
        }
    })
}
