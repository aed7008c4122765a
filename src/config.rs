//! Protocol constants and run configuration
//!
//! Everything the test engine needs arrives here as typed, already-validated
//! values. Nothing in the crate reads process-wide mutable settings.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::pattern::PatternMode;

/// Bulk IN endpoint address used by the test firmware
pub const BULK_IN: u8 = 0x81;

/// Bulk OUT endpoint address used by the test firmware
pub const BULK_OUT: u8 = 0x01;

/// Timeout applied to every synchronous bulk transfer, in milliseconds
pub const TRANSFER_TIMEOUT_MS: u32 = 500;

/// Number of test case identifiers, valid ids are `0..TEST_CASES`
pub const TEST_CASES: u32 = 30;

/// Gadget Zero loopback configuration value
pub const LOOPBACK_CONFIG: u8 = 2;

/// Gadget Zero source/sink configuration value
pub const SOURCESINK_CONFIG: u8 = 3;

/// Interface the harness takes over on each test device
pub const TEST_INTERFACE: u8 = 0;

/// Transfer timeout as a [`Duration`]
pub fn transfer_timeout() -> Duration {
    Duration::from_millis(u64::from(TRANSFER_TIMEOUT_MS))
}

/// Per-test parameters, assigned to a device by the harness runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestParameters {
    /// Active test case identifier (`0..TEST_CASES`)
    pub test_num: u32,
    /// Number of transfer attempts per test
    pub iterations: u32,
    /// Transfer length in bytes; the transfer engine ramps this field in place
    pub length: usize,
    /// Length ramp step in bytes, 0 disables ramping
    pub vary: usize,
    /// Scatter-gather entry count, accepted but not used by any test
    pub sglen: u32,
}

impl Default for TestParameters {
    /// Defaults that work at every bus speed without short packets
    fn default() -> Self {
        Self {
            test_num: 0,
            iterations: 1000,
            length: 512,
            vary: 512,
            sglen: 32,
        }
    }
}

/// Bus number and device address of an attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BusLocation {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl fmt::Display for BusLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}", self.bus, self.address)
    }
}

/// Error parsing a [`BusLocation`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device '{0}', expected BBB/DDD or /dev/bus/usb/BBB/DDD")]
pub struct ParseLocationError(String);

impl FromStr for BusLocation {
    type Err = ParseLocationError;

    /// Accepts `BBB/DDD` as well as usbfs style paths such as
    /// `/dev/bus/usb/001/004` or `/proc/bus/usb/001/004`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLocationError(s.to_string());
        let mut parts = s.trim_end_matches('/').rsplit('/');
        let address = parts.next().ok_or_else(err)?;
        let bus = parts.next().ok_or_else(err)?;

        Ok(BusLocation {
            bus: bus.parse().map_err(|_| err())?,
            address: address.parse().map_err(|_| err())?,
        })
    }
}

/// Which registry entries the harness runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Every recognized test device
    #[default]
    All,
    /// Only the device at this location
    One(BusLocation),
}

impl DeviceSelection {
    /// Whether a device at `location` is selected
    pub fn matches(&self, location: BusLocation) -> bool {
        match self {
            DeviceSelection::All => true,
            DeviceSelection::One(wanted) => *wanted == location,
        }
    }
}

/// Run-wide settings that are not per-test parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunConfig {
    /// Devices to exercise
    pub selection: DeviceSelection,
    /// Single test id to run, `None` runs every id
    pub test: Option<u32>,
    /// Repeat the whole test sequence until the process is terminated
    pub forever: bool,
    /// Discover devices only, issue no transfers
    pub dry_run: bool,
    /// Byte pattern written and expected on the bulk endpoints
    pub pattern: PatternMode,
}
