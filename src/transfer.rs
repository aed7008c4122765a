//! Bulk transfer engine
//!
//! Repeats one bulk transfer per iteration, writing or verifying the byte
//! pattern, and optionally ramps the transfer length through a bounded
//! cycle that crosses packet-size boundaries.

use thiserror::Error;

use crate::config::{transfer_timeout, BULK_IN, BULK_OUT};
use crate::host::{DeviceHandle, UsbError};
use crate::pattern::{self, PatternError, PatternMode};
use crate::registry::TestDevice;

/// Status reported for a pattern verification failure (`-EINVAL`)
pub const VERIFICATION_STATUS: i32 = -22;

/// Transfer direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device, bulk OUT
    Write,
    /// Device to host, bulk IN
    Read,
}

impl Direction {
    /// Endpoint address used for this direction
    pub fn endpoint(self) -> u8 {
        match self {
            Direction::Write => BULK_OUT,
            Direction::Read => BULK_IN,
        }
    }
}

/// Errors that end a test's iteration loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Nonzero bulk transfer status, timeouts included
    #[error("bulk {dir} error {code}: {source}", dir = direction_name(*.direction), code = .source.code())]
    Usb {
        /// Direction of the failing transfer
        direction: Direction,
        /// Transfer status
        source: UsbError,
    },

    /// Data read back doesn't match the pattern
    #[error("verification failed: {0}")]
    Verification(#[from] PatternError),

    /// The transfer buffer couldn't be allocated
    #[error("can't allocate {0} byte transfer buffer")]
    Allocation(usize),
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Write => "write",
        Direction::Read => "read",
    }
}

impl TransferError {
    /// Raw status code, libusb codes for transfer failures
    pub fn status(&self) -> i32 {
        match self {
            TransferError::Usb { source, .. } => source.code(),
            TransferError::Verification(_) => VERIFICATION_STATUS,
            TransferError::Allocation(_) => UsbError::NoMem.code(),
        }
    }
}

/// Status of a result, 0 for success
pub fn status_of(result: &Result<(), TransferError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.status(),
    }
}

/// Next transfer length of the ramp
///
/// Steps by `vary` modulo `max`. Landing exactly on 0 clamps to
/// `min(vary, max)`, so a length never becomes 0 while `max > 0`.
pub fn next_length(current: usize, vary: usize, max: usize) -> usize {
    let Some(len) = (current + vary).checked_rem(max) else {
        return 0;
    };
    if len == 0 {
        vary.min(max)
    } else {
        len
    }
}

/// Run `iterations` bulk transfers against `dev`
///
/// The buffer is sized from `dev.param.length`, which is also the ramp
/// maximum. Each iteration transfers `dev.param.length` bytes; OUT data is
/// filled with the pattern and IN data is verified against it. When `vary`
/// is nonzero `dev.param.length` is advanced with [`next_length`] after
/// every attempt. Nothing is retried: the first failure ends the loop.
///
/// A result whose status differs from `expected` is logged, the result
/// itself is returned unchanged.
///
/// # Errors
/// The first transfer, verification or allocation failure.
pub fn simple_io<H: DeviceHandle>(
    dev: &mut TestDevice<H>,
    iterations: u32,
    vary: usize,
    expected: i32,
    direction: Direction,
    pattern: PatternMode,
) -> Result<(), TransferError> {
    let max = dev.param.length;
    let mut remaining = iterations;
    let result = run_iterations(dev, &mut remaining, max, vary, direction, pattern);

    let status = status_of(&result);
    if status != expected {
        log::error!(
            "test {} failed with status {} (expected {}), {} iterations left",
            dev.param.test_num,
            status,
            expected,
            remaining
        );
    }

    result
}

fn run_iterations<H: DeviceHandle>(
    dev: &mut TestDevice<H>,
    remaining: &mut u32,
    max: usize,
    vary: usize,
    direction: Direction,
    pattern: PatternMode,
) -> Result<(), TransferError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(max)
        .map_err(|_| TransferError::Allocation(max))?;
    buf.resize(max, 0u8);

    while *remaining > 0 {
        *remaining -= 1;
        let len = dev.param.length.min(max);
        let data = &mut buf[..len];

        match direction {
            Direction::Write => {
                pattern::fill(pattern, data);
                transfer(&mut dev.handle, direction, data)?;
            }
            Direction::Read => {
                transfer(&mut dev.handle, direction, data)?;
                pattern::check(pattern, data)?;
            }
        }

        if vary != 0 {
            dev.param.length = next_length(dev.param.length, vary, max);
        }
    }
    Ok(())
}

fn transfer<H: DeviceHandle>(
    handle: &mut H,
    direction: Direction,
    data: &mut [u8],
) -> Result<usize, TransferError> {
    let wanted = data.len();
    let transferred = handle
        .bulk_transfer(direction.endpoint(), data, transfer_timeout())
        .map_err(|source| {
            log::error!("Bulk {} error {}", direction_name(direction), source.code());
            TransferError::Usb { direction, source }
        })?;

    if transferred != wanted {
        log::debug!(
            "Short bulk {}: {} of {} bytes",
            direction_name(direction),
            transferred,
            wanted
        );
    }
    Ok(transferred)
}
