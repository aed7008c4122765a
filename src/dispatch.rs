//! Test case dispatch
//!
//! Maps a test id to a transfer profile. Ids 1-4 are the simple bulk
//! tests; every other id in `0..TEST_CASES` is a no-op that passes.

use crate::config::TestParameters;
use crate::host::DeviceHandle;
use crate::pattern::PatternMode;
use crate::registry::TestDevice;
use crate::transfer::{simple_io, Direction, TransferError};

/// A defined test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    /// Test 1: bulk OUT at a fixed length
    Write,
    /// Test 2: bulk IN at a fixed length
    Read,
    /// Test 3: bulk OUT with the length ramped by `vary`
    WriteVaried,
    /// Test 4: bulk IN with the length ramped by `vary`
    ReadVaried,
}

impl TestCase {
    /// Profile for a test id, `None` for undefined ids
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(TestCase::Write),
            2 => Some(TestCase::Read),
            3 => Some(TestCase::WriteVaried),
            4 => Some(TestCase::ReadVaried),
            _ => None,
        }
    }

    /// Test id of this profile
    pub fn id(self) -> u32 {
        match self {
            TestCase::Write => 1,
            TestCase::Read => 2,
            TestCase::WriteVaried => 3,
            TestCase::ReadVaried => 4,
        }
    }

    /// Transfer direction
    pub fn direction(self) -> Direction {
        match self {
            TestCase::Write | TestCase::WriteVaried => Direction::Write,
            TestCase::Read | TestCase::ReadVaried => Direction::Read,
        }
    }

    /// Whether the transfer length is ramped
    pub fn varies(self) -> bool {
        matches!(self, TestCase::WriteVaried | TestCase::ReadVaried)
    }

    /// Announcement line printed before the test runs
    pub fn describe(self, param: &TestParameters) -> String {
        let verb = match self.direction() {
            Direction::Write => "write",
            Direction::Read => "read",
        };
        if self.varies() {
            format!(
                "TEST {}: {}/{} 0..{} bytes {} times",
                self.id(),
                verb,
                param.vary,
                param.length,
                param.iterations
            )
        } else {
            format!(
                "TEST {}: {} {} bytes {} times",
                self.id(),
                verb,
                param.length,
                param.iterations
            )
        }
    }
}

/// Run test `test_id` on `dev`
///
/// # Errors
/// The transfer engine's failure for defined tests. Undefined ids always
/// succeed without touching the device.
pub fn run_test<H: DeviceHandle>(
    dev: &mut TestDevice<H>,
    test_id: u32,
    pattern: PatternMode,
) -> Result<(), TransferError> {
    let Some(case) = TestCase::from_id(test_id) else {
        return Ok(());
    };

    println!("{}", case.describe(&dev.param));

    let iterations = dev.param.iterations;
    let vary = if case.varies() { dev.param.vary } else { 0 };
    simple_io(dev, iterations, vary, 0, case.direction(), pattern)
}
