//! Harness runner
//!
//! Runs the test id sequence `0..TEST_CASES` (or the single selected id)
//! against registry entries and reports one [`TestOutcome`] per test.

use serde::Serialize;
use std::ops::ControlFlow;

use crate::config::{BusLocation, RunConfig, TestParameters, TEST_CASES};
use crate::dispatch::run_test;
use crate::host::DeviceHandle;
use crate::registry::{Registry, TestDevice};
use crate::transfer::status_of;

/// Leading `--json` line describing the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunHeader<'a> {
    /// Parameters every test starts from
    pub parameters: &'a TestParameters,
    /// Run-wide settings
    pub config: &'a RunConfig,
}

/// Result of one test on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    /// Device the test ran on
    pub device: BusLocation,
    /// Test id
    pub test: u32,
    /// Final status, 0 on success
    pub status: i32,
    /// Whether the status matched the expected success
    pub passed: bool,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Pass/fail counts of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    /// Devices exercised
    pub devices: usize,
    /// Tests that passed
    pub passed: usize,
    /// Tests that failed
    pub failed: usize,
}

impl RunSummary {
    /// Whether every test passed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, outcome: &TestOutcome) {
        if outcome.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Run the test sequence on one device
///
/// `on_outcome` sees every outcome as it happens and can stop the run by
/// returning [`ControlFlow::Break`]; with `config.forever` set that is the
/// only way the sequence ends. Every test starts from `params`, so a ramped
/// length never carries over into the next test.
///
/// # Returns
/// Summary of the run, and whether `on_outcome` stopped it
pub fn run_device<H, F>(
    dev: &mut TestDevice<H>,
    params: &TestParameters,
    config: &RunConfig,
    on_outcome: &mut F,
) -> (RunSummary, ControlFlow<()>)
where
    H: DeviceHandle,
    F: FnMut(&TestOutcome) -> ControlFlow<()>,
{
    dev.param = params.clone();
    dev.test = config.test;
    dev.forever = config.forever;

    let mut summary = RunSummary {
        devices: 1,
        ..Default::default()
    };

    log::info!(
        "Testing {:04x}:{:04x} at {} ({})",
        dev.vendor_id,
        dev.product_id,
        dev.location,
        dev.label
    );

    loop {
        for id in 0..TEST_CASES {
            if dev.test.is_some_and(|selected| selected != id) {
                continue;
            }

            dev.param = TestParameters {
                test_num: id,
                ..params.clone()
            };

            let result = run_test(dev, id, config.pattern);
            let status = status_of(&result);

            let outcome = TestOutcome {
                device: dev.location,
                test: id,
                status,
                passed: result.is_ok(),
                detail: result.err().map(|err| err.to_string()),
            };

            match &outcome.detail {
                None => println!("Test {} :: OK", id),
                Some(detail) => log::error!("Test {} :: FAILED ({}): {}", id, status, detail),
            }

            summary.record(&outcome);
            if on_outcome(&outcome).is_break() {
                return (summary, ControlFlow::Break(()));
            }
        }

        if !dev.forever {
            return (summary, ControlFlow::Continue(()));
        }
    }
}

/// Run the test sequence on every selected registry entry, in registry order
pub fn run_registry<H, F>(
    registry: &mut Registry<H>,
    params: &TestParameters,
    config: &RunConfig,
    mut on_outcome: F,
) -> RunSummary
where
    H: DeviceHandle,
    F: FnMut(&TestOutcome) -> ControlFlow<()>,
{
    let mut total = RunSummary::default();

    for dev in registry
        .iter_mut()
        .filter(|dev| config.selection.matches(dev.location))
    {
        let (summary, flow) = run_device(dev, params, config, &mut on_outcome);
        total.devices += summary.devices;
        total.passed += summary.passed;
        total.failed += summary.failed;
        if flow.is_break() {
            break;
        }
    }

    total
}
