//! Integration tests for the complete discovery and transfer pipeline.
//!
//! Tests the full path from enumeration to pattern verification:
//! ```text
//! Discovery → Registry → Harness → Dispatch → Transfer → Pattern check
//! ```
//!
//! These tests run against the scripted host in `test_utils`, no physical
//! USB hardware required.

use std::ops::ControlFlow;

use usut_lib::config::{
    BusLocation, DeviceSelection, RunConfig, TestParameters, BULK_IN, BULK_OUT, TEST_CASES,
};
use usut_lib::harness::{run_registry, RunHeader, TestOutcome};
use usut_lib::host::UsbError;
use usut_lib::pattern::{self, PatternError, PatternMode};
use usut_lib::registry::{discover, DiscoveryError};
use usut_lib::test_utils::{MockDevice, MockHost};
use usut_lib::transfer::{simple_io, Direction, TransferError};

/// Run the harness and collect every outcome
fn run_all(host: &MockHost, params: &TestParameters, config: &RunConfig) -> Vec<TestOutcome> {
    let mut registry = discover(host).expect("discovery should succeed");
    let mut outcomes = Vec::new();
    run_registry(&mut registry, params, config, |outcome| {
        outcomes.push(outcome.clone());
        ControlFlow::Continue(())
    });
    outcomes
}

fn quick_params() -> TestParameters {
    TestParameters {
        iterations: 4,
        length: 512,
        vary: 512,
        ..Default::default()
    }
}

// ============================================================================
// Happy Path
// ============================================================================

#[test]
fn test_gadget_zero_mod63_full_run() {
    let host = MockHost::new();
    host.add_device(
        MockDevice::new(0x0525, 0xa4a0)
            .at(1, 7)
            .with_kernel_driver()
            .sourcing(PatternMode::Mod63),
    );
    let config = RunConfig {
        pattern: PatternMode::Mod63,
        ..Default::default()
    };

    let outcomes = run_all(&host, &quick_params(), &config);

    assert_eq!(outcomes.len(), TEST_CASES as usize);
    assert!(outcomes.iter().all(|o| o.passed && o.status == 0));

    let transfers = host.transfers();
    assert_eq!(transfers.len(), 16);
    for record in transfers.iter().filter(|r| r.endpoint == BULK_OUT) {
        assert_eq!(pattern::check(PatternMode::Mod63, &record.data), Ok(()));
    }
    assert_eq!(transfers.iter().filter(|r| r.endpoint == BULK_IN).count(), 8);
}

#[test]
fn test_saturated_ramp_keeps_full_length() {
    // length == vary == 512: every ramp step lands on 0 and clamps to 512
    let host = MockHost::new();
    host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
    let config = RunConfig {
        test: Some(3),
        ..Default::default()
    };

    run_all(&host, &quick_params(), &config);

    let lengths: Vec<usize> = host.transfers().iter().map(|r| r.data.len()).collect();
    assert_eq!(lengths, vec![512; 4]);
}

#[test]
fn test_ramp_crosses_packet_boundaries() {
    let host = MockHost::new();
    host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
    let params = TestParameters {
        iterations: 12,
        length: 512,
        vary: 50,
        ..Default::default()
    };
    let config = RunConfig {
        test: Some(3),
        ..Default::default()
    };

    run_all(&host, &params, &config);

    let lengths: Vec<usize> = host.transfers().iter().map(|r| r.data.len()).collect();
    assert_eq!(
        lengths,
        vec![512, 50, 100, 150, 200, 250, 300, 350, 400, 450, 500, 38]
    );
    assert!(lengths.iter().all(|&len| len > 0 && len <= 512));
}

// ============================================================================
// Failure Scopes
// ============================================================================

#[test]
fn test_write_failure_on_second_call() {
    let host = MockHost::new();
    host.add_device(
        MockDevice::new(0x0547, 0x1002)
            .at(1, 2)
            .fail_transfer(2, UsbError::Timeout),
    );
    let registry = discover(&host).expect("discovery should succeed");
    let mut dev = registry.into_iter().next().expect("one test device");
    dev.param = quick_params();

    let result = simple_io(&mut dev, 5, 0, 0, Direction::Write, PatternMode::Zero);

    assert_eq!(host.transfers().len(), 2);
    let err = result.expect_err("second write should fail");
    assert_eq!(err.status(), UsbError::Timeout.code());
}

#[test]
fn test_read_mismatch_at_offset_seven() {
    let host = MockHost::new();
    host.add_device(
        MockDevice::new(0x0547, 0x1002)
            .at(1, 2)
            .sourcing(PatternMode::Mod63)
            .corrupt_read(7, 0x40),
    );
    let registry = discover(&host).expect("discovery should succeed");
    let mut dev = registry.into_iter().next().expect("one test device");
    dev.param = quick_params();

    let result = simple_io(&mut dev, 5, 0, 0, Direction::Read, PatternMode::Mod63);

    assert_eq!(
        result,
        Err(TransferError::Verification(PatternError::Mismatch {
            offset: 7,
            actual: 0x40,
            expected: 7,
        }))
    );
}

#[test]
fn test_failing_test_does_not_stop_the_run() {
    let host = MockHost::new();
    host.add_device(
        MockDevice::new(0x0547, 0x1002)
            .at(1, 2)
            .sourcing(PatternMode::Zero)
            .corrupt_read(0, 1),
    );

    let outcomes = run_all(&host, &quick_params(), &RunConfig::default());

    let failed: Vec<u32> = outcomes.iter().filter(|o| !o.passed).map(|o| o.test).collect();
    assert_eq!(failed, vec![2, 4]);
    assert_eq!(outcomes.len(), TEST_CASES as usize);
}

#[test]
fn test_unsupported_pattern_fails_reads_only() {
    let host = MockHost::new();
    host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
    let config = RunConfig {
        pattern: PatternMode::Unsupported(2),
        ..Default::default()
    };

    let outcomes = run_all(&host, &quick_params(), &config);

    let failed: Vec<u32> = outcomes.iter().filter(|o| !o.passed).map(|o| o.test).collect();
    assert_eq!(failed, vec![2, 4]);
}

#[test]
fn test_detach_failure_leaves_no_registry() {
    let host = MockHost::new();
    host.add_device(
        MockDevice::new(0x0547, 0x1002)
            .at(1, 2)
            .with_kernel_driver()
            .with_detach_error(UsbError::Busy),
    );

    let result = discover(&host);

    assert!(matches!(
        result,
        Err(DiscoveryError::Detach {
            source: UsbError::Busy,
            ..
        })
    ));
    assert_eq!(host.open_handles(), 0);
}

// ============================================================================
// Device Selection
// ============================================================================

#[test]
fn test_selection_skips_other_devices() {
    let host = MockHost::new();
    host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
    host.add_device(MockDevice::new(0x04b4, 0x8613).at(1, 5));
    host.add_device(MockDevice::new(0xdead, 0xbeef).at(1, 6));
    let config = RunConfig {
        selection: DeviceSelection::One(BusLocation { bus: 1, address: 5 }),
        test: Some(1),
        ..Default::default()
    };

    let outcomes = run_all(&host, &quick_params(), &config);

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].device, BusLocation { bus: 1, address: 5 });
    assert!(host.transfers().iter().all(|r| r.address == 5));
}

#[test]
fn test_outcome_serializes_to_json() {
    let outcome = TestOutcome {
        device: BusLocation { bus: 1, address: 2 },
        test: 4,
        status: -7,
        passed: false,
        detail: Some("bulk read error -7: Operation timed out".to_string()),
    };

    let line = serde_json::to_string(&outcome).expect("serializable");
    assert_eq!(
        line,
        r#"{"device":{"bus":1,"address":2},"test":4,"status":-7,"passed":false,"detail":"bulk read error -7: Operation timed out"}"#
    );
}

#[test]
fn test_run_header_serializes_to_json() {
    let params = TestParameters::default();
    let config = RunConfig {
        selection: DeviceSelection::One(BusLocation { bus: 1, address: 4 }),
        test: Some(3),
        pattern: PatternMode::Mod63,
        ..Default::default()
    };
    let header = RunHeader {
        parameters: &params,
        config: &config,
    };

    let line = serde_json::to_string(&header).expect("serializable");
    assert_eq!(
        line,
        r#"{"parameters":{"test_num":0,"iterations":1000,"length":512,"vary":512,"sglen":32},"config":{"selection":{"one":{"bus":1,"address":4}},"test":3,"forever":false,"dry_run":false,"pattern":"mod63"}}"#
    );
}

#[test]
fn test_run_header_defaults() {
    let params = TestParameters::default();
    let config = RunConfig::default();
    let header = RunHeader {
        parameters: &params,
        config: &config,
    };

    let value = serde_json::to_value(header).expect("serializable");
    assert_eq!(value["config"]["selection"], "all");
    assert_eq!(value["config"]["test"], serde_json::Value::Null);
    assert_eq!(value["config"]["pattern"], "zero");
}
