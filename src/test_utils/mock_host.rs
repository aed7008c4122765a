//! Scripted USB host
//!
//! Implements the [`crate::host`] traits over an in-memory device list.
//! Devices behave like well-behaved test firmware unless a failure is
//! scripted, and every host call is recorded for later assertions.
//!
//! # Example
//!
//! ```rust,ignore
//! use usut_lib::host::UsbError;
//! use usut_lib::registry::discover;
//! use usut_lib::test_utils::{MockDevice, MockHost};
//!
//! let host = MockHost::new();
//! host.add_device(MockDevice::new(0x0525, 0xa4a0).at(1, 4).fail_transfer(2, UsbError::Timeout));
//!
//! let registry = discover(&host)?;
//! // ... run tests, then inspect host.transfers()
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::config::BusLocation;
use crate::host::{DeviceDescriptor, DeviceHandle, UsbDevice, UsbError, UsbHost};
use crate::pattern::{self, PatternMode};

/// A recorded host call, tagged with the device address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEvent {
    /// Device opened
    Open(u8),
    /// Handle closed
    Close(u8),
    /// Kernel driver query on interface 0
    KernelDriverQuery(u8),
    /// Kernel driver detach
    Detach(u8),
    /// Configuration selected, with its value
    SetConfiguration(u8, u8),
}

/// A recorded bulk transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Device address
    pub address: u8,
    /// Endpoint address
    pub endpoint: u8,
    /// Bytes sent (OUT) or returned (IN); empty for failed transfers
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    events: Vec<MockEvent>,
    transfers: Vec<TransferRecord>,
    open_handles: usize,
}

/// Scripted behaviour of one attached device
#[derive(Debug, Clone)]
pub struct MockDevice {
    descriptor: DeviceDescriptor,
    location: BusLocation,
    kernel_driver: bool,
    kernel_query_error: Option<UsbError>,
    descriptor_error: Option<UsbError>,
    open_error: Option<UsbError>,
    detach_error: Option<UsbError>,
    configuration: Result<u8, UsbError>,
    set_configuration_error: Option<UsbError>,
    source: PatternMode,
    corrupt: Option<(usize, u8)>,
    short_read: Option<usize>,
    transfer_failure: Option<(usize, UsbError)>,
}

impl MockDevice {
    /// Device with the given IDs on bus 1, address 1
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                vendor_id,
                product_id,
            },
            location: BusLocation { bus: 1, address: 1 },
            kernel_driver: false,
            kernel_query_error: None,
            descriptor_error: None,
            open_error: None,
            detach_error: None,
            configuration: Ok(1),
            set_configuration_error: None,
            source: PatternMode::Zero,
            corrupt: None,
            short_read: None,
            transfer_failure: None,
        }
    }

    /// Place the device at `bus`/`address`
    pub fn at(mut self, bus: u8, address: u8) -> Self {
        self.location = BusLocation { bus, address };
        self
    }

    /// A kernel driver is bound to interface 0
    pub fn with_kernel_driver(mut self) -> Self {
        self.kernel_driver = true;
        self
    }

    /// The kernel driver query fails
    pub fn with_kernel_query_error(mut self, err: UsbError) -> Self {
        self.kernel_query_error = Some(err);
        self
    }

    /// Reading the descriptor fails
    pub fn with_descriptor_error(mut self, err: UsbError) -> Self {
        self.descriptor_error = Some(err);
        self
    }

    /// Opening the device fails
    pub fn with_open_error(mut self, err: UsbError) -> Self {
        self.open_error = Some(err);
        self
    }

    /// Detaching the kernel driver fails
    pub fn with_detach_error(mut self, err: UsbError) -> Self {
        self.detach_error = Some(err);
        self
    }

    /// Report `value` as the current configuration
    pub fn with_configuration(mut self, value: u8) -> Self {
        self.configuration = Ok(value);
        self
    }

    /// The configuration query fails
    pub fn with_configuration_error(mut self, err: UsbError) -> Self {
        self.configuration = Err(err);
        self
    }

    /// Selecting a configuration fails
    pub fn with_set_configuration_error(mut self, err: UsbError) -> Self {
        self.set_configuration_error = Some(err);
        self
    }

    /// Pattern the device sources on bulk IN
    pub fn sourcing(mut self, mode: PatternMode) -> Self {
        self.source = mode;
        self
    }

    /// Replace byte `offset` of every bulk IN payload with `value`
    pub fn corrupt_read(mut self, offset: usize, value: u8) -> Self {
        self.corrupt = Some((offset, value));
        self
    }

    /// End every bulk IN transfer after at most `len` bytes
    ///
    /// Bytes past the short packet are left as they were in the buffer.
    pub fn short_read(mut self, len: usize) -> Self {
        self.short_read = Some(len);
        self
    }

    /// Fail the `call`-th bulk transfer (1-based) on a handle with `err`
    pub fn fail_transfer(mut self, call: usize, err: UsbError) -> Self {
        self.transfer_failure = Some((call, err));
        self
    }
}

/// In-memory USB host
#[derive(Default)]
pub struct MockHost {
    devices: RefCell<Vec<MockDevice>>,
    list_error: Cell<Option<UsbError>>,
    state: Rc<RefCell<MockState>>,
}

impl MockHost {
    /// Host with no devices attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device; enumeration returns devices in attach order
    pub fn add_device(&self, device: MockDevice) {
        self.devices.borrow_mut().push(device);
    }

    /// Make device enumeration fail
    pub fn fail_device_list(&self, err: UsbError) {
        self.list_error.set(Some(err));
    }

    /// Host calls recorded so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.borrow().events.clone()
    }

    /// Bulk transfers recorded so far, across all devices
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state.borrow().transfers.clone()
    }

    /// Handles currently open
    pub fn open_handles(&self) -> usize {
        self.state.borrow().open_handles
    }
}

impl UsbHost for MockHost {
    type Device = MockDeviceRef;

    fn devices(&self) -> Result<Vec<MockDeviceRef>, UsbError> {
        if let Some(err) = self.list_error.get() {
            return Err(err);
        }
        Ok(self
            .devices
            .borrow()
            .iter()
            .map(|device| MockDeviceRef {
                device: device.clone(),
                state: Rc::clone(&self.state),
            })
            .collect())
    }
}

/// Enumerated mock device
pub struct MockDeviceRef {
    device: MockDevice,
    state: Rc<RefCell<MockState>>,
}

impl UsbDevice for MockDeviceRef {
    type Handle = MockHandle;

    fn descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        match self.device.descriptor_error {
            Some(err) => Err(err),
            None => Ok(self.device.descriptor),
        }
    }

    fn location(&self) -> BusLocation {
        self.device.location
    }

    fn open(&self) -> Result<MockHandle, UsbError> {
        if let Some(err) = self.device.open_error {
            return Err(err);
        }

        let mut state = self.state.borrow_mut();
        state.events.push(MockEvent::Open(self.device.location.address));
        state.open_handles += 1;

        Ok(MockHandle {
            kernel_driver: self.device.kernel_driver,
            configuration: self.device.configuration,
            device: self.device.clone(),
            state: Rc::clone(&self.state),
            calls: 0,
        })
    }
}

/// Open mock device connection
pub struct MockHandle {
    device: MockDevice,
    state: Rc<RefCell<MockState>>,
    kernel_driver: bool,
    configuration: Result<u8, UsbError>,
    calls: usize,
}

impl MockHandle {
    fn address(&self) -> u8 {
        self.device.location.address
    }
}

impl DeviceHandle for MockHandle {
    fn kernel_driver_active(&self, _interface: u8) -> Result<bool, UsbError> {
        self.state
            .borrow_mut()
            .events
            .push(MockEvent::KernelDriverQuery(self.address()));
        match self.device.kernel_query_error {
            Some(err) => Err(err),
            None => Ok(self.kernel_driver),
        }
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<(), UsbError> {
        self.state
            .borrow_mut()
            .events
            .push(MockEvent::Detach(self.address()));
        if let Some(err) = self.device.detach_error {
            return Err(err);
        }
        self.kernel_driver = false;
        Ok(())
    }

    fn configuration(&self) -> Result<u8, UsbError> {
        self.configuration
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        self.state
            .borrow_mut()
            .events
            .push(MockEvent::SetConfiguration(self.address(), value));
        if let Some(err) = self.device.set_configuration_error {
            return Err(err);
        }
        self.configuration = Ok(value);
        Ok(())
    }

    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.calls += 1;
        let mut record = TransferRecord {
            address: self.address(),
            endpoint,
            data: Vec::new(),
        };

        let failure = self
            .device
            .transfer_failure
            .filter(|&(call, _)| call == self.calls)
            .map(|(_, err)| err);

        let result = match failure {
            Some(err) => Err(err),
            None if endpoint & 0x80 != 0 => {
                let len = self.device.short_read.map_or(data.len(), |n| n.min(data.len()));
                let received = &mut data[..len];
                pattern::fill(self.device.source, received);
                if let Some((offset, value)) = self.device.corrupt {
                    if let Some(byte) = received.get_mut(offset) {
                        *byte = value;
                    }
                }
                record.data = received.to_vec();
                Ok(len)
            }
            None => {
                record.data = data.to_vec();
                Ok(data.len())
            }
        };

        self.state.borrow_mut().transfers.push(record);
        result
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.events.push(MockEvent::Close(self.device.location.address));
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}
