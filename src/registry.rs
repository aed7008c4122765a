//! Test device registry and discovery
//!
//! Discovery walks every attached device, keeps the ones the matcher
//! recognizes, takes interface 0 away from any bound kernel driver and
//! records each opened device in the [`Registry`].
//!
//! Entries are prepended, so iteration runs from the most recently
//! discovered device back to the first one.

use std::collections::VecDeque;
use thiserror::Error;

use crate::config::{BusLocation, TestParameters, TEST_INTERFACE};
use crate::host::{DeviceHandle, UsbDevice, UsbError, UsbHost};
use crate::matcher;

/// Errors that abort discovery as a whole
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The attached device list could not be obtained
    #[error("can't get USB device list: {0}")]
    DeviceList(UsbError),

    /// A bound kernel driver could not be detached
    #[error("libusb_detach_kernel_driver on {location} = {code}", code = .source.code())]
    Detach {
        /// Device whose driver stayed bound
        location: BusLocation,
        /// Host status of the detach
        source: UsbError,
    },
}

impl DiscoveryError {
    /// Raw libusb status code
    pub fn status(&self) -> i32 {
        match self {
            DiscoveryError::DeviceList(err) => err.code(),
            DiscoveryError::Detach { source, .. } => source.code(),
        }
    }
}

/// Per-device failures; the device is skipped and discovery continues
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceSkipError {
    /// The device descriptor could not be read
    #[error("cannot get descriptor: {0}")]
    Descriptor(UsbError),

    /// The device could not be opened
    #[error("couldn't open device: {0}")]
    Open(UsbError),

    /// No memory for the registry entry
    #[error("no memory for registry entry")]
    Allocation,
}

/// Link speed of a test device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpeed {
    /// Not resolved (still enumerating or never queried)
    #[default]
    Unknown,
    /// USB 1.1 low speed
    Low,
    /// USB 1.1 full speed
    Full,
    /// USB 2.0 high speed
    High,
}

/// One opened test device
pub struct TestDevice<H> {
    /// Open connection, exclusively owned by this entry
    pub handle: H,
    /// Bus number and address
    pub location: BusLocation,
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
    /// Matcher table description
    pub label: &'static str,
    /// Interface under test
    pub ifnum: u8,
    /// Link speed, not queried so always [`DeviceSpeed::Unknown`]
    pub speed: DeviceSpeed,
    /// Configuration value read during discovery, if the query succeeded
    pub configuration: Option<u8>,
    /// Selected test id, `None` for all
    pub test: Option<u32>,
    /// Repeat the test sequence forever
    pub forever: bool,
    /// Parameters of the current test
    pub param: TestParameters,
}

impl<H: DeviceHandle> TestDevice<H> {
    /// Switch the device to configuration `value`
    ///
    /// On success the recorded [`TestDevice::configuration`] follows; on
    /// failure it keeps the value read during discovery.
    ///
    /// # Errors
    /// Returns the host status when the configuration can't be selected.
    pub fn set_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        self.handle.set_configuration(value).map_err(|err| {
            log::error!(
                "Couldn't set configuration {} on device {}: {}",
                value,
                self.location,
                err
            );
            err
        })?;
        log::debug!("Device {} now in configuration {}", self.location, value);
        self.configuration = Some(value);
        Ok(())
    }
}

/// Discovered test devices
pub struct Registry<H> {
    entries: VecDeque<TestDevice<H>>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<H> Registry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an entry, so it becomes the first one iterated
    ///
    /// # Errors
    /// Returns [`DeviceSkipError::Allocation`] when the entry can't be stored.
    pub fn prepend(&mut self, device: TestDevice<H>) -> Result<(), DeviceSkipError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| DeviceSkipError::Allocation)?;
        self.entries.push_front(device);
        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no test device was recognized
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recently discovered first
    pub fn iter(&self) -> impl Iterator<Item = &TestDevice<H>> {
        self.entries.iter()
    }

    /// Mutable entries, most recently discovered first
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TestDevice<H>> {
        self.entries.iter_mut()
    }
}

impl<H> IntoIterator for Registry<H> {
    type Item = TestDevice<H>;
    type IntoIter = std::collections::vec_deque::IntoIter<TestDevice<H>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Find, open and take over every attached test device
///
/// A device whose descriptor can't be read, that can't be opened, or whose
/// entry can't be allocated is skipped with a diagnostic.
///
/// # Errors
/// Fails when the device list can't be obtained, or when a kernel driver
/// bound to a test device can't be detached. Devices opened before the
/// failure are closed.
pub fn discover<U: UsbHost>(
    host: &U,
) -> Result<Registry<<U::Device as UsbDevice>::Handle>, DiscoveryError> {
    let devices = host.devices().map_err(DiscoveryError::DeviceList)?;
    let mut registry = Registry::new();

    for device in &devices {
        match probe(device) {
            Ok(Some(entry)) => {
                let location = entry.location;
                if let Err(err) = registry.prepend(entry) {
                    log::error!("Skipping device {}: {}", location, err);
                }
            }
            Ok(None) => {}
            Err(Probe::Skip(location, err)) => {
                log::error!("Skipping device {}: {}", location, err);
            }
            Err(Probe::Abort(err)) => {
                log::error!("{}", err);
                return Err(err);
            }
        }
    }

    log::info!("Recognized {} test device(s)", registry.len());
    Ok(registry)
}

enum Probe {
    Skip(BusLocation, DeviceSkipError),
    Abort(DiscoveryError),
}

/// Open and take over one device, `Ok(None)` when it isn't a test device
fn probe<D: UsbDevice>(device: &D) -> Result<Option<TestDevice<D::Handle>>, Probe> {
    let location = device.location();
    let descriptor = device
        .descriptor()
        .map_err(|err| Probe::Skip(location, DeviceSkipError::Descriptor(err)))?;

    let Some(known) = matcher::lookup(&descriptor) else {
        log::trace!(
            "Ignoring {:04x}:{:04x} at {}",
            descriptor.vendor_id,
            descriptor.product_id,
            location
        );
        return Ok(None);
    };

    let mut handle = device
        .open()
        .map_err(|err| Probe::Skip(location, DeviceSkipError::Open(err)))?;

    take_over_interface(&mut handle, TEST_INTERFACE)
        .map_err(|source| Probe::Abort(DiscoveryError::Detach { location, source }))?;

    let configuration = match handle.configuration() {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Couldn't get configuration for device {}: {}", location, err);
            None
        }
    };

    log::info!(
        "Test device {:04x}:{:04x} at {} ({}), configuration {:?}",
        descriptor.vendor_id,
        descriptor.product_id,
        location,
        known.label,
        configuration
    );

    Ok(Some(TestDevice {
        handle,
        location,
        vendor_id: descriptor.vendor_id,
        product_id: descriptor.product_id,
        label: known.label,
        ifnum: TEST_INTERFACE,
        speed: DeviceSpeed::Unknown,
        configuration,
        test: None,
        forever: false,
        param: TestParameters::default(),
    }))
}

/// Detach the kernel driver from `interface`, only if one is bound
///
/// A failed query (commonly `NOT_SUPPORTED`) counts as no driver bound.
///
/// # Returns
/// Whether a driver was detached
fn take_over_interface<H: DeviceHandle>(handle: &mut H, interface: u8) -> Result<bool, UsbError> {
    let active = match handle.kernel_driver_active(interface) {
        Ok(active) => active,
        Err(err) => {
            log::debug!("Kernel driver check on interface {} failed: {}", interface, err);
            false
        }
    };

    if !active {
        return Ok(false);
    }

    log::info!("Kernel driver active on interface {}, detaching...", interface);
    handle.detach_kernel_driver(interface)?;
    log::info!("Kernel driver detached from interface {}", interface);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LOOPBACK_CONFIG, SOURCESINK_CONFIG};
    use crate::test_utils::{MockDevice, MockEvent, MockHost};

    #[test]
    fn test_non_matching_devices_are_not_opened() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x1234, 0x5678).at(1, 2));

        let registry = discover(&host).expect("discovery should succeed");
        assert!(registry.is_empty());
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_registry_order_is_reverse_discovery_order() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
        host.add_device(MockDevice::new(0x1234, 0x5678).at(1, 3));
        host.add_device(MockDevice::new(0x0525, 0xa4a0).at(1, 4));
        host.add_device(MockDevice::new(0x04b4, 0x8613).at(2, 5));

        let registry = discover(&host).expect("discovery should succeed");
        let addresses: Vec<u8> = registry.iter().map(|dev| dev.location.address).collect();
        assert_eq!(addresses, vec![5, 4, 2]);
    }

    #[test]
    fn test_entry_fields() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0525, 0xa4a0).at(3, 9).with_configuration(3));

        let registry = discover(&host).expect("discovery should succeed");
        let dev = registry.iter().next().expect("one entry");
        assert_eq!(dev.location, BusLocation { bus: 3, address: 9 });
        assert_eq!(dev.label, "gadget zero");
        assert_eq!(dev.ifnum, 0);
        assert_eq!(dev.speed, DeviceSpeed::Unknown);
        assert_eq!(dev.configuration, Some(3));
        assert_eq!(dev.test, None);
        assert!(!dev.forever);
    }

    #[test]
    fn test_detach_only_when_driver_bound() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
        host.add_device(MockDevice::new(0x0547, 0x2235).at(1, 3).with_kernel_driver());

        let registry = discover(&host).expect("discovery should succeed");
        assert_eq!(registry.len(), 2);

        let events = host.events();
        assert!(!events.contains(&MockEvent::Detach(2)));
        assert!(events.contains(&MockEvent::KernelDriverQuery(2)));
        assert!(events.contains(&MockEvent::Detach(3)));
    }

    #[test]
    fn test_failed_driver_query_counts_as_unbound() {
        let host = MockHost::new();
        host.add_device(
            MockDevice::new(0x0547, 0x1002)
                .at(1, 2)
                .with_kernel_query_error(UsbError::NotSupported),
        );

        let registry = discover(&host).expect("discovery should succeed");
        assert_eq!(registry.len(), 1);
        assert!(!host.events().contains(&MockEvent::Detach(2)));
    }

    #[test]
    fn test_detach_failure_aborts_discovery() {
        let host = MockHost::new();
        host.add_device(
            MockDevice::new(0x0547, 0x1002)
                .at(1, 2)
                .with_kernel_driver()
                .with_detach_error(UsbError::Busy),
        );

        let err = discover(&host).err().expect("discovery should fail");
        assert_eq!(
            err,
            DiscoveryError::Detach {
                location: BusLocation { bus: 1, address: 2 },
                source: UsbError::Busy,
            }
        );
        assert_eq!(err.status(), -6);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn test_detach_failure_closes_earlier_devices() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2));
        host.add_device(
            MockDevice::new(0x0525, 0xa4a0)
                .at(1, 3)
                .with_kernel_driver()
                .with_detach_error(UsbError::Access),
        );
        host.add_device(MockDevice::new(0x0525, 0xa4a4).at(1, 4));

        assert!(discover(&host).is_err());
        assert_eq!(host.open_handles(), 0);
        // Discovery stops at the failing device
        assert!(!host.events().contains(&MockEvent::Open(4)));
    }

    #[test]
    fn test_open_failure_skips_device() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0547, 0x1002).at(1, 2).with_open_error(UsbError::Access));
        host.add_device(MockDevice::new(0x0525, 0xa4a0).at(1, 3));

        let registry = discover(&host).expect("discovery should succeed");
        let addresses: Vec<u8> = registry.iter().map(|dev| dev.location.address).collect();
        assert_eq!(addresses, vec![3]);
    }

    #[test]
    fn test_descriptor_failure_skips_device() {
        let host = MockHost::new();
        host.add_device(
            MockDevice::new(0x0547, 0x1002)
                .at(1, 2)
                .with_descriptor_error(UsbError::IoError),
        );

        let registry = discover(&host).expect("discovery should succeed");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_configuration_failure_is_informational() {
        let host = MockHost::new();
        host.add_device(
            MockDevice::new(0x0547, 0x1002)
                .at(1, 2)
                .with_configuration_error(UsbError::NoDevice),
        );

        let registry = discover(&host).expect("discovery should succeed");
        let dev = registry.iter().next().expect("one entry");
        assert_eq!(dev.configuration, None);
    }

    #[test]
    fn test_device_list_failure() {
        let host = MockHost::new();
        host.fail_device_list(UsbError::NoMem);

        let err = discover(&host).err().expect("discovery should fail");
        assert_eq!(err, DiscoveryError::DeviceList(UsbError::NoMem));
        assert_eq!(err.status(), -11);
    }

    #[test]
    fn test_set_configuration_updates_entry() {
        let host = MockHost::new();
        host.add_device(MockDevice::new(0x0525, 0xa4a0).at(1, 2).with_configuration(LOOPBACK_CONFIG));
        let mut registry = discover(&host).expect("discovery should succeed");
        let dev = registry.iter_mut().next().expect("one test device");
        assert_eq!(dev.configuration, Some(LOOPBACK_CONFIG));

        dev.set_configuration(SOURCESINK_CONFIG).expect("configuration accepted");

        assert_eq!(dev.configuration, Some(SOURCESINK_CONFIG));
        assert_eq!(dev.handle.configuration(), Ok(SOURCESINK_CONFIG));
        assert!(host
            .events()
            .contains(&MockEvent::SetConfiguration(2, SOURCESINK_CONFIG)));
    }

    #[test]
    fn test_set_configuration_failure_keeps_previous_value() {
        let host = MockHost::new();
        host.add_device(
            MockDevice::new(0x0525, 0xa4a0)
                .at(1, 2)
                .with_configuration(LOOPBACK_CONFIG)
                .with_set_configuration_error(UsbError::Busy),
        );
        let mut registry = discover(&host).expect("discovery should succeed");
        let dev = registry.iter_mut().next().expect("one test device");

        assert_eq!(dev.set_configuration(SOURCESINK_CONFIG), Err(UsbError::Busy));
        assert_eq!(dev.configuration, Some(LOOPBACK_CONFIG));
    }
}
