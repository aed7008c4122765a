//! Recognition of devices running known test firmware
//!
//! Some table entries are EZ-USB parts that only behave as test devices
//! after simple firmware has been loaded (for example by `fxload` from a
//! hotplug hook). Two kinds of false positive are accepted:
//! - the device has a "real" driver that renumerates, it vanishes quickly
//! - the device doesn't have the test firmware installed

use crate::host::DeviceDescriptor;

/// A known test-firmware vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
    /// Human readable description
    pub label: &'static str,
}

const fn known(vendor_id: u16, product_id: u16, label: &'static str) -> KnownDevice {
    KnownDevice {
        vendor_id,
        product_id,
        label,
    }
}

/// Every vendor/product pair accepted as a test device
pub const KNOWN_TEST_DEVICES: &[KnownDevice] = &[
    known(0x0547, 0x1002, "FX2 with (tweaked) bulksrc firmware"),
    // EZ-USB defaults, usable after loading simple firmware
    known(0x0547, 0x2235, "generic EZ-USB FX controller"),
    known(0x04b4, 0x8613, "generic EZ-USB FX2 controller"),
    known(0x0547, 0x0080, "CY3671 development board with EZ-USB FX"),
    known(0x06cd, 0x010b, "Keyspan 19Qi (an21xx, original EZ-USB)"),
    // Linux-USB gadget test software
    known(0x0525, 0xa4a0, "gadget zero"),
    known(0x0525, 0xa4a4, "gadget zero, user mode subset"),
    known(0x0525, 0xa4a3, "gadget zero, iso user mode"),
    known(0xfff0, 0xfff0, "GPL'd test firmware"),
    known(0x0b62, 0x0059, "iBOT2 high speed webcam"),
];

/// Look up the table entry for a descriptor
pub fn lookup(descriptor: &DeviceDescriptor) -> Option<&'static KnownDevice> {
    KNOWN_TEST_DEVICES.iter().find(|known| {
        known.vendor_id == descriptor.vendor_id && known.product_id == descriptor.product_id
    })
}

/// Whether the descriptor identifies a device running known test firmware
pub fn is_test_device(descriptor: &DeviceDescriptor) -> bool {
    lookup(descriptor).is_some()
}
