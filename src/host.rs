//! USB host-control seam
//!
//! The test engine only needs a handful of host primitives: enumerate
//! devices, read their descriptors, open them, take interface 0 away from
//! a kernel driver, read or select the configuration, and issue synchronous
//! bulk transfers. These traits
//! describe exactly that surface so the engine runs unchanged against
//! libusb ([`crate::libusb`]) or the scripted host in [`crate::test_utils`].

use std::time::Duration;

use crate::config::BusLocation;

/// libusb error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum UsbError {
    /// Input/output error
    #[error("I/O error")]
    IoError = -1,
    /// Invalid parameter
    #[error("Invalid parameter")]
    InvalidParam = -2,
    /// Access denied (insufficient permissions)
    #[error("Access denied")]
    Access = -3,
    /// No such device (it may have been disconnected)
    #[error("No such device")]
    NoDevice = -4,
    /// Entity not found
    #[error("Entity not found")]
    NotFound = -5,
    /// Resource busy
    #[error("Resource busy")]
    Busy = -6,
    /// Operation timed out
    #[error("Operation timed out")]
    Timeout = -7,
    /// Overflow
    #[error("Overflow")]
    Overflow = -8,
    /// Pipe error (endpoint stalled)
    #[error("Pipe error")]
    Pipe = -9,
    /// System call interrupted
    #[error("System call interrupted")]
    Interrupted = -10,
    /// Insufficient memory
    #[error("Insufficient memory")]
    NoMem = -11,
    /// Operation not supported or unimplemented on this platform
    #[error("Operation not supported")]
    NotSupported = -12,
    /// Other error
    #[error("Other error")]
    Other = -99,
}

impl From<i32> for UsbError {
    fn from(code: i32) -> Self {
        match code {
            -1 => UsbError::IoError,
            -2 => UsbError::InvalidParam,
            -3 => UsbError::Access,
            -4 => UsbError::NoDevice,
            -5 => UsbError::NotFound,
            -6 => UsbError::Busy,
            -7 => UsbError::Timeout,
            -8 => UsbError::Overflow,
            -9 => UsbError::Pipe,
            -10 => UsbError::Interrupted,
            -11 => UsbError::NoMem,
            -12 => UsbError::NotSupported,
            _ => UsbError::Other,
        }
    }
}

impl UsbError {
    /// Raw libusb status code
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Identifier fields of a USB device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Vendor ID (`idVendor`)
    pub vendor_id: u16,
    /// Product ID (`idProduct`)
    pub product_id: u16,
}

/// Enumerates attached devices
pub trait UsbHost {
    /// Device type produced by enumeration
    type Device: UsbDevice;

    /// List every attached device
    ///
    /// # Errors
    /// Returns the host status when the device list cannot be obtained.
    fn devices(&self) -> Result<Vec<Self::Device>, UsbError>;
}

/// An enumerated, not yet opened, device
pub trait UsbDevice {
    /// Handle type returned by [`UsbDevice::open`]
    type Handle: DeviceHandle;

    /// Read the device descriptor
    ///
    /// # Errors
    /// Returns the host status when the descriptor cannot be read.
    fn descriptor(&self) -> Result<DeviceDescriptor, UsbError>;

    /// Bus number and address of the device
    fn location(&self) -> BusLocation;

    /// Open a connection to the device
    ///
    /// # Errors
    /// Returns the host status when the device cannot be opened.
    fn open(&self) -> Result<Self::Handle, UsbError>;
}

/// An open device connection; closing happens on drop
pub trait DeviceHandle {
    /// Whether a kernel driver is bound to `interface`
    ///
    /// # Errors
    /// Returns the host status when the query itself fails.
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError>;

    /// Detach the kernel driver bound to `interface`
    ///
    /// # Errors
    /// Returns the host status when the driver cannot be detached.
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Current configuration value, 0 when unconfigured
    ///
    /// # Errors
    /// Returns the host status when the configuration cannot be read.
    fn configuration(&self) -> Result<u8, UsbError>;

    /// Select configuration `value`, such as Gadget Zero's
    /// [`crate::config::SOURCESINK_CONFIG`]
    ///
    /// # Errors
    /// Returns the host status when the device rejects the configuration.
    fn set_configuration(&mut self, value: u8) -> Result<(), UsbError>;

    /// Perform a blocking bulk transfer on `endpoint`
    ///
    /// The direction is taken from bit 7 of the endpoint address. For OUT
    /// endpoints `data` is sent, for IN endpoints it is filled.
    ///
    /// # Returns
    /// Number of bytes actually transferred
    ///
    /// # Errors
    /// Returns the transfer status, including [`UsbError::Timeout`].
    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;
}
