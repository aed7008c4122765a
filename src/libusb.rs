//! libusb integration
//!
//! Safe wrappers around the `libusb1-sys` FFI bindings implementing the
//! [`crate::host`] traits. Only the synchronous API is used: device
//! enumeration, open/close, kernel driver detach, configuration query and
//! blocking bulk transfers.

use std::marker::PhantomData;
use std::ptr;
use std::time::Duration;

use crate::config::BusLocation;
use crate::host::{DeviceDescriptor, DeviceHandle, UsbDevice, UsbError, UsbHost};

/// Wrapper around libusb context
pub struct LibusbContext {
    ctx: *mut libusb1_sys::libusb_context,
}

impl LibusbContext {
    /// Initialize a new libusb context
    ///
    /// # Errors
    /// Returns the libusb status when `libusb_init` fails.
    pub fn new() -> Result<Self, UsbError> {
        unsafe {
            let mut ctx: *mut libusb1_sys::libusb_context = ptr::null_mut();
            let ret = libusb1_sys::libusb_init(&mut ctx);
            if ret < 0 {
                log::error!("libusb_init failed: {}", ret);
                return Err(UsbError::from(ret));
            }

            log::debug!("libusb context initialized");
            Ok(LibusbContext { ctx })
        }
    }
}

impl Drop for LibusbContext {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                libusb1_sys::libusb_exit(self.ctx);
            }
        }
    }
}

/// Devices and handles borrow the context, so it outlives every registry
/// built from it.
///
/// ```compile_fail
/// use usut_lib::libusb::LibusbContext;
/// use usut_lib::registry::discover;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let context = LibusbContext::new()?;
///     let host = &context;
///     let registry = discover(&host)?;
///     drop(context);
///     println!("{}", registry.len());
///     Ok(())
/// }
/// ```
impl<'ctx> UsbHost for &'ctx LibusbContext {
    type Device = LibusbDevice<'ctx>;

    fn devices(&self) -> Result<Vec<LibusbDevice<'ctx>>, UsbError> {
        unsafe {
            let mut list: *const *mut libusb1_sys::libusb_device = ptr::null();
            let count = libusb1_sys::libusb_get_device_list(self.ctx, &mut list);
            if count < 0 {
                log::error!("libusb_get_device_list failed: {}", count);
                return Err(UsbError::from(count as i32));
            }

            // Each device takes its own reference so the list can be freed
            // (and unreferenced) right away
            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let device = *list.add(i);
                devices.push(LibusbDevice {
                    device: libusb1_sys::libusb_ref_device(device),
                    _context: PhantomData,
                });
            }
            libusb1_sys::libusb_free_device_list(list, 1);

            log::debug!("Enumerated {} USB devices", devices.len());
            Ok(devices)
        }
    }
}

/// Reference-counted libusb device
pub struct LibusbDevice<'ctx> {
    device: *mut libusb1_sys::libusb_device,
    _context: PhantomData<&'ctx LibusbContext>,
}

impl<'ctx> UsbDevice for LibusbDevice<'ctx> {
    type Handle = LibusbDeviceHandle<'ctx>;

    fn descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        unsafe {
            let mut desc = std::mem::zeroed::<libusb1_sys::libusb_device_descriptor>();
            let ret = libusb1_sys::libusb_get_device_descriptor(self.device, &mut desc);
            if ret < 0 {
                return Err(UsbError::from(ret));
            }
            Ok(DeviceDescriptor {
                vendor_id: desc.idVendor,
                product_id: desc.idProduct,
            })
        }
    }

    fn location(&self) -> BusLocation {
        unsafe {
            BusLocation {
                bus: libusb1_sys::libusb_get_bus_number(self.device),
                address: libusb1_sys::libusb_get_device_address(self.device),
            }
        }
    }

    fn open(&self) -> Result<LibusbDeviceHandle<'ctx>, UsbError> {
        unsafe {
            let mut handle: *mut libusb1_sys::libusb_device_handle = ptr::null_mut();
            let ret = libusb1_sys::libusb_open(self.device, &mut handle);
            if ret < 0 {
                return Err(UsbError::from(ret));
            }
            if handle.is_null() {
                log::error!("libusb_open returned null handle");
                return Err(UsbError::NoDevice);
            }
            Ok(LibusbDeviceHandle {
                handle,
                _context: PhantomData,
            })
        }
    }
}

impl Drop for LibusbDevice<'_> {
    fn drop(&mut self) {
        unsafe {
            if !self.device.is_null() {
                libusb1_sys::libusb_unref_device(self.device);
            }
        }
    }
}

/// Wrapper around libusb device handle
pub struct LibusbDeviceHandle<'ctx> {
    handle: *mut libusb1_sys::libusb_device_handle,
    _context: PhantomData<&'ctx LibusbContext>,
}

impl DeviceHandle for LibusbDeviceHandle<'_> {
    fn kernel_driver_active(&self, interface: u8) -> Result<bool, UsbError> {
        unsafe {
            let active =
                libusb1_sys::libusb_kernel_driver_active(self.handle, libc::c_int::from(interface));
            match active {
                0 => Ok(false),
                1 => Ok(true),
                ret => Err(UsbError::from(ret)),
            }
        }
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), UsbError> {
        unsafe {
            let ret =
                libusb1_sys::libusb_detach_kernel_driver(self.handle, libc::c_int::from(interface));
            if ret < 0 {
                return Err(UsbError::from(ret));
            }
            Ok(())
        }
    }

    fn configuration(&self) -> Result<u8, UsbError> {
        unsafe {
            let mut config: libc::c_int = 0;
            let ret = libusb1_sys::libusb_get_configuration(self.handle, &mut config);
            if ret < 0 {
                return Err(UsbError::from(ret));
            }
            u8::try_from(config).map_err(|_| UsbError::Other)
        }
    }

    fn set_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        unsafe {
            let ret =
                libusb1_sys::libusb_set_configuration(self.handle, libc::c_int::from(value));
            if ret < 0 {
                log::error!("libusb_set_configuration({}) failed: {}", value, ret);
                return Err(UsbError::from(ret));
            }
            Ok(())
        }
    }

    fn bulk_transfer(
        &mut self,
        endpoint: u8,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        let length = libc::c_int::try_from(data.len()).map_err(|_| UsbError::InvalidParam)?;
        let timeout_ms = libc::c_uint::try_from(timeout.as_millis()).unwrap_or(libc::c_uint::MAX);

        unsafe {
            let mut transferred: libc::c_int = 0;
            let ret = libusb1_sys::libusb_bulk_transfer(
                self.handle,
                endpoint,
                data.as_mut_ptr(),
                length,
                &mut transferred,
                timeout_ms,
            );

            if ret < 0 {
                return Err(UsbError::from(ret));
            }
            Ok(transferred as usize)
        }
    }
}

impl Drop for LibusbDeviceHandle<'_> {
    fn drop(&mut self) {
        unsafe {
            if !self.handle.is_null() {
                libusb1_sys::libusb_close(self.handle);
            }
        }
    }
}
