//! HIP-backed device allocator
//!
//! Thin FFI layer over `hipMalloc`/`hipFree`. Only compiled with the `hip`
//! cargo feature since it links against `amdhip64`.

use std::ffi::c_void;
use std::ptr;

use crate::device::{DeviceAllocator, DevicePtr};
use crate::error::{PoolError, PoolResult};

// HIP FFI bindings - the minimal surface the pool needs
#[link(name = "amdhip64")]
extern "C" {
    fn hipInit(flags: u32) -> i32;
    fn hipSetDevice(device_id: i32) -> i32;
    fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    fn hipFree(ptr: *mut c_void) -> i32;
    fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
}

const HIP_SUCCESS: i32 = 0;
const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// Device allocator over the HIP runtime
#[derive(Debug)]
pub struct HipDevice {
    device_id: i32,
}

impl HipDevice {
    /// Initialize the HIP runtime and bind to `device_id`
    pub fn new(device_id: i32) -> PoolResult<Self> {
        let result = unsafe { hipInit(0) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Device(format!(
                "hipInit failed with code {}",
                result
            )));
        }

        let result = unsafe { hipSetDevice(device_id) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Device(format!(
                "hipSetDevice({}) failed with code {}",
                device_id, result
            )));
        }

        tracing::info!("HIP device {} bound", device_id);
        Ok(Self { device_id })
    }

    /// The bound device id
    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    /// Free and total device memory in bytes
    pub fn mem_info(&self) -> PoolResult<(usize, usize)> {
        let mut free = 0usize;
        let mut total = 0usize;
        let result = unsafe { hipMemGetInfo(&mut free, &mut total) };
        if result != HIP_SUCCESS {
            return Err(PoolError::Device(format!(
                "hipMemGetInfo failed with code {}",
                result
            )));
        }
        Ok((free, total))
    }
}

impl DeviceAllocator for HipDevice {
    fn actual_alloc(&self, bytes: usize) -> Option<DevicePtr> {
        let mut raw: *mut c_void = ptr::null_mut();
        let result = unsafe { hipMalloc(&mut raw, bytes) };

        if result == HIP_ERROR_OUT_OF_MEMORY {
            // Pressure is an expected outcome; the escalation ladder reacts
            tracing::trace!("hipMalloc({} bytes) out of memory", bytes);
            return None;
        }
        if result != HIP_SUCCESS {
            tracing::error!("hipMalloc({} bytes) failed with code {}", bytes, result);
            return None;
        }

        DevicePtr::new(raw)
    }

    fn actual_free(&self, ptr: DevicePtr) {
        let result = unsafe { hipFree(ptr.as_ptr()) };
        if result != HIP_SUCCESS {
            // Infallible by contract; a failure here is a driver-level fault
            // the pool cannot recover from.
            tracing::error!("hipFree({:?}) failed with code {}", ptr, result);
        }
    }
}
