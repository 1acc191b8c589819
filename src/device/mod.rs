//! Collaborator interfaces for the native device allocator and the
//! host-side managed-memory system
//!
//! The pool never interprets device memory; it only shuttles opaque pointers
//! between the native allocator and its caches. Both collaborators are
//! narrow `Send + Sync` traits so the pools can be exercised against mocks
//! and the real HIP backend interchangeably.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

#[cfg(feature = "hip")]
pub mod hip;

/// Opaque non-null device pointer.
///
/// Never dereferenced by this crate; it exists only as a lookup key and a
/// value to hand back to the native allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(NonNull<c_void>);

// SAFETY: DevicePtr only carries a raw device address. The crate never
// dereferences it; all shared pool state it keys into is guarded by the
// pool's mutex.
unsafe impl Send for DevicePtr {}
unsafe impl Sync for DevicePtr {}

impl DevicePtr {
    /// Wrap a raw pointer returned by the native allocator.
    /// Returns `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Construct from a raw address. Intended for allocator implementations
    /// and test doubles; the address is never dereferenced by the pool.
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut c_void).map(Self)
    }

    /// The raw pointer, for handing back to the native allocator
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// The pointer as an address
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.addr())
    }
}

/// Native device allocation primitive.
///
/// Implementations must treat memory pressure as an absent result, not a
/// panic; the pool's escalation ladder depends on observing the `None`.
pub trait DeviceAllocator: Send + Sync {
    /// Attempt a native device allocation of exactly `bytes` bytes.
    /// Returns `None` under memory pressure.
    fn actual_alloc(&self, bytes: usize) -> Option<DevicePtr>;

    /// Release a native allocation. Infallible by contract: the pool has no
    /// way to recover a failed release.
    fn actual_free(&self, ptr: DevicePtr);
}

/// Host-side managed-memory collector.
///
/// The pool requests a collection when native allocation fails, expecting
/// host finalizers to push unreferenced device blocks into the deferred-free
/// queue. Always invoked with the pool lock released.
pub trait HostCollector: Send + Sync {
    /// Request an incremental (`full = false`) or full collection.
    /// Synchronous; returns once the collection pass has finished.
    fn collect(&self, full: bool);
}

/// Collector for hosts without a managed heap. Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollector;

impl HostCollector for NoopCollector {
    fn collect(&self, _full: bool) {}
}
