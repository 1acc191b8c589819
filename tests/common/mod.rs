//! Shared test doubles for the pool's collaborators
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hippool::{DeviceAllocator, DevicePtr, HostCollector};

/// Native allocator double: hands out unique fake addresses, tracks live
/// allocations by byte size, and can simulate memory pressure.
pub struct MockDevice {
    next: AtomicUsize,
    live: Mutex<HashMap<usize, usize>>,
    alloc_calls: AtomicUsize,
    free_calls: AtomicUsize,
    last_alloc_size: AtomicUsize,
    exhausted: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicUsize::new(0x10_0000),
            live: Mutex::new(HashMap::new()),
            alloc_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
            last_alloc_size: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
        })
    }

    /// Simulate (or lift) allocator exhaustion
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::Relaxed);
    }

    /// Total `actual_alloc` invocations, including failed ones
    pub fn alloc_calls(&self) -> usize {
        self.alloc_calls.load(Ordering::Relaxed)
    }

    /// Total `actual_free` invocations
    pub fn free_calls(&self) -> usize {
        self.free_calls.load(Ordering::Relaxed)
    }

    /// Byte size of the most recent successful allocation
    pub fn last_alloc_size(&self) -> usize {
        self.last_alloc_size.load(Ordering::Relaxed)
    }

    /// Sum of bytes in allocations not yet released
    pub fn live_bytes(&self) -> usize {
        self.live.lock().unwrap().values().sum()
    }

    /// Number of allocations not yet released
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl DeviceAllocator for MockDevice {
    fn actual_alloc(&self, bytes: usize) -> Option<DevicePtr> {
        self.alloc_calls.fetch_add(1, Ordering::Relaxed);
        if self.exhausted.load(Ordering::Relaxed) {
            return None;
        }
        let addr = self.next.fetch_add(0x1000, Ordering::Relaxed);
        self.live.lock().unwrap().insert(addr, bytes);
        self.last_alloc_size.store(bytes, Ordering::Relaxed);
        DevicePtr::from_addr(addr)
    }

    fn actual_free(&self, ptr: DevicePtr) {
        self.free_calls.fetch_add(1, Ordering::Relaxed);
        let removed = self.live.lock().unwrap().remove(&ptr.addr());
        assert!(removed.is_some(), "released untracked pointer {:?}", ptr);
    }
}

type CollectHook = Box<dyn Fn(bool) + Send + Sync>;

/// Managed-heap double: counts collection requests and can run a hook to
/// model finalizers freeing device memory during a collection pass.
#[derive(Default)]
pub struct MockCollector {
    incremental: AtomicUsize,
    full: AtomicUsize,
    hook: Mutex<Option<CollectHook>>,
}

impl MockCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install a callback invoked on every collection pass
    pub fn set_hook(&self, hook: impl Fn(bool) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn incremental_calls(&self) -> usize {
        self.incremental.load(Ordering::Relaxed)
    }

    pub fn full_calls(&self) -> usize {
        self.full.load(Ordering::Relaxed)
    }
}

impl HostCollector for MockCollector {
    fn collect(&self, full: bool) {
        if full {
            self.full.fetch_add(1, Ordering::Relaxed);
        } else {
            self.incremental.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(full);
        }
    }
}
