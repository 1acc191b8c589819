//! Device-memory pooling
//!
//! Two policies share one contract: [`BinnedPool`] (power-of-two size
//! classes, usage-history tracking, background reclamation) and
//! [`SimplePool`] (single free set, bounded-oversize matching). The policy
//! is selected once at process initialization; callers interact through
//! [`DevicePool`] or the process-global functions below.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

mod block;
pub mod binned;
mod freed;
mod ladder;
mod registry;
pub mod simple;

pub use binned::BinnedPool;
pub use block::{pool_index, pool_size};
pub use simple::SimplePool;

use crate::config::{PoolConfig, PoolPolicy};
use crate::device::{DeviceAllocator, DevicePtr, HostCollector};
use crate::error::{PoolError, PoolResult};

/// Common capability set of both pool policies
pub trait DevicePool: Send + Sync {
    /// Allocate at least `bytes` bytes; `Ok(None)` on exhaustion
    fn alloc(&self, bytes: usize) -> PoolResult<Option<DevicePtr>>;
    /// Return a pointer obtained from `alloc`. Exactly once per pointer.
    fn free(&self, ptr: DevicePtr) -> PoolResult<()>;
    /// Bytes currently handed to callers
    fn used_memory(&self) -> PoolResult<usize>;
    /// Bytes resident in the caches
    fn cached_memory(&self) -> PoolResult<usize>;
    /// Evict cached memory; returns bytes returned to the native allocator
    fn reclaim(&self, target_bytes: Option<usize>, full: bool) -> PoolResult<usize>;
    /// Counter snapshot
    fn stats(&self) -> PoolResult<PoolStats>;
}

impl DevicePool for BinnedPool {
    fn alloc(&self, bytes: usize) -> PoolResult<Option<DevicePtr>> {
        BinnedPool::alloc(self, bytes)
    }
    fn free(&self, ptr: DevicePtr) -> PoolResult<()> {
        BinnedPool::free(self, ptr)
    }
    fn used_memory(&self) -> PoolResult<usize> {
        BinnedPool::used_memory(self)
    }
    fn cached_memory(&self) -> PoolResult<usize> {
        BinnedPool::cached_memory(self)
    }
    fn reclaim(&self, target_bytes: Option<usize>, full: bool) -> PoolResult<usize> {
        BinnedPool::reclaim(self, target_bytes, full)
    }
    fn stats(&self) -> PoolResult<PoolStats> {
        BinnedPool::stats(self)
    }
}

impl DevicePool for SimplePool {
    fn alloc(&self, bytes: usize) -> PoolResult<Option<DevicePtr>> {
        SimplePool::alloc(self, bytes)
    }
    fn free(&self, ptr: DevicePtr) -> PoolResult<()> {
        SimplePool::free(self, ptr)
    }
    fn used_memory(&self) -> PoolResult<usize> {
        SimplePool::used_memory(self)
    }
    fn cached_memory(&self) -> PoolResult<usize> {
        SimplePool::cached_memory(self)
    }
    fn reclaim(&self, target_bytes: Option<usize>, _full: bool) -> PoolResult<usize> {
        // The simple pool has one mode: drain until the target is met
        SimplePool::reclaim(self, target_bytes)
    }
    fn stats(&self) -> PoolResult<PoolStats> {
        SimplePool::stats(self)
    }
}

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Total `alloc` calls
    pub total_allocs: u64,
    /// Allocations served from the cache
    pub cache_hits: u64,
    /// Calls into the native allocator that succeeded
    pub native_allocs: u64,
    /// Blocks returned to the native allocator
    pub native_frees: u64,
    /// Bytes currently handed to callers
    pub used_bytes: usize,
    /// Bytes resident in the caches
    pub cached_bytes: usize,
    /// Bytes in oversize allocations bypassing the bins
    pub bypass_bytes: usize,
    /// Pointers currently tracked in the handle registry
    pub outstanding_allocs: usize,
    /// Blocks staged in the deferred-free queue, awaiting a drain
    pub deferred_blocks: usize,
}

/// Lock-free counters shared by both policies
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub total_allocs: AtomicU64,
    pub cache_hits: AtomicU64,
    pub native_allocs: AtomicU64,
    pub native_frees: AtomicU64,
    pub bypass_bytes: AtomicUsize,
}

/// Lock-derived gauges folded into a [`PoolStats`] snapshot
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StateGauges {
    pub used_bytes: usize,
    pub cached_bytes: usize,
    pub outstanding_allocs: usize,
    pub deferred_blocks: usize,
}

impl StatCounters {
    pub fn snapshot(&self, gauges: StateGauges) -> PoolStats {
        PoolStats {
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            native_allocs: self.native_allocs.load(Ordering::Relaxed),
            native_frees: self.native_frees.load(Ordering::Relaxed),
            used_bytes: gauges.used_bytes,
            cached_bytes: gauges.cached_bytes,
            bypass_bytes: self.bypass_bytes.load(Ordering::Relaxed),
            outstanding_allocs: gauges.outstanding_allocs,
            deferred_blocks: gauges.deferred_blocks,
        }
    }
}

/// The process-global pool. Caching is a process-level resource, so one
/// pool serves the whole process once `init` has run.
static GLOBAL_POOL: OnceCell<Arc<dyn DevicePool>> = OnceCell::new();

/// Initialize the process-global pool.
///
/// Selects the policy from `config` and, for the binned policy with
/// `managed_pool` enabled, spawns the background reclaimer on the current
/// tokio runtime. Without an active runtime the pool still works as a pure
/// cache (eviction on allocation pressure only) and a warning is logged.
///
/// Call once; a second call returns [`PoolError::AlreadyInitialized`].
pub fn init(
    config: &PoolConfig,
    device: Arc<dyn DeviceAllocator>,
    collector: Arc<dyn HostCollector>,
) -> PoolResult<()> {
    let pool: Arc<dyn DevicePool> = match config.policy {
        PoolPolicy::Binned => {
            let pool = Arc::new(BinnedPool::new(device, collector));
            if config.managed_pool {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(BinnedPool::reclaimer_loop(Arc::clone(&pool)));
                    }
                    Err(_) => warn!(
                        "managed pool requested but no tokio runtime is active; \
                         background reclaimer disabled"
                    ),
                }
            }
            pool
        }
        PoolPolicy::Simple => Arc::new(SimplePool::new(device, collector)),
    };

    GLOBAL_POOL
        .set(pool)
        .map_err(|_| PoolError::AlreadyInitialized)
}

fn global() -> PoolResult<&'static Arc<dyn DevicePool>> {
    GLOBAL_POOL.get().ok_or(PoolError::Uninitialized)
}

/// Allocate from the process-global pool
pub fn alloc(bytes: usize) -> PoolResult<Option<DevicePtr>> {
    global()?.alloc(bytes)
}

/// Free into the process-global pool
pub fn free(ptr: DevicePtr) -> PoolResult<()> {
    global()?.free(ptr)
}

/// Used bytes of the process-global pool
pub fn used_memory() -> PoolResult<usize> {
    global()?.used_memory()
}

/// Cached bytes of the process-global pool
pub fn cached_memory() -> PoolResult<usize> {
    global()?.cached_memory()
}
