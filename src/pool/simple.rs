//! Simple pool
//!
//! The alternate policy: a single free set with bounded-oversize matching.
//! Accepts a little internal waste to maximize reuse on workloads with
//! irregular sizes, and carries no background task; eviction happens only
//! under allocation pressure or an explicit reclaim.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use super::block::Block;
use super::freed::FreedQueue;
use super::ladder::{self, LadderOps, SIMPLE_LADDER};
use super::registry::HandleRegistry;
use super::{PoolStats, StatCounters, StateGauges};
use crate::device::{DeviceAllocator, DevicePtr, HostCollector};
use crate::error::{PoolError, PoolResult};

/// Requests at or below 1 MiB accept any larger cached block
const SMALL_REQUEST: usize = 1 << 20;
/// Requests at or below 32 MiB accept up to 1 MiB of oversize
const MEDIUM_REQUEST: usize = 1 << 25;
/// Oversize allowance for medium requests (1 MiB)
const MEDIUM_SLACK: usize = 1 << 20;
/// Oversize allowance for large requests (4 MiB)
const LARGE_SLACK: usize = 1 << 22;

/// Maximum acceptable oversize for a request of `size` bytes.
/// `None` means unbounded.
fn max_oversize(size: usize) -> Option<usize> {
    if size <= SMALL_REQUEST {
        None
    } else if size <= MEDIUM_REQUEST {
        Some(MEDIUM_SLACK)
    } else {
        Some(LARGE_SLACK)
    }
}

/// Whether a cached block of `cached` bytes can satisfy a request of
/// `requested` bytes
fn satisfies(requested: usize, cached: usize) -> bool {
    cached >= requested
        && match max_oversize(requested) {
            Some(slack) => cached <= requested.saturating_add(slack),
            None => true,
        }
}

#[derive(Debug, Default)]
struct SimpleState {
    /// Cached, unused blocks; sizes span the full request range
    available: Vec<Block>,
    freed: FreedQueue,
    registry: HandleRegistry,
}

impl SimpleState {
    /// Drain the deferred-free queue into the cache
    fn repopulate(&mut self) {
        for block in self.freed.take() {
            self.available.push(block);
        }
    }

    fn used_bytes(&self) -> usize {
        self.registry.iter().map(|handle| handle.block.size).sum()
    }

    fn cached_bytes(&self) -> usize {
        self.available.iter().map(|block| block.size).sum()
    }
}

/// Single-bin device-memory pool with bounded-oversize matching
pub struct SimplePool {
    device: Arc<dyn DeviceAllocator>,
    collector: Arc<dyn HostCollector>,
    state: Mutex<SimpleState>,
    counters: StatCounters,
}

impl SimplePool {
    /// Create an empty pool
    pub fn new(device: Arc<dyn DeviceAllocator>, collector: Arc<dyn HostCollector>) -> Self {
        info!("simple pool initialized");
        Self {
            device,
            collector,
            state: Mutex::new(SimpleState::default()),
            counters: StatCounters::default(),
        }
    }

    /// Allocate at least `bytes` bytes of device memory.
    /// Returns `Ok(None)` once the three-phase ladder is exhausted.
    pub fn alloc(&self, bytes: usize) -> PoolResult<Option<DevicePtr>> {
        self.counters.total_allocs.fetch_add(1, Ordering::Relaxed);
        let request = SimpleRequest { pool: self, bytes };
        let result = ladder::run(&request, SIMPLE_LADDER)?;
        if result.is_none() {
            warn!("allocation of {} bytes failed after full escalation", bytes);
        }
        Ok(result)
    }

    /// Return a previously allocated pointer to the pool. Every block
    /// stages through the deferred-free queue.
    pub fn free(&self, ptr: DevicePtr) -> PoolResult<()> {
        let mut state = self.state.lock()?;
        let handle = state
            .registry
            .remove(ptr)
            .ok_or_else(|| PoolError::InvalidFree(ptr.addr()))?;
        state.freed.push(handle.block);
        trace!("staged {:?} for reuse", handle.block);
        Ok(())
    }

    /// Bytes currently handed to callers
    pub fn used_memory(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.used_bytes())
    }

    /// Bytes resident in the cache
    pub fn cached_memory(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.cached_bytes())
    }

    /// Drain the deferred-free queue into the cache, then evict blocks in
    /// arbitrary order until `target_bytes` is met or the cache is empty.
    /// Returns the number of bytes returned to the native allocator.
    pub fn reclaim(&self, target_bytes: Option<usize>) -> PoolResult<usize> {
        let mut evicted: Vec<Block> = Vec::new();
        let mut freed_bytes = 0usize;
        {
            let mut state = self.state.lock()?;
            state.repopulate();

            // With no target set, drain the whole cache
            loop {
                if matches!(target_bytes, Some(target) if freed_bytes >= target) {
                    break;
                }
                match state.available.pop() {
                    Some(block) => {
                        freed_bytes += block.size;
                        evicted.push(block);
                    }
                    None => break,
                }
            }
        }

        // Native releases happen with the lock dropped
        for block in &evicted {
            self.device.actual_free(block.ptr);
        }
        self.counters
            .native_frees
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        if freed_bytes > 0 {
            debug!(
                "reclaimed {} bytes across {} blocks",
                freed_bytes,
                evicted.len()
            );
        }
        Ok(freed_bytes)
    }

    /// Counter snapshot plus the current byte totals and queue depths
    pub fn stats(&self) -> PoolResult<PoolStats> {
        let gauges = {
            let state = self.state.lock()?;
            StateGauges {
                used_bytes: state.used_bytes(),
                cached_bytes: state.cached_bytes(),
                outstanding_allocs: state.registry.len(),
                deferred_blocks: state.freed.len(),
            }
        };
        Ok(self.counters.snapshot(gauges))
    }
}

impl std::fmt::Debug for SimplePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimplePool").finish_non_exhaustive()
    }
}

/// One allocation request walking the three-phase ladder
struct SimpleRequest<'a> {
    pool: &'a SimplePool,
    bytes: usize,
}

impl LadderOps for SimpleRequest<'_> {
    fn cache_pop(&self) -> PoolResult<Option<DevicePtr>> {
        let mut state = self.pool.state.lock()?;
        // First match wins; oversize waste is bounded per tier so scan
        // order does not matter
        let Some(idx) = state
            .available
            .iter()
            .position(|block| satisfies(self.bytes, block.size))
        else {
            return Ok(None);
        };
        let block = state.available.swap_remove(idx);
        state.registry.insert(block, None);

        self.pool.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        trace!("cache hit: {:?} for {} bytes", block, self.bytes);
        Ok(Some(block.ptr))
    }

    fn native_alloc(&self) -> PoolResult<Option<DevicePtr>> {
        let Some(ptr) = self.pool.device.actual_alloc(self.bytes) else {
            return Ok(None);
        };
        let block = Block::new(ptr, self.bytes);

        let mut state = self.pool.state.lock()?;
        state.registry.insert(block, None);
        self.pool
            .counters
            .native_allocs
            .fetch_add(1, Ordering::Relaxed);
        trace!("native alloc: {:?}", block);
        Ok(Some(ptr))
    }

    fn collect_and_drain(&self, full: bool) -> PoolResult<()> {
        self.pool.collector.collect(full);
        self.pool.state.lock()?.repopulate();
        Ok(())
    }

    fn reclaim_step(&self, sized: bool, _full: bool) -> PoolResult<()> {
        let target = if sized { Some(self.bytes) } else { None };
        self.pool.reclaim(target)?;
        Ok(())
    }
}
