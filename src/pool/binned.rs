//! Binned pool
//!
//! The primary policy: one LIFO free list per power-of-two size class.
//! Requests round up to the class size, freed blocks stage through the
//! deferred-free queue, and a background task periodically evicts the
//! fraction of each class its recent usage history shows it never touched.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use super::block::{is_pooled, pool_index, pool_size, Block};
use super::freed::FreedQueue;
use super::ladder::{self, LadderOps, BINNED_LADDER};
use super::registry::HandleRegistry;
use super::{PoolStats, StatCounters, StateGauges};
use crate::config::{INITIAL_POOL_COUNT, MAX_DELAY, MIN_DELAY, USAGE_WINDOW};
use crate::device::{DeviceAllocator, DevicePtr, HostCollector};
use crate::error::{PoolError, PoolResult};

/// Per-class bookkeeping
#[derive(Debug)]
struct ClassState {
    /// Blocks currently handed to callers
    used: HashMap<DevicePtr, Block>,
    /// Cached, unused blocks (LIFO)
    available: Vec<Block>,
    /// High-water `used / (used + available)` since the last scan cycle.
    /// An empty class counts as fully utilized.
    usage: f64,
    /// Last `USAGE_WINDOW` usage samples; lags the current cycle by one
    history: VecDeque<f64>,
}

impl ClassState {
    fn new() -> Self {
        Self {
            used: HashMap::new(),
            available: Vec::new(),
            usage: 1.0,
            history: VecDeque::from(vec![1.0; USAGE_WINDOW]),
        }
    }

    fn population(&self) -> usize {
        self.used.len() + self.available.len()
    }

    fn current_usage(&self) -> f64 {
        let total = self.population();
        if total == 0 {
            1.0
        } else {
            self.used.len() as f64 / total as f64
        }
    }

    /// Raise the high-water mark after a checkout or drain
    fn touch_usage(&mut self) {
        self.usage = self.usage.max(self.current_usage());
    }

    /// Number of blocks eligible for background eviction: the fraction of
    /// the class its whole recent window never touched.
    fn reclaimable(&self) -> usize {
        let total = self.population();
        if total == 0 {
            return 0;
        }
        let recent_max = self.history.iter().copied().fold(self.usage, f64::max);
        ((1.0 - recent_max) * total as f64).floor() as usize
    }
}

#[derive(Debug)]
struct BinnedState {
    /// Size classes, indexed by `pid - 1`
    classes: Vec<ClassState>,
    freed: FreedQueue,
    registry: HandleRegistry,
}

impl BinnedState {
    fn new() -> Self {
        let mut classes = Vec::with_capacity(INITIAL_POOL_COUNT);
        classes.resize_with(INITIAL_POOL_COUNT, ClassState::new);
        Self {
            classes,
            freed: FreedQueue::default(),
            registry: HandleRegistry::default(),
        }
    }

    /// Extend the class table so `pid` is addressable
    fn ensure_class(&mut self, pid: usize) {
        while self.classes.len() < pid {
            self.classes.push(ClassState::new());
        }
    }

    /// Drain the deferred-free queue into the classes
    fn repopulate(&mut self) {
        for block in self.freed.take() {
            let pid = pool_index(block.size);
            self.ensure_class(pid);
            let class = &mut self.classes[pid - 1];
            class.used.remove(&block.ptr);
            class.available.push(block);
            class.touch_usage();
        }
    }

    fn used_bytes(&self) -> usize {
        self.classes
            .iter()
            .enumerate()
            .map(|(idx, class)| pool_size(idx + 1) * class.used.len())
            .sum()
    }

    fn cached_bytes(&self) -> usize {
        self.classes
            .iter()
            .enumerate()
            .map(|(idx, class)| pool_size(idx + 1) * class.available.len())
            .sum()
    }
}

/// Binned device-memory pool
pub struct BinnedPool {
    device: Arc<dyn DeviceAllocator>,
    collector: Arc<dyn HostCollector>,
    state: Mutex<BinnedState>,
    counters: StatCounters,
}

impl BinnedPool {
    /// Create the pool and pre-create size classes 1..=[`INITIAL_POOL_COUNT`]
    pub fn new(device: Arc<dyn DeviceAllocator>, collector: Arc<dyn HostCollector>) -> Self {
        info!(
            "binned pool initialized: {} size classes pre-created",
            INITIAL_POOL_COUNT
        );
        Self {
            device,
            collector,
            state: Mutex::new(BinnedState::new()),
            counters: StatCounters::default(),
        }
    }

    /// Allocate at least `bytes` bytes of device memory.
    ///
    /// Requests up to [`crate::MAX_POOL`] round to the class size and are
    /// served from the bins; larger requests go straight to the native
    /// allocator and are only tracked in the registry. Returns `Ok(None)`
    /// once the escalation ladder is exhausted.
    pub fn alloc(&self, bytes: usize) -> PoolResult<Option<DevicePtr>> {
        self.counters.total_allocs.fetch_add(1, Ordering::Relaxed);
        let request = BinnedRequest::new(self, bytes);
        let result = ladder::run(&request, BINNED_LADDER)?;
        if result.is_none() {
            warn!("allocation of {} bytes failed after full escalation", bytes);
        }
        Ok(result)
    }

    /// Return a previously allocated pointer to the pool.
    ///
    /// Pooled blocks stage through the deferred-free queue; oversize blocks
    /// release natively at once. Safe to call from finalizer contexts: the
    /// lock is only held for the registry removal and queue push.
    pub fn free(&self, ptr: DevicePtr) -> PoolResult<()> {
        let direct = {
            let mut state = self.state.lock()?;
            let handle = state
                .registry
                .remove(ptr)
                .ok_or_else(|| PoolError::InvalidFree(ptr.addr()))?;
            match handle.pid {
                Some(_) => {
                    state.freed.push(handle.block);
                    None
                }
                None => Some(handle.block),
            }
        };

        if let Some(block) = direct {
            self.device.actual_free(block.ptr);
            self.counters.native_frees.fetch_add(1, Ordering::Relaxed);
            self.counters
                .bypass_bytes
                .fetch_sub(block.size, Ordering::Relaxed);
            trace!("released oversize {:?} natively", block);
        }
        Ok(())
    }

    /// Bytes currently handed to callers, at class granularity
    pub fn used_memory(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.used_bytes())
    }

    /// Bytes resident in the caches
    pub fn cached_memory(&self) -> PoolResult<usize> {
        Ok(self.state.lock()?.cached_bytes())
    }

    /// Drain the deferred-free queue into the classes, then evict cached
    /// blocks, largest class first.
    ///
    /// In full mode every cached block is reclaimable. In background mode a
    /// class may only shed the fraction its recent usage window never
    /// touched. Eviction stops once cumulative freed bytes reach
    /// `target_bytes`; with no target, everything marked reclaimable goes.
    /// Returns the number of bytes returned to the native allocator.
    pub fn reclaim(&self, target_bytes: Option<usize>, full: bool) -> PoolResult<usize> {
        let mut evicted: Vec<Block> = Vec::new();
        let mut freed_bytes = 0usize;
        {
            let mut state = self.state.lock()?;
            state.repopulate();

            let target_met =
                |freed: usize| matches!(target_bytes, Some(target) if freed >= target);

            for idx in (0..state.classes.len()).rev() {
                if target_met(freed_bytes) {
                    break;
                }
                let class = &mut state.classes[idx];
                let quota = if full {
                    class.available.len()
                } else {
                    class.reclaimable().min(class.available.len())
                };
                for _ in 0..quota {
                    if target_met(freed_bytes) {
                        break;
                    }
                    match class.available.pop() {
                        Some(block) => {
                            freed_bytes += block.size;
                            evicted.push(block);
                        }
                        None => break,
                    }
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
                "reclaimed {} bytes across {} blocks (full={})",
                freed_bytes,
                evicted.len(),
                full
            );
        }
        Ok(freed_bytes)
    }

    /// Usage-history scan, run by the background reclaimer before each
    /// background reclaim.
    ///
    /// Triggers an incremental host collection (finalizer pushes land in the
    /// deferred-free queue and are drained by the next reclaim), then rolls
    /// each populated class's high-water `usage` into its history window and
    /// resets it to the current ratio. The history therefore lags the
    /// current cycle by one sample. Returns whether any class changed.
    pub fn scan(&self) -> PoolResult<bool> {
        self.collector.collect(false);

        let mut state = self.state.lock()?;
        let mut active = false;
        for class in state.classes.iter_mut() {
            if class.population() == 0 {
                continue;
            }
            let current = class.current_usage();
            let previous = class.usage;
            class.history.pop_front();
            class.history.push_back(previous);
            if previous != current {
                active = true;
            }
            class.usage = current;
        }
        Ok(active)
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

    /// The background reclaimer loop: scan, adapt the delay (reset to
    /// [`MIN_DELAY`] on activity, exponential backoff to [`MAX_DELAY`]
    /// otherwise), background-reclaim, sleep. Runs until the process exits.
    pub async fn reclaimer_loop(pool: Arc<BinnedPool>) {
        info!("background reclaimer started");
        let mut delay = MIN_DELAY;
        loop {
            let active = match pool.scan() {
                Ok(active) => active,
                Err(err) => {
                    warn!("usage scan failed: {err}");
                    false
                }
            };
            delay = if active {
                MIN_DELAY
            } else {
                (delay * 2).min(MAX_DELAY)
            };

            if let Err(err) = pool.reclaim(None, false) {
                warn!("background reclaim failed: {err}");
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Spawn [`Self::reclaimer_loop`] on the current tokio runtime
    pub fn spawn_reclaimer(pool: &Arc<BinnedPool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Self::reclaimer_loop(Arc::clone(pool)))
    }
}

impl std::fmt::Debug for BinnedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinnedPool").finish_non_exhaustive()
    }
}

/// One allocation request walking the escalation ladder
struct BinnedRequest<'a> {
    pool: &'a BinnedPool,
    /// Size class for bin-served requests; `None` for the oversize bypass
    pid: Option<usize>,
    /// Bytes passed to the native allocator: the class size when pooled,
    /// the exact request otherwise
    alloc_size: usize,
}

impl<'a> BinnedRequest<'a> {
    fn new(pool: &'a BinnedPool, bytes: usize) -> Self {
        if is_pooled(bytes) {
            let pid = pool_index(bytes);
            Self {
                pool,
                pid: Some(pid),
                alloc_size: pool_size(pid),
            }
        } else {
            Self {
                pool,
                pid: None,
                alloc_size: bytes,
            }
        }
    }
}

impl LadderOps for BinnedRequest<'_> {
    fn cache_pop(&self) -> PoolResult<Option<DevicePtr>> {
        // Oversize requests have no bin to pop from
        let Some(pid) = self.pid else {
            return Ok(None);
        };

        let mut state = self.pool.state.lock()?;
        state.ensure_class(pid);
        let class = &mut state.classes[pid - 1];
        let Some(block) = class.available.pop() else {
            return Ok(None);
        };
        class.used.insert(block.ptr, block);
        class.touch_usage();
        state.registry.insert(block, Some(pid));

        self.pool.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        trace!("cache hit: {:?} from class {}", block, pid);
        Ok(Some(block.ptr))
    }

    fn native_alloc(&self) -> PoolResult<Option<DevicePtr>> {
        let Some(ptr) = self.pool.device.actual_alloc(self.alloc_size) else {
            return Ok(None);
        };
        let block = Block::new(ptr, self.alloc_size);

        let mut state = self.pool.state.lock()?;
        match self.pid {
            Some(pid) => {
                state.ensure_class(pid);
                let class = &mut state.classes[pid - 1];
                class.used.insert(block.ptr, block);
                class.touch_usage();
                state.registry.insert(block, Some(pid));
                trace!("native alloc: {:?} into class {}", block, pid);
            }
            None => {
                state.registry.insert(block, None);
                self.pool
                    .counters
                    .bypass_bytes
                    .fetch_add(block.size, Ordering::Relaxed);
                trace!("native alloc: {:?} bypasses the bins", block);
            }
        }

        self.pool
            .counters
            .native_allocs
            .fetch_add(1, Ordering::Relaxed);
        Ok(Some(ptr))
    }

    fn collect_and_drain(&self, full: bool) -> PoolResult<()> {
        // Host collection runs with the lock released; finalizers may call
        // free, which stages into the deferred queue we then drain.
        self.pool.collector.collect(full);
        self.pool.state.lock()?.repopulate();
        Ok(())
    }

    fn reclaim_step(&self, sized: bool, full: bool) -> PoolResult<()> {
        let target = if sized { Some(self.alloc_size) } else { None };
        self.pool.reclaim(target, full)?;
        Ok(())
    }
}
