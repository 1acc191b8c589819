//! Allocation state machine
//!
//! On a cache miss both pools walk an escalating ladder of recovery steps:
//! cheap cache checks first, then native allocation, then progressively more
//! disruptive host-side collections and cache evictions. Each attempt step
//! either produces a block (exit) or fails (advance); preparatory steps never
//! exit. The concrete sequence is data, interpreted against the pool through
//! [`LadderOps`].

use crate::device::DevicePtr;
use crate::error::PoolResult;

/// One rung of the escalation ladder
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// Attempt: pop a cached block for the request
    CachePop,
    /// Attempt: call the native allocator
    NativeAlloc,
    /// Preparatory: trigger a host collection (lock released), then drain
    /// the deferred-free queue so the next cache check can see the results
    Collect { full: bool },
    /// Preparatory: evict cached memory. `sized` limits the eviction to the
    /// request size; `full` marks every cached block reclaimable.
    Reclaim { sized: bool, full: bool },
}

/// The binned pool's eight-step ladder: pop, native alloc, incremental
/// collection + pop, sized reclaim + native, full collection + pop, sized
/// reclaim + native, reclaim-everything + native.
pub(crate) const BINNED_LADDER: &[Step] = &[
    Step::CachePop,
    Step::NativeAlloc,
    Step::Collect { full: false },
    Step::CachePop,
    Step::Reclaim { sized: true, full: false },
    Step::NativeAlloc,
    Step::Collect { full: true },
    Step::CachePop,
    Step::Reclaim { sized: true, full: false },
    Step::NativeAlloc,
    Step::Reclaim { sized: false, full: true },
    Step::NativeAlloc,
];

/// The simple pool's three phases of (scan, native alloc, reclaim-then-
/// alloc); phase two is preceded by an incremental collection, phase three
/// by a full one.
pub(crate) const SIMPLE_LADDER: &[Step] = &[
    Step::CachePop,
    Step::NativeAlloc,
    Step::Reclaim { sized: true, full: false },
    Step::NativeAlloc,
    Step::Collect { full: false },
    Step::CachePop,
    Step::NativeAlloc,
    Step::Reclaim { sized: true, full: false },
    Step::NativeAlloc,
    Step::Collect { full: true },
    Step::CachePop,
    Step::NativeAlloc,
    Step::Reclaim { sized: true, full: false },
    Step::NativeAlloc,
];

/// Pool-side hooks the ladder drives.
///
/// Attempt hooks return the handed-out pointer on success; the implementor
/// performs its own bookkeeping (checkout, registry insertion) before
/// returning. Preparatory hooks must release the pool lock around any host
/// collection they trigger.
pub(crate) trait LadderOps {
    fn cache_pop(&self) -> PoolResult<Option<DevicePtr>>;
    fn native_alloc(&self) -> PoolResult<Option<DevicePtr>>;
    fn collect_and_drain(&self, full: bool) -> PoolResult<()>;
    fn reclaim_step(&self, sized: bool, full: bool) -> PoolResult<()>;
}

/// Walk the ladder until an attempt step produces a block or the steps run
/// out.
pub(crate) fn run<O: LadderOps>(ops: &O, steps: &[Step]) -> PoolResult<Option<DevicePtr>> {
    for step in steps {
        match *step {
            Step::CachePop => {
                if let Some(ptr) = ops.cache_pop()? {
                    return Ok(Some(ptr));
                }
            }
            Step::NativeAlloc => {
                if let Some(ptr) = ops.native_alloc()? {
                    return Ok(Some(ptr));
                }
            }
            Step::Collect { full } => ops.collect_and_drain(full)?,
            Step::Reclaim { sized, full } => ops.reclaim_step(sized, full)?,
        }
    }
    Ok(None)
}
