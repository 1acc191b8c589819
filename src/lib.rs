//! hippool - Binned device-memory pool for ROCm/HIP
//!
//! Native device allocations (`hipMalloc`/`hipFree`) are expensive, and on
//! some GPU generations high allocation churn is outright hazardous. This
//! crate amortizes that cost by caching freed device regions and serving
//! subsequent requests from the cache, with periodic usage-driven reclamation
//! to keep the resident cache from growing without bound.
//!
//! Two pool policies share one public contract:
//! - [`BinnedPool`]: one free list per power-of-two size class, usage-history
//!   tracking, and an adaptive background reclaimer task.
//! - [`SimplePool`]: a single free set with bounded-oversize matching and no
//!   background task.
//!
//! The native allocator and the host-side managed-memory collector are
//! collaborators behind the [`DeviceAllocator`] and [`HostCollector`] traits;
//! the real HIP implementation lives in `device::hip` behind the `hip`
//! cargo feature, so the crate builds and tests on machines without ROCm.

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod pool;

pub use config::{PoolConfig, PoolPolicy, MAX_POOL, USAGE_WINDOW};
pub use device::{DeviceAllocator, DevicePtr, HostCollector, NoopCollector};
pub use error::{ErrorCategory, PoolError, PoolResult};
pub use pool::{
    alloc, cached_memory, free, init, used_memory, BinnedPool, DevicePool, PoolStats, SimplePool,
};
