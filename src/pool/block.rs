//! Block record and size-class math
//!
//! A block is one native allocation: an opaque pointer plus the byte size it
//! was allocated at. Blocks are never split, merged or resized; identity is
//! the pointer alone.

use crate::config::MAX_POOL;
use crate::device::DevicePtr;

/// One native device allocation
#[derive(Clone, Copy)]
pub struct Block {
    /// Opaque device pointer returned by the native allocator
    pub ptr: DevicePtr,
    /// Size in bytes the allocation was made at
    pub size: usize,
}

impl Block {
    /// Create a new block record
    pub fn new(ptr: DevicePtr, size: usize) -> Self {
        Self { ptr, size }
    }
}

// Two blocks with the same pointer are the same block
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Block {}

impl std::hash::Hash for Block {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block({:#x}, {} bytes)", self.ptr.addr(), self.size)
    }
}

/// Map a request size to its size class: `ceil(log2(n)) + 1`, with zero-byte
/// requests mapping to class 1. Classes are indexed from 1.
#[inline]
pub fn pool_index(size: usize) -> usize {
    if size <= 1 {
        return 1;
    }
    (usize::BITS - (size - 1).leading_zeros()) as usize + 1
}

/// Canonical size of a class: `2^(pid-1)`
#[inline]
pub fn pool_size(pid: usize) -> usize {
    debug_assert!(pid >= 1);
    1 << (pid - 1)
}

/// Whether a request of this size is served from the bins.
/// Larger requests bypass the pool and are tracked only in the registry.
#[inline]
pub fn is_pooled(size: usize) -> bool {
    size <= MAX_POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_index_boundaries() {
        // Exact powers of two map to class k+1 and round-trip exactly
        assert_eq!(pool_index(1), 1);
        assert_eq!(pool_index(2), 2);
        assert_eq!(pool_index(1024), 11);
        assert_eq!(pool_size(11), 1024);

        // One past a power of two lands in the next class
        assert_eq!(pool_index(3), 3);
        assert_eq!(pool_index(1025), 12);
        assert_eq!(pool_size(12), 2048);
    }

    #[test]
    fn test_pool_index_zero() {
        // alloc(0) is well-defined: class 1, size 1
        assert_eq!(pool_index(0), 1);
        assert_eq!(pool_size(pool_index(0)), 1);
    }

    #[test]
    fn test_round_up_invariant() {
        // The class size always covers the request
        for size in [1, 2, 3, 100, 1000, 4097, 65535, MAX_POOL] {
            let pid = pool_index(size);
            assert!(pool_size(pid) >= size, "size {size}");
            if size > 1 {
                assert!(pool_size(pid) < 2 * size, "size {size}");
            }
        }
    }

    #[test]
    fn test_pooled_cutoff() {
        assert!(is_pooled(MAX_POOL));
        assert!(!is_pooled(MAX_POOL + 1));
        // MAX_POOL itself still maps to a valid class
        assert_eq!(pool_size(pool_index(MAX_POOL)), MAX_POOL);
    }

    #[test]
    fn test_block_identity_by_pointer() {
        let p1 = DevicePtr::from_addr(0x1000).unwrap();
        let p2 = DevicePtr::from_addr(0x2000).unwrap();

        // Same pointer, different recorded size: same block
        assert_eq!(Block::new(p1, 64), Block::new(p1, 128));
        assert_ne!(Block::new(p1, 64), Block::new(p2, 64));
    }

    #[test]
    fn test_block_debug_format() {
        let block = Block::new(DevicePtr::from_addr(0x1000).unwrap(), 256);
        assert_eq!(format!("{:?}", block), "Block(0x1000, 256 bytes)");
    }
}
