//! Handle registry
//!
//! Maps each outstanding pointer to its owning block record so `free` can be
//! called with the pointer alone. Populated on successful `alloc`, consulted
//! and emptied on `free`. Guarded by the pool lock.

use std::collections::HashMap;

use super::block::Block;
use crate::device::DevicePtr;

/// Registry entry for one outstanding allocation
#[derive(Debug, Clone, Copy)]
pub(crate) struct Handle {
    /// The owning block
    pub block: Block,
    /// Size class for bin-managed blocks; `None` when the owning pool does
    /// not bin the block (the simple pool, or the binned pool's oversize
    /// bypass, which frees natively instead of staging)
    pub pid: Option<usize>,
}

/// Pointer-to-block mapping for outstanding allocations
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    handles: HashMap<DevicePtr, Handle>,
}

impl HandleRegistry {
    /// Register a freshly handed-out block
    pub fn insert(&mut self, block: Block, pid: Option<usize>) {
        self.handles.insert(block.ptr, Handle { block, pid });
    }

    /// Remove and return the handle for a pointer, if tracked
    pub fn remove(&mut self, ptr: DevicePtr) -> Option<Handle> {
        self.handles.remove(&ptr)
    }

    /// Number of outstanding allocations, reported through pool stats
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Iterate over outstanding handles
    pub fn iter(&self) -> impl Iterator<Item = &Handle> {
        self.handles.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(addr: usize, size: usize) -> Block {
        Block::new(DevicePtr::from_addr(addr).unwrap(), size)
    }

    #[test]
    fn test_insert_remove() {
        let mut registry = HandleRegistry::default();
        let b = block(0x1000, 1024);

        registry.insert(b, Some(11));
        assert_eq!(registry.len(), 1);

        let handle = registry.remove(b.ptr).unwrap();
        assert_eq!(handle.block, b);
        assert_eq!(handle.pid, Some(11));
        assert_eq!(registry.len(), 0);

        // Once removed, the pointer is no longer tracked
        assert!(registry.remove(b.ptr).is_none());
    }

    #[test]
    fn test_remove_unknown_pointer() {
        let mut registry = HandleRegistry::default();
        let ptr = DevicePtr::from_addr(0x1000).unwrap();
        assert!(registry.remove(ptr).is_none());
    }

    #[test]
    fn test_bypass_handle_has_no_class() {
        let mut registry = HandleRegistry::default();
        let b = block(0x2000, 200 * 1024 * 1024);

        registry.insert(b, None);
        let handle = registry.remove(b.ptr).unwrap();
        assert_eq!(handle.pid, None);
    }
}
