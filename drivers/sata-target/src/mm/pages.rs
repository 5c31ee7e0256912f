//! Page Block Allocation
//!
//! The target never touches a physical page allocator directly. It asks a
//! [`PageAllocator`] for power-of-two blocks of pages, marks every page it
//! keeps as reserved, and hands each block back exactly once at teardown.
//!
//! [`HeapPageAllocator`] is a software provider on top of the global
//! allocator. Heap addresses stand in for physical addresses (identity
//! mapping), which is what a hosted build and the unit tests run on.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::{BTreeMap, BTreeSet};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::{PAGE_SHIFT, PAGE_SIZE};

/// Highest address reachable by 32-bit DMA
pub const DMA32_LIMIT: u64 = 1 << 32;

/// Memory pool a block is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPool {
    /// Any memory (64-bit DMA or IOMMU)
    Normal,
    /// Memory below 4GB only
    Dma32,
}

/// A block of `2^order` physically contiguous pages
///
/// Owning a `PageBlock` is owning the pages. It is deliberately neither
/// `Clone` nor `Copy`: the only way to give the pages back is to move the
/// block into [`PageAllocator::free_pages`].
#[derive(Debug, PartialEq, Eq)]
pub struct PageBlock {
    pfn: u64,
    order: u8,
}

impl PageBlock {
    /// Wrap a block starting at page frame `pfn`
    ///
    /// Only page allocators should build blocks.
    pub fn new(pfn: u64, order: u8) -> Self {
        Self { pfn, order }
    }

    /// First page frame number
    pub fn pfn(&self) -> u64 {
        self.pfn
    }

    /// Block order
    pub fn order(&self) -> u8 {
        self.order
    }

    /// Number of pages in the block
    pub fn pages(&self) -> u64 {
        1 << self.order
    }

    /// Size of the block in bytes
    pub fn len(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// Physical address of the first page
    pub fn phys_addr(&self) -> u64 {
        self.pfn << PAGE_SHIFT
    }

    /// Page frames covered by the block
    pub fn pfns(&self) -> core::ops::Range<u64> {
        self.pfn..self.pfn + self.pages()
    }
}

/// Page allocator interface
pub trait PageAllocator {
    /// Total memory in the system, in pages
    fn total_pages(&self) -> u64;

    /// Allocate `2^order` contiguous pages from `pool`
    fn alloc_pages(&self, pool: MemoryPool, order: u8) -> Option<PageBlock>;

    /// Return a block obtained from [`alloc_pages`](Self::alloc_pages)
    fn free_pages(&self, block: PageBlock);

    /// Mark a page as reserved (not swappable, not reclaimable)
    fn set_reserved(&self, pfn: u64);

    /// Clear the reserved mark set by [`set_reserved`](Self::set_reserved)
    fn clear_reserved(&self, pfn: u64);
}

impl<T: PageAllocator + ?Sized> PageAllocator for &T {
    fn total_pages(&self) -> u64 {
        (**self).total_pages()
    }

    fn alloc_pages(&self, pool: MemoryPool, order: u8) -> Option<PageBlock> {
        (**self).alloc_pages(pool, order)
    }

    fn free_pages(&self, block: PageBlock) {
        (**self).free_pages(block)
    }

    fn set_reserved(&self, pfn: u64) {
        (**self).set_reserved(pfn)
    }

    fn clear_reserved(&self, pfn: u64) {
        (**self).clear_reserved(pfn)
    }
}

// ============================================================================
// Heap-backed allocator
// ============================================================================

/// Page allocator backed by the global heap
///
/// Tracks every live block and every reserved page, and treats a double
/// free or the release of a still-reserved page as a bug.
pub struct HeapPageAllocator {
    /// Reported system memory, in pages
    total_pages: u64,
    /// Optional cap on pages outstanding at once
    limit: Option<u64>,
    /// Pages currently handed out
    outstanding: AtomicU64,
    /// Live blocks: first pfn -> order
    live: Mutex<BTreeMap<u64, u8>>,
    /// Pages currently marked reserved
    reserved: Mutex<BTreeSet<u64>>,
}

impl HeapPageAllocator {
    /// Allocator reporting `total_bytes` of system memory
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_pages: total_bytes >> PAGE_SHIFT,
            limit: None,
            outstanding: AtomicU64::new(0),
            live: Mutex::new(BTreeMap::new()),
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    /// Fail allocations that would push outstanding pages past `pages`
    pub fn with_limit(mut self, pages: u64) -> Self {
        self.limit = Some(pages);
        self
    }

    /// Pages currently handed out
    pub fn outstanding_pages(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Pages currently marked reserved
    pub fn reserved_pages(&self) -> u64 {
        self.reserved.lock().len() as u64
    }

    /// Blocks currently handed out
    pub fn live_blocks(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether page frame `pfn` is marked reserved
    pub fn is_reserved(&self, pfn: u64) -> bool {
        self.reserved.lock().contains(&pfn)
    }

    fn layout(order: u8) -> Option<Layout> {
        Layout::from_size_align(PAGE_SIZE << order, PAGE_SIZE).ok()
    }

    fn charge(&self, pages: u64) -> bool {
        self.outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let next = current + pages;
                match self.limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .is_ok()
    }

    fn uncharge(&self, pages: u64) {
        self.outstanding.fetch_sub(pages, Ordering::SeqCst);
    }
}

impl PageAllocator for HeapPageAllocator {
    fn total_pages(&self) -> u64 {
        self.total_pages
    }

    fn alloc_pages(&self, pool: MemoryPool, order: u8) -> Option<PageBlock> {
        let pages = 1u64 << order;
        let layout = Self::layout(order)?;
        if !self.charge(pages) {
            return None;
        }

        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            self.uncharge(pages);
            return None;
        }

        let addr = ptr as usize as u64;
        if pool == MemoryPool::Dma32 && addr + layout.size() as u64 > DMA32_LIMIT {
            unsafe { dealloc(ptr, layout) };
            self.uncharge(pages);
            return None;
        }

        let pfn = addr >> PAGE_SHIFT;
        self.live.lock().insert(pfn, order);
        Some(PageBlock::new(pfn, order))
    }

    fn free_pages(&self, block: PageBlock) {
        let order = match self.live.lock().remove(&block.pfn) {
            Some(order) => order,
            None => panic!("free of unknown page block at pfn {:#x}", block.pfn),
        };
        assert_eq!(order, block.order, "page block freed with the wrong order");

        if let Some(pfn) = self.reserved.lock().range(block.pfns()).next() {
            panic!("freeing reserved page {:#x}", pfn);
        }

        // layout() succeeded when the block was handed out
        if let Some(layout) = Self::layout(order) {
            unsafe { dealloc(block.phys_addr() as usize as *mut u8, layout) };
        }
        self.uncharge(block.pages());
    }

    fn set_reserved(&self, pfn: u64) {
        let inserted = self.reserved.lock().insert(pfn);
        assert!(inserted, "page {:#x} already reserved", pfn);
    }

    fn clear_reserved(&self, pfn: u64) {
        let removed = self.reserved.lock().remove(&pfn);
        assert!(removed, "page {:#x} was not reserved", pfn);
    }
}
