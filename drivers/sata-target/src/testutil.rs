//! Test doubles for the device and page allocator boundaries

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::hal::dma::{CoherentBuffer, DirectDma, DmaDevice, DmaDirection, ScatterGatherElement};
use crate::mm::pages::{HeapPageAllocator, MemoryPool, PageAllocator, PageBlock};

/// Recording DMA device
///
/// Maps like [`DirectDma`], but can be told to report a 32-bit mask, to
/// return 0 from `map_sg`, or to refuse coherent buffers.
pub struct MockDma {
    inner: DirectDma,
    dma64: AtomicBool,
    fail_map: AtomicBool,
    no_coherent: AtomicBool,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
    last_unmap_len: AtomicUsize,
}

impl MockDma {
    pub fn new() -> Self {
        Self {
            inner: DirectDma::new(true),
            dma64: AtomicBool::new(true),
            fail_map: AtomicBool::new(false),
            no_coherent: AtomicBool::new(false),
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
            last_unmap_len: AtomicUsize::new(0),
        }
    }

    pub fn set_dma64(&self, dma64: bool) {
        self.dma64.store(dma64, Ordering::SeqCst);
    }

    pub fn set_fail_map(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::SeqCst);
    }

    pub fn set_no_coherent(&self, refuse: bool) {
        self.no_coherent.store(refuse, Ordering::SeqCst);
    }

    /// Successful map calls
    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    pub fn unmaps(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }

    /// Element count handed to the last unmap
    pub fn last_unmap_len(&self) -> usize {
        self.last_unmap_len.load(Ordering::SeqCst)
    }

    /// Coherent buffers outstanding
    pub fn coherent_buffers(&self) -> u32 {
        self.inner.get_stats().common_buffers
    }
}

impl DmaDevice for MockDma {
    fn supports_dma64(&self) -> bool {
        self.dma64.load(Ordering::SeqCst)
    }

    fn alloc_coherent(&self, len: usize) -> Option<CoherentBuffer> {
        if self.no_coherent.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.alloc_coherent(len)
    }

    fn free_coherent(&self, buf: CoherentBuffer) {
        self.inner.free_coherent(buf)
    }

    fn map_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection) -> usize {
        if self.fail_map.load(Ordering::SeqCst) {
            return 0;
        }
        let mapped = self.inner.map_sg(sgl, dir);
        if mapped != 0 {
            self.maps.fetch_add(1, Ordering::SeqCst);
        }
        mapped
    }

    fn unmap_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
        self.last_unmap_len.store(sgl.len(), Ordering::SeqCst);
        self.inner.unmap_sg(sgl, dir)
    }
}

/// Allocator that refuses every order above `max_order`
pub struct OrderCapped<'a> {
    inner: &'a HeapPageAllocator,
    max_order: u8,
}

impl<'a> OrderCapped<'a> {
    pub fn new(inner: &'a HeapPageAllocator, max_order: u8) -> Self {
        Self { inner, max_order }
    }
}

impl PageAllocator for OrderCapped<'_> {
    fn total_pages(&self) -> u64 {
        self.inner.total_pages()
    }

    fn alloc_pages(&self, pool: MemoryPool, order: u8) -> Option<PageBlock> {
        if order > self.max_order {
            return None;
        }
        self.inner.alloc_pages(pool, order)
    }

    fn free_pages(&self, block: PageBlock) {
        self.inner.free_pages(block)
    }

    fn set_reserved(&self, pfn: u64) {
        self.inner.set_reserved(pfn)
    }

    fn clear_reserved(&self, pfn: u64) {
        self.inner.clear_reserved(pfn)
    }
}

/// Allocator reporting 1GB of system memory
pub fn small_allocator() -> HeapPageAllocator {
    HeapPageAllocator::new(1 << 30)
}
