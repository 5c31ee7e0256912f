//! Backing Store Allocation
//!
//! Fills the extent index with page blocks until the requested number of
//! pages is backed. Blocks are taken largest first: the order starts at the
//! configured maximum, shrinks to fit what is left, and steps down whenever
//! an allocation at the current order fails.

use log::{error, info};

use crate::error::{Result, TargetError};
use crate::hal::dma::DmaDevice;
use crate::mm::extent::{Extent, ExtentIndex};
use crate::mm::pages::{MemoryPool, PageAllocator};
use crate::mm::MAX_ORDER;

/// Blocks obtained per order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackingStats {
    /// Pages backing the target
    pub pages: u64,
    /// Number of blocks allocated at each order
    pub blocks: [u64; MAX_ORDER as usize + 1],
}

impl BackingStats {
    /// Total number of blocks
    pub fn total_blocks(&self) -> u64 {
        self.blocks.iter().sum()
    }

    /// Largest order that was allocated
    pub fn largest_order(&self) -> Option<u8> {
        self.blocks.iter().rposition(|&n| n != 0).map(|o| o as u8)
    }
}

/// Check that `nr_pages` leaves `reserve_pages` of system memory free
pub fn size_ok(total_pages: u64, nr_pages: u64, reserve_pages: u64) -> bool {
    if total_pages < reserve_pages {
        return false;
    }
    nr_pages <= total_pages - reserve_pages
}

/// Whether the device can reach all of memory
///
/// A 64-bit DMA mask or an IOMMU both lift the 32-bit restriction.
pub fn dma64_ok<D: DmaDevice + ?Sized>(device: &D, assume_iommu: bool) -> bool {
    device.supports_dma64() || assume_iommu
}

/// Pool to allocate backing pages from
pub fn memory_pool(dma64: bool) -> MemoryPool {
    if dma64 {
        info!("sata_target: using full 64-bit memory");
        MemoryPool::Normal
    } else {
        info!("sata_target: using low 32-bit memory");
        MemoryPool::Dma32
    }
}

/// Allocate `nr_pages` of backing and register it in `index`
///
/// Each block is marked reserved page by page and becomes one extent at
/// the running sector offset. On failure the blocks already inserted stay
/// in `index`; the caller releases them with [`ExtentIndex::prune`].
pub fn alloc_backing<A: PageAllocator + ?Sized>(
    index: &mut ExtentIndex,
    allocator: &A,
    pool: MemoryPool,
    nr_pages: u64,
    max_order: u8,
) -> Result<BackingStats> {
    let mut stats = BackingStats::default();
    let mut order = max_order.min(MAX_ORDER);
    let mut offset = index.covered_sectors();
    let mut left = nr_pages;

    while left != 0 {
        // Make sure we don't alloc too much, scale order down
        while (1u64 << order) > left {
            order -= 1;
        }

        // Alloc pages and/or adjust order on failure
        let pages = loop {
            if let Some(pages) = allocator.alloc_pages(pool, order) {
                break pages;
            }
            if order == 0 {
                error!(
                    "sata_target: OOM. Got {} of {} pages",
                    nr_pages - left,
                    nr_pages
                );
                return Err(TargetError::OutOfMemory {
                    got: nr_pages - left,
                    wanted: nr_pages,
                });
            }
            order -= 1;
        };

        for pfn in pages.pfns() {
            allocator.set_reserved(pfn);
        }

        stats.blocks[order as usize] += 1;
        stats.pages += pages.pages();
        left -= pages.pages();

        let extent = Extent::new(pages, offset);
        offset = extent.end();
        index.insert(extent);
    }

    info!("sata_target: {} backing pages:", nr_pages);
    for (order, &count) in stats.blocks.iter().enumerate().rev() {
        if count != 0 {
            info!("  order{}: {} blocks", order, count);
        }
    }

    Ok(stats)
}
