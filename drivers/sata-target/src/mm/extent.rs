//! Page Extents
//!
//! An extent binds one page block to the run of logical sectors it backs.
//! The index keeps extents ordered by first sector and answers "which
//! extent holds sector N". It is only modified while the target is being
//! built or torn down, so lookups need no locking.

use alloc::collections::btree_map::{self, BTreeMap};

use super::pages::{PageAllocator, PageBlock};
use super::{PAGE_SECTORS, PAGE_SHIFT, SECTOR_SHIFT};

/// A page block mapped to a contiguous sector range
#[derive(Debug)]
pub struct Extent {
    /// Backing pages
    pages: PageBlock,
    /// First sector backed by this extent
    sector: u64,
    /// Number of sectors backed
    sectors: u64,
}

impl Extent {
    /// Bind `pages` to the sectors starting at `sector`
    pub fn new(pages: PageBlock, sector: u64) -> Self {
        let sectors = pages.pages() * PAGE_SECTORS;
        Self {
            pages,
            sector,
            sectors,
        }
    }

    /// First sector
    pub fn sector(&self) -> u64 {
        self.sector
    }

    /// Sector span
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    /// One past the last sector
    pub fn end(&self) -> u64 {
        self.sector + self.sectors
    }

    /// Backing block
    pub fn pages(&self) -> &PageBlock {
        &self.pages
    }

    /// Whether `sector` falls inside this extent
    #[inline]
    pub fn contains(&self, sector: u64) -> bool {
        sector >= self.sector && sector < self.end()
    }

    /// Whether the two sector ranges share any sector
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.sector < other.end() && other.sector < self.end()
    }

    /// Page frame and in-page byte offset of `sector`
    ///
    /// `sector` must lie inside the extent.
    pub fn locate(&self, sector: u64) -> (u64, u32) {
        debug_assert!(self.contains(sector));
        let off = (sector - self.sector) << SECTOR_SHIFT;
        let page = off >> PAGE_SHIFT;
        let page_off = off & ((1 << PAGE_SHIFT) - 1);
        (page, page_off as u32)
    }

    fn into_pages(self) -> PageBlock {
        self.pages
    }
}

/// Ordered sector-range index of extents
#[derive(Debug, Default)]
pub struct ExtentIndex {
    /// First sector -> extent
    map: BTreeMap<u64, Extent>,
}

impl ExtentIndex {
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert an extent
    ///
    /// Extents are disjoint by construction; an overlap means the caller's
    /// offset bookkeeping is broken and is treated as a bug.
    pub fn insert(&mut self, extent: Extent) {
        if let Some((_, prev)) = self.map.range(..=extent.sector).next_back() {
            if prev.overlaps(&extent) {
                panic!(
                    "extent [{}, {}) overlaps [{}, {})",
                    extent.sector,
                    extent.end(),
                    prev.sector,
                    prev.end()
                );
            }
        }
        if let Some((_, next)) = self.map.range(extent.sector..).next() {
            if next.overlaps(&extent) {
                panic!(
                    "extent [{}, {}) overlaps [{}, {})",
                    extent.sector,
                    extent.end(),
                    next.sector,
                    next.end()
                );
            }
        }
        self.map.insert(extent.sector, extent);
    }

    /// Find the extent holding `sector`
    pub fn find(&self, sector: u64) -> Option<&Extent> {
        self.map
            .range(..=sector)
            .next_back()
            .map(|(_, extent)| extent)
            .filter(|extent| extent.contains(sector))
    }

    /// Remove every extent and give its pages back
    ///
    /// Reserved marks are cleared before each block is freed. Pruning an
    /// empty index does nothing, so teardown may run on a partially built
    /// target or more than once.
    pub fn prune<A: PageAllocator + ?Sized>(&mut self, allocator: &A) -> u64 {
        let mut freed = 0;
        while let Some((_, extent)) = self.map.pop_first() {
            let pages = extent.into_pages();
            for pfn in pages.pfns() {
                allocator.clear_reserved(pfn);
            }
            freed += pages.pages();
            allocator.free_pages(pages);
        }
        freed
    }

    /// Number of extents
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Extents in sector order
    pub fn iter(&self) -> btree_map::Values<'_, u64, Extent> {
        self.map.values()
    }

    /// Total sectors backed
    pub fn covered_sectors(&self) -> u64 {
        self.map.values().map(Extent::sectors).sum()
    }

    /// Whether the extents tile `[0, covered_sectors())` without gaps
    pub fn is_contiguous(&self) -> bool {
        let mut next = 0;
        for extent in self.map.values() {
            if extent.sector != next {
                return false;
            }
            next = extent.end();
        }
        true
    }
}
