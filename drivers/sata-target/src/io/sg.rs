//! Per-tag scatter/gather lists
//!
//! Every tag owns a fixed table of `max_segments` elements. A command fills
//! the table from the extent index, maps it through the device, and gives
//! it back with an unmap once the transfer is done:
//!
//! ```text
//!  UNMAPPED ──build+map──► MAPPED ──unmap──► UNMAPPED
//! ```
//!
//! A failed build or map leaves the tag unmapped.

use alloc::boxed::Box;
use alloc::vec;

use log::error;

use super::translate::{page_sectors_left, sector_to_page, SectorCursor};
use crate::error::{Result, TargetError};
use crate::hal::dma::{DmaDevice, DmaDirection, ScatterGatherElement};
use crate::mm::extent::ExtentIndex;
use crate::mm::{PAGE_SHIFT, SECTOR_SHIFT};

/// Scatter/gather state of one tag
#[derive(Debug)]
pub struct TagSlot {
    /// Element table, `max_segments` long
    sgl: Box<[ScatterGatherElement]>,
    /// Elements filled in by the last build
    built: usize,
    /// Entries the device reported as mapped
    mapped: usize,
    /// Direction of the live mapping, `None` while unmapped
    dir: Option<DmaDirection>,
}

impl TagSlot {
    pub fn new(max_segments: usize) -> Self {
        Self {
            sgl: vec![ScatterGatherElement::default(); max_segments].into_boxed_slice(),
            built: 0,
            mapped: 0,
            dir: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.dir.is_some()
    }

    /// Direction of the live mapping
    pub fn direction(&self) -> Option<DmaDirection> {
        self.dir
    }

    /// Entries the device mapped
    pub fn mapped_entries(&self) -> usize {
        self.mapped
    }

    /// Built elements of a mapped tag, empty otherwise
    pub fn segments(&self) -> &[ScatterGatherElement] {
        if self.is_mapped() {
            &self.sgl[..self.built]
        } else {
            &[]
        }
    }

    /// Segment budget
    pub fn capacity(&self) -> usize {
        self.sgl.len()
    }

    /// Fill the table for `nr_sectors` starting at `sector`
    ///
    /// The walk advances at most one page at a time. With `merge` set, a
    /// run that continues the previous element inside the same extent
    /// extends it instead of taking a new element.
    pub fn build(
        &mut self,
        index: &ExtentIndex,
        sector: u64,
        nr_sectors: u64,
        merge: bool,
    ) -> Result<usize> {
        assert!(!self.is_mapped(), "sata_target: building a mapped tag");

        let mut cursor = SectorCursor::new();
        let mut sector = sector;
        let mut left = nr_sectors;
        let mut last_extent = None;
        let mut n = 0;

        self.built = 0;
        while left != 0 {
            let page = sector_to_page(index, &mut cursor, sector);
            let run = page_sectors_left(&page).min(left);
            let len = (run << SECTOR_SHIFT) as u32;
            let addr = (page.pfn << PAGE_SHIFT) + page.offset as u64;

            let contiguous = n != 0
                && last_extent == Some(page.extent.sector())
                && self.sgl[n - 1].phys_end() == addr;

            if merge && contiguous {
                self.sgl[n - 1].length += len;
            } else {
                if n == self.sgl.len() {
                    error!(
                        "sata_target: segments too small? {} of {} sectors left",
                        left, nr_sectors
                    );
                    return Err(TargetError::SegmentsExhausted { remaining: left });
                }
                self.sgl[n].set_page(page.pfn, page.offset, len);
                last_extent = Some(page.extent.sector());
                n += 1;
            }

            sector += run;
            left -= run;
        }

        self.built = n;
        Ok(n)
    }

    /// Point the table at a single buffer
    pub fn build_single(&mut self, addr: u64, len: u32) -> usize {
        assert!(!self.is_mapped(), "sata_target: building a mapped tag");
        self.sgl[0].set_buf(addr, len);
        self.built = 1;
        1
    }

    /// Map the built elements through `device`
    ///
    /// Returns the number of built elements.
    pub fn map<D: DmaDevice + ?Sized>(&mut self, device: &D, dir: DmaDirection) -> Result<usize> {
        let mapped = device.map_sg(&mut self.sgl[..self.built], dir);
        if mapped == 0 {
            error!("sata_target: dma map returned 0 for {} segments", self.built);
            self.built = 0;
            return Err(TargetError::DmaMapFailed);
        }

        self.mapped = mapped;
        self.dir = Some(dir);
        Ok(self.built)
    }

    /// Undo [`map`](Self::map)
    ///
    /// # Panics
    /// If the tag is not mapped.
    pub fn unmap<D: DmaDevice + ?Sized>(&mut self, device: &D) {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => panic!("sata_target: unmap of a tag that is not mapped"),
        };

        // the device is handed the list it built, not its mapped count
        device.unmap_sg(&mut self.sgl[..self.built], dir);
        self.built = 0;
        self.mapped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::extent::Extent;
    use crate::mm::pages::PageBlock;
    use crate::testutil::MockDma;

    fn index() -> ExtentIndex {
        let mut index = ExtentIndex::new();
        // [0, 32) at pfn 0x100, [32, 48) at pfn 0x104: physically adjacent
        // to the first block but a different extent
        index.insert(Extent::new(PageBlock::new(0x100, 2), 0));
        index.insert(Extent::new(PageBlock::new(0x104, 1), 32));
        index
    }

    #[test]
    fn test_merge_within_extent() {
        let index = index();
        let mut slot = TagSlot::new(4);

        assert_eq!(slot.build(&index, 4, 40, true), Ok(2));
        let sgl = &slot.sgl[..2];
        assert_eq!((sgl[0].pfn, sgl[0].offset, sgl[0].length), (0x100, 2048, 14336));
        assert_eq!((sgl[1].pfn, sgl[1].offset, sgl[1].length), (0x104, 0, 6144));
    }

    #[test]
    fn test_no_merge_splits_at_pages() {
        let index = index();
        let mut slot = TagSlot::new(8);

        assert_eq!(slot.build(&index, 4, 20, false), Ok(3));
        let sgl = &slot.sgl[..3];
        assert_eq!((sgl[0].pfn, sgl[0].offset, sgl[0].length), (0x100, 2048, 2048));
        assert_eq!((sgl[1].pfn, sgl[1].offset, sgl[1].length), (0x101, 0, 4096));
        assert_eq!((sgl[2].pfn, sgl[2].offset, sgl[2].length), (0x102, 0, 4096));
        for sg in sgl {
            assert!(sg.offset + sg.length <= 4096);
        }
    }

    #[test]
    fn test_budget_exhaustion() {
        let index = index();
        let mut slot = TagSlot::new(2);

        let err = slot.build(&index, 0, 24, false).unwrap_err();
        assert_eq!(err, TargetError::SegmentsExhausted { remaining: 8 });
        assert!(!slot.is_mapped());
        assert!(slot.segments().is_empty());

        // the same tag still works for something that fits
        assert_eq!(slot.build(&index, 0, 16, false), Ok(2));
    }

    #[test]
    fn test_map_unmap_cycle() {
        let index = index();
        let dma = MockDma::new();
        let mut slot = TagSlot::new(4);

        slot.build(&index, 0, 8, true).unwrap();
        assert_eq!(slot.map(&dma, DmaDirection::WriteToDevice), Ok(1));
        assert!(slot.is_mapped());
        assert_eq!(slot.direction(), Some(DmaDirection::WriteToDevice));
        assert_eq!(slot.mapped_entries(), 1);
        assert_eq!(slot.segments()[0].dma_address, 0x100000);

        slot.unmap(&dma);
        assert!(!slot.is_mapped());
        assert_eq!(dma.unmaps(), 1);
        assert_eq!(dma.last_unmap_len(), 1);
    }

    #[test]
    fn test_zero_map_leaves_tag_unmapped() {
        let index = index();
        let dma = MockDma::new();
        dma.set_fail_map(true);
        let mut slot = TagSlot::new(4);

        slot.build(&index, 0, 8, true).unwrap();
        assert_eq!(slot.map(&dma, DmaDirection::ReadFromDevice), Err(TargetError::DmaMapFailed));
        assert!(!slot.is_mapped());
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn test_unmap_idle_tag_is_a_bug() {
        let dma = MockDma::new();
        TagSlot::new(1).unmap(&dma);
    }
}
