//! Sector to page translation
//!
//! Requests are walked one page at a time. Consecutive pages nearly always
//! fall in the extent that served the previous one, so a cursor remembers
//! that extent and the index is only searched when the walk leaves it.

use crate::mm::extent::{Extent, ExtentIndex};
use crate::mm::{PAGE_SIZE, SECTOR_SHIFT};

/// Last-extent hint for one translation sequence
#[derive(Debug, Default)]
pub struct SectorCursor<'a> {
    last: Option<&'a Extent>,
    hits: u64,
    misses: u64,
}

impl<'a> SectorCursor<'a> {
    pub const fn new() -> Self {
        Self {
            last: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Lookups served by the cached extent
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that went to the index
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Where a sector lives
#[derive(Debug, Clone, Copy)]
pub struct SectorPage<'a> {
    /// Extent holding the sector
    pub extent: &'a Extent,
    /// Page index within the extent
    pub page: u64,
    /// Page frame number
    pub pfn: u64,
    /// Byte offset of the sector within the page
    pub offset: u32,
    /// Bytes from `offset` to the end of the page
    pub length: u32,
}

/// Translate `sector` into a page and the bytes left in it
///
/// # Panics
/// If no extent covers `sector`. After a successful construction every
/// sector of the target is backed, so a miss is a corrupted index.
pub fn sector_to_page<'a>(
    index: &'a ExtentIndex,
    cursor: &mut SectorCursor<'a>,
    sector: u64,
) -> SectorPage<'a> {
    let extent = match cursor.last {
        Some(extent) if extent.contains(sector) => {
            cursor.hits += 1;
            extent
        }
        _ => {
            cursor.misses += 1;
            let extent = match index.find(sector) {
                Some(extent) => extent,
                None => panic!("sata_target: no extent for sector {}", sector),
            };
            cursor.last = Some(extent);
            extent
        }
    };

    let (page, offset) = extent.locate(sector);
    SectorPage {
        extent,
        page,
        pfn: extent.pages().pfn() + page,
        offset,
        length: PAGE_SIZE as u32 - offset,
    }
}

/// Sectors from `page.offset` to the end of the page
pub fn page_sectors_left(page: &SectorPage<'_>) -> u64 {
    (page.length >> SECTOR_SHIFT) as u64
}
