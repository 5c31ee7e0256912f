//! Memory Management
//!
//! - **Pages**: power-of-two page blocks handed out by a [`PageAllocator`]
//! - **Extents**: page blocks bound to a logical sector range, kept in an
//!   ordered [`ExtentIndex`]
//!
//! Pages are named by page frame number (PFN): `address >> PAGE_SHIFT`.

pub mod extent;
pub mod pages;

pub use extent::{Extent, ExtentIndex};
pub use pages::{HeapPageAllocator, MemoryPool, PageAllocator, PageBlock};

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Sector size
pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_SHIFT: usize = 9;

/// Sectors per page
pub const PAGE_SECTORS: u64 = (PAGE_SIZE >> SECTOR_SHIFT) as u64;

/// Largest block order a page allocator is asked for
pub const MAX_ORDER: u8 = 10;

/// Pages needed to back `sectors`
pub const fn sectors_to_pages(sectors: u64) -> u64 {
    sectors / PAGE_SECTORS + (sectors % PAGE_SECTORS != 0) as u64
}
