//! Memory-backed SATA Target
//!
//! An experimental SATA target meant to be used as a fast device for
//! exercising an I/O stack (queueing, tagging, scheduling). It is not
//! persistent: main memory is the backing store.
//!
//! # Architecture
//!
//! ```text
//!  caller (queue / dispatch layer)
//!        │  map(sector, nr_sectors, tag, dir) / unmap(tag) / map_identify()
//!        ▼
//! ┌──────────────────────────────────────────────┐
//! │ SataTarget                                   │
//! │  ┌────────────┐  ┌──────────────┐            │
//! │  │ Tag slots  │  │ Identify buf │            │
//! │  │ (SG lists) │  │ (coherent)   │            │
//! │  └─────┬──────┘  └──────────────┘            │
//! │        │ sector_to_page()                    │
//! │  ┌─────▼──────────────────────────────┐      │
//! │  │ ExtentIndex  (sector → page block) │      │
//! │  └────────────────────────────────────┘      │
//! └───────┬───────────────────────┬──────────────┘
//!         ▼                       ▼
//!    DmaDevice               PageAllocator
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let dma = DirectDma::new(true);
//! let pages = HeapPageAllocator::new(8 << 30);
//! let target = SataTarget::init(&dma, &pages, 2048, TargetConfig::new(4, 8))?;
//!
//! let segments = target.map(0, 1024, 0, DmaDirection::ReadFromDevice)?;
//! // ... transfer ...
//! target.unmap(0);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod hal;
pub mod io;
pub mod mm;

#[cfg(test)]
mod testutil;

pub use config::{TargetConfig, Word83Encoding};
pub use error::{Result, TargetError};
pub use hal::ata::{IdentifyData, IdentifyFeatures};
pub use hal::dma::{CoherentBuffer, DirectDma, DmaDevice, DmaDirection, ScatterGatherElement};
pub use io::backing::BackingStats;
pub use io::target::SataTarget;
pub use mm::extent::{Extent, ExtentIndex};
pub use mm::pages::{HeapPageAllocator, MemoryPool, PageAllocator, PageBlock};
pub use mm::{PAGE_SECTORS, PAGE_SHIFT, PAGE_SIZE, SECTOR_SHIFT, SECTOR_SIZE};
