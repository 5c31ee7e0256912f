//! SATA Target
//!
//! Owns the backing extents, one scatter/gather slot per tag, and the
//! IDENTIFY buffer. Commands are addressed by tag: a tag is mapped for the
//! duration of one transfer and unmapped when the caller is done with it.
//!
//! # Concurrency
//!
//! The extent index is only written during construction and teardown, both
//! of which own the target. Each tag slot sits behind its own lock, taken
//! with `try_lock`: two commands sharing a tag is a caller bug, so a
//! contended slot panics instead of spinning. Different tags never touch
//! the same slot and proceed in parallel.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, warn};
use spin::{Mutex, MutexGuard};

use super::backing::{alloc_backing, dma64_ok, memory_pool, size_ok, BackingStats};
use super::sg::TagSlot;
use crate::config::TargetConfig;
use crate::error::{Result, TargetError};
use crate::hal::ata::{
    words_from_le_bytes, words_to_le_bytes, IdentifyFeatures, ID_WORDS, ST_DATA_LEN,
};
use crate::hal::dma::{CoherentBuffer, DmaDevice, DmaDirection, ScatterGatherElement};
use crate::mm::extent::ExtentIndex;
use crate::mm::pages::PageAllocator;
use crate::mm::sectors_to_pages;

/// Tag reserved for IDENTIFY
const IDENTIFY_TAG: u8 = 0;

/// Memory-backed SATA target
pub struct SataTarget<D: DmaDevice, A: PageAllocator> {
    /// Addressable sectors
    sectors: u64,
    config: TargetConfig,
    /// Sector -> backing pages
    extents: ExtentIndex,
    /// One slot per tag
    slots: Box<[Mutex<TagSlot>]>,
    /// IDENTIFY DEVICE response, `None` once released
    identify: Mutex<Option<CoherentBuffer>>,
    /// Write cache enabled
    wce: AtomicBool,
    stats: BackingStats,
    device: D,
    allocator: A,
}

impl<D: DmaDevice, A: PageAllocator> SataTarget<D, A> {
    /// Build a target of `sectors` sectors
    ///
    /// On failure everything acquired so far is released before the error
    /// is returned.
    pub fn init(device: D, allocator: A, sectors: u64, config: TargetConfig) -> Result<Self> {
        config.validate()?;

        let nr_pages = sectors_to_pages(sectors);
        if !size_ok(allocator.total_pages(), nr_pages, config.reserve_pages()) {
            error!("sata_target: {} sectors is too large", sectors);
            return Err(TargetError::TooLarge { sectors });
        }

        let slots: Vec<Mutex<TagSlot>> = (0..config.depth)
            .map(|_| Mutex::new(TagSlot::new(config.max_segments)))
            .collect();

        let mut target = Self {
            sectors,
            config,
            extents: ExtentIndex::new(),
            slots: slots.into_boxed_slice(),
            identify: Mutex::new(None),
            wce: AtomicBool::new(true),
            stats: BackingStats::default(),
            device,
            allocator,
        };

        // Dropping `target` on any of the early returns below undoes the
        // steps that did complete
        let buf = target
            .device
            .alloc_coherent(ST_DATA_LEN)
            .ok_or(TargetError::NoCoherentBuffer)?;
        *target.identify.get_mut() = Some(buf);

        let pool = memory_pool(dma64_ok(&target.device, config.assume_iommu));
        target.stats = alloc_backing(
            &mut target.extents,
            &target.allocator,
            pool,
            nr_pages,
            config.max_order,
        )?;

        debug!(
            "sata_target: {} sectors in {} extents, depth {}, {} segments per tag",
            sectors,
            target.extents.len(),
            config.depth,
            config.max_segments
        );

        Ok(target)
    }

    /// Tear the target down
    ///
    /// Same as dropping it. Tags still mapped are unmapped first.
    pub fn destroy(self) {
        drop(self);
    }

    /// Map `nr_sectors` starting at `sector` onto `tag`
    ///
    /// Returns the number of scatter/gather segments built.
    ///
    /// # Panics
    /// If `tag` is out of range, already mapped, or in use by another
    /// thread.
    pub fn map(&self, sector: u64, nr_sectors: u64, tag: u8, dir: DmaDirection) -> Result<usize> {
        let mut slot = self.slot(tag);
        if slot.is_mapped() {
            panic!("sata_target: tag {} is already mapped", tag);
        }

        let in_range = sector
            .checked_add(nr_sectors)
            .map_or(false, |end| end <= self.sectors);
        if nr_sectors == 0 || !in_range {
            return Err(TargetError::InvalidRequest);
        }

        slot.build(&self.extents, sector, nr_sectors, self.config.merge_segments)?;
        slot.map(&self.device, dir)
    }

    /// Release the mapping held by `tag`
    ///
    /// # Panics
    /// If `tag` is out of range or not mapped.
    pub fn unmap(&self, tag: u8) {
        self.slot(tag).unmap(&self.device);
    }

    /// Fill the IDENTIFY buffer and map it on tag 0
    ///
    /// Returns the mapped entry count and the tag. The caller unmaps tag 0
    /// once the response has been transferred.
    pub fn map_identify(&self) -> Result<(usize, u8)> {
        let mut slot = self.slot(IDENTIFY_TAG);
        if slot.is_mapped() {
            panic!("sata_target: identify while tag {} is mapped", IDENTIFY_TAG);
        }

        let mut identify = self.identify.lock();
        let buf = match &mut *identify {
            Some(buf) => buf,
            None => return Err(TargetError::NoCoherentBuffer),
        };

        let words = self.identify_features().encode();
        words_to_le_bytes(&words, buf.as_mut_slice());

        slot.build_single(buf.vaddr() as u64, buf.len() as u32);
        slot.map(&self.device, DmaDirection::ReadFromDevice)?;
        Ok((slot.mapped_entries(), IDENTIFY_TAG))
    }

    /// What the next IDENTIFY will advertise
    pub fn identify_features(&self) -> IdentifyFeatures {
        IdentifyFeatures::from_target(
            self.sectors,
            self.depth(),
            self.write_cache_enabled(),
            self.config.word83,
        )
    }

    /// Current contents of the IDENTIFY buffer
    pub fn identify_words(&self) -> [u16; ID_WORDS] {
        match &*self.identify.lock() {
            Some(buf) => words_from_le_bytes(buf.as_slice()),
            None => [0; ID_WORDS],
        }
    }

    pub fn set_write_cache(&self, enabled: bool) {
        self.wce.store(enabled, Ordering::Release);
    }

    pub fn write_cache_enabled(&self) -> bool {
        self.wce.load(Ordering::Acquire)
    }

    /// Segments mapped on `tag`, empty when the tag is idle
    pub fn segments(&self, tag: u8) -> Vec<ScatterGatherElement> {
        self.slot(tag).segments().to_vec()
    }

    pub fn is_mapped(&self, tag: u8) -> bool {
        self.slot(tag).is_mapped()
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn max_segments(&self) -> usize {
        self.config.max_segments
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn extents(&self) -> &ExtentIndex {
        &self.extents
    }

    pub fn backing_stats(&self) -> &BackingStats {
        &self.stats
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    fn slot(&self, tag: u8) -> MutexGuard<'_, TagSlot> {
        let index = tag as usize;
        assert!(
            index < self.slots.len(),
            "sata_target: tag {} beyond queue depth {}",
            tag,
            self.slots.len()
        );
        match self.slots[index].try_lock() {
            Some(slot) => slot,
            None => panic!("sata_target: tag {} used by two commands at once", tag),
        }
    }

    /// Give everything back. Safe on a partially built target.
    fn release(&mut self) {
        for (tag, slot) in self.slots.iter_mut().enumerate() {
            let slot = slot.get_mut();
            if slot.is_mapped() {
                warn!("sata_target: tag {} still mapped at teardown", tag);
                slot.unmap(&self.device);
            }
        }

        let pages = self.extents.prune(&self.allocator);

        if let Some(buf) = self.identify.get_mut().take() {
            self.device.free_coherent(buf);
        }

        debug!("sata_target: released {} pages", pages);
    }
}

impl<D: DmaDevice, A: PageAllocator> Drop for SataTarget<D, A> {
    fn drop(&mut self) {
        self.release();
    }
}
