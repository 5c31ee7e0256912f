//! DMA Support
//!
//! The target does not translate addresses itself. It describes transfers
//! as scatter/gather lists of page frames and hands them to the device that
//! owns it through [`DmaDevice`]:
//!
//! - **Capability**: can the device reach all of memory?
//! - **Common Buffer**: coherent memory for the IDENTIFY block
//! - **Scatter/Gather**: map and unmap a per-command element list
//!
//! [`DirectDma`] is a software device whose bus addresses equal CPU
//! addresses. It is what a hosted build runs against.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::mm::pages::DMA32_LIMIT;
use crate::mm::{PAGE_SHIFT, PAGE_SIZE};

/// DMA direction
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Read from device to memory
    ReadFromDevice = 0,
    /// Write from memory to device
    WriteToDevice = 1,
}

/// Scatter/gather element
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScatterGatherElement {
    /// Page frame number
    pub pfn: u64,
    /// Byte offset within the page
    pub offset: u32,
    /// Length in bytes
    pub length: u32,
    /// Bus address, filled in by the device on map
    pub dma_address: u64,
}

impl ScatterGatherElement {
    pub const fn new(pfn: u64, offset: u32, length: u32) -> Self {
        Self {
            pfn,
            offset,
            length,
            dma_address: 0,
        }
    }

    /// Point the element at a page range
    pub fn set_page(&mut self, pfn: u64, offset: u32, length: u32) {
        *self = Self::new(pfn, offset, length);
    }

    /// Point the element at a buffer by address
    pub fn set_buf(&mut self, addr: u64, length: u32) {
        let offset = (addr & (PAGE_SIZE as u64 - 1)) as u32;
        self.set_page(addr >> PAGE_SHIFT, offset, length);
    }

    /// Physical address of the first byte
    pub fn phys_addr(&self) -> u64 {
        (self.pfn << PAGE_SHIFT) + self.offset as u64
    }

    /// Physical address one past the last byte
    pub fn phys_end(&self) -> u64 {
        self.phys_addr() + self.length as u64
    }

    /// Page frames touched by the element
    pub fn pfns(&self) -> core::ops::Range<u64> {
        if self.length == 0 {
            return self.pfn..self.pfn;
        }
        self.pfn..((self.phys_end() - 1) >> PAGE_SHIFT) + 1
    }
}

/// Coherent (device-visible, uncached) memory buffer
#[derive(Debug, PartialEq, Eq)]
pub struct CoherentBuffer {
    /// CPU virtual address
    vaddr: usize,
    /// Address the device uses
    dma_handle: u64,
    /// Length in bytes
    len: usize,
}

impl CoherentBuffer {
    /// Wrap a coherent allocation
    ///
    /// # Safety
    /// `vaddr` must point to `len` bytes that stay valid and exclusively
    /// owned by the returned buffer until it is given back to the device.
    pub unsafe fn from_raw_parts(vaddr: usize, dma_handle: u64, len: usize) -> Self {
        Self {
            vaddr,
            dma_handle,
            len,
        }
    }

    pub fn vaddr(&self) -> usize {
        self.vaddr
    }

    pub fn dma_handle(&self) -> u64 {
        self.dma_handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.vaddr as *const u8, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.vaddr as *mut u8, self.len) }
    }
}

/// Device-side DMA operations the target relies on
pub trait DmaDevice {
    /// Whether the device can address all of memory (64-bit mask)
    fn supports_dma64(&self) -> bool;

    /// Allocate a coherent buffer of `len` bytes
    fn alloc_coherent(&self, len: usize) -> Option<CoherentBuffer>;

    /// Release a buffer from [`alloc_coherent`](Self::alloc_coherent)
    fn free_coherent(&self, buf: CoherentBuffer);

    /// Map a scatter/gather list, filling in bus addresses
    ///
    /// Returns the number of mapped entries; 0 means the mapping failed.
    fn map_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection) -> usize;

    /// Unmap a list previously passed to [`map_sg`](Self::map_sg)
    fn unmap_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection);
}

impl<T: DmaDevice + ?Sized> DmaDevice for &T {
    fn supports_dma64(&self) -> bool {
        (**self).supports_dma64()
    }

    fn alloc_coherent(&self, len: usize) -> Option<CoherentBuffer> {
        (**self).alloc_coherent(len)
    }

    fn free_coherent(&self, buf: CoherentBuffer) {
        (**self).free_coherent(buf)
    }

    fn map_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection) -> usize {
        (**self).map_sg(sgl, dir)
    }

    fn unmap_sg(&self, sgl: &mut [ScatterGatherElement], dir: DmaDirection) {
        (**self).unmap_sg(sgl, dir)
    }
}

// ============================================================================
// Direct-mapped software device
// ============================================================================

/// DMA adapter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaAdapterStats {
    pub dma64: bool,
    pub common_buffers: u32,
    pub common_buffer_bytes: u64,
    pub sg_operations: u64,
    pub mapped_entries: u64,
}

/// Software DMA device with bus address == physical address
pub struct DirectDma {
    /// Device has a 64-bit DMA mask
    dma64: bool,
    /// Common buffers outstanding
    common_buffers: AtomicU32,
    /// Common buffer bytes outstanding
    common_buffer_bytes: AtomicU64,
    /// Map operations performed
    sg_operations: AtomicU64,
    /// Entries currently mapped
    mapped_entries: AtomicU64,
}

impl DirectDma {
    pub const fn new(dma64: bool) -> Self {
        Self {
            dma64,
            common_buffers: AtomicU32::new(0),
            common_buffer_bytes: AtomicU64::new(0),
            sg_operations: AtomicU64::new(0),
            mapped_entries: AtomicU64::new(0),
        }
    }

    /// Get adapter statistics
    pub fn get_stats(&self) -> DmaAdapterStats {
        DmaAdapterStats {
            dma64: self.dma64,
            common_buffers: self.common_buffers.load(Ordering::Relaxed),
            common_buffer_bytes: self.common_buffer_bytes.load(Ordering::Relaxed),
            sg_operations: self.sg_operations.load(Ordering::Relaxed),
            mapped_entries: self.mapped_entries.load(Ordering::Relaxed),
        }
    }

    fn coherent_layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len.max(1), PAGE_SIZE).ok()
    }
}

impl DmaDevice for DirectDma {
    fn supports_dma64(&self) -> bool {
        self.dma64
    }

    fn alloc_coherent(&self, len: usize) -> Option<CoherentBuffer> {
        let layout = Self::coherent_layout(len)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }

        self.common_buffers.fetch_add(1, Ordering::Relaxed);
        self.common_buffer_bytes.fetch_add(len as u64, Ordering::Relaxed);

        let addr = ptr as usize;
        Some(unsafe { CoherentBuffer::from_raw_parts(addr, addr as u64, len) })
    }

    fn free_coherent(&self, buf: CoherentBuffer) {
        if let Some(layout) = Self::coherent_layout(buf.len) {
            unsafe { dealloc(buf.vaddr as *mut u8, layout) };
        }
        self.common_buffers.fetch_sub(1, Ordering::Relaxed);
        self.common_buffer_bytes.fetch_sub(buf.len as u64, Ordering::Relaxed);
    }

    fn map_sg(&self, sgl: &mut [ScatterGatherElement], _dir: DmaDirection) -> usize {
        // A 32-bit device can only reach what lies below 4GB
        if !self.dma64 && sgl.iter().any(|sg| sg.phys_end() > DMA32_LIMIT) {
            return 0;
        }

        for sg in sgl.iter_mut() {
            sg.dma_address = sg.phys_addr();
        }

        self.sg_operations.fetch_add(1, Ordering::Relaxed);
        self.mapped_entries.fetch_add(sgl.len() as u64, Ordering::Relaxed);
        sgl.len()
    }

    fn unmap_sg(&self, sgl: &mut [ScatterGatherElement], _dir: DmaDirection) {
        for sg in sgl.iter_mut() {
            sg.dma_address = 0;
        }
        self.mapped_entries.fetch_sub(sgl.len() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sg_element_addresses() {
        let mut sg = ScatterGatherElement::default();
        sg.set_page(0x10, 512, 1024);
        assert_eq!(sg.phys_addr(), 0x10200);
        assert_eq!(sg.phys_end(), 0x10600);
        assert_eq!(sg.pfns(), 0x10..0x11);

        sg.set_page(0x10, 0, 3 * PAGE_SIZE as u32);
        assert_eq!(sg.pfns(), 0x10..0x13);

        sg.set_buf(0x12345, 512);
        assert_eq!(sg.pfn, 0x12);
        assert_eq!(sg.offset, 0x345);
    }

    #[test]
    fn test_direct_map_fills_bus_addresses() {
        let dma = DirectDma::new(true);
        let mut sgl = [
            ScatterGatherElement::new(0x100, 0, 4096),
            ScatterGatherElement::new(0x200, 512, 512),
        ];
        assert_eq!(dma.map_sg(&mut sgl, DmaDirection::ReadFromDevice), 2);
        assert_eq!(sgl[0].dma_address, 0x100000);
        assert_eq!(sgl[1].dma_address, 0x200200);
        assert_eq!(dma.get_stats().mapped_entries, 2);

        dma.unmap_sg(&mut sgl, DmaDirection::ReadFromDevice);
        assert_eq!(sgl[0].dma_address, 0);
        assert_eq!(dma.get_stats().mapped_entries, 0);
        assert_eq!(dma.get_stats().sg_operations, 1);
    }

    #[test]
    fn test_dma32_device_refuses_high_memory() {
        let dma = DirectDma::new(false);
        let high_pfn = DMA32_LIMIT >> PAGE_SHIFT;
        let mut sgl = [ScatterGatherElement::new(high_pfn, 0, 4096)];
        assert_eq!(dma.map_sg(&mut sgl, DmaDirection::WriteToDevice), 0);

        let mut low = [ScatterGatherElement::new(high_pfn - 1, 0, 4096)];
        assert_eq!(dma.map_sg(&mut low, DmaDirection::WriteToDevice), 1);
    }

    #[test]
    fn test_coherent_buffer_lifecycle() {
        let dma = DirectDma::new(true);
        let mut buf = dma.alloc_coherent(512).expect("no coherent buffer");
        assert_eq!(buf.len(), 512);
        assert_eq!(buf.dma_handle(), buf.vaddr() as u64);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.as_mut_slice()[0] = 0xAB;
        assert_eq!(buf.as_slice()[0], 0xAB);
        assert_eq!(dma.get_stats().common_buffers, 1);
        assert_eq!(dma.get_stats().common_buffer_bytes, 512);

        dma.free_coherent(buf);
        assert_eq!(dma.get_stats().common_buffers, 0);
        assert_eq!(dma.get_stats().common_buffer_bytes, 0);
    }
}
