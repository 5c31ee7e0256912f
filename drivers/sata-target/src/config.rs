//! Target Construction Parameters
//!
//! Everything that used to be a load-time knob is a field here, passed to
//! [`SataTarget::init`](crate::SataTarget::init).

use crate::error::{Result, TargetError};
use crate::mm::MAX_ORDER;

/// Default queue depth (NCQ maximum)
pub const ST_QDEPTH: usize = 32;

/// Largest queue depth a tag (`u8`) can address
pub const MAX_DEPTH: usize = 256;

/// Default scatter/gather budget per command
pub const DEFAULT_MAX_SEGMENTS: usize = 128;

/// Memory always left to the rest of the system
pub const DEFAULT_RESERVE_MB: u64 = 256;

/// First block order tried by the backing allocator (32 pages)
pub const DEFAULT_ALLOC_ORDER: u8 = 5;

/// How IDENTIFY word 83 is assembled
///
/// Earlier releases combined the word 83 flags with a logical OR, so the
/// word they emitted is `0x0001`. Hosts validated against those releases
/// expect that value. `Bitwise` emits the flags themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Word83Encoding {
    /// `0x0001`, as earlier releases emitted it
    #[default]
    Reference,
    /// Valid | flush cache ext | flush cache | 48-bit addressing
    Bitwise,
}

/// Target configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Number of tags (in-flight commands)
    pub depth: usize,
    /// Scatter/gather elements available per command
    pub max_segments: usize,
    /// Assume an IOMMU makes all memory reachable, whatever the device mask
    pub assume_iommu: bool,
    /// Megabytes of system memory that must stay free
    pub reserve_mb: u64,
    /// Largest block order the backing allocator starts from
    pub max_order: u8,
    /// Coalesce physically contiguous runs into one segment
    pub merge_segments: bool,
    /// IDENTIFY word 83 encoding
    pub word83: Word83Encoding,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            depth: ST_QDEPTH,
            max_segments: DEFAULT_MAX_SEGMENTS,
            // a 64-bit arch is assumed to be sane and have an iommu
            assume_iommu: cfg!(target_pointer_width = "64"),
            reserve_mb: DEFAULT_RESERVE_MB,
            max_order: DEFAULT_ALLOC_ORDER,
            merge_segments: true,
            word83: Word83Encoding::Reference,
        }
    }
}

impl TargetConfig {
    /// Configuration with the given depth and segment budget, defaults otherwise
    pub fn new(depth: usize, max_segments: usize) -> Self {
        Self {
            depth,
            max_segments,
            ..Self::default()
        }
    }

    pub fn with_assume_iommu(mut self, assume_iommu: bool) -> Self {
        self.assume_iommu = assume_iommu;
        self
    }

    pub fn with_reserve_mb(mut self, reserve_mb: u64) -> Self {
        self.reserve_mb = reserve_mb;
        self
    }

    pub fn with_max_order(mut self, max_order: u8) -> Self {
        self.max_order = max_order;
        self
    }

    pub fn with_merge_segments(mut self, merge_segments: bool) -> Self {
        self.merge_segments = merge_segments;
        self
    }

    pub fn with_word83(mut self, word83: Word83Encoding) -> Self {
        self.word83 = word83;
        self
    }

    /// Reserve expressed in pages
    pub fn reserve_pages(&self) -> u64 {
        self.reserve_mb.saturating_mul(1024 * 1024) >> crate::mm::PAGE_SHIFT
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(TargetError::InvalidConfig("queue depth must be 1..=256"));
        }
        if self.max_segments == 0 {
            return Err(TargetError::InvalidConfig("segment budget must be non-zero"));
        }
        if self.max_order > MAX_ORDER {
            return Err(TargetError::InvalidConfig("allocation order too large"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TargetConfig::default();
        assert_eq!(config.depth, ST_QDEPTH);
        assert_eq!(config.max_order, 5);
        assert_eq!(config.reserve_pages(), 65536);
        assert_eq!(config.word83, Word83Encoding::Reference);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(TargetConfig::new(0, 8).validate().is_err());
        assert!(TargetConfig::new(257, 8).validate().is_err());
        assert!(TargetConfig::new(4, 0).validate().is_err());
        assert!(TargetConfig::new(4, 8).with_max_order(11).validate().is_err());
        assert!(TargetConfig::new(256, 1).validate().is_ok());
    }

    #[test]
    fn test_huge_reserve_saturates() {
        let config = TargetConfig::new(4, 8).with_reserve_mb(u64::MAX);
        assert_eq!(config.reserve_pages(), u64::MAX >> crate::mm::PAGE_SHIFT);
        assert!(config.validate().is_ok());
    }
}
