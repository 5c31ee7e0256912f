//! Target status codes
//!
//! Failures that are reported to the caller. Broken internal invariants
//! (a sector that no extent covers, overlapping extents, unmapping an idle
//! tag) are not represented here: they panic.

use core::fmt;

/// Target operation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// Requested capacity does not fit in system memory minus the reserve
    TooLarge {
        /// Requested capacity in sectors
        sectors: u64,
    },
    /// Page allocation failed even at order 0
    OutOfMemory {
        /// Pages obtained before giving up
        got: u64,
        /// Pages requested
        wanted: u64,
    },
    /// The device could not provide a coherent identify buffer
    NoCoherentBuffer,
    /// Construction parameters out of range
    InvalidConfig(&'static str),
    /// Empty request, or a request reaching past the end of the target
    InvalidRequest,
    /// The segment budget ran out before the request was covered
    SegmentsExhausted {
        /// Sectors left unmapped when the budget ran out
        remaining: u64,
    },
    /// The device mapped zero entries; the caller may retry
    DmaMapFailed,
}

impl TargetError {
    /// Whether the same command may succeed if simply issued again
    pub fn is_retryable(&self) -> bool {
        matches!(self, TargetError::DmaMapFailed)
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::TooLarge { sectors } => {
                write!(f, "{} sectors is too large", sectors)
            }
            TargetError::OutOfMemory { got, wanted } => {
                write!(f, "out of memory: got {} of {} pages", got, wanted)
            }
            TargetError::NoCoherentBuffer => f.write_str("no coherent identify buffer"),
            TargetError::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            TargetError::InvalidRequest => f.write_str("request outside target range"),
            TargetError::SegmentsExhausted { remaining } => {
                write!(f, "segment budget exhausted with {} sectors left", remaining)
            }
            TargetError::DmaMapFailed => f.write_str("dma map returned 0"),
        }
    }
}

/// Result type for target operations
pub type Result<T> = core::result::Result<T, TargetError>;
