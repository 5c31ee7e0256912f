//! I/O Path
//!
//! - **backing**: sizing and populating the extent index at construction
//! - **translate**: sector to page lookup with a last-extent cache
//! - **sg**: per-tag scatter/gather lists and their map state
//! - **target**: the [`SataTarget`] that ties them together

pub mod backing;
pub mod sg;
pub mod target;
pub mod translate;

pub use backing::BackingStats;
pub use sg::TagSlot;
pub use target::SataTarget;
pub use translate::{sector_to_page, SectorCursor, SectorPage};
