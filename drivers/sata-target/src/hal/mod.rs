//! Hardware Abstraction Layer (hal)
//!
//! - **DMA**: the device interface the target maps its pages through
//! - **ATA**: the IDENTIFY DEVICE block the target answers with

pub mod ata;
pub mod dma;

pub use ata::{IdentifyData, IdentifyFeatures, ST_DATA_LEN};
pub use dma::{
    CoherentBuffer, DirectDma, DmaAdapterStats, DmaDevice, DmaDirection, ScatterGatherElement,
};
