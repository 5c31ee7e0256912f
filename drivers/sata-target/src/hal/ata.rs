//! ATA IDENTIFY DEVICE Data
//!
//! The target answers IDENTIFY with a 256-word block describing a SATA
//! disk of its capacity. The block is assembled from named feature fields
//! ([`IdentifyFeatures`]) so every advertised bit is set in one place, and
//! can be read back with [`IdentifyData::parse`].
//!
//! # Layout (words)
//! - 1/3/6: CHS geometry (255 heads, 63 sectors per track)
//! - 10-19: serial number, 23-26: firmware revision, 27-46: model number
//! - 49/50/53: capabilities
//! - 60-61: 28-bit sector count
//! - 75: queue depth - 1
//! - 76: SATA capabilities (link speeds, NCQ)
//! - 80/81: ATA major/minor version
//! - 82-87: command sets supported / enabled
//! - 88: UDMA modes
//! - 100-103: 48-bit sector count

use log::debug;

use crate::config::Word83Encoding;

/// IDENTIFY data length in bytes
pub const ST_DATA_LEN: usize = 512;

/// IDENTIFY data length in words
pub const ID_WORDS: usize = ST_DATA_LEN / 2;

/// Emulated heads per cylinder
pub const ST_HEADS: u16 = 255;

/// Emulated sectors per track
pub const ST_SECTORS_PER_TRACK: u16 = 63;

/// Serial number reported by the target
pub const ST_SERIAL: &str = "LINUXSATATARGET";

/// Firmware revision reported by the target
pub const ST_FIRMWARE: &str = "1.00";

/// Model number reported by the target
pub const ST_MODEL: &str = "LINUX TARGET DISK";

/// Largest sector count expressible in 28-bit LBA
pub const LBA28_MAX_SECTORS: u64 = 0x0FFF_FFFF;

/// NCQ depth limit (word 75 holds depth - 1 in five bits)
pub const NCQ_MAX_DEPTH: usize = 32;

/// Word 83 as earlier releases emitted it (flags joined with a logical OR)
pub const WORD83_REFERENCE: u16 = 0x0001;

/// IDENTIFY word indices
pub mod id_word {
    pub const CYLS: usize = 1;
    pub const HEADS: usize = 3;
    pub const SECTORS: usize = 6;
    pub const SERIAL: usize = 10;
    pub const SERIAL_LEN: usize = 10;
    pub const FW_REV: usize = 23;
    pub const FW_REV_LEN: usize = 4;
    pub const MODEL: usize = 27;
    pub const MODEL_LEN: usize = 20;
    pub const CAPABILITY: usize = 49;
    pub const CAPABILITY_2: usize = 50;
    pub const FIELD_VALID: usize = 53;
    pub const LBA_CAPACITY: usize = 60;
    pub const QUEUE_DEPTH: usize = 75;
    pub const SATA_CAPABILITY: usize = 76;
    pub const MAJOR_VERSION: usize = 80;
    pub const MINOR_VERSION: usize = 81;
    pub const COMMAND_SET_1: usize = 82;
    pub const COMMAND_SET_2: usize = 83;
    pub const CFSSE: usize = 84;
    pub const CFS_ENABLE_1: usize = 85;
    pub const CFS_ENABLE_2: usize = 86;
    pub const CSF_DEFAULT: usize = 87;
    pub const UDMA_MODES: usize = 88;
    pub const LBA_CAPACITY_2: usize = 100;
}

bitflags::bitflags! {
    /// Word 49
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u16 {
        const DMA = 1 << 8;
        const LBA = 1 << 9;
    }
}

bitflags::bitflags! {
    /// Word 50
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities2: u16 {
        /// Must be one
        const VALID = 1 << 14;
    }
}

bitflags::bitflags! {
    /// Word 53
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldValid: u16 {
        /// Word 88 is valid
        const UDMA = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Word 76
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SataCapabilities: u16 {
        /// 1.5 Gb/s
        const GEN1 = 1 << 1;
        /// 3.0 Gb/s
        const GEN2 = 1 << 2;
        /// Native command queuing
        const NCQ = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Words 82 (supported) and 85 (enabled)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandSet1: u16 {
        const WRITE_CACHE = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Words 83 (supported) and 86 (enabled)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandSet2: u16 {
        const LBA48 = 1 << 10;
        const FLUSH_CACHE = 1 << 12;
        const FLUSH_CACHE_EXT = 1 << 13;
        /// Must be one in word 83
        const VALID = 1 << 14;
    }
}

bitflags::bitflags! {
    /// Words 84 (supported) and 87 (default)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandSetExt: u16 {
        const FUA = 1 << 6;
        /// Must be one
        const VALID = 1 << 14;
    }
}

bitflags::bitflags! {
    /// Word 88
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UdmaModes: u16 {
        const UDMA5_SUPPORTED = 1 << 5;
        const UDMA5_SELECTED = 1 << 13;
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Everything the target advertises in IDENTIFY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyFeatures {
    pub sectors: u64,
    pub cylinders: u16,
    pub heads: u16,
    pub sectors_per_track: u16,
    pub serial: &'static str,
    pub firmware: &'static str,
    pub model: &'static str,
    pub capabilities: Capabilities,
    pub capabilities2: Capabilities2,
    pub field_valid: FieldValid,
    /// Queue depth (not depth - 1)
    ///
    /// Word 75 only has room for NCQ depths, so anything deeper is
    /// advertised as 32.
    pub queue_depth: usize,
    pub sata: SataCapabilities,
    pub major_version: u16,
    pub minor_version: u16,
    pub supported1: CommandSet1,
    pub supported2: CommandSet2,
    pub supported_ext: CommandSetExt,
    pub enabled1: CommandSet1,
    pub enabled2: CommandSet2,
    pub default_ext: CommandSetExt,
    pub udma: UdmaModes,
    pub word83: Word83Encoding,
}

impl IdentifyFeatures {
    /// Features of a target with `sectors` capacity and `depth` tags
    pub fn from_target(
        sectors: u64,
        depth: usize,
        write_cache: bool,
        word83: Word83Encoding,
    ) -> Self {
        let per_cylinder = ST_HEADS as u64 * ST_SECTORS_PER_TRACK as u64;
        let cylinders = (sectors / per_cylinder).min(u16::MAX as u64) as u16;

        let enabled1 = if write_cache {
            CommandSet1::WRITE_CACHE
        } else {
            CommandSet1::empty()
        };

        Self {
            sectors,
            cylinders,
            heads: ST_HEADS,
            sectors_per_track: ST_SECTORS_PER_TRACK,
            serial: ST_SERIAL,
            firmware: ST_FIRMWARE,
            model: ST_MODEL,
            capabilities: Capabilities::LBA | Capabilities::DMA,
            capabilities2: Capabilities2::VALID,
            field_valid: FieldValid::UDMA,
            queue_depth: depth,
            sata: SataCapabilities::GEN1 | SataCapabilities::GEN2 | SataCapabilities::NCQ,
            // ATA-4 through ATA-7
            major_version: 0x00f0,
            minor_version: 0x0016,
            supported1: CommandSet1::WRITE_CACHE,
            supported2: CommandSet2::VALID
                | CommandSet2::FLUSH_CACHE_EXT
                | CommandSet2::FLUSH_CACHE
                | CommandSet2::LBA48,
            supported_ext: CommandSetExt::VALID | CommandSetExt::FUA,
            enabled1,
            enabled2: CommandSet2::FLUSH_CACHE_EXT | CommandSet2::FLUSH_CACHE | CommandSet2::LBA48,
            default_ext: CommandSetExt::VALID,
            udma: UdmaModes::UDMA5_SUPPORTED | UdmaModes::UDMA5_SELECTED,
            word83,
        }
    }

    /// Value written to word 83
    pub fn word83_value(&self) -> u16 {
        match self.word83 {
            Word83Encoding::Reference => WORD83_REFERENCE,
            Word83Encoding::Bitwise => self.supported2.bits(),
        }
    }

    /// Assemble the IDENTIFY block
    pub fn encode(&self) -> [u16; ID_WORDS] {
        let mut id = [0u16; ID_WORDS];

        id[id_word::CYLS] = self.cylinders;
        id[id_word::HEADS] = self.heads;
        id[id_word::SECTORS] = self.sectors_per_track;
        put_string(&mut id[id_word::SERIAL..][..id_word::SERIAL_LEN], self.serial);
        put_string(&mut id[id_word::FW_REV..][..id_word::FW_REV_LEN], self.firmware);
        put_string(&mut id[id_word::MODEL..][..id_word::MODEL_LEN], self.model);

        id[id_word::CAPABILITY] = self.capabilities.bits();
        id[id_word::CAPABILITY_2] = self.capabilities2.bits();
        id[id_word::FIELD_VALID] = self.field_valid.bits();

        let sectors_28 = self.sectors.min(LBA28_MAX_SECTORS);
        id[id_word::LBA_CAPACITY] = sectors_28 as u16;
        id[id_word::LBA_CAPACITY + 1] = (sectors_28 >> 16) as u16;

        let depth = self.queue_depth.clamp(1, NCQ_MAX_DEPTH);
        if depth != self.queue_depth {
            debug!(
                "sata_target: queue depth {} advertised as {}",
                self.queue_depth, depth
            );
        }
        id[id_word::QUEUE_DEPTH] = (depth - 1) as u16;
        id[id_word::SATA_CAPABILITY] = self.sata.bits();

        id[id_word::MAJOR_VERSION] = self.major_version;
        id[id_word::MINOR_VERSION] = self.minor_version;
        id[id_word::COMMAND_SET_1] = self.supported1.bits();
        id[id_word::COMMAND_SET_2] = self.word83_value();
        id[id_word::CFSSE] = self.supported_ext.bits();
        id[id_word::CFS_ENABLE_1] = self.enabled1.bits();
        id[id_word::CFS_ENABLE_2] = self.enabled2.bits();
        id[id_word::CSF_DEFAULT] = self.default_ext.bits();
        id[id_word::UDMA_MODES] = self.udma.bits();

        for i in 0..4 {
            id[id_word::LBA_CAPACITY_2 + i] = (self.sectors >> (16 * i)) as u16;
        }

        id
    }
}

/// Copy `s` into an ATA string field, space padded
///
/// Two characters per word, first character in the high byte.
fn put_string(words: &mut [u16], s: &str) {
    let mut chars = s.bytes().chain(core::iter::repeat(b' '));
    for word in words.iter_mut() {
        let hi = chars.next().unwrap_or(b' ');
        let lo = chars.next().unwrap_or(b' ');
        *word = (hi as u16) << 8 | lo as u16;
    }
}

/// Serialize IDENTIFY words little-endian
pub fn words_to_le_bytes(words: &[u16; ID_WORDS], out: &mut [u8]) {
    for (chunk, word) in out.chunks_exact_mut(2).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Deserialize little-endian IDENTIFY bytes
pub fn words_from_le_bytes(bytes: &[u8]) -> [u16; ID_WORDS] {
    let mut words = [0u16; ID_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = u16::from_le_bytes([chunk[0], chunk[1]]);
    }
    words
}

// ============================================================================
// Parsing
// ============================================================================

/// Decoded IDENTIFY block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyData {
    pub model: [u8; 40],
    pub serial: [u8; 20],
    pub firmware: [u8; 8],
    pub cylinders: u16,
    pub heads: u16,
    pub sectors_per_track: u16,
    pub lba: bool,
    pub dma: bool,
    pub ncq: bool,
    /// Queue depth (word 75 + 1)
    pub queue_depth: usize,
    pub lba48: bool,
    pub sectors_28: u64,
    pub sectors_48: u64,
    /// Capacity as a host would compute it
    pub total_sectors: u64,
    pub write_cache_supported: bool,
    pub write_cache_enabled: bool,
    pub flush_cache_enabled: bool,
}

impl IdentifyData {
    /// Decode an IDENTIFY block
    pub fn parse(data: &[u16; ID_WORDS]) -> Self {
        let mut model = [0u8; 40];
        get_string(&data[id_word::MODEL..][..id_word::MODEL_LEN], &mut model);
        let mut serial = [0u8; 20];
        get_string(&data[id_word::SERIAL..][..id_word::SERIAL_LEN], &mut serial);
        let mut firmware = [0u8; 8];
        get_string(&data[id_word::FW_REV..][..id_word::FW_REV_LEN], &mut firmware);

        let caps = Capabilities::from_bits_truncate(data[id_word::CAPABILITY]);
        let sata = SataCapabilities::from_bits_truncate(data[id_word::SATA_CAPABILITY]);
        let cmd_set2 = CommandSet2::from_bits_truncate(data[id_word::COMMAND_SET_2]);
        let enabled1 = CommandSet1::from_bits_truncate(data[id_word::CFS_ENABLE_1]);
        let enabled2 = CommandSet2::from_bits_truncate(data[id_word::CFS_ENABLE_2]);

        let sectors_28 = (data[id_word::LBA_CAPACITY + 1] as u64) << 16
            | data[id_word::LBA_CAPACITY] as u64;
        let sectors_48 = (data[id_word::LBA_CAPACITY_2 + 3] as u64) << 48
            | (data[id_word::LBA_CAPACITY_2 + 2] as u64) << 32
            | (data[id_word::LBA_CAPACITY_2 + 1] as u64) << 16
            | data[id_word::LBA_CAPACITY_2] as u64;

        // Word 83 bit 10 decides which count applies
        let lba48 = cmd_set2.contains(CommandSet2::LBA48);
        let total_sectors = if lba48 && sectors_48 > 0 {
            sectors_48
        } else {
            sectors_28
        };

        Self {
            model,
            serial,
            firmware,
            cylinders: data[id_word::CYLS],
            heads: data[id_word::HEADS],
            sectors_per_track: data[id_word::SECTORS],
            lba: caps.contains(Capabilities::LBA),
            dma: caps.contains(Capabilities::DMA),
            ncq: sata.contains(SataCapabilities::NCQ),
            queue_depth: (data[id_word::QUEUE_DEPTH] & 0x1f) as usize + 1,
            lba48,
            sectors_28,
            sectors_48,
            total_sectors,
            write_cache_supported: CommandSet1::from_bits_truncate(data[id_word::COMMAND_SET_1])
                .contains(CommandSet1::WRITE_CACHE),
            write_cache_enabled: enabled1.contains(CommandSet1::WRITE_CACHE),
            flush_cache_enabled: enabled2.contains(CommandSet2::FLUSH_CACHE),
        }
    }

    pub fn model_str(&self) -> &str {
        trimmed(&self.model)
    }

    pub fn serial_str(&self) -> &str {
        trimmed(&self.serial)
    }

    pub fn firmware_str(&self) -> &str {
        trimmed(&self.firmware)
    }
}

/// Unpack an ATA string field (high byte first)
fn get_string(words: &[u16], out: &mut [u8]) {
    for (i, word) in words.iter().enumerate() {
        out[i * 2] = (word >> 8) as u8;
        out[i * 2 + 1] = (word & 0xFF) as u8;
    }
}

fn trimmed(field: &[u8]) -> &str {
    core::str::from_utf8(field)
        .unwrap_or("")
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identify(sectors: u64, depth: usize, wce: bool, word83: Word83Encoding) -> IdentifyData {
        IdentifyData::parse(&IdentifyFeatures::from_target(sectors, depth, wce, word83).encode())
    }

    #[test]
    fn test_geometry_and_queue_depth() {
        let id = identify(1_000_000, 32, true, Word83Encoding::Reference);
        assert_eq!(id.heads, 255);
        assert_eq!(id.sectors_per_track, 63);
        assert_eq!(id.cylinders, 62);
        assert_eq!(id.cylinders as u64, 1_000_000 / (255 * 63));
        assert_eq!(id.queue_depth, 32);
        assert!(id.lba && id.dma && id.ncq);
    }

    #[test]
    fn test_fixed_words() {
        let words = IdentifyFeatures::from_target(2048, 4, true, Word83Encoding::Reference).encode();
        assert_eq!(words[id_word::CAPABILITY], 0x0300);
        assert_eq!(words[id_word::CAPABILITY_2], 0x4000);
        assert_eq!(words[id_word::FIELD_VALID], 0x0004);
        assert_eq!(words[id_word::QUEUE_DEPTH], 3);
        assert_eq!(words[id_word::SATA_CAPABILITY], 0x0106);
        assert_eq!(words[id_word::MAJOR_VERSION], 0x00f0);
        assert_eq!(words[id_word::MINOR_VERSION], 0x0016);
        assert_eq!(words[id_word::COMMAND_SET_1], 0x0020);
        assert_eq!(words[id_word::COMMAND_SET_2], WORD83_REFERENCE);
        assert_eq!(words[id_word::CFSSE], 0x4040);
        assert_eq!(words[id_word::CFS_ENABLE_1], 0x0020);
        assert_eq!(words[id_word::CFS_ENABLE_2], 0x3400);
        assert_eq!(words[id_word::CSF_DEFAULT], 0x4000);
        assert_eq!(words[id_word::UDMA_MODES], 0x2020);
        assert_eq!(words[0], 0);
    }

    #[test]
    fn test_word83_encodings() {
        let reference = IdentifyFeatures::from_target(2048, 4, true, Word83Encoding::Reference);
        assert_eq!(reference.encode()[id_word::COMMAND_SET_2], 0x0001);

        let bitwise = IdentifyFeatures::from_target(2048, 4, true, Word83Encoding::Bitwise);
        assert_eq!(bitwise.encode()[id_word::COMMAND_SET_2], 0x7400);
    }

    #[test]
    fn test_strings_are_space_padded() {
        let words = IdentifyFeatures::from_target(2048, 4, true, Word83Encoding::Reference).encode();
        // "LI" packed high byte first
        assert_eq!(words[id_word::SERIAL], 0x4c49);
        // "T" then the first pad space
        assert_eq!(words[id_word::SERIAL + 7], 0x5420);
        assert_eq!(words[id_word::SERIAL + 9], 0x2020);

        let id = IdentifyData::parse(&words);
        assert_eq!(id.serial_str(), ST_SERIAL);
        assert_eq!(id.firmware_str(), ST_FIRMWARE);
        assert_eq!(id.model_str(), ST_MODEL);
        assert_eq!(&id.model[17..], &[b' '; 23]);
    }

    #[test]
    fn test_sector_counts() {
        let id = identify(1_000_000, 32, true, Word83Encoding::Reference);
        assert_eq!(id.sectors_28, 1_000_000);
        assert_eq!(id.sectors_48, 1_000_000);
        assert!(!id.lba48);
        assert_eq!(id.total_sectors, 1_000_000);

        let big = 0x1_2345_6789_abcd;
        let id = identify(big, 32, true, Word83Encoding::Bitwise);
        assert_eq!(id.sectors_28, LBA28_MAX_SECTORS);
        assert_eq!(id.sectors_48, big);
        assert!(id.lba48);
        assert_eq!(id.total_sectors, big);
    }

    #[test]
    fn test_write_cache_flag() {
        assert!(identify(2048, 4, true, Word83Encoding::Reference).write_cache_enabled);

        let id = identify(2048, 4, false, Word83Encoding::Reference);
        assert!(!id.write_cache_enabled);
        assert!(id.write_cache_supported);
        assert!(id.flush_cache_enabled);
    }

    #[test]
    fn test_depth_is_clamped_to_ncq_limit() {
        assert_eq!(identify(2048, 1, true, Word83Encoding::Reference).queue_depth, 1);
        assert_eq!(identify(2048, 64, true, Word83Encoding::Reference).queue_depth, 32);

        let deep = IdentifyFeatures::from_target(2048, 64, true, Word83Encoding::Reference);
        assert_eq!(deep.queue_depth, 64);
        assert_eq!(deep.encode()[id_word::QUEUE_DEPTH], 31);
    }

    #[test]
    fn test_cylinders_saturate() {
        let id = identify(u32::MAX as u64 * 4, 32, true, Word83Encoding::Reference);
        assert_eq!(id.cylinders, u16::MAX);
    }

    #[test]
    fn test_le_byte_conversion() {
        let words = IdentifyFeatures::from_target(2048, 4, true, Word83Encoding::Reference).encode();
        let mut bytes = [0u8; ST_DATA_LEN];
        words_to_le_bytes(&words, &mut bytes);
        assert_eq!(bytes[2 * id_word::CAPABILITY], 0x00);
        assert_eq!(bytes[2 * id_word::CAPABILITY + 1], 0x03);
        assert_eq!(words_from_le_bytes(&bytes), words);
    }
}
