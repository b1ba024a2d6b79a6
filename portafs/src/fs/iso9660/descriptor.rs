//! Volume descriptors and the numeric encodings they share with records.

use alloc::string::String;
use alloc::vec::Vec;

use crate::fs::vfs::{FsError, FsResult, VolumeString, VolumeTimestamp};
use crate::time::Timestamp;

use super::record::DirectoryRecord;

/// Size of every volume descriptor
pub const DESCRIPTOR_SIZE: usize = 2048;
/// Logical sector of the first descriptor
pub const FIRST_DESCRIPTOR: u64 = 16;
/// Standard identifier
pub const STANDARD_ID: &[u8; 5] = b"CD001";

/// Joliet UCS-2 level 1/2/3 escape sequences
const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

/// Descriptor type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    BootRecord,
    Primary,
    Supplementary,
    Partition,
    Terminator,
    Unknown(u8),
}

impl From<u8> for DescriptorType {
    fn from(code: u8) -> Self {
        match code {
            0 => DescriptorType::BootRecord,
            1 => DescriptorType::Primary,
            2 => DescriptorType::Supplementary,
            3 => DescriptorType::Partition,
            255 => DescriptorType::Terminator,
            other => DescriptorType::Unknown(other),
        }
    }
}

// ============================================================================
// Both-endian fields
// ============================================================================

/// Reads a both-endian u16; the little-endian half wins on mismatch.
pub fn both_u16(bytes: &[u8], offset: usize) -> u16 {
    let le = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    let be = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]);
    if le != be {
        log::warn!("[iso9660] both-endian mismatch at {}: {} vs {}", offset, le, be);
    }
    le
}

/// Reads a both-endian u32; the little-endian half wins on mismatch.
pub fn both_u32(bytes: &[u8], offset: usize) -> u32 {
    let le = u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]);
    let be = u32::from_be_bytes([
        bytes[offset + 4],
        bytes[offset + 5],
        bytes[offset + 6],
        bytes[offset + 7],
    ]);
    if le != be {
        log::warn!("[iso9660] both-endian mismatch at {}: {} vs {}", offset, le, be);
    }
    le
}

// ============================================================================
// Dates
// ============================================================================

fn digits(bytes: &[u8]) -> Option<u32> {
    bytes.iter().try_fold(0u32, |value, &byte| {
        byte.is_ascii_digit().then(|| value * 10 + (byte - b'0') as u32)
    })
}

/// Decodes a 17-byte descriptor date; all-zero dates are "not specified".
pub fn decode_volume_date(bytes: &[u8]) -> Option<Timestamp> {
    if bytes.len() < 17 || bytes[..16].iter().all(|&b| b == b'0' || b == 0) {
        return None;
    }
    let stamp = Timestamp::new(
        digits(&bytes[0..4])? as u16,
        digits(&bytes[4..6])? as u8,
        digits(&bytes[6..8])? as u8,
        digits(&bytes[8..10])? as u8,
        digits(&bytes[10..12])? as u8,
        digits(&bytes[12..14])? as u8,
    )
    .with_nanosecond(digits(&bytes[14..16])? * 10_000_000)
    .with_offset(bytes[16] as i8 as i16 * 15);
    stamp.is_valid().then_some(stamp)
}

/// Decodes a 7-byte directory record date.
pub fn decode_record_date(bytes: &[u8]) -> Option<Timestamp> {
    if bytes.len() < 7 || bytes[..6].iter().all(|&b| b == 0) {
        return None;
    }
    let stamp = Timestamp::new(
        1900 + bytes[0] as u16,
        bytes[1],
        bytes[2],
        bytes[3],
        bytes[4],
        bytes[5],
    )
    .with_offset(bytes[6] as i8 as i16 * 15);
    stamp.is_valid().then_some(stamp)
}

// ============================================================================
// Primary / supplementary descriptor
// ============================================================================

/// A primary or supplementary volume descriptor
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    raw: Vec<u8>,
    pub kind: DescriptorType,
    /// Supplementary descriptor carrying a Joliet escape sequence
    pub joliet: bool,
    pub volume_space_size: u32,
    pub volume_set_size: u16,
    pub volume_sequence_number: u16,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    /// Little-endian (type L) path table location
    pub type_l_path_table: u32,
    /// Big-endian (type M) path table location
    pub type_m_path_table: u32,
    pub root: DirectoryRecord,
}

impl VolumeDescriptor {
    /// Decodes a primary or supplementary descriptor block
    pub fn parse(block: &[u8]) -> FsResult<Self> {
        if block.len() < DESCRIPTOR_SIZE || &block[1..6] != STANDARD_ID {
            return Err(FsError::InvalidFsType);
        }
        let kind = DescriptorType::from(block[0]);
        if !matches!(kind, DescriptorType::Primary | DescriptorType::Supplementary) {
            return Err(FsError::InvalidFsType);
        }

        let joliet = kind == DescriptorType::Supplementary
            && JOLIET_ESCAPES.iter().any(|escape| &block[88..91] == *escape);
        let logical_block_size = both_u16(block, 128);
        if logical_block_size < 512 || !logical_block_size.is_power_of_two() {
            return Err(FsError::InvalidFsType);
        }
        let root = DirectoryRecord::parse(&block[156..190]).ok_or(FsError::InvalidFsType)?;

        Ok(Self {
            raw: block[..DESCRIPTOR_SIZE].to_vec(),
            kind,
            joliet,
            volume_space_size: both_u32(block, 80),
            volume_set_size: both_u16(block, 120),
            volume_sequence_number: both_u16(block, 124),
            logical_block_size,
            path_table_size: both_u32(block, 132),
            type_l_path_table: u32::from_le_bytes([block[140], block[141], block[142], block[143]]),
            type_m_path_table: u32::from_be_bytes([block[148], block[149], block[150], block[151]]),
            root,
        })
    }

    fn field(kind: VolumeString) -> Option<core::ops::Range<usize>> {
        Some(match kind {
            VolumeString::System => 8..40,
            VolumeString::Label => 40..72,
            VolumeString::VolumeSet => 190..318,
            VolumeString::Publisher => 318..446,
            VolumeString::Preparer => 446..574,
            VolumeString::Application => 574..702,
            VolumeString::CopyrightFile => 702..739,
            VolumeString::AbstractFile => 739..776,
            VolumeString::BibliographyFile => 776..813,
            VolumeString::Serial => return None,
        })
    }

    /// Text field with trailing padding removed
    pub fn text(&self, kind: VolumeString) -> FsResult<String> {
        let range = Self::field(kind).ok_or(FsError::NotSupported)?;
        let bytes = &self.raw[range];
        let text = if self.joliet {
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|ch| ch.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect::<String>()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(String::from(text.trim_end_matches([' ', '\0'])))
    }

    pub fn timestamp(&self, kind: VolumeTimestamp) -> FsResult<Timestamp> {
        let offset = match kind {
            VolumeTimestamp::Created => 813,
            VolumeTimestamp::Modified => 830,
            VolumeTimestamp::Expires => 847,
            VolumeTimestamp::Effective => 864,
        };
        decode_volume_date(&self.raw[offset..offset + 17]).ok_or(FsError::NotFound)
    }
}
