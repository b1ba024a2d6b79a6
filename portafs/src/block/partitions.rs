//! # Partition Table Support
//!
//! Support for reading disk partition tables and slicing a drive into
//! partition views.
//!
//! ## Supported Formats
//!
//! - **MBR**: Master Boot Record (legacy, four primary entries)
//! - **GPT**: GUID Partition Table, CRC32-validated header and entry array
//!
//! ## Design
//!
//! A [`Partition`] is a window onto a shared drive that transparently
//! remaps sector addresses. Filesystems address sectors relative to the
//! partition start and never see the rest of the drive.
//!
//! On-disk structures are decoded field by field at fixed offsets with
//! explicit little-endian reads; nothing is reinterpreted in place.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use portafs_crypto::Crc32;

use super::{BlockError, Drive, DriveInfo};

/// Partition type GUIDs (GPT)
pub mod gpt_types {
    /// Unused entry
    pub const UNUSED: u128 = 0;
    /// EFI System Partition
    pub const EFI_SYSTEM: u128 = 0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B;
    /// Microsoft Basic Data
    pub const MICROSOFT_BASIC_DATA: u128 = 0xEBD0A0A2_B9E5_4433_87C0_68B6B72699C7;
    /// Linux Filesystem
    pub const LINUX_FILESYSTEM: u128 = 0x0FC63DAF_8483_4772_8E79_3D69D8477DE4;
    /// Linux Swap
    pub const LINUX_SWAP: u128 = 0x0657FD6D_A4AB_43C4_84E5_0933C84B4F4F;
}

/// Partition type IDs (MBR)
pub mod mbr_types {
    /// Empty
    pub const EMPTY: u8 = 0x00;
    /// FAT12
    pub const FAT12: u8 = 0x01;
    /// FAT16 < 32MB
    pub const FAT16_SMALL: u8 = 0x04;
    /// Extended partition
    pub const EXTENDED: u8 = 0x05;
    /// FAT16 >= 32MB
    pub const FAT16: u8 = 0x06;
    /// NTFS/exFAT
    pub const NTFS: u8 = 0x07;
    /// FAT32
    pub const FAT32: u8 = 0x0B;
    /// FAT32 (LBA)
    pub const FAT32_LBA: u8 = 0x0C;
    /// FAT16 (LBA)
    pub const FAT16_LBA: u8 = 0x0E;
    /// Extended (LBA)
    pub const EXTENDED_LBA: u8 = 0x0F;
    /// Linux Native
    pub const LINUX: u8 = 0x83;
    /// EFI System Partition
    pub const EFI_SYSTEM: u8 = 0xEF;
    /// GPT Protective MBR
    pub const GPT_PROTECTIVE: u8 = 0xEE;
}

/// Boot sector signature, stored little-endian at offset 510
pub const BOOT_SIGNATURE: u16 = 0xAA55;

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const GPT_MIN_HEADER_SIZE: usize = 92;
const GPT_MIN_ENTRY_SIZE: usize = 128;
const GPT_MAX_ENTRY_SIZE: usize = 4096;
const GPT_MAX_ENTRIES: usize = 1024;
const GPT_NAME_UNITS: usize = 36;

/// One row of a partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Partition number (1-based, table order)
    pub number: u32,
    /// First sector (LBA)
    pub lba_start: u64,
    /// Last sector (LBA, inclusive)
    pub lba_end: u64,
    /// Partition type (for MBR)
    pub mbr_type: u8,
    /// Partition type GUID (for GPT)
    pub gpt_type: u128,
    /// Unique partition GUID (for GPT)
    pub unique_guid: u128,
    /// Partition name (GPT name field, or the MBR type name)
    pub name: String,
    /// Whether this is a bootable partition
    pub bootable: bool,
    /// Raw attribute bits
    pub flags: u64,
}

impl PartitionEntry {
    /// Returns partition size in sectors
    pub fn sector_count(&self) -> u64 {
        self.lba_end - self.lba_start + 1
    }

    /// Returns partition type as string
    pub fn type_name(&self) -> &'static str {
        if self.gpt_type != 0 {
            match self.gpt_type {
                gpt_types::EFI_SYSTEM => "EFI System",
                gpt_types::LINUX_FILESYSTEM => "Linux Filesystem",
                gpt_types::LINUX_SWAP => "Linux Swap",
                gpt_types::MICROSOFT_BASIC_DATA => "Microsoft Basic Data",
                _ => "Unknown GPT",
            }
        } else {
            mbr_type_name(self.mbr_type)
        }
    }
}

fn mbr_type_name(kind: u8) -> &'static str {
    match kind {
        mbr_types::FAT12 => "FAT12",
        mbr_types::FAT16_SMALL | mbr_types::FAT16 | mbr_types::FAT16_LBA => "FAT16",
        mbr_types::FAT32 | mbr_types::FAT32_LBA => "FAT32",
        mbr_types::NTFS => "NTFS",
        mbr_types::LINUX => "Linux",
        mbr_types::EFI_SYSTEM => "EFI System",
        mbr_types::GPT_PROTECTIVE => "GPT Protective",
        mbr_types::EXTENDED | mbr_types::EXTENDED_LBA => "Extended",
        _ => "Unknown",
    }
}

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTableType {
    /// No partition table found
    None,
    /// Master Boot Record
    Mbr,
    /// GUID Partition Table
    Gpt,
}

/// Result of parsing a partition table
#[derive(Debug, Clone)]
pub struct PartitionTable {
    /// Table type
    pub table_type: PartitionTableType,
    /// Entries in table order
    pub entries: Vec<PartitionEntry>,
    /// Disk GUID (for GPT)
    pub disk_guid: u128,
}

impl PartitionTable {
    /// Iterates partitions in table order
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Field Decoding
// ============================================================================

fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Converts an on-disk GUID to its textual numeric value.
///
/// The first three groups are stored little-endian, the last two as bytes.
pub fn guid_from_bytes(bytes: &[u8]) -> u128 {
    let d1 = le_u32(bytes, 0) as u128;
    let d2 = le_u16(bytes, 4) as u128;
    let d3 = le_u16(bytes, 6) as u128;
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&bytes[8..16]);
    (d1 << 96) | (d2 << 80) | (d3 << 64) | u64::from_be_bytes(tail) as u128
}

/// Decodes a NUL-terminated UTF-16LE name field.
fn decode_utf16_name(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take(GPT_NAME_UNITS)
        .take_while(|&unit| unit != 0);
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Reads `count` sectors at `lba`, treating a short transfer as an I/O error.
fn read_exact(drive: &dyn Drive, lba: u64, buffer: &mut [u8], sector_size: usize) -> Result<(), BlockError> {
    let wanted = buffer.len() / sector_size;
    let got = drive.read_sectors(lba, buffer)?;
    if got != wanted {
        return Err(BlockError::IoError);
    }
    Ok(())
}

// ============================================================================
// MBR Parsing
// ============================================================================

/// Parses an MBR partition table
fn parse_mbr(sector: &[u8]) -> Option<Vec<PartitionEntry>> {
    if sector.len() < 512 || le_u16(sector, 510) != BOOT_SIGNATURE {
        return None;
    }

    let mut partitions = Vec::new();

    // Four 16-byte entries starting at offset 446
    for i in 0..4 {
        let entry = &sector[446 + i * 16..446 + (i + 1) * 16];
        let kind = entry[4];
        let start = le_u32(entry, 8) as u64;
        let size = le_u32(entry, 12) as u64;

        if kind != mbr_types::EMPTY && size > 0 {
            partitions.push(PartitionEntry {
                number: (i + 1) as u32,
                lba_start: start,
                lba_end: start + size - 1,
                mbr_type: kind,
                gpt_type: 0,
                unique_guid: 0,
                name: String::from(mbr_type_name(kind)),
                bootable: entry[0] == 0x80,
                flags: 0,
            });
        }
    }

    Some(partitions)
}

// ============================================================================
// GPT Parsing
// ============================================================================

/// Decoded GPT header fields
#[derive(Debug, Clone, Copy)]
struct GptHeader {
    header_size: usize,
    header_crc32: u32,
    disk_guid: u128,
    entries_lba: u64,
    entry_count: usize,
    entry_size: usize,
    entries_crc32: u32,
}

impl GptHeader {
    fn parse(sector: &[u8]) -> Result<Self, BlockError> {
        if &sector[0..8] != GPT_SIGNATURE {
            log::warn!("[gpt] header signature missing");
            return Err(BlockError::Corrupted);
        }
        let header = Self {
            header_size: le_u32(sector, 12) as usize,
            header_crc32: le_u32(sector, 16),
            disk_guid: guid_from_bytes(&sector[56..72]),
            entries_lba: le_u64(sector, 72),
            entry_count: le_u32(sector, 80) as usize,
            entry_size: le_u32(sector, 84) as usize,
            entries_crc32: le_u32(sector, 88),
        };

        if header.header_size < GPT_MIN_HEADER_SIZE || header.header_size > sector.len() {
            log::warn!("[gpt] bad header size {}", header.header_size);
            return Err(BlockError::Corrupted);
        }

        // CRC is computed with its own field zeroed
        let mut crc = Crc32::new();
        crc.update(&sector[..16]);
        crc.update(&[0u8; 4]);
        crc.update(&sector[20..header.header_size]);
        if crc.finalize() != header.header_crc32 {
            log::warn!("[gpt] header CRC mismatch");
            return Err(BlockError::Corrupted);
        }

        if header.entry_size < GPT_MIN_ENTRY_SIZE
            || header.entry_size > GPT_MAX_ENTRY_SIZE
            || header.entry_size % 8 != 0
            || header.entry_count > GPT_MAX_ENTRIES
        {
            log::warn!(
                "[gpt] unsupported entry layout: {} entries of {} bytes",
                header.entry_count,
                header.entry_size
            );
            return Err(BlockError::Corrupted);
        }

        Ok(header)
    }
}

/// Decodes one 128-byte (or larger) GPT entry
fn parse_gpt_entry(number: u32, raw: &[u8]) -> PartitionEntry {
    let flags = le_u64(raw, 48);
    PartitionEntry {
        number,
        lba_start: le_u64(raw, 32),
        lba_end: le_u64(raw, 40),
        mbr_type: 0,
        gpt_type: guid_from_bytes(&raw[0..16]),
        unique_guid: guid_from_bytes(&raw[16..32]),
        name: decode_utf16_name(&raw[56..128]),
        bootable: flags & 0x04 != 0,
        flags,
    }
}

/// Parses a GPT whose header lives at `header_lba`
fn parse_gpt(drive: &dyn Drive, info: &DriveInfo, header_lba: u64) -> Result<PartitionTable, BlockError> {
    let sector_size = info.sector_size;
    let mut header_sector = vec![0u8; sector_size];
    read_exact(drive, header_lba, &mut header_sector, sector_size)?;
    let header = GptHeader::parse(&header_sector)?;

    let table_bytes = header
        .entry_count
        .checked_mul(header.entry_size)
        .ok_or(BlockError::Corrupted)?;
    let sectors_needed = table_bytes.div_ceil(sector_size);
    // The entry array must lie on the drive before it is buffered
    let fits = header
        .entries_lba
        .checked_add(sectors_needed as u64)
        .is_some_and(|end| end <= info.sector_count);
    if !fits {
        log::warn!(
            "[gpt] entry array at LBA {} ({} sectors) runs past end of drive",
            header.entries_lba,
            sectors_needed
        );
        return Err(BlockError::Corrupted);
    }
    let mut entry_buffer = vec![0u8; sectors_needed * sector_size];
    read_exact(drive, header.entries_lba, &mut entry_buffer, sector_size)?;

    if Crc32::checksum_bytes(&entry_buffer[..table_bytes]) != header.entries_crc32 {
        log::warn!("[gpt] partition entry array CRC mismatch");
    }

    let mut entries = Vec::new();
    for (i, raw) in entry_buffer[..table_bytes]
        .chunks_exact(header.entry_size)
        .enumerate()
    {
        // The table ends at the first unused slot
        if raw[0..16].iter().all(|&b| b == 0) {
            break;
        }
        let entry = parse_gpt_entry((i + 1) as u32, raw);
        if entry.lba_end < entry.lba_start || entry.lba_end >= info.sector_count {
            log::warn!(
                "[gpt] entry {} spans invalid range {}..={}",
                entry.number,
                entry.lba_start,
                entry.lba_end
            );
            return Err(BlockError::Corrupted);
        }
        entries.push(entry);
    }

    log::info!("[gpt] found {} partition(s)", entries.len());

    Ok(PartitionTable {
        table_type: PartitionTableType::Gpt,
        entries,
        disk_guid: header.disk_guid,
    })
}

// ============================================================================
// Partition Discovery
// ============================================================================

/// Reads and parses the partition table from a drive
///
/// A protective MBR (a single entry of type `0xEE`) selects the GPT, whose
/// header is read from the LBA that entry points at. A GPT that fails
/// validation is reported as [`BlockError::Corrupted`].
pub fn read_partition_table(drive: &dyn Drive) -> Result<PartitionTable, BlockError> {
    let info = drive.info();
    if info.sector_size < 512 {
        return Err(BlockError::InvalidSize);
    }

    let mut sector0 = vec![0u8; info.sector_size];
    read_exact(drive, 0, &mut sector0, info.sector_size)?;

    let Some(mbr_parts) = parse_mbr(&sector0) else {
        return Ok(PartitionTable {
            table_type: PartitionTableType::None,
            entries: Vec::new(),
            disk_guid: 0,
        });
    };

    if mbr_parts.len() == 1 && mbr_parts[0].mbr_type == mbr_types::GPT_PROTECTIVE {
        return parse_gpt(drive, &info, mbr_parts[0].lba_start);
    }

    log::info!("[mbr] found {} partition(s)", mbr_parts.len());
    Ok(PartitionTable {
        table_type: PartitionTableType::Mbr,
        entries: mbr_parts,
        disk_guid: 0,
    })
}

// ============================================================================
// Partition View
// ============================================================================

/// A contiguous sector range of a shared drive
///
/// Sector numbers passed to [`Partition::read_sectors`] are relative to
/// `lba_start`; transfers are clamped at `lba_end`.
#[derive(Clone)]
pub struct Partition {
    drive: Arc<dyn Drive>,
    /// First sector (absolute LBA)
    pub lba_start: u64,
    /// Last sector (absolute LBA, inclusive)
    pub lba_end: u64,
    /// Partition name
    pub name: String,
}

impl Partition {
    /// Creates a partition view over `lba_start..=lba_end`
    pub fn new(drive: Arc<dyn Drive>, lba_start: u64, lba_end: u64, name: &str) -> Self {
        Self {
            drive,
            lba_start,
            lba_end,
            name: String::from(name),
        }
    }

    /// Treats the whole drive as a single partition
    pub fn whole(drive: Arc<dyn Drive>) -> Self {
        let info = drive.info();
        let lba_end = info.lba_max().unwrap_or(0);
        Self::new(drive, 0, lba_end, &info.name)
    }

    /// Opens the partition described by a table entry
    pub fn from_entry(drive: Arc<dyn Drive>, entry: &PartitionEntry) -> Self {
        Self::new(drive, entry.lba_start, entry.lba_end, &entry.name)
    }

    pub fn drive(&self) -> &Arc<dyn Drive> {
        &self.drive
    }

    pub fn info(&self) -> DriveInfo {
        self.drive.info()
    }

    pub fn sector_size(&self) -> usize {
        self.drive.info().sector_size
    }

    pub fn sector_count(&self) -> u64 {
        self.lba_end - self.lba_start + 1
    }

    pub fn is_read_only(&self) -> bool {
        self.drive.info().read_only
    }

    /// Number of sectors of `len` bytes that fit before `lba_end`
    fn clamp(&self, lba: u64, len: usize, sector_size: usize) -> usize {
        if sector_size == 0 {
            return 0;
        }
        let requested = (len / sector_size) as u64;
        self.sector_count().saturating_sub(lba).min(requested) as usize
    }

    /// Reads sectors at a partition-relative LBA
    pub fn read_sectors(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, BlockError> {
        let sector_size = self.sector_size();
        let count = self.clamp(lba, buffer.len(), sector_size);
        if count == 0 {
            return Ok(0);
        }
        self.drive
            .read_sectors(self.lba_start + lba, &mut buffer[..count * sector_size])
    }

    /// Writes sectors at a partition-relative LBA
    pub fn write_sectors(&self, lba: u64, buffer: &[u8]) -> Result<usize, BlockError> {
        let sector_size = self.sector_size();
        let count = self.clamp(lba, buffer.len(), sector_size);
        if count == 0 {
            return Ok(0);
        }
        self.drive
            .write_sectors(self.lba_start + lba, &buffer[..count * sector_size])
    }

    pub fn flush(&self) -> Result<(), BlockError> {
        self.drive.flush()
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("drive", &self.drive.info().name)
            .field("lba_start", &self.lba_start)
            .field("lba_end", &self.lba_end)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDrive;

    fn mbr_with(entries: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut sector = vec![0u8; 512];
        for (i, &(kind, start, size)) in entries.iter().enumerate() {
            let off = 446 + i * 16;
            sector[off + 4] = kind;
            sector[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
            sector[off + 12..off + 16].copy_from_slice(&size.to_le_bytes());
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    #[test]
    fn test_mbr_signature() {
        let mut sector = [0u8; 512];
        sector[510] = 0x55;
        sector[511] = 0xAA;

        let result = parse_mbr(&sector);
        assert_eq!(result.map(|p| p.len()), Some(0));
        assert!(parse_mbr(&[0u8; 512]).is_none());
    }

    #[test]
    fn test_mbr_entries() {
        let parts = parse_mbr(&mbr_with(&[(mbr_types::FAT32_LBA, 2048, 4096)])).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].lba_start, 2048);
        assert_eq!(parts[0].lba_end, 6143);
        assert_eq!(parts[0].sector_count(), 4096);
        assert_eq!(parts[0].type_name(), "FAT32");
    }

    #[test]
    fn test_guid_mixed_endian() {
        let raw = [
            0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26,
            0x99, 0xC7,
        ];
        assert_eq!(guid_from_bytes(&raw), gpt_types::MICROSOFT_BASIC_DATA);
    }

    #[test]
    fn test_utf16_name() {
        let mut raw = [0u8; 72];
        for (i, b) in "Data".bytes().enumerate() {
            raw[i * 2] = b;
        }
        assert_eq!(decode_utf16_name(&raw), "Data");
    }

    #[test]
    fn test_protective_mbr_without_gpt_is_corrupted() {
        let mut image = mbr_with(&[(mbr_types::GPT_PROTECTIVE, 1, 63)]);
        image.resize(64 * 512, 0);
        let drive = MemDrive::new(image, 512);
        assert_eq!(
            read_partition_table(&drive).map(|t| t.len()),
            Err(BlockError::Corrupted)
        );
    }

    #[test]
    fn test_no_table() {
        let drive = MemDrive::zeroed(8, 512);
        let table = read_partition_table(&drive).unwrap();
        assert_eq!(table.table_type, PartitionTableType::None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_partition_view_remaps_and_clamps() {
        let mut image = vec![0u8; 16 * 512];
        image[4 * 512] = 0x11;
        image[7 * 512] = 0x77;
        let drive: Arc<dyn Drive> = Arc::new(MemDrive::new(image, 512));
        let part = Partition::new(drive, 4, 7, "p1");
        assert_eq!(part.sector_count(), 4);

        let mut buf = vec![0u8; 512];
        assert_eq!(part.read_sectors(0, &mut buf), Ok(1));
        assert_eq!(buf[0], 0x11);

        let mut big = vec![0u8; 4 * 512];
        assert_eq!(part.read_sectors(2, &mut big), Ok(2));
        assert_eq!(big[512], 0x77);
        assert_eq!(part.read_sectors(4, &mut buf), Ok(0));
    }

    #[test]
    fn test_whole_drive_partition() {
        let drive: Arc<dyn Drive> = Arc::new(MemDrive::zeroed(32, 512).with_name("disk"));
        let part = Partition::whole(drive);
        assert_eq!((part.lba_start, part.lba_end), (0, 31));
        assert_eq!(part.name, "disk");
    }
}
