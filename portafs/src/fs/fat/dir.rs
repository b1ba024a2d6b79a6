//! Directory entry decoding and iteration.
//!
//! A directory is a run of blocks holding 32-byte entries: the fixed root
//! region of FAT12/16 (sector blocks) or a cluster chain (cluster blocks).
//! Long-name fragments precede the short entry they belong to, last
//! fragment first.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::fs::cache::BlockKey;
use crate::fs::vfs::{DirIter, FileAttributes, FileInfo, FileType, FsError, FsResult};
use crate::time::Timestamp;

use super::bpb::{le_u16, le_u32, FatType};
use super::name::{self, LFN_MAX, SFN_LEN};
use super::{table, FatVolume};

const ENTRY_SIZE: usize = 32;

/// First-byte markers
const ENTRY_END: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

/// LFN sequence byte: last (first stored) fragment
const LFN_LAST: u8 = 0x40;
const LFN_SEQ_MASK: u8 = 0x1F;
const LFN_UNITS_PER_ENTRY: usize = 13;
/// Byte offsets of the 13 UTF-16 units in an LFN entry
const LFN_UNIT_OFFSETS: [usize; LFN_UNITS_PER_ENTRY] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
const LFN_MAX_FRAGMENTS: usize = LFN_MAX.div_ceil(LFN_UNITS_PER_ENTRY);

bitflags! {
    /// On-disk attribute byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FatAttr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

impl FatAttr {
    fn is_long_name(&self) -> bool {
        self.bits() & 0x3F == Self::LONG_NAME.bits()
    }

    fn to_attributes(self) -> FileAttributes {
        let mut attributes = FileAttributes::empty();
        if self.contains(FatAttr::READ_ONLY) {
            attributes |= FileAttributes::IMMUTABLE;
        }
        if self.contains(FatAttr::HIDDEN) {
            attributes |= FileAttributes::HIDDEN;
        }
        if self.contains(FatAttr::SYSTEM) {
            attributes |= FileAttributes::SYSTEM;
        }
        attributes
    }
}

// ============================================================================
// Short entries
// ============================================================================

/// A decoded 32-byte short entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RawDirEntry {
    pub name: [u8; SFN_LEN],
    pub attr: FatAttr,
    pub create_tenths: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub cluster_high: u16,
    pub modify_time: u16,
    pub modify_date: u16,
    pub cluster_low: u16,
    pub size: u32,
}

impl RawDirEntry {
    pub fn parse(bytes: &[u8; ENTRY_SIZE]) -> Self {
        let mut name = [0u8; SFN_LEN];
        name.copy_from_slice(&bytes[..SFN_LEN]);
        Self {
            name,
            attr: FatAttr::from_bits_retain(bytes[11]),
            create_tenths: bytes[13],
            create_time: le_u16(bytes, 14),
            create_date: le_u16(bytes, 16),
            access_date: le_u16(bytes, 18),
            cluster_high: le_u16(bytes, 20),
            modify_time: le_u16(bytes, 22),
            modify_date: le_u16(bytes, 24),
            cluster_low: le_u16(bytes, 26),
            size: le_u32(bytes, 28),
        }
    }

    /// First cluster; the high half only exists on FAT32
    pub fn cluster(&self, fat_type: FatType) -> u32 {
        match fat_type {
            FatType::Fat32 => ((self.cluster_high as u32) << 16) | self.cluster_low as u32,
            FatType::Fat12 | FatType::Fat16 => self.cluster_low as u32,
        }
    }

    pub fn created(&self) -> Option<Timestamp> {
        let mut stamp = decode_timestamp(self.create_date, self.create_time)?;
        stamp.second += self.create_tenths / 100;
        stamp.nanosecond = (self.create_tenths % 100) as u32 * 10_000_000;
        Some(stamp)
    }

    pub fn modified(&self) -> Option<Timestamp> {
        decode_timestamp(self.modify_date, self.modify_time)
    }

    pub fn accessed(&self) -> Option<Timestamp> {
        decode_timestamp(self.access_date, 0)
    }

    fn info(&self, name: Vec<u8>, fat_type: FatType) -> FileInfo {
        let file_type = if self.attr.contains(FatAttr::DIRECTORY) {
            FileType::Directory
        } else {
            FileType::File
        };
        FileInfo {
            name,
            file_type,
            attributes: self.attr.to_attributes(),
            size: self.size as u64,
            created: self.created(),
            modified: self.modified(),
            accessed: self.accessed(),
            location: self.cluster(fat_type) as u64,
        }
    }
}

/// Decodes a packed date/time pair; a zero date means "not recorded".
pub(super) fn decode_timestamp(date: u16, time: u16) -> Option<Timestamp> {
    if date == 0 {
        return None;
    }
    Some(Timestamp::new(
        1980 + (date >> 9),
        ((date >> 5) & 0x0F) as u8,
        (date & 0x1F) as u8,
        (time >> 11) as u8,
        ((time >> 5) & 0x3F) as u8,
        ((time & 0x1F) * 2) as u8,
    ))
}

// ============================================================================
// Long names
// ============================================================================

/// Collects LFN fragments until the matching short entry shows up.
struct LfnAssembler {
    units: [u16; LFN_MAX_FRAGMENTS * LFN_UNITS_PER_ENTRY],
    checksum: u8,
    fragments: usize,
    /// Sequence number expected next, 0 once complete
    expected: u8,
    active: bool,
}

impl LfnAssembler {
    fn new() -> Self {
        Self {
            units: [0xFFFF; LFN_MAX_FRAGMENTS * LFN_UNITS_PER_ENTRY],
            checksum: 0,
            fragments: 0,
            expected: 0,
            active: false,
        }
    }

    fn reset(&mut self) {
        self.active = false;
    }

    fn push(&mut self, entry: &[u8; ENTRY_SIZE]) {
        let sequence = entry[0];
        let ordinal = sequence & LFN_SEQ_MASK;
        if ordinal == 0 || ordinal as usize > LFN_MAX_FRAGMENTS {
            self.reset();
            return;
        }

        if sequence & LFN_LAST != 0 {
            self.units.fill(0xFFFF);
            self.checksum = entry[13];
            self.fragments = ordinal as usize;
            self.active = true;
        } else if !self.active || ordinal != self.expected || entry[13] != self.checksum {
            self.reset();
            return;
        }

        let base = (ordinal as usize - 1) * LFN_UNITS_PER_ENTRY;
        for (i, &offset) in LFN_UNIT_OFFSETS.iter().enumerate() {
            self.units[base + i] = le_u16(entry, offset);
        }
        self.expected = ordinal - 1;
    }

    /// Completed name for the short entry `sfn`, if the fragments belong to it
    fn finish(&mut self, sfn: &[u8; SFN_LEN]) -> Option<&[u16]> {
        if !self.active {
            return None;
        }
        self.active = false;
        if self.expected != 0 {
            log::warn!("[fat] incomplete long name before {:?}", sfn);
            return None;
        }
        if self.checksum != name::sfn_checksum(sfn) {
            log::warn!("[fat] long name checksum mismatch for {:?}", sfn);
            return None;
        }
        Some(&self.units[..self.fragments * LFN_UNITS_PER_ENTRY])
    }
}

// ============================================================================
// Iteration
// ============================================================================

/// Position inside a directory
#[derive(Debug, Clone, Copy)]
pub(super) struct DirCursor {
    /// Blocks consumed so far
    pub block: u32,
    /// Current cluster, 0 for the fixed root region
    pub cluster: u32,
    /// Next entry index inside the block
    pub entry: usize,
    pub done: bool,
}

impl DirCursor {
    pub fn new(cluster: u32) -> Self {
        Self {
            block: 0,
            cluster,
            entry: 0,
            done: false,
        }
    }

    pub fn from_iter(iter: &DirIter) -> Self {
        Self {
            block: iter.block,
            cluster: iter.cluster,
            entry: iter.offset,
            done: iter.done,
        }
    }

    pub fn store(&self, iter: &mut DirIter) {
        iter.block = self.block;
        iter.cluster = self.cluster;
        iter.offset = self.entry;
        iter.done = self.done;
    }

    fn in_root_region(&self) -> bool {
        self.cluster == 0
    }
}

impl FatVolume {
    /// Next raw entry, `None` at the end marker or the end of the directory
    fn next_raw(&mut self, cursor: &mut DirCursor) -> FsResult<Option<[u8; ENTRY_SIZE]>> {
        if cursor.done {
            return Ok(None);
        }

        let geom = self.io.geom();
        let per_block = if cursor.in_root_region() {
            geom.sector_size / ENTRY_SIZE
        } else {
            geom.cluster_size / ENTRY_SIZE
        };

        if cursor.entry >= per_block {
            cursor.entry = 0;
            cursor.block += 1;
            if cursor.in_root_region() {
                if cursor.block >= geom.root_sector_count {
                    cursor.done = true;
                    return Ok(None);
                }
            } else {
                if cursor.block >= geom.cluster_count {
                    cursor.done = true;
                    log::warn!("[fat] directory chain longer than the volume, cut off");
                    return Err(FsError::InvalidCluster);
                }
                match table::next_cluster(&mut self.cache, &self.io, cursor.cluster)? {
                    Some(next) => cursor.cluster = next,
                    None => {
                        cursor.done = true;
                        return Ok(None);
                    }
                }
            }
        }

        let key = if cursor.in_root_region() {
            if self.io.geom().root_sector_count == 0 {
                cursor.done = true;
                return Ok(None);
            }
            BlockKey::sector(self.io.geom().root_region_sector(cursor.block))
        } else {
            BlockKey::cluster(cursor.cluster)
        };
        let slot = self.cache.read(&self.io, key)?;
        let start = cursor.entry * ENTRY_SIZE;
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(&self.cache.data(slot)[start..start + ENTRY_SIZE]);
        cursor.entry += 1;

        if raw[0] == ENTRY_END {
            cursor.done = true;
            return Ok(None);
        }
        Ok(Some(raw))
    }

    /// Next listable entry: files, directories, `.` and `..`
    pub(super) fn next_entry(&mut self, cursor: &mut DirCursor) -> FsResult<Option<FileInfo>> {
        let mut lfn = LfnAssembler::new();
        let fat_type = self.io.geom().fat_type;

        while let Some(raw) = self.next_raw(cursor)? {
            if raw[0] == ENTRY_DELETED {
                lfn.reset();
                continue;
            }
            let attr = FatAttr::from_bits_retain(raw[11]);
            if attr.is_long_name() {
                if self.options.lfn_enabled {
                    lfn.push(&raw);
                }
                continue;
            }
            if attr.contains(FatAttr::VOLUME_ID) {
                lfn.reset();
                continue;
            }

            let entry = RawDirEntry::parse(&raw);
            let name = match lfn.finish(&entry.name) {
                Some(units) => name::lfn_display(
                    units,
                    self.options.unicode_enabled,
                    self.options.unknown_char_fallback,
                ),
                None => name::sfn_display(&entry.name, self.options.sfn_lowercase),
            };
            return Ok(Some(entry.info(name, fat_type)));
        }
        Ok(None)
    }

    /// Scans a directory for the volume-label pseudo entry
    pub(super) fn find_volume_label(&mut self, cursor: &mut DirCursor) -> FsResult<Option<FileInfo>> {
        let fat_type = self.io.geom().fat_type;
        while let Some(raw) = self.next_raw(cursor)? {
            let attr = FatAttr::from_bits_retain(raw[11]);
            if raw[0] == ENTRY_DELETED || attr.is_long_name() || !attr.contains(FatAttr::VOLUME_ID) {
                continue;
            }
            let entry = RawDirEntry::parse(&raw);
            return Ok(Some(entry.info(entry.name.to_vec(), fat_type)));
        }
        Ok(None)
    }
}
