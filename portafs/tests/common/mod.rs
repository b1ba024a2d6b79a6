//! # Test Fixtures
//!
//! In-memory disk images shared by the integration tests:
//! - hand-built FAT volumes with an exact cluster count
//! - FAT volumes formatted and populated by the `fatfs` crate
//! - ISO9660 images with optional Joliet and Rock Ridge trees
//! - GPT-partitioned drives

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use portafs::{FatType, FileSystem, MemDrive, Partition, Timestamp};

pub const SECTOR: usize = 512;

pub fn partition(bytes: Vec<u8>, sector_size: usize) -> Partition {
    Partition::whole(Arc::new(MemDrive::new(bytes, sector_size)))
}

/// Reads a whole file through the element API.
pub fn read_all<F: FileSystem>(fs: &mut F, file: portafs::FileHandle) -> Vec<u8> {
    let size = fs.file_size(file).unwrap() as usize;
    let mut data = vec![0u8; size];
    if size > 0 {
        assert_eq!(fs.file_read(file, &mut data, 1, size), Ok(size));
    }
    data
}

/// Names of every entry in `dir`, in on-disk order.
pub fn list<F: FileSystem>(fs: &mut F, dir: portafs::DirHandle) -> Vec<String> {
    let mut iter = fs.dir_iter_start(dir).unwrap();
    let mut names = Vec::new();
    while fs.dir_iter_next(&mut iter).unwrap() {
        names.push(String::from_utf8_lossy(iter.name().unwrap()).into_owned());
    }
    fs.dir_iter_end(iter);
    names
}

// ============================================================================
// Hand-built FAT volumes
// ============================================================================

/// FAT volume with one-sector clusters and an exact cluster count.
///
/// Only the metadata area and the clusters actually written are backed by
/// bytes, so volumes near the FAT32 threshold stay small.
pub struct FatImage {
    pub bytes: Vec<u8>,
    pub fat_type: FatType,
    pub cluster_count: u32,
    reserved: usize,
    fat_size: usize,
    root_sectors: usize,
}

impl FatImage {
    pub fn new(cluster_count: u32) -> Self {
        let fat_type = if cluster_count < 4085 {
            FatType::Fat12
        } else if cluster_count < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };
        let entries = cluster_count as usize + 2;
        let fat_bytes = match fat_type {
            FatType::Fat12 => (entries * 3).div_ceil(2),
            FatType::Fat16 => entries * 2,
            FatType::Fat32 => entries * 4,
        };
        let fat_size = fat_bytes.div_ceil(SECTOR);
        let (reserved, root_entries) = match fat_type {
            FatType::Fat32 => (32, 0),
            _ => (1, 512),
        };
        let root_sectors = root_entries * 32 / SECTOR;
        let total = reserved + 2 * fat_size + root_sectors + cluster_count as usize;

        let mut boot = vec![0u8; SECTOR];
        boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        boot[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
        boot[16] = 2;
        boot[17..19].copy_from_slice(&(root_entries as u16).to_le_bytes());
        if total < 0x10000 && fat_type != FatType::Fat32 {
            boot[19..21].copy_from_slice(&(total as u16).to_le_bytes());
        } else {
            boot[32..36].copy_from_slice(&(total as u32).to_le_bytes());
        }
        boot[21] = 0xF8;
        let ebr = if fat_type == FatType::Fat32 {
            boot[36..40].copy_from_slice(&(fat_size as u32).to_le_bytes());
            boot[44..48].copy_from_slice(&2u32.to_le_bytes());
            boot[48..50].copy_from_slice(&1u16.to_le_bytes());
            64
        } else {
            boot[22..24].copy_from_slice(&(fat_size as u16).to_le_bytes());
            36
        };
        boot[ebr] = 0x80;
        boot[ebr + 2] = 0x29;
        boot[ebr + 3..ebr + 7].copy_from_slice(&0x1234_ABCDu32.to_le_bytes());
        boot[ebr + 7..ebr + 18].copy_from_slice(b"BOUNDARY   ");
        boot[ebr + 18..ebr + 26].copy_from_slice(b"FAT     ");
        boot[510] = 0x55;
        boot[511] = 0xAA;

        let mut image = Self {
            bytes: boot,
            fat_type,
            cluster_count,
            reserved,
            fat_size,
            root_sectors,
        };
        image.bytes.resize(image.data_begin() * SECTOR + SECTOR, 0);

        if fat_type == FatType::Fat32 {
            let fsinfo = &mut image.bytes[SECTOR..2 * SECTOR];
            fsinfo[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
            fsinfo[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
            fsinfo[488..492].copy_from_slice(&(cluster_count - 1).to_le_bytes());
            fsinfo[492..496].copy_from_slice(&3u32.to_le_bytes());
            fsinfo[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
        }

        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, 0x0FFF_FFFF);
        if fat_type == FatType::Fat32 {
            image.set_fat(2, 0x0FFF_FFFF);
        }
        image
    }

    /// First sector of the fixed root region (FAT12/16)
    fn root_begin(&self) -> usize {
        self.reserved + 2 * self.fat_size
    }

    /// First sector of cluster 2
    fn data_begin(&self) -> usize {
        self.root_begin() + self.root_sectors
    }

    fn end_of_chain(&self) -> u32 {
        match self.fat_type {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    fn reserve(&mut self, end: usize) {
        if self.bytes.len() < end {
            self.bytes.resize(end.div_ceil(SECTOR) * SECTOR, 0);
        }
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let n = cluster as usize;
        for copy in 0..2 {
            let base = (self.reserved + copy * self.fat_size) * SECTOR;
            match self.fat_type {
                FatType::Fat12 => {
                    let offset = base + n + n / 2;
                    let value = (value & 0xFFF) as u16;
                    let bytes = &mut self.bytes[offset..offset + 2];
                    let old = u16::from_le_bytes([bytes[0], bytes[1]]);
                    let new = if n & 1 == 1 {
                        (old & 0x000F) | (value << 4)
                    } else {
                        (old & 0xF000) | value
                    };
                    bytes.copy_from_slice(&new.to_le_bytes());
                }
                FatType::Fat16 => {
                    let offset = base + n * 2;
                    self.bytes[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
                }
                FatType::Fat32 => {
                    let offset = base + n * 4;
                    self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }

    pub fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, self.end_of_chain());
        }
    }

    pub fn cluster_offset(&self, cluster: u32) -> usize {
        (self.data_begin() + cluster as usize - 2) * SECTOR
    }

    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) {
        let offset = self.cluster_offset(cluster);
        self.reserve(offset + SECTOR);
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Writes `entry` into the root directory (fixed region or cluster 2)
    pub fn root_entry(&mut self, index: usize, entry: &[u8; 32]) {
        let offset = match self.fat_type {
            FatType::Fat32 => self.cluster_offset(2),
            _ => self.root_begin() * SECTOR,
        } + index * 32;
        self.reserve(offset + 32);
        self.bytes[offset..offset + 32].copy_from_slice(entry);
    }

    pub fn dir_entry(&mut self, cluster: u32, index: usize, entry: &[u8; 32]) {
        let offset = self.cluster_offset(cluster) + index * 32;
        self.reserve(offset + 32);
        self.bytes[offset..offset + 32].copy_from_slice(entry);
    }

    /// Stores `data` along `clusters` and links them
    pub fn write_file(&mut self, clusters: &[u32], data: &[u8]) {
        for (&cluster, chunk) in clusters.iter().zip(data.chunks(SECTOR)) {
            self.write_cluster(cluster, chunk);
        }
        self.chain(clusters);
    }

    pub fn partition(&self) -> Partition {
        partition(self.bytes.clone(), SECTOR)
    }
}

pub fn short_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(name);
    entry[11] = attr;
    entry[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    entry[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    // 2021-07-14 10:20:30
    entry[22..24].copy_from_slice(&((10u16 << 11) | (20 << 5) | 15).to_le_bytes());
    entry[24..26].copy_from_slice(&((41u16 << 9) | (7 << 5) | 14).to_le_bytes());
    entry
}

// ============================================================================
// fatfs-formatted volumes
// ============================================================================

/// Time stamped into every entry that `fatfs` writes.
pub const FATFS_NOW: Timestamp = Timestamp::new(2023, 5, 6, 7, 8, 31).with_nanosecond(500_000_000);

#[derive(Debug)]
struct FixedClock;

static FIXED_CLOCK: FixedClock = FixedClock;

impl fatfs::TimeProvider for FixedClock {
    fn get_current_date(&self) -> fatfs::Date {
        self.get_current_date_time().date
    }

    fn get_current_date_time(&self) -> fatfs::DateTime {
        fatfs::DateTime {
            date: fatfs::Date {
                year: FATFS_NOW.year,
                month: FATFS_NOW.month as u16,
                day: FATFS_NOW.day as u16,
            },
            time: fatfs::Time {
                hour: FATFS_NOW.hour as u16,
                min: FATFS_NOW.minute as u16,
                sec: FATFS_NOW.second as u16,
                millis: (FATFS_NOW.nanosecond / 1_000_000) as u16,
            },
        }
    }
}

/// Formats a volume with `fatfs` and writes `files` into it.
///
/// Paths use `/` separators; missing directories are created.
pub fn fatfs_image(size: usize, fat_type: fatfs::FatType, label: &[u8; 11], files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut disk = Cursor::new(vec![0u8; size]);
    fatfs::format_volume(
        &mut disk,
        fatfs::FormatVolumeOptions::new()
            .fat_type(fat_type)
            .volume_label(*label),
    )
    .expect("format_volume failed");
    {
        let options = fatfs::FsOptions::new().time_provider(&FIXED_CLOCK);
        let fs = fatfs::FileSystem::new(&mut disk, options).expect("FileSystem::new failed");
        for (path, content) in files {
            let mut parts: Vec<&str> = path.split('/').collect();
            let file_name = parts.pop().unwrap();
            let mut dir = fs.root_dir();
            for part in parts {
                dir = dir.create_dir(part).expect("create_dir failed");
            }
            if file_name.is_empty() {
                continue;
            }
            let mut file = dir.create_file(file_name).expect("create_file failed");
            file.truncate().unwrap();
            file.write_all(content).unwrap();
        }
    }
    disk.into_inner()
}

// ============================================================================
// ISO9660 images
// ============================================================================

pub const ISO_BLOCK: usize = 2048;

/// ISO9660 image with 2048-byte blocks
pub struct IsoImage {
    pub bytes: Vec<u8>,
}

impl IsoImage {
    /// Primary descriptor at 16 with its root at `root` and a terminator
    /// at `terminator`
    pub fn new(blocks: usize, root: u32, root_size: u32, terminator: usize) -> Self {
        let mut image = Self {
            bytes: vec![0u8; blocks * ISO_BLOCK],
        };
        image.descriptor(16, 1, root, root_size, false);
        image.terminator(terminator);
        image
    }

    /// Writes a primary (1) or supplementary (2) descriptor at `lba`
    pub fn descriptor(&mut self, lba: usize, kind: u8, root: u32, root_size: u32, joliet: bool) {
        let block = &mut self.bytes[lba * ISO_BLOCK..(lba + 1) * ISO_BLOCK];
        block[0] = kind;
        block[1..6].copy_from_slice(b"CD001");
        block[6] = 1;
        let text = |block: &mut [u8], range: std::ops::Range<usize>, value: &str| {
            if joliet {
                let mut units = value.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect::<Vec<u8>>();
                while units.len() < range.len() {
                    units.extend_from_slice(&[0x00, 0x20]);
                }
                block[range.clone()].copy_from_slice(&units[..range.len()]);
            } else {
                block[range.clone()].fill(b' ');
                block[range.start..range.start + value.len()].copy_from_slice(value.as_bytes());
            }
        };
        text(block, 8..40, "PORTAFS");
        text(block, 40..72, if joliet { "Joliet Volume" } else { "PLAIN_VOLUME" });
        text(block, 318..446, "PUBLISHER");
        let blocks = (self.bytes.len() / ISO_BLOCK) as u32;
        let block = &mut self.bytes[lba * ISO_BLOCK..(lba + 1) * ISO_BLOCK];
        block[80..84].copy_from_slice(&blocks.to_le_bytes());
        block[84..88].copy_from_slice(&blocks.to_be_bytes());
        if joliet {
            block[88..91].copy_from_slice(b"%/E");
        }
        block[120..122].copy_from_slice(&1u16.to_le_bytes());
        block[122..124].copy_from_slice(&1u16.to_be_bytes());
        block[124..126].copy_from_slice(&1u16.to_le_bytes());
        block[126..128].copy_from_slice(&1u16.to_be_bytes());
        block[128..130].copy_from_slice(&(ISO_BLOCK as u16).to_le_bytes());
        block[130..132].copy_from_slice(&(ISO_BLOCK as u16).to_be_bytes());
        let root_record = record(&[0], root, root_size, 0x02, &[]);
        block[156..156 + root_record.len()].copy_from_slice(&root_record);
        block[813..830].copy_from_slice(b"2024022911300000\x04");
        block[881] = 1;
    }

    pub fn terminator(&mut self, lba: usize) {
        let block = &mut self.bytes[lba * ISO_BLOCK..(lba + 1) * ISO_BLOCK];
        block.fill(0);
        block[0] = 255;
        block[1..6].copy_from_slice(b"CD001");
        block[6] = 1;
    }

    /// Lays `records` out from block `lba`, moving to the next block
    /// whenever a record would straddle a boundary.
    pub fn directory(&mut self, lba: usize, records: &[Vec<u8>]) {
        let mut offset = lba * ISO_BLOCK;
        for rec in records {
            if offset % ISO_BLOCK + rec.len() > ISO_BLOCK {
                offset = offset.div_ceil(ISO_BLOCK) * ISO_BLOCK;
            }
            self.bytes[offset..offset + rec.len()].copy_from_slice(rec);
            offset += rec.len();
        }
    }

    pub fn data(&mut self, lba: usize, data: &[u8]) {
        self.bytes[lba * ISO_BLOCK..lba * ISO_BLOCK + data.len()].copy_from_slice(data);
    }

    pub fn partition(&self, sector_size: usize) -> Partition {
        partition(self.bytes.clone(), sector_size)
    }
}

/// Encodes a directory record dated 2022-12-31 23:59:58
pub fn record(identifier: &[u8], extent: u32, size: u32, flags: u8, system_use: &[u8]) -> Vec<u8> {
    let pad = (identifier.len() + 1) % 2;
    let length = 33 + identifier.len() + pad + system_use.len();
    let mut bytes = vec![0u8; length];
    bytes[0] = length as u8;
    bytes[2..6].copy_from_slice(&extent.to_le_bytes());
    bytes[6..10].copy_from_slice(&extent.to_be_bytes());
    bytes[10..14].copy_from_slice(&size.to_le_bytes());
    bytes[14..18].copy_from_slice(&size.to_be_bytes());
    bytes[18..25].copy_from_slice(&[122, 12, 31, 23, 59, 58, 0]);
    bytes[25] = flags;
    bytes[28..30].copy_from_slice(&1u16.to_le_bytes());
    bytes[30..32].copy_from_slice(&1u16.to_be_bytes());
    bytes[32] = identifier.len() as u8;
    bytes[33..33 + identifier.len()].copy_from_slice(identifier);
    bytes[33 + identifier.len() + pad..].copy_from_slice(system_use);
    bytes
}

pub fn joliet_id(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect()
}

pub fn susp(signature: &[u8; 2], data: &[u8]) -> Vec<u8> {
    let mut bytes = vec![signature[0], signature[1], (data.len() + 4) as u8, 1];
    bytes.extend_from_slice(data);
    bytes
}

pub fn rr_sp() -> Vec<u8> {
    susp(b"SP", &[0xBE, 0xEF, 0])
}

pub fn rr_name(name: &str) -> Vec<u8> {
    let mut data = vec![0];
    data.extend_from_slice(name.as_bytes());
    susp(b"NM", &data)
}

pub fn rr_mode(mode: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&mode.to_le_bytes());
    data.extend_from_slice(&mode.to_be_bytes());
    data.extend_from_slice(&[0; 24]);
    susp(b"PX", &data)
}

// ============================================================================
// GPT drives
// ============================================================================

/// Partition type GUID of "Microsoft basic data"
pub const BASIC_DATA: u128 = 0xEBD0A0A2_B9E5_4433_87C0_68B6B72699C7;

pub fn guid_bytes(guid: u128) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&((guid >> 96) as u32).to_le_bytes());
    bytes[4..6].copy_from_slice(&((guid >> 80) as u16).to_le_bytes());
    bytes[6..8].copy_from_slice(&((guid >> 64) as u16).to_le_bytes());
    bytes[8..16].copy_from_slice(&(guid as u64).to_be_bytes());
    bytes
}

/// A GPT drive of `sectors` 512-byte sectors with the given
/// `(first, last, name)` partitions.
pub fn gpt_image(sectors: u64, partitions: &[(u64, u64, &str)]) -> Vec<u8> {
    let mut bytes = vec![0u8; sectors as usize * SECTOR];

    // protective MBR
    let mbr = &mut bytes[..SECTOR];
    mbr[446 + 4] = 0xEE;
    mbr[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
    mbr[446 + 12..446 + 16].copy_from_slice(&((sectors - 1).min(u32::MAX as u64) as u32).to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;

    let mut entries = vec![0u8; 128 * 128];
    for (i, &(first, last, name)) in partitions.iter().enumerate() {
        let entry = &mut entries[i * 128..(i + 1) * 128];
        entry[0..16].copy_from_slice(&guid_bytes(BASIC_DATA));
        entry[16..32].copy_from_slice(&guid_bytes(0x1000 + i as u128));
        entry[32..40].copy_from_slice(&first.to_le_bytes());
        entry[40..48].copy_from_slice(&last.to_le_bytes());
        for (j, unit) in name.encode_utf16().enumerate() {
            entry[56 + j * 2..58 + j * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
    let entries_crc = portafs_crypto::Crc32::checksum_bytes(&entries);
    bytes[2 * SECTOR..2 * SECTOR + entries.len()].copy_from_slice(&entries);

    let header = &mut bytes[SECTOR..2 * SECTOR];
    header[0..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[32..40].copy_from_slice(&(sectors - 1).to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&(sectors - 34).to_le_bytes());
    header[56..72].copy_from_slice(&guid_bytes(0xD15C_0000_0000_0000_0000_0000_0000_0001));
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());
    header[88..92].copy_from_slice(&entries_crc.to_le_bytes());
    let header_crc = portafs_crypto::Crc32::checksum_bytes(&header[..92]);
    header[16..20].copy_from_slice(&header_crc.to_le_bytes());

    bytes
}
