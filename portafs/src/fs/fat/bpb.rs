//! FAT layout decoding: boot sector, FSINFO and derived volume geometry.
//!
//! The FAT type is never read from the label fields. It follows from the
//! number of data clusters alone: fewer than 4085 is FAT12, fewer than
//! 65525 is FAT16, anything larger is FAT32.

use crate::fs::vfs::{FsError, FsResult};

/// Boot sector signature.
const BOOT_SIGNATURE: u16 = 0xAA55;

/// FSINFO signatures.
const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;

/// Extended boot signature marking a valid serial/label block.
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

/// Cluster count thresholds.
const FAT12_MAX_CLUSTERS: u32 = 4085;
const FAT16_MAX_CLUSTERS: u32 = 65525;

pub(super) fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(super) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// FAT variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Derives the FAT type from the data cluster count.
    pub fn from_cluster_count(cluster_count: u32) -> Self {
        if cluster_count < FAT12_MAX_CLUSTERS {
            FatType::Fat12
        } else if cluster_count < FAT16_MAX_CLUSTERS {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }

    /// Highest table value that still names a data cluster.
    pub fn max_cluster(&self) -> u32 {
        match self {
            FatType::Fat12 => 0xFF4,
            FatType::Fat16 => 0xFFF4,
            FatType::Fat32 => 0x0FFF_FFF6,
        }
    }

    /// Bad cluster marker.
    pub fn bad_cluster(&self) -> u32 {
        match self {
            FatType::Fat12 => 0xFF7,
            FatType::Fat16 => 0xFFF7,
            FatType::Fat32 => 0x0FFF_FFF7,
        }
    }

    /// Canonical end-of-chain marker.
    pub fn end_of_chain(&self) -> u32 {
        match self {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }
}

/// BIOS Parameter Block, common part plus the FAT32 extension.
#[derive(Debug, Clone)]
pub struct BiosParameterBlock {
    /// OEM name
    pub oem_name: [u8; 8],
    /// Bytes per sector
    pub bytes_per_sector: u16,
    /// Sectors per cluster
    pub sectors_per_cluster: u8,
    /// Reserved sector count
    pub reserved_sectors: u16,
    /// Number of FATs
    pub fat_count: u8,
    /// Root entry count (0 for FAT32)
    pub root_entry_count: u16,
    /// Total sectors (16-bit)
    pub total_sectors_16: u16,
    /// Media descriptor
    pub media: u8,
    /// FAT size (16-bit, 0 for FAT32)
    pub fat_size_16: u16,
    /// Total sectors (32-bit)
    pub total_sectors_32: u32,
    /// FAT size (32-bit)
    pub fat_size_32: u32,
    /// Root directory cluster (FAT32)
    pub root_cluster: u32,
    /// FSInfo sector (FAT32)
    pub fsinfo_sector: u16,
}

impl BiosParameterBlock {
    /// Decodes and sanity-checks sector 0 of a FAT volume.
    pub fn parse(sector: &[u8]) -> FsResult<Self> {
        if sector.len() < 512 || le_u16(sector, 510) != BOOT_SIGNATURE {
            return Err(FsError::InvalidFsType);
        }

        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&sector[3..11]);

        let bpb = Self {
            oem_name,
            bytes_per_sector: le_u16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: le_u16(sector, 14),
            fat_count: sector[16],
            root_entry_count: le_u16(sector, 17),
            total_sectors_16: le_u16(sector, 19),
            media: sector[21],
            fat_size_16: le_u16(sector, 22),
            total_sectors_32: le_u32(sector, 32),
            fat_size_32: le_u32(sector, 36),
            root_cluster: le_u32(sector, 44),
            fsinfo_sector: le_u16(sector, 48),
        };

        let bps = bpb.bytes_per_sector;
        if !bps.is_power_of_two() || !(512..=4096).contains(&bps) {
            return Err(FsError::InvalidFsType);
        }
        if bpb.sectors_per_cluster == 0 || !bpb.sectors_per_cluster.is_power_of_two() {
            return Err(FsError::InvalidFsType);
        }
        if bpb.reserved_sectors == 0 || bpb.fat_count == 0 || bpb.fat_size() == 0 {
            return Err(FsError::InvalidFsType);
        }

        Ok(bpb)
    }

    /// Returns the FAT size in sectors.
    pub fn fat_size(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    /// Returns the total sectors.
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }
}

/// Serial number and label block that follows the BPB.
#[derive(Debug, Clone, Default)]
pub struct ExtendedBootRecord {
    pub drive_number: u8,
    pub volume_id: Option<u32>,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl ExtendedBootRecord {
    /// Decodes the record at its FAT12/16 or FAT32 offset.
    pub fn parse(sector: &[u8], fat_type: FatType) -> Self {
        let base = if fat_type == FatType::Fat32 { 64 } else { 36 };
        let mut record = Self {
            drive_number: sector[base],
            ..Self::default()
        };
        if sector[base + 2] == EXTENDED_BOOT_SIGNATURE {
            record.volume_id = Some(le_u32(sector, base + 3));
            record.volume_label.copy_from_slice(&sector[base + 7..base + 18]);
            record.fs_type.copy_from_slice(&sector[base + 18..base + 26]);
        }
        record
    }
}

/// FAT32 FSINFO sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    /// Last known free cluster count, `0xFFFFFFFF` if unknown
    pub free_clusters: u32,
    /// Allocation hint, `0xFFFFFFFF` if unknown
    pub next_free_cluster: u32,
}

impl FsInfo {
    pub const UNKNOWN: u32 = 0xFFFF_FFFF;

    /// Decodes an FSINFO sector, `None` when its signatures are wrong.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if sector.len() < 512
            || le_u32(sector, 0) != FSINFO_LEAD_SIGNATURE
            || le_u32(sector, 484) != FSINFO_STRUCT_SIGNATURE
            || le_u32(sector, 508) != FSINFO_TRAIL_SIGNATURE
        {
            return None;
        }
        Some(Self {
            free_clusters: le_u32(sector, 488),
            next_free_cluster: le_u32(sector, 492),
        })
    }
}

/// Volume geometry derived at mount time.
///
/// Sector numbers are relative to the partition start.
#[derive(Debug, Clone)]
pub struct FatGeometry {
    pub fat_type: FatType,
    pub sector_size: usize,
    pub sectors_per_cluster: u32,
    pub cluster_size: usize,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub fat_size: u32,
    pub root_entry_count: u32,
    pub root_sector_count: u32,
    pub total_sectors: u32,
    /// First sector after the FATs
    pub data_area_begin: u32,
    pub cluster_count: u32,
    /// Root directory cluster (FAT32 only, 0 otherwise)
    pub root_cluster: u32,
}

impl FatGeometry {
    pub fn from_bpb(bpb: &BiosParameterBlock) -> FsResult<Self> {
        let sector_size = bpb.bytes_per_sector as u32;
        let root_entry_count = bpb.root_entry_count as u32;
        let root_sector_count = (root_entry_count * 32 + sector_size - 1) / sector_size;
        let fat_size = bpb.fat_size();
        let data_area_begin = bpb.reserved_sectors as u32 + bpb.fat_count as u32 * fat_size;
        let total_sectors = bpb.total_sectors();

        let data_sectors = total_sectors
            .checked_sub(data_area_begin + root_sector_count)
            .filter(|&sectors| sectors > 0)
            .ok_or(FsError::InvalidFsType)?;
        let sectors_per_cluster = bpb.sectors_per_cluster as u32;
        let cluster_count = data_sectors / sectors_per_cluster;
        let fat_type = FatType::from_cluster_count(cluster_count);

        let root_cluster = if fat_type == FatType::Fat32 {
            bpb.root_cluster
        } else {
            0
        };

        let geometry = Self {
            fat_type,
            sector_size: sector_size as usize,
            sectors_per_cluster,
            cluster_size: (sector_size * sectors_per_cluster) as usize,
            reserved_sectors: bpb.reserved_sectors as u32,
            fat_count: bpb.fat_count as u32,
            fat_size,
            root_entry_count,
            root_sector_count,
            total_sectors,
            data_area_begin,
            cluster_count,
            root_cluster,
        };

        if fat_type == FatType::Fat32 && !geometry.is_data_cluster(root_cluster) {
            return Err(FsError::InvalidFsType);
        }
        if fat_type != FatType::Fat32 && root_entry_count == 0 {
            return Err(FsError::InvalidFsType);
        }

        Ok(geometry)
    }

    /// Highest cluster number backed by the data area.
    pub fn max_cluster(&self) -> u32 {
        self.fat_type
            .max_cluster()
            .min(self.cluster_count.saturating_add(1))
    }

    /// Returns true if `cluster` names a data cluster of this volume.
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    /// First sector of the cluster region (after the fixed root on FAT12/16).
    fn cluster_region_begin(&self) -> u32 {
        match self.fat_type {
            FatType::Fat32 => self.data_area_begin,
            FatType::Fat12 | FatType::Fat16 => self.data_area_begin + self.root_sector_count,
        }
    }

    /// First sector of `cluster`.
    pub fn cluster_to_sector(&self, cluster: u32) -> FsResult<u64> {
        if !self.is_data_cluster(cluster) {
            return Err(FsError::InvalidCluster);
        }
        Ok(self.cluster_region_begin() as u64
            + (cluster as u64 - 2) * self.sectors_per_cluster as u64)
    }

    /// Cluster containing `sector`.
    pub fn sector_to_cluster(&self, sector: u64) -> FsResult<u32> {
        let begin = self.cluster_region_begin() as u64;
        let cluster = sector
            .checked_sub(begin)
            .map(|offset| (offset / self.sectors_per_cluster as u64 + 2) as u32)
            .ok_or(FsError::InvalidCluster)?;
        if self.is_data_cluster(cluster) {
            Ok(cluster)
        } else {
            Err(FsError::InvalidCluster)
        }
    }

    /// Sector of the fixed FAT12/16 root directory region.
    pub fn root_region_sector(&self, index: u32) -> u64 {
        self.data_area_begin as u64 + index as u64
    }

    /// Sector holding byte `offset` of the first FAT copy.
    pub fn fat_sector(&self, offset: u32) -> (u64, usize) {
        let sector = self.reserved_sectors as u64 + (offset as usize / self.sector_size) as u64;
        (sector, offset as usize % self.sector_size)
    }
}
