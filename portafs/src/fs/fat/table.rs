//! File allocation table walker.
//!
//! Table sectors are read through the block cache. Only the first FAT copy
//! is consulted.

use crate::fs::cache::{BlockCache, BlockKey};
use crate::fs::vfs::{FsError, FsResult};

use super::bpb::{le_u16, le_u32, FatType};
use super::FatIo;

/// Reserved top bits of a FAT32 entry
const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

fn table_byte(cache: &mut BlockCache, io: &FatIo, offset: u32) -> FsResult<u8> {
    let (sector, index) = io.geom().fat_sector(offset);
    let slot = cache.read(io, BlockKey::sector(sector))?;
    Ok(cache.data(slot)[index])
}

/// Reads the raw table entry of `cluster`.
///
/// FAT32 values keep their reserved top bits.
pub(super) fn read_entry(cache: &mut BlockCache, io: &FatIo, cluster: u32) -> FsResult<u32> {
    let geom = io.geom();
    if cluster > geom.fat_type.max_cluster() {
        return Err(FsError::InvalidCluster);
    }

    match geom.fat_type {
        FatType::Fat12 => {
            // 1.5 bytes per entry; the pair may straddle two sectors
            let offset = cluster + cluster / 2;
            let lo = table_byte(cache, io, offset)? as u32;
            let hi = table_byte(cache, io, offset + 1)? as u32;
            Ok(if cluster & 1 == 1 {
                (lo >> 4) | (hi << 4)
            } else {
                lo | ((hi & 0x0F) << 8)
            })
        }
        FatType::Fat16 => {
            let (sector, index) = geom.fat_sector(cluster * 2);
            let slot = cache.read(io, BlockKey::sector(sector))?;
            Ok(le_u16(cache.data(slot), index) as u32)
        }
        FatType::Fat32 => {
            let (sector, index) = geom.fat_sector(cluster * 4);
            let slot = cache.read(io, BlockKey::sector(sector))?;
            Ok(le_u32(cache.data(slot), index))
        }
    }
}

/// Follows one link of the chain.
///
/// Returns `None` at an end-of-chain marker. Free, reserved, bad and
/// out-of-volume values are reported as `InvalidCluster`.
pub(super) fn next_cluster(cache: &mut BlockCache, io: &FatIo, cluster: u32) -> FsResult<Option<u32>> {
    let geom = io.geom();
    if !geom.is_data_cluster(cluster) {
        return Err(FsError::InvalidCluster);
    }

    let mut value = read_entry(cache, io, cluster)?;
    if geom.fat_type == FatType::Fat32 {
        value &= FAT32_ENTRY_MASK;
    }

    if value > geom.fat_type.bad_cluster() {
        Ok(None)
    } else if geom.is_data_cluster(value) {
        Ok(Some(value))
    } else {
        log::debug!("[fat] broken chain: cluster {} -> {:#x}", cluster, value);
        Err(FsError::InvalidCluster)
    }
}

/// Walks `steps` links from `cluster`.
///
/// On a chain of `L` clusters this succeeds for `steps <= L - 1` and fails
/// with `InvalidCluster` for anything longer.
pub(super) fn advance(cache: &mut BlockCache, io: &FatIo, cluster: u32, steps: u32) -> FsResult<u32> {
    if !io.geom().is_data_cluster(cluster) {
        return Err(FsError::InvalidCluster);
    }
    let mut current = cluster;
    for _ in 0..steps {
        current = next_cluster(cache, io, current)?.ok_or(FsError::InvalidCluster)?;
    }
    log::trace!("[fat] advance {} by {} -> {}", cluster, steps, current);
    Ok(current)
}
