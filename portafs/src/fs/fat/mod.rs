//! # FAT Filesystem
//!
//! Read-only FAT12/FAT16/FAT32 driver over a [`Partition`].
//!
//! ## Features
//!
//! - FAT type derived from the data cluster count
//! - Long filename (LFN) reassembly with short-name checksum check
//! - Code page aware case-insensitive lookup
//! - Cluster-chain walking through the shared block cache
//! - Cursor-based file reads with cached chain position
//!
//! ## Architecture
//!
//! ```text
//! FatFs (options, last error)
//!   └── FatVolume (while mounted)
//!         ├── FatIo ─────────► Partition ──► Drive
//!         ├── BlockCache  (FAT sectors, root-region sectors, clusters)
//!         └── Handles     (open directories and files)
//! ```
//!
//! Sector numbers inside the driver are partition-relative and in units of
//! the BPB sector size. [`FatIo`] scales them to drive sectors.

mod bpb;
mod codepage;
mod dir;
mod file;
mod name;
mod table;

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::Partition;
use crate::time::Timestamp;

use super::cache::{BlockCache, BlockIo, BlockKey, BlockKind};
use super::handle::Handles;
use super::vfs::{
    DirHandle, DirIter, FileHandle, FileInfo, FileSystem, FileType, FsError, FsResult, OpenMode,
    SeekFrom, VolumeString, VolumeTimestamp,
};

pub use bpb::{BiosParameterBlock, ExtendedBootRecord, FatGeometry, FatType, FsInfo};
pub use codepage::Codepage;
pub use name::{is_valid_lfn, is_valid_sfn, sfn_checksum};

use dir::DirCursor;
use file::FatFile;

// ============================================================================
// Options
// ============================================================================

/// FAT driver configuration
///
/// Locked while the volume is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatOptions {
    /// Number of cache slots
    pub diskbuf_count: usize,
    /// Reassemble long file names
    pub lfn_enabled: bool,
    /// Refuse every write, even if the drive allows it
    pub readonly: bool,
    /// Decode long names to UTF-8 instead of single bytes
    pub unicode_enabled: bool,
    /// Substitute for characters that cannot be represented
    pub unknown_char_fallback: u8,
    /// Trust the FSINFO next-free hint
    pub use_fsinfo_nextfree: bool,
    pub case_sensitive: bool,
    /// Show short names in lower case
    pub sfn_lowercase: bool,
    /// OEM code page of short names
    pub codepage: Codepage,
}

impl Default for FatOptions {
    fn default() -> Self {
        Self {
            diskbuf_count: 32,
            lfn_enabled: true,
            readonly: false,
            unicode_enabled: true,
            unknown_char_fallback: b'?',
            use_fsinfo_nextfree: false,
            case_sensitive: false,
            sfn_lowercase: false,
            codepage: Codepage::Cp437,
        }
    }
}

// ============================================================================
// Block I/O
// ============================================================================

/// Maps cache keys onto partition sectors.
pub(crate) struct FatIo {
    part: Partition,
    geom: FatGeometry,
    /// Drive sectors per BPB sector
    ratio: u64,
    writable: bool,
}

impl FatIo {
    fn new(part: Partition, geom: FatGeometry, writable: bool) -> FsResult<Self> {
        let drive_sector = part.sector_size();
        if drive_sector == 0 || geom.sector_size % drive_sector != 0 {
            return Err(FsError::InvalidFsType);
        }
        let ratio = (geom.sector_size / drive_sector) as u64;
        Ok(Self {
            part,
            geom,
            ratio,
            writable,
        })
    }

    pub(crate) fn geom(&self) -> &FatGeometry {
        &self.geom
    }

    fn first_drive_sector(&self, key: BlockKey) -> FsResult<u64> {
        let sector = match key.kind {
            BlockKind::Sector => key.address,
            BlockKind::Cluster => self.geom.cluster_to_sector(key.address as u32)?,
        };
        Ok(sector * self.ratio)
    }
}

impl BlockIo for FatIo {
    fn block_size(&self, kind: BlockKind) -> usize {
        match kind {
            BlockKind::Sector => self.geom.sector_size,
            BlockKind::Cluster => self.geom.cluster_size,
        }
    }

    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> FsResult<()> {
        let lba = self.first_drive_sector(key)?;
        let transferred = self.part.read_sectors(lba, buf)?;
        if transferred * self.part.sector_size() != buf.len() {
            log::debug!("[fat] short read at {:?} {}", key.kind, key.address);
            return Err(FsError::ShortTransfer);
        }
        Ok(())
    }

    fn write_block(&self, key: BlockKey, buf: &[u8]) -> FsResult<()> {
        if !self.writable {
            return Err(FsError::ReadOnly);
        }
        let lba = self.first_drive_sector(key)?;
        let transferred = self.part.write_sectors(lba, buf)?;
        if transferred * self.part.sector_size() != buf.len() {
            return Err(FsError::ShortTransfer);
        }
        Ok(())
    }
}

// ============================================================================
// Mounted volume
// ============================================================================

/// Open directory
#[derive(Debug, Clone)]
struct FatDir {
    /// Head cluster, 0 for the fixed FAT12/16 root region
    cluster: u32,
}

/// State of a mounted volume
pub(crate) struct FatVolume {
    io: FatIo,
    options: FatOptions,
    cache: BlockCache,
    handles: Handles<FatDir, FatFile>,
    fsinfo: Option<FsInfo>,
    boot_record: ExtendedBootRecord,
    oem_name: [u8; 8],
}

impl FatVolume {
    fn mount(part: Partition, options: FatOptions, epoch: u32) -> FsResult<Self> {
        if options.diskbuf_count == 0 {
            return Err(FsError::InvalidArgument);
        }

        let drive_sector = part.sector_size().max(1);
        let mut boot = vec![0u8; drive_sector * 512usize.div_ceil(drive_sector)];
        let transferred = part.read_sectors(0, &mut boot)?;
        if transferred * drive_sector != boot.len() {
            return Err(FsError::ShortTransfer);
        }

        let bpb = BiosParameterBlock::parse(&boot)?;
        let geom = FatGeometry::from_bpb(&bpb)?;
        let boot_record = ExtendedBootRecord::parse(&boot, geom.fat_type);

        let volume_sectors = geom.total_sectors as u64 * (geom.sector_size / drive_sector) as u64;
        if volume_sectors > part.sector_count() {
            log::warn!(
                "[fat] volume claims {} sectors, partition has {}",
                volume_sectors,
                part.sector_count()
            );
        }

        let writable = !options.readonly && !part.is_read_only();
        let io = FatIo::new(part, geom, writable)?;
        let mut cache = BlockCache::new(options.diskbuf_count);

        let mut fsinfo = None;
        if io.geom.fat_type == FatType::Fat32 && bpb.fsinfo_sector != 0 && bpb.fsinfo_sector != 0xFFFF {
            let slot = cache.read(&io, BlockKey::sector(bpb.fsinfo_sector as u64))?;
            fsinfo = FsInfo::parse(cache.data(slot));
            match fsinfo.as_mut() {
                Some(info) if !options.use_fsinfo_nextfree => {
                    info.next_free_cluster = FsInfo::UNKNOWN;
                }
                Some(_) => {}
                None => log::warn!("[fat] FSINFO sector {} has bad signatures", bpb.fsinfo_sector),
            }
        }

        log::info!(
            "[fat] mounted {} volume: {} clusters of {} bytes",
            io.geom.fat_type.name(),
            io.geom.cluster_count,
            io.geom.cluster_size
        );

        Ok(Self {
            io,
            options,
            cache,
            handles: Handles::new(epoch),
            fsinfo,
            boot_record,
            oem_name: bpb.oem_name,
        })
    }

    fn unmount(&mut self) -> FsResult<()> {
        if !self.handles.is_empty() {
            return Err(FsError::Busy);
        }
        if self.io.writable {
            self.cache.flush_all(&self.io)?;
        }
        self.cache.release_all();
        Ok(())
    }

    fn geom(&self) -> &FatGeometry {
        &self.io.geom
    }

    /// Head cluster of the root directory
    fn root_cluster(&self) -> u32 {
        self.io.geom.root_cluster
    }

    fn dir_cursor(&self, dir: DirHandle) -> FsResult<DirCursor> {
        let head = self.handles.dir(dir)?.cluster;
        Ok(DirCursor::new(head))
    }

    /// Finds `name` in directory `dir`
    fn lookup(&mut self, dir: DirHandle, name: &[u8]) -> FsResult<FileInfo> {
        if name.is_empty() {
            return Err(FsError::InvalidName);
        }
        let mut cursor = self.dir_cursor(dir)?;
        while let Some(info) = self.next_entry(&mut cursor)? {
            if name::names_equal(&info.name, name, self.options.case_sensitive, self.options.codepage) {
                return Ok(info);
            }
        }
        Err(FsError::NotFound)
    }

    fn open_dir(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<DirHandle> {
        let info = self.lookup(parent, name)?;
        if info.file_type != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        // ".." of a first-level directory points at cluster 0
        let cluster = match info.location as u32 {
            0 => self.root_cluster(),
            cluster => cluster,
        };
        log::debug!("[fat] open dir {:?} at cluster {}", info.name_str(), cluster);
        self.handles.open_dir(Some(parent), FatDir { cluster })
    }

    fn open_file(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<FileHandle> {
        let info = self.lookup(parent, name)?;
        if info.file_type == FileType::Directory {
            return Err(FsError::IsADirectory);
        }
        self.handles.open_file(parent, FatFile::new(info))
    }

    fn volume_label_entry(&mut self) -> FsResult<Option<FileInfo>> {
        let mut cursor = DirCursor::new(self.root_cluster());
        self.find_volume_label(&mut cursor)
    }

    fn volume_string(&mut self, kind: VolumeString) -> FsResult<String> {
        let text = match kind {
            VolumeString::Label => match self.volume_label_entry()? {
                Some(entry) => trim_padding(&entry.name),
                None if self.boot_record.volume_id.is_some() => {
                    trim_padding(&self.boot_record.volume_label)
                }
                None => return Err(FsError::NotFound),
            },
            VolumeString::System => trim_padding(&self.oem_name),
            VolumeString::Serial => {
                let id = self.boot_record.volume_id.ok_or(FsError::NotFound)?;
                return Ok(format!("{:04X}-{:04X}", id >> 16, id & 0xFFFF));
            }
            _ => return Err(FsError::NotSupported),
        };
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    fn volume_timestamp(&mut self, kind: VolumeTimestamp) -> FsResult<Timestamp> {
        let entry = match kind {
            VolumeTimestamp::Created | VolumeTimestamp::Modified => self.volume_label_entry()?,
            VolumeTimestamp::Expires | VolumeTimestamp::Effective => {
                return Err(FsError::NotSupported)
            }
        };
        let entry = entry.ok_or(FsError::NotFound)?;
        let stamp = match kind {
            VolumeTimestamp::Created => entry.created,
            _ => entry.modified,
        };
        stamp.ok_or(FsError::NotFound)
    }
}

fn trim_padding(bytes: &[u8]) -> Vec<u8> {
    let end = bytes
        .iter()
        .rposition(|&byte| byte != b' ' && byte != 0)
        .map_or(0, |last| last + 1);
    bytes[..end].to_vec()
}

// ============================================================================
// Filesystem
// ============================================================================

/// FAT filesystem instance bound to one partition
pub struct FatFs {
    partition: Partition,
    options: FatOptions,
    error: Option<FsError>,
    /// Number of mount attempts, stamped into every handle
    mounts: u32,
    volume: Option<FatVolume>,
}

impl FatFs {
    /// Creates an unmounted filesystem for `partition`
    pub fn new(partition: Partition, options: FatOptions) -> Self {
        Self {
            partition,
            options,
            error: None,
            mounts: 0,
            volume: None,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn options(&self) -> &FatOptions {
        &self.options
    }

    /// Mutable options, `None` while mounted
    pub fn options_mut(&mut self) -> Option<&mut FatOptions> {
        if self.volume.is_some() {
            None
        } else {
            Some(&mut self.options)
        }
    }

    pub fn set_options(&mut self, options: FatOptions) -> FsResult<()> {
        if self.volume.is_some() {
            return self.record(Err(FsError::Busy));
        }
        self.options = options;
        Ok(())
    }

    pub fn fat_type(&self) -> Option<FatType> {
        self.volume.as_ref().map(|volume| volume.geom().fat_type)
    }

    /// Geometry derived at mount time
    pub fn geometry(&self) -> Option<&FatGeometry> {
        self.volume.as_ref().map(|volume| volume.geom())
    }

    /// FSINFO contents, FAT32 only
    pub fn fs_info(&self) -> Option<FsInfo> {
        self.volume.as_ref().and_then(|volume| volume.fsinfo)
    }

    /// Head cluster of an open directory (0 for the fixed root region)
    pub fn dir_cluster(&mut self, dir: DirHandle) -> FsResult<u32> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.dir(dir).map(|dir| dir.cluster));
        self.record(result)
    }

    /// Walks `steps` links of the chain starting at `cluster`
    pub fn advance_cluster(&mut self, cluster: u32, steps: u32) -> FsResult<u32> {
        let result = self
            .volume_mut()
            .and_then(|volume| table::advance(&mut volume.cache, &volume.io, cluster, steps));
        self.record(result)
    }

    /// Cache slots in use, for diagnostics
    pub fn cached_blocks(&self) -> usize {
        self.volume.as_ref().map_or(0, |volume| volume.cache.resident())
    }

    fn volume_mut(&mut self) -> FsResult<&mut FatVolume> {
        self.volume.as_mut().ok_or(FsError::Unmounted)
    }

    fn record<T>(&mut self, result: FsResult<T>) -> FsResult<T> {
        if let Err(err) = &result {
            self.error = Some(*err);
        }
        result
    }
}

impl FileSystem for FatFs {
    fn mount(&mut self) -> FsResult<()> {
        if self.volume.is_some() {
            return self.record(Err(FsError::AlreadyMounted));
        }
        self.mounts = self.mounts.wrapping_add(1);
        let result = FatVolume::mount(self.partition.clone(), self.options.clone(), self.mounts);
        match self.record(result) {
            Ok(volume) => {
                self.volume = Some(volume);
                Ok(())
            }
            Err(err) => {
                log::warn!("[fat] mount of {} failed: {}", self.partition.name, err);
                Err(err)
            }
        }
    }

    fn unmount(&mut self) -> FsResult<()> {
        let result = self.volume_mut().and_then(|volume| volume.unmount());
        self.record(result)?;
        self.volume = None;
        log::info!("[fat] unmounted {}", self.partition.name);
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    fn name(&self) -> &'static str {
        self.fat_type().map_or("FAT", |fat_type| fat_type.name())
    }

    fn last_error(&self) -> Option<FsError> {
        self.error
    }

    fn set_error(&mut self, err: FsError) {
        self.error = Some(err);
    }

    fn is_read_only(&self) -> bool {
        self.options.readonly || self.partition.is_read_only()
    }

    fn volume_string(&mut self, kind: VolumeString) -> FsResult<String> {
        let result = self.volume_mut().and_then(|volume| volume.volume_string(kind));
        self.record(result)
    }

    fn volume_timestamp(&mut self, kind: VolumeTimestamp) -> FsResult<Timestamp> {
        let result = self.volume_mut().and_then(|volume| volume.volume_timestamp(kind));
        self.record(result)
    }

    fn root_dir_open(&mut self) -> FsResult<DirHandle> {
        let result = self.volume_mut().and_then(|volume| {
            let cluster = volume.root_cluster();
            volume.handles.open_dir(None, FatDir { cluster })
        });
        self.record(result)
    }

    fn dir_open(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<DirHandle> {
        let result = self.volume_mut().and_then(|volume| volume.open_dir(parent, name));
        self.record(result)
    }

    fn dir_close(&mut self, dir: DirHandle) -> FsResult<()> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.close_dir(dir).map(drop));
        self.record(result)
    }

    fn dir_iter_start(&mut self, dir: DirHandle) -> FsResult<DirIter> {
        let result = self.volume_mut().and_then(|volume| {
            let cursor = volume.dir_cursor(dir)?;
            Ok(DirIter::new(dir, cursor.cluster))
        });
        self.record(result)
    }

    fn dir_iter_next(&mut self, iter: &mut DirIter) -> FsResult<bool> {
        let result = self.volume_mut().and_then(|volume| {
            volume.handles.dir(iter.dir)?;
            let mut cursor = DirCursor::from_iter(iter);
            let next = volume.next_entry(&mut cursor);
            cursor.store(iter);
            if next.is_err() {
                iter.done = true;
            }
            let next = next?;
            let found = next.is_some();
            iter.current = next;
            Ok(found)
        });
        self.record(result)
    }

    fn file_info(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<FileInfo> {
        let result = self.volume_mut().and_then(|volume| volume.lookup(parent, name));
        self.record(result)
    }

    fn file_open(&mut self, parent: DirHandle, name: &[u8], mode: OpenMode) -> FsResult<FileHandle> {
        if mode == OpenMode::Write {
            let err = if self.is_read_only() {
                FsError::ReadOnly
            } else {
                FsError::NotSupported
            };
            return self.record(Err(err));
        }
        let result = self.volume_mut().and_then(|volume| volume.open_file(parent, name));
        self.record(result)
    }

    fn file_close(&mut self, file: FileHandle) -> FsResult<()> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.close_file(file).map(drop));
        self.record(result)
    }

    fn file_read(&mut self, file: FileHandle, buf: &mut [u8], size: usize, count: usize) -> FsResult<usize> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.read_file(file, buf, size, count));
        match result {
            Ok((elements, Some(err))) if elements > 0 => {
                self.error = Some(err);
                Ok(elements)
            }
            Ok((_, Some(err))) => self.record(Err(err)),
            Ok((elements, None)) => Ok(elements),
            Err(err) => self.record(Err(err)),
        }
    }

    fn file_seek(&mut self, file: FileHandle, pos: SeekFrom) -> FsResult<u64> {
        let result = self.volume_mut().and_then(|volume| volume.seek_file(file, pos));
        self.record(result)
    }

    fn file_tell(&mut self, file: FileHandle) -> FsResult<u64> {
        let result = self.volume_mut().and_then(|volume| volume.tell_file(file));
        self.record(result)
    }

    fn file_is_eof(&mut self, file: FileHandle) -> FsResult<bool> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.file(file).map(|file| file.is_eof()));
        self.record(result)
    }

    fn file_size(&mut self, file: FileHandle) -> FsResult<u64> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.file(file).map(|file| file.size()));
        self.record(result)
    }
}
