//! # ISO9660 Filesystem
//!
//! Read-only ISO9660 driver with Joliet and Rock Ridge name support.
//!
//! ## Design
//!
//! Files and directories are contiguous extents, so there is no allocation
//! table to walk: a byte offset maps straight to a logical block. Blocks
//! go through the shared [`BlockCache`] keyed by logical block address.
//!
//! Three directory trees can describe the same data. Mount picks one:
//!
//! 1. Rock Ridge on the primary tree, when the root `.` record has `SP`
//! 2. Joliet, from a supplementary descriptor with a UCS-2 escape
//! 3. Plain primary tree names otherwise

mod descriptor;
mod record;
mod rockridge;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::Partition;
use crate::time::Timestamp;

use super::cache::{BlockCache, BlockIo, BlockKey, BlockKind};
use super::handle::Handles;
use super::vfs::{
    seek_target, DirHandle, DirIter, FileAttributes, FileHandle, FileInfo, FileSystem, FileType,
    FsError, FsResult, OpenMode, SeekFrom, VolumeString, VolumeTimestamp,
};

pub use descriptor::{DescriptorType, VolumeDescriptor};
pub use record::{DirectoryRecord, RecordFlags};
pub use rockridge::RockRidge;

use descriptor::{DESCRIPTOR_SIZE, FIRST_DESCRIPTOR, STANDARD_ID};

/// Descriptors scanned before giving up on a terminator
const MAX_DESCRIPTORS: u64 = 64;

/// ISO9660 driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoOptions {
    /// Number of cache slots
    pub diskbuf_count: usize,
    pub case_sensitive: bool,
    pub enable_rock_ridge: bool,
    pub enable_joliet: bool,
}

impl Default for IsoOptions {
    fn default() -> Self {
        Self {
            diskbuf_count: 32,
            case_sensitive: false,
            enable_rock_ridge: true,
            enable_joliet: true,
        }
    }
}

/// Directory tree in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTree {
    Plain,
    Joliet,
    RockRidge,
}

// ============================================================================
// Block I/O
// ============================================================================

struct IsoIo {
    part: Partition,
    block_size: usize,
    /// Drive sectors per logical block
    ratio: u64,
}

impl BlockIo for IsoIo {
    fn block_size(&self, _kind: BlockKind) -> usize {
        self.block_size
    }

    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> FsResult<()> {
        let transferred = self.part.read_sectors(key.address * self.ratio, buf)?;
        if transferred * self.part.sector_size() != buf.len() {
            log::debug!("[iso9660] short read at block {}", key.address);
            return Err(FsError::ShortTransfer);
        }
        Ok(())
    }

    fn write_block(&self, _key: BlockKey, _buf: &[u8]) -> FsResult<()> {
        Err(FsError::ReadOnly)
    }
}

// ============================================================================
// Mounted volume
// ============================================================================

/// Open directory extent
#[derive(Debug, Clone, Copy)]
struct IsoDir {
    block: u32,
    size: u32,
}

impl IsoDir {
    fn from_info(info: &FileInfo) -> Self {
        Self {
            block: info.location as u32,
            size: info.size as u32,
        }
    }
}

/// Open file
#[derive(Debug, Clone)]
struct IsoFile {
    info: FileInfo,
    cursor: u64,
}

/// Position inside a directory extent
struct IsoCursor {
    block: u32,
    offset: usize,
    done: bool,
    /// Name of the last listed entry; later extents of it are skipped
    previous: Option<Vec<u8>>,
}

impl IsoCursor {
    fn new() -> Self {
        Self {
            block: 0,
            offset: 0,
            done: false,
            previous: None,
        }
    }

    fn from_iter(iter: &DirIter) -> Self {
        Self {
            block: iter.block,
            offset: iter.offset,
            done: iter.done,
            previous: iter.current.as_ref().map(|info| info.name.clone()),
        }
    }

    fn store(&self, iter: &mut DirIter) {
        iter.block = self.block;
        iter.offset = self.offset;
        iter.done = self.done;
    }
}

struct IsoVolume {
    io: IsoIo,
    options: IsoOptions,
    cache: BlockCache,
    handles: Handles<IsoDir, IsoFile>,
    primary: VolumeDescriptor,
    joliet: Option<VolumeDescriptor>,
    tree: IsoTree,
    root: IsoDir,
    /// Rock Ridge `SP` skip length
    susp_skip: u8,
}

impl IsoVolume {
    fn mount(part: Partition, options: IsoOptions, epoch: u32) -> FsResult<Self> {
        if options.diskbuf_count == 0 {
            return Err(FsError::InvalidArgument);
        }
        let drive_sector = part.sector_size();
        if drive_sector == 0 || DESCRIPTOR_SIZE % drive_sector != 0 {
            return Err(FsError::InvalidFsType);
        }
        let per_descriptor = (DESCRIPTOR_SIZE / drive_sector) as u64;

        let mut primary = None;
        let mut joliet = None;
        let mut block = vec![0u8; DESCRIPTOR_SIZE];
        for index in 0..MAX_DESCRIPTORS {
            let lba = (FIRST_DESCRIPTOR + index) * per_descriptor;
            if part.read_sectors(lba, &mut block)? * drive_sector != DESCRIPTOR_SIZE {
                return Err(FsError::ShortTransfer);
            }
            if &block[1..6] != STANDARD_ID {
                return Err(FsError::InvalidFsType);
            }
            match DescriptorType::from(block[0]) {
                DescriptorType::Terminator => break,
                DescriptorType::Primary if primary.is_none() => {
                    primary = Some(VolumeDescriptor::parse(&block)?);
                }
                DescriptorType::Supplementary if joliet.is_none() => {
                    joliet = VolumeDescriptor::parse(&block).ok().filter(|svd| svd.joliet);
                }
                kind => log::trace!("[iso9660] skipping descriptor {:?}", kind),
            }
        }
        let primary = primary.ok_or(FsError::InvalidFsType)?;

        let block_size = primary.logical_block_size as usize;
        if block_size % drive_sector != 0 {
            return Err(FsError::InvalidFsType);
        }
        let io = IsoIo {
            part,
            block_size,
            ratio: (block_size / drive_sector) as u64,
        };
        let mut cache = BlockCache::new(options.diskbuf_count);

        let mut tree = IsoTree::Plain;
        let mut root = primary.root.clone();
        let mut susp_skip = 0;
        if options.enable_rock_ridge {
            let slot = cache.read(&io, BlockKey::sector(root.data_block() as u64))?;
            let skip = DirectoryRecord::parse(cache.data(slot))
                .filter(|dot| dot.is_self())
                .and_then(|dot| rockridge::sp_skip(&dot.system_use));
            if let Some(skip) = skip {
                tree = IsoTree::RockRidge;
                susp_skip = skip;
            }
        }
        if tree == IsoTree::Plain && options.enable_joliet {
            if let Some(svd) = &joliet {
                tree = IsoTree::Joliet;
                root = svd.root.clone();
            }
        }

        log::info!(
            "[iso9660] mounted {:?} tree: {} blocks of {} bytes",
            tree,
            primary.volume_space_size,
            block_size
        );

        Ok(Self {
            io,
            options,
            cache,
            handles: Handles::new(epoch),
            primary,
            joliet,
            tree,
            root: IsoDir {
                block: root.data_block(),
                size: root.size,
            },
            susp_skip,
        })
    }

    /// Descriptor matching the selected tree
    fn descriptor(&self) -> &VolumeDescriptor {
        match (&self.joliet, self.tree) {
            (Some(svd), IsoTree::Joliet) => svd,
            _ => &self.primary,
        }
    }

    fn record_info(&self, record: &DirectoryRecord) -> FileInfo {
        let rr = (self.tree == IsoTree::RockRidge)
            .then(|| RockRidge::parse(&record.system_use, self.susp_skip))
            .unwrap_or_default();

        let name = match self.tree {
            IsoTree::Joliet => record::joliet_name(record),
            _ => rr.name.clone().unwrap_or_else(|| record::plain_name(record)),
        };
        let file_type = rr.file_type().unwrap_or(if record.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        });

        let mut attributes = FileAttributes::IMMUTABLE;
        if record.flags.contains(RecordFlags::HIDDEN) {
            attributes |= FileAttributes::HIDDEN;
        }
        if rr.is_symlink() {
            attributes |= FileAttributes::SYMLINK;
        }

        FileInfo {
            name,
            file_type,
            attributes,
            size: record.size as u64,
            created: rr.created.or(record.recorded),
            modified: rr.modified.or(record.recorded),
            accessed: rr.accessed,
            location: record.data_block() as u64,
        }
    }

    fn next_record(&mut self, dir: IsoDir, cursor: &mut IsoCursor) -> FsResult<Option<DirectoryRecord>> {
        let block_size = self.io.block_size;
        loop {
            if cursor.done {
                return Ok(None);
            }
            if cursor.offset >= block_size {
                cursor.block += 1;
                cursor.offset = 0;
            }
            if cursor.block as u64 * block_size as u64 + cursor.offset as u64 >= dir.size as u64 {
                cursor.done = true;
                return Ok(None);
            }

            let key = BlockKey::sector(dir.block as u64 + cursor.block as u64);
            let slot = self.cache.read(&self.io, key)?;
            let data = &self.cache.data(slot)[cursor.offset..];
            if data[0] == 0 {
                // records never span blocks; rest of this block is padding
                cursor.offset = block_size;
                continue;
            }
            match DirectoryRecord::parse(data) {
                Some(record) => {
                    cursor.offset += record.length as usize;
                    return Ok(Some(record));
                }
                None => {
                    log::warn!(
                        "[iso9660] bad record in block {} at {}",
                        dir.block + cursor.block,
                        cursor.offset
                    );
                    cursor.offset = block_size;
                }
            }
        }
    }

    fn next_entry(&mut self, dir: IsoDir, cursor: &mut IsoCursor) -> FsResult<Option<FileInfo>> {
        while let Some(record) = self.next_record(dir, cursor)? {
            if record.flags.contains(RecordFlags::ASSOCIATED) {
                continue;
            }
            let info = self.record_info(&record);
            if cursor.previous.as_deref() == Some(&info.name[..]) {
                continue;
            }
            if record.flags.contains(RecordFlags::MULTI_EXTENT) {
                log::debug!("[iso9660] {:?}: reading first extent only", info.name_str());
            }
            cursor.previous = Some(info.name.clone());
            return Ok(Some(info));
        }
        Ok(None)
    }

    /// Folds ASCII letters only; Joliet and Rock Ridge names are UTF-8 and
    /// carry no OEM code page.
    fn names_equal(&self, a: &[u8], b: &[u8]) -> bool {
        if self.options.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    fn lookup(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<FileInfo> {
        if name.is_empty() {
            return Err(FsError::InvalidName);
        }
        let dir = *self.handles.dir(parent)?;
        let mut cursor = IsoCursor::new();
        while let Some(info) = self.next_entry(dir, &mut cursor)? {
            if self.names_equal(&info.name, name) {
                return Ok(info);
            }
        }
        Err(FsError::NotFound)
    }

    fn read_file(
        &mut self,
        handle: FileHandle,
        buf: &mut [u8],
        size: usize,
        count: usize,
    ) -> FsResult<(usize, Option<FsError>)> {
        let mut file = self.handles.file(handle)?.clone();
        if size == 0 || count == 0 {
            return Ok((0, None));
        }
        let wanted = size.checked_mul(count).ok_or(FsError::InvalidArgument)?;
        if buf.len() < wanted {
            return Err(FsError::InvalidArgument);
        }

        let block_size = self.io.block_size as u64;
        let mut elements = 0;
        let mut failure = None;
        'elements: for chunk in buf[..wanted].chunks_exact_mut(size) {
            if file.cursor + size as u64 > file.info.size {
                break;
            }
            let mut offset = file.cursor;
            let mut copied = 0;
            while copied < size {
                let block = file.info.location + offset / block_size;
                let within = (offset % block_size) as usize;
                let take = (block_size as usize - within).min(size - copied);
                match self.cache.read(&self.io, BlockKey::sector(block)) {
                    Ok(slot) => {
                        chunk[copied..copied + take]
                            .copy_from_slice(&self.cache.data(slot)[within..within + take]);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break 'elements;
                    }
                }
                copied += take;
                offset += take as u64;
            }
            file.cursor += size as u64;
            elements += 1;
        }

        *self.handles.file_mut(handle)? = file;
        Ok((elements, failure))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// ISO9660 filesystem instance bound to one partition
pub struct IsoFs {
    partition: Partition,
    options: IsoOptions,
    error: Option<FsError>,
    /// Number of mount attempts, stamped into every handle
    mounts: u32,
    volume: Option<IsoVolume>,
}

impl IsoFs {
    pub fn new(partition: Partition, options: IsoOptions) -> Self {
        Self {
            partition,
            options,
            error: None,
            mounts: 0,
            volume: None,
        }
    }

    pub fn options(&self) -> &IsoOptions {
        &self.options
    }

    /// Mutable options, `None` while mounted
    pub fn options_mut(&mut self) -> Option<&mut IsoOptions> {
        if self.volume.is_some() {
            None
        } else {
            Some(&mut self.options)
        }
    }

    pub fn set_options(&mut self, options: IsoOptions) -> FsResult<()> {
        if self.volume.is_some() {
            return self.record(Err(FsError::Busy));
        }
        self.options = options;
        Ok(())
    }

    /// Directory tree chosen at mount
    pub fn tree(&self) -> Option<IsoTree> {
        self.volume.as_ref().map(|volume| volume.tree)
    }

    pub fn block_size(&self) -> Option<usize> {
        self.volume.as_ref().map(|volume| volume.io.block_size)
    }

    pub fn primary_descriptor(&self) -> Option<&VolumeDescriptor> {
        self.volume.as_ref().map(|volume| &volume.primary)
    }

    fn volume_mut(&mut self) -> FsResult<&mut IsoVolume> {
        self.volume.as_mut().ok_or(FsError::Unmounted)
    }

    fn record<T>(&mut self, result: FsResult<T>) -> FsResult<T> {
        if let Err(err) = &result {
            self.error = Some(*err);
        }
        result
    }
}

impl FileSystem for IsoFs {
    fn mount(&mut self) -> FsResult<()> {
        if self.volume.is_some() {
            return self.record(Err(FsError::AlreadyMounted));
        }
        self.mounts = self.mounts.wrapping_add(1);
        let result = IsoVolume::mount(self.partition.clone(), self.options.clone(), self.mounts);
        match self.record(result) {
            Ok(volume) => {
                self.volume = Some(volume);
                Ok(())
            }
            Err(err) => {
                log::warn!("[iso9660] mount of {} failed: {}", self.partition.name, err);
                Err(err)
            }
        }
    }

    fn unmount(&mut self) -> FsResult<()> {
        let result = self.volume_mut().and_then(|volume| {
            if !volume.handles.is_empty() {
                return Err(FsError::Busy);
            }
            volume.cache.release_all();
            Ok(())
        });
        self.record(result)?;
        self.volume = None;
        log::info!("[iso9660] unmounted {}", self.partition.name);
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    fn name(&self) -> &'static str {
        "ISO9660"
    }

    fn last_error(&self) -> Option<FsError> {
        self.error
    }

    fn set_error(&mut self, err: FsError) {
        self.error = Some(err);
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn volume_string(&mut self, kind: VolumeString) -> FsResult<String> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.descriptor().text(kind));
        self.record(result)
    }

    fn volume_timestamp(&mut self, kind: VolumeTimestamp) -> FsResult<Timestamp> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.descriptor().timestamp(kind));
        self.record(result)
    }

    fn root_dir_open(&mut self) -> FsResult<DirHandle> {
        let result = self.volume_mut().and_then(|volume| {
            let root = volume.root;
            volume.handles.open_dir(None, root)
        });
        self.record(result)
    }

    fn dir_open(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<DirHandle> {
        let result = self.volume_mut().and_then(|volume| {
            let info = volume.lookup(parent, name)?;
            if info.file_type != FileType::Directory {
                return Err(FsError::NotADirectory);
            }
            volume.handles.open_dir(Some(parent), IsoDir::from_info(&info))
        });
        self.record(result)
    }

    fn dir_close(&mut self, dir: DirHandle) -> FsResult<()> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.close_dir(dir).map(drop));
        self.record(result)
    }

    fn dir_iter_start(&mut self, dir: DirHandle) -> FsResult<DirIter> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.dir(dir).map(|_| DirIter::new(dir, 0)));
        self.record(result)
    }

    fn dir_iter_next(&mut self, iter: &mut DirIter) -> FsResult<bool> {
        let result = self.volume_mut().and_then(|volume| {
            let dir = *volume.handles.dir(iter.dir)?;
            let mut cursor = IsoCursor::from_iter(iter);
            let next = volume.next_entry(dir, &mut cursor);
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
            return self.record(Err(FsError::ReadOnly));
        }
        let result = self.volume_mut().and_then(|volume| {
            let info = volume.lookup(parent, name)?;
            if info.file_type == FileType::Directory {
                return Err(FsError::IsADirectory);
            }
            volume.handles.open_file(parent, IsoFile { info, cursor: 0 })
        });
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
        let result = self.volume_mut().and_then(|volume| {
            let file = volume.handles.file_mut(file)?;
            let target = seek_target(file.cursor, file.info.size, pos).ok_or(FsError::InvalidArgument)?;
            file.cursor = target;
            Ok(target)
        });
        self.record(result)
    }

    fn file_tell(&mut self, file: FileHandle) -> FsResult<u64> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.file(file).map(|file| file.cursor));
        self.record(result)
    }

    fn file_is_eof(&mut self, file: FileHandle) -> FsResult<bool> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.file(file).map(|file| file.cursor == file.info.size));
        self.record(result)
    }

    fn file_size(&mut self, file: FileHandle) -> FsResult<u64> {
        let result = self
            .volume_mut()
            .and_then(|volume| volume.handles.file(file).map(|file| file.info.size));
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use super::descriptor::tests::primary;
    use super::record::tests::record;
    use super::rockridge::tests::{entry, nm, px, sp};
    use super::*;
    use crate::block::MemDrive;
    use alloc::sync::Arc;

    const BLOCK: usize = 2048;

    struct Image {
        bytes: Vec<u8>,
    }

    impl Image {
        /// PVD at 16, terminator at 17, root directory at 20
        fn new(blocks: usize) -> Self {
            let mut bytes = vec![0u8; blocks * BLOCK];
            bytes[16 * BLOCK..17 * BLOCK].copy_from_slice(&primary(20, BLOCK as u32));
            let mut image = Self { bytes };
            image.terminator(17);
            image
        }

        fn terminator(&mut self, lba: usize) {
            let block = &mut self.bytes[lba * BLOCK..(lba + 1) * BLOCK];
            block.fill(0);
            block[0] = 255;
            block[1..6].copy_from_slice(STANDARD_ID);
            block[6] = 1;
        }

        /// Supplementary Joliet descriptor at 17 with its root at `root`
        fn joliet(&mut self, root: u32) {
            let mut svd = primary(root, BLOCK as u32);
            svd[0] = 2;
            svd[88..91].copy_from_slice(b"%/E");
            self.bytes[17 * BLOCK..18 * BLOCK].copy_from_slice(&svd);
            self.terminator(18);
        }

        /// Patches the root record size in the primary descriptor
        fn primary_root_size(&mut self, size: u32) {
            let root = 16 * BLOCK + 156;
            self.bytes[root + 10..root + 14].copy_from_slice(&size.to_le_bytes());
            self.bytes[root + 14..root + 18].copy_from_slice(&size.to_be_bytes());
        }

        fn directory(&mut self, lba: usize, records: &[Vec<u8>]) {
            let mut offset = lba * BLOCK;
            for rec in records {
                if (offset % BLOCK) + rec.len() > BLOCK {
                    offset = (offset / BLOCK + 1) * BLOCK;
                }
                self.bytes[offset..offset + rec.len()].copy_from_slice(rec);
                offset += rec.len();
            }
        }

        fn data(&mut self, lba: usize, data: &[u8]) {
            self.bytes[lba * BLOCK..lba * BLOCK + data.len()].copy_from_slice(data);
        }

        fn fs(&self, options: IsoOptions) -> IsoFs {
            let drive = Arc::new(MemDrive::new(self.bytes.clone(), BLOCK));
            IsoFs::new(Partition::whole(drive), options)
        }
    }

    fn joliet_id(name: &str) -> Vec<u8> {
        name.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect()
    }

    fn plain_image() -> Image {
        let mut image = Image::new(40);
        image.directory(
            20,
            &[
                record(&[0], 20, BLOCK as u32, 0x02, &[]),
                record(&[1], 20, BLOCK as u32, 0x02, &[]),
                record(b"DOCS", 21, BLOCK as u32, 0x02, &[]),
                record(b"HELLO.TXT;1", 30, 11, 0x00, &[]),
                record(b"SECRET.;1", 31, 4, 0x01, &[]),
            ],
        );
        image.directory(
            21,
            &[
                record(&[0], 21, BLOCK as u32, 0x02, &[]),
                record(&[1], 20, BLOCK as u32, 0x02, &[]),
                record(b"BIG.BIN;1", 32, 5000, 0x00, &[]),
            ],
        );
        image.data(30, b"hello world");
        image.data(31, b"1234");
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
        image.data(32, &big);
        image
    }

    fn names(fs: &mut IsoFs, dir: DirHandle) -> Vec<Vec<u8>> {
        let mut iter = fs.dir_iter_start(dir).unwrap();
        let mut out = Vec::new();
        while fs.dir_iter_next(&mut iter).unwrap() {
            out.push(iter.name().unwrap().to_vec());
        }
        out
    }

    #[test]
    fn test_plain_tree() {
        let image = plain_image();
        let mut fs = image.fs(IsoOptions::default());
        assert_eq!(fs.root_dir_open().err(), Some(FsError::Unmounted));
        fs.mount().unwrap();
        assert_eq!(fs.tree(), Some(IsoTree::Plain));
        assert_eq!(fs.name(), "ISO9660");
        assert_eq!(fs.block_size(), Some(2048));

        let root = fs.root_dir_open().unwrap();
        assert_eq!(
            names(&mut fs, root),
            vec![b".".to_vec(), b"..".to_vec(), b"DOCS".to_vec(), b"HELLO.TXT".to_vec(), b"SECRET".to_vec()]
        );
        let secret = fs.file_info(root, b"secret").unwrap();
        assert!(secret.attributes.contains(FileAttributes::HIDDEN | FileAttributes::IMMUTABLE));
        assert_eq!(secret.modified, Some(Timestamp::new(2020, 1, 2, 3, 4, 5)));
    }

    #[test]
    fn test_case_sensitivity() {
        let image = plain_image();
        let mut fs = image.fs(IsoOptions {
            case_sensitive: true,
            ..IsoOptions::default()
        });
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        assert_eq!(fs.file_info(root, b"hello.txt").err(), Some(FsError::NotFound));
        assert!(fs.file_info(root, b"HELLO.TXT").is_ok());
    }

    #[test]
    fn test_read_and_seek() {
        let image = plain_image();
        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        let docs = fs.dir_open(root, b"docs").unwrap();
        assert_eq!(fs.dir_open(root, b"HELLO.TXT").err(), Some(FsError::NotADirectory));
        assert_eq!(fs.file_open(root, b"DOCS", OpenMode::Read).err(), Some(FsError::IsADirectory));
        assert_eq!(fs.file_open(root, b"HELLO.TXT", OpenMode::Write).err(), Some(FsError::ReadOnly));

        let file = fs.file_open(docs, b"big.bin", OpenMode::Read).unwrap();
        let mut buf = vec![0u8; 5001];
        assert_eq!(fs.file_read(file, &mut buf, 5001, 1), Ok(0));
        assert_eq!(fs.file_read(file, &mut buf, 2500, 2), Ok(2));
        let expected: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
        assert_eq!(&buf[..5000], &expected[..]);
        assert_eq!(fs.file_is_eof(file), Ok(true));

        assert_eq!(fs.file_seek(file, SeekFrom::Start(2040)), Ok(2040));
        assert_eq!(fs.file_read(file, &mut buf, 16, 1), Ok(1));
        assert_eq!(&buf[..16], &expected[2040..2056]);
        assert_eq!(fs.file_seek(file, SeekFrom::End(1)), Err(FsError::InvalidArgument));
        assert_eq!(fs.file_tell(file), Ok(2056));

        assert_eq!(fs.dir_close(docs).err(), Some(FsError::Busy));
        assert_eq!(fs.unmount().err(), Some(FsError::Busy));
        fs.file_close(file).unwrap();
        fs.dir_close(docs).unwrap();
        fs.dir_close(root).unwrap();
        fs.unmount().unwrap();
    }

    #[test]
    fn test_handles_stale_after_remount() {
        let image = plain_image();
        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        let old_root = fs.root_dir_open().unwrap();
        let old_file = fs.file_open(old_root, b"HELLO.TXT", OpenMode::Read).unwrap();
        let mut old_iter = fs.dir_iter_start(old_root).unwrap();
        fs.file_close(old_file).unwrap();
        fs.dir_close(old_root).unwrap();
        fs.unmount().unwrap();
        fs.mount().unwrap();

        let root = fs.root_dir_open().unwrap();
        let file = fs.file_open(root, b"HELLO.TXT", OpenMode::Read).unwrap();
        assert_ne!(old_root, root);
        assert_ne!(old_file, file);

        let mut buf = [0u8; 11];
        assert_eq!(fs.file_read(old_file, &mut buf, 1, 1).err(), Some(FsError::InvalidHandle));
        assert_eq!(fs.file_tell(old_file).err(), Some(FsError::InvalidHandle));
        assert_eq!(fs.file_close(old_file).err(), Some(FsError::InvalidHandle));
        assert_eq!(fs.dir_close(old_root).err(), Some(FsError::InvalidHandle));
        assert_eq!(fs.dir_iter_next(&mut old_iter).err(), Some(FsError::InvalidHandle));

        assert_eq!(fs.file_read(file, &mut buf, 11, 1), Ok(1));
        assert_eq!(&buf, b"hello world");
        fs.file_close(file).unwrap();
        fs.dir_close(root).unwrap();
    }

    #[test]
    fn test_joliet_tree() {
        let mut image = plain_image();
        image.joliet(25);
        image.directory(
            25,
            &[
                record(&[0], 25, BLOCK as u32, 0x02, &[]),
                record(&[1], 25, BLOCK as u32, 0x02, &[]),
                record(&joliet_id("hello world.txt;1"), 30, 11, 0x00, &[]),
            ],
        );

        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        assert_eq!(fs.tree(), Some(IsoTree::Joliet));
        let root = fs.root_dir_open().unwrap();
        assert_eq!(names(&mut fs, root)[2], b"hello world.txt".to_vec());
        let file = fs.file_open(root, b"Hello World.TXT", OpenMode::Read).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.file_read(file, &mut buf, 11, 1), Ok(1));
        assert_eq!(&buf, b"hello world");
        fs.file_close(file).unwrap();
        fs.dir_close(root).unwrap();
        fs.unmount().unwrap();

        let mut fs = image.fs(IsoOptions {
            enable_joliet: false,
            ..IsoOptions::default()
        });
        fs.mount().unwrap();
        assert_eq!(fs.tree(), Some(IsoTree::Plain));
    }

    #[test]
    fn test_case_folding_is_ascii_only() {
        let mut image = plain_image();
        image.joliet(25);
        image.directory(
            25,
            &[
                record(&[0], 25, BLOCK as u32, 0x02, &[]),
                record(&[1], 25, BLOCK as u32, 0x02, &[]),
                record(&joliet_id("Ärger.txt;1"), 30, 11, 0x00, &[]),
            ],
        );

        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        assert!(fs.file_info(root, "ÄRGER.TXT".as_bytes()).is_ok());
        assert_eq!(fs.file_info(root, "ärger.txt".as_bytes()).err(), Some(FsError::NotFound));
    }

    #[test]
    fn test_rock_ridge_tree() {
        let mut image = Image::new(40);
        let mut tf = vec![0x02];
        tf.extend_from_slice(&[110, 3, 4, 5, 6, 7, 0]);
        let mut file_su = nm(b"Long Name.tar.gz");
        file_su.extend(px(0o100644));
        file_su.extend(entry(b"TF", &tf));
        let mut link_su = nm(b"link");
        link_su.extend(px(0o120777));
        image.directory(
            20,
            &[
                record(&[0], 20, BLOCK as u32, 0x02, &sp()),
                record(&[1], 20, BLOCK as u32, 0x02, &[]),
                record(b"LONG_NAM.GZ;1", 30, 3, 0x00, &file_su),
                record(b"LINK.;1", 0, 0, 0x00, &link_su),
            ],
        );
        image.data(30, b"abc");

        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        assert_eq!(fs.tree(), Some(IsoTree::RockRidge));
        let root = fs.root_dir_open().unwrap();
        assert_eq!(
            names(&mut fs, root),
            vec![b".".to_vec(), b"..".to_vec(), b"Long Name.tar.gz".to_vec(), b"link".to_vec()]
        );
        let info = fs.file_info(root, b"long name.tar.gz").unwrap();
        assert_eq!(info.modified, Some(Timestamp::new(2010, 3, 4, 5, 6, 7)));
        assert_eq!(info.created, Some(Timestamp::new(2020, 1, 2, 3, 4, 5)));
        let link = fs.file_info(root, b"link").unwrap();
        assert!(link.attributes.contains(FileAttributes::SYMLINK));
        fs.dir_close(root).unwrap();
        fs.unmount().unwrap();

        let mut fs = image.fs(IsoOptions {
            enable_rock_ridge: false,
            ..IsoOptions::default()
        });
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        assert_eq!(names(&mut fs, root)[2], b"LONG_NAM.GZ".to_vec());
    }

    #[test]
    fn test_records_do_not_span_blocks() {
        let mut image = Image::new(40);
        let mut records = vec![
            record(&[0], 20, 2 * BLOCK as u32, 0x02, &[]),
            record(&[1], 20, 2 * BLOCK as u32, 0x02, &[]),
        ];
        for i in 0..60 {
            let name = alloc::format!("FILE{:04}.DAT;1", i);
            records.push(record(name.as_bytes(), 30, 0, 0, &[]));
        }
        image.directory(20, &records);
        image.primary_root_size(2 * BLOCK as u32);

        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        let listed = names(&mut fs, root);
        assert_eq!(listed.len(), 62);
        assert_eq!(listed[61], b"FILE0059.DAT".to_vec());
    }

    #[test]
    fn test_multi_extent_listed_once() {
        let mut image = Image::new(40);
        image.directory(
            20,
            &[
                record(&[0], 20, BLOCK as u32, 0x02, &[]),
                record(&[1], 20, BLOCK as u32, 0x02, &[]),
                record(b"HUGE.BIN;1", 30, 2048, 0x80, &[]),
                record(b"HUGE.BIN;1", 31, 100, 0x00, &[]),
                record(b"NEXT.BIN;1", 32, 1, 0x00, &[]),
            ],
        );
        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        let listed = names(&mut fs, root);
        assert_eq!(listed, vec![b".".to_vec(), b"..".to_vec(), b"HUGE.BIN".to_vec(), b"NEXT.BIN".to_vec()]);
        assert_eq!(fs.file_info(root, b"HUGE.BIN").unwrap().size, 2048);
    }

    #[test]
    fn test_volume_strings() {
        let image = plain_image();
        let mut fs = image.fs(IsoOptions::default());
        fs.mount().unwrap();
        assert_eq!(fs.volume_string(VolumeString::Label).unwrap(), "CDROM1");
        assert_eq!(fs.volume_string(VolumeString::System).unwrap(), "LINUX");
        assert_eq!(fs.volume_string(VolumeString::Serial).err(), Some(FsError::NotSupported));
        let created = fs.volume_timestamp(VolumeTimestamp::Created).unwrap();
        assert_eq!((created.year, created.month, created.day), (2023, 6, 15));
        assert_eq!(
            fs.volume_timestamp(VolumeTimestamp::Expires).err(),
            Some(FsError::NotFound)
        );
    }

    #[test]
    fn test_mount_failures() {
        let mut image = plain_image();
        image.bytes[16 * BLOCK + 1] = b'X';
        let mut fs = image.fs(IsoOptions::default());
        assert_eq!(fs.mount().err(), Some(FsError::InvalidFsType));
        assert_eq!(fs.last_error(), Some(FsError::InvalidFsType));

        let mut image = plain_image();
        image.terminator(16);
        assert_eq!(image.fs(IsoOptions::default()).mount().err(), Some(FsError::InvalidFsType));

        let image = plain_image();
        let mut fs = image.fs(IsoOptions {
            diskbuf_count: 0,
            ..IsoOptions::default()
        });
        assert_eq!(fs.mount().err(), Some(FsError::InvalidArgument));
        fs.options_mut().unwrap().diskbuf_count = 4;
        fs.mount().unwrap();
        assert!(fs.options_mut().is_none());
    }

    #[test]
    fn test_small_drive_sectors() {
        let image = plain_image();
        let drive = Arc::new(MemDrive::new(image.bytes.clone(), 512));
        let mut fs = IsoFs::new(Partition::whole(drive), IsoOptions::default());
        fs.mount().unwrap();
        let root = fs.root_dir_open().unwrap();
        let file = fs.file_open(root, b"hello.txt", OpenMode::Read).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.file_read(file, &mut buf, 1, 11), Ok(11));
        assert_eq!(&buf, b"hello world");
    }
}
