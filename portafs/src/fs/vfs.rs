//! # Filesystem Interface
//!
//! Filesystem-agnostic surface shared by every driver.
//!
//! ## Design
//!
//! A mounted volume owns an arena of open directories and files. Callers
//! hold small `Copy` handles ([`DirHandle`], [`FileHandle`]) instead of
//! pointers; the arena refuses to close a directory that still has open
//! children, so a child can never outlive its parent.
//!
//! Names are byte strings. Long names decode to UTF-8, short FAT names
//! stay in their OEM codepage, which is what case folding operates on.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::block::BlockError;
use crate::time::Timestamp;

use super::handle::Handle;

/// Filesystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No such file or directory
    NotFound,
    /// Operation on an unmounted filesystem
    Unmounted,
    /// Cluster chain left the valid range
    InvalidCluster,
    /// Volume layout or type could not be determined
    InvalidFsType,
    /// Invalid file or directory name
    InvalidName,
    /// Drive reported an error
    Io(BlockError),
    /// Drive transferred fewer sectors than requested
    ShortTransfer,
    /// Invalid argument (seek target, buffer size, option value)
    InvalidArgument,
    /// Stale or foreign handle
    InvalidHandle,
    /// Handle still has open children, or options locked by a mount
    Busy,
    /// Not a directory
    NotADirectory,
    /// Is a directory
    IsADirectory,
    /// Read-only filesystem
    ReadOnly,
    /// Not supported
    NotSupported,
    /// Already mounted
    AlreadyMounted,
}

impl FsError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsError::NotFound => "No such file or directory",
            FsError::Unmounted => "Unmounted file system",
            FsError::InvalidCluster => "Invalid cluster index",
            FsError::InvalidFsType => "Invalid file system type",
            FsError::InvalidName => "Invalid file or directory name",
            FsError::Io(_) => "I/O error",
            FsError::ShortTransfer => "Short transfer from drive",
            FsError::InvalidArgument => "Invalid argument",
            FsError::InvalidHandle => "Invalid handle",
            FsError::Busy => "Resource busy",
            FsError::NotADirectory => "Not a directory",
            FsError::IsADirectory => "Is a directory",
            FsError::ReadOnly => "Read-only file system",
            FsError::NotSupported => "Operation not supported",
            FsError::AlreadyMounted => "File system already mounted",
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::Io(err) => write!(f, "{}: {}", self.as_str(), err),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl From<BlockError> for FsError {
    fn from(err: BlockError) -> Self {
        FsError::Io(err)
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// File type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Unknown,
    Directory,
    File,
}

bitflags! {
    /// Filesystem-independent attribute bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u16 {
        const HIDDEN = 1 << 0;
        const SYSTEM = 1 << 1;
        const SYMLINK = 1 << 2;
        const COMPRESSED = 1 << 3;
        const ENCRYPTED = 1 << 4;
        const IMMUTABLE = 1 << 5;
    }
}

/// Which per-entry timestamp to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    Created,
    Modified,
    Accessed,
}

/// Volume-level text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeString {
    /// Volume label / volume identifier
    Label,
    /// OEM name (FAT) or system identifier (ISO9660)
    System,
    /// Volume serial number
    Serial,
    VolumeSet,
    Publisher,
    /// Data preparer
    Preparer,
    Application,
    CopyrightFile,
    AbstractFile,
    BibliographyFile,
}

/// Volume-level dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTimestamp {
    Created,
    Modified,
    Expires,
    Effective,
}

/// Seek position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// From start of file
    Start(u64),
    /// From current position
    Current(i64),
    /// From end of file
    End(i64),
}

/// File open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// An open directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(pub(crate) Handle);

/// An open file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) Handle);

/// Decoded directory entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    /// Display name
    pub name: Vec<u8>,
    pub file_type: FileType,
    pub attributes: FileAttributes,
    /// Size in bytes
    pub size: u64,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub accessed: Option<Timestamp>,
    /// First cluster (FAT) or extent LBA (ISO9660)
    pub(crate) location: u64,
}

impl FileInfo {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Returns the name if it is valid UTF-8
    pub fn name_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.name).ok()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn timestamp(&self, kind: TimestampKind) -> Option<Timestamp> {
        match kind {
            TimestampKind::Created => self.created,
            TimestampKind::Modified => self.modified,
            TimestampKind::Accessed => self.accessed,
        }
    }
}

/// Forward-only cursor over one directory
///
/// Produced by [`FileSystem::dir_iter_start`] and advanced by
/// [`FileSystem::dir_iter_next`]. The getters report the entry decoded by
/// the last successful advance.
#[derive(Debug, Clone)]
pub struct DirIter {
    pub(crate) dir: DirHandle,
    /// Block index within the directory (sector, cluster or logical block)
    pub(crate) block: u32,
    /// Cluster backing `block`, for chained directories
    pub(crate) cluster: u32,
    /// Entry index (FAT) or byte offset (ISO9660) inside the block
    pub(crate) offset: usize,
    pub(crate) done: bool,
    pub(crate) current: Option<FileInfo>,
}

impl DirIter {
    pub(crate) fn new(dir: DirHandle, cluster: u32) -> Self {
        Self {
            dir,
            block: 0,
            cluster,
            offset: 0,
            done: false,
            current: None,
        }
    }

    /// Directory being iterated
    pub fn dir(&self) -> DirHandle {
        self.dir
    }

    /// Entry produced by the last advance
    pub fn entry(&self) -> Option<&FileInfo> {
        self.current.as_ref()
    }

    pub fn name(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|info| info.name())
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.current.as_ref().map(|info| info.file_type)
    }

    pub fn attributes(&self) -> Option<FileAttributes> {
        self.current.as_ref().map(|info| info.attributes)
    }

    pub fn size(&self) -> Option<u64> {
        self.current.as_ref().map(|info| info.size)
    }

    pub fn timestamp(&self, kind: TimestampKind) -> Option<Timestamp> {
        self.current.as_ref().and_then(|info| info.timestamp(kind))
    }

    /// True once the end of the directory has been reached
    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Filesystem driver operations
///
/// Every failing call also records its error, retrievable through
/// [`FileSystem::last_error`].
pub trait FileSystem {
    /// Reads the volume metadata and locks the options
    fn mount(&mut self) -> FsResult<()>;

    /// Releases cached blocks; fails while handles are open
    fn unmount(&mut self) -> FsResult<()>;

    fn is_mounted(&self) -> bool;

    /// Returns the filesystem name ("FAT12", "ISO9660", ...)
    fn name(&self) -> &'static str;

    /// Error recorded by the most recent failing call
    fn last_error(&self) -> Option<FsError>;

    /// Records `err` as the most recent error
    fn set_error(&mut self, err: FsError);

    /// Message for the most recent error
    fn error_string(&self) -> Option<&'static str> {
        self.last_error().map(|err| err.as_str())
    }

    /// True if the volume refuses writes
    fn is_read_only(&self) -> bool;

    fn volume_string(&mut self, kind: VolumeString) -> FsResult<String>;

    fn volume_timestamp(&mut self, kind: VolumeTimestamp) -> FsResult<Timestamp>;

    fn root_dir_open(&mut self) -> FsResult<DirHandle>;

    fn dir_open(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<DirHandle>;

    fn dir_close(&mut self, dir: DirHandle) -> FsResult<()>;

    fn dir_iter_start(&mut self, dir: DirHandle) -> FsResult<DirIter>;

    /// Advances to the next entry; `Ok(false)` at the end of the directory
    fn dir_iter_next(&mut self, iter: &mut DirIter) -> FsResult<bool>;

    fn dir_iter_end(&mut self, iter: DirIter) {
        drop(iter);
    }

    /// Looks up `name` in `parent` without opening it
    fn file_info(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<FileInfo>;

    fn file_open(&mut self, parent: DirHandle, name: &[u8], mode: OpenMode) -> FsResult<FileHandle>;

    fn file_close(&mut self, file: FileHandle) -> FsResult<()>;

    /// Reads up to `count` elements of `size` bytes into `buf`
    ///
    /// Returns the number of whole elements read. Fewer than `count` means
    /// the end of the file was reached, which is not an error.
    fn file_read(&mut self, file: FileHandle, buf: &mut [u8], size: usize, count: usize) -> FsResult<usize>;

    /// Moves the cursor; targets outside `[0, size]` fail and leave it unchanged
    fn file_seek(&mut self, file: FileHandle, pos: SeekFrom) -> FsResult<u64>;

    fn file_tell(&mut self, file: FileHandle) -> FsResult<u64>;

    fn file_is_eof(&mut self, file: FileHandle) -> FsResult<bool>;

    fn file_size(&mut self, file: FileHandle) -> FsResult<u64>;

    fn dir_create(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<()> {
        let _ = (parent, name);
        Err(reject_write(self))
    }

    fn dir_remove(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<()> {
        let _ = (parent, name);
        Err(reject_write(self))
    }

    fn file_create(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<()> {
        let _ = (parent, name);
        Err(reject_write(self))
    }

    fn file_remove(&mut self, parent: DirHandle, name: &[u8]) -> FsResult<()> {
        let _ = (parent, name);
        Err(reject_write(self))
    }

    fn file_write(&mut self, file: FileHandle, buf: &[u8], size: usize, count: usize) -> FsResult<usize> {
        let _ = (file, buf, size, count);
        Err(reject_write(self))
    }

    fn file_flush(&mut self, file: FileHandle) -> FsResult<()> {
        let _ = file;
        Err(reject_write(self))
    }
}

/// Error for a write-side operation, recorded on `fs`
fn reject_write<F: FileSystem + ?Sized>(fs: &mut F) -> FsError {
    let err = if fs.is_read_only() {
        FsError::ReadOnly
    } else {
        FsError::NotSupported
    };
    fs.set_error(err);
    err
}

/// Resolves a seek request against a cursor and a file size
///
/// Returns `None` when the target falls outside `[0, size]`.
pub(crate) fn seek_target(cursor: u64, size: u64, pos: SeekFrom) -> Option<u64> {
    let target = match pos {
        SeekFrom::Start(n) => n as i128,
        SeekFrom::Current(n) => cursor as i128 + n as i128,
        SeekFrom::End(n) => size as i128 + n as i128,
    };
    if target < 0 || target > size as i128 {
        None
    } else {
        Some(target as u64)
    }
}
