//! # Block Layer
//!
//! Drive abstraction consumed by the filesystem drivers.
//!
//! ## Design
//!
//! The block layer provides:
//! - Abstract [`Drive`] trait for sector-addressed storage
//! - Transfer counts so callers can detect short reads and writes
//! - An in-memory drive ([`MemDrive`]) and, with `std`, a raw image drive
//! - Partition table support (MBR/GPT) in [`partitions`]
//!
//! Drives use interior mutability so they can be shared through `Arc`
//! between a partition reader and any number of mounted volumes.

pub mod partitions;

pub use partitions::{Partition, PartitionEntry};

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

/// Standard sector size (512 bytes)
pub const SECTOR_SIZE: usize = 512;

/// Block device errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// Device not found
    NotFound,
    /// Device busy
    Busy,
    /// I/O error
    IoError,
    /// Invalid sector number
    InvalidSector,
    /// Buffer is not a whole number of sectors
    InvalidSize,
    /// Device not ready
    NotReady,
    /// Write protected
    WriteProtected,
    /// On-disk metadata failed validation
    Corrupted,
    /// Unsupported operation
    Unsupported,
}

impl BlockError {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockError::NotFound => "device not found",
            BlockError::Busy => "device busy",
            BlockError::IoError => "I/O error",
            BlockError::InvalidSector => "invalid sector number",
            BlockError::InvalidSize => "invalid buffer size",
            BlockError::NotReady => "device not ready",
            BlockError::WriteProtected => "device is write protected",
            BlockError::Corrupted => "on-disk metadata is corrupted",
            BlockError::Unsupported => "unsupported operation",
        }
    }
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive geometry and identification
#[derive(Debug, Clone)]
pub struct DriveInfo {
    /// Drive name (e.g., "mem0", an image path)
    pub name: String,
    /// Bytes per sector
    pub sector_size: usize,
    /// Total number of sectors
    pub sector_count: u64,
    /// Whether the drive is read-only
    pub read_only: bool,
    /// Drive model/description
    pub model: String,
}

impl DriveInfo {
    /// Returns the last addressable LBA, or `None` for an empty drive.
    pub fn lba_max(&self) -> Option<u64> {
        self.sector_count.checked_sub(1)
    }

    /// Returns drive size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }
}

/// Drive trait - every sector-addressed storage backend implements this
///
/// Transfers move `buffer.len() / sector_size` whole sectors and report how
/// many were actually moved. A count lower than requested is a failed
/// transfer; the caller decides how to surface it.
pub trait Drive: Send + Sync {
    /// Returns drive information
    fn info(&self) -> DriveInfo;

    /// Reads sectors starting at `lba`, returning the number of sectors read
    fn read_sectors(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, BlockError>;

    /// Writes sectors starting at `lba`, returning the number of sectors written
    fn write_sectors(&self, lba: u64, buffer: &[u8]) -> Result<usize, BlockError>;

    /// Flushes pending writes to the backing store
    fn flush(&self) -> Result<(), BlockError>;
}

/// Splits a transfer request into `(sectors requested, sectors available)`.
fn clamp_transfer(
    lba: u64,
    len: usize,
    sector_size: usize,
    sector_count: u64,
) -> Result<(usize, usize), BlockError> {
    if sector_size == 0 || len % sector_size != 0 {
        return Err(BlockError::InvalidSize);
    }
    let requested = len / sector_size;
    let available = sector_count.saturating_sub(lba).min(requested as u64) as usize;
    Ok((requested, available))
}

// ============================================================================
// Memory Drive
// ============================================================================

/// A drive backed by a byte vector
pub struct MemDrive {
    name: String,
    sector_size: usize,
    read_only: bool,
    data: Mutex<Vec<u8>>,
}

impl MemDrive {
    /// Wraps `data` as a drive; a trailing partial sector is not addressable.
    pub fn new(data: Vec<u8>, sector_size: usize) -> Self {
        Self {
            name: String::from("mem0"),
            sector_size,
            read_only: false,
            data: Mutex::new(data),
        }
    }

    /// Creates a zero-filled drive of `sector_count` sectors
    pub fn zeroed(sector_count: u64, sector_size: usize) -> Self {
        Self::new(vec![0u8; sector_count as usize * sector_size], sector_size)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns a copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Consumes the drive and returns its contents
    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }

    fn sector_count(&self, len: usize) -> u64 {
        if self.sector_size == 0 {
            0
        } else {
            (len / self.sector_size) as u64
        }
    }
}

impl Drive for MemDrive {
    fn info(&self) -> DriveInfo {
        DriveInfo {
            name: self.name.clone(),
            sector_size: self.sector_size,
            sector_count: self.sector_count(self.data.lock().len()),
            read_only: self.read_only,
            model: String::from("Memory Drive"),
        }
    }

    fn read_sectors(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, BlockError> {
        let data = self.data.lock();
        let (_, count) =
            clamp_transfer(lba, buffer.len(), self.sector_size, self.sector_count(data.len()))?;
        if count == 0 {
            return Ok(0);
        }
        let start = lba as usize * self.sector_size;
        let len = count * self.sector_size;
        buffer[..len].copy_from_slice(&data[start..start + len]);
        Ok(count)
    }

    fn write_sectors(&self, lba: u64, buffer: &[u8]) -> Result<usize, BlockError> {
        if self.read_only {
            return Err(BlockError::WriteProtected);
        }
        let mut data = self.data.lock();
        let (_, count) =
            clamp_transfer(lba, buffer.len(), self.sector_size, self.sector_count(data.len()))?;
        if count == 0 {
            return Ok(0);
        }
        let start = lba as usize * self.sector_size;
        let len = count * self.sector_size;
        data[start..start + len].copy_from_slice(&buffer[..len]);
        Ok(count)
    }

    fn flush(&self) -> Result<(), BlockError> {
        Ok(())
    }
}

// ============================================================================
// Raw Image Drive
// ============================================================================

#[cfg(feature = "std")]
pub use image::{ImageDrive, ImageOptions};

#[cfg(feature = "std")]
mod image {
    use super::{clamp_transfer, BlockError, Drive, DriveInfo, SECTOR_SIZE};
    use alloc::string::{String, ToString};
    use spin::Mutex;
    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
    use std::path::Path;

    /// How a raw image file is presented as a drive
    #[derive(Debug, Clone)]
    pub struct ImageOptions {
        /// Byte offset of sector 0 inside the file
        pub offset: u64,
        /// Bytes per sector
        pub sector_size: usize,
        /// Sector count override; derived from the file length when `None`
        pub sector_count: Option<u64>,
        /// Open without write access
        pub read_only: bool,
    }

    impl Default for ImageOptions {
        fn default() -> Self {
            Self {
                offset: 0,
                sector_size: SECTOR_SIZE,
                sector_count: None,
                read_only: false,
            }
        }
    }

    /// A drive backed by a raw disk image file
    pub struct ImageDrive {
        name: String,
        options: ImageOptions,
        sector_count: u64,
        file: Mutex<File>,
    }

    impl ImageDrive {
        /// Opens `path` read-write with `sector_size` sectors
        pub fn open<P: AsRef<Path>>(path: P, sector_size: usize) -> Result<Self, BlockError> {
            Self::open_with(
                path,
                ImageOptions {
                    sector_size,
                    ..ImageOptions::default()
                },
            )
        }

        pub fn open_with<P: AsRef<Path>>(path: P, options: ImageOptions) -> Result<Self, BlockError> {
            if options.sector_size == 0 {
                return Err(BlockError::InvalidSize);
            }
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(!options.read_only)
                .open(path)
                .map_err(io_error)?;
            let len = file.metadata().map_err(io_error)?.len();
            let derived = len.saturating_sub(options.offset) / options.sector_size as u64;
            let sector_count = options.sector_count.unwrap_or(derived);
            log::debug!(
                "[block] image {} opened: {} sectors of {} bytes",
                path.display(),
                sector_count,
                options.sector_size
            );
            Ok(Self {
                name: path.display().to_string(),
                options,
                sector_count,
                file: Mutex::new(file),
            })
        }

        fn seek_to(&self, file: &mut File, lba: u64) -> Result<(), BlockError> {
            let pos = self.options.offset + lba * self.options.sector_size as u64;
            file.seek(SeekFrom::Start(pos)).map_err(io_error)?;
            Ok(())
        }
    }

    fn io_error(err: std::io::Error) -> BlockError {
        match err.kind() {
            ErrorKind::NotFound => BlockError::NotFound,
            ErrorKind::PermissionDenied => BlockError::WriteProtected,
            _ => BlockError::IoError,
        }
    }

    impl Drive for ImageDrive {
        fn info(&self) -> DriveInfo {
            DriveInfo {
                name: self.name.clone(),
                sector_size: self.options.sector_size,
                sector_count: self.sector_count,
                read_only: self.options.read_only,
                model: String::from("Raw Image"),
            }
        }

        fn read_sectors(&self, lba: u64, buffer: &mut [u8]) -> Result<usize, BlockError> {
            let ss = self.options.sector_size;
            let (_, count) = clamp_transfer(lba, buffer.len(), ss, self.sector_count)?;
            if count == 0 {
                return Ok(0);
            }
            let mut file = self.file.lock();
            self.seek_to(&mut file, lba)?;
            let wanted = count * ss;
            let mut done = 0;
            while done < wanted {
                match file.read(&mut buffer[done..wanted]) {
                    Ok(0) => break,
                    Ok(n) => done += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(io_error(e)),
                }
            }
            Ok(done / ss)
        }

        fn write_sectors(&self, lba: u64, buffer: &[u8]) -> Result<usize, BlockError> {
            if self.options.read_only {
                return Err(BlockError::WriteProtected);
            }
            let ss = self.options.sector_size;
            let (_, count) = clamp_transfer(lba, buffer.len(), ss, self.sector_count)?;
            if count == 0 {
                return Ok(0);
            }
            let mut file = self.file.lock();
            self.seek_to(&mut file, lba)?;
            file.write_all(&buffer[..count * ss]).map_err(io_error)?;
            Ok(count)
        }

        fn flush(&self) -> Result<(), BlockError> {
            if self.options.read_only {
                return Ok(());
            }
            self.file.lock().sync_data().map_err(io_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_drive_geometry() {
        let drive = MemDrive::zeroed(16, 512);
        let info = drive.info();
        assert_eq!(info.sector_count, 16);
        assert_eq!(info.lba_max(), Some(15));
        assert_eq!(info.size_bytes(), 8192);
    }

    #[test]
    fn test_mem_drive_round_trip() {
        let drive = MemDrive::zeroed(4, 512);
        let src = vec![0xA5u8; 1024];
        assert_eq!(drive.write_sectors(1, &src), Ok(2));
        let mut dst = vec![0u8; 1024];
        assert_eq!(drive.read_sectors(1, &mut dst), Ok(2));
        assert_eq!(dst, src);
    }

    #[test]
    fn test_mem_drive_short_transfer() {
        let drive = MemDrive::zeroed(4, 512);
        let mut buf = vec![0u8; 3 * 512];
        assert_eq!(drive.read_sectors(2, &mut buf), Ok(2));
        assert_eq!(drive.read_sectors(9, &mut buf), Ok(0));
    }

    #[test]
    fn test_mem_drive_rejects_partial_sector() {
        let drive = MemDrive::zeroed(4, 512);
        let mut buf = [0u8; 100];
        assert_eq!(drive.read_sectors(0, &mut buf), Err(BlockError::InvalidSize));
    }

    #[test]
    fn test_mem_drive_read_only() {
        let drive = MemDrive::zeroed(4, 512).read_only();
        assert!(drive.info().read_only);
        assert_eq!(drive.write_sectors(0, &[0u8; 512]), Err(BlockError::WriteProtected));
    }
}
