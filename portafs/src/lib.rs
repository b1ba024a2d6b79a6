//! # portafs
//!
//! Embeddable filesystem access over abstract block devices.
//!
//! ## Design
//!
//! The library reads FAT12/16/32 and ISO9660 volumes without any host
//! filesystem support. A caller supplies a [`block::Drive`], optionally
//! splits it with the partition reader, and mounts a driver on the
//! resulting [`block::partitions::Partition`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      FileSystem trait (fs::vfs)         │
//! │   handles, iterators, errors, times     │
//! ├────────────────────┬────────────────────┤
//! │     FAT driver     │  ISO9660 driver    │
//! │  BPB, FAT walker,  │  descriptors,      │
//! │  LFN/SFN names     │  records, RRIP     │
//! ├────────────────────┴────────────────────┤
//! │             Block cache                 │
//! ├─────────────────────────────────────────┤
//! │     Partition (GPT / MBR / whole)       │
//! ├─────────────────────────────────────────┤
//! │     Drive (memory, image file, ...)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All access is single-threaded and synchronous per filesystem instance.
//! Independent instances over distinct drives share nothing.

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod block;
pub mod fs;
pub mod time;

pub use block::partitions::{read_partition_table, Partition, PartitionTable};
pub use block::{BlockError, Drive, DriveInfo, MemDrive};
pub use fs::fat::{Codepage, FatFs, FatOptions, FatType};
pub use fs::iso9660::{IsoFs, IsoOptions};
pub use fs::vfs::{
    DirHandle, DirIter, FileAttributes, FileHandle, FileInfo, FileSystem, FileType, FsError,
    FsResult, OpenMode, SeekFrom, TimestampKind, VolumeString, VolumeTimestamp,
};
pub use time::Timestamp;

#[cfg(feature = "std")]
pub use block::ImageDrive;
