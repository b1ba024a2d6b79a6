//! # Filesystem Drivers
//!
//! Volume decoders sitting on top of a [`Partition`](crate::block::partitions::Partition).
//!
//! ## Supported Filesystems
//!
//! - **FAT12/16/32** ([`fat`]): cluster chains, long and short names
//! - **ISO9660** ([`iso9660`]): primary/Joliet trees, Rock Ridge
//!
//! Both drivers implement [`vfs::FileSystem`] and share the
//! [`cache::BlockCache`] and [`handle::Handles`] machinery.

pub mod cache;
pub mod fat;
pub mod handle;
pub mod iso9660;
pub mod vfs;
