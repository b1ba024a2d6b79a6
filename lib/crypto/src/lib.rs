//! # portafs Checksum Primitives
//!
//! Pure Rust checksums shared by the partition-table and filesystem
//! readers. Works in both `no_std` and `std` environments.
//!
//! ## Algorithms
//!
//! - **CRC-32**: IEEE 802.3 polynomial, reflected, as used by GPT headers
//!   and partition entry arrays
//!
//! ## Design
//!
//! - Pure Rust, no dependencies
//! - Table generated at compile time
//! - No dynamic allocation in core operations

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub mod crc32;

pub use crc32::Crc32;

/// Checksum trait for a consistent interface.
pub trait Checksum {
    /// Output size in bytes.
    const OUTPUT_SIZE: usize;

    /// Create a new checksum state.
    fn new() -> Self;

    /// Feed data into the checksum.
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum as a big-endian byte array.
    fn finalize_array(self) -> [u8; 8];

    /// One-shot checksum to fixed array.
    fn checksum_to_array(data: &[u8]) -> [u8; 8]
    where
        Self: Sized,
    {
        let mut state = Self::new();
        state.update(data);
        state.finalize_array()
    }

    /// One-shot checksum to Vec.
    #[cfg(feature = "alloc")]
    fn checksum(data: &[u8]) -> Vec<u8>
    where
        Self: Sized,
    {
        Self::checksum_to_array(data)[..Self::OUTPUT_SIZE].to_vec()
    }
}
