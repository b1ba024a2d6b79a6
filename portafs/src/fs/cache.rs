//! # Block Cache
//!
//! Fixed-capacity buffer cache shared by the FAT and ISO9660 drivers.
//!
//! ## Design
//!
//! Each slot buffers one block, keyed by `(kind, address)` where the kind
//! is a sector or a FAT cluster. Replacement is a decaying usage counter:
//!
//! - every lookup scans all slots once
//! - a hit wins; otherwise the first empty slot, otherwise the slot with
//!   the lowest usage tag is evicted (written back first when dirty)
//! - every scanned slot other than a hit decays by one, floored at zero
//! - the winning slot is reset to [`USAGE_TAG_MAX`]
//!
//! Slot buffers are allocated once and only resized when a slot switches
//! between sector-sized and cluster-sized contents. Writes are deferred
//! until the slot is flushed or evicted.

use alloc::vec;
use alloc::vec::Vec;

use super::vfs::{FsError, FsResult};

/// Usage tag given to a fresh or just-hit slot
pub const USAGE_TAG_MAX: u16 = 8191;

/// Addressing unit of a cached block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Sector,
    Cluster,
}

/// Cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub kind: BlockKind,
    pub address: u64,
}

impl BlockKey {
    pub const fn sector(lba: u64) -> Self {
        Self {
            kind: BlockKind::Sector,
            address: lba,
        }
    }

    pub const fn cluster(cluster: u32) -> Self {
        Self {
            kind: BlockKind::Cluster,
            address: cluster as u64,
        }
    }
}

/// Physical transfer of whole blocks, implemented by each driver
pub trait BlockIo {
    /// Buffer size for blocks of `kind`
    fn block_size(&self, kind: BlockKind) -> usize;

    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> FsResult<()>;

    fn write_block(&self, key: BlockKey, buf: &[u8]) -> FsResult<()>;
}

struct Slot {
    key: BlockKey,
    dirty: bool,
    data_valid: bool,
    usage_tag: u16,
    data: Vec<u8>,
}

/// Block cache with at most `capacity` resident blocks
pub struct BlockCache {
    slots: Vec<Option<Slot>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a block
    pub fn resident(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if `key` is resident
    pub fn contains(&self, key: BlockKey) -> bool {
        self.find(key).is_some()
    }

    pub fn is_dirty(&self, key: BlockKey) -> bool {
        self.find(key)
            .and_then(|index| self.slots[index].as_ref())
            .map_or(false, |slot| slot.dirty)
    }

    fn find(&self, key: BlockKey) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |slot| slot.key == key))
    }

    /// Finds or allocates the slot for `key` without reading it
    pub fn acquire(&mut self, io: &dyn BlockIo, key: BlockKey) -> FsResult<usize> {
        let mut hit = None;
        let mut empty = None;
        let mut victim: Option<(usize, u16)> = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                None => {
                    if empty.is_none() {
                        empty = Some(index);
                    }
                }
                Some(slot) => {
                    if hit.is_none() && slot.key == key {
                        hit = Some(index);
                        continue;
                    }
                    slot.usage_tag = slot.usage_tag.saturating_sub(1);
                    if victim.map_or(true, |(_, tag)| slot.usage_tag < tag) {
                        victim = Some((index, slot.usage_tag));
                    }
                }
            }
        }

        let index = if let Some(index) = hit {
            index
        } else if let Some(index) = empty {
            self.slots[index] = Some(Slot {
                key,
                dirty: false,
                data_valid: false,
                usage_tag: USAGE_TAG_MAX,
                data: vec![0u8; io.block_size(key.kind)],
            });
            index
        } else {
            let (index, _) = victim.ok_or(FsError::InvalidArgument)?;
            self.flush(io, index)?;
            let slot = self.slots[index].as_mut().ok_or(FsError::InvalidArgument)?;
            log::trace!(
                "[cache] evict {:?} {} for {:?} {}",
                slot.key.kind,
                slot.key.address,
                key.kind,
                key.address
            );
            if slot.key.kind != key.kind {
                slot.data = vec![0u8; io.block_size(key.kind)];
            }
            slot.key = key;
            slot.dirty = false;
            slot.data_valid = false;
            index
        };

        if let Some(slot) = self.slots[index].as_mut() {
            slot.usage_tag = USAGE_TAG_MAX;
        }
        Ok(index)
    }

    /// Returns the slot for `key`, reading it from the drive if needed
    pub fn read(&mut self, io: &dyn BlockIo, key: BlockKey) -> FsResult<usize> {
        let index = self.acquire(io, key)?;
        let slot = self.slots[index].as_mut().ok_or(FsError::InvalidArgument)?;
        if !slot.data_valid {
            io.read_block(key, &mut slot.data)?;
            slot.data_valid = true;
        }
        Ok(index)
    }

    /// Copies `bytes` to the start of block `key` and marks it dirty
    ///
    /// A partial write of a block that is not yet resident reads the block
    /// first so the untouched tail stays intact.
    pub fn write(&mut self, io: &dyn BlockIo, key: BlockKey, bytes: &[u8]) -> FsResult<usize> {
        let index = self.acquire(io, key)?;
        let slot = self.slots[index].as_mut().ok_or(FsError::InvalidArgument)?;
        if bytes.len() > slot.data.len() {
            return Err(FsError::InvalidArgument);
        }
        if !slot.data_valid && bytes.len() < slot.data.len() {
            io.read_block(key, &mut slot.data)?;
        }
        slot.data[..bytes.len()].copy_from_slice(bytes);
        slot.data_valid = true;
        slot.dirty = true;
        Ok(index)
    }

    /// Writes slot `index` back if dirty
    pub fn flush(&mut self, io: &dyn BlockIo, index: usize) -> FsResult<()> {
        let Some(slot) = self.slots.get_mut(index).and_then(|slot| slot.as_mut()) else {
            return Ok(());
        };
        if slot.dirty {
            io.write_block(slot.key, &slot.data)?;
            slot.dirty = false;
        }
        Ok(())
    }

    pub fn flush_all(&mut self, io: &dyn BlockIo) -> FsResult<()> {
        for index in 0..self.slots.len() {
            self.flush(io, index)?;
        }
        Ok(())
    }

    /// Drops every slot without writing anything back
    pub fn release_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Block contents of slot `index`
    pub fn data(&self, index: usize) -> &[u8] {
        self.slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map_or(&[][..], |slot| &slot.data[..])
    }
}
