//! File reads and cursor handling.

use crate::fs::cache::BlockKey;
use crate::fs::vfs::{seek_target, FileHandle, FileInfo, FsError, FsResult, SeekFrom};

use super::{table, FatVolume};

/// Open file
#[derive(Debug, Clone)]
pub(super) struct FatFile {
    info: FileInfo,
    cursor: u64,
    /// Last resolved `(cluster index, cluster)` pair
    position: Option<(u32, u32)>,
}

impl FatFile {
    pub fn new(info: FileInfo) -> Self {
        Self {
            info,
            cursor: 0,
            position: None,
        }
    }

    pub fn head(&self) -> u32 {
        self.info.location as u32
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn is_eof(&self) -> bool {
        self.cursor == self.info.size
    }
}

impl FatVolume {
    /// Cluster holding the `index`-th cluster of `file`
    fn file_cluster(&mut self, file: &mut FatFile, index: u32) -> FsResult<u32> {
        let (from_index, from_cluster) = match file.position {
            Some((cached, cluster)) if cached <= index => (cached, cluster),
            _ => (0, file.head()),
        };
        let cluster = table::advance(&mut self.cache, &self.io, from_cluster, index - from_index)?;
        file.position = Some((index, cluster));
        Ok(cluster)
    }

    /// Copies `dest.len()` bytes starting at byte `offset` of `file`
    fn copy_out(&mut self, file: &mut FatFile, mut offset: u64, dest: &mut [u8]) -> FsResult<()> {
        let cluster_size = self.io.geom().cluster_size as u64;
        let mut copied = 0;
        while copied < dest.len() {
            let index = (offset / cluster_size) as u32;
            let cluster = self.file_cluster(file, index)?;
            let within = (offset % cluster_size) as usize;
            let chunk = (cluster_size as usize - within).min(dest.len() - copied);

            let slot = self.cache.read(&self.io, BlockKey::cluster(cluster))?;
            dest[copied..copied + chunk].copy_from_slice(&self.cache.data(slot)[within..within + chunk]);
            copied += chunk;
            offset += chunk as u64;
        }
        Ok(())
    }

    /// Reads up to `count` elements of `size` bytes.
    ///
    /// Returns the whole elements copied plus the error that stopped the
    /// transfer early, if any. The cursor only moves past complete elements.
    pub(super) fn read_file(
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

        let mut elements = 0;
        let mut failure = None;
        for chunk in buf[..wanted].chunks_exact_mut(size) {
            if file.cursor + size as u64 > file.info.size {
                break;
            }
            let offset = file.cursor;
            match self.copy_out(&mut file, offset, chunk) {
                Ok(()) => {
                    file.cursor += size as u64;
                    elements += 1;
                }
                Err(err) => {
                    log::debug!("[fat] read stopped after {} elements: {}", elements, err);
                    failure = Some(err);
                    break;
                }
            }
        }

        *self.handles.file_mut(handle)? = file;
        Ok((elements, failure))
    }

    pub(super) fn seek_file(&mut self, handle: FileHandle, pos: SeekFrom) -> FsResult<u64> {
        let file = self.handles.file_mut(handle)?;
        let target = seek_target(file.cursor, file.info.size, pos).ok_or(FsError::InvalidArgument)?;
        file.cursor = target;
        Ok(target)
    }

    pub(super) fn tell_file(&mut self, handle: FileHandle) -> FsResult<u64> {
        let file = self.handles.file(handle)?;
        if file.cursor > file.info.size {
            return Err(FsError::InvalidArgument);
        }
        Ok(file.cursor)
    }
}
