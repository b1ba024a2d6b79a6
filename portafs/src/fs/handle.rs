//! # Handle Arena
//!
//! Open directories and files live in per-volume arenas and are named by
//! index plus generation. Closing a slot bumps its generation, so stale
//! handles are detected instead of aliasing a newer object. Each mount
//! gets a fresh epoch, and handles from an earlier mount never match.
//!
//! Directories count their open children (subdirectories and files). A
//! directory with children refuses to close, which keeps every child's
//! parent reference valid for the child's whole lifetime.

use alloc::vec::Vec;

use super::vfs::{DirHandle, FileHandle, FsError, FsResult};

/// Arena slot reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    epoch: u32,
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slot arena
pub(crate) struct Arena<T> {
    epoch: u32,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new(epoch: u32) -> Self {
        Self {
            epoch,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                epoch: self.epoch,
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle {
            epoch: self.epoch,
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn slot_index(&self, handle: Handle) -> Option<usize> {
        (handle.epoch == self.epoch).then_some(handle.index as usize)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(self.slot_index(handle)?)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = self.slot_index(handle)?;
        self.slots
            .get_mut(index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let index = self.slot_index(handle)?;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

struct DirNode<D> {
    parent: Option<DirHandle>,
    children: u32,
    data: D,
}

struct FileNode<F> {
    parent: DirHandle,
    data: F,
}

/// Directory and file arenas of one mounted volume
pub(crate) struct Handles<D, F> {
    dirs: Arena<DirNode<D>>,
    files: Arena<FileNode<F>>,
}

impl<D, F> Handles<D, F> {
    /// Empty arenas for the mount numbered `epoch`
    pub fn new(epoch: u32) -> Self {
        Self {
            dirs: Arena::new(epoch),
            files: Arena::new(epoch),
        }
    }

    fn adjust_children(&mut self, dir: DirHandle, grow: bool) -> FsResult<()> {
        let node = self.dirs.get_mut(dir.0).ok_or(FsError::InvalidHandle)?;
        if grow {
            node.children += 1;
        } else {
            node.children = node.children.saturating_sub(1);
        }
        Ok(())
    }

    /// Opens a directory node under `parent` (`None` for a root)
    pub fn open_dir(&mut self, parent: Option<DirHandle>, data: D) -> FsResult<DirHandle> {
        if let Some(parent) = parent {
            self.adjust_children(parent, true)?;
        }
        Ok(DirHandle(self.dirs.insert(DirNode {
            parent,
            children: 0,
            data,
        })))
    }

    /// Closes a directory, failing with `Busy` while it has open children
    pub fn close_dir(&mut self, dir: DirHandle) -> FsResult<D> {
        let node = self.dirs.get(dir.0).ok_or(FsError::InvalidHandle)?;
        if node.children > 0 {
            return Err(FsError::Busy);
        }
        let node = self.dirs.remove(dir.0).ok_or(FsError::InvalidHandle)?;
        if let Some(parent) = node.parent {
            self.adjust_children(parent, false)?;
        }
        Ok(node.data)
    }

    pub fn dir(&self, dir: DirHandle) -> FsResult<&D> {
        self.dirs
            .get(dir.0)
            .map(|node| &node.data)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn child_count(&self, dir: DirHandle) -> FsResult<u32> {
        self.dirs
            .get(dir.0)
            .map(|node| node.children)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn open_file(&mut self, parent: DirHandle, data: F) -> FsResult<FileHandle> {
        self.adjust_children(parent, true)?;
        Ok(FileHandle(self.files.insert(FileNode { parent, data })))
    }

    pub fn close_file(&mut self, file: FileHandle) -> FsResult<F> {
        let node = self.files.remove(file.0).ok_or(FsError::InvalidHandle)?;
        self.adjust_children(node.parent, false)?;
        Ok(node.data)
    }

    pub fn file(&self, file: FileHandle) -> FsResult<&F> {
        self.files
            .get(file.0)
            .map(|node| &node.data)
            .ok_or(FsError::InvalidHandle)
    }

    pub fn file_mut(&mut self, file: FileHandle) -> FsResult<&mut F> {
        self.files
            .get_mut(file.0)
            .map(|node| &mut node.data)
            .ok_or(FsError::InvalidHandle)
    }

    /// True when no directory or file is open
    pub fn is_empty(&self) -> bool {
        self.dirs.len() == 0 && self.files.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_generation() {
        let mut arena = Arena::new(0);
        let a = arena.insert(1u32);
        assert_eq!(arena.remove(a), Some(1));
        let b = arena.insert(2u32);
        assert_eq!(a.index, b.index);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_parent_refuses_close_with_children() {
        let mut handles: Handles<u32, u32> = Handles::new(0);
        let root = handles.open_dir(None, 0).unwrap();
        let sub = handles.open_dir(Some(root), 1).unwrap();
        let file = handles.open_file(sub, 7).unwrap();

        assert_eq!(handles.close_dir(root).err(), Some(FsError::Busy));
        assert_eq!(handles.close_dir(sub).err(), Some(FsError::Busy));
        assert_eq!(handles.child_count(sub), Ok(1));

        assert_eq!(handles.close_file(file), Ok(7));
        assert_eq!(handles.close_dir(sub), Ok(1));
        assert_eq!(handles.close_dir(root), Ok(0));
        assert!(handles.is_empty());
    }

    #[test]
    fn test_stale_handles_rejected() {
        let mut handles: Handles<u32, u32> = Handles::new(0);
        let root = handles.open_dir(None, 0).unwrap();
        handles.close_dir(root).unwrap();
        assert_eq!(handles.dir(root).err(), Some(FsError::InvalidHandle));
        assert_eq!(handles.open_file(root, 1).err(), Some(FsError::InvalidHandle));
        assert_eq!(handles.close_dir(root).err(), Some(FsError::InvalidHandle));
    }

    #[test]
    fn test_epoch_separates_mounts() {
        let mut first: Handles<u32, u32> = Handles::new(1);
        let old_root = first.open_dir(None, 10).unwrap();
        let old_file = first.open_file(old_root, 11).unwrap();

        let mut second: Handles<u32, u32> = Handles::new(2);
        let root = second.open_dir(None, 20).unwrap();
        let file = second.open_file(root, 21).unwrap();
        assert_ne!(old_root, root);
        assert_ne!(old_file, file);

        assert_eq!(second.dir(old_root).err(), Some(FsError::InvalidHandle));
        assert_eq!(second.file(old_file).err(), Some(FsError::InvalidHandle));
        assert_eq!(second.close_file(old_file).err(), Some(FsError::InvalidHandle));
        assert_eq!(second.close_dir(old_root).err(), Some(FsError::InvalidHandle));
        assert_eq!(second.file(file), Ok(&21));
    }
}
