//! System Use Sharing Protocol entries and the Rock Ridge fields on top.
//!
//! Only the entries in the record itself are read. Continuation areas
//! (`CE`) are not followed.

use alloc::vec::Vec;

use crate::fs::vfs::FileType;
use crate::time::Timestamp;

use super::descriptor::{both_u32, decode_record_date, decode_volume_date};

/// `SP` check bytes
const SP_CHECK: [u8; 2] = [0xBE, 0xEF];

/// `NM` flags. Parts flagged CONTINUE (0x01) are appended as they come.
const NM_CURRENT: u8 = 0x02;
const NM_PARENT: u8 = 0x04;

/// `TF` flags, in recording order
const TF_CREATION: u8 = 0x01;
const TF_MODIFY: u8 = 0x02;
const TF_ACCESS: u8 = 0x04;
const TF_LONG_FORM: u8 = 0x80;

/// POSIX file type bits of `PX` mode
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

/// One SUSP entry
struct SuspEntry<'a> {
    signature: [u8; 2],
    version: u8,
    data: &'a [u8],
}

/// Walks the SUSP entries of a system use area
fn entries(area: &[u8]) -> impl Iterator<Item = SuspEntry<'_>> + '_ {
    let mut rest = area;
    core::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let length = rest[2] as usize;
        if length < 4 || length > rest.len() {
            return None;
        }
        let entry = SuspEntry {
            signature: [rest[0], rest[1]],
            version: rest[3],
            data: &rest[4..length],
        };
        rest = &rest[length..];
        if &entry.signature == b"ST" {
            rest = &[];
        }
        Some(entry)
    })
}

/// Bytes to skip at the start of every system use area, if the area is
/// the root `.` record of a Rock Ridge volume.
pub fn sp_skip(area: &[u8]) -> Option<u8> {
    let entry = entries(area).next()?;
    if &entry.signature == b"SP" && entry.version == 1 && entry.data.len() >= 3 && entry.data[..2] == SP_CHECK {
        Some(entry.data[2])
    } else {
        None
    }
}

/// Rock Ridge metadata of one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RockRidge {
    /// Alternate name from `NM`
    pub name: Option<Vec<u8>>,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
    pub accessed: Option<Timestamp>,
    /// POSIX mode from `PX`
    pub mode: Option<u32>,
    /// An `SL` entry was present
    pub symlink: bool,
}

impl RockRidge {
    /// Parses the entries of `area` after skipping `skip` bytes
    pub fn parse(area: &[u8], skip: u8) -> Self {
        let mut rr = Self::default();
        let area = area.get(skip as usize..).unwrap_or(&[]);

        for entry in entries(area) {
            match &entry.signature {
                b"NM" => rr.push_name(entry.data),
                b"TF" => rr.parse_times(entry.data),
                b"PX" if entry.data.len() >= 8 => rr.mode = Some(both_u32(entry.data, 0)),
                b"SL" => rr.symlink = true,
                b"CE" => log::trace!("[iso9660] continuation area not followed"),
                _ => {}
            }
        }
        rr
    }

    fn push_name(&mut self, data: &[u8]) {
        let Some((&flags, content)) = data.split_first() else {
            return;
        };
        let name = self.name.get_or_insert_with(Vec::new);
        if flags & NM_CURRENT != 0 {
            *name = b".".to_vec();
        } else if flags & NM_PARENT != 0 {
            *name = b"..".to_vec();
        } else {
            name.extend_from_slice(content);
        }
    }

    fn parse_times(&mut self, data: &[u8]) {
        let Some((&flags, mut rest)) = data.split_first() else {
            return;
        };
        let width = if flags & TF_LONG_FORM != 0 { 17 } else { 7 };
        for bit in 0..7 {
            let flag = 1u8 << bit;
            if flags & flag == 0 {
                continue;
            }
            if rest.len() < width {
                return;
            }
            let stamp = if width == 17 {
                decode_volume_date(&rest[..width])
            } else {
                decode_record_date(&rest[..width])
            };
            match flag {
                TF_CREATION => self.created = stamp,
                TF_MODIFY => self.modified = stamp,
                TF_ACCESS => self.accessed = stamp,
                _ => {}
            }
            rest = &rest[width..];
        }
    }

    /// File type implied by the `PX` mode
    pub fn file_type(&self) -> Option<FileType> {
        match self.mode? & S_IFMT {
            S_IFDIR => Some(FileType::Directory),
            S_IFREG | S_IFLNK => Some(FileType::File),
            _ => None,
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink || self.mode.map_or(false, |mode| mode & S_IFMT == S_IFLNK)
    }
}
