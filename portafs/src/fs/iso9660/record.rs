//! Directory records and file identifiers.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::time::Timestamp;

use super::descriptor::{both_u16, both_u32, decode_record_date};

/// Fixed part of a directory record
pub const RECORD_HEADER_SIZE: usize = 33;

bitflags! {
    /// File flags byte of a directory record
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED = 0x04;
        const RECORD = 0x08;
        const PROTECTION = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

/// A decoded directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub length: u8,
    pub ext_attr_length: u8,
    pub extent: u32,
    pub size: u32,
    pub recorded: Option<Timestamp>,
    pub flags: RecordFlags,
    pub volume_sequence_number: u16,
    /// Raw file identifier
    pub identifier: Vec<u8>,
    /// System use area following the identifier
    pub system_use: Vec<u8>,
}

impl DirectoryRecord {
    /// Decodes the record at the start of `bytes`.
    ///
    /// Returns `None` for a zero length byte or a record that does not fit.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let length = *bytes.first()? as usize;
        if length < RECORD_HEADER_SIZE || length > bytes.len() {
            return None;
        }
        let bytes = &bytes[..length];
        let name_len = bytes[32] as usize;
        let name_end = RECORD_HEADER_SIZE + name_len;
        if name_end > length {
            return None;
        }
        // identifier is padded to an even offset
        let system_use_start = (name_end + (name_len + 1) % 2).min(length);

        Some(Self {
            length: length as u8,
            ext_attr_length: bytes[1],
            extent: both_u32(bytes, 2),
            size: both_u32(bytes, 10),
            recorded: decode_record_date(&bytes[18..25]),
            flags: RecordFlags::from_bits_retain(bytes[25]),
            volume_sequence_number: both_u16(bytes, 28),
            identifier: bytes[RECORD_HEADER_SIZE..name_end].to_vec(),
            system_use: bytes[system_use_start..].to_vec(),
        })
    }

    pub fn is_dir(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }

    /// `\0` identifier, the directory itself
    pub fn is_self(&self) -> bool {
        self.identifier == [0]
    }

    /// `\1` identifier, the parent directory
    pub fn is_parent(&self) -> bool {
        self.identifier == [1]
    }

    /// First logical block of the file data
    pub fn data_block(&self) -> u32 {
        self.extent + self.ext_attr_length as u32
    }
}

/// Drops a `;version` suffix and a trailing `.`.
fn strip_version(mut name: Vec<u8>) -> Vec<u8> {
    if let Some(pos) = name.iter().rposition(|&b| b == b';') {
        name.truncate(pos);
    }
    if name.last() == Some(&b'.') {
        name.pop();
    }
    name
}

/// Display name of a plain ISO9660 identifier
pub fn plain_name(record: &DirectoryRecord) -> Vec<u8> {
    if record.is_self() {
        return b".".to_vec();
    }
    if record.is_parent() {
        return b"..".to_vec();
    }
    strip_version(record.identifier.clone())
}

/// Display name of a Joliet (UCS-2 big-endian) identifier, as UTF-8
pub fn joliet_name(record: &DirectoryRecord) -> Vec<u8> {
    if record.is_self() || record.is_parent() {
        return plain_name(record);
    }
    let units = record
        .identifier
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    let mut name = Vec::with_capacity(record.identifier.len());
    let mut utf8 = [0u8; 4];
    for ch in char::decode_utf16(units) {
        let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
        name.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
    }
    strip_version(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec;

    /// Encodes a directory record
    pub fn record(identifier: &[u8], extent: u32, size: u32, flags: u8, system_use: &[u8]) -> Vec<u8> {
        let pad = (identifier.len() + 1) % 2;
        let length = RECORD_HEADER_SIZE + identifier.len() + pad + system_use.len();
        let mut bytes = vec![0u8; length];
        bytes[0] = length as u8;
        bytes[2..6].copy_from_slice(&extent.to_le_bytes());
        bytes[6..10].copy_from_slice(&extent.to_be_bytes());
        bytes[10..14].copy_from_slice(&size.to_le_bytes());
        bytes[14..18].copy_from_slice(&size.to_be_bytes());
        bytes[18..25].copy_from_slice(&[120, 1, 2, 3, 4, 5, 0]);
        bytes[25] = flags;
        bytes[28..30].copy_from_slice(&1u16.to_le_bytes());
        bytes[30..32].copy_from_slice(&1u16.to_be_bytes());
        bytes[32] = identifier.len() as u8;
        bytes[33..33 + identifier.len()].copy_from_slice(identifier);
        let start = 33 + identifier.len() + pad;
        bytes[start..].copy_from_slice(system_use);
        bytes
    }

    #[test]
    fn test_parse_record() {
        let bytes = record(b"README.TXT;1", 40, 1234, 0x01, b"XY");
        let rec = DirectoryRecord::parse(&bytes).unwrap();
        assert_eq!(rec.extent, 40);
        assert_eq!(rec.size, 1234);
        assert!(rec.flags.contains(RecordFlags::HIDDEN));
        assert!(!rec.is_dir());
        assert_eq!(rec.recorded, Some(Timestamp::new(2020, 1, 2, 3, 4, 5)));
        assert_eq!(rec.system_use, b"XY");
        assert_eq!(plain_name(&rec), b"README.TXT");
    }

    #[test]
    fn test_odd_identifier_has_no_padding() {
        let bytes = record(b"ABC", 1, 0, 0, b"SU");
        assert_eq!(bytes.len(), 33 + 3 + 2);
        assert_eq!(DirectoryRecord::parse(&bytes).unwrap().system_use, b"SU");
    }

    #[test]
    fn test_special_identifiers() {
        let dot = DirectoryRecord::parse(&record(&[0], 1, 2048, 2, &[])).unwrap();
        let dotdot = DirectoryRecord::parse(&record(&[1], 1, 2048, 2, &[])).unwrap();
        assert_eq!(plain_name(&dot), b".");
        assert_eq!(plain_name(&dotdot), b"..");
        assert_eq!(joliet_name(&dotdot), b"..");
    }

    #[test]
    fn test_names() {
        let rec = DirectoryRecord::parse(&record(b"NOEXT.;1", 1, 0, 0, &[])).unwrap();
        assert_eq!(plain_name(&rec), b"NOEXT");

        let id: Vec<u8> = "Caf\u{e9}.txt;1"
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect();
        let rec = DirectoryRecord::parse(&record(&id, 1, 0, 0, &[])).unwrap();
        assert_eq!(joliet_name(&rec), "Caf\u{e9}.txt".as_bytes());
    }

    #[test]
    fn test_rejects_short_records() {
        assert_eq!(DirectoryRecord::parse(&[0u8; 40]), None);
        let mut bytes = record(b"A", 1, 0, 0, &[]);
        bytes[32] = 50;
        assert_eq!(DirectoryRecord::parse(&bytes), None);
        assert_eq!(DirectoryRecord::parse(&[]), None);
    }
}
