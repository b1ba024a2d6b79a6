//! Short and long FAT names.
//!
//! Short names (SFN) are 11 raw bytes in the volume's OEM code page, shown
//! as `NAME.EXT`. Long names (LFN) are UTF-16 fragments that decode to
//! UTF-8, or to single bytes with a fallback when unicode output is off.

use alloc::vec::Vec;

use super::codepage::Codepage;

/// Longest long name, in UTF-16 units.
pub const LFN_MAX: usize = 255;

/// Raw short name field length (8 + 3).
pub const SFN_LEN: usize = 11;

/// Deleted-entry marker, stored as 0x05 when it is a real first byte.
const KANJI_E5_ESCAPE: u8 = 0x05;

/// Characters allowed in a short name, one bit per ASCII code.
const SFN_ALLOWED: [u32; 4] = [0x0000_0000, 0x03FF_237B, 0xC3FF_FFFF, 0x6800_0001];

/// Characters allowed in a long name, one bit per ASCII code.
const LFN_ALLOWED: [u32; 4] = [0x0000_0000, 0x2BFF_7BFB, 0xEFFF_FFFF, 0x6FFF_FFFF];

fn allowed(table: &[u32; 4], byte: u8) -> bool {
    byte >= 0x80 || (table[(byte >> 5) as usize] >> (byte & 31)) & 1 == 1
}

/// Checksum of a raw short name, stored in every LFN fragment.
pub fn sfn_checksum(raw: &[u8; SFN_LEN]) -> u8 {
    raw.iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

/// Display form of a raw short name: `NAME.EXT`, padding removed.
pub fn sfn_display(raw: &[u8; SFN_LEN], lowercase: bool) -> Vec<u8> {
    let fold = |byte: u8| {
        if lowercase {
            byte.to_ascii_lowercase()
        } else {
            byte
        }
    };

    let mut name = Vec::with_capacity(12);
    for (i, &byte) in raw[..8].iter().enumerate() {
        if byte == b' ' {
            break;
        }
        name.push(if i == 0 && byte == KANJI_E5_ESCAPE {
            0xE5
        } else {
            fold(byte)
        });
    }

    let ext = &raw[8..];
    if ext[0] != b' ' {
        name.push(b'.');
        name.extend(ext.iter().take_while(|&&byte| byte != b' ').map(|&b| fold(b)));
    }
    name
}

/// Checks a `NAME.EXT` candidate against the short-name character set.
pub fn is_valid_sfn(name: &[u8]) -> bool {
    if name.is_empty() || name[0] == b'.' {
        return false;
    }

    let mut dot = None;
    for (i, &byte) in name.iter().enumerate() {
        if byte == b'.' {
            if dot.is_some() {
                return false;
            }
            dot = Some(i);
        } else if !allowed(&SFN_ALLOWED, byte) {
            return false;
        }
    }

    match dot {
        Some(i) => i <= 8 && name.len() - i - 1 <= 3,
        None => name.len() <= 8,
    }
}

/// Checks a long-name candidate (UTF-8 bytes) against the long-name rules.
pub fn is_valid_lfn(name: &[u8]) -> bool {
    if name.is_empty() || name == b"." || name == b".." {
        return false;
    }
    let units = match core::str::from_utf8(name) {
        Ok(text) => text.encode_utf16().count(),
        Err(_) => return false,
    };
    units <= LFN_MAX && name.iter().all(|&byte| allowed(&LFN_ALLOWED, byte))
}

/// Converts reassembled LFN units to a display name.
///
/// Decoding stops at the first `0x0000` or `0xFFFF` padding unit. Units
/// that cannot be represented become `fallback`.
pub fn lfn_display(units: &[u16], unicode: bool, fallback: u8) -> Vec<u8> {
    let end = units
        .iter()
        .position(|&unit| unit == 0x0000 || unit == 0xFFFF)
        .unwrap_or(units.len());
    let units = &units[..end];

    let mut name = Vec::with_capacity(units.len());
    if !unicode {
        name.extend(units.iter().map(|&unit| {
            if unit < 0x80 {
                unit as u8
            } else {
                fallback
            }
        }));
        return name;
    }

    let mut utf8 = [0u8; 4];
    for decoded in char::decode_utf16(units.iter().copied()) {
        match decoded {
            Ok(ch) => name.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes()),
            Err(_) => name.push(fallback),
        }
    }
    name
}

/// Compares two names under the volume's case rules.
///
/// Case-insensitive matching folds bytes below 0x80 as ASCII and the upper
/// half through the code page table.
pub fn names_equal(a: &[u8], b: &[u8], case_sensitive: bool, codepage: Codepage) -> bool {
    if case_sensitive {
        return a == b;
    }
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(&x, &y)| codepage.to_upper(x) == codepage.to_upper(y))
}
