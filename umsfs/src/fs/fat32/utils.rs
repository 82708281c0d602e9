// SPDX-License-Identifier: MIT

use alloc::string::String;
use alloc::vec::Vec;

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::core::{errors::*, utils::time_utils};
use crate::fs::fat32::{constant::*, types::Fat32LFNEntry};

/// Packs a timestamp as FAT (date, time, 10 ms units).
pub fn datetime_from(ts: OffsetDateTime) -> (u16, u16, u8) {
    let year = ts.year().clamp(1980, 2107);
    let month = ts.month() as u16;
    let day = ts.day() as u16;

    let hour = ts.hour() as u16;
    let minute = ts.minute() as u16;
    let second = ts.second() as u16;

    let fine = (second % 2) as u32 * 100 + ts.millisecond() as u32 / 10;

    let date = ((year - 1980) as u16) << 9 | (month << 5) | day;
    let time = (hour << 11) | (minute << 5) | (second / 2);

    (date, time, fine as u8)
}

pub fn datetime_now() -> (u16, u16, u8) {
    datetime_from(time_utils::now_utc())
}

/// Unpacks a FAT date/time. Out-of-range fields fall back to the FAT epoch.
pub fn datetime_to_primitive(date: u16, time: u16) -> PrimitiveDateTime {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u8;
    let day = (date & 0x1F) as u8;
    let hour = (time >> 11) as u8;
    let minute = ((time >> 5) & 0x3F) as u8;
    let second = ((time & 0x1F) * 2) as u8;

    let Ok(month) = Month::try_from(month) else {
        return fat_epoch();
    };
    match (
        Date::from_calendar_date(year, month, day),
        Time::from_hms(hour, minute, second),
    ) {
        (Ok(d), Ok(t)) => PrimitiveDateTime::new(d, t),
        (Ok(d), Err(_)) => PrimitiveDateTime::new(d, Time::MIDNIGHT),
        _ => fat_epoch(),
    }
}

fn fat_epoch() -> PrimitiveDateTime {
    Date::from_calendar_date(1980, Month::January, 1)
        .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
        .unwrap_or(PrimitiveDateTime::MIN)
}

/// Checksum of an 8.3 name, stored in each of its long-name slots.
pub fn sfn_checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

/// Rejects names no FAT directory can hold.
pub fn validate_name(name: &str) -> FsResult {
    crate::ensure!(!name.is_empty(), FsError::Invalid("empty name"));
    crate::ensure!(name != "." && name != "..", FsError::Invalid("reserved name"));
    crate::ensure!(
        !name
            .chars()
            .any(|c| (c as u32) < 0x20 || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')),
        FsError::Invalid("name contains a forbidden character")
    );
    crate::ensure!(
        name.encode_utf16().count() <= FAT_MAX_LFN_CHARS,
        FsError::Invalid("name longer than 255 characters")
    );
    Ok(())
}

/// Characters allowed in an 8.3 name once upper-cased.
#[inline(always)]
fn is_valid_sfn_char(b: u8) -> bool {
    matches!(b,
        b'A'..=b'Z' | b'0'..=b'9' |
        b'!' | b'$' | b'%' | b'\'' | b'-' | b'_' | b'@' | b'~' | b'`' |
        b'^' | b'#' | b'&' | b'(' | b')' | b'{' | b'}'
    )
}

/// Short name chosen for a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName {
    pub raw: [u8; 11],
    /// `DIR_NTRes` case bits.
    pub nt_flags: u8,
    /// Whether long-name slots must precede the entry.
    pub needs_lfn: bool,
}

#[derive(PartialEq, Eq)]
enum Case {
    Upper,
    Lower,
    Mixed,
}

fn case_of(part: &str) -> Case {
    let upper = part.bytes().any(|b| b.is_ascii_uppercase());
    let lower = part.bytes().any(|b| b.is_ascii_lowercase());
    match (upper, lower) {
        (true, true) => Case::Mixed,
        (false, true) => Case::Lower,
        _ => Case::Upper,
    }
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => (&name[..i], &name[i + 1..]),
    }
}

/// The name stored as-is in 8.3 form, when it fits without a long name.
fn exact_short_name(name: &str) -> Option<ShortName> {
    let (base, ext) = split_ext(name);
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || name.starts_with('.') {
        return None;
    }
    if name.bytes().filter(|&b| b == b'.').count() > 1 {
        return None;
    }

    let mut raw = [b' '; 11];
    for (slot, b) in raw[..8].iter_mut().zip(base.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    for (slot, b) in raw[8..].iter_mut().zip(ext.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    let used = base.len();
    if !raw[..used].iter().all(|&b| is_valid_sfn_char(b))
        || !raw[8..8 + ext.len()].iter().all(|&b| is_valid_sfn_char(b))
    {
        return None;
    }

    let mut nt_flags = 0;
    match case_of(base) {
        Case::Mixed => return None,
        Case::Lower => nt_flags |= FAT_NT_LOWER_BASE,
        Case::Upper => {}
    }
    match case_of(ext) {
        Case::Mixed => return None,
        Case::Lower => nt_flags |= FAT_NT_LOWER_EXT,
        Case::Upper => {}
    }
    if raw[0] == FAT_ENTRY_DELETED {
        raw[0] = FAT_ENTRY_KANJI_E5;
    }

    Some(ShortName {
        raw,
        nt_flags,
        needs_lfn: false,
    })
}

/// Upper-cased, filtered basis used for `~N` names.
fn basis_name(name: &str) -> ([u8; 8], usize, [u8; 3]) {
    let trimmed = name.trim_start_matches('.');
    let (base, ext) = split_ext(trimmed);

    let clean = |part: &str, cap: usize| -> Vec<u8> {
        part.chars()
            .filter(|&c| c != ' ' && c != '.')
            .map(|c| {
                let up = if c.is_ascii() { c.to_ascii_uppercase() as u8 } else { b'_' };
                if is_valid_sfn_char(up) { up } else { b'_' }
            })
            .take(cap)
            .collect()
    };

    let b = clean(base, 8);
    let e = clean(ext, 3);

    let mut out_base = [b' '; 8];
    let mut out_ext = [b' '; 3];
    let base_len = if b.is_empty() {
        out_base[0] = b'_';
        1
    } else {
        out_base[..b.len()].copy_from_slice(&b);
        b.len()
    };
    out_ext[..e.len()].copy_from_slice(&e);
    (out_base, base_len, out_ext)
}

/// Picks the short name for `name`, using `taken` to keep it unique in the
/// target directory.
pub fn short_name_for<F>(name: &str, mut taken: F) -> FsResult<ShortName>
where
    F: FnMut(&[u8; 11]) -> bool,
{
    if let Some(exact) = exact_short_name(name)
        && !taken(&exact.raw)
    {
        return Ok(exact);
    }

    let (base, base_len, ext) = basis_name(name);
    for n in 1u32..=999_999 {
        let mut digits = [0u8; 7];
        digits[0] = b'~';
        let tail = 1 + write_decimal(n, &mut digits[1..]);
        let keep = base_len.min(8 - tail);

        let mut raw = [b' '; 11];
        raw[..keep].copy_from_slice(&base[..keep]);
        raw[keep..keep + tail].copy_from_slice(&digits[..tail]);
        raw[8..].copy_from_slice(&ext);
        if raw[0] == FAT_ENTRY_DELETED {
            raw[0] = FAT_ENTRY_KANJI_E5;
        }

        if !taken(&raw) {
            return Ok(ShortName {
                raw,
                nt_flags: 0,
                needs_lfn: true,
            });
        }
    }
    Err(FsError::AlreadyExists)
}

/// Writes the decimal digits of `n`, returning how many were used.
fn write_decimal(mut n: u32, out: &mut [u8]) -> usize {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    loop {
        tmp[len] = b'0' + (n % 10) as u8;
        len += 1;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    for (slot, &d) in out.iter_mut().zip(tmp[..len].iter().rev()) {
        *slot = d;
    }
    len
}

/// Displays an 8.3 entry name, honoring the NT lowercase bits.
pub fn decode_sfn(sfn: &[u8; 11], nt_flags: u8) -> String {
    let (name_raw, ext_raw) = sfn.split_at(8);

    let decode = |part: &[u8], lower: bool| -> String {
        let end = part.iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
        part[..end]
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let c = if i == 0 && c == FAT_ENTRY_KANJI_E5 { FAT_ENTRY_DELETED } else { c };
                let ch = c as char;
                if lower { ch.to_ascii_lowercase() } else { ch }
            })
            .collect()
    };

    let name = decode(name_raw, nt_flags & FAT_NT_LOWER_BASE != 0);
    let ext = decode(ext_raw, nt_flags & FAT_NT_LOWER_EXT != 0);
    if ext.is_empty() {
        name
    } else {
        let mut out = name;
        out.push('.');
        out.push_str(&ext);
        out
    }
}

/// Reassembles a long name from its slots in on-disk order.
///
/// Returns `None` when the run is orphaned, out of order, or carries a
/// checksum that does not match `sfn`.
pub fn decode_lfn(lfns: &[Fat32LFNEntry], sfn: &[u8; 11]) -> Option<String> {
    let count = lfns.len();
    if count == 0 || count * FAT_LFN_CHARS > FAT_MAX_LFN_CHARS + FAT_LFN_CHARS {
        return None;
    }
    if !lfns[0].is_last() {
        return None;
    }

    let checksum = sfn_checksum(sfn);
    for (i, entry) in lfns.iter().enumerate() {
        if entry.sequence() as usize != count - i || entry.checksum != checksum {
            return None;
        }
    }

    let mut name_utf16 = Vec::with_capacity(count * FAT_LFN_CHARS);
    'outer: for entry in lfns.iter().rev() {
        for &c in &entry.extract_utf16() {
            if c == 0x0000 {
                break 'outer;
            }
            if c == 0xFFFF {
                continue;
            }
            name_utf16.push(c);
        }
    }
    if name_utf16.is_empty() {
        return None;
    }
    String::from_utf16(&name_utf16).ok()
}

/// Long-name slots for `name`, in on-disk order (highest sequence first).
pub fn lfn_entries(name: &str, short: &[u8; 11]) -> Vec<Fat32LFNEntry> {
    let name_utf16: Vec<u16> = name.encode_utf16().collect();
    let count = name_utf16.len().div_ceil(FAT_LFN_CHARS).max(1);
    let checksum = sfn_checksum(short);

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * FAT_LFN_CHARS;
        let end = ((i + 1) * FAT_LFN_CHARS).min(name_utf16.len());
        let chunk = &name_utf16[start..end];

        let mut chars = [0xFFFFu16; FAT_LFN_CHARS];
        chars[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < FAT_LFN_CHARS {
            chars[chunk.len()] = 0x0000;
        }

        out.push(Fat32LFNEntry::new((i + 1) as u8, i + 1 == count, &chars, checksum));
    }
    out.reverse();
    out
}

/// Case-insensitive comparison used for every name lookup.
#[inline]
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars().map(fold).eq(b.chars().map(fold))
}

#[inline]
fn fold(c: char) -> char {
    if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    }
}
