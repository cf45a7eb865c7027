//! Stored ZIP archive writer and reader.
//!
//! Layout written by [`write_archive`]:
//!
//! ```text
//! [local file record 0][local file record 1]...[local file record N-1]
//! [central directory record 0]...[central directory record N-1]
//! [end of central directory record]
//! ```
//!
//! Every entry is stored (compression method 0), so compressed and
//! uncompressed sizes are always equal. All integers are little-endian.
//!
//! The first entry must be an uncompressed `mimetype`; EPUB readers sniff the
//! media type at a fixed offset (byte 38) and refuse packages that differ.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use folio_core::defaults::EPUB_MEDIA_TYPE;
use folio_core::{Error, Result};

/// Local file record signature (`PK\x03\x04`).
pub const LOCAL_FILE_SIGNATURE: u32 = 0x0403_4b50;

/// Central directory record signature (`PK\x01\x02`).
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;

/// End of central directory signature (`PK\x05\x06`).
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// Compression method "store".
pub const METHOD_STORE: u16 = 0;

/// Name the first entry must carry.
pub const MIMETYPE_ENTRY: &str = "mimetype";

/// ZIP format version 2.0.
const VERSION_NEEDED: u16 = 20;
const VERSION_MADE_BY: u16 = 20;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;

/// Checksum written into the CRC-32 fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Constant 0. The readers this system targets do not validate it.
    #[default]
    Placeholder,
    /// Real CRC-32 of the entry content.
    Crc32,
}

/// One named blob to be placed in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Forward-slash separated path, unique within the archive.
    pub name: String,
    pub content: Vec<u8>,
    /// Entry must never be compressed. Required for the leading `mimetype`.
    pub stored_uncompressed: bool,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            stored_uncompressed: false,
        }
    }

    /// An entry that must stay uncompressed.
    pub fn stored(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            stored_uncompressed: true,
            ..Self::new(name, content)
        }
    }
}

/// An entry decoded by [`read_archive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntry {
    pub name: String,
    pub compression_method: u16,
    pub crc32: u32,
    /// Byte position of the entry's local file record signature.
    pub local_header_offset: u32,
    pub size: u32,
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// Per-entry bookkeeping carried from the local records to the central directory.
struct CentralRecord<'a> {
    name: &'a str,
    crc32: u32,
    size: u32,
    offset: u32,
}

/// Serialize `entries`, in order, into a single stored ZIP buffer.
///
/// `modified` fills the DOS time/date fields of every record.
pub fn write_archive(
    entries: &[ArchiveEntry],
    checksum: ChecksumMode,
    modified: DateTime<Utc>,
) -> Result<Vec<u8>> {
    validate_entries(entries)?;

    let (dos_time, dos_date) = dos_datetime(modified);
    let mut buf = Vec::with_capacity(estimated_len(entries));
    let mut central = Vec::with_capacity(entries.len());

    for entry in entries {
        let offset = to_u32(buf.len(), "archive offset")?;
        let size = to_u32(entry.content.len(), "entry size")?;
        let crc32 = match checksum {
            ChecksumMode::Placeholder => 0,
            ChecksumMode::Crc32 => crc32fast::hash(&entry.content),
        };
        let name_len = to_u16(entry.name.len(), "entry name length")?;

        put_u32(&mut buf, LOCAL_FILE_SIGNATURE);
        put_u16(&mut buf, VERSION_NEEDED);
        put_u16(&mut buf, 0); // flags
        put_u16(&mut buf, METHOD_STORE);
        put_u16(&mut buf, dos_time);
        put_u16(&mut buf, dos_date);
        put_u32(&mut buf, crc32);
        put_u32(&mut buf, size); // compressed
        put_u32(&mut buf, size); // uncompressed
        put_u16(&mut buf, name_len);
        put_u16(&mut buf, 0); // extra field length
        buf.extend_from_slice(entry.name.as_bytes());
        buf.extend_from_slice(&entry.content);

        trace!(entry_name = %entry.name, offset, size, "Wrote local file record");
        central.push(CentralRecord {
            name: &entry.name,
            crc32,
            size,
            offset,
        });
    }

    let central_start = to_u32(buf.len(), "central directory offset")?;
    for record in &central {
        put_u32(&mut buf, CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut buf, VERSION_MADE_BY);
        put_u16(&mut buf, VERSION_NEEDED);
        put_u16(&mut buf, 0); // flags
        put_u16(&mut buf, METHOD_STORE);
        put_u16(&mut buf, dos_time);
        put_u16(&mut buf, dos_date);
        put_u32(&mut buf, record.crc32);
        put_u32(&mut buf, record.size);
        put_u32(&mut buf, record.size);
        put_u16(&mut buf, record.name.len() as u16);
        put_u16(&mut buf, 0); // extra field length
        put_u16(&mut buf, 0); // comment length
        put_u16(&mut buf, 0); // disk number start
        put_u16(&mut buf, 0); // internal attributes
        put_u32(&mut buf, 0); // external attributes
        put_u32(&mut buf, record.offset);
        buf.extend_from_slice(record.name.as_bytes());
    }
    let central_size = to_u32(buf.len() - central_start as usize, "central directory size")?;

    let count = central.len() as u16;
    put_u32(&mut buf, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    put_u16(&mut buf, 0); // this disk
    put_u16(&mut buf, 0); // disk with central directory
    put_u16(&mut buf, count); // entries on this disk
    put_u16(&mut buf, count); // entries total
    put_u32(&mut buf, central_size);
    put_u32(&mut buf, central_start);
    put_u16(&mut buf, 0); // comment length

    debug!(
        entry_count = entries.len(),
        byte_len = buf.len(),
        central_start,
        "Archive written"
    );
    Ok(buf)
}

/// Decode a stored ZIP buffer through its central directory.
///
/// Only method 0 entries are supported; anything else is reported as an
/// archive error rather than returned undecoded.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<StoredEntry>> {
    let eocd = find_end_of_central_directory(bytes)?;
    let total_entries = read_u16(bytes, eocd + 10)? as usize;
    let central_size = read_u32(bytes, eocd + 12)? as usize;
    let central_start = read_u32(bytes, eocd + 16)? as usize;

    if central_start + central_size > eocd {
        return Err(Error::Archive(format!(
            "central directory [{}..{}) overlaps end record at {}",
            central_start,
            central_start + central_size,
            eocd
        )));
    }

    let mut entries = Vec::with_capacity(total_entries);
    let mut pos = central_start;
    for index in 0..total_entries {
        let signature = read_u32(bytes, pos)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(Error::Archive(format!(
                "central directory record {} has signature {:#010x}",
                index, signature
            )));
        }
        let method = read_u16(bytes, pos + 10)?;
        let crc32 = read_u32(bytes, pos + 16)?;
        let compressed = read_u32(bytes, pos + 20)?;
        let name_len = read_u16(bytes, pos + 28)? as usize;
        let extra_len = read_u16(bytes, pos + 30)? as usize;
        let comment_len = read_u16(bytes, pos + 32)? as usize;
        let local_offset = read_u32(bytes, pos + 42)?;
        let name = read_name(bytes, pos + CENTRAL_HEADER_LEN, name_len)?;
        pos += CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;

        if method != METHOD_STORE {
            return Err(Error::Archive(format!(
                "entry '{}' uses unsupported compression method {}",
                name, method
            )));
        }

        let local = local_offset as usize;
        let local_signature = read_u32(bytes, local)?;
        if local_signature != LOCAL_FILE_SIGNATURE {
            return Err(Error::Archive(format!(
                "entry '{}' offset {} does not point at a local file record",
                name, local_offset
            )));
        }
        let local_name_len = read_u16(bytes, local + 26)? as usize;
        let local_extra_len = read_u16(bytes, local + 28)? as usize;
        let local_name = read_name(bytes, local + LOCAL_HEADER_LEN, local_name_len)?;
        if local_name != name {
            return Err(Error::Archive(format!(
                "local record name '{}' does not match central directory name '{}'",
                local_name, name
            )));
        }
        let data_start = local + LOCAL_HEADER_LEN + local_name_len + local_extra_len;
        let content = slice(bytes, data_start, compressed as usize)?.to_vec();

        entries.push(StoredEntry {
            name,
            compression_method: method,
            crc32,
            local_header_offset: local_offset,
            size: compressed,
            content,
        });
    }

    Ok(entries)
}

/// DOS (time, date) fields for `dt`. Dates before 1980 clamp to 1980-01-01 00:00:00.
pub fn dos_datetime(dt: DateTime<Utc>) -> (u16, u16) {
    if dt.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = (dt.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (time, date)
}

fn validate_entries(entries: &[ArchiveEntry]) -> Result<()> {
    let first = entries
        .first()
        .ok_or_else(|| Error::Archive("archive has no entries".to_string()))?;
    if first.name != MIMETYPE_ENTRY || !first.stored_uncompressed {
        return Err(Error::Archive(format!(
            "first entry must be an uncompressed '{}', got '{}'",
            MIMETYPE_ENTRY, first.name
        )));
    }
    if first.content != EPUB_MEDIA_TYPE.as_bytes() {
        return Err(Error::Archive(format!(
            "'{}' entry must contain exactly '{}'",
            MIMETYPE_ENTRY, EPUB_MEDIA_TYPE
        )));
    }
    to_u16(entries.len(), "entry count")?;

    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for entry in entries {
        if entry.name.is_empty() {
            return Err(Error::InvalidInput("entry name is empty".to_string()));
        }
        if entry.name.starts_with('/') || entry.name.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "entry name '{}' must be a relative forward-slash path",
                entry.name
            )));
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(Error::Archive(format!("duplicate entry '{}'", entry.name)));
        }
    }
    Ok(())
}

fn estimated_len(entries: &[ArchiveEntry]) -> usize {
    entries
        .iter()
        .map(|e| LOCAL_HEADER_LEN + CENTRAL_HEADER_LEN + 2 * e.name.len() + e.content.len())
        .sum::<usize>()
        + EOCD_LEN
}

fn find_end_of_central_directory(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < EOCD_LEN {
        return Err(Error::Archive(format!(
            "buffer of {} bytes is too short for an archive",
            bytes.len()
        )));
    }
    // The record is followed by a comment of at most u16::MAX bytes.
    let last = bytes.len() - EOCD_LEN;
    let first = last.saturating_sub(u16::MAX as usize);
    (first..=last)
        .rev()
        .find(|&pos| read_u32(bytes, pos).ok() == Some(END_OF_CENTRAL_DIRECTORY_SIGNATURE))
        .ok_or_else(|| Error::Archive("end of central directory record not found".to_string()))
}

fn slice(bytes: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| bytes.get(pos..end))
        .ok_or_else(|| {
            Error::Archive(format!(
                "truncated archive: need {} bytes at offset {}, have {}",
                len,
                pos,
                bytes.len()
            ))
        })
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16> {
    let raw = slice(bytes, pos, 2)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32> {
    let raw = slice(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_name(bytes: &[u8], pos: usize, len: usize) -> Result<String> {
    String::from_utf8(slice(bytes, pos, len)?.to_vec())
        .map_err(|e| Error::Archive(format!("entry name is not UTF-8: {}", e)))
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn to_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{} {} exceeds the 16-bit field", what, value)))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{} {} exceeds the 32-bit field", what, value)))
}
