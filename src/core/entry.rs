//! Attribute save protocol
//!
//! Attributes are written to a state file as a stream of linear entries
//! following the optional fixed header. Each entry is self-sized:
//!
//! ```text
//! u32 total_len      (whole entry, this field included)
//! u32 flags
//! u16 name_len
//! u16 resource_len   (0 = no resource)
//! u32 value_len
//! name | resource | value
//! ```
//!
//! The stream ends with a `u32` end marker. Files written without the
//! marker end at a clean entry boundary and are accepted too.

use crate::attribute::AttrFlags;
use crate::error::{Result, StateError};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Marks the end of the attribute stream
pub const END_OF_ATTRIBUTES: u32 = 0xFFFF_FD29;

/// Fixed part of an entry
pub const ENTRY_FIXED_LEN: usize = 16;

/// Sanity bound for a single entry
pub const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// One linearized attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrEntry {
    pub name: String,
    pub resource: Option<String>,
    pub value: String,
    pub flags: AttrFlags,
}

impl AttrEntry {
    pub fn new(name: &str, resource: Option<&str>, value: impl Into<String>, flags: AttrFlags) -> Self {
        AttrEntry {
            name: name.to_string(),
            resource: resource.map(str::to_string),
            value: value.into(),
            flags,
        }
    }

    /// Serialized length in bytes
    pub fn linear_len(&self) -> usize {
        ENTRY_FIXED_LEN
            + self.name.len()
            + self.resource.as_ref().map_or(0, |r| r.len())
            + self.value.len()
    }

    /// Serialize the entry
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let resource = self.resource.as_deref().unwrap_or("");
        let total = self.linear_len();
        if self.name.len() > u16::MAX as usize
            || resource.len() > u16::MAX as usize
            || total > MAX_ENTRY_LEN
        {
            return Err(StateError::encode(&self.name, "entry too large"));
        }

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&(total as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.flags.bits() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(resource.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.extend_from_slice(resource.as_bytes());
        bytes.extend_from_slice(self.value.as_bytes());
        Ok(bytes)
    }

    /// Parse an entry body (everything after `total_len`)
    fn from_body(body: &[u8]) -> Result<Self> {
        let malformed = |why: &str| StateError::decode("<entry>", why);

        if body.len() < ENTRY_FIXED_LEN - 4 {
            return Err(malformed("entry shorter than its fixed part"));
        }
        let flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let name_len = u16::from_le_bytes([body[4], body[5]]) as usize;
        let resource_len = u16::from_le_bytes([body[6], body[7]]) as usize;
        let value_len = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;

        let rest = &body[12..];
        if name_len + resource_len + value_len != rest.len() {
            return Err(malformed("entry field lengths disagree with entry size"));
        }
        if name_len == 0 {
            return Err(malformed("entry without a name"));
        }

        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec()).map_err(|_| malformed("entry is not valid UTF-8"))
        };
        let name = text(&rest[..name_len])?;
        let resource = match resource_len {
            0 => None,
            n => Some(text(&rest[name_len..name_len + n])?),
        };
        let value = text(&rest[name_len + resource_len..])?;

        Ok(AttrEntry {
            name,
            resource,
            value,
            flags: AttrFlags::from_bits_truncate(flags as u16),
        })
    }
}

/// Buffered writer for a state file: optional header, entries, end marker
pub struct EntryWriter<W: Write> {
    inner: BufWriter<W>,
    entries: usize,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(inner: W) -> Self {
        EntryWriter {
            inner: BufWriter::new(inner),
            entries: 0,
        }
    }

    /// Write a fixed structure verbatim
    pub fn write_struct(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    pub fn write_entry(&mut self, entry: &AttrEntry) -> Result<()> {
        let bytes = entry.to_bytes()?;
        self.inner.write_all(&bytes)?;
        self.entries += 1;
        Ok(())
    }

    /// Entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the end marker, flush and hand back the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&END_OF_ATTRIBUTES.to_le_bytes())?;
        self.inner.into_inner().map_err(|e| e.into_error())
    }
}

/// Reader for the entry stream of a state file
pub struct EntryReader<R: Read> {
    inner: R,
    path: PathBuf,
    done: bool,
}

impl<R: Read> EntryReader<R> {
    /// `path` is only used to report truncation
    pub fn new(inner: R, path: &Path) -> Self {
        EntryReader {
            inner,
            path: path.to_path_buf(),
            done: false,
        }
    }

    /// Next entry, or `None` at the end of the stream
    pub fn next_entry(&mut self) -> Result<Option<AttrEntry>> {
        if self.done {
            return Ok(None);
        }

        let mut size = [0u8; 4];
        let got = read_full(&mut self.inner, &mut size)?;
        if got == 0 {
            self.done = true;
            return Ok(None);
        }
        if got < size.len() {
            return Err(self.truncated(size.len(), got));
        }

        let total = u32::from_le_bytes(size);
        if total == END_OF_ATTRIBUTES {
            self.done = true;
            return Ok(None);
        }
        let total = total as usize;
        if !(ENTRY_FIXED_LEN..=MAX_ENTRY_LEN).contains(&total) {
            return Err(StateError::decode(
                "<entry>",
                format!("implausible entry size {}", total),
            ));
        }

        let mut body = vec![0u8; total - 4];
        let got = read_full(&mut self.inner, &mut body)?;
        if got < body.len() {
            return Err(self.truncated(body.len(), got));
        }

        AttrEntry::from_body(&body).map(Some)
    }

    /// Drain the remaining entries
    pub fn read_all(&mut self) -> Result<Vec<AttrEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn truncated(&self, expected: usize, actual: usize) -> StateError {
        StateError::CorruptOrTruncated {
            path: self.path.clone(),
            expected,
            actual,
        }
    }
}

/// Read until `buf` is full or EOF, retrying interrupted reads
///
/// Returns the number of bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Vec<AttrEntry> {
        vec![
            AttrEntry::new("max_jobs", None, "100", AttrFlags::SET),
            AttrEntry::new("resources_available", Some("ncpus"), "64", AttrFlags::SET),
            AttrEntry::new("comment", None, "", AttrFlags::SET),
        ]
    }

    fn stream(header: &[u8], entries: &[AttrEntry]) -> Vec<u8> {
        let mut writer = EntryWriter::new(Vec::new());
        writer.write_struct(header).unwrap();
        for entry in entries {
            writer.write_entry(entry).unwrap();
        }
        assert_eq!(writer.entries(), entries.len());
        writer.finish().unwrap()
    }

    #[test]
    fn test_stream_layout() {
        let bytes = stream(b"HDR", &sample());
        assert_eq!(&bytes[..3], b"HDR");
        let expected: usize = 3 + sample().iter().map(|e| e.linear_len()).sum::<usize>() + 4;
        assert_eq!(bytes.len(), expected);
        assert_eq!(&bytes[bytes.len() - 4..], &END_OF_ATTRIBUTES.to_le_bytes());
    }

    #[test]
    fn test_read_back_entries() {
        let bytes = stream(b"", &sample());
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        assert_eq!(reader.read_all().unwrap(), sample());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_clean_eof_without_marker() {
        let mut bytes = stream(b"", &sample());
        bytes.truncate(bytes.len() - 4);
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        assert_eq!(reader.read_all().unwrap().len(), 3);
    }

    #[test]
    fn test_truncated_entry() {
        let mut bytes = stream(b"", &sample());
        bytes.truncate(bytes.len() - 6);
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        assert!(matches!(
            reader.read_all(),
            Err(StateError::CorruptOrTruncated { .. })
        ));
    }

    #[test]
    fn test_implausible_size() {
        let bytes = 3u32.to_le_bytes().to_vec();
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        assert!(matches!(
            reader.next_entry(),
            Err(StateError::AttributeDecodeFailed { .. })
        ));
    }

    #[test]
    fn test_field_lengths_must_agree() {
        let mut bytes = AttrEntry::new("a", None, "xyz", AttrFlags::SET)
            .to_bytes()
            .unwrap();
        // claim a longer value than the entry holds
        bytes[12] = 9;
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn test_flags_survive() {
        let entry = AttrEntry::new("x", None, "1", AttrFlags::SET | AttrFlags::DEFAULT);
        let bytes = stream(b"", std::slice::from_ref(&entry));
        let mut reader = EntryReader::new(Cursor::new(bytes), Path::new("mem"));
        let back = reader.next_entry().unwrap().unwrap();
        assert_eq!(back.flags, AttrFlags::SET | AttrFlags::DEFAULT);
    }
}
