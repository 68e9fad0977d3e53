//! Cross-reference entries and the two encodings they are stored in.

use crate::error::XrefError;
use crate::line_reader::LineReader;
use crate::{Object, ObjectId, Result, Stream, parser};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::{Read, Seek};

/// Where an entry says its object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum EntryStatus {
    Free,
    InUse,
    Compressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum XrefEntry {
    /// Deleted object; `next` is the next free object number.
    Free { next: u64, generation: u16 },
    /// Object stored at a byte offset.
    Normal { offset: u64, generation: u16 },
    /// Object number `index` inside the object stream `container`.
    Compressed { container: u32, index: u32 },
}

impl XrefEntry {
    pub fn status(&self) -> EntryStatus {
        match self {
            XrefEntry::Free { .. } => EntryStatus::Free,
            XrefEntry::Normal { .. } => EntryStatus::InUse,
            XrefEntry::Compressed { .. } => EntryStatus::Compressed,
        }
    }

    /// Objects inside object streams always have generation 0.
    pub fn generation(&self) -> u16 {
        match *self {
            XrefEntry::Free { generation, .. } | XrefEntry::Normal { generation, .. } => generation,
            XrefEntry::Compressed { .. } => 0,
        }
    }

    pub fn is_in_use(&self) -> bool {
        !matches!(self, XrefEntry::Free { .. })
    }
}

/// Entries of one or more cross-reference sections, keyed by object number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Xref {
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Total number of objects, one more than the highest object number.
    pub size: u32,
}

impl Xref {
    pub fn new(size: u32) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
        }
    }

    pub fn get_entry(&self, number: u32) -> Option<&XrefEntry> {
        self.entries.get(&number)
    }

    /// Entry for `id`, provided its generation matches.
    pub fn get(&self, id: ObjectId) -> Option<&XrefEntry> {
        self.entries.get(&id.0).filter(|entry| entry.generation() == id.1)
    }

    /// Within one section a later line for the same object number replaces an earlier one.
    pub fn insert(&mut self, number: u32, entry: XrefEntry) {
        self.entries.insert(number, entry);
    }

    /// Add the entries of an older revision. Entries already present win.
    pub fn merge(&mut self, older: Xref) {
        for (number, entry) in older.entries {
            self.entries.entry(number).or_insert(entry);
        }
        self.size = self.size.max(older.size);
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &XrefEntry)> {
        self.entries
            .iter()
            .map(|(&number, entry)| ((number, entry.generation()), entry))
    }

    /// The table keyed by object number and generation.
    pub fn by_id(&self) -> BTreeMap<ObjectId, XrefEntry> {
        self.iter().map(|(id, entry)| (id, *entry)).collect()
    }
}

fn trim_start(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|&c| !parser::is_whitespace(c)).unwrap_or(line.len());
    &line[start..]
}

/// Parse a classic table. The reader must be at (or in whitespace before) the
/// `xref` keyword; it is left at the start of the first line after the last
/// subsection, normally the `trailer` line.
pub fn read_table<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<Xref> {
    let table_start = reader.position();
    let mut line = Vec::new();
    loop {
        if !reader.read_line(&mut line)? {
            return Err(XrefError::Start.into());
        }
        let keyword = trim_start(&line);
        if keyword.is_empty() {
            continue;
        }
        if keyword.starts_with(b"xref") {
            break;
        }
        return Err(XrefError::Start.into());
    }
    debug!("reading xref table at {table_start}");

    let mut xref = Xref::default();
    let mut subsections = 0;
    loop {
        let line_start = reader.position();
        if !reader.read_line(&mut line)? {
            break;
        }
        if trim_start(&line).is_empty() {
            continue;
        }
        let Some((first, count)) = parser::xref_subsection_header(&line) else {
            reader.seek(line_start)?;
            if subsections == 0 && !trim_start(&line).starts_with(b"trailer") {
                return Err(XrefError::Parse.into());
            }
            break;
        };
        subsections += 1;

        for number in 0..count {
            if !reader.read_short_line(&mut line)? {
                return Err(XrefError::Parse.into());
            }
            let (offset, generation, in_use) = parser::xref_entry(&line).ok_or(XrefError::Parse)?;
            let number = first.checked_add(number).ok_or(XrefError::Parse)?;
            let Ok(generation) = u16::try_from(generation) else {
                warn!("xref table: skipping object {number} with generation {generation}");
                continue;
            };
            let entry = if in_use {
                XrefEntry::Normal { offset, generation }
            } else {
                XrefEntry::Free {
                    next: offset,
                    generation,
                }
            };
            xref.insert(number, entry);
        }
    }

    debug!("xref table at {table_start}: {} entries in {subsections} subsections", xref.len());
    Ok(xref)
}

fn integer_array(object: &Object) -> Result<Vec<i64>> {
    object.as_array()?.iter().map(Object::as_i64).collect()
}

fn read_field(record: &[u8]) -> u64 {
    record.iter().fold(0, |value, &byte| (value << 8) | u64::from(byte))
}

/// Decode the records of a `/Type /XRef` stream. Fields are big-endian; a
/// zero-width field reads as 0, except the type field, which then defaults to 1.
pub fn decode_xref_stream(stream: &Stream) -> Result<Xref> {
    let content = stream.decompressed_content()?;
    let dict = &stream.dict;

    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size).ok())
        .ok_or(XrefError::Parse)?;
    let widths = dict.get(b"W").and_then(integer_array).map_err(|_| XrefError::Parse)?;
    if widths.len() < 3 || widths.iter().any(|&w| !(0..=8).contains(&w)) {
        return Err(XrefError::Parse.into());
    }
    let widths = [widths[0] as usize, widths[1] as usize, widths[2] as usize];
    let record_len: usize = widths.iter().sum();
    if record_len == 0 {
        return Err(XrefError::Parse.into());
    }
    let index = dict
        .get(b"Index")
        .and_then(integer_array)
        .unwrap_or_else(|_| vec![0, i64::from(size)]);

    let mut xref = Xref::new(size);
    let mut records = content.chunks(record_len);
    'sections: for pair in index.chunks_exact(2) {
        let (Ok(first), Ok(count)) = (u32::try_from(pair[0]), u32::try_from(pair[1])) else {
            return Err(XrefError::Parse.into());
        };
        for number in first..first.saturating_add(count) {
            let record = match records.next() {
                Some(record) if record.len() == record_len => record,
                _ => {
                    warn!("xref stream: records end before object {number}");
                    break 'sections;
                }
            };
            let (kind, rest) = record.split_at(widths[0]);
            let (field1, field2) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_field(kind) };
            let (field1, field2) = (read_field(field1), read_field(field2));

            let entry = match kind {
                0 => XrefEntry::Free {
                    next: field1,
                    generation: u16::try_from(field2).unwrap_or(u16::MAX),
                },
                1 => XrefEntry::Normal {
                    offset: field1,
                    generation: u16::try_from(field2).map_err(|_| XrefError::Parse)?,
                },
                2 => XrefEntry::Compressed {
                    container: u32::try_from(field1).map_err(|_| XrefError::Parse)?,
                    index: u32::try_from(field2).map_err(|_| XrefError::Parse)?,
                },
                // Unknown types are references to the null object.
                _ => continue,
            };
            xref.insert(number, entry);
        }
    }
    Ok(xref)
}
