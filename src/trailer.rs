//! Trailer dictionaries and the `Prev`/`XRefStm` chain that links revisions.

use crate::error::XrefError;
use crate::xref::Xref;
use crate::{Dictionary, Error, Object, ObjectId, Result};
use log::{debug, warn};
use std::collections::BTreeSet;

/// Typed view of the merged trailer dictionary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trailer {
    pub size: u32,
    pub root: ObjectId,
    pub prev: Option<u64>,
    pub encrypt: Option<ObjectId>,
    pub info: Option<ObjectId>,
    pub id: Option<(Vec<u8>, Vec<u8>)>,
    pub xref_stm: Option<u64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub dict: Dictionary,
}

impl Trailer {
    /// `Size` and `Root` are required; the remaining fields are read when present and well formed.
    pub fn from_dictionary(dict: Dictionary) -> Result<Trailer> {
        let size = dict
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(Error::Trailer)?;
        let root = dict.get(b"Root").and_then(Object::as_reference).map_err(|_| Error::Trailer)?;
        let offset = |key: &[u8]| {
            dict.get(key)
                .and_then(Object::as_i64)
                .ok()
                .and_then(|offset| u64::try_from(offset).ok())
        };
        let reference = |key: &[u8]| dict.get(key).and_then(Object::as_reference).ok();
        let id = dict.get(b"ID").and_then(Object::as_array).ok().and_then(|ids| match ids.as_slice() {
            [first, second, ..] => Some((first.as_str().ok()?.to_vec(), second.as_str().ok()?.to_vec())),
            _ => None,
        });

        Ok(Trailer {
            size,
            root,
            prev: offset(b"Prev"),
            encrypt: reference(b"Encrypt"),
            info: reference(b"Info"),
            id,
            xref_stm: offset(b"XRefStm"),
            dict,
        })
    }
}

/// Anything that can parse one cross-reference section and its trailer dictionary.
pub trait SectionSource {
    /// Length of the underlying source, bounding every link.
    fn source_len(&self) -> u64;

    /// Entries and trailer dictionary of the section starting at `offset`.
    fn read_section(&mut self, offset: u64) -> Result<(Xref, Dictionary)>;
}

fn link(dict: &Dictionary, key: &[u8], len: u64, invalid: XrefError) -> Result<Option<u64>> {
    let Ok(value) = dict.get(key) else {
        return Ok(None);
    };
    match value.as_i64().ok().and_then(|offset| u64::try_from(offset).ok()) {
        Some(offset) if offset < len => Ok(Some(offset)),
        _ => Err(invalid.into()),
    }
}

fn follow<S: SectionSource>(source: &mut S, offset: u64, visited: &mut BTreeSet<u64>) -> Result<(Xref, Dictionary)> {
    if !visited.insert(offset) {
        return Err(XrefError::Cycle(offset).into());
    }
    let (mut xref, mut dict) = source.read_section(offset)?;
    let len = source.source_len();

    // Hybrid file: the stream holds the entries the table leaves out. Its own links are not followed.
    if let Some(stream_offset) = link(&dict, b"XRefStm", len, XrefError::StreamStart)? {
        if !visited.insert(stream_offset) {
            return Err(XrefError::Cycle(stream_offset).into());
        }
        debug!("xref section at {offset}: merging XRefStm at {stream_offset}");
        let (stream_xref, _) = source.read_section(stream_offset)?;
        xref.merge(stream_xref);
    }

    if let Some(prev) = link(&dict, b"Prev", len, XrefError::PrevStart)? {
        debug!("xref section at {offset}: following Prev to {prev}");
        let (prev_xref, prev_dict) = follow(source, prev, visited)?;
        xref.merge(prev_xref);
        dict.supplement(&prev_dict);
    }
    Ok((xref, dict))
}

/// Parse the section at `start` and every revision it links to, newest entries winning.
pub fn resolve_chain<S: SectionSource>(source: &mut S, start: u64) -> Result<(Xref, Trailer)> {
    let mut visited = BTreeSet::new();
    let (mut xref, dict) = follow(source, start, &mut visited)?;
    let mut trailer = Trailer::from_dictionary(dict)?;

    let entry_count = if xref.is_empty() { 0 } else { xref.max_id().saturating_add(1) };
    if trailer.size < entry_count {
        warn!("trailer Size is {}, but objects up to {} are listed", trailer.size, entry_count - 1);
        trailer.size = entry_count;
        trailer.dict.set("Size", i64::from(entry_count));
    }
    xref.size = trailer.size;
    debug!(
        "xref chain from {start}: {} sections, {} entries, Size {}",
        visited.len(),
        xref.len(),
        xref.size
    );
    Ok((xref, trailer))
}
