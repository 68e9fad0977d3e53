//! Finding the newest cross-reference section.
//!
//! Ordinary files are read backward from their end to the `startxref` line.
//! Linearized files announce themselves in their first object; their first
//! cross-reference section directly follows that object.

use crate::error::XrefError;
use crate::extractor;
use crate::line_reader::LineReader;
use crate::parser::{self, is_whitespace};
use crate::{Dictionary, Result};
use log::debug;
use std::io::{Read, Seek};

/// Bytes after a candidate offset searched for the start of a cross-reference section.
pub const XREF_LOOKAHEAD: usize = 2048;

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|&c| !is_whitespace(c)).unwrap_or(line.len());
    let end = line.iter().rposition(|&c| !is_whitespace(c)).map_or(start, |end| end + 1);
    &line[start..end.max(start)]
}

/// Read lines forward, skipping blank and `%` comment lines. Returns the offset
/// of the next meaningful line with `line` holding it, or `None` at the end.
fn next_meaningful_line<R: Read + Seek>(reader: &mut LineReader<R>, line: &mut Vec<u8>) -> Result<Option<u64>> {
    loop {
        let start = reader.position();
        if !reader.read_line(line)? {
            return Ok(None);
        }
        let text = trim(line);
        if !text.is_empty() && !text.starts_with(b"%") {
            return Ok(Some(start));
        }
    }
}

/// The raw value of the last `startxref`, found by scanning backward from the end of the source.
pub fn find_startxref<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<u64> {
    let mut line = Vec::new();
    let mut before = reader.len();
    let keyword_line = loop {
        match reader.read_line_backward(before, &mut line)? {
            Some(start) if trim(&line) == b"startxref" => break start,
            Some(start) => before = start,
            None => return Err(XrefError::Start.into()),
        }
    };

    reader.seek(keyword_line)?;
    reader.read_line(&mut line)?;
    next_meaningful_line(reader, &mut line)?;
    let offset = parser::xref_offset(&line).ok_or(XrefError::Start)?;
    debug!("startxref at {keyword_line} points to {offset}");
    Ok(offset)
}

fn is_token_at(window: &[u8], index: usize, token: &[u8]) -> bool {
    let before = index.checked_sub(1).map(|i| window[i]);
    let after = window.get(index + token.len()).copied();
    window[index..].starts_with(token)
        && before.is_none_or(|c| is_whitespace(c) || parser::is_delimiter(c))
        && after.is_none_or(|c| is_whitespace(c) || parser::is_delimiter(c))
}

fn find_token(window: &[u8], token: &[u8]) -> Option<usize> {
    (0..window.len().saturating_sub(token.len() - 1)).find(|&index| is_token_at(window, index, token))
}

/// Walk backward from the `obj` keyword at `keyword` over `N G` to the start of the object header.
fn object_header_start(window: &[u8], keyword: usize) -> Option<usize> {
    let mut index = keyword;
    let skip = |index: &mut usize, pred: fn(u8) -> bool| -> bool {
        let from = *index;
        while *index > 0 && pred(window[*index - 1]) {
            *index -= 1;
        }
        *index < from
    };
    let digit = |c: u8| c.is_ascii_digit();

    if !skip(&mut index, is_whitespace)
        || !skip(&mut index, digit)
        || !skip(&mut index, is_whitespace)
        || !skip(&mut index, digit)
    {
        return None;
    }
    Some(index)
}

/// Confirm that a cross-reference section starts near `candidate` and return its exact offset:
/// the `xref` keyword of a classic table, or the header of a cross-reference stream object.
pub fn validate_xref_start<R: Read + Seek>(reader: &mut LineReader<R>, candidate: u64) -> Result<u64> {
    if candidate >= reader.len() {
        return Err(XrefError::Start.into());
    }
    let window = reader.read_at(candidate, XREF_LOOKAHEAD)?;

    let table = find_token(&window, b"xref");
    let stream = find_token(&window, b"obj").and_then(|keyword| object_header_start(&window, keyword));
    let start = match (table, stream) {
        (Some(table), Some(stream)) => table.min(stream),
        (Some(start), None) | (None, Some(start)) => start,
        (None, None) => return Err(XrefError::Start.into()),
    };
    debug!("xref section validated at {} (candidate {candidate})", candidate + start as u64);
    Ok(candidate + start as u64)
}

/// Offset and dictionary of the first indirect object, after the header comments.
/// `None` when the first object is missing or is not a dictionary.
fn first_object<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<Option<(u64, Dictionary)>> {
    reader.seek(0)?;
    reader.skip_whitespace_and_comments()?;
    let start = reader.position();
    let Some((_, header_len)) = parser::object_header(&reader.peek(64)?) else {
        return Ok(None);
    };
    reader.seek(start + header_len as u64)?;
    reader.skip_whitespace_and_comments()?;
    if reader.peek(2)? != b"<<" {
        return Ok(None);
    }
    let span = extractor::extract_dictionary(reader)?;
    Ok(Some((start, extractor::parse_dictionary(&span))))
}

/// Whether the first object carries a `Linearized` entry. A first object that cannot be read counts as no.
pub fn is_linearized<R: Read + Seek>(reader: &mut LineReader<R>) -> bool {
    match first_object(reader) {
        Ok(Some((start, dict))) => {
            let linearized = dict.has(b"Linearized");
            debug!("first object at {start}: linearized = {linearized}");
            linearized
        }
        Ok(None) => {
            debug!("no dictionary object at the start of the file, not linearized");
            false
        }
        Err(err) => {
            debug!("could not read the first object ({err}), not linearized");
            false
        }
    }
}

/// Candidate offset of a linearized file's first cross-reference section: the
/// first meaningful line after the first object's `endobj`.
pub fn linearized_candidate<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<u64> {
    let (start, _) = first_object(reader)?.ok_or(XrefError::Start)?;
    let (_, end) = extractor::object_bounds(reader, start)?;
    reader.seek(end)?;
    let mut line = Vec::new();
    // Rest of the `endobj` line.
    reader.read_line(&mut line)?;
    if !trim(&line).is_empty() {
        return Ok(end + line.iter().position(|&c| !is_whitespace(c)).unwrap_or(0) as u64);
    }
    next_meaningful_line(reader, &mut line)?.ok_or_else(|| XrefError::Start.into())
}

/// Offset of the newest cross-reference section.
pub fn locate_xref_start<R: Read + Seek>(reader: &mut LineReader<R>, linearized: bool) -> Result<u64> {
    let candidate = if linearized {
        linearized_candidate(reader)?
    } else {
        find_startxref(reader)?
    };
    validate_xref_start(reader, candidate)
}
