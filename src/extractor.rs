//! Bounds of dictionaries and indirect objects in the raw byte stream.
//!
//! These scanners only find where a construct starts and ends; the bytes in between
//! are handed to [`parser::direct_object`].

use crate::error::ParseError;
use crate::line_reader::LineReader;
use crate::parser::{self, is_delimiter, is_whitespace};
use crate::{Dictionary, Result};
use log::warn;
use std::io::{Read, Seek};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Normal,
    LessThan,
    GreaterThan,
    Hex,
    Literal {
        depth: usize,
        escape: bool,
    },
    Comment,
}

/// Incremental `<< >>` balance counter. Hex strings, literal strings and
/// comments are stepped over so their contents never change the balance.
#[derive(Debug, Default)]
struct Balance {
    depth: usize,
    state: State,
}

impl Balance {
    /// Feed the next byte; true once the outermost dictionary has closed.
    fn feed(&mut self, c: u8) -> bool {
        match self.state {
            State::Literal { depth, escape } => {
                self.state = match c {
                    _ if escape => State::Literal { depth, escape: false },
                    b'\\' => State::Literal { depth, escape: true },
                    b'(' => State::Literal {
                        depth: depth + 1,
                        escape: false,
                    },
                    b')' if depth == 1 => State::Normal,
                    b')' => State::Literal {
                        depth: depth - 1,
                        escape: false,
                    },
                    _ => State::Literal { depth, escape: false },
                };
                false
            }
            State::Hex => {
                if c == b'>' {
                    self.state = State::Normal;
                }
                false
            }
            State::Comment => {
                if c == b'\r' || c == b'\n' {
                    self.state = State::Normal;
                }
                false
            }
            State::LessThan => {
                if c == b'<' {
                    self.depth += 1;
                    self.state = State::Normal;
                } else if c == b'>' {
                    // `<>`, an empty hex string.
                    self.state = State::Normal;
                } else {
                    self.state = State::Hex;
                }
                false
            }
            State::GreaterThan => {
                self.state = State::Normal;
                if c == b'>' {
                    self.depth = self.depth.saturating_sub(1);
                    return self.depth == 0;
                }
                self.feed(c)
            }
            State::Normal => {
                match c {
                    b'<' => self.state = State::LessThan,
                    b'>' => self.state = State::GreaterThan,
                    b'(' => self.state = State::Literal { depth: 1, escape: false },
                    b'%' => self.state = State::Comment,
                    _ => {}
                }
                false
            }
        }
    }
}

/// End (exclusive) of the dictionary starting with `<<` at `start`.
pub fn dictionary_end(bytes: &[u8], start: usize) -> Option<usize> {
    let tail = bytes.get(start..)?;
    if !tail.starts_with(b"<<") {
        return None;
    }
    let mut balance = Balance::default();
    tail.iter()
        .position(|&c| balance.feed(c))
        .map(|index| start + index + 1)
}

/// End (exclusive) of the literal string starting with `(` at `start`.
pub fn literal_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut escape = false;
    for (index, &c) in bytes.iter().enumerate().skip(start) {
        match c {
            _ if escape => escape = false,
            b'\\' => escape = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn nested_end(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = start;
    while index < bytes.len() {
        let c = bytes[index];
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(index + 1);
            }
        } else if c == b'(' || c == b'<' {
            index = enclosed_end(bytes, index)?;
            continue;
        }
        index += 1;
    }
    None
}

/// End (exclusive) of the enclosed construct starting at `start`: a literal
/// string, dictionary, hex string, array or `{ }` block. `None` when the byte at
/// `start` opens none of these or the construct never closes.
pub fn enclosed_end(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start)? {
        b'(' => literal_string_end(bytes, start),
        b'<' if bytes.get(start + 1) == Some(&b'<') => dictionary_end(bytes, start),
        b'<' => bytes[start..].iter().position(|&c| c == b'>').map(|index| start + index + 1),
        b'[' => nested_end(bytes, start, b'[', b']'),
        b'{' => nested_end(bytes, start, b'{', b'}'),
        _ => None,
    }
}

/// Index of the next `/` outside any enclosed construct, searching from `from`.
fn next_key(bytes: &[u8], from: usize) -> Option<usize> {
    let mut index = from;
    while index < bytes.len() {
        match bytes[index] {
            b'/' => return Some(index),
            b'(' | b'<' | b'[' | b'{' => index = enclosed_end(bytes, index)?,
            b'%' => {
                while index < bytes.len() && !matches!(bytes[index], b'\r' | b'\n') {
                    index += 1;
                }
            }
            _ => index += 1,
        }
    }
    None
}

fn trim_value(mut value: &[u8]) -> &[u8] {
    loop {
        if let Some(rest) = value.strip_suffix(b">>") {
            // Only a closing `>>` without its own opener belongs to the outer dictionary.
            if dictionary_start_of(rest).is_none() {
                value = rest;
                continue;
            }
        }
        match value.last() {
            Some(&c) if is_whitespace(c) => value = &value[..value.len() - 1],
            _ => return value,
        }
    }
}

fn dictionary_start_of(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"<<")
}

/// Walk the key/value pairs of an extracted `<< … >>` span. Each value runs
/// from the end of its key to the next top-level `/`, or to the end of its
/// enclosing delimiter; values the literal grammar rejects are skipped.
pub fn parse_dictionary(span: &[u8]) -> Dictionary {
    let inner = span.strip_prefix(b"<<").unwrap_or(span);
    let mut dict = Dictionary::new();
    let mut cursor = 0;

    while let Some(key_start) = next_key(inner, cursor) {
        let key_end = inner[key_start + 1..]
            .iter()
            .position(|&c| is_whitespace(c) || is_delimiter(c))
            .map_or(inner.len(), |index| key_start + 1 + index);
        let key = parser::name_token(&inner[key_start..key_end]);

        let mut value_start = key_end;
        while value_start < inner.len() && is_whitespace(inner[value_start]) {
            value_start += 1;
        }
        if value_start >= inner.len() {
            break;
        }

        let value_end = match inner[value_start] {
            b'(' | b'<' | b'[' | b'{' => enclosed_end(inner, value_start).unwrap_or(inner.len()),
            b'/' => next_key(inner, value_start + 1).unwrap_or(inner.len()),
            _ => next_key(inner, value_start).unwrap_or(inner.len()),
        };
        let value = trim_value(&inner[value_start..value_end]);
        cursor = value_end.max(value_start + 1);

        match (key, parser::direct_object(value)) {
            (Some(key), Some(object)) => dict.set(key, object),
            (key, _) => warn!(
                "dictionary: skipping unparsable entry /{} {:?}",
                String::from_utf8_lossy(key.as_deref().unwrap_or_default()),
                String::from_utf8_lossy(value)
            ),
        }
    }
    dict
}

/// Position the reader on the next `<<`, skipping comment lines. Returns its offset.
pub fn goto_dictionary_start<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<u64> {
    let origin = reader.position();
    let mut line = Vec::new();
    loop {
        let line_start = reader.position();
        if !reader.read_line(&mut line)? {
            return Err(ParseError::Dictionary(origin).into());
        }
        if line.iter().find(|&&c| !is_whitespace(c)) == Some(&b'%') {
            continue;
        }
        if let Some(index) = dictionary_start_of(&line) {
            let start = line_start + index as u64;
            reader.seek(start)?;
            return Ok(start);
        }
    }
}

/// Bytes of the balanced dictionary starting at the reader's position, which
/// must be on `<<`. The reader is left just after the closing `>>`.
pub fn extract_dictionary<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<Vec<u8>> {
    let start = reader.position();
    if reader.peek(2)? != b"<<" {
        return Err(ParseError::Dictionary(start).into());
    }

    let mut balance = Balance::default();
    let mut span = Vec::new();
    while let Some(c) = reader.read_byte()? {
        span.push(c);
        if balance.feed(c) {
            return Ok(span);
        }
    }
    Err(ParseError::Dictionary(start).into())
}

/// Find `keyword` at or after the reader's position, skipping literal strings.
/// The reader is left on the first byte of the keyword; `None` at end of source.
pub fn find_keyword<R: Read + Seek>(reader: &mut LineReader<R>, keyword: &[u8]) -> Result<Option<u64>> {
    search(reader, keyword, true)
}

/// Like [`find_keyword`], for binary data where parentheses mean nothing.
pub fn find_bytes<R: Read + Seek>(reader: &mut LineReader<R>, pattern: &[u8]) -> Result<Option<u64>> {
    search(reader, pattern, false)
}

fn search<R: Read + Seek>(reader: &mut LineReader<R>, keyword: &[u8], skip_strings: bool) -> Result<Option<u64>> {
    let mut matched = 0;
    let mut string_depth = 0usize;
    let mut escape = false;

    while let Some(c) = reader.read_byte()? {
        if string_depth > 0 {
            match c {
                _ if escape => escape = false,
                b'\\' => escape = true,
                b'(' => string_depth += 1,
                b')' => string_depth -= 1,
                _ => {}
            }
            continue;
        }
        if c == keyword[matched] {
            matched += 1;
            if matched == keyword.len() {
                let start = reader.position() - keyword.len() as u64;
                reader.seek(start)?;
                return Ok(Some(start));
            }
        } else {
            matched = usize::from(c == keyword[0]);
            if skip_strings && c == b'(' {
                string_depth = 1;
            }
        }
    }
    Ok(None)
}

/// Bounds of an indirect object: from its `N G obj` header at `offset` to the
/// end of its `endobj` keyword.
pub fn object_bounds<R: Read + Seek>(reader: &mut LineReader<R>, offset: u64) -> Result<(u64, u64)> {
    reader.seek(offset)?;
    reader.skip_whitespace_and_comments()?;
    let start = reader.position();
    let header = reader.peek(64)?;
    if parser::object_header(&header).is_none() {
        return Err(ParseError::IndirectObject(offset).into());
    }
    match find_keyword(reader, b"endobj")? {
        Some(end) => Ok((start, end + b"endobj".len() as u64)),
        None => Err(ParseError::IndirectObject(offset).into()),
    }
}
