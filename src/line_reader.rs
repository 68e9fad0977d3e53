//! Buffered random-access line reading.
//!
//! A [`Session`] owns the read-ahead windows of one logical parse. Several
//! sessions may read the same source one after another without their windows
//! aliasing: each window only ever holds bytes the session itself read last.

use crate::{Error, Result};
use log::trace;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};

/// Size of the window used for line-by-line scanning.
pub const DEFAULT_WINDOW_SIZE: usize = 32 * 1024;

/// Size of the window used for offset-precise reads such as classic xref entries.
pub const SMALL_WINDOW_SIZE: usize = 64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Which of a session's two windows serves a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Default,
    Small,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Debug)]
struct Window {
    buffer: Vec<u8>,
    start: u64,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Window {
        Window {
            buffer: Vec::with_capacity(capacity),
            start: 0,
            capacity,
        }
    }

    fn end(&self) -> u64 {
        self.start + self.buffer.len() as u64
    }

    fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos < self.end()
    }

    /// Make the window cover `pos`. Forward refills start at `pos`, backward refills end just after it.
    fn cover<R: Read + Seek>(
        &mut self, source: &mut R, pos: u64, len: u64, direction: Direction, session: u64, kind: WindowKind,
    ) -> Result<()> {
        if self.contains(pos) {
            return Ok(());
        }
        if pos >= len {
            return Err(Error::InvalidOffset { offset: pos, len });
        }
        let capacity = self.capacity as u64;
        let start = match direction {
            Direction::Forward => pos,
            Direction::Backward => (pos + 1).saturating_sub(capacity),
        };
        let size = capacity.min(len - start) as usize;

        self.buffer.resize(size, 0);
        source.seek(SeekFrom::Start(start))?;
        source.read_exact(&mut self.buffer)?;
        self.start = start;
        trace!("session {session}: refilled {kind:?} window at {start} with {size} bytes ({direction:?})");
        Ok(())
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.start = 0;
    }
}

/// One logical parse context and its read-ahead windows.
#[derive(Debug)]
pub struct Session {
    id: u64,
    default: Window,
    small: Window,
}

impl Session {
    pub fn new() -> Session {
        Session::with_window_sizes(DEFAULT_WINDOW_SIZE, SMALL_WINDOW_SIZE)
    }

    pub fn with_window_sizes(default: usize, small: usize) -> Session {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            default: Window::new(default.max(1)),
            small: Window::new(small.max(1)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Forget the buffered bytes, forcing the next read to go to the source.
    pub fn invalidate(&mut self) {
        self.default.clear();
        self.small.clear();
    }

    fn window_mut(&mut self, kind: WindowKind) -> &mut Window {
        match kind {
            WindowKind::Default => &mut self.default,
            WindowKind::Small => &mut self.small,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// Reads lines and bytes from `source` through the windows of one session.
///
/// The reader keeps its own position; the position of `source` itself is
/// meaningless between calls.
pub struct LineReader<'a, R> {
    source: &'a mut R,
    session: &'a mut Session,
    len: u64,
    pos: u64,
}

impl<'a, R: Read + Seek> LineReader<'a, R> {
    pub fn new(source: &'a mut R, session: &'a mut Session, len: u64) -> LineReader<'a, R> {
        LineReader {
            source,
            session,
            len,
            pos: 0,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Length of the source in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when no byte is left at the current position. Never consumes anything.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.len
    }

    /// Move to an absolute offset. The end of the source is a valid target.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len {
            return Err(Error::InvalidOffset {
                offset: pos,
                len: self.len,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn buffered_byte(&mut self, pos: u64, kind: WindowKind, direction: Direction) -> Result<Option<u8>> {
        if pos >= self.len {
            return Ok(None);
        }
        let session = self.session.id;
        let window = self.session.window_mut(kind);
        window.cover(&mut *self.source, pos, self.len, direction, session, kind)?;
        Ok(Some(window.buffer[(pos - window.start) as usize]))
    }

    /// Byte at `pos` without moving the reader. `None` past the end.
    pub fn byte_at(&mut self, pos: u64) -> Result<Option<u8>> {
        self.buffered_byte(pos, WindowKind::Default, Direction::Forward)
    }

    /// Next byte, advancing the position. `None` at the end of the source.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.byte_at(self.pos)?;
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    /// Next line through the default window. See [`read_line_with`](Self::read_line_with).
    pub fn read_line(&mut self, line: &mut Vec<u8>) -> Result<bool> {
        self.read_line_with(line, WindowKind::Default)
    }

    /// Next line through the small window, for short fixed-format lines.
    pub fn read_short_line(&mut self, line: &mut Vec<u8>) -> Result<bool> {
        self.read_line_with(line, WindowKind::Small)
    }

    /// Replace `line` with the bytes up to the next `\n`, `\r` or `\r\n`, consuming
    /// the terminator. Returns `false`, with `line` empty, when no data is left.
    pub fn read_line_with(&mut self, line: &mut Vec<u8>, kind: WindowKind) -> Result<bool> {
        line.clear();
        if self.pos >= self.len {
            return Ok(false);
        }

        loop {
            let session = self.session.id;
            let window = self.session.window_mut(kind);
            window.cover(&mut *self.source, self.pos, self.len, Direction::Forward, session, kind)?;
            let available = &window.buffer[(self.pos - window.start) as usize..];

            match available.iter().position(|&c| c == b'\n' || c == b'\r') {
                Some(index) => {
                    line.extend_from_slice(&available[..index]);
                    let terminator = available[index];
                    self.pos += index as u64 + 1;
                    // A lone `\r` leaves the following byte where it is.
                    if terminator == b'\r' && self.buffered_byte(self.pos, kind, Direction::Forward)? == Some(b'\n') {
                        self.pos += 1;
                    }
                    return Ok(true);
                }
                None => {
                    line.extend_from_slice(available);
                    self.pos += available.len() as u64;
                    if self.pos >= self.len {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Replace `line` with the last non-empty line that ends before `before`,
    /// scanning backward. Line terminators directly in front of `before` are
    /// skipped. Returns the offset where that line starts, or `None` when only
    /// terminators (or nothing) precede `before`. The position is not moved.
    pub fn read_line_backward(&mut self, before: u64, line: &mut Vec<u8>) -> Result<Option<u64>> {
        line.clear();
        let mut end = before.min(self.len);
        while end > 0 {
            match self.buffered_byte(end - 1, WindowKind::Default, Direction::Backward)? {
                Some(b'\n' | b'\r') => end -= 1,
                _ => break,
            }
        }
        if end == 0 {
            return Ok(None);
        }

        let mut start = end;
        while start > 0 {
            match self.buffered_byte(start - 1, WindowKind::Default, Direction::Backward)? {
                Some(b'\n' | b'\r') => break,
                _ => start -= 1,
            }
        }

        // The window now ends at `end`, so a single pass copies the line unless it is longer than the window.
        let mut pos = start;
        while pos < end {
            let session = self.session.id;
            let window = self.session.window_mut(WindowKind::Default);
            window.cover(&mut *self.source, pos, self.len, Direction::Forward, session, WindowKind::Default)?;
            let from = (pos - window.start) as usize;
            let to = (end.min(window.end()) - window.start) as usize;
            line.extend_from_slice(&window.buffer[from..to]);
            pos = window.start + to as u64;
        }
        Ok(Some(start))
    }

    /// Up to `count` bytes starting at `offset`, read directly from the source.
    /// Neither the windows nor the position are touched.
    pub fn read_at(&mut self, offset: u64, count: usize) -> Result<Vec<u8>> {
        if offset > self.len {
            return Err(Error::InvalidOffset {
                offset,
                len: self.len,
            });
        }
        let size = (count as u64).min(self.len - offset) as usize;
        let mut bytes = vec![0; size];
        self.source.seek(SeekFrom::Start(offset))?;
        self.source.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Up to `count` bytes at the current position, without consuming them.
    pub fn peek(&mut self, count: usize) -> Result<Vec<u8>> {
        self.read_at(self.pos, count)
    }

    /// Advance past whitespace and `%` comments.
    pub fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        let mut in_comment = false;
        while let Some(byte) = self.byte_at(self.pos)? {
            match byte {
                b'\r' | b'\n' => in_comment = false,
                b'%' => in_comment = true,
                _ if in_comment => {}
                b' ' | b'\t' | b'\0' | b'\x0C' => {}
                _ => break,
            }
            self.pos += 1;
        }
        Ok(())
    }
}
