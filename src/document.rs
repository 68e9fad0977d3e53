use crate::error::{ParseError, XrefError};
use crate::line_reader::{LineReader, Session};
use crate::object_stream::ObjectStream;
use crate::trailer::{self, SectionSource, Trailer};
use crate::xref::{self, Xref, XrefEntry};
use crate::{Dictionary, Error, Object, ObjectId, ResolveReference, Result, Stream};
use crate::{extractor, locator, parser};
use log::{debug, trace, warn};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::mem;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bytes read to find an `N G obj` header.
const OBJECT_HEADER_PEEK: usize = 64;

/// Bytes at the start of the file searched for the `%PDF-` header.
const HEADER_SEARCH: usize = 1024;

/// Keys of an xref stream dictionary that describe the stream rather than the document.
const XREF_STREAM_KEYS: [&[u8]; 6] = [b"Type", b"Length", b"Filter", b"DecodeParms", b"W", b"Index"];

/// A PDF file opened for reading.
///
/// The source is read lazily: locating the cross-reference data and building the
/// object table happen on first use and are cached for the document's lifetime.
/// All access to the source goes through one lock, so a `Document` can be shared
/// between threads.
pub struct Document<R> {
    inner: Mutex<Inner<R>>,
}

struct Inner<R> {
    source: R,
    len: u64,
    session: Session,
    /// Set while the trailer chain is being parsed; the table is not available yet.
    loading: bool,
    version: Option<String>,
    linearized: Option<bool>,
    startxref: Option<u64>,
    xref_start: Option<u64>,
    xref: Option<Xref>,
    trailer: Option<Trailer>,
}

impl Document<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Document::new(File::open(path)?)
    }
}

impl Document<Cursor<Vec<u8>>> {
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Document::with_len(Cursor::new(bytes), len)
    }
}

impl<R: Read + Seek> Document<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        Ok(Document::with_len(source, len))
    }

    fn with_len(source: R, len: u64) -> Self {
        Document {
            inner: Mutex::new(Inner {
                source,
                len,
                session: Session::new(),
                loading: false,
                version: None,
                linearized: None,
                startxref: None,
                xref_start: None,
                xref: None,
                trailer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        // The cached state is only ever replaced whole, a panic cannot leave it half written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Length of the source in bytes.
    pub fn len(&self) -> u64 {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version from the `%PDF-x.y` header.
    pub fn version(&self) -> Result<String> {
        self.lock().version()
    }

    /// Whether the first object of the file carries a `Linearized` entry.
    pub fn is_linearized(&self) -> bool {
        self.lock().linearized()
    }

    /// The offset written after the last `startxref`, before any validation.
    pub fn startxref_offset(&self) -> Result<u64> {
        self.lock().startxref()
    }

    /// Offset of the newest cross-reference section, validated.
    pub fn locate_xref_start(&self) -> Result<u64> {
        self.lock().xref_start()
    }

    /// The merged cross-reference table of every revision.
    pub fn xref(&self) -> Result<Xref> {
        Ok(self.lock().xref()?.clone())
    }

    /// The merged cross-reference table keyed by object number and generation.
    pub fn build_xref_table(&self) -> Result<BTreeMap<ObjectId, XrefEntry>> {
        Ok(self.lock().xref()?.by_id())
    }

    /// The trailer merged across the `Prev`/`XRefStm` chain.
    pub fn trailer(&self) -> Result<Trailer> {
        Ok(self.lock().trailer()?.clone())
    }

    pub fn trailer_dictionary(&self) -> Result<Dictionary> {
        Ok(self.lock().trailer()?.dict.clone())
    }

    /// The trailer dictionary with each direct reference replaced by the object it names.
    pub fn resolved_trailer_dictionary(&self) -> Result<Dictionary> {
        let mut dict = self.trailer_dictionary()?;
        dict.resolve_references(Some(self as &dyn ResolveReference))?;
        Ok(dict)
    }

    /// The first dictionary at or after `offset`.
    pub fn get_dictionary(&self, offset: u64) -> Result<Dictionary> {
        let mut inner = self.lock();
        let mut reader = inner.reader();
        reader.seek(offset)?;
        extractor::goto_dictionary_start(&mut reader)?;
        let span = extractor::extract_dictionary(&mut reader)?;
        Ok(extractor::parse_dictionary(&span))
    }

    /// The indirect object whose header starts at `offset`.
    pub fn read_object_at(&self, offset: u64) -> Result<(ObjectId, Object)> {
        self.lock().read_object(offset, None, &mut HashSet::new())
    }

    /// Decoded content of the stream object at `offset`.
    pub fn get_stream(&self, offset: u64) -> Result<Vec<u8>> {
        let (_, object) = self.read_object_at(offset)?;
        object.as_stream()?.decompressed_content()
    }

    /// Records of the object stream at `offset`.
    pub fn get_object_stream(&self, offset: u64) -> Result<ObjectStream> {
        let (_, object) = self.read_object_at(offset)?;
        ObjectStream::new(object.as_stream()?)
    }

    /// Look `id` up in the cross-reference table and read it from the source.
    pub fn get_object(&self, id: ObjectId) -> Result<Object> {
        self.lock().get_object(id, &mut HashSet::new())
    }
}

impl<R: Read + Seek> ResolveReference for Document<R> {
    fn resolve_reference(&self, id: ObjectId) -> Result<Object> {
        self.get_object(id)
    }
}

impl<R: Read + Seek> Inner<R> {
    fn reader(&mut self) -> LineReader<'_, R> {
        LineReader::new(&mut self.source, &mut self.session, self.len)
    }

    /// Run `f` with a fresh session so nested reads leave the current windows alone.
    fn with_nested_session<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let outer = mem::take(&mut self.session);
        trace!("session {} nested in session {}", self.session.id(), outer.id());
        let result = f(self);
        self.session = outer;
        result
    }

    fn version(&mut self) -> Result<String> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        let head = self.reader().read_at(0, HEADER_SEARCH)?;
        let offset = head
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or(ParseError::InvalidFileHeader)?;
        let version = parser::header(&head[offset..]).ok_or(ParseError::InvalidFileHeader)?;
        self.version = Some(version.clone());
        Ok(version)
    }

    fn linearized(&mut self) -> bool {
        if let Some(linearized) = self.linearized {
            return linearized;
        }
        let linearized = locator::is_linearized(&mut self.reader());
        self.linearized = Some(linearized);
        linearized
    }

    fn startxref(&mut self) -> Result<u64> {
        if let Some(offset) = self.startxref {
            return Ok(offset);
        }
        let offset = locator::find_startxref(&mut self.reader())?;
        self.startxref = Some(offset);
        Ok(offset)
    }

    fn xref_start(&mut self) -> Result<u64> {
        if let Some(offset) = self.xref_start {
            return Ok(offset);
        }
        let offset = if self.linearized() {
            locator::locate_xref_start(&mut self.reader(), true)?
        } else {
            let candidate = self.startxref()?;
            locator::validate_xref_start(&mut self.reader(), candidate)?
        };
        self.xref_start = Some(offset);
        Ok(offset)
    }

    fn load(&mut self) -> Result<()> {
        if self.xref.is_some() {
            return Ok(());
        }
        let start = self.xref_start()?;
        self.loading = true;
        let result = trailer::resolve_chain(self, start);
        self.loading = false;

        let (xref, trailer) = result?;
        self.xref = Some(xref);
        self.trailer = Some(trailer);
        Ok(())
    }

    fn xref(&mut self) -> Result<&Xref> {
        self.load()?;
        self.xref.as_ref().ok_or(Error::Xref(XrefError::Start))
    }

    fn trailer(&mut self) -> Result<&Trailer> {
        self.load()?;
        self.trailer.as_ref().ok_or(Error::Trailer)
    }

    fn entry(&mut self, number: u32) -> Result<Option<XrefEntry>> {
        if self.loading {
            return Ok(None);
        }
        Ok(self.xref()?.get_entry(number).copied())
    }

    fn get_object(&mut self, id: ObjectId, seen: &mut HashSet<ObjectId>) -> Result<Object> {
        if !seen.insert(id) {
            warn!("reference cycle detected resolving object {} {}", id.0, id.1);
            return Err(Error::ReferenceCycle(id));
        }
        match self.entry(id.0)? {
            Some(XrefEntry::Normal { offset, generation }) if generation == id.1 => {
                self.read_object(offset, Some(id), seen).map(|(_, object)| object)
            }
            Some(XrefEntry::Compressed { container, .. }) if id.1 == 0 => {
                let container = self.get_object((container, 0), seen)?;
                let mut objects = ObjectStream::new(container.as_stream()?)?;
                objects.objects.remove(&id).ok_or(Error::ObjectNotFound(id))
            }
            _ => Err(Error::ObjectNotFound(id)),
        }
    }

    fn read_object(
        &mut self, offset: u64, expected: Option<ObjectId>, seen: &mut HashSet<ObjectId>,
    ) -> Result<(ObjectId, Object)> {
        let mut reader = self.reader();
        reader.seek(offset)?;
        reader.skip_whitespace_and_comments()?;
        let start = reader.position();
        let (id, header_len) =
            parser::object_header(&reader.peek(OBJECT_HEADER_PEEK)?).ok_or(ParseError::IndirectObject(offset))?;
        if expected.is_some_and(|expected| expected != id) {
            return Err(Error::ObjectIdMismatch);
        }
        reader.seek(start + header_len as u64)?;
        reader.skip_whitespace_and_comments()?;
        let body = reader.position();

        if reader.peek(2)? == b"<<" {
            let dict = extractor::parse_dictionary(&extractor::extract_dictionary(&mut reader)?);
            reader.skip_whitespace_and_comments()?;
            if reader.peek(6)? != b"stream" {
                return Ok((id, Object::Dictionary(dict)));
            }
            reader.seek(reader.position() + 6)?;
            match reader.read_byte()? {
                Some(b'\r') => {
                    if reader.byte_at(reader.position())? == Some(b'\n') {
                        reader.read_byte()?;
                    }
                }
                Some(b'\n') | None => {}
                Some(_) => reader.seek(reader.position() - 1)?,
            }
            let content_start = reader.position();
            let content = self.stream_content(id, &dict, content_start, seen)?;
            return Ok((id, Object::Stream(Stream::with_position(dict, content, content_start))));
        }

        let end = extractor::find_keyword(&mut reader, b"endobj")?.ok_or(ParseError::IndirectObject(offset))?;
        let bytes = reader.read_at(body, (end - body) as usize)?;
        let object = parser::direct_object(&bytes).ok_or(ParseError::IndirectObject(offset))?;
        Ok((id, object))
    }

    fn stream_content(
        &mut self, id: ObjectId, dict: &Dictionary, start: u64, seen: &mut HashSet<ObjectId>,
    ) -> Result<Vec<u8>> {
        let length = match dict.get(b"Length") {
            Ok(Object::Integer(length)) => Some(*length),
            Ok(Object::Reference(length_id)) => match self.resolve_length(*length_id, seen) {
                Ok(length) => Some(length),
                Err(err @ Error::ReferenceCycle(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        "stream {} {}: cannot resolve Length {} {} R: {err}",
                        id.0, id.1, length_id.0, length_id.1
                    );
                    None
                }
            },
            _ => None,
        };

        let mut reader = self.reader();
        match length.and_then(|length| u64::try_from(length).ok()) {
            Some(length) => {
                let end = start.saturating_add(length);
                if end <= reader.len() && ends_at_endstream(&mut reader, end)? {
                    return reader.read_at(start, length as usize);
                }
                warn!("stream {} {}: Length {length} does not end at endstream, scanning for it", id.0, id.1);
            }
            None => warn!("stream {} {}: missing or invalid Length, scanning for endstream", id.0, id.1),
        }

        reader.seek(start)?;
        let end = extractor::find_bytes(&mut reader, b"endstream")?
            .ok_or_else(|| Error::InvalidStream(format!("stream {} {} has no endstream", id.0, id.1)))?;
        let mut content = reader.read_at(start, (end - start) as usize)?;
        // The end-of-line marker in front of `endstream` is not data.
        if content.ends_with(b"\r\n") {
            content.truncate(content.len() - 2);
        } else if content.ends_with(b"\n") || content.ends_with(b"\r") {
            content.pop();
        }
        Ok(content)
    }

    fn resolve_length(&mut self, id: ObjectId, seen: &mut HashSet<ObjectId>) -> Result<i64> {
        let object = self.with_nested_session(|inner| inner.get_object(id, seen))?;
        object.as_i64()
    }
}

fn ends_at_endstream<R: Read + Seek>(reader: &mut LineReader<R>, end: u64) -> Result<bool> {
    let tail = reader.read_at(end, 32)?;
    let keyword = tail
        .iter()
        .position(|&c| !parser::is_whitespace(c))
        .map_or(&[][..], |index| &tail[index..]);
    Ok(keyword.starts_with(b"endstream"))
}

fn read_trailer<R: Read + Seek>(reader: &mut LineReader<R>) -> Result<Dictionary> {
    let mut line = Vec::new();
    loop {
        let line_start = reader.position();
        if !reader.read_line(&mut line)? {
            return Err(Error::Trailer);
        }
        if let Some(index) = line.windows(7).position(|w| w == b"trailer") {
            reader.seek(line_start + index as u64 + 7)?;
            break;
        }
    }
    let as_trailer_error = |err: Error| match err {
        Error::Parse(_) => Error::Trailer,
        err => err,
    };
    extractor::goto_dictionary_start(reader).map_err(as_trailer_error)?;
    let span = extractor::extract_dictionary(reader).map_err(as_trailer_error)?;
    Ok(extractor::parse_dictionary(&span))
}

impl<R: Read + Seek> SectionSource for Inner<R> {
    fn source_len(&self) -> u64 {
        self.len
    }

    fn read_section(&mut self, offset: u64) -> Result<(Xref, Dictionary)> {
        let mut reader = self.reader();
        reader.seek(offset)?;
        reader.skip_whitespace_and_comments()?;
        if reader.peek(4)? == b"xref" {
            let xref = xref::read_table(&mut reader)?;
            let dict = read_trailer(&mut reader)?;
            return Ok((xref, dict));
        }

        let section = reader.position();
        let (id, object) = self.read_object(section, None, &mut HashSet::new())?;
        let mut stream = match object {
            Object::Stream(stream) if stream.dict.has_type(b"XRef") => stream,
            _ => return Err(XrefError::Parse.into()),
        };
        debug!("reading xref stream {} {} at {section}", id.0, id.1);
        let xref = xref::decode_xref_stream(&stream)?;
        for key in XREF_STREAM_KEYS {
            stream.dict.remove(key);
        }
        Ok((xref, stream.dict))
    }
}
