use thiserror::Error;

use crate::ObjectId;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// Failed to parse input.
    #[error("couldn't parse input: {0}")]
    Parse(#[from] ParseError),
    /// Error while locating or parsing cross reference data.
    #[error("invalid cross-reference data: {0}")]
    Xref(#[from] XrefError),
    /// The file trailer was missing or invalid.
    #[error("invalid file trailer")]
    Trailer,
    /// A reference was resolved without a resolver capability installed.
    #[error("no reference resolver is configured; pass a resolver such as a `Document`")]
    MissingResolver,
    /// Seek or read requested outside the source.
    #[error("offset {offset} is outside the source of {len} bytes")]
    InvalidOffset { offset: u64, len: u64 },
    /// Invalid stream layout.
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    /// The stream uses a filter this crate does not decode.
    #[error("unsupported stream filter {0}")]
    UnsupportedFilter(String),
    /// The Object ID was not found.
    #[error("object {0:?} not found")]
    ObjectNotFound(ObjectId),
    /// Found Object ID does not match Expected Object ID.
    #[error("object id found does not match the requested object")]
    ObjectIdMismatch,
    /// Dereferencing object failed due to a reference cycle.
    #[error("reference cycle detected at object {0:?}")]
    ReferenceCycle(ObjectId),
    /// Decoding byte vector to UTF8 String failed.
    #[error("invalid UTF-8")]
    UTF8,
    /// IO error
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("inflate failed before producing any output: {0}")]
    Flate(String),
    #[error("LZW decoding failed before producing any output: {0}")]
    Lzw(String),
    #[error("invalid predictor row: {0}")]
    Predictor(String),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("invalid indirect object at offset {0}")]
    IndirectObject(u64),
    #[error("invalid dictionary at offset {0}")]
    Dictionary(u64),
    #[error("invalid object stream")]
    ObjectStream,
}

#[derive(Debug)]
pub enum XrefError {
    /// Could not parse cross reference table.
    Parse,
    /// Could not find start of cross reference table.
    Start,
    /// The trailer's "Prev" field was invalid.
    PrevStart,
    /// The trailer's "XRefStm" field was invalid.
    StreamStart,
    /// A cross reference section was reached twice while following the trailer chain.
    Cycle(u64),
}

impl fmt::Display for XrefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XrefError::Parse => write!(f, "could not parse xref"),
            XrefError::Start => write!(f, "invalid start value"),
            XrefError::PrevStart => write!(f, "invalid start value in Prev field"),
            XrefError::StreamStart => write!(f, "invalid stream start value"),
            XrefError::Cycle(offset) => write!(f, "xref section at offset {offset} is linked twice"),
        }
    }
}

impl std::error::Error for XrefError {}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Error::UTF8
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::UTF8
    }
}
