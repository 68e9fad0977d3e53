//! Locates and reconstructs the object graph of PDF files.
//!
//! A [`Document`] finds the newest cross-reference section (by `startxref`, or
//! after the first object of a linearized file), walks the `Prev`/`XRefStm` chain
//! of every revision and serves objects by id or by offset. Classic tables,
//! cross-reference streams and hybrid files are supported, as are objects stored
//! in object streams.
//!
//! ```no_run
//! use pdfstruct::Document;
//!
//! let document = Document::open("assets/example.pdf")?;
//! let trailer = document.trailer()?;
//! let catalog = document.get_object(trailer.root)?;
//! println!("{:?}", catalog.as_dict()?.get(b"Pages")?);
//! # Ok::<(), pdfstruct::Error>(())
//! ```

mod object;
pub use crate::object::{Dictionary, Object, ObjectId, ResolveReference, Stream, StringFormat};

mod document;
pub use crate::document::Document;

mod error;
pub use crate::error::{DecompressError, Error, ParseError, Result, XrefError};

pub mod extractor;
pub mod filters;
pub mod line_reader;
pub use crate::line_reader::{LineReader, Session};
pub mod locator;
mod object_stream;
pub use crate::object_stream::ObjectStream;
pub mod parser;
pub mod trailer;
pub use crate::trailer::Trailer;
pub mod xref;
pub use crate::xref::{EntryStatus, Xref, XrefEntry};
