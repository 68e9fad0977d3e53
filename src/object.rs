use crate::{Error, Result};
use indexmap::IndexMap;
use std::fmt;
use std::str;

/// Object identifier consists of two parts: object number and generation number.
pub type ObjectId = (u32, u16);

/// Dictionary object. Keys are names without the leading slash and compare case-sensitively.
#[derive(Clone, Default, PartialEq)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object: its dictionary plus the raw (still encoded) bytes between
/// `stream` and `endstream`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Associated stream dictionary
    pub dict: Dictionary,
    /// Contents of the stream in bytes
    pub content: Vec<u8>,
    /// Offset of the first content byte in the source.
    pub start_position: Option<u64>,
}

/// Basic PDF object types defined in an enum.
#[derive(Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// String objects can be written in two formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// Capability that turns an object identity into the object it names.
///
/// Objects never resolve themselves: a `Reference` only carries the identity, and
/// whoever owns the cross-reference data (normally a [`Document`](crate::Document))
/// supplies this capability.
pub trait ResolveReference {
    fn resolve_reference(&self, id: ObjectId) -> Result<Object>;
}

impl<F> ResolveReference for F
where
    F: Fn(ObjectId) -> Result<Object>,
{
    fn resolve_reference(&self, id: ObjectId) -> Result<Object> {
        self(id)
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(number: i64) -> Self {
        Object::Integer(number)
    }
}

macro_rules! from_smaller_ints {
	($( $Int: ty )+) => {
		$(
			impl From<$Int> for Object {
				fn from(number: $Int) -> Self {
					Object::Integer(i64::from(number))
				}
			}
		)+
	}
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f64> for Object {
    fn from(number: f64) -> Self {
        Object::Real(number)
    }
}

impl From<&str> for Object {
    fn from(name: &str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(self.type_error("Boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(self.type_error("Integer")),
        }
    }

    /// Integer or real, as a float.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Object::Integer(value) => Ok(*value as f64),
            Object::Real(value) => Ok(*value),
            _ => Err(self.type_error("Real")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("Name")),
        }
    }

    pub fn as_name_str(&self) -> Result<&str> {
        Ok(str::from_utf8(self.as_name()?)?)
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match self {
            Object::String(string, _) => Ok(string),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("Reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    /// Dictionary of a dictionary or a stream object.
    pub fn dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&stream.dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    /// Resolve this object if it is a reference; other objects are returned as they are.
    ///
    /// Fails with [`Error::MissingResolver`] when a reference is met and no resolver was given.
    pub fn resolve(&self, resolver: Option<&dyn ResolveReference>) -> Result<Object> {
        match self {
            Object::Reference(id) => resolver.ok_or(Error::MissingResolver)?.resolve_reference(*id),
            other => Ok(other.clone()),
        }
    }

    pub fn enum_variant(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(..) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.enum_variant(),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => f.write_str("null"),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Integer(value) => write!(f, "{value}"),
            Object::Real(value) => write!(f, "{value}"),
            Object::Name(name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(text, StringFormat::Literal) => write!(f, "({})", String::from_utf8_lossy(text)),
            Object::String(text, StringFormat::Hexadecimal) => {
                f.write_str("<")?;
                for byte in text {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str(">")
            }
            Object::Array(array) => {
                let items = array.iter().map(|item| format!("{item:?}")).collect::<Vec<String>>();
                write!(f, "[{}]", items.join(" "))
            }
            Object::Dictionary(dict) => write!(f, "{dict:?}"),
            Object::Stream(stream) => write!(f, "{:?}stream...endstream", stream.dict),
            Object::Reference(id) => write!(f, "{} {} R", id.0, id.1),
        }
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(IndexMap::new())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.0.keys().map(Vec::as_slice)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn type_name(&self) -> Result<&str> {
        self.get(b"Type").and_then(Object::as_name_str)
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type").and_then(Object::as_name).ok() == Some(type_name)
    }

    /// Copy every entry of `older` whose key is not set yet. Existing entries are never overwritten.
    pub fn supplement(&mut self, older: &Dictionary) {
        for (key, value) in older.iter() {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Replace every direct child that is a `Reference` with the object it resolves to.
    ///
    /// Only one level is resolved: references nested in arrays or sub-dictionaries stay as they are.
    /// Without a resolver this fails with [`Error::MissingResolver`] as soon as a reference is met.
    pub fn resolve_references(&mut self, resolver: Option<&dyn ResolveReference>) -> Result<&mut Self> {
        for value in self.0.values_mut() {
            if let Object::Reference(id) = *value {
                *value = resolver.ok_or(Error::MissingResolver)?.resolve_reference(id)?;
            }
        }
        Ok(self)
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .into_iter()
            .map(|(key, value)| format!("/{} {:?}", String::from_utf8_lossy(key), value))
            .collect::<Vec<String>>();
        write!(f, "<<{}>>", entries.concat())
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, Object)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

#[macro_export]
macro_rules! dictionary {
	() => {
		$crate::Dictionary::new()
	};
	($( $key: expr => $value: expr ),+ ,) => {
		dictionary!( $($key => $value),+ )
	};
	($( $key: expr => $value: expr ),*) => {{
		let mut dict = $crate::Dictionary::new();
		$(
			dict.set($key, $value);
		)*
		dict
	}}
}

impl Stream {
    pub fn new(dict: Dictionary, content: Vec<u8>) -> Stream {
        Stream {
            dict,
            content,
            start_position: None,
        }
    }

    pub fn with_position(dict: Dictionary, content: Vec<u8>, position: u64) -> Stream {
        Stream {
            dict,
            content,
            start_position: Some(position),
        }
    }

    /// Filter names in decoding order. A stream without `Filter` has none.
    pub fn filters(&self) -> Result<Vec<&[u8]>> {
        let filter = match self.dict.get(b"Filter") {
            Ok(filter) => filter,
            Err(_) => return Ok(Vec::new()),
        };

        if let Ok(name) = filter.as_name() {
            Ok(vec![name])
        } else if let Ok(names) = filter.as_array() {
            names.iter().map(Object::as_name).collect()
        } else {
            Err(Error::ObjectType {
                expected: "Name or Array",
                found: filter.enum_variant(),
            })
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.dict.has(b"Filter")
    }

    /// Decode parameters paired with the filter at `index`.
    pub fn decode_params(&self, index: usize) -> Option<&Dictionary> {
        match self.dict.get(b"DecodeParms").or_else(|_| self.dict.get(b"DP")).ok()? {
            Object::Dictionary(params) if index == 0 => Some(params),
            Object::Array(params) => params.get(index).and_then(|p| p.as_dict().ok()),
            _ => None,
        }
    }

    /// Stream content with every filter undone.
    pub fn decompressed_content(&self) -> Result<Vec<u8>> {
        let filters = self.filters()?;
        let mut data = self.content.clone();
        for (index, filter) in filters.into_iter().enumerate() {
            data = crate::filters::decode(filter, &data, self.decode_params(index))?;
        }
        Ok(data)
    }
}
