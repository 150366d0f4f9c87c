//! The dynamically typed PDF value model produced by the parser.

use crate::error::*;
use crate::object::{Object, PlainRef, Resolve};

use indexmap::map::{self, IndexMap};
use itertools::Itertools;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, Index, Range};

/// Dictionary keys and name values. Names are `#xx`-unescaped and required
/// to be valid UTF-8.
pub type Name = String;

macro_rules! unexpected_primitive {
    ($expected:ident, $found:expr) => (
        Err(PdfError::UnexpectedPrimitive {
            expected: stringify!($expected),
            found: $found,
        })
    )
}

#[derive(Clone, Debug, PartialEq)]
pub enum Primitive {
    Null,
    Integer(i32),
    Number(f32),
    Boolean(bool),
    String(PdfString),
    Stream(PdfStream),
    Dictionary(Dictionary),
    Array(Vec<Primitive>),
    Reference(PlainRef),
    Name(Name),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Primitive::Null => write!(f, "null"),
            Primitive::Integer(i) => i.fmt(f),
            Primitive::Number(n) => n.fmt(f),
            Primitive::Boolean(b) => b.fmt(f),
            Primitive::String(ref s) => write!(f, "{:?}", s),
            Primitive::Stream(_) => write!(f, "stream"),
            Primitive::Dictionary(ref d) => d.fmt(f),
            Primitive::Array(ref arr) => write!(f, "[{}]", arr.iter().format(", ")),
            Primitive::Reference(r) => write!(f, "{} {} R", r.id, r.gen),
            Primitive::Name(ref s) => write!(f, "/{}", s),
        }
    }
}

impl Primitive {
    /// The name of the variant, for error messages.
    pub fn get_debug_name(&self) -> &'static str {
        match *self {
            Primitive::Null => "Null",
            Primitive::Integer(..) => "Integer",
            Primitive::Number(..) => "Number",
            Primitive::Boolean(..) => "Boolean",
            Primitive::String(..) => "String",
            Primitive::Stream(..) => "Stream",
            Primitive::Dictionary(..) => "Dictionary",
            Primitive::Array(..) => "Array",
            Primitive::Reference(..) => "Reference",
            Primitive::Name(..) => "Name",
        }
    }

    /// Follow `self` if it is a reference, otherwise hand it back.
    pub fn resolve(self, r: &impl Resolve) -> Result<Primitive> {
        match self {
            Primitive::Reference(id) => r.resolve(id),
            p => Ok(p),
        }
    }

    pub fn as_integer(&self) -> Result<i32> {
        match *self {
            Primitive::Integer(n) => Ok(n),
            ref p => unexpected_primitive!(Integer, p.get_debug_name()),
        }
    }
    pub fn as_u32(&self) -> Result<u32> {
        match *self {
            Primitive::Integer(n) if n >= 0 => Ok(n as u32),
            Primitive::Integer(_) => unexpected_primitive!(Integer, "negative Integer"),
            ref p => unexpected_primitive!(Integer, p.get_debug_name()),
        }
    }
    pub fn as_usize(&self) -> Result<usize> {
        self.as_u32().map(|n| n as usize)
    }
    /// Either an integer or a real.
    pub fn as_number(&self) -> Result<f32> {
        match *self {
            Primitive::Integer(n) => Ok(n as f32),
            Primitive::Number(f) => Ok(f),
            ref p => unexpected_primitive!(Number, p.get_debug_name()),
        }
    }
    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Primitive::Boolean(b) => Ok(b),
            ref p => unexpected_primitive!(Boolean, p.get_debug_name()),
        }
    }
    pub fn as_name(&self) -> Result<&str> {
        match self {
            Primitive::Name(name) => Ok(name.as_str()),
            p => unexpected_primitive!(Name, p.get_debug_name()),
        }
    }
    pub fn as_string(&self) -> Result<&PdfString> {
        match self {
            Primitive::String(s) => Ok(s),
            p => unexpected_primitive!(String, p.get_debug_name()),
        }
    }
    pub fn as_array(&self) -> Result<&[Primitive]> {
        match self {
            Primitive::Array(v) => Ok(v),
            p => unexpected_primitive!(Array, p.get_debug_name()),
        }
    }
    pub fn as_reference(&self) -> Result<PlainRef> {
        match *self {
            Primitive::Reference(r) => Ok(r),
            ref p => unexpected_primitive!(Reference, p.get_debug_name()),
        }
    }

    pub fn into_reference(self) -> Result<PlainRef> {
        match self {
            Primitive::Reference(r) => Ok(r),
            p => unexpected_primitive!(Reference, p.get_debug_name()),
        }
    }
    pub fn into_array(self) -> Result<Vec<Primitive>> {
        match self {
            Primitive::Array(v) => Ok(v),
            p => unexpected_primitive!(Array, p.get_debug_name()),
        }
    }
    pub fn into_dictionary(self) -> Result<Dictionary> {
        match self {
            Primitive::Dictionary(d) => Ok(d),
            Primitive::Stream(s) => Ok(s.info),
            p => unexpected_primitive!(Dictionary, p.get_debug_name()),
        }
    }
    pub fn into_string(self) -> Result<PdfString> {
        match self {
            Primitive::String(s) => Ok(s),
            p => unexpected_primitive!(String, p.get_debug_name()),
        }
    }
    pub fn into_name(self) -> Result<Name> {
        match self {
            Primitive::Name(name) => Ok(name),
            p => unexpected_primitive!(Name, p.get_debug_name()),
        }
    }
    pub fn into_stream(self) -> Result<PdfStream> {
        match self {
            Primitive::Stream(s) => Ok(s),
            p => unexpected_primitive!(Stream, p.get_debug_name()),
        }
    }
}

/// Insertion-ordered dictionary. PDF does not require an order, but keeping
/// the file's order makes dumps comparable with the source bytes.
#[derive(Default, Clone, PartialEq)]
pub struct Dictionary {
    dict: IndexMap<Name, Primitive>,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary { dict: IndexMap::new() }
    }
    pub fn len(&self) -> usize {
        self.dict.len()
    }
    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
    pub fn get(&self, key: &str) -> Option<&Primitive> {
        self.dict.get(key)
    }
    pub fn insert(&mut self, key: impl Into<Name>, val: Primitive) -> Option<Primitive> {
        self.dict.insert(key.into(), val)
    }
    pub fn remove(&mut self, key: &str) -> Option<Primitive> {
        self.dict.shift_remove(key)
    }
    pub fn iter(&self) -> map::Iter<Name, Primitive> {
        self.dict.iter()
    }
    /// Like `remove`, but reports a missing entry as an error naming the
    /// calling type.
    pub fn require(&mut self, typ: &'static str, key: &str) -> Result<Primitive> {
        self.remove(key).ok_or(PdfError::MissingEntry {
            typ,
            field: key.into(),
        })
    }
    /// Assert that `key` maps to the name `value` (`required = true`) or is
    /// absent entirely (`required = false`).
    pub fn expect(&self, typ: &'static str, key: &str, value: &str, required: bool) -> Result<()> {
        match self.dict.get(key) {
            Some(ty) => {
                let ty = ty.as_name()?;
                if ty != value {
                    Err(PdfError::KeyValueMismatch {
                        key: key.into(),
                        value: value.into(),
                        found: ty.into(),
                    })
                } else {
                    Ok(())
                }
            }
            None if required => Err(PdfError::MissingEntry { typ, field: key.into() }),
            None => Ok(()),
        }
    }
}

impl Deref for Dictionary {
    type Target = IndexMap<Name, Primitive>;
    fn deref(&self) -> &IndexMap<Name, Primitive> {
        &self.dict
    }
}
impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{{")?;
        for (k, v) in self {
            writeln!(f, "{:>15}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}
impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<<{}>>",
            self.iter()
                .format_with(" ", |(k, v), f| f(&format_args!("/{} {}", k, v)))
        )
    }
}
impl<'a> Index<&'a str> for Dictionary {
    type Output = Primitive;
    fn index(&self, idx: &'a str) -> &Primitive {
        self.dict.index(idx)
    }
}
impl IntoIterator for Dictionary {
    type Item = (Name, Primitive);
    type IntoIter = map::IntoIter<Name, Primitive>;
    fn into_iter(self) -> Self::IntoIter {
        self.dict.into_iter()
    }
}
impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Name, &'a Primitive);
    type IntoIter = map::Iter<'a, Name, Primitive>;
    fn into_iter(self) -> Self::IntoIter {
        self.dict.iter()
    }
}

/// Whether a string was written in literal or hexadecimal notation. The
/// decoded bytes are identical either way; the distinction is kept for
/// faithful reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StringFormat {
    Literal,
    Hex,
}

/// A PDF string: opaque bytes. Character-set interpretation is left to the
/// caller.
#[derive(Clone)]
pub struct PdfString {
    pub data: Vec<u8>,
    pub format: StringFormat,
}

impl PdfString {
    pub fn new(data: Vec<u8>) -> PdfString {
        PdfString { data, format: StringFormat::Literal }
    }
    pub fn with_format(data: Vec<u8>, format: StringFormat) -> PdfString {
        PdfString { data, format }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for PdfString {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
// Strings compare by their bytes; the source notation does not matter.
impl PartialEq for PdfString {
    fn eq(&self, rhs: &PdfString) -> bool {
        self.data == rhs.data
    }
}
impl Eq for PdfString {}
impl PartialOrd for PdfString {
    fn partial_cmp(&self, rhs: &PdfString) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}
impl Ord for PdfString {
    fn cmp(&self, rhs: &PdfString) -> Ordering {
        self.data.cmp(&rhs.data)
    }
}
impl PartialEq<[u8]> for PdfString {
    fn eq(&self, rhs: &[u8]) -> bool {
        self.data == rhs
    }
}
impl fmt::Debug for PdfString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"")?;
        for &b in &self.data {
            match b {
                b'"' => write!(f, "\\\"")?,
                b' '..=b'~' => write!(f, "{}", b as char)?,
                o @ 0..=7 => write!(f, "\\{}", o)?,
                x => write!(f, "\\x{:02x}", x)?,
            }
        }
        write!(f, "\"")
    }
}

/// Where a stream body lives. The body is never held in the value: only
/// its location, so fetching it is the caller's (lazy) decision.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamInner {
    /// `file_range` is the absolute byte range of the raw (still encoded,
    /// still encrypted) body; `id` is the object the stream belongs to,
    /// which keys its decryption.
    InFile { id: PlainRef, file_range: Range<usize> },
}

/// A stream object: its dictionary plus the deferred body. Reading the body
/// goes through [`Resolve::stream_data`], which re-reads, decrypts and
/// decodes on every call.
#[derive(Clone, Debug, PartialEq)]
pub struct PdfStream {
    pub info: Dictionary,
    pub inner: StreamInner,
}

impl PdfStream {
    /// The object this stream belongs to.
    pub fn id(&self) -> PlainRef {
        match self.inner {
            StreamInner::InFile { id, .. } => id,
        }
    }
    /// Absolute position of the raw body in the file.
    pub fn file_range(&self) -> Range<usize> {
        match self.inner {
            StreamInner::InFile { ref file_range, .. } => file_range.clone(),
        }
    }
}

impl Object for PdfStream {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Stream(s) => Ok(s),
            Primitive::Reference(r) => PdfStream::from_primitive(resolve.resolve(r)?, resolve),
            p => unexpected_primitive!(Stream, p.get_debug_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_comparison_ignores_notation() {
        let a = PdfString::with_format(b"abc".to_vec(), StringFormat::Literal);
        let b = PdfString::with_format(b"abc".to_vec(), StringFormat::Hex);
        assert_eq!(a, b);
    }

    #[test]
    fn dictionary_keeps_insertion_order() {
        let mut dict = Dictionary::new();
        dict.insert("Zebra", Primitive::Integer(1));
        dict.insert("Alpha", Primitive::Integer(2));
        let keys: Vec<&str> = dict.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["Zebra", "Alpha"]);
    }
}
