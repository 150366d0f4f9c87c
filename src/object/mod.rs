//! `Object` and `Resolve` traits, plus typed and untyped references.

mod nametree;
mod numbertree;
mod stream;

pub use self::nametree::*;
pub use self::numbertree::*;
pub use self::stream::*;

use crate::error::*;
use crate::primitive::*;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub type ObjNr = u64;
pub type GenNr = u16;

/// Resolution of indirect references and deferred stream bodies. Implemented
/// by the document facade; parsing code only sees this trait.
pub trait Resolve {
    fn resolve(&self, r: PlainRef) -> Result<Primitive>;

    /// Fetch, decrypt and decode a stream body. Bodies are not cached:
    /// every call re-reads from the byte source.
    fn stream_data(&self, stream: &PdfStream) -> Result<Vec<u8>>;

    fn get<T: Object>(&self, r: Ref<T>) -> Result<T>
    where Self: Sized {
        T::from_primitive(self.resolve(r.get_inner())?, self)
    }
}

/// Resolver for contexts where following a reference is impossible, e.g.
/// while the xref table is still being built.
pub struct NoResolve;
impl Resolve for NoResolve {
    fn resolve(&self, _: PlainRef) -> Result<Primitive> {
        Err(PdfError::Reference)
    }
    fn stream_data(&self, _: &PdfStream) -> Result<Vec<u8>> {
        Err(PdfError::Reference)
    }
}

/// Conversion of a dynamically typed [`Primitive`] into a concrete type.
pub trait Object: Sized {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self>;
}

/// An object identity: sequence number plus generation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PlainRef {
    pub id: ObjNr,
    pub gen: GenNr,
}

impl Object for PlainRef {
    fn from_primitive(p: Primitive, _: &impl Resolve) -> Result<Self> {
        p.into_reference()
    }
}

/// A reference that remembers which type it is expected to resolve to.
pub struct Ref<T> {
    inner: PlainRef,
    _marker: PhantomData<T>,
}

impl<T> Ref<T> {
    pub fn new(inner: PlainRef) -> Ref<T> {
        Ref { inner, _marker: PhantomData }
    }
    pub fn from_id(id: ObjNr) -> Ref<T> {
        Ref::new(PlainRef { id, gen: 0 })
    }
    pub fn get_inner(&self) -> PlainRef {
        self.inner
    }
}
impl<T> Clone for Ref<T> {
    fn clone(&self) -> Ref<T> {
        Ref::new(self.inner)
    }
}
impl<T> Copy for Ref<T> {}
impl<T: Object> Object for Ref<T> {
    fn from_primitive(p: Primitive, _: &impl Resolve) -> Result<Self> {
        Ok(Ref::new(p.into_reference()?))
    }
}
impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ref({} {})", self.inner.id, self.inner.gen)
    }
}
impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state)
    }
}
impl<T> PartialEq for Ref<T> {
    fn eq(&self, rhs: &Self) -> bool {
        self.inner.eq(&rhs.inner)
    }
}
impl<T> Eq for Ref<T> {}

impl Object for Primitive {
    fn from_primitive(p: Primitive, _: &impl Resolve) -> Result<Self> {
        Ok(p)
    }
}

impl Object for Dictionary {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.into_dictionary()
    }
}

impl Object for PdfString {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.into_string()
    }
}

impl Object for Name {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.into_name()
    }
}

impl Object for i32 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.as_integer()
    }
}
impl Object for u32 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.as_u32()
    }
}
impl Object for usize {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.as_usize()
    }
}
impl Object for u64 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        Ok(p.resolve(r)?.as_u32()? as u64)
    }
}
impl Object for u16 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        let n = p.resolve(r)?.as_u32()?;
        if n > u16::MAX as u32 {
            return unexpected_u16();
        }
        Ok(n as u16)
    }
}
impl Object for f32 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.as_number()
    }
}
impl Object for bool {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        p.resolve(r)?.as_bool()
    }
}

fn unexpected_u16<T>() -> Result<T> {
    Err(PdfError::UnexpectedPrimitive {
        expected: "16-bit Integer",
        found: "larger Integer",
    })
}

/// "One or many": a missing or null entry is an empty list and a lone value
/// is a one-element list. Several dictionary entries (`/Filter`, `/Kids`)
/// use this shape.
impl<T: Object> Object for Vec<T> {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p.resolve(r)? {
            Primitive::Null => Ok(Vec::new()),
            Primitive::Array(items) => items
                .into_iter()
                .map(|p| T::from_primitive(p, r))
                .collect(),
            other => Ok(vec![T::from_primitive(other, r)?]),
        }
    }
}

impl<T: Object> Object for Option<T> {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Null => Ok(None),
            p => T::from_primitive(p, r).map(Some),
        }
    }
}
