//! The document facade: opens a byte source, builds the xref table, sets
//! up decryption, and resolves references on demand.

use std::cell::RefCell;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;

use crate::backend::Backend;
use crate::crypt::{CryptDict, Decoder};
use crate::enc;
use crate::error::*;
use crate::object::{ObjectStream, Object, PlainRef, Resolve};
use crate::parser::{parse, parse_indirect_object, Lexer, ParseFlags};
use crate::primitive::{Dictionary, PdfStream, Primitive};
use crate::xref::{XRef, XRefTable};

/// Number of resolved objects kept per document. Eviction is pure: a
/// dropped entry is simply re-parsed on the next lookup.
const CACHE_SIZE: usize = 256;

/// Owns the byte source and everything derived from it at open time.
pub struct Storage<B: Backend> {
    backend: B,
    refs: XRefTable,
    /// Position of the `%PDF-` header; all file offsets are relative to it.
    start_offset: usize,
    decoder: Option<Decoder>,
    cache: RefCell<LruCache<PlainRef, Primitive>>,
}

impl<B: Backend> Storage<B> {
    pub fn new(backend: B, refs: XRefTable, start_offset: usize) -> Storage<B> {
        Storage {
            backend,
            refs,
            start_offset,
            decoder: None,
            cache: RefCell::new(LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap())),
        }
    }

    fn resolve_uncached(&self, r: PlainRef) -> Result<Primitive> {
        match t!(self.refs.get(r.id)) {
            XRef::Raw { pos, gen_nr } => {
                if r.gen != gen_nr {
                    err!(PdfError::NullRef { obj_nr: r.id });
                }
                let pos = try_opt!(self.start_offset.checked_add(pos));
                let mut lexer = Lexer::with_offset(t!(self.backend.read(pos..)), pos);
                let (id, obj) = t!(parse_indirect_object(&mut lexer, self, self.decoder.as_ref()));
                if id.id != r.id {
                    bail!("xref sent {} {} to an object labelled {} {}", r.id, r.gen, id.id, id.gen);
                }
                Ok(obj)
            }
            XRef::Stream { stream_id, index } => {
                let stream = t!(self.resolve(PlainRef { id: stream_id, gen: 0 }));
                let obj_stream = t!(ObjectStream::from_primitive(stream, self));
                let (obj_nr, slice) = t!(obj_stream.get_object_slice(index));
                let slice = if obj_nr == r.id {
                    slice
                } else {
                    // the index in the xref record disagrees with the
                    // stream prefix; trust the prefix
                    log::warn!(
                        "object {} has index {} in stream {}, but that slot holds {}",
                        r.id, index, stream_id, obj_nr
                    );
                    let index = obj_stream
                        .position_of(r.id)
                        .ok_or(PdfError::NullRef { obj_nr: r.id })?;
                    t!(obj_stream.get_object_slice(index)).1
                };
                // Strings in here were decrypted along with the stream
                // body, so no decryption context applies.
                parse(slice, self, ParseFlags::ANY)
            }
            XRef::Free { .. } => err!(PdfError::FreeObject { obj_nr: r.id }),
            XRef::Invalid => err!(PdfError::NullRef { obj_nr: r.id }),
        }
    }
}

impl<B: Backend> Resolve for Storage<B> {
    /// Memoized resolution: repeated lookups of the same `(id, gen)` return
    /// the cached value.
    fn resolve(&self, r: PlainRef) -> Result<Primitive> {
        if let Some(p) = self.cache.borrow_mut().get(&r) {
            return Ok(p.clone());
        }
        let p = self.resolve_uncached(r)?;
        self.cache.borrow_mut().put(r, p.clone());
        Ok(p)
    }

    fn stream_data(&self, stream: &PdfStream) -> Result<Vec<u8>> {
        let raw = t!(self.backend.read(stream.file_range())).to_vec();
        let raw = match self.decoder {
            Some(ref decoder) => t!(decoder.decrypt_stream(stream.id(), &stream.info, raw)),
            None => raw,
        };
        enc::decode_all(&stream.info, raw, self)
    }
}

/// A parsed document. Keeps the merged trailer and hands out objects
/// lazily through [`Resolve`].
///
/// Every lookup may seek the byte source and touch the resolve cache, so
/// a `File` is not `Sync`; concurrent readers must serialize access.
pub struct File<B: Backend> {
    storage: Storage<B>,
    trailer: Dictionary,
    version: String,
}

impl File<Vec<u8>> {
    /// Opens the file at `path` with an in-memory copy as the byte source.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_data(fs::read(path)?)
    }

    /// Like [`File::open`], for password-protected documents.
    pub fn open_password(path: impl AsRef<Path>, password: &[u8]) -> Result<Self> {
        Self::from_data_password(fs::read(path)?, password)
    }
}

#[cfg(feature = "mmap")]
impl File<memmap2::Mmap> {
    /// Opens the file at `path` memory-mapped.
    pub fn open_mapped(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Self::from_data(mmap)
    }
}

impl<B: Backend> File<B> {
    pub fn from_data(backend: B) -> Result<Self> {
        Self::from_data_password(backend, b"")
    }

    pub fn from_data_password(backend: B, password: &[u8]) -> Result<Self> {
        let start_offset = t!(backend.locate_start_offset());
        let version = t!(backend.read_version(start_offset));
        let (refs, trailer) = t!(backend.read_xref_table_and_trailer(start_offset));
        let mut storage = Storage::new(backend, refs, start_offset);

        if let Some(crypt) = trailer.get("Encrypt") {
            let id = t!(trailer
                .get("ID")
                .ok_or(PdfError::MissingEntry { typ: "Trailer", field: "ID".into() }))
            .as_array()?
            .first()
            .ok_or(PdfError::MissingEntry { typ: "Trailer", field: "ID".into() })?
            .as_string()?
            .as_bytes()
            .to_vec();
            let dict = t!(CryptDict::from_primitive(crypt.clone(), &storage));
            let mut decoder = t!(Decoder::from_password(&dict, &id, password));
            if let Primitive::Reference(reference) = crypt {
                decoder.encrypt_indirect_object = Some(*reference);
            }
            storage.decoder = Some(decoder);
        }

        Ok(File { storage, trailer, version })
    }

    /// The merged trailer dictionary (`Prev` and `XRefStm` consumed).
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// The version from the `%PDF-` header, e.g. `"1.7"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn xref(&self) -> &XRefTable {
        &self.storage.refs
    }

    /// Typed convenience over [`Resolve::resolve`].
    pub fn get<T: Object>(&self, r: PlainRef) -> Result<T> {
        T::from_primitive(self.resolve(r)?, self)
    }

    /// The raw stream body: still encrypted, still encoded.
    pub fn raw_stream_data(&self, stream: &PdfStream) -> Result<Vec<u8>> {
        Ok(t!(self.storage.backend.read(stream.file_range())).to_vec())
    }
}

impl<B: Backend> Resolve for File<B> {
    fn resolve(&self, r: PlainRef) -> Result<Primitive> {
        self.storage.resolve(r)
    }
    fn stream_data(&self, stream: &PdfStream) -> Result<Vec<u8>> {
        self.storage.stream_data(stream)
    }
}
