//! Object streams (`/Type /ObjStm`): many small objects packed into one
//! compressed stream body.

use crate::error::*;
use crate::object::{ObjNr, Object, Resolve};
use crate::parser::Lexer;
use crate::primitive::{PdfStream, Primitive};

pub struct ObjectStream {
    /// `(object number, byte offset)` pairs from the stream prefix.
    offsets: Vec<(ObjNr, usize)>,
    /// Offset of the first object, from the start of the decoded body.
    first: usize,
    /// The decoded (and, for encrypted files, already decrypted) body.
    data: Vec<u8>,
}

impl Object for ObjectStream {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<ObjectStream> {
        let stream = PdfStream::from_primitive(p, resolve)?;
        t!(stream.info.expect("ObjStm", "Type", "ObjStm", true));

        let require = |key: &'static str| -> Result<Primitive> {
            stream.info.get(key).cloned().ok_or(PdfError::MissingEntry {
                typ: "ObjStm",
                field: key.into(),
            })
        };
        let num_objects = t!(usize::from_primitive(require("N")?, resolve));
        let first = t!(usize::from_primitive(require("First")?, resolve));
        if stream.info.get("Extends").is_some() {
            log::warn!("/Extends in object stream dictionary is not supported");
        }

        let data = t!(resolve.stream_data(&stream));

        let mut offsets = Vec::with_capacity(num_objects);
        let mut lexer = Lexer::new(&data);
        for _ in 0..num_objects {
            let obj_nr = t!(t!(lexer.next()).to::<ObjNr>());
            let offset = t!(t!(lexer.next()).to::<usize>());
            offsets.push((obj_nr, offset));
        }

        Ok(ObjectStream { offsets, first, data })
    }
}

impl ObjectStream {
    pub fn n_objects(&self) -> usize {
        self.offsets.len()
    }

    /// Index of `obj_nr` in the prefix table, for when an xref entry's
    /// stored index disagrees with the stream.
    pub fn position_of(&self, obj_nr: ObjNr) -> Option<usize> {
        self.offsets.iter().position(|&(nr, _)| nr == obj_nr)
    }

    /// The bytes of the object at `index`, together with its object number
    /// so callers can verify the xref entry pointed at the right slot.
    pub fn get_object_slice(&self, index: usize) -> Result<(ObjNr, &[u8])> {
        if index >= self.offsets.len() {
            err!(PdfError::ObjStmOutOfBounds { index, max: self.offsets.len() });
        }
        let (obj_nr, offset) = self.offsets[index];
        let start = self.first + offset;
        let end = match self.offsets.get(index + 1) {
            Some(&(_, next_offset)) => self.first + next_offset,
            None => self.data.len(),
        };
        if start > end || end > self.data.len() {
            bail!("object stream offsets out of order ({}..{})", start, end);
        }
        Ok((obj_nr, &self.data[start..end]))
    }
}
