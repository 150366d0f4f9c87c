//! Random access to the raw bytes of a PDF file, and the file-level
//! bootstrapping that only needs those bytes: finding the header, the
//! `startxref` footer, and walking the xref chain.

use crate::error::*;
use crate::object::ObjNr;
use crate::parser::{parse_xref_stream_and_trailer, read_xref_and_trailer_at, Lexer};
use crate::primitive::Dictionary;
use crate::xref::XRefTable;
use std::ops::{Deref, Range, RangeFrom, RangeFull, RangeTo};

/// Upper bound on `/Size`, to keep a corrupt file from allocating the moon.
pub const MAX_ID: u32 = 1_000_000;

pub trait Backend: Sized {
    fn read<T: IndexRange>(&self, range: T) -> Result<&[u8]>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the `%PDF-` header. Acrobat only requires it within the
    /// first kilobyte, so everything before it is treated as junk and all
    /// file offsets are relative to it.
    fn locate_start_offset(&self) -> Result<usize> {
        const HEADER: &[u8] = b"%PDF-";
        let buf = t!(self.read(..std::cmp::min(1024, self.len())));
        buf.windows(HEADER.len())
            .position(|window| window == HEADER)
            .ok_or_else(|| PdfError::Other { msg: "file header is missing".into() })
    }

    /// The version part of the header: `"1.7"` for `%PDF-1.7`.
    fn read_version(&self, start_offset: usize) -> Result<String> {
        let end = self.len().min(start_offset + 16);
        let buf = t!(self.read(start_offset..end));
        let version: &[u8] = buf
            .strip_prefix(b"%PDF-")
            .ok_or(PdfError::Other { msg: "file header is missing".into() })?;
        let version = match version.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(eol) => &version[..eol],
            None => version,
        };
        if version.is_empty() {
            bail!("empty version in file header");
        }
        Ok(std::str::from_utf8(version)?.into())
    }

    /// The value of `startxref`: the offset of the newest xref section,
    /// located by scanning backwards from the end of the file.
    fn locate_xref_offset(&self) -> Result<usize> {
        let mut lexer = Lexer::new(t!(self.read(..)));
        lexer.set_pos_from_end(0);
        t!(lexer.seek_substr_back(b"startxref"));
        t!(lexer.next()).to::<usize>()
    }

    /// Walks the xref chain newest → oldest, folding every section into one
    /// flat table and every trailer into one merged dictionary. For hybrid
    /// files the `/XRefStm` section ranks between its classical section and
    /// the previous generation. `/Prev` and `/XRefStm` are consumed by the
    /// walk; for the other keys the last-seen value wins.
    fn read_xref_table_and_trailer(&self, start_offset: usize) -> Result<(XRefTable, Dictionary)> {
        let file = t!(self.read(..));
        let xref_offset = t!(self.locate_xref_offset());

        let mut refs: Option<XRefTable> = None;
        let mut merged_trailer = Dictionary::new();
        let mut seen = Vec::new();
        let mut next_offset = Some(xref_offset);

        while let Some(offset) = next_offset {
            if seen.contains(&offset) {
                bail!("xref offsets loop");
            }
            seen.push(offset);

            let pos = try_opt!(start_offset.checked_add(offset));
            if pos >= self.len() {
                bail!("xref offset {} outside file bounds", pos);
            }
            let mut lexer = Lexer::with_offset(t!(self.read(pos..)), pos);
            let (sections, mut trailer) = t!(read_xref_and_trailer_at(&mut lexer, file));

            if refs.is_none() {
                // The newest trailer dictates the table size.
                let size = t!(trailer
                    .get("Size")
                    .ok_or(PdfError::MissingEntry { typ: "Trailer", field: "Size".into() })?
                    .as_u32());
                if size > MAX_ID {
                    bail!("too many objects");
                }
                refs = Some(XRefTable::new(size as ObjNr));
            }
            let table = try_opt!(refs.as_mut());
            for section in sections {
                table.add_entries_from(section);
            }

            if let Some(p) = trailer.remove("XRefStm") {
                let stm_pos = try_opt!(start_offset.checked_add(t!(p.as_usize())));
                let mut stm_lexer = Lexer::with_offset(t!(self.read(stm_pos..)), stm_pos);
                let (stm_sections, _) = t!(parse_xref_stream_and_trailer(&mut stm_lexer, file));
                for section in stm_sections {
                    table.add_entries_from(section);
                }
            }

            next_offset = match trailer.remove("Prev") {
                Some(p) => Some(t!(p.as_usize())),
                None => None,
            };

            for (key, value) in trailer {
                merged_trailer.insert(key, value);
            }
        }

        match refs {
            Some(table) => Ok((table, merged_trailer)),
            None => bail!("startxref chain is empty"),
        }
    }
}

impl<T> Backend for T
where T: Deref<Target = [u8]>
{
    fn read<R: IndexRange>(&self, range: R) -> Result<&[u8]> {
        let r = t!(range.to_range(self.len()));
        Ok(&self[r])
    }
    fn len(&self) -> usize {
        (**self).len()
    }
}

/// `IndexRange` is implemented by Rust's built-in range types, produced
/// by range syntax like `..`, `a..`, `..b` or `c..d`.
pub trait IndexRange {
    /// Start index (inclusive)
    fn start(&self) -> Option<usize>;
    /// End index (exclusive)
    fn end(&self) -> Option<usize>;

    fn to_range(&self, len: usize) -> Result<Range<usize>> {
        match (self.start(), self.end()) {
            (None, None) => Ok(0..len),
            (Some(start), None) if start <= len => Ok(start..len),
            (None, Some(end)) if end <= len => Ok(0..end),
            (Some(start), Some(end)) if start <= end && end <= len => Ok(start..end),
            _ => Err(PdfError::ContentReadPastBoundary),
        }
    }
}

impl IndexRange for RangeFull {
    #[inline]
    fn start(&self) -> Option<usize> { None }
    #[inline]
    fn end(&self) -> Option<usize> { None }
}
impl IndexRange for RangeFrom<usize> {
    #[inline]
    fn start(&self) -> Option<usize> { Some(self.start) }
    #[inline]
    fn end(&self) -> Option<usize> { None }
}
impl IndexRange for RangeTo<usize> {
    #[inline]
    fn start(&self) -> Option<usize> { None }
    #[inline]
    fn end(&self) -> Option<usize> { Some(self.end) }
}
impl IndexRange for Range<usize> {
    #[inline]
    fn start(&self) -> Option<usize> { Some(self.start) }
    #[inline]
    fn end(&self) -> Option<usize> { Some(self.end) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_version() {
        let data = b"junk\n%PDF-1.6\nrest".to_vec();
        let start = data.locate_start_offset().unwrap();
        assert_eq!(start, 5);
        assert_eq!(data.read_version(start).unwrap(), "1.6");
    }

    #[test]
    fn missing_header() {
        let data = b"not a pdf at all".to_vec();
        assert!(data.locate_start_offset().is_err());
    }

    #[test]
    fn startxref_location() {
        let data = b"%PDF-1.4\nstuff\nstartxref\n912\n%%EOF".to_vec();
        assert_eq!(data.locate_xref_offset().unwrap(), 912);
    }

    #[test]
    fn empty_input_reports_an_error() {
        let data = Vec::new();
        assert!(data.locate_start_offset().is_err());
        assert!(data.locate_xref_offset().is_err());
    }
}
