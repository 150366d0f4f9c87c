//! Reading xref sections: classical tables and xref streams.

use crate::enc;
use crate::error::*;
use crate::object::{GenNr, NoResolve, Object, ObjNr, Resolve};
use crate::parser::lexer::Lexer;
use crate::parser::parse_object::parse_indirect_stream;
use crate::parser::{parse_with_lexer, ParseFlags};
use crate::primitive::{Dictionary, Primitive};
use crate::xref::{XRef, XRefInfo, XRefSection};

/// Big-endian field of `width` bytes, consumed from the front of `data`.
fn read_field(width: usize, data: &mut &[u8]) -> Result<u64> {
    if width > std::mem::size_of::<u64>() {
        bail!("xref stream entry has invalid width {}", width);
    }
    if width > data.len() {
        bail!("xref stream entry has width {} but only {} bytes left", width, data.len());
    }
    let mut value = 0;
    for &byte in &data[..width] {
        value = value << 8 | byte as u64;
    }
    *data = &data[width..];
    Ok(value)
}

fn parse_xref_section_from_stream(
    first_id: u32,
    num_entries: usize,
    widths: &[usize; 3],
    data: &mut &[u8],
) -> Result<XRefSection> {
    let mut section = XRefSection::new(first_id);
    for _ in 0..num_entries {
        // a zero-width type field defaults the record to "in use"
        let record_type = if widths[0] == 0 { 1 } else { read_field(widths[0], data)? };
        let field2 = read_field(widths[1], data)?;
        let field3 = if widths[2] == 0 { 0 } else { read_field(widths[2], data)? };

        let entry = match record_type {
            0 => XRef::Free {
                next_obj_nr: field2 as ObjNr,
                gen_nr: field3 as GenNr,
            },
            1 => XRef::Raw {
                pos: field2 as usize,
                gen_nr: field3 as GenNr,
            },
            2 => XRef::Stream {
                stream_id: field2 as ObjNr,
                index: field3 as usize,
            },
            found => err!(PdfError::XRefStreamType { found }),
        };
        section.entries.push(entry);
    }
    Ok(section)
}

/// Parses the xref stream at the lexer position and splits it into
/// sections. `file` is the whole byte source, used to fetch the stream
/// body; xref streams are never encrypted and all their dictionary entries
/// are direct, so no resolver is involved.
pub fn parse_xref_stream_and_trailer(
    lexer: &mut Lexer,
    file: &[u8],
) -> Result<(Vec<XRefSection>, Dictionary)> {
    const TRAILER_FIELDS: [&str; 6] = ["Size", "Root", "Info", "ID", "Encrypt", "Prev"];

    let (_, stream) = t!(parse_indirect_stream(lexer, &NoResolve, None));
    // The stream dictionary doubles as the trailer; only the trailer
    // fields proper are carried over.
    let mut trailer = Dictionary::new();
    for key in TRAILER_FIELDS {
        if let Some(value) = stream.info.get(key) {
            trailer.insert(key, value.clone());
        }
    }
    let info = t!(XRefInfo::from_primitive(Primitive::Dictionary(stream.info.clone()), &NoResolve));

    let range = stream.file_range();
    let raw = match file.get(range.clone()) {
        Some(raw) => raw.to_vec(),
        None => bail!("xref stream body {:?} outside file bounds", range),
    };
    let data = t!(enc::decode_all(&stream.info, raw, &NoResolve));

    let widths: [usize; 3] = info
        .w
        .as_slice()
        .try_into()
        .map_err(|_| PdfError::Other { msg: format!("invalid /W array {:?}", info.w) })?;
    if info.index.len() % 2 != 0 {
        bail!("xref stream /Index has {} elements, expected pairs", info.index.len());
    }

    let mut sections = Vec::new();
    let mut data_left = &*data;
    for chunk in info.index.chunks_exact(2) {
        let (first_id, count) = (chunk[0], chunk[1] as usize);
        let section = t!(parse_xref_section_from_stream(first_id, count, &widths, &mut data_left));
        sections.push(section);
    }

    Ok((sections, trailer))
}

/// Parses a classical xref table (the `xref` keyword has already been
/// consumed) and the `trailer` dictionary that follows it.
pub fn parse_xref_table_and_trailer(
    lexer: &mut Lexer,
    r: &impl Resolve,
) -> Result<(Vec<XRefSection>, Dictionary)> {
    let mut sections = Vec::new();

    while lexer.peek()? != "trailer" {
        let start_id = t!(lexer.next_as::<u32>());
        let num_ids = t!(lexer.next_as::<u32>());

        let mut section = XRefSection::new(start_id);
        for i in 0..num_ids {
            let w1 = t!(lexer.next());
            if w1 == "trailer" {
                bail!("xref table declares {} entries, but only {} follow.", num_ids, i);
            }
            let w2 = t!(lexer.next());
            let w3 = t!(lexer.next());
            if w3 == "f" {
                // the stored generation is the one a future reuse would
                // get; keep the previous one
                let next_gen = t!(w2.to::<GenNr>()).saturating_sub(1);
                section.add_free_entry(t!(w1.to::<ObjNr>()), next_gen);
            } else if w3 == "n" {
                section.add_inuse_entry(t!(w1.to::<usize>()), t!(w2.to::<GenNr>()));
            } else {
                err!(PdfError::UnexpectedLexeme {
                    pos: lexer.file_pos(),
                    lexeme: w3.to_string(),
                    expected: "f or n",
                });
            }
        }
        sections.push(section);
    }

    t!(lexer.next_expect("trailer"));
    let trailer = t!(parse_with_lexer(lexer, r, ParseFlags::DICT));
    Ok((sections, t!(trailer.into_dictionary())))
}

/// Reads whichever kind of xref section starts at the lexer position.
pub fn read_xref_and_trailer_at(
    lexer: &mut Lexer,
    file: &[u8],
) -> Result<(Vec<XRefSection>, Dictionary)> {
    let next_word = t!(lexer.next());
    if next_word == "xref" {
        parse_xref_table_and_trailer(lexer, &NoResolve)
    } else {
        t!(lexer.back());
        parse_xref_stream_and_trailer(lexer, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_fields() {
        let mut data: &[u8] = &[0x01, 0x02, 0x03, 0xff];
        assert_eq!(read_field(2, &mut data).unwrap(), 0x0102);
        assert_eq!(read_field(1, &mut data).unwrap(), 0x03);
        assert_eq!(read_field(1, &mut data).unwrap(), 0xff);
        assert!(read_field(1, &mut data).is_err());
    }

    #[test]
    fn classic_table() {
        let data = b"xref\n\
            0 7\n\
            0000000000 65535 f \n\
            0000000009 00000 n \n\
            0000000074 00000 n \n\
            0000000120 00000 n \n\
            0000000179 00000 n \n\
            0000000322 00000 n \n\
            0000000409 00000 n \n\
            trailer\n<</Size 7>>";
        let mut lexer = Lexer::new(data);
        lexer.next_expect("xref").unwrap();
        let (sections, trailer) = parse_xref_table_and_trailer(&mut lexer, &NoResolve).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].first_id, 0);
        assert_eq!(sections[0].entries.len(), 7);
        assert_eq!(sections[0].entries[1], XRef::Raw { pos: 9, gen_nr: 0 });
        assert_eq!(trailer.get("Size").unwrap().as_integer().unwrap(), 7);
    }

    #[test]
    fn stream_records_with_width_defaults() {
        // w = [0, 2, 0]: every record is "in use" with generation 0
        let mut data: &[u8] = &[0x00, 0x10, 0x02, 0x00];
        let widths = [0usize, 2, 0];
        let section = parse_xref_section_from_stream(3, 2, &widths, &mut data).unwrap();
        assert_eq!(section.first_id, 3);
        assert_eq!(section.entries[0], XRef::Raw { pos: 0x10, gen_nr: 0 });
        assert_eq!(section.entries[1], XRef::Raw { pos: 0x200, gen_nr: 0 });
    }

    #[test]
    fn stream_records_compressed() {
        let mut data: &[u8] = &[2, 0x00, 0x05, 0x03];
        let widths = [1usize, 2, 1];
        let section = parse_xref_section_from_stream(9, 1, &widths, &mut data).unwrap();
        assert_eq!(section.entries[0], XRef::Stream { stream_id: 5, index: 3 });
    }

    #[test]
    fn stream_record_bad_type() {
        let mut data: &[u8] = &[7, 0, 0];
        let widths = [1usize, 1, 1];
        let err = parse_xref_section_from_stream(0, 1, &widths, &mut data).unwrap_err();
        assert!(matches!(err, PdfError::XRefStreamType { found: 7 }));
    }
}
