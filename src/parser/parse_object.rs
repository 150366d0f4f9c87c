//! Parsing `nr gen obj … endobj` wrappers.

use crate::crypt::Decoder;
use crate::error::*;
use crate::object::{GenNr, ObjNr, PlainRef, Resolve};
use crate::parser::lexer::*;
use crate::parser::{parse_stream_with_lexer, parse_with_lexer_ctx, Context, ParseFlags, MAX_DEPTH};
use crate::primitive::{PdfStream, Primitive};

/// Parses the indirect object starting at the lexer position. The object's
/// own identity keys the decryption of any strings inside it.
pub fn parse_indirect_object(
    lexer: &mut Lexer,
    r: &impl Resolve,
    decoder: Option<&Decoder>,
) -> Result<(PlainRef, Primitive)> {
    let obj_nr = t!(t!(lexer.next()).to::<ObjNr>());
    let gen_nr = t!(t!(lexer.next()).to::<GenNr>());
    t!(lexer.next_expect("obj"));

    let id = PlainRef { id: obj_nr, gen: gen_nr };
    let ctx = Context { decoder, id };
    let obj = t!(parse_with_lexer_ctx(lexer, r, Some(&ctx), ParseFlags::ANY, MAX_DEPTH));

    t!(lexer.next_expect("endobj"));

    Ok((id, obj))
}

/// Like [`parse_indirect_object`], but insists on a stream body.
pub fn parse_indirect_stream(
    lexer: &mut Lexer,
    r: &impl Resolve,
    decoder: Option<&Decoder>,
) -> Result<(PlainRef, PdfStream)> {
    let obj_nr = t!(t!(lexer.next()).to::<ObjNr>());
    let gen_nr = t!(t!(lexer.next()).to::<GenNr>());
    t!(lexer.next_expect("obj"));

    let id = PlainRef { id: obj_nr, gen: gen_nr };
    let ctx = Context { decoder, id };
    let stream = t!(parse_stream_with_lexer(lexer, r, &ctx), obj_nr, gen_nr);

    t!(lexer.next_expect("endobj"));

    Ok((id, stream))
}
