//! Parsing lexemes into PDF values.

mod lexer;
mod parse_object;
mod parse_xref;

pub use self::lexer::*;
pub use self::parse_object::*;
pub use self::parse_xref::*;

use crate::crypt::Decoder;
use crate::enc::decode_nibble;
use crate::error::*;
use crate::object::{GenNr, ObjNr, PlainRef, Resolve};
use crate::primitive::{Dictionary, Name, PdfStream, PdfString, Primitive, StreamInner, StringFormat};
use bitflags::bitflags;

pub(crate) const MAX_DEPTH: usize = 20;

bitflags! {
    /// Which kinds of value are admissible at the current parse position.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParseFlags: u16 {
        const INTEGER = 1 << 0;
        const STREAM = 1 << 1;
        const DICT = 1 << 2;
        const NUMBER = 1 << 3;
        const NAME = 1 << 4;
        const ARRAY = 1 << 5;
        const STRING = 1 << 6;
        const BOOL = 1 << 7;
        const NULL = 1 << 8;
        const REF = 1 << 9;
        const ANY = (1 << 10) - 1;
    }
}

/// The identity of the indirect object being materialized, plus the
/// decoder if the document is encrypted. Strings are decrypted with a key
/// derived from this identity as they are parsed.
pub struct Context<'a> {
    pub decoder: Option<&'a Decoder>,
    pub id: PlainRef,
}

impl<'a> Context<'a> {
    pub fn decrypt_string(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self.decoder {
            Some(decoder) => decoder.decrypt_string(self.id, data),
            None => Ok(data),
        }
    }
}

#[inline]
fn check(flags: ParseFlags, allowed: ParseFlags) -> Result<()> {
    if !flags.intersects(allowed) {
        return Err(PdfError::PrimitiveNotAllowed { allowed, found: flags });
    }
    Ok(())
}

/// Parse one value from `data`. Streams only work when their dictionary
/// holds a direct `/Length`; use [`parse_stream`] otherwise.
pub fn parse(data: &[u8], r: &impl Resolve, flags: ParseFlags) -> Result<Primitive> {
    parse_with_lexer(&mut Lexer::new(data), r, flags)
}

pub fn parse_with_lexer(lexer: &mut Lexer, r: &impl Resolve, flags: ParseFlags) -> Result<Primitive> {
    parse_with_lexer_ctx(lexer, r, None, flags, MAX_DEPTH)
}

/// Recursive entry point. On failure the lexer is restored to where it
/// was, so an enclosing parse can report or recover cleanly.
pub fn parse_with_lexer_ctx(
    lexer: &mut Lexer,
    r: &impl Resolve,
    ctx: Option<&Context>,
    flags: ParseFlags,
    max_depth: usize,
) -> Result<Primitive> {
    let pos = lexer.get_pos();
    match parse_value(lexer, r, ctx, flags, max_depth) {
        Ok(p) => Ok(p),
        Err(e) => {
            lexer.set_pos(pos);
            Err(e)
        }
    }
}

fn parse_dictionary_object(
    lexer: &mut Lexer,
    r: &impl Resolve,
    ctx: Option<&Context>,
    max_depth: usize,
) -> Result<Dictionary> {
    let mut dict = Dictionary::new();
    loop {
        // Expect a key (name) or the closing '>>'.
        let token = t!(lexer.next());
        if token.starts_with(b"/") {
            let key = parse_name_lexeme(&token)?;
            let value = t!(parse_with_lexer_ctx(lexer, r, ctx, ParseFlags::ANY, max_depth));
            dict.insert(key, value);
        } else if token.equals(b">>") {
            break;
        } else {
            err!(PdfError::UnexpectedLexeme {
                pos: lexer.file_pos(),
                lexeme: token.to_string(),
                expected: "/ or >>",
            });
        }
    }
    Ok(dict)
}

fn parse_stream_object(
    dict: Dictionary,
    lexer: &mut Lexer,
    r: &impl Resolve,
    ctx: &Context,
) -> Result<PdfStream> {
    if dict.get("F").is_some() {
        err!(PdfError::ExternalStream);
    }

    let length = match dict.get("Length") {
        Some(&Primitive::Integer(n)) if n >= 0 => n as usize,
        Some(&Primitive::Reference(reference)) => t!(t!(r.resolve(reference)).as_usize()),
        Some(other) => err!(PdfError::UnexpectedPrimitive {
            expected: "unsigned Integer or Reference",
            found: other.get_debug_name(),
        }),
        None => err!(PdfError::MissingEntry { typ: "<Stream>", field: "Length".into() }),
    };

    t!(lexer.next_stream());
    let body = lexer.read_n(length);
    if body.len() != length {
        err!(PdfError::EOF);
    }
    t!(lexer.next_expect("endstream"));

    Ok(PdfStream {
        info: dict,
        inner: StreamInner::InFile {
            id: ctx.id,
            file_range: body.file_range(),
        },
    })
}

/// Decode the `#xx` escapes of a name lexeme (with its leading slash).
fn parse_name_lexeme(token: &Substr) -> Result<Name> {
    let mut rest = &token.as_slice()[1..];
    if !rest.contains(&b'#') {
        return std::str::from_utf8(rest).map(Into::into).map_err(Into::into);
    }
    let mut out = Vec::with_capacity(rest.len());
    while let Some(idx) = rest.iter().position(|&b| b == b'#') {
        let hex: [u8; 2] = rest
            .get(idx + 1..idx + 3)
            .ok_or(PdfError::EOF)?
            .try_into()
            .unwrap();
        let byte = match (decode_nibble(hex[0]), decode_nibble(hex[1])) {
            (Some(high), Some(low)) => high << 4 | low,
            _ => return Err(PdfError::HexDecode { pos: idx, bytes: hex }),
        };
        out.extend_from_slice(&rest[..idx]);
        out.push(byte);
        rest = &rest[idx + 3..];
    }
    out.extend_from_slice(rest);
    Ok(String::from_utf8(out)?)
}

fn parse_value(
    lexer: &mut Lexer,
    r: &impl Resolve,
    ctx: Option<&Context>,
    flags: ParseFlags,
    max_depth: usize,
) -> Result<Primitive> {
    let first_lexeme = t!(lexer.next());

    let obj = if first_lexeme.equals(b"<<") {
        check(flags, ParseFlags::DICT | ParseFlags::STREAM)?;
        if max_depth == 0 {
            return Err(PdfError::MaxDepth);
        }
        let dict = t!(parse_dictionary_object(lexer, r, ctx, max_depth - 1));
        // It might be the dictionary in front of a stream.
        if t!(lexer.peek()).equals(b"stream") {
            check(flags, ParseFlags::STREAM)?;
            let ctx = ctx.ok_or(PdfError::PrimitiveNotAllowed {
                allowed: ParseFlags::STREAM,
                found: flags,
            })?;
            Primitive::Stream(t!(parse_stream_object(dict, lexer, r, ctx)))
        } else {
            check(flags, ParseFlags::DICT)?;
            Primitive::Dictionary(dict)
        }
    } else if first_lexeme.is_integer() {
        check(flags, ParseFlags::INTEGER | ParseFlags::REF)?;
        // Either a plain integer or the start of `nr gen R`. Two more
        // lexemes decide; the lexer is rolled back if they don't fit.
        let pos_bk = lexer.get_pos();
        let mut reference = None;
        if let Ok(second_lexeme) = lexer.next() {
            if second_lexeme.is_integer() {
                if let Ok(third_lexeme) = lexer.next() {
                    if third_lexeme.equals(b"R") {
                        reference = Some(PlainRef {
                            id: t!(first_lexeme.to::<ObjNr>()),
                            gen: t!(second_lexeme.to::<GenNr>()),
                        });
                    }
                }
            }
        }
        match reference {
            Some(plain_ref) => {
                // The lookahead already consumed `nr gen R`.
                check(flags, ParseFlags::REF)?;
                Primitive::Reference(plain_ref)
            }
            None => {
                check(flags, ParseFlags::INTEGER)?;
                lexer.set_pos(pos_bk);
                Primitive::Integer(t!(first_lexeme.to::<i32>()))
            }
        }
    } else if first_lexeme.is_real_number() {
        check(flags, ParseFlags::NUMBER)?;
        Primitive::Number(t!(first_lexeme.to::<f32>()))
    } else if first_lexeme.starts_with(b"/") {
        check(flags, ParseFlags::NAME)?;
        Primitive::Name(t!(parse_name_lexeme(&first_lexeme)))
    } else if first_lexeme.equals(b"[") {
        check(flags, ParseFlags::ARRAY)?;
        if max_depth == 0 {
            return Err(PdfError::MaxDepth);
        }
        let mut array = Vec::new();
        loop {
            if lexer.peek()?.equals(b"]") {
                break;
            }
            let element = t!(parse_with_lexer_ctx(lexer, r, ctx, ParseFlags::ANY, max_depth - 1));
            array.push(element);
        }
        t!(lexer.next()); // move past the closing delimiter
        Primitive::Array(array)
    } else if first_lexeme.equals(b"(") {
        check(flags, ParseFlags::STRING)?;
        let mut data = Vec::new();
        let bytes_traversed = {
            let mut string_lexer = StringLexer::new(lexer.get_remaining_slice());
            for byte in string_lexer.iter() {
                data.push(t!(byte));
            }
            string_lexer.get_offset()
        };
        lexer.offset_pos(bytes_traversed);
        if let Some(ctx) = ctx {
            data = t!(ctx.decrypt_string(data));
        }
        Primitive::String(PdfString::with_format(data, StringFormat::Literal))
    } else if first_lexeme.equals(b"<") {
        check(flags, ParseFlags::STRING)?;
        let mut data = Vec::new();
        let bytes_traversed = {
            let mut hex_lexer = HexStringLexer::new(lexer.get_remaining_slice());
            for byte in hex_lexer.iter() {
                data.push(t!(byte));
            }
            hex_lexer.get_offset()
        };
        lexer.offset_pos(bytes_traversed);
        if let Some(ctx) = ctx {
            data = t!(ctx.decrypt_string(data));
        }
        Primitive::String(PdfString::with_format(data, StringFormat::Hex))
    } else if first_lexeme.equals(b"true") {
        check(flags, ParseFlags::BOOL)?;
        Primitive::Boolean(true)
    } else if first_lexeme.equals(b"false") {
        check(flags, ParseFlags::BOOL)?;
        Primitive::Boolean(false)
    } else if first_lexeme.equals(b"null") {
        check(flags, ParseFlags::NULL)?;
        Primitive::Null
    } else {
        err!(PdfError::UnknownType {
            pos: lexer.file_pos(),
            first_lexeme: first_lexeme.to_string(),
            ctx: lexer.ctx().into(),
        });
    };

    Ok(obj)
}

pub fn parse_stream(data: &[u8], resolve: &impl Resolve, ctx: &Context) -> Result<PdfStream> {
    parse_stream_with_lexer(&mut Lexer::new(data), resolve, ctx)
}

pub fn parse_stream_with_lexer(lexer: &mut Lexer, r: &impl Resolve, ctx: &Context) -> Result<PdfStream> {
    let first_lexeme = t!(lexer.next());
    if !first_lexeme.equals(b"<<") {
        err!(PdfError::UnexpectedPrimitive {
            expected: "Stream",
            found: "something else",
        });
    }
    let dict = t!(parse_dictionary_object(lexer, r, None, MAX_DEPTH));
    if !t!(lexer.peek()).equals(b"stream") {
        err!(PdfError::UnexpectedPrimitive {
            expected: "Stream",
            found: "Dictionary",
        });
    }
    parse_stream_object(dict, lexer, r, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NoResolve;

    fn fake_ctx() -> Context<'static> {
        Context {
            decoder: None,
            id: PlainRef { id: 0, gen: 0 },
        }
    }

    #[test]
    fn dict_with_empty_name_as_value() {
        let data = b"<</App<</Name/>>>>";
        let primitive = parse(data, &NoResolve, ParseFlags::DICT).unwrap();
        let dict = primitive.into_dictionary().unwrap();

        assert_eq!(dict.len(), 1);
        let app_dict = dict.get("App").unwrap().clone().into_dictionary().unwrap();
        assert_eq!(app_dict.len(), 1);
        assert_eq!(app_dict.get("Name").unwrap().as_name().unwrap(), "");
    }

    #[test]
    fn dict_with_empty_name_as_key() {
        let data = b"<</ true>>";
        let primitive = parse(data, &NoResolve, ParseFlags::DICT).unwrap();
        let dict = primitive.into_dictionary().unwrap();

        assert_eq!(dict.len(), 1);
        assert!(dict.get("").unwrap().as_bool().unwrap());
    }

    #[test]
    fn name_hex_escape() {
        let primitive = parse(b"/A#42", &NoResolve, ParseFlags::NAME).unwrap();
        assert_eq!(primitive.as_name().unwrap(), "AB");
    }

    #[test]
    fn empty_array() {
        let primitive = parse(b"[]", &NoResolve, ParseFlags::ARRAY).unwrap();
        assert!(primitive.into_array().unwrap().is_empty());
    }

    #[test]
    fn array_of_numbers_is_not_a_reference() {
        let primitive = parse(b"[1 2 3]", &NoResolve, ParseFlags::ARRAY).unwrap();
        let array = primitive.into_array().unwrap();
        assert_eq!(
            array,
            vec![Primitive::Integer(1), Primitive::Integer(2), Primitive::Integer(3)]
        );
    }

    #[test]
    fn reference_lookahead() {
        let mut lexer = Lexer::new(b"7 0 R 42");
        let first = parse_with_lexer(&mut lexer, &NoResolve, ParseFlags::ANY).unwrap();
        assert_eq!(first, Primitive::Reference(PlainRef { id: 7, gen: 0 }));
        let second = parse_with_lexer(&mut lexer, &NoResolve, ParseFlags::ANY).unwrap();
        assert_eq!(second, Primitive::Integer(42));
    }

    #[test]
    fn compact_array_with_strings() {
        let mut lexer = Lexer::new(b"[(Complete L)20(egend for Physical and P)20(olitical Maps)]TJ");
        let primitive = parse_with_lexer(&mut lexer, &NoResolve, ParseFlags::ANY).unwrap();
        let array = primitive.into_array().unwrap();
        assert_eq!(array.len(), 5);
        assert_eq!(array[0].as_string().unwrap().as_bytes(), b"Complete L");
        assert_eq!(array[1], Primitive::Integer(20));
        assert_eq!(lexer.next().unwrap(), "TJ");
        assert!(lexer.next().unwrap_err().is_eof());
    }

    #[test]
    fn stream_with_direct_length() {
        let data = b"<</Length 5>>\nstream\nHELLO\nendstream\n";
        let stream = parse_stream(data, &NoResolve, &fake_ctx()).unwrap();
        assert_eq!(stream.info.get("Length").unwrap().as_integer().unwrap(), 5);
        // the body is recorded, not copied
        let range = stream.file_range();
        assert_eq!(&data[range], b"HELLO");
    }

    #[test]
    fn parse_error_restores_position() {
        let mut lexer = Lexer::new(b"endobj 5");
        let pos = lexer.get_pos();
        assert!(parse_with_lexer(&mut lexer, &NoResolve, ParseFlags::ANY).is_err());
        assert_eq!(lexer.get_pos(), pos);
        lexer.next().unwrap();
        assert_eq!(
            parse_with_lexer(&mut lexer, &NoResolve, ParseFlags::ANY).unwrap(),
            Primitive::Integer(5)
        );
    }
}
