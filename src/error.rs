use crate::object::ObjNr;
use snafu::Snafu;
use std::error::Error;
use std::io;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PdfError {
    // Lexical
    #[snafu(display("Unexpected end of file"))]
    EOF,

    #[snafu(display("Unexpected token '{}' at {} - expected '{}'", lexeme, pos, expected))]
    UnexpectedLexeme { pos: usize, lexeme: String, expected: &'static str },

    #[snafu(display("Hex decode error. Position {}, bytes {:?}", pos, bytes))]
    HexDecode { pos: usize, bytes: [u8; 2] },

    #[snafu(display("Ascii85 tail error"))]
    Ascii85TailError,

    #[snafu(display("Invalid end-of-line marker after 'stream' keyword"))]
    StreamEol,

    // Syntax
    #[snafu(display("Expecting an object, encountered {} at pos {}. Context:\n{}", first_lexeme, pos, ctx))]
    UnknownType { pos: usize, first_lexeme: String, ctx: String },

    #[snafu(display("Primitive not allowed here: expected one of {:?}, found {:?}", allowed, found))]
    PrimitiveNotAllowed { allowed: crate::parser::ParseFlags, found: crate::parser::ParseFlags },

    #[snafu(display("Maximum recursion depth reached while parsing"))]
    MaxDepth,

    #[snafu(display("Field /{} is missing in dictionary for type {}.", field, typ))]
    MissingEntry { typ: &'static str, field: String },

    #[snafu(display("Expected to find value {} for key {}. Found {} instead.", value, key, found))]
    KeyValueMismatch { key: String, value: String, found: String },

    #[snafu(display("Expected primitive {}, found {} instead.", expected, found))]
    UnexpectedPrimitive { expected: &'static str, found: &'static str },

    #[snafu(display("Erroneous 'type' field in xref stream - expected 0, 1 or 2, found {}", found))]
    XRefStreamType { found: u64 },

    #[snafu(display("Object stream index out of bounds ({}/{}).", index, max))]
    ObjStmOutOfBounds { index: usize, max: usize },

    #[snafu(display("Parsing read past the end of the buffer."))]
    ContentReadPastBoundary,

    // Filters
    #[snafu(display("Filter '{}' is not supported.", name))]
    UnsupportedFilter { name: String },

    #[snafu(display("Failed to convert '{}' into a predictor row filter", n))]
    IncorrectPredictorType { n: u8 },

    #[snafu(display("Streams stored in an external file are not supported."))]
    ExternalStream,

    // Encryption
    #[snafu(display("Unsupported encryption: {}", msg))]
    UnsupportedEncryption { msg: String },

    #[snafu(display("Invalid password"))]
    InvalidPassword,

    #[snafu(display("Decryption failure"))]
    DecryptionFailure,

    // Lookup
    #[snafu(display("'{}' not found.", word))]
    NotFound { word: String },

    #[snafu(display("Tried to dereference free object nr {}.", obj_nr))]
    FreeObject { obj_nr: ObjNr },

    #[snafu(display("Tried to dereference non-existing object nr {}.", obj_nr))]
    NullRef { obj_nr: ObjNr },

    #[snafu(display("Cannot follow reference during parsing - no resolver available (most likely /Length of a stream)."))]
    Reference,

    // Misc
    #[snafu(display("Error parsing from string: {}", source))]
    Parse { source: Box<dyn Error + Send + Sync> },

    #[snafu(display("Invalid UTF-8: {}", source))]
    Utf8 { source: Box<dyn Error + Send + Sync> },

    #[snafu(display("Invalid file structure"))]
    Invalid,

    #[snafu(display("IO Error"))]
    Io { source: io::Error },

    #[snafu(display("{}", msg))]
    Other { msg: String },

    #[snafu(display("NoneError at {}:{}:{}", file, line, column))]
    NoneError { file: &'static str, line: u32, column: u32 },
}

impl PdfError {
    pub fn is_eof(&self) -> bool {
        matches!(self, PdfError::EOF)
    }
}

pub type Result<T, E = PdfError> = std::result::Result<T, E>;

impl From<io::Error> for PdfError {
    fn from(source: io::Error) -> PdfError {
        PdfError::Io { source }
    }
}
impl From<String> for PdfError {
    fn from(msg: String) -> PdfError {
        PdfError::Other { msg }
    }
}

macro_rules! err_from {
    ($($st:ty),* => $variant:ident) => (
        $(
            impl From<$st> for PdfError {
                fn from(e: $st) -> PdfError {
                    PdfError::$variant { source: e.into() }
                }
            }
        )*
    )
}
err_from!(std::str::Utf8Error, std::string::FromUtf8Error => Utf8);
err_from!(std::num::ParseIntError, std::num::ParseFloatError => Parse);

#[macro_export]
macro_rules! try_opt {
    ($e:expr) => (
        match $e {
            Some(v) => v,
            None => return Err($crate::PdfError::NoneError {
                file: file!(),
                line: line!(),
                column: column!()
            })
        }
    )
}

macro_rules! t {
    ($e:expr $(,$c:expr)*) => (
        match $e {
            Ok(v) => v,
            Err(e) => {
                log::debug!("{} failed at {}:{}", stringify!($e), file!(), line!());
                $(log::debug!("  {} = {:?}", stringify!($c), $c);)*
                return Err(e.into());
            }
        }
    )
}

macro_rules! err {
    ($e: expr) => ({
        return Err($e);
    })
}
macro_rules! bail {
    ($($t:tt)*) => {
        err!($crate::PdfError::Other { msg: format!($($t)*) })
    }
}
