//! Content streams, tokenized into operators and their operands. The
//! operators themselves are not interpreted.

use itertools::Itertools;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::mem::take;

use crate::error::*;
use crate::object::{Object, Resolve};
use crate::parser::{parse_with_lexer, Lexer, ParseFlags};
use crate::primitive::{PdfStream, Primitive};

/// One operation: the operator lexeme and the operands preceding it.
#[derive(Debug, Clone)]
pub struct Operation {
    pub operator: String,
    pub operands: Vec<Primitive>,
}

impl Operation {
    pub fn new(operator: impl Into<String>, operands: Vec<Primitive>) -> Operation {
        Operation { operator: operator.into(), operands }
    }
}

/// A tokenized content stream.
#[derive(Debug)]
pub struct Content {
    pub operations: Vec<Operation>,
}

impl Content {
    /// Anything that parses as a value is an operand; anything that does
    /// not is an operator that closes the current operation.
    pub fn parse_from(data: &[u8], resolve: &impl Resolve) -> Result<Content> {
        let mut lexer = Lexer::new(data);
        let mut operations = Vec::new();
        let mut operands = Vec::new();

        loop {
            let backup_pos = lexer.get_pos();
            match parse_with_lexer(&mut lexer, resolve, ParseFlags::ANY) {
                Ok(operand) => operands.push(operand),
                Err(e) if e.is_eof() => break,
                Err(_) => {
                    lexer.set_pos(backup_pos);
                    let operator = t!(lexer.next()).to_string();
                    operations.push(Operation::new(operator, take(&mut operands)));
                }
            }
            match lexer.get_pos().cmp(&data.len()) {
                Ordering::Greater => err!(PdfError::ContentReadPastBoundary),
                Ordering::Less => (),
                Ordering::Equal => break,
            }
        }
        Ok(Content { operations })
    }
}

impl Object for Content {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self> {
        match p {
            // a page may split its content across several streams
            Primitive::Array(parts) => {
                let mut data = Vec::new();
                for part in parts {
                    let stream = t!(PdfStream::from_primitive(part, resolve));
                    data.extend(t!(resolve.stream_data(&stream)));
                    data.push(b'\n');
                }
                Content::parse_from(&data, resolve)
            }
            p => {
                let stream = t!(PdfStream::from_primitive(p, resolve));
                Content::parse_from(&t!(resolve.stream_data(&stream)), resolve)
            }
        }
    }
}

impl Display for Content {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for operation in &self.operations {
            writeln!(f, "{}", operation)?;
        }
        Ok(())
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.operands.iter().format(" "), self.operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NoResolve;

    #[test]
    fn operators_collect_their_operands() {
        let data = b"BT /F0 12 Tf 72 720 Td (Hello) Tj ET";
        let content = Content::parse_from(data, &NoResolve).unwrap();
        let ops: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(ops, ["BT", "Tf", "Td", "Tj", "ET"]);
        assert_eq!(content.operations[1].operands.len(), 2);
        assert_eq!(
            content.operations[3].operands[0].as_string().unwrap().as_bytes(),
            b"Hello"
        );
    }

    #[test]
    fn trailing_operands_without_operator_are_dropped() {
        let content = Content::parse_from(b"1 2", &NoResolve).unwrap();
        assert!(content.operations.is_empty());
    }
}
