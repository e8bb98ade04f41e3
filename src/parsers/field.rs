//! Parser for the field declarations stored in the SDNA, e.g. `*next`, `co[3]`, `obmat[4][4]` or
//! `(*func)()`. The declaration holds both the field name and its shape.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until},
    combinator::complete,
    error::{ErrorKind, ParseError},
    multi::{many0, many1},
    sequence::delimited,
    Err, IResult,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldParseError {
    #[error("malformed field declaration ({kind:?})")]
    NomError {
        kind: ErrorKind,
        other: Option<Box<FieldParseError>>,
    },
    #[error("invalid array size")]
    InvalidArraySize,
}

impl ParseError<&str> for FieldParseError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        FieldParseError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        FieldParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

type Result<'a, T> = IResult<&'a str, T, FieldParseError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInfo {
    Value,
    ValueArray {
        len: usize,
        dimensions: Vec<usize>,
    },
    Pointer {
        indirection_count: usize,
    },
    PointerArray {
        indirection_count: usize,
        len: usize,
        dimensions: Vec<usize>,
    },
    FnPointer,
}

fn fn_pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = delimited(tag("(*"), take_until(")"), tag(")"))(input)?;
    let (input, _) = delimited(tag("("), take_until(")"), tag(")"))(input)?;

    Ok((input, (name, FieldInfo::FnPointer)))
}

fn array_dimensions(input: &str) -> Result<Vec<usize>> {
    let (input, dimensions) =
        many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let dimensions = dimensions
        .into_iter()
        .map(|d| d.parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Err::Failure(FieldParseError::InvalidArraySize))?;

    Ok((input, dimensions))
}

fn pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, asterisks) = many1(tag("*"))(input)?;
    let (input, name) = take_till(|c| c == '[')(input)?;
    let indirection_count = asterisks.len();

    if input.is_empty() {
        return Ok((input, (name, FieldInfo::Pointer { indirection_count })));
    }

    let (input, dimensions) = array_dimensions(input)?;
    Ok((
        input,
        (
            name,
            FieldInfo::PointerArray {
                indirection_count,
                len: dimensions.iter().product(),
                dimensions,
            },
        ),
    ))
}

fn value(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = take_till(|c| c == '[')(input)?;

    if input.is_empty() {
        return Ok((input, (name, FieldInfo::Value)));
    }

    let (input, dimensions) = array_dimensions(input)?;
    Ok((
        input,
        (
            name,
            FieldInfo::ValueArray {
                len: dimensions.iter().product(),
                dimensions,
            },
        ),
    ))
}

pub fn parse_field(input: &str) -> Result<(&str, FieldInfo)> {
    alt((fn_pointer, pointer, value))(input)
}
