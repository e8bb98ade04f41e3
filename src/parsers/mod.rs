pub mod blend;
pub mod dna;
pub mod field;
pub mod primitive;

use nom::{
    error::{ErrorKind, ParseError},
    IResult,
};
use std::io;
use thiserror::Error;

pub(crate) type Result<'a, T> = IResult<&'a [u8], T, BlendParseError>;

/// Size of a pointer on the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerSize {
    Bits32,
    Bits64,
}

impl PointerSize {
    /// Returns the pointer size in bytes.
    pub fn bytes_num(self) -> usize {
        match self {
            PointerSize::Bits32 => 4,
            PointerSize::Bits64 => 8,
        }
    }
}

/// Endianness of the machine used to create the .blend file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Errors that can happen during the initial parsing of the .blend file.
/// Most errors are simply `NomError` but a few of them are specific either
/// for better error reporting or due to custom logic.
#[derive(Debug, Error)]
pub enum BlendParseError {
    #[error("malformed .blend data ({kind:?})")]
    NomError {
        kind: ErrorKind,
        other: Option<Box<BlendParseError>>,
    },
    #[error("could not read .blend data: {0}")]
    IoError(#[from] io::Error),
    /// Returned when the file is incomplete.
    #[error("the .blend data ended unexpectedly")]
    NotEnoughData,
    /// The known block codes are `b"REND"`, `b"TEST"`, `b"GLOB"`, `b"DATA"`, `b"DNA1"` and any
    /// two-letter code like `b"OB\0\0"` for objects.
    #[error("unknown block code {0:?}")]
    UnknownBlockCode([u8; 4]),
    /// Principal blocks are assumed to never be lists.
    #[error("principal block {0:?} holds more than one struct")]
    UnsupportedCountOnPrincipalBlock([u8; 2]),
    /// A block with the memory address `0` would be indistinguishable from a null pointer.
    #[error("block has a null memory address")]
    InvalidMemoryAddress,
    /// A struct in the DNA refers to a type or field name that doesn't exist.
    #[error("corrupt DNA: {0}")]
    InvalidDna(String),
    /// Returned when the DNA block is not found at the end of the blend file.
    #[error("no DNA1 block found")]
    NoDnaBlockFound,
    /// Gzip files are inflated before parsing, anything else that doesn't start with `b"BLENDER"`
    /// (zstd for example) ends up here.
    #[error("compressed .blend files are only supported when gzipped")]
    CompressedFileNotSupported,
    /// The header announced a layout this crate doesn't know.
    #[error("unsupported .blend header: {0}")]
    UnsupportedHeader(String),
}

impl ParseError<&[u8]> for BlendParseError {
    fn from_error_kind(_input: &[u8], kind: ErrorKind) -> Self {
        BlendParseError::NomError { kind, other: None }
    }

    fn append(_input: &[u8], kind: ErrorKind, other: Self) -> Self {
        BlendParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}
