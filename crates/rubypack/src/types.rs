//! Core types for the marshal wire format.

use std::fmt;

/// Tag bytes of the Marshal 4.8 alphabet this decoder understands.
///
/// Everything outside this set (bignums, regexps, user-defined classes,
/// class/module references) is rejected as unknown.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Nil = b'0',
    True = b'T',
    False = b'F',
    Fixnum = b'i',
    Float = b'f',
    /// Symbol definition: interns into the symbol table.
    Symbol = b':',
    /// Symbol back-reference: index into the symbol table.
    SymbolRef = b';',
    /// Instance-variable decoration; only `I"` (decorated string) is supported.
    Ivar = b'I',
    RawString = b'"',
    Array = b'[',
    Hash = b'{',
    /// Object back-reference: index into the object table.
    Link = b'@',
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if unsupported.
    pub(crate) const fn from_u8(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(Tag::Nil),
            b'T' => Some(Tag::True),
            b'F' => Some(Tag::False),
            b'i' => Some(Tag::Fixnum),
            b'f' => Some(Tag::Float),
            b':' => Some(Tag::Symbol),
            b';' => Some(Tag::SymbolRef),
            b'I' => Some(Tag::Ivar),
            b'"' => Some(Tag::RawString),
            b'[' => Some(Tag::Array),
            b'{' => Some(Tag::Hash),
            b'@' => Some(Tag::Link),
            _ => None,
        }
    }
}

/// What a decoded value is, as exposed to callers.
///
/// Symbols, raw strings, and ivar-decorated strings all surface as
/// `String`; arrays and hashes surface as `Array` and `Map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Unknown,
    Nil,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Map,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Marshal decoding errors.
///
/// Errors are returned, never panicked; a node that hit an error is
/// unchanged and can be retried or abandoned.
#[derive(Debug, Clone)]
pub enum Error {
    /// An accessor was invoked against a value of a different kind.
    TypeMismatch { expected: Kind, found: Kind },
    /// The buffer ended mid-value, or a `;`/`@` index addressed past the
    /// current table length.
    Incomplete,
    /// A float literal failed to parse as a decimal number.
    BadFloat(std::num::ParseFloatError),
    /// A tag byte outside the supported alphabet (bignum, user object, ...).
    UnknownTag(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::Incomplete => write!(f, "unexpected end of input"),
            Error::BadFloat(e) => write!(f, "malformed float literal: {}", e),
            Error::UnknownTag(b) => write!(f, "unsupported tag byte: {:#04x}", b),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::num::ParseFloatError> for Error {
    fn from(e: std::num::ParseFloatError) -> Self {
        Error::BadFloat(e)
    }
}

/// Specialized `Result` for marshal decoding.
pub type Result<T> = std::result::Result<T, Error>;
