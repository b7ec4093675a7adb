//! Format module - Converts between bytes and flattened graph items
//!
//! Three independent codecs share the `(Id, Value)` item representation:
//! - [`channel`]: the flat record stream carried on the update channel
//! - [`asset`]: the nested snapshot format shipped with the companion app
//! - [`literal`]: native nested literals (seed data, JSON export)

pub mod asset;
pub mod channel;
pub mod literal;
pub mod vocabulary;

pub use literal::Literal;

use bytes::Buf;
use thiserror::Error;

/// Decoding and encoding errors
#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("Unexpected end of data: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("Unknown type tag {0}")]
    UnknownType(u8),

    #[error("Unknown primitive type tag {0}")]
    UnknownPrimitive(u8),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Unterminated string")]
    UnterminatedString,

    #[error("Array index {index} out of range (count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("Array slot {0} was never filled")]
    MissingIndex(usize),

    #[error("Value {value} of item {id:#x} cannot be encoded")]
    Unrepresentable { id: u32, value: String },

    #[error("Container of item {id:#x} has {count} entries (max {max})")]
    TooManyEntries { id: u32, count: usize, max: usize },

    #[error("Null is not a valid literal")]
    NullLiteral,
}

pub type FormatResult<T> = Result<T, FormatError>;

/// Fail unless `buf` still holds `needed` bytes
pub(crate) fn ensure(buf: &[u8], needed: usize) -> FormatResult<()> {
    if buf.len() < needed {
        return Err(FormatError::UnexpectedEof {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u8(buf: &mut &[u8]) -> FormatResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn read_u16(buf: &mut &[u8]) -> FormatResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub(crate) fn read_u32(buf: &mut &[u8]) -> FormatResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub(crate) fn read_bytes(buf: &mut &[u8], len: usize) -> FormatResult<Vec<u8>> {
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    let bytes = head.to_vec();
    *buf = tail;
    Ok(bytes)
}

pub(crate) fn utf8(bytes: Vec<u8>) -> FormatResult<String> {
    String::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8)
}
