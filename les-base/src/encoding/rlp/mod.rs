// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! Recursive Length Prefix encoding.
//!
//! Encoding goes through [`RlpWrite`] (implemented for `Vec<u8>`), decoding
//! through [`RlpReader`], a cursor that checks every length against the bytes
//! actually available and rejects non-canonical headers.

mod reader;
mod traits;
mod writer;


pub use reader::*;
pub use traits::*;
pub use writer::*;

pub(crate) const STRING_SHORT: u8 = 0x80;
pub(crate) const STRING_LONG: u8 = 0xb7;
pub(crate) const LIST_SHORT: u8 = 0xc0;
pub(crate) const LIST_LONG: u8 = 0xf7;

/// Payloads up to this many bytes use the single-byte header form.
pub(crate) const SHORT_PAYLOAD_MAX: usize = 55;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("rlp: unexpected end of input (needed {needed} bytes, remaining {remaining})")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("rlp: expected a list")]
    ExpectedList,

    #[error("rlp: expected a string")]
    ExpectedString,

    #[error("rlp: non-canonical {0}")]
    NonCanonical(&'static str),

    #[error("rlp: integer of {len} bytes exceeds {max} bytes")]
    IntegerOverflow { len: usize, max: usize },

    #[error("rlp: invalid length {actual}, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("rlp: {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("rlp: invalid value for '{0}'")]
    InvalidValue(&'static str),
}
