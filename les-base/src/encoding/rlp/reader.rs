// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use super::{DecodeError, LIST_LONG, LIST_SHORT, SHORT_PAYLOAD_MAX, STRING_LONG, STRING_SHORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    String,
    List,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    kind: ItemKind,
    header_len: usize,
    payload_len: usize,
}

/// Cursor over an RLP encoded byte slice.
///
/// Reading a list yields a nested reader bounded to the list payload, so a
/// malformed length can never make a read run past its enclosing item.
#[derive(Debug, Clone)]
pub struct RlpReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> RlpReader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    #[inline]
    pub fn consumed(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.offset..]
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof { needed: len, remaining: self.remaining() });
        }

        let start = self.offset;
        self.offset += len;
        Ok(&self.buf[start..self.offset])
    }

    fn peek_header(&self) -> Result<Header, DecodeError> {
        let rest = self.rest();
        let Some(&prefix) = rest.first() else {
            return Err(DecodeError::UnexpectedEof { needed: 1, remaining: 0 });
        };

        let header = match prefix {
            0x00..=0x7f => Header { kind: ItemKind::String, header_len: 0, payload_len: 1 },
            STRING_SHORT..=STRING_LONG => {
                let payload_len = (prefix - STRING_SHORT) as usize;
                if payload_len == 1 && rest.get(1).is_some_and(|b| *b < STRING_SHORT) {
                    return Err(DecodeError::NonCanonical("single byte string"));
                }
                Header { kind: ItemKind::String, header_len: 1, payload_len }
            }
            0xb8..=0xbf => {
                let len_of_len = (prefix - STRING_LONG) as usize;
                let payload_len = read_long_length(rest, len_of_len)?;
                Header { kind: ItemKind::String, header_len: 1 + len_of_len, payload_len }
            }
            LIST_SHORT..=LIST_LONG => {
                Header { kind: ItemKind::List, header_len: 1, payload_len: (prefix - LIST_SHORT) as usize }
            }
            0xf8..=0xff => {
                let len_of_len = (prefix - LIST_LONG) as usize;
                let payload_len = read_long_length(rest, len_of_len)?;
                Header { kind: ItemKind::List, header_len: 1 + len_of_len, payload_len }
            }
        };

        let total = header.header_len.saturating_add(header.payload_len);
        if rest.len() < total {
            return Err(DecodeError::UnexpectedEof { needed: total, remaining: rest.len() });
        }
        Ok(header)
    }

    /// Kind of the next item without consuming it.
    #[inline]
    pub fn peek_kind(&self) -> Result<ItemKind, DecodeError> {
        self.peek_header().map(|h| h.kind)
    }

    #[inline]
    pub fn next_is_list(&self) -> bool {
        matches!(self.peek_kind(), Ok(ItemKind::List))
    }

    /// The next item, header included, as raw bytes.
    pub fn read_raw_item(&mut self) -> Result<&'a [u8], DecodeError> {
        let header = self.peek_header()?;
        self.take(header.header_len + header.payload_len)
    }

    #[inline]
    pub fn skip_item(&mut self) -> Result<(), DecodeError> {
        self.read_raw_item().map(|_| ())
    }

    /// Payload of the next item, which must be a string.
    pub fn read_string(&mut self) -> Result<&'a [u8], DecodeError> {
        let header = self.peek_header()?;
        if header.kind != ItemKind::String {
            return Err(DecodeError::ExpectedString);
        }

        self.take(header.header_len)?;
        self.take(header.payload_len)
    }

    /// Reader bounded to the payload of the next item, which must be a list.
    pub fn read_list(&mut self) -> Result<RlpReader<'a>, DecodeError> {
        let header = self.peek_header()?;
        if header.kind != ItemKind::List {
            return Err(DecodeError::ExpectedList);
        }

        self.take(header.header_len)?;
        self.take(header.payload_len).map(RlpReader::new)
    }

    /// A string of exactly `N` bytes.
    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let value = self.read_string()?;
        if value.len() != N {
            return Err(DecodeError::InvalidLength { expected: N, actual: value.len() });
        }

        let mut buf = [0u8; N];
        buf.copy_from_slice(value);
        Ok(buf)
    }

    /// Canonical big-endian integer of at most `max` bytes, returned without padding.
    pub fn read_uint_bytes(&mut self, max: usize) -> Result<&'a [u8], DecodeError> {
        let value = self.read_string()?;
        if value.len() > max {
            return Err(DecodeError::IntegerOverflow { len: value.len(), max });
        }
        if value.first() == Some(&0) {
            return Err(DecodeError::NonCanonical("integer with leading zero"));
        }
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let value = self.read_uint_bytes(8)?;
        Ok(value.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let value = self.read_u64()?;
        u32::try_from(value).map_err(|_| DecodeError::IntegerOverflow { len: 8, max: 4 })
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let value = self.read_u64()?;
        u16::try_from(value).map_err(|_| DecodeError::IntegerOverflow { len: 8, max: 2 })
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let value = self.read_u64()?;
        u8::try_from(value).map_err(|_| DecodeError::IntegerOverflow { len: 8, max: 1 })
    }

    pub fn read_utf8(&mut self) -> Result<String, DecodeError> {
        let value = self.read_string()?;
        String::from_utf8(value.to_vec()).map_err(|_| DecodeError::InvalidValue("utf8 string"))
    }
}

fn read_long_length(rest: &[u8], len_of_len: usize) -> Result<usize, DecodeError> {
    let Some(len_bytes) = rest.get(1..1 + len_of_len) else {
        return Err(DecodeError::UnexpectedEof { needed: 1 + len_of_len, remaining: rest.len() });
    };
    if len_bytes[0] == 0 {
        return Err(DecodeError::NonCanonical("length with leading zero"));
    }
    if len_of_len > core::mem::size_of::<usize>() {
        return Err(DecodeError::IntegerOverflow { len: len_of_len, max: core::mem::size_of::<usize>() });
    }

    let len = len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    if len <= SHORT_PAYLOAD_MAX {
        return Err(DecodeError::NonCanonical("long form for short payload"));
    }
    Ok(len)
}
