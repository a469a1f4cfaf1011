// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use super::{DecodeError, RlpReader, RlpWrite};

/// Values that can be encoded as a single RLP item.
pub trait RlpEncode {
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W);

    #[inline]
    fn to_rlp(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.rlp_encode(&mut buf);
        buf
    }
}

/// Values that can be decoded from a single RLP item.
pub trait RlpDecode: Sized {
    fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError>;

    /// Decodes `buf`, which must hold exactly one item.
    fn from_rlp(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = RlpReader::new(buf);
        let value = Self::rlp_decode(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

macro_rules! impl_rlp_uint {
    ($($t:ty => $read:ident),* $(,)?) => {
        $(
            impl RlpEncode for $t {
                #[inline]
                fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
                    writer.write_u64(*self as u64);
                }
            }

            impl RlpDecode for $t {
                #[inline]
                fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
                    reader.$read()
                }
            }
        )*
    };
}

impl_rlp_uint!(u8 => read_u8, u16 => read_u16, u32 => read_u32, u64 => read_u64);

impl RlpEncode for [u8] {
    #[inline]
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_string(self);
    }
}

impl RlpEncode for Vec<u8> {
    #[inline]
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_string(self);
    }
}

impl RlpDecode for Vec<u8> {
    #[inline]
    fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        reader.read_string().map(|v| v.to_vec())
    }
}

impl RlpEncode for str {
    #[inline]
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_string(self.as_bytes());
    }
}

impl RlpEncode for String {
    #[inline]
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_string(self.as_bytes());
    }
}

impl RlpDecode for String {
    #[inline]
    fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        reader.read_utf8()
    }
}

impl<const N: usize> RlpEncode for [u8; N] {
    #[inline]
    fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_string(self);
    }
}

impl<const N: usize> RlpDecode for [u8; N] {
    #[inline]
    fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        reader.read_fixed()
    }
}

/// Encodes `items` as one RLP list.
pub fn write_rlp_list<W: RlpWrite, T: RlpEncode>(writer: &mut W, items: &[T]) {
    writer.write_list(|w| items.iter().for_each(|item| item.rlp_encode(w)));
}

/// Decodes one RLP list whose items all have type `T`.
pub fn read_rlp_list<T: RlpDecode>(reader: &mut RlpReader<'_>) -> Result<Vec<T>, DecodeError> {
    let mut list = reader.read_list()?;
    let mut items = Vec::new();
    while !list.is_empty() {
        items.push(T::rlp_decode(&mut list)?);
    }
    Ok(items)
}
