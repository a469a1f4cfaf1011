// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::BitXor;
use std::str::FromStr;

use crate::encoding::{trim_0x, DecodeError, FromHexError, RlpDecode, RlpEncode, RlpReader, RlpWrite, ToHex};

macro_rules! fixed_uint {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LENGTH: usize = $len;
            pub const ZERO: Self = Self([0u8; $len]);

            #[inline]
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            #[inline]
            pub fn from_slice(slice: &[u8]) -> Result<Self, DecodeError> {
                if slice.len() != $len {
                    return Err(DecodeError::InvalidLength { expected: $len, actual: slice.len() });
                }
                let mut buf = [0u8; $len];
                buf.copy_from_slice(slice);
                Ok(Self(buf))
            }

            #[inline]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            #[inline]
            pub fn to_array(self) -> [u8; $len] {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::ZERO
            }
        }

        impl From<[u8; $len]> for $name {
            #[inline]
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            #[inline]
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl BitXor for $name {
            type Output = Self;

            fn bitxor(self, rhs: Self) -> Self {
                let mut out = self.0;
                out.iter_mut().zip(rhs.0.iter()).for_each(|(a, b)| *a ^= *b);
                Self(out)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.to_hex_lower())
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), self.0.to_hex_lower())
            }
        }

        impl FromStr for $name {
            type Err = FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut buf = [0u8; $len];
                hex::decode_to_slice(trim_0x(s), &mut buf)?;
                Ok(Self(buf))
            }
        }

        impl RlpEncode for $name {
            #[inline]
            fn rlp_encode<W: RlpWrite>(&self, writer: &mut W) {
                writer.write_string(&self.0);
            }
        }

        impl RlpDecode for $name {
            #[inline]
            fn rlp_decode(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
                reader.read_fixed().map(Self)
            }
        }
    };
}

fixed_uint!(
    /// 256-bit big-endian value: hashes, nonces, secrets and total difficulty.
    UInt256, 32
);

fixed_uint!(
    /// 512-bit value, used for node ids (uncompressed public key without prefix).
    UInt512, 64
);

impl UInt256 {
    #[inline]
    pub fn from_u64(value: u64) -> Self {
        let mut buf = [0u8; 32];
        buf[24..].copy_from_slice(&value.to_be_bytes());
        Self(buf)
    }

    /// Encodes as an RLP integer (leading zeros dropped) rather than a 32-byte string.
    #[inline]
    pub fn rlp_encode_uint<W: RlpWrite>(&self, writer: &mut W) {
        writer.write_uint(&self.0);
    }

    /// Decodes an RLP integer of at most 32 bytes.
    pub fn rlp_decode_uint(reader: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let value = reader.read_uint_bytes(32)?;
        let mut buf = [0u8; 32];
        buf[32 - value.len()..].copy_from_slice(value);
        Ok(Self(buf))
    }
}
