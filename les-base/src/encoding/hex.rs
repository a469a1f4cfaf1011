// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

pub use hex::{FromHex, FromHexError};

pub trait ToHex {
    fn to_hex_lower(&self) -> String;

    fn to_hex_upper(&self) -> String;
}

impl<T: AsRef<[u8]>> ToHex for T {
    #[inline]
    fn to_hex_lower(&self) -> String {
        hex::encode(self)
    }

    #[inline]
    fn to_hex_upper(&self) -> String {
        hex::encode_upper(self)
    }
}

pub trait StartsWith0x {
    fn starts_with_0x(&self) -> bool;
}

impl<T: AsRef<[u8]>> StartsWith0x for T {
    #[inline]
    fn starts_with_0x(&self) -> bool {
        let v = self.as_ref();
        v.starts_with(b"0x") || v.starts_with(b"0X")
    }
}

/// Strips an optional `0x`/`0X` prefix.
#[inline]
pub fn trim_0x(value: &str) -> &str {
    if value.starts_with_0x() { &value[2..] } else { value }
}
