// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use super::{LIST_LONG, LIST_SHORT, SHORT_PAYLOAD_MAX, STRING_LONG, STRING_SHORT};

/// Big-endian bytes of `value` without leading zeros; zero is empty.
#[inline]
pub fn trim_leading_zeros(value: &[u8]) -> &[u8] {
    let first = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    &value[first..]
}

/// Writer abstraction for the RLP format.
pub trait RlpWrite {
    /// Append raw, already encoded bytes.
    fn write_raw(&mut self, bytes: &[u8]);

    /// Number of bytes written so far.
    fn bytes_written(&self) -> usize;

    fn write_header(&mut self, short: u8, long: u8, len: usize) {
        if len <= SHORT_PAYLOAD_MAX {
            self.write_raw(&[short + len as u8]);
        } else {
            let be = (len as u64).to_be_bytes();
            let len_bytes = trim_leading_zeros(&be);
            self.write_raw(&[long + len_bytes.len() as u8]);
            self.write_raw(len_bytes);
        }
    }

    /// Encodes `value` as an RLP byte string.
    fn write_string(&mut self, value: &[u8]) {
        if value.len() == 1 && value[0] < STRING_SHORT {
            self.write_raw(value);
        } else {
            self.write_header(STRING_SHORT, STRING_LONG, value.len());
            self.write_raw(value);
        }
    }

    /// Encodes a big-endian unsigned integer, dropping leading zeros.
    #[inline]
    fn write_uint(&mut self, be_bytes: &[u8]) {
        self.write_string(trim_leading_zeros(be_bytes));
    }

    #[inline]
    fn write_u64(&mut self, value: u64) {
        self.write_uint(&value.to_be_bytes());
    }

    #[inline]
    fn write_empty_list(&mut self) {
        self.write_raw(&[LIST_SHORT]);
    }

    /// Encodes the items written by `body` as one RLP list.
    fn write_list<F: FnOnce(&mut Vec<u8>)>(&mut self, body: F) {
        let mut items = Vec::new();
        body(&mut items);
        self.write_header(LIST_SHORT, LIST_LONG, items.len());
        self.write_raw(&items);
    }
}

impl RlpWrite for Vec<u8> {
    #[inline]
    fn write_raw(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    #[inline]
    fn bytes_written(&self) -> usize {
        self.len()
    }
}
