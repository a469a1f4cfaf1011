// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use sha3::Digest;

pub const KECCAK256_SIZE: usize = 32;

/// Keccak-256 as used by Ethereum (the pre-standard padding, not SHA3-256).
pub trait Keccak256 {
    fn keccak256(&self) -> [u8; KECCAK256_SIZE];
}

impl<T: AsRef<[u8]>> Keccak256 for T {
    #[inline]
    fn keccak256(&self) -> [u8; KECCAK256_SIZE] {
        let mut h = sha3::Keccak256::new();
        h.update(self);
        h.finalize().into()
    }
}

pub trait SlicesKeccak256 {
    fn slices_keccak256(self) -> [u8; KECCAK256_SIZE];
}

impl<T: Iterator> SlicesKeccak256 for T
where
    <T as Iterator>::Item: AsRef<[u8]>,
{
    #[inline]
    fn slices_keccak256(self) -> [u8; KECCAK256_SIZE] {
        let mut h = sha3::Keccak256::new();
        self.for_each(|s| h.update(s));

        h.finalize().into()
    }
}

#[cfg(test)]
mod test {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_keccak256() {
        assert_eq!(
            b"".keccak256(),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );

        let joined = [b"hello ".as_slice(), b"world".as_slice()].iter().slices_keccak256();
        assert_eq!(joined, b"hello world".keccak256());
    }
}
