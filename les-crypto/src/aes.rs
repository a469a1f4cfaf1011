// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};

pub const AES256_KEY_SIZE: usize = 32;
pub const AES128_KEY_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EcbError {
    #[error("aes-ecb: invalid data length")]
    InvalidDataLength,
}

pub trait Aes256EcbCipher {
    fn aes256_ecb_encrypt_aligned(&self, buf: &mut [u8]) -> Result<(), EcbError>;
}

impl Aes256EcbCipher for [u8; AES256_KEY_SIZE] {
    fn aes256_ecb_encrypt_aligned(&self, data: &mut [u8]) -> Result<(), EcbError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(EcbError::InvalidDataLength);
        }

        let cipher = Aes256::new(GenericArray::from_slice(self));
        data.chunks_mut(AES_BLOCK_SIZE)
            .map(GenericArray::from_mut_slice)
            .for_each(|block| cipher.encrypt_block(block));
        Ok(())
    }
}

/// Keystream state of one AES-256-CTR direction. Encryption and decryption
/// are the same operation; the counter advances with every byte applied.
pub struct Aes256CtrStream {
    cipher: Aes256Ctr,
}

impl Aes256CtrStream {
    pub fn new(key: &[u8; AES256_KEY_SIZE], iv: &[u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            cipher: Aes256Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    #[inline]
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }
}

/// One-shot AES-128-CTR over `buf`.
pub fn aes128_ctr_apply(key: &[u8; AES128_KEY_SIZE], iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    cipher.apply_keystream(buf);
}

#[cfg(test)]
mod test {
    use hex_literal::hex;

    use super::*;

    // FIPS-197 C.3
    #[test]
    fn test_aes256_ecb() {
        let key: [u8; 32] = core::array::from_fn(|i| i as u8);
        let mut data = hex!("00112233445566778899aabbccddeeff");
        key.aes256_ecb_encrypt_aligned(&mut data).expect("encrypt should be ok");
        assert_eq!(data, hex!("8ea2b7ca516745bfeafc49904b496089"));

        let mut odd = [0u8; 17];
        assert_eq!(key.aes256_ecb_encrypt_aligned(&mut odd), Err(EcbError::InvalidDataLength));
    }

    // SP 800-38A F.5.5, applied in two uneven pieces
    #[test]
    fn test_aes256_ctr_stream() {
        let key = hex!("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
        let iv = hex!("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
        let mut data = hex!("6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51");

        let mut stream = Aes256CtrStream::new(&key, &iv);
        let (head, tail) = data.split_at_mut(5);
        stream.apply(head);
        stream.apply(tail);
        assert_eq!(data, hex!("601ec313775789a5b7a7f504bbf3d228f443e3ca4d62b59aca84e990cacaf5c5"));
    }

    #[test]
    fn test_aes128_ctr_is_involution() {
        let key = [3u8; 16];
        let iv = [9u8; 16];
        let mut data = *b"ecies payload bytes";
        aes128_ctr_apply(&key, &iv, &mut data);
        assert_ne!(&data, b"ecies payload bytes");
        aes128_ctr_apply(&key, &iv, &mut data);
        assert_eq!(&data, b"ecies payload bytes");
    }
}
