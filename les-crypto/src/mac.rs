// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use hmac::digest::{Key, KeyInit};
use hmac::Hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

pub(crate) type HmacSha256 = Hmac<Sha256>;

const SHA256_BLOCK_SIZE: usize = 64;

/// HMAC-SHA256 keyed with a 32-byte key. Keys shorter than the block are
/// zero padded by HMAC itself, so padding here gives the same MAC.
pub(crate) fn hmac_sha256(key: &[u8; 32]) -> HmacSha256 {
    let mut block = Zeroizing::new([0u8; SHA256_BLOCK_SIZE]);
    block[..key.len()].copy_from_slice(key);
    <HmacSha256 as KeyInit>::new(Key::<HmacSha256>::from_slice(block.as_slice()))
}
