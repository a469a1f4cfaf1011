// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! HMAC-DRBG (NIST SP 800-90A, HMAC-SHA256) without reseeding.
//!
//! Output is only as unpredictable as the seed. Seed with OS entropy
//! ([`Random::from_os_entropy`]) and recreate the generator periodically if
//! it lives long. A `Random` needs a single owner; share it behind a lock.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::Mac;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use zeroize::Zeroizing;

use les_base::UInt256;

use crate::key::{Keypair, PrivateKey};
use crate::mac::hmac_sha256;

const BLOCK_SIZE: usize = 32;

pub struct Random {
    k: Zeroizing<[u8; BLOCK_SIZE]>,
    v: Zeroizing<[u8; BLOCK_SIZE]>,
}

impl Random {
    /// Seeds with `entropy` plus a local `{timestamp, pid}` nonce.
    pub fn new(entropy: &[u8]) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&nanos.to_be_bytes());
        nonce[8..].copy_from_slice(&std::process::id().to_be_bytes());
        Self::with_nonce(entropy, &nonce)
    }

    /// Seeds with caller-supplied entropy and nonce; deterministic.
    pub fn with_nonce(entropy: &[u8], nonce: &[u8]) -> Self {
        let mut random = Self {
            k: Zeroizing::new([0x00; BLOCK_SIZE]),
            v: Zeroizing::new([0x01; BLOCK_SIZE]),
        };
        random.update(&[entropy, nonce]);
        random
    }

    /// Seeds from the operating system CSPRNG.
    pub fn from_os_entropy() -> Self {
        let mut entropy = Zeroizing::new([0u8; 2 * BLOCK_SIZE]);
        OsRng.fill_bytes(entropy.as_mut_slice());
        Self::new(entropy.as_slice())
    }

    fn hmac(key: &[u8; BLOCK_SIZE], parts: &[&[u8]]) -> [u8; BLOCK_SIZE] {
        let mut mac = hmac_sha256(key);
        parts.iter().for_each(|p| mac.update(p));
        mac.finalize().into_bytes().into()
    }

    fn update(&mut self, provided: &[&[u8]]) {
        let has_data = provided.iter().any(|p| !p.is_empty());
        for marker in [[0x00u8], [0x01u8]] {
            if marker[0] == 0x01 && !has_data {
                break;
            }

            let mut parts: Vec<&[u8]> = vec![self.v.as_slice(), &marker[..]];
            parts.extend_from_slice(provided);
            *self.k = Self::hmac(&self.k, &parts);
            *self.v = Self::hmac(&self.k, &[self.v.as_slice()]);
        }
    }

    /// Fills `out` and advances the K/V state.
    pub fn generate(&mut self, out: &mut [u8]) {
        for chunk in out.chunks_mut(BLOCK_SIZE) {
            *self.v = Self::hmac(&self.k, &[self.v.as_slice()]);
            chunk.copy_from_slice(&self.v[..chunk.len()]);
        }
        self.update(&[]);
    }

    pub fn gen_uint256(&mut self) -> UInt256 {
        let mut buf = [0u8; 32];
        self.generate(&mut buf);
        UInt256::new(buf)
    }

    #[inline]
    pub fn gen_private_key(&mut self) -> PrivateKey {
        PrivateKey::generate(self)
    }

    #[inline]
    pub fn gen_keypair(&mut self) -> Keypair {
        Keypair::generate(self)
    }
}

impl RngCore for Random {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.generate(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.generate(&mut buf);
        u64::from_le_bytes(buf)
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.generate(dest);
    }

    #[inline]
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.generate(dest);
        Ok(())
    }
}

impl CryptoRng for Random {}
