// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

use rand::{CryptoRng, RngCore};
use secp256k1::{ecdh::shared_secret_point, SecretKey};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use les_base::{encoding::ToHex, hash::Keccak256, UInt256, UInt512};

pub const KEY_SIZE: usize = 32;

/// Size of a node id: the uncompressed public key without the 0x04 prefix.
pub const NODE_ID_SIZE: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("secp256k1: invalid private key length")]
    InvalidPrivateKeyLength,

    #[error("secp256k1: private key is not a valid scalar")]
    InvalidPrivateKey,

    #[error("secp256k1: invalid public key")]
    InvalidPublicKey,
}

/// A secp256k1 secret scalar, zeroed when dropped.
#[derive(Clone)]
pub struct PrivateKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
    secret: SecretKey,
}

impl PrivateKey {
    /// Fails unless `bytes` is in `[1, n)`.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Result<Self, KeyError> {
        let key = Zeroizing::new(bytes);
        let secret = SecretKey::from_slice(key.as_slice()).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self { key, secret })
    }

    #[inline]
    pub fn from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_SIZE] = slice.try_into()
            .map_err(|_| KeyError::InvalidPrivateKeyLength)?;
        Self::new(bytes)
    }

    /// Draws scalars from `rng` until one is valid.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
            rng.fill_bytes(bytes.as_mut_slice());
            if let Ok(key) = Self::new(*bytes) {
                return key;
            }
        }
    }

    #[inline]
    pub fn as_be_bytes(&self) -> &[u8] {
        self.key.as_slice()
    }

    #[inline]
    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    #[inline]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(secp256k1::PublicKey::from_secret_key_global(&self.secret))
    }

    /// ECDH agreement; returns the x coordinate of the shared point.
    pub fn ecdh(&self, peer: &PublicKey) -> Zeroizing<[u8; KEY_SIZE]> {
        let point = Zeroizing::new(shared_secret_point(&peer.0, &self.secret));
        let mut x = Zeroizing::new([0u8; KEY_SIZE]);
        x.copy_from_slice(&point[..KEY_SIZE]);
        x
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&"***").finish()
    }
}

impl Eq for PrivateKey {}

impl PartialEq for PrivateKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.key.as_slice().ct_eq(other.key.as_slice()).into()
    }
}

/// A secp256k1 public key. On the wire it is the 64-byte node id.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    pub fn from_node_id(node_id: &[u8]) -> Result<Self, KeyError> {
        if node_id.len() != NODE_ID_SIZE {
            return Err(KeyError::InvalidPublicKey);
        }

        let mut buf = [0u8; NODE_ID_SIZE + 1];
        buf[0] = 0x04;
        buf[1..].copy_from_slice(node_id);
        secp256k1::PublicKey::from_slice(&buf)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    #[inline]
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    #[inline]
    pub fn to_uncompressed(&self) -> [u8; NODE_ID_SIZE + 1] {
        self.0.serialize_uncompressed()
    }

    #[inline]
    pub fn node_id(&self) -> UInt512 {
        let mut buf = [0u8; NODE_ID_SIZE];
        buf.copy_from_slice(&self.to_uncompressed()[1..]);
        UInt512::new(buf)
    }

    /// Keccak-256 of the node id.
    #[inline]
    pub fn node_hash(&self) -> UInt256 {
        UInt256::new(self.node_id().keccak256())
    }

    #[inline]
    pub(crate) fn from_inner(key: secp256k1::PublicKey) -> Self {
        Self(key)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id().hash(state);
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("node_id", &self.node_id().as_bytes().to_hex_lower())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Keypair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl Keypair {
    #[inline]
    pub fn from_private(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self { private_key, public_key }
    }

    #[inline]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private(PrivateKey::generate(rng))
    }

    #[inline]
    pub fn node_id(&self) -> UInt512 {
        self.public_key.node_id()
    }

    #[inline]
    pub fn ecdh(&self, peer: &PublicKey) -> Zeroizing<[u8; KEY_SIZE]> {
        self.private_key.ecdh(peer)
    }
}

#[cfg(test)]
mod test {
    use hex_literal::hex;

    use super::*;

    const INITIATOR: [u8; 32] = hex!("5e173f6ac3c669587538e7727cf19b782a4f2fda07c1eaa662c593e5e85e3051");
    const RECEIVER: [u8; 32] = hex!("c45f950382d542169ea207959ee0220ec1491755abe405cd7498d6b16adb6df8");

    #[test]
    fn test_node_id() {
        let key = PrivateKey::new(INITIATOR).expect("key should be valid");
        let id = key.public_key().node_id();
        assert_eq!(
            id.as_bytes(),
            &hex!("762dd8a0636e07a54b31169eba0c7a20a1ac1ef68596f1f283b5c676bae4064abfcce24799d09f67e392632d3ffdc12e3d6430dcb0ea19c318343ffa7aae74d4")
        );

        let back = PublicKey::from_node_id(id.as_bytes()).expect("node id should parse");
        assert_eq!(back, key.public_key());
    }

    #[test]
    fn test_ecdh_agrees() {
        let a = Keypair::from_private(PrivateKey::new(INITIATOR).expect("valid"));
        let b = Keypair::from_private(PrivateKey::new(RECEIVER).expect("valid"));
        assert_eq!(*a.ecdh(&b.public_key), *b.ecdh(&a.public_key));
    }

    #[test]
    fn test_invalid_keys() {
        assert_eq!(PrivateKey::new([0u8; 32]).err(), Some(KeyError::InvalidPrivateKey));
        assert_eq!(PrivateKey::from_slice(&[1u8; 31]).err(), Some(KeyError::InvalidPrivateKeyLength));
        assert_eq!(PublicKey::from_node_id(&[0u8; 64]).err(), Some(KeyError::InvalidPublicKey));
        assert_eq!(format!("{:?}", PrivateKey::new(INITIATOR).expect("valid")), "PrivateKey(\"***\")");
    }
}
