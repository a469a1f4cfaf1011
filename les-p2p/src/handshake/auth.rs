// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use les_base::{hash::Keccak256, UInt256};
use les_crypto::ecdsa::{self, RecoverableSign, Secp256k1Sign, RECOVERABLE_SIGN_SIZE};
use les_crypto::ecies::ECIES_OVERHEAD;
use les_crypto::key::NODE_ID_SIZE;
use les_crypto::{Keypair, PrivateKey, PublicKey};

use crate::handshake::HandshakeError;

pub const AUTH_VERSION: u8 = 0x00;

/// Plaintext auth: `sig(65) || keccak(ephemeral-pub)(32) || static-pub(64) || nonce(32) || version(1)`.
pub const AUTH_PLAIN_SIZE: usize = RECOVERABLE_SIGN_SIZE + 32 + NODE_ID_SIZE + 32 + 1;

/// Plaintext ack: `ephemeral-pub(64) || nonce(32) || version(1)`.
pub const ACK_PLAIN_SIZE: usize = NODE_ID_SIZE + 32 + 1;

/// Auth as it crosses the wire.
pub const AUTH_SIZE: usize = AUTH_PLAIN_SIZE + ECIES_OVERHEAD;

/// Ack as it crosses the wire.
pub const ACK_SIZE: usize = ACK_PLAIN_SIZE + ECIES_OVERHEAD;

#[derive(Debug, Clone)]
pub struct AuthMessage {
    pub sign: RecoverableSign,
    pub ephemeral_hash: UInt256,
    pub static_key: PublicKey,
    pub nonce: UInt256,
    pub version: u8,
}

/// The value the originator signs with its ephemeral key.
fn auth_digest(static_shared: &[u8; 32], nonce: &UInt256) -> [u8; 32] {
    let mut digest = *static_shared;
    digest.iter_mut().zip(nonce.as_bytes()).for_each(|(d, n)| *d ^= n);
    digest
}

impl AuthMessage {
    pub fn new(local: &Keypair, ephemeral: &PrivateKey, remote: &PublicKey, nonce: &UInt256) -> Self {
        let static_shared = local.ecdh(remote);
        let sign = ephemeral.sign_recoverable(&auth_digest(&static_shared, nonce));
        Self {
            sign,
            ephemeral_hash: UInt256::new(ephemeral.public_key().node_id().as_bytes().keccak256()),
            static_key: local.public_key,
            nonce: *nonce,
            version: AUTH_VERSION,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AUTH_PLAIN_SIZE);
        buf.extend_from_slice(&self.sign);
        buf.extend_from_slice(self.ephemeral_hash.as_bytes());
        buf.extend_from_slice(self.static_key.node_id().as_bytes());
        buf.extend_from_slice(self.nonce.as_bytes());
        buf.push(self.version);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() != AUTH_PLAIN_SIZE {
            return Err(HandshakeError::InvalidLength { expected: AUTH_PLAIN_SIZE, actual: buf.len() });
        }

        let (sign, rest) = buf.split_at(RECOVERABLE_SIGN_SIZE);
        let (ephemeral_hash, rest) = rest.split_at(32);
        let (static_key, rest) = rest.split_at(NODE_ID_SIZE);
        let (nonce, version) = rest.split_at(32);

        let mut sign_bytes = [0u8; RECOVERABLE_SIGN_SIZE];
        sign_bytes.copy_from_slice(sign);
        Ok(Self {
            sign: sign_bytes,
            ephemeral_hash: UInt256::from_slice(ephemeral_hash)?,
            static_key: PublicKey::from_node_id(static_key)?,
            nonce: UInt256::from_slice(nonce)?,
            version: version[0],
        })
    }

    /// Recovers the originator's ephemeral key and checks it against the embedded hash.
    pub fn recover_ephemeral(&self, local: &Keypair) -> Result<PublicKey, HandshakeError> {
        let static_shared = local.ecdh(&self.static_key);
        let ephemeral = ecdsa::recover(&auth_digest(&static_shared, &self.nonce), &self.sign)?;
        if ephemeral.node_id().as_bytes().keccak256() != *self.ephemeral_hash.as_bytes() {
            return Err(HandshakeError::EphemeralHashMismatch);
        }
        Ok(ephemeral)
    }
}

#[derive(Debug, Clone)]
pub struct AckMessage {
    pub ephemeral: PublicKey,
    pub nonce: UInt256,
    pub version: u8,
}

impl AckMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_PLAIN_SIZE);
        buf.extend_from_slice(self.ephemeral.node_id().as_bytes());
        buf.extend_from_slice(self.nonce.as_bytes());
        buf.push(self.version);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() != ACK_PLAIN_SIZE {
            return Err(HandshakeError::InvalidLength { expected: ACK_PLAIN_SIZE, actual: buf.len() });
        }

        let (ephemeral, rest) = buf.split_at(NODE_ID_SIZE);
        let (nonce, version) = rest.split_at(32);
        Ok(Self {
            ephemeral: PublicKey::from_node_id(ephemeral)?,
            nonce: UInt256::from_slice(nonce)?,
            version: version[0],
        })
    }
}
