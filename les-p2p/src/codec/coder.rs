// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use sha3::{Digest, Keccak256 as KeccakState};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use les_base::{hash::SlicesKeccak256, UInt256};
use les_crypto::aes::{Aes256CtrStream, Aes256EcbCipher, EcbError, AES_BLOCK_SIZE};
use les_crypto::{PrivateKey, PublicKey};

/// Size of the encrypted header block, MAC included.
pub const HEADER_LEN: usize = 32;

/// Size of each header/frame MAC on the wire.
pub const MAC_LEN: usize = 16;

/// Largest frame size the 3-byte header field can carry.
pub const MAX_FRAME_SIZE: usize = 0x00ff_ffff;

/// RLP `[capability-id, context-id]`, both zero.
const HEADER_DATA: [u8; 3] = [0xc2, 0x80, 0x80];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame: header mac mismatch")]
    HeaderMacMismatch,

    #[error("frame: body mac mismatch")]
    FrameMacMismatch,

    #[error("frame: size {size} exceeds limit {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("frame: coder is desynchronized by an earlier failure")]
    Desynchronized,

    #[error("frame: {0}")]
    Cipher(#[from] EcbError),
}

/// Secrets agreed by both sides of the handshake.
pub struct FrameSecrets {
    pub aes: Zeroizing<[u8; 32]>,
    pub mac: Zeroizing<[u8; 32]>,
}

impl FrameSecrets {
    /// `ecdhe` is the x coordinate of the ephemeral ECDH point.
    pub fn derive(ecdhe: &[u8; 32], initiator_nonce: &UInt256, responder_nonce: &UInt256) -> Self {
        let nonce_hash = [responder_nonce.as_ref(), initiator_nonce.as_ref()].iter().slices_keccak256();
        let shared = Zeroizing::new([ecdhe.as_slice(), nonce_hash.as_slice()].iter().slices_keccak256());
        let aes = Zeroizing::new([ecdhe.as_slice(), shared.as_slice()].iter().slices_keccak256());
        let mac = Zeroizing::new([ecdhe.as_slice(), aes.as_slice()].iter().slices_keccak256());
        Self { aes, mac }
    }
}

/// Everything the handshake hands over to build a [`FrameCoder`].
pub struct HandshakeOutcome<'a> {
    pub local_ephemeral: &'a PrivateKey,
    pub remote_ephemeral: &'a PublicKey,
    pub local_nonce: &'a UInt256,
    pub remote_nonce: &'a UInt256,
    /// Auth message exactly as it crossed the wire.
    pub auth: &'a [u8],
    /// Ack message exactly as it crossed the wire.
    pub ack: &'a [u8],
    pub originated: bool,
}

/// Running MAC of one direction: a Keccak-256 sponge keyed by the mac secret.
#[derive(Clone)]
struct MacState {
    secret: Zeroizing<[u8; 32]>,
    hasher: KeccakState,
}

impl MacState {
    fn new(secret: &[u8; 32], nonce: &UInt256, initial: &[u8]) -> Self {
        let mut seed = Zeroizing::new(*secret);
        seed.iter_mut().zip(nonce.as_bytes()).for_each(|(s, n)| *s ^= n);

        let mut hasher = KeccakState::new();
        hasher.update(seed.as_slice());
        hasher.update(initial);
        Self { secret: Zeroizing::new(*secret), hasher }
    }

    fn digest(&self) -> [u8; MAC_LEN] {
        let full = self.hasher.clone().finalize();
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&full[..MAC_LEN]);
        out
    }

    fn update_with_seed(&mut self, data: &[u8; MAC_LEN]) -> Result<[u8; MAC_LEN], FrameError> {
        let mut seed = self.digest();
        self.secret.aes256_ecb_encrypt_aligned(&mut seed)?;
        seed.iter_mut().zip(data).for_each(|(s, d)| *s ^= d);
        self.hasher.update(seed);
        Ok(self.digest())
    }

    fn header_mac(&mut self, header: &[u8; MAC_LEN]) -> Result<[u8; MAC_LEN], FrameError> {
        self.update_with_seed(header)
    }

    fn frame_mac(&mut self, body: &[u8]) -> Result<[u8; MAC_LEN], FrameError> {
        self.hasher.update(body);
        let prev = self.digest();
        self.update_with_seed(&prev)
    }

    #[cfg(test)]
    fn full_digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}

/// The RLPx frame codec: AES-256-CTR for confidentiality, a Keccak MAC per direction.
///
/// Every frame advances the MAC state; frames must be processed strictly in wire order.
/// Any failure leaves the coder unusable.
pub struct FrameCoder {
    egress_aes: Aes256CtrStream,
    ingress_aes: Aes256CtrStream,
    egress_mac: MacState,
    ingress_mac: MacState,
    max_frame_size: usize,
    poisoned: bool,
}

impl FrameCoder {
    pub fn new(outcome: HandshakeOutcome<'_>) -> Self {
        let ecdhe = outcome.local_ephemeral.ecdh(outcome.remote_ephemeral);
        let (initiator_nonce, responder_nonce) = if outcome.originated {
            (outcome.local_nonce, outcome.remote_nonce)
        } else {
            (outcome.remote_nonce, outcome.local_nonce)
        };

        let secrets = FrameSecrets::derive(&ecdhe, initiator_nonce, responder_nonce);
        let (sent, received) = if outcome.originated {
            (outcome.auth, outcome.ack)
        } else {
            (outcome.ack, outcome.auth)
        };
        Self::from_secrets(&secrets, outcome.local_nonce, outcome.remote_nonce, sent, received)
    }

    /// `sent` and `received` are the handshake messages this side sent and received.
    pub fn from_secrets(
        secrets: &FrameSecrets,
        local_nonce: &UInt256,
        remote_nonce: &UInt256,
        sent: &[u8],
        received: &[u8],
    ) -> Self {
        let iv = [0u8; AES_BLOCK_SIZE];
        Self {
            egress_aes: Aes256CtrStream::new(&secrets.aes, &iv),
            ingress_aes: Aes256CtrStream::new(&secrets.aes, &iv),
            egress_mac: MacState::new(&secrets.mac, remote_nonce, sent),
            ingress_mac: MacState::new(&secrets.mac, local_nonce, received),
            max_frame_size: MAX_FRAME_SIZE,
            poisoned: false,
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max.min(MAX_FRAME_SIZE);
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Wire length of the body part (padded ciphertext and MAC) for a frame of `size` bytes.
    pub fn body_len(size: usize) -> usize {
        padded_len(size) + MAC_LEN
    }

    /// Encrypts one frame: header, header MAC, padded body, frame MAC.
    pub fn encrypt(&mut self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        self.ensure_usable()?;
        if payload.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge { size: payload.len(), max: self.max_frame_size });
        }

        let result = self.encrypt_unchecked(payload);
        self.poisoned = result.is_err();
        result
    }

    fn encrypt_unchecked(&mut self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let size = payload.len();
        let mut header = [0u8; MAC_LEN];
        header[..3].copy_from_slice(&(size as u32).to_be_bytes()[1..]);
        header[3..6].copy_from_slice(&HEADER_DATA);
        self.egress_aes.apply(&mut header);
        let header_mac = self.egress_mac.header_mac(&header)?;

        let mut frame = Vec::with_capacity(HEADER_LEN + Self::body_len(size));
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&header_mac);

        let body_start = frame.len();
        frame.extend_from_slice(payload);
        frame.resize(body_start + padded_len(size), 0);
        self.egress_aes.apply(&mut frame[body_start..]);

        let frame_mac = self.egress_mac.frame_mac(&frame[body_start..])?;
        frame.extend_from_slice(&frame_mac);
        Ok(frame)
    }

    /// Authenticates and decrypts a 32-byte header block, returning the frame size.
    pub fn decrypt_header(&mut self, block: &[u8]) -> Result<usize, FrameError> {
        self.ensure_usable()?;
        let result = self.decrypt_header_unchecked(block);
        self.poisoned = result.is_err();
        result
    }

    fn decrypt_header_unchecked(&mut self, block: &[u8]) -> Result<usize, FrameError> {
        if block.len() != HEADER_LEN {
            return Err(FrameError::InvalidLength { expected: HEADER_LEN, actual: block.len() });
        }

        let mut header = [0u8; MAC_LEN];
        header.copy_from_slice(&block[..MAC_LEN]);
        let expected = self.ingress_mac.header_mac(&header)?;
        if !bool::from(expected[..].ct_eq(&block[MAC_LEN..])) {
            return Err(FrameError::HeaderMacMismatch);
        }

        self.ingress_aes.apply(&mut header);
        let size = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        if size > self.max_frame_size {
            return Err(FrameError::FrameTooLarge { size, max: self.max_frame_size });
        }
        Ok(size)
    }

    /// Authenticates and decrypts the body of a frame whose header announced `size` bytes.
    pub fn decrypt_frame(&mut self, body: &[u8], size: usize) -> Result<Vec<u8>, FrameError> {
        self.ensure_usable()?;
        let result = self.decrypt_frame_unchecked(body, size);
        self.poisoned = result.is_err();
        result
    }

    fn decrypt_frame_unchecked(&mut self, body: &[u8], size: usize) -> Result<Vec<u8>, FrameError> {
        let expected_len = Self::body_len(size);
        if body.len() != expected_len {
            return Err(FrameError::InvalidLength { expected: expected_len, actual: body.len() });
        }

        let (ciphertext, mac) = body.split_at(expected_len - MAC_LEN);
        let expected = self.ingress_mac.frame_mac(ciphertext)?;
        if !bool::from(expected[..].ct_eq(mac)) {
            return Err(FrameError::FrameMacMismatch);
        }

        let mut plain = ciphertext.to_vec();
        self.ingress_aes.apply(&mut plain);
        plain.truncate(size);
        Ok(plain)
    }

    fn ensure_usable(&self) -> Result<(), FrameError> {
        if self.poisoned {
            Err(FrameError::Desynchronized)
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    pub(crate) fn egress_digest(&self) -> [u8; 32] {
        self.egress_mac.full_digest()
    }

    #[cfg(test)]
    pub(crate) fn ingress_digest(&self) -> [u8; 32] {
        self.ingress_mac.full_digest()
    }
}

#[inline]
fn padded_len(size: usize) -> usize {
    (size + AES_BLOCK_SIZE - 1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE
}
