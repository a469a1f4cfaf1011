// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SECP256K1,
};

use crate::key::{PrivateKey, PublicKey};

/// `r(32) || s(32) || v(1)` with `v` the recovery id in `0..=3`.
pub const RECOVERABLE_SIGN_SIZE: usize = 65;

pub type RecoverableSign = [u8; RECOVERABLE_SIGN_SIZE];

pub trait Secp256k1Sign {
    fn sign_recoverable(&self, digest: &[u8; 32]) -> RecoverableSign;
}

impl Secp256k1Sign for PrivateKey {
    fn sign_recoverable(&self, digest: &[u8; 32]) -> RecoverableSign {
        let message = Message::from_digest(*digest);
        let (recovery_id, compact) = SECP256K1
            .sign_ecdsa_recoverable(&message, self.secret_key())
            .serialize_compact();

        let mut sign = [0u8; RECOVERABLE_SIGN_SIZE];
        sign[..64].copy_from_slice(&compact);
        sign[64] = recovery_id.to_i32() as u8;
        sign
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecoverError {
    #[error("ecdsa: invalid signature length {0}")]
    InvalidLength(usize),

    #[error("ecdsa: invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("ecdsa: invalid signature")]
    InvalidSign,

    #[error("ecdsa: public key recovery failed")]
    RecoveryFailed,
}

/// Recovers the signer of `digest` from a 65-byte recoverable signature.
pub fn recover(digest: &[u8; 32], sign: &[u8]) -> Result<PublicKey, RecoverError> {
    if sign.len() != RECOVERABLE_SIGN_SIZE {
        return Err(RecoverError::InvalidLength(sign.len()));
    }

    let recovery_id = RecoveryId::from_i32(sign[64] as i32)
        .map_err(|_| RecoverError::InvalidRecoveryId(sign[64]))?;
    let sign = RecoverableSignature::from_compact(&sign[..64], recovery_id)
        .map_err(|_| RecoverError::InvalidSign)?;

    SECP256K1.recover_ecdsa(&Message::from_digest(*digest), &sign)
        .map(PublicKey::from_inner)
        .map_err(|_| RecoverError::RecoveryFailed)
}
