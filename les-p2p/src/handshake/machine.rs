// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::sync::Arc;

use rand::{CryptoRng, RngCore};

use les_base::{encoding::DecodeError, UInt256};
use les_crypto::ecdsa::RecoverError;
use les_crypto::ecies::{self, EciesError};
use les_crypto::{KeyError, Keypair, PublicKey};

use crate::codec::{FrameCoder, HandshakeOutcome};
use crate::handshake::{AckMessage, AuthMessage, HandshakeState, ACK_SIZE, AUTH_SIZE, AUTH_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Dialed out; sends the auth.
    Originator,

    /// Accepted; answers with the ack.
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake: originator needs the remote public key")]
    MissingRemoteKey,

    #[error("handshake: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("handshake: {0}")]
    Ecies(#[from] EciesError),

    #[error("handshake: {0}")]
    Key(#[from] KeyError),

    #[error("handshake: {0}")]
    Recover(#[from] RecoverError),

    #[error("handshake: {0}")]
    Decode(#[from] DecodeError),

    #[error("handshake: ephemeral key does not match its hash")]
    EphemeralHashMismatch,

    #[error("handshake: auth from unexpected peer {0:?}")]
    UnexpectedPeer(PublicKey),

    #[error("handshake: unexpected message in state {0}")]
    UnexpectedState(HandshakeState),

    #[error("handshake: already completed")]
    AlreadyCompleted,
}

/// One RLPx handshake attempt. The ephemeral key and nonce are fresh per
/// machine and never reused; build a new machine to retry.
pub struct HandshakeMachine {
    role: HandshakeRole,
    state: HandshakeState,
    local: Arc<Keypair>,
    remote: Option<PublicKey>,

    ephemeral: Option<Keypair>,
    nonce: UInt256,

    remote_ephemeral: Option<PublicKey>,
    remote_nonce: Option<UInt256>,

    auth: Vec<u8>,
    ack: Vec<u8>,
}

impl HandshakeMachine {
    /// `remote` is required for the originator and, when given to a receiver,
    /// restricts which peer may authenticate.
    pub fn new<R: RngCore + CryptoRng>(
        role: HandshakeRole,
        local: Arc<Keypair>,
        remote: Option<PublicKey>,
        rng: &mut R,
    ) -> Result<Self, HandshakeError> {
        let ephemeral = Keypair::generate(rng);
        let mut nonce = [0u8; 32];
        rng.fill_bytes(&mut nonce);
        Self::with_ephemeral(role, local, remote, ephemeral, UInt256::new(nonce))
    }

    pub fn with_ephemeral(
        role: HandshakeRole,
        local: Arc<Keypair>,
        remote: Option<PublicKey>,
        ephemeral: Keypair,
        nonce: UInt256,
    ) -> Result<Self, HandshakeError> {
        if role == HandshakeRole::Originator && remote.is_none() {
            return Err(HandshakeError::MissingRemoteKey);
        }

        Ok(Self {
            role,
            state: HandshakeState::New,
            local,
            remote,
            ephemeral: Some(ephemeral),
            nonce,
            remote_ephemeral: None,
            remote_nonce: None,
            auth: Vec::new(),
            ack: Vec::new(),
        })
    }

    #[inline]
    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    #[inline]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The peer's static key: known up front for the originator, learnt from the auth otherwise.
    #[inline]
    pub fn remote_public_key(&self) -> Option<&PublicKey> {
        self.remote.as_ref()
    }

    /// Secrets can be derived with [`Self::finish`].
    pub fn is_complete(&self) -> bool {
        matches!(self.state, HandshakeState::ReceivedAck | HandshakeState::SentAck)
    }

    /// Bytes the next inbound message occupies on the wire.
    pub fn expected_len(&self) -> Option<usize> {
        match self.state {
            HandshakeState::SentAuth => Some(ACK_SIZE),
            HandshakeState::AwaitingAuth => Some(AUTH_SIZE),
            _ => None,
        }
    }

    /// Returns the auth to send for the originator, nothing for the receiver.
    pub fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Option<Vec<u8>>, HandshakeError> {
        if self.state != HandshakeState::New {
            return Err(HandshakeError::UnexpectedState(self.state));
        }

        match self.role {
            HandshakeRole::Originator => {
                let remote = self.remote.ok_or(HandshakeError::MissingRemoteKey)?;
                let ephemeral = self.ephemeral()?;
                let auth = AuthMessage::new(&self.local, &ephemeral.private_key, &remote, &self.nonce);

                self.auth = ecies::encrypt(rng, &remote, &auth.encode());
                self.state = HandshakeState::SentAuth;
                Ok(Some(self.auth.clone()))
            }
            HandshakeRole::Receiver => {
                self.state = HandshakeState::AwaitingAuth;
                Ok(None)
            }
        }
    }

    /// Feeds the peer's auth or ack. The receiver gets its ack back to send.
    pub fn on_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, HandshakeError> {
        match self.state {
            HandshakeState::SentAuth => {
                self.on_ack(message)?;
                Ok(None)
            }
            HandshakeState::AwaitingAuth => self.on_auth(rng, message).map(Some),
            HandshakeState::Finished => Err(HandshakeError::AlreadyCompleted),
            state => Err(HandshakeError::UnexpectedState(state)),
        }
    }

    fn on_ack(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        check_len(message, ACK_SIZE)?;
        let plain = ecies::decrypt(&self.local.private_key, message)?;
        let ack = AckMessage::decode(&plain)?;

        self.remote_ephemeral = Some(ack.ephemeral);
        self.remote_nonce = Some(ack.nonce);
        self.ack = message.to_vec();
        self.state = HandshakeState::ReceivedAck;
        Ok(())
    }

    fn on_auth<R: RngCore + CryptoRng>(&mut self, rng: &mut R, message: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        check_len(message, AUTH_SIZE)?;
        let plain = ecies::decrypt(&self.local.private_key, message)?;
        let auth = AuthMessage::decode(&plain)?;
        if let Some(expected) = self.remote {
            if expected != auth.static_key {
                return Err(HandshakeError::UnexpectedPeer(auth.static_key));
            }
        }

        let remote_ephemeral = auth.recover_ephemeral(&self.local)?;
        let ack = AckMessage {
            ephemeral: self.ephemeral()?.public_key,
            nonce: self.nonce,
            version: AUTH_VERSION,
        };
        let ack = ecies::encrypt(rng, &auth.static_key, &ack.encode());

        self.remote = Some(auth.static_key);
        self.remote_ephemeral = Some(remote_ephemeral);
        self.remote_nonce = Some(auth.nonce);
        self.auth = message.to_vec();
        self.ack = ack.clone();
        self.state = HandshakeState::SentAck;
        Ok(ack)
    }

    /// Derives the frame secrets and discards the ephemeral key.
    pub fn finish(&mut self) -> Result<FrameCoder, HandshakeError> {
        if !self.is_complete() {
            return Err(match self.state {
                HandshakeState::Finished => HandshakeError::AlreadyCompleted,
                state => HandshakeError::UnexpectedState(state),
            });
        }

        let ephemeral = self.ephemeral.take().ok_or(HandshakeError::AlreadyCompleted)?;
        let (remote_ephemeral, remote_nonce) = match (self.remote_ephemeral, self.remote_nonce) {
            (Some(key), Some(nonce)) => (key, nonce),
            _ => return Err(HandshakeError::UnexpectedState(self.state)),
        };

        let coder = FrameCoder::new(HandshakeOutcome {
            local_ephemeral: &ephemeral.private_key,
            remote_ephemeral: &remote_ephemeral,
            local_nonce: &self.nonce,
            remote_nonce: &remote_nonce,
            auth: &self.auth,
            ack: &self.ack,
            originated: self.role == HandshakeRole::Originator,
        });

        self.state = HandshakeState::Finished;
        self.auth.clear();
        self.ack.clear();
        Ok(coder)
    }

    fn ephemeral(&self) -> Result<&Keypair, HandshakeError> {
        self.ephemeral.as_ref().ok_or(HandshakeError::AlreadyCompleted)
    }
}

#[inline]
fn check_len(message: &[u8], expected: usize) -> Result<(), HandshakeError> {
    if message.len() != expected {
        return Err(HandshakeError::InvalidLength { expected, actual: message.len() });
    }
    Ok(())
}
