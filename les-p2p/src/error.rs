// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::io;

use thiserror::Error;

use les_base::encoding::DecodeError;
use les_crypto::KeyError;

use crate::codec::FrameError;
use crate::discovery::DiscoveryError;
use crate::endpoint::EnodeError;
use crate::handshake::HandshakeError;
use crate::node::NodeState;
use crate::SendError;

/// Errors surfaced to callers of the peer layer. Connection failures after
/// `connect` never show up here; they arrive as `NodeEventKind::Disconnected`.
#[derive(Error, Debug)]
pub enum P2pError {
    #[error("node: io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Enode(#[from] EnodeError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("node: operation not allowed in state {0}")]
    InvalidState(NodeState),

    #[error("node: not connected")]
    NotConnected,
}

pub type P2pResult<T> = Result<T, P2pError>;
