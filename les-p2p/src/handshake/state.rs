// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    New,

    /// Originator: auth sent, waiting for the ack.
    SentAuth,

    /// Receiver: waiting for the auth.
    AwaitingAuth,

    /// Originator: ack received, secrets can be derived.
    ReceivedAck,

    /// Receiver: ack sent, secrets can be derived.
    SentAck,

    Finished,
}

impl Display for HandshakeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::SentAuth => "sent-auth",
            Self::AwaitingAuth => "awaiting-auth",
            Self::ReceivedAck => "received-ack",
            Self::SentAck => "sent-ack",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}
