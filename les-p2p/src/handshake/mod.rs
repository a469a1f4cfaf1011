// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

//! The RLPx auth/ack exchange that keys a [`FrameCoder`](crate::codec::FrameCoder).

pub use {auth::*, machine::*, state::*};

mod auth;
mod machine;
mod state;
