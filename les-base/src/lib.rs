// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

pub mod encoding;
pub mod hash;
pub mod uint;

pub use uint::{UInt256, UInt512};
