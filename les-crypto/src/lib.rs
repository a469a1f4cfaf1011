// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

pub mod aes;
pub mod ecdsa;
pub mod ecies;
pub mod key;
mod mac;
pub mod rand;

pub use key::{Keypair, PrivateKey, PublicKey, KeyError};
pub use rand::Random;
