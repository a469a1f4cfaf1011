// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

pub use {coder::*, frame::*};

mod coder;
mod frame;

#[cfg(test)]
pub(crate) use coder::vectors;
