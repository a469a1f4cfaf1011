// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{FrameCoder, FrameError, HEADER_LEN};

/// Adapts a keyed [`FrameCoder`] to `tokio_util::codec::Framed`.
///
/// Items are whole frame bodies, i.e. `RLP(msg-id) || RLP(payload)`.
pub struct RlpxFrameCodec {
    coder: FrameCoder,
    pending_size: Option<usize>,
}

impl RlpxFrameCodec {
    pub fn new(coder: FrameCoder) -> Self {
        Self { coder, pending_size: None }
    }

    pub fn coder(&self) -> &FrameCoder {
        &self.coder
    }
}

#[inline]
fn invalid_data(err: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Recovers the frame failure behind an `io::Error` produced by this codec.
pub fn frame_error(err: &io::Error) -> Option<&FrameError> {
    err.get_ref().and_then(|inner| inner.downcast_ref::<FrameError>())
}

impl Encoder<Bytes> for RlpxFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = self.coder.encrypt(&item).map_err(invalid_data)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Decoder for RlpxFrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let size = match self.pending_size {
            Some(size) => size,
            None => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }

                let size = self.coder.decrypt_header(&src[..HEADER_LEN]).map_err(invalid_data)?;
                src.advance(HEADER_LEN);
                self.pending_size = Some(size);
                size
            }
        };

        let body_len = FrameCoder::body_len(size);
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        let body = src.split_to(body_len);
        self.pending_size = None;
        let payload = self.coder.decrypt_frame(&body, size).map_err(invalid_data)?;
        Ok(Some(Bytes::from(payload)))
    }
}
