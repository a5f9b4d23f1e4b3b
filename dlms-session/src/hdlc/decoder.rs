//! Reassembly of HDLC frames from a byte stream

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::frame::{frame_length, HdlcFrame, FLAG};
use bytes::{Buf, BytesMut};

/// Accumulates stream bytes and cuts them into frames
///
/// Reads rarely line up with frame boundaries: a read may end mid-frame or
/// carry the start of the next one. Bytes stay buffered until the length
/// field says a frame is complete. A closing flag may double as the opening
/// flag of the next frame.
#[derive(Debug, Default)]
pub struct HdlcMessageDecoder {
    buffer: BytesMut,
}

impl HdlcMessageDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(512),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next frame, `None` when more bytes are needed
    ///
    /// A malformed frame yields `Some(Err(..))` and is dropped from the
    /// buffer, so calling again continues with whatever follows it.
    pub fn next_frame(&mut self) -> Option<DlmsResult<HdlcFrame>> {
        loop {
            match self.buffer.iter().position(|b| *b == FLAG) {
                Some(start) => self.buffer.advance(start),
                None => {
                    self.buffer.clear();
                    return None;
                }
            }
            if self.buffer.len() < 3 {
                return None;
            }
            if self.buffer[1] == FLAG {
                self.buffer.advance(1);
                continue;
            }
            if self.buffer[1] & 0xF0 != 0xA0 {
                let format = self.buffer[1];
                self.buffer.advance(1);
                return Some(Err(DlmsError::FrameInvalid(format!(
                    "Unexpected byte 0x{:02X} after flag",
                    format
                ))));
            }
            let total = frame_length(self.buffer[1], self.buffer[2]) + 2;
            if self.buffer.len() < total {
                return None;
            }
            if self.buffer[total - 1] != FLAG {
                self.buffer.advance(1);
                return Some(Err(DlmsError::FrameInvalid(
                    "Frame not terminated by a flag where its length says".to_string(),
                )));
            }
            // leave the closing flag for the next frame to open with
            let mut frame = self.buffer.split_to(total - 1).to_vec();
            frame.push(FLAG);
            return Some(HdlcFrame::decode(&frame));
        }
    }
}
