use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::frame::{self, DataType, Frame};

/// Same limit Redis applies to a single bulk string.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("protocol error; expected array ('*') as first byte, got {0:#04x}")]
    ExpectedArray(u8),
    #[error("protocol error; unsupported data type {0:#04x}")]
    UnsupportedType(u8),
    #[error("protocol error; expected {expected}, got {actual}")]
    InvalidFrame {
        expected: &'static str,
        actual: Frame,
    },
    #[error("protocol error; frame of at least {size} bytes exceeds the {max} bytes limit")]
    FrameTooLarge { size: usize, max: usize },
    #[error("connection closed in the middle of a frame")]
    UnexpectedEof,
    #[error(transparent)]
    Frame(frame::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether the peer sent bytes that cannot be parsed, as opposed to the
    /// stream failing or ending early.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, CodecError::UnexpectedEof | CodecError::Io(_))
    }
}

impl From<frame::Error> for CodecError {
    fn from(err: frame::Error) -> Self {
        match err {
            frame::Error::InvalidDataType(byte) => CodecError::UnsupportedType(byte),
            frame::Error::Incomplete => CodecError::UnexpectedEof,
            err => CodecError::Frame(err),
        }
    }
}

/// Decodes client requests into [`Command`]s and encodes reply [`Frame`]s.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_frame_size: usize,
}

impl RespCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for RespCodec {
    type Item = Command;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&first_byte) = src.first() else {
            return Ok(None);
        };

        // Every request a client sends is an array.
        if first_byte != u8::from(DataType::Array) {
            return Err(CodecError::ExpectedArray(first_byte));
        }

        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            // Not enough data to parse a frame, unless we are already holding
            // more than a frame may ever take.
            Err(frame::Error::Incomplete) if src.len() > self.max_frame_size => {
                return Err(CodecError::FrameTooLarge {
                    size: src.len(),
                    max: self.max_frame_size,
                })
            }
            Err(frame::Error::Incomplete) => {
                src.reserve(1024);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let position: usize = cursor
            .position()
            .try_into()
            .map_err(|_| CodecError::FrameTooLarge {
                size: src.len(),
                max: self.max_frame_size,
            })?;

        if position > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: position,
                max: self.max_frame_size,
            });
        }

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Command::try_from(frame).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(command) => Ok(Some(command)),
            None if buf.is_empty() => Ok(None),
            None => Err(CodecError::UnexpectedEof),
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.write_to(dst);
        Ok(())
    }
}

/// Decodes exactly one request from a buffer that holds everything the peer
/// will send.
///
/// The request is removed from `src`, leaving any following bytes in place. A
/// buffer that ends mid-request is reported as [`CodecError::UnexpectedEof`].
pub fn decode_command(src: &mut BytesMut) -> Result<Command, CodecError> {
    RespCodec::default()
        .decode_eof(src)?
        .ok_or(CodecError::UnexpectedEof)
}
