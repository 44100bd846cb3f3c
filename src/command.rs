use bytes::Bytes;

use crate::codec::CodecError;
use crate::frame::{DataType, Frame};

/// The ordered tokens of one client request.
///
/// A token is `None` when the client sent a null bulk string (`$-1`), which is
/// kept apart from an empty bulk string (`$0`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    args: Vec<Option<Bytes>>,
}

impl Command {
    pub fn new(args: Vec<Option<Bytes>>) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &[Option<Bytes>] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The first token, lowercased, if it is present and valid UTF-8.
    pub fn name(&self) -> Option<String> {
        let first = self.args.first()?.as_ref()?;
        std::str::from_utf8(first).ok().map(str::to_lowercase)
    }

    /// String view of the tokens: null collapses to `""` and invalid UTF-8 is
    /// replaced lossily.
    pub fn to_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                None => String::new(),
            })
            .collect()
    }

    /// Re-encodes the command as the array of bulk strings a client would send.
    pub fn to_frame(&self) -> Frame {
        Frame::Array(
            self.args
                .iter()
                .map(|arg| arg.clone().map_or(Frame::Null, Frame::Bulk))
                .collect(),
        )
    }
}

impl TryFrom<Frame> for Command {
    type Error = CodecError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CodecError::InvalidFrame {
                    expected: "array",
                    actual: frame,
                })
            }
        };

        let mut args = Vec::with_capacity(frames.len());
        flatten(frames, &mut args)?;

        Ok(Self { args })
    }
}

// Nested arrays contribute their tokens depth-first, in order.
fn flatten(frames: Vec<Frame>, args: &mut Vec<Option<Bytes>>) -> Result<(), CodecError> {
    for frame in frames {
        match frame {
            Frame::Bulk(bytes) => args.push(Some(bytes)),
            Frame::Null => args.push(None),
            Frame::Integer(i) => args.push(Some(Bytes::from(i.to_string()))),
            Frame::Simple(bytes) => args.push(Some(bytes)),
            Frame::Array(nested) => flatten(nested, args)?,
            Frame::Error(_) => {
                return Err(CodecError::UnsupportedType(u8::from(DataType::SimpleError)))
            }
        }
    }
    Ok(())
}
