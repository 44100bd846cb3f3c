// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::str::Utf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Arrays nested deeper than this are rejected instead of recursing further.
pub const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("unsupported frame data type: {0:#04x}")]
    InvalidDataType(u8),
    #[error("protocol error; invalid number {0:?}")]
    InvalidNumber(String),
    #[error("protocol error; invalid length {0}")]
    InvalidLength(i64),
    #[error("protocol error; line is not terminated by CRLF")]
    MissingCrlf,
    #[error("protocol error; invalid UTF-8 in error frame")]
    InvalidUtf8,
    #[error("protocol error; arrays nested deeper than {max} levels", max = MAX_NESTING_DEPTH)]
    NestingTooDeep,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Kept as raw bytes: a request token on a `+` line is taken verbatim.
    Simple(Bytes),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// The null bulk string (`$-1`), distinct from an empty `Bulk`.
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple(Bytes::from_static(b"OK"))
    }

    pub fn simple(text: impl Into<Bytes>) -> Frame {
        Frame::Simple(text.into())
    }

    pub fn error(msg: impl Into<String>) -> Frame {
        Frame::Error(msg.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// Parses a single frame starting at the cursor position.
    ///
    /// On success the cursor sits on the first byte after the frame. When the
    /// buffer ends before the frame does, `Error::Incomplete` is returned and
    /// the cursor position is meaningless.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?;
                Ok(Frame::Simple(Bytes::copy_from_slice(line)))
            }
            DataType::SimpleError => {
                let line = get_line(src)?;
                Ok(Frame::Error(utf8(line)?.to_string()))
            }
            DataType::Integer => {
                let integer = get_number(src)?;
                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = get_number(src)?;

                if length == -1 {
                    return Ok(Frame::Null);
                }
                let length = usize::try_from(length).map_err(|_| Error::InvalidLength(length))?;

                // The payload is binary safe, so it is read by length rather than
                // by scanning for a terminator.
                if src.remaining() < length + CRLF.len() {
                    return Err(Error::Incomplete);
                }

                let start = src.position() as usize;
                let data = &src.get_ref()[start..start + length];
                if &src.get_ref()[start + length..start + length + CRLF.len()] != CRLF {
                    return Err(Error::MissingCrlf);
                }
                let data = Bytes::copy_from_slice(data);
                src.advance(length + CRLF.len());

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = get_number(src)?;

                if length == -1 {
                    return Ok(Frame::Null);
                }
                let length = usize::try_from(length).map_err(|_| Error::InvalidLength(length))?;

                if depth >= MAX_NESTING_DEPTH {
                    return Err(Error::NestingTooDeep);
                }

                // Every element takes at least three bytes, so a bogus length
                // cannot make us allocate more than the buffer could ever hold.
                let mut frames = Vec::with_capacity(length.min(src.remaining() / 3));
                for _ in 0..length {
                    let frame = Self::parse_nested(src, depth + 1)?;
                    frames.push(frame);
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    /// Appends the wire representation of the frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                dst.put_slice(s);
                dst.put_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::SimpleError));
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.reserve(1 + 20 + CRLF.len() + bytes.len() + CRLF.len());
                dst.put_u8(u8::from(DataType::BulkString));
                dst.put_slice(bytes.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Frame::Null => {
                dst.put_u8(u8::from(DataType::BulkString));
                dst.put_slice(b"-1");
                dst.put_slice(CRLF);
            }
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                dst.put_slice(arr.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                for frame in arr {
                    frame.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.write_to(&mut bytes);
        bytes.to_vec()
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

// Used for logging only, byte payloads are rendered lossily.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", String::from_utf8_lossy(s)),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Returns the bytes of the next line, without its terminator.
///
/// A line ends at the first `\r`, which must be followed by `\n`.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let cr = buf[start..]
        .iter()
        .position(|b| *b == b'\r')
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    match buf.get(cr + 1) {
        None => return Err(Error::Incomplete),
        Some(b'\n') => {}
        Some(_) => return Err(Error::MissingCrlf),
    }

    src.set_position((cr + CRLF.len()) as u64);

    Ok(&buf[start..cr])
}

fn get_number(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidNumber(String::from_utf8_lossy(line).into_owned()))
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    Ok(std::str::from_utf8(bytes)?)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_src: Utf8Error) -> Error {
        Error::InvalidUtf8
    }
}
