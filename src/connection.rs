use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::codec::{CodecError, RespCodec};
use crate::command::Command;
use crate::frame::Frame;

/// One accepted client socket.
///
/// The read half is framed by [`RespCodec`], which keeps bytes that arrived
/// past the end of the current request buffered for the next read. Replies go
/// through the write half and are flushed one at a time.
pub struct Connection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    reader: FramedRead<OwnedReadHalf, RespCodec>,
    writer: FramedWrite<OwnedWriteHalf, RespCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream, client_address: SocketAddr, codec: RespCodec) -> Connection {
        let (read_half, write_half) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            client_address,
            reader: FramedRead::new(read_half, codec.clone()),
            writer: FramedWrite::new(write_half, codec),
        }
    }

    /// Reads the next request.
    ///
    /// Returns `Ok(None)` when the peer closed the connection between requests.
    /// Closing it in the middle of a request is an [`CodecError::UnexpectedEof`].
    pub async fn read_command(&mut self) -> Result<Option<Command>, CodecError> {
        self.reader.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.writer.send(frame).await
    }

    /// True when no bytes of a partially received request are buffered.
    pub fn is_idle(&self) -> bool {
        self.reader.read_buffer().is_empty()
    }
}
