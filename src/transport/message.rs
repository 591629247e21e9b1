//! Byte stream over a message-oriented socket
//!
//! Incoming messages are concatenated into a byte stream; message boundaries
//! carry no meaning for detection. Every write becomes one outgoing message.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{ready, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::Connection;

/// Adapts a `Stream` of inbound messages and a `Sink` of outbound messages
/// into an `AsyncRead + AsyncWrite` connection
pub struct MessageSocket<St, Si> {
    stream: St,
    sink: Si,
    /// Unread remainder of the last inbound message
    pending: Bytes,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl<St, Si> MessageSocket<St, Si> {
    /// Wrap an upgraded socket
    ///
    /// # Parameters
    ///
    /// * `stream` - Inbound messages; end of stream is end of input
    /// * `sink` - Outbound messages; closing it closes the socket
    /// * `local_addr` / `peer_addr` - Endpoints of the underlying socket
    pub fn new(stream: St, sink: Si, local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            sink,
            pending: Bytes::new(),
            local_addr,
            peer_addr,
        }
    }

    /// Recover the wrapped halves, dropping unread input
    pub fn into_inner(self) -> (St, Si) {
        (self.stream, self.sink)
    }
}

impl<St, Si> AsyncRead for MessageSocket<St, Si>
where
    St: Stream<Item = io::Result<Bytes>> + Unpin,
    Si: Unpin,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match ready!(this.stream.poll_next_unpin(cx)) {
                // Empty messages are skipped, a zero-length read means EOF
                Some(Ok(message)) => this.pending = message,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<St, Si> AsyncWrite for MessageSocket<St, Si>
where
    St: Unpin,
    Si: Sink<Bytes, Error = io::Error> + Unpin,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.sink.poll_ready_unpin(cx))?;
        this.sink.start_send_unpin(Bytes::copy_from_slice(buf))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sink.poll_flush_unpin(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sink.poll_close_unpin(cx)
    }
}

impl<St, Si> Connection for MessageSocket<St, Si>
where
    St: Stream<Item = io::Result<Bytes>> + Unpin + Send + 'static,
    Si: Sink<Bytes, Error = io::Error> + Unpin + Send + 'static,
{
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }
}
