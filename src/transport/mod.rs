//! Connection transports
//!
//! Detection and relaying only need a bidirectional byte stream with known
//! endpoints. Plain TCP sockets provide that directly; message-oriented
//! sockets (for example WebSocket binary frames after an upgrade) are adapted
//! by [`MessageSocket`].

mod message;

pub use message::MessageSocket;

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A client or backend byte stream
///
/// Closing is `shutdown()` on the write half, or dropping the value.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Local endpoint of the connection
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote endpoint of the connection
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Connection for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

impl Connection for Box<dyn Connection> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Create a connected pair of loopback TCP streams
    pub(crate) async fn create_tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr);
        let server = listener.accept();
        let (client, server) = tokio::join!(client, server);

        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn test_tcp_connection_addresses() {
        let (client, server) = create_tcp_pair().await;

        assert_eq!(Connection::local_addr(&client).unwrap(), Connection::peer_addr(&server).unwrap());
        assert_eq!(Connection::peer_addr(&client).unwrap(), Connection::local_addr(&server).unwrap());
    }

    #[tokio::test]
    async fn test_boxed_connection() {
        let (client, server) = create_tcp_pair().await;
        let expected = server.peer_addr().unwrap();

        let boxed: Box<dyn Connection> = Box::new(server);
        assert_eq!(boxed.peer_addr().unwrap(), expected);
        drop(client);
    }
}
