//! Data forwarding module
//!
//! This module replays the detection prefix to the backend and then forwards
//! data between the client and the backend in both directions.

use std::io;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Result;

/// Bytes moved by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to backend, replayed prefix included
    pub client_to_backend: u64,
    /// Backend to client
    pub backend_to_client: u64,
}

/// Write the bytes consumed during detection to the backend
pub async fn replay_prefix<W>(backend: &mut W, prefix: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if prefix.is_empty() {
        return Ok(());
    }
    backend.write_all(prefix).await?;
    backend.flush().await?;
    trace!("Replayed {} prefix bytes", prefix.len());
    Ok(())
}

/// Forward data between two streams
///
/// The prefix is written to the backend before any further client bytes.
/// Each direction waits for its write to complete before reading again, so
/// a slow reader slows the opposite writer down. When one side reaches EOF
/// the other side's write half is shut down and the remaining direction
/// keeps running; an error in either direction ends both.
///
/// # Parameters
///
/// * `client` - Client stream, positioned after the prefix
/// * `backend` - Backend stream
/// * `prefix` - Bytes read from the client during detection
/// * `buffer_size` - Size of each direction's copy buffer
///
/// # Returns
///
/// Returns the number of bytes forwarded in each direction
pub async fn proxy_data<C, B>(client: C, mut backend: B, prefix: &[u8], buffer_size: usize) -> Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    B: AsyncRead + AsyncWrite + Unpin + Send,
{
    replay_prefix(&mut backend, prefix).await?;

    let (mut client_reader, mut client_writer) = tokio::io::split(client);
    let (mut backend_reader, mut backend_writer) = tokio::io::split(backend);

    let client_to_backend = pump(&mut client_reader, &mut backend_writer, buffer_size, "Client to backend");
    let backend_to_client = pump(&mut backend_reader, &mut client_writer, buffer_size, "Backend to client");

    let (sent, received) = tokio::try_join!(client_to_backend, backend_to_client)?;

    Ok(RelayStats {
        client_to_backend: prefix.len() as u64 + sent,
        backend_to_client: received,
    })
}

/// Copy one direction until EOF, then close the destination for writing
async fn pump<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, direction: &str) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total_bytes = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
        total_bytes += n as u64;
    }

    debug!("{} transferred {} bytes total", direction, total_bytes);

    // The peer may already be gone; the bytes it could take were delivered
    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown failed: {}", direction, e);
    }
    Ok(total_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::GatewayError;
    use crate::transport::tests::create_tcp_pair;

    #[tokio::test]
    async fn test_prefix_then_both_directions() {
        let (mut client, gateway_client_side) = create_tcp_pair().await;
        let (gateway_backend_side, mut backend) = create_tcp_pair().await;

        let relay = tokio::spawn(async move {
            proxy_data(gateway_client_side, gateway_backend_side, b"HELLO ", 16).await
        });

        client.write_all(b"world").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HELLO world");

        backend.write_all(b"ok").await.unwrap();
        backend.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ok");

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats { client_to_backend: 11, backend_to_client: 2 });
    }

    #[tokio::test]
    async fn test_half_close_keeps_other_direction() {
        let (mut client, gateway_client_side) = create_tcp_pair().await;
        let (gateway_backend_side, mut backend) = create_tcp_pair().await;

        let relay = tokio::spawn(async move {
            proxy_data(gateway_client_side, gateway_backend_side, b"", 4).await
        });

        // Client is done sending but still waits for the answer
        client.write_all(b"request").await.unwrap();
        client.shutdown().await.unwrap();

        let mut request = Vec::new();
        backend.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        let response = vec![7u8; 10_000];
        backend.write_all(&response).await.unwrap();
        drop(backend);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, response);

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.backend_to_client, 10_000);
    }

    #[tokio::test]
    async fn test_replay_prefix_empty() {
        let mut sink = Vec::new();
        replay_prefix(&mut sink, b"").await.unwrap();
        replay_prefix(&mut sink, b"AMQP").await.unwrap();
        assert_eq!(sink, b"AMQP");
    }

    #[tokio::test]
    async fn test_write_error_is_reported() {
        let (_client, gateway_client_side) = create_tcp_pair().await;

        // Backend writes fail: its peer is gone
        let (backend_half, peer) = tokio::io::duplex(1);
        drop(peer);

        let result = proxy_data(gateway_client_side, backend_half, b"prefix", 8).await;
        assert!(matches!(result, Err(GatewayError::Io(_))));
    }
}
