//! End-to-end gateway tests
//!
//! These tests run a real `GatewayService` on a loopback port in front of
//! fake backends.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use detecting_gateway::config::{BackendConfig, GatewayConfig, ProtocolConfig};
use detecting_gateway::{Gateway, GatewayHandle, GatewayService, MessageSocket};

/// AMQP 1.0 protocol header followed by an open frame with hostname "vh"
const AMQP_OPEN: &[u8] = &[
    b'A', b'M', b'Q', b'P', 0x00, 0x01, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x14, 0x02, 0x00, 0x00, 0x00,
    0x00, 0x53, 0x10, 0xc0, 0x07, 0x02, 0xa1, 0x00, 0xa1, 0x02, b'v', b'h',
];

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn start_gateway(backends: &[String]) -> (SocketAddr, GatewayHandle, tokio::task::JoinHandle<detecting_gateway::Result<()>>) {
    let config = GatewayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        backends: backends.iter().map(|b| BackendConfig::from_arg(b).unwrap()).collect(),
        detection_timeout_ms: 2000,
        ..GatewayConfig::default()
    };
    config.validate().unwrap();

    let gateway = Gateway::from_config(&config).unwrap();
    let service = GatewayService::bind(config.listen, gateway)
        .await
        .unwrap()
        .with_shutdown_grace(Duration::from_millis(500));
    let addr = service.local_addr();
    let (handle, task) = service.start();
    (addr, handle, task)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Reads everything, then answers with the SHA-256 of what it read
async fn hashing_backend(listener: TcpListener) -> Vec<u8> {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    let digest = Sha256::digest(&received);
    stream.write_all(&digest).await.unwrap();
    received
}

#[tokio::test]
async fn test_bytes_preserved_end_to_end() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_uri = format!("amqp://{}", backend.local_addr().unwrap());
    let backend_task = tokio::spawn(hashing_backend(backend));

    let (addr, handle, task) = start_gateway(&[backend_uri]).await;

    let mut sent = AMQP_OPEN.to_vec();
    sent.extend(payload(1 << 20));

    let mut client = TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = client.split();
    let write = async {
        writer.write_all(&sent).await.unwrap();
        writer.shutdown().await.unwrap();
    };
    let read = async {
        let mut digest = Vec::new();
        reader.read_to_end(&mut digest).await.unwrap();
        digest
    };
    let ((), digest) = timeout(TEST_TIMEOUT, async { tokio::join!(write, read) }).await.unwrap();

    assert_eq!(digest, Sha256::digest(&sent).to_vec());
    let received = backend_task.await.unwrap();
    assert_eq!(received.len(), sent.len());

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_virtual_host_routing_with_split_reads() {
    let pinned = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fallback = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backends = vec![
        format!("amqp://{}", fallback.local_addr().unwrap()),
        format!("amqp://{}@vh", pinned.local_addr().unwrap()),
    ];
    let (addr, handle, task) = start_gateway(&backends).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.set_nodelay(true).unwrap();
    for byte in AMQP_OPEN {
        client.write_all(&[*byte]).await.unwrap();
        sleep(Duration::from_millis(2)).await;
    }
    client.write_all(b"after").await.unwrap();
    client.shutdown().await.unwrap();

    let (mut upstream, _) = timeout(TEST_TIMEOUT, pinned.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    upstream.read_to_end(&mut received).await.unwrap();
    assert_eq!(&received[..AMQP_OPEN.len()], AMQP_OPEN);
    assert_eq!(&received[AMQP_OPEN.len()..], b"after");
    drop(upstream);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_backend_unavailable_closes_client() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backends = vec![format!("mqtt://{}", backend.local_addr().unwrap())];
    let (addr, handle, task) = start_gateway(&backends).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"CONNECT\naccept-version:1.2\nhost:broker\n\n\0").await.unwrap();

    // Closed without a single byte of reply
    let mut buf = Vec::new();
    let read = timeout(TEST_TIMEOUT, client.read_to_end(&mut buf)).await.unwrap();
    assert!(read.is_err() || buf.is_empty());

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unrecognized_client_closed_at_ceiling() {
    let (addr, handle, task) = start_gateway(&[]).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[0xff; 128]).await.unwrap();

    let mut buf = Vec::new();
    let read = timeout(TEST_TIMEOUT, client.read_to_end(&mut buf)).await.unwrap();
    assert!(read.is_err() || buf.is_empty());

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_protocol_subset_and_schemes() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = GatewayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        protocols: vec![ProtocolConfig {
            name: "stomp".to_string(),
            schemes: vec!["msg".to_string()],
            max_frame_size: None,
        }],
        backends: vec![BackendConfig::from_arg(&format!("msg://{}", backend.local_addr().unwrap())).unwrap()],
        ..GatewayConfig::default()
    };
    config.validate().unwrap();

    let service = GatewayService::bind(config.listen, Gateway::from_config(&config).unwrap())
        .await
        .unwrap()
        .with_shutdown_grace(Duration::from_millis(500));
    let addr = service.local_addr();
    let (handle, task) = service.start();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"STOMP\nhost:a\n\n\0").await.unwrap();
    client.shutdown().await.unwrap();

    let (mut upstream, _) = timeout(TEST_TIMEOUT, backend.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    upstream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"STOMP\nhost:a\n\n\0");
    drop(upstream);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_message_socket_end_to_end() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_uri = format!("amqp://{}@vh", backend.local_addr().unwrap());
    let backend_task = tokio::spawn(hashing_backend(backend));

    let (_addr, handle, task) = start_gateway(&[backend_uri]).await;

    // An upgraded transport delivering the handshake over several messages
    let (in_tx, in_rx) = mpsc::unbounded::<io::Result<Bytes>>();
    let (out_tx, mut out_rx) = mpsc::unbounded::<Bytes>();
    let sink = out_tx.sink_map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e));
    let socket = MessageSocket::new(
        in_rx,
        sink,
        "127.0.0.1:8000".parse().unwrap(),
        "127.0.0.1:40000".parse().unwrap(),
    );

    let mut sent = AMQP_OPEN.to_vec();
    sent.extend(payload(64 * 1024));
    for message in [&sent[..5], &sent[5..AMQP_OPEN.len()], &sent[AMQP_OPEN.len()..]] {
        in_tx.unbounded_send(Ok(Bytes::copy_from_slice(message))).unwrap();
    }
    drop(in_tx);

    handle.handle_connection(socket).await.unwrap();

    let reply = timeout(TEST_TIMEOUT, async {
        let mut reply = Vec::new();
        while let Some(message) = out_rx.next().await {
            reply.extend_from_slice(&message);
        }
        reply
    })
    .await
    .unwrap();

    let received = backend_task.await.unwrap();
    assert_eq!(received, sent);
    assert_eq!(reply, Sha256::digest(&sent).to_vec());

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}
