use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::TransportError;
use crate::types::PeerId;

async fn loopback() -> UdpTransport {
    UdpTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_bind_rejects_ipv6() {
    let result = UdpTransport::bind("[::1]:0".parse().unwrap()).await;
    assert!(matches!(result, Err(TransportError::UnsupportedAddress(_))));
}

#[tokio::test]
async fn test_local_id_matches_bound_port() {
    let transport = loopback().await;
    let addr = transport.local_id().to_socket_addr();
    assert_eq!(addr.ip().to_string(), "127.0.0.1");
    assert_ne!(addr.port(), 0);
}

#[tokio::test]
async fn test_add_peer_is_idempotent() {
    let transport = loopback().await;
    let peer = PeerId::new([127, 0, 0, 1, 0x1F, 0x90]);

    assert!(!transport.peer_exists(&peer));
    assert!(transport.add_peer(peer));
    assert!(transport.add_peer(peer));
    assert!(transport.peer_exists(&peer));
}

#[tokio::test]
async fn test_send_requires_bring_up() {
    let a = loopback().await;
    let b = loopback().await;

    assert!(!a.send(&b.local_id(), &[1, 2, 3]));
    a.bring_up(1).unwrap();
    assert!(a.send(&b.local_id(), &[1, 2, 3]));
}

#[tokio::test]
async fn test_datagram_reaches_handler() {
    let a = loopback().await;
    let b = Arc::new(loopback().await);
    a.bring_up(0).unwrap();
    b.bring_up(0).unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.set_receive_handler(Arc::new(move |sender: PeerId, data: &[u8]| {
        let _ = tx.send((sender, data.to_vec()));
    }));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let receiver = b.clone();
    let task = tokio::spawn(async move { receiver.run(shutdown_rx).await });

    assert!(a.send(&b.local_id(), &[0xAB; 8]));

    let (sender, data) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sender, a.local_id());
    assert_eq!(data, vec![0xAB; 8]);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_returns_when_shutdown_sender_dropped() {
    let transport = Arc::new(loopback().await);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let receiver = transport.clone();
    let task = tokio::spawn(async move { receiver.run(shutdown_rx).await });

    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("receive loop should exit")
        .unwrap()
        .unwrap();
}
