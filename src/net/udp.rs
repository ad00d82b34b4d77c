//! UDP transport for hosts.
//!
//! Peers are addressed by [`PeerId`]s packed from IPv4 socket addresses,
//! so a node's identity is simply where it listens.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;

use super::traits::{ReceiveHandler, Transport};
use crate::error::TransportError;
use crate::types::PeerId;

/// Receive buffer; comfortably larger than any sync message.
const RECV_BUF_SIZE: usize = 256;

/// [`Transport`] over a tokio UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_id: PeerId,
    peers: Mutex<HashSet<PeerId>>,
    handler: RwLock<Option<ReceiveHandler>>,
    up: AtomicBool,
}

impl UdpTransport {
    /// Bind a socket on `addr` (IPv4 only).
    ///
    /// # Errors
    /// Returns [`TransportError::UnsupportedAddress`] for IPv6 and
    /// [`TransportError::Io`] if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        if addr.is_ipv6() {
            return Err(TransportError::UnsupportedAddress(addr));
        }
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        let local_id =
            PeerId::from_socket_addr(local).ok_or(TransportError::UnsupportedAddress(local))?;
        Ok(Self {
            socket: Arc::new(socket),
            local_id,
            peers: Mutex::new(HashSet::new()),
            handler: RwLock::new(None),
            up: AtomicBool::new(false),
        })
    }

    /// Identity other nodes use to reach this socket.
    #[must_use]
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Receive datagrams until `shutdown` flips to `true` or its sender is
    /// dropped.
    ///
    /// Each datagram is handed to the registered [`ReceiveHandler`] on this
    /// task. Datagrams from IPv6 sources are ignored.
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if the socket fails.
    pub async fn run(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        tracing::debug!(local = %self.local_id, "UDP transport: receive loop starting");

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = result?;
                    let Some(sender) = PeerId::from_socket_addr(src) else {
                        continue;
                    };
                    let handler = self.handler.read().clone();
                    if let Some(handler) = handler {
                        handler(sender, &buf[..len]);
                    }
                }

                changed = shutdown.changed() => {
                    // A dropped sender can never signal again.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!(local = %self.local_id, "UDP transport shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn bring_up(&self, channel: u8) -> Result<(), TransportError> {
        // Channels are a radio concept; a bound socket is already usable.
        tracing::debug!(local = %self.local_id, channel, "UDP transport up");
        self.up.store(true, Ordering::Release);
        Ok(())
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        *self.handler.write() = Some(handler);
    }

    fn add_peer(&self, peer: PeerId) -> bool {
        self.peers.lock().insert(peer);
        true
    }

    fn peer_exists(&self, peer: &PeerId) -> bool {
        self.peers.lock().contains(peer)
    }

    fn send(&self, peer: &PeerId, bytes: &[u8]) -> bool {
        if !self.up.load(Ordering::Acquire) {
            return false;
        }
        match self.socket.try_send_to(bytes, peer.to_socket_addr()) {
            Ok(sent) => sent == bytes.len(),
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "UDP transport: send failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_id", &self.local_id)
            .field("peers", &self.peers.lock().len())
            .field("up", &self.up.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
