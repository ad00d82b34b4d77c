//! Transport trait consumed by the synchronization engine

use std::sync::Arc;

use crate::error::TransportError;
use crate::types::PeerId;

/// Callback invoked by a transport for every inbound datagram.
///
/// Runs on the transport's own execution context (receive task or radio
/// interrupt), so it must return quickly.
pub type ReceiveHandler = Arc<dyn Fn(PeerId, &[u8]) + Send + Sync>;

/// Best-effort datagram transport between named peers
pub trait Transport: Send + Sync {
    /// Bring the link up on `channel`.
    ///
    /// # Errors
    /// Returns [`TransportError`] if the radio or socket cannot be used.
    fn bring_up(&self, channel: u8) -> Result<(), TransportError>;

    /// Route inbound datagrams to `handler`, replacing any previous one.
    fn set_receive_handler(&self, handler: ReceiveHandler);

    /// Register `peer` as a destination.
    ///
    /// Idempotent: returns `true` if the peer is registered afterwards,
    /// including when it already was.
    fn add_peer(&self, peer: PeerId) -> bool;

    /// Whether `peer` is registered.
    fn peer_exists(&self, peer: &PeerId) -> bool;

    /// Queue `bytes` for delivery to `peer`. Returns `false` if the
    /// datagram could not be handed to the link.
    fn send(&self, peer: &PeerId, bytes: &[u8]) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn bring_up(&self, channel: u8) -> Result<(), TransportError> {
        (**self).bring_up(channel)
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        (**self).set_receive_handler(handler);
    }

    fn add_peer(&self, peer: PeerId) -> bool {
        (**self).add_peer(peer)
    }

    fn peer_exists(&self, peer: &PeerId) -> bool {
        (**self).peer_exists(peer)
    }

    fn send(&self, peer: &PeerId, bytes: &[u8]) -> bool {
        (**self).send(peer, bytes)
    }
}
