use crate::payloads::TransferPayload;
use crate::peer::PeerId;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// This is an abstraction for the overlay the protocol runs on: emitting a
///  payload towards a peer, and the directory of currently reachable peers.
///  It also facilitates mocking the I/O part away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OverlayEndpoint: Send + Sync + 'static {
    /// Fire-and-forget emission of one payload. The overlay wraps the payload
    ///  in its own envelope (addressing, signing) and sends it as a single
    ///  datagram; delivery is best-effort and implementations must be cheap -
    ///  the protocol provides no flow control towards the transport.
    async fn send_payload(&self, to: &PeerId, payload: TransferPayload);

    /// The peers the overlay can currently reach. Transfers to peers not in
    ///  this set are queued rather than started.
    async fn connected_peers(&self) -> Vec<PeerId>;
}
