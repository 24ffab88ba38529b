use crate::error::TransferError;
use crate::peer::PeerId;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// Coarse lifecycle state reported with progress events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferState {
    /// Admitted but queued behind another transfer to the same peer (or the
    ///  peer is currently unreachable).
    Scheduled,
    /// First block received.
    Initializing,
    /// A progress marker was crossed.
    Downloading,
    /// All blocks received and reassembled.
    Finished,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferProgress {
    pub id: String,
    pub state: TransferState,
    /// percentage in `[0, 100]`, non-decreasing per transfer
    pub progress: f64,
}

/// The embedder's view of transfer lifecycles. Register one instance per
///  protocol; all callbacks are invoked inline on the protocol task, in the
///  order the corresponding protocol events occur.
///
/// NB: Implementations must not call back into the protocol from inside a
///  callback - hand work that does off to a separate task instead.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransferListener: Send + Sync + 'static {
    async fn on_receive_progress(&self, peer: &PeerId, info: &[u8], progress: TransferProgress);

    async fn on_receive_complete(&self, peer: &PeerId, info: &[u8], id: &str, data: &[u8]);

    async fn on_send_complete(&self, peer: &PeerId, info: &[u8], data: &[u8], nonce: u64);

    async fn on_error(&self, peer: &PeerId, error: TransferError);
}
