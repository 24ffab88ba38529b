use std::time::Duration;
use thiserror::Error;

/// Terminal failure of a single transfer, delivered through
///  [`TransferListener::on_error`](crate::listener::TransferListener::on_error).
///
/// Every error is fatal for the flow it concerns: the transfer is gone by the
///  time the callback fires. Receive-side errors caused by the sender (size,
///  value) are additionally reported back over the wire as an error payload.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The blob is larger than the configured `binary_size_limit`. Raised at
    ///  admission on the send side, at write-request receipt or during
    ///  accumulation on the receive side.
    #[error("transfer '{id}': size {size} exceeds the limit of {limit} bytes")]
    SizeExceeded { id: String, size: usize, limit: usize },

    /// A write request advertised a data size of zero.
    #[error("transfer '{id}': write request advertises no data")]
    InvalidDataSize { id: String },

    /// A write request arrived while an unrelated transfer with that peer was
    ///  active.
    #[error("transfer '{id}': peer is busy with another transfer")]
    PeerBusy { id: String },

    /// No forward progress within the timeout interval.
    #[error("transfer '{id}': no progress within {interval:?}")]
    Timeout { id: String, interval: Duration },

    /// The remote side aborted the flow; `message` is the peer's own wording.
    #[error("peer reported an error: {message}")]
    Remote { message: String, info: String },
}
