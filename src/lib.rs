//! This crate is the core of a reliable bulk-binary transfer protocol layered
//!  atop an unreliable, datagram-oriented peer-to-peer overlay: it moves a
//!  single opaque byte blob of bounded size between two peers with guaranteed
//!  in-order reassembly, progress reporting, timeouts, retransmission of
//!  acknowledgements, and strict serialization of concurrent transfer
//!  attempts per peer.
//!
//! ## Design goals
//!
//! * The overlay delivers best-effort, potentially reordered, potentially
//!   dropped packets between authenticated peers - this core assumes nothing
//!   stronger
//!   * address resolution, signing and peer discovery stay in the overlay;
//!     the core consumes opaque peer identifiers and a fire-and-forget send
//!     primitive (see [`OverlayEndpoint`])
//! * The abstraction is shipping one *blob* end-to-end, not a byte stream:
//!   both sides hold the full blob in memory, bounded by a configurable size
//!   limit
//! * Simplicity over throughput on lossy paths: blocks are accepted strictly
//!   in order, and anything else is dropped rather than buffered. Lost or
//!   reordered blocks are recovered by the receiver re-sending its current
//!   acknowledgement after a quiet period, which rewinds the sender to the
//!   receiver's position
//! * At most one active transfer per peer and direction. Additional send
//!   requests to a busy (or unreachable) peer are queued and started strictly
//!   in admission order once the peer becomes idle
//! * No congestion control beyond a fixed block window, no RTT estimation,
//!   no persistence across restarts
//!
//! ## Message flow
//!
//! ```ascii
//!  Sender                                          Receiver
//!    |                                                |
//!    |  ── write-request (size, blocks, nonce, id) ─> |
//!    |                                                |
//!    |  <── acknowledgement (number=0, window) ────── |
//!    |  ── data (block 0) ──────────────────────────> |
//!    |  ── data (block 1) ──────────────────────────> |
//!    |          ... one window's worth ...            |
//!    |  <── acknowledgement (number=w, window) ────── |
//!    |          ... repeat until final block ...      |
//!    |  ── data (final block) ──────────────────────> |
//!    |  <── acknowledgement (number=block_count) ──── |
//!    |                                                |
//!   send-complete                              receive-complete
//! ```
//!
//! A transfer that makes no forward progress for the timeout interval is
//!  terminated on whichever side noticed, with an error callback. A receiver
//!  that rejects a write request (zero size, oversized, peer busy) reports
//!  the rejection back to the sender as an error payload.
//!
//! ## Payloads
//!
//! Serialized payload layout (big-endian, varint length-prefixed strings, one
//!  kind tag byte in front; the overlay wraps this in its own envelope):
//!
//! ```ascii
//! write-request:    data_size (u32), block_count (u32), nonce (u64),
//!                   id (string), info (trailing bytes)
//! acknowledgement:  number (u32), window_size (u32), nonce (u64)
//! data:             block_number (u32), nonce (u64), data (trailing bytes)
//! error:            message (string), info (string)
//! ```
//!
//! `number` in an acknowledgement is the next block index the receiver
//!  expects; the final acknowledgement therefore carries `block_count`. The
//!  nonce distinguishes concurrent attempts of the same transfer id, so a
//!  stale packet from an earlier attempt cannot corrupt a later one.
//!
//! ## Threading model
//!
//! All protocol state is owned by a single [`TransferProtocol`] instance and
//!  mutated behind one lock; packet handlers and timer actions run to
//!  completion under it. The embedder feeds decoded payloads in through
//!  [`TransferProtocol::on_payload`] and receives lifecycle callbacks through
//!  its [`TransferListener`]. One spawned task polls the timer heap at 1 Hz -
//!  nothing else runs in the background.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod payloads;
pub mod peer;
pub mod protocol;
mod safe_converter;
mod scheduler;
mod task_queue;
mod transfer;

pub use config::TransferConfig;
pub use endpoint::OverlayEndpoint;
pub use error::TransferError;
pub use listener::{TransferListener, TransferProgress, TransferState};
pub use payloads::{
    AcknowledgementPayload, DataPayload, ErrorPayload, TransferPayload, WriteRequestPayload,
};
pub use peer::PeerId;
pub use protocol::{TransferProtocol, MIN_WINDOW_SIZE};
