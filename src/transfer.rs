use crate::peer::PeerId;
use std::cmp::min;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TransferDirection {
    Outgoing,
    Incoming,
}

/// Mutable state of a single in-flight flow. Owned exclusively by the
///  protocol's per-peer maps; nothing outside the protocol task ever holds a
///  reference to one.
#[derive(Debug)]
pub struct Transfer {
    pub direction: TransferDirection,
    pub peer_id: PeerId,
    /// application-assigned name of the blob
    pub id: String,
    /// opaque routing hint, echoed to the application on completion
    pub info: Vec<u8>,
    /// distinguishes concurrent attempts of the same `id`
    pub nonce: u64,
    /// expected total bytes (incoming) resp. actual bytes (outgoing)
    pub data_size: usize,
    pub block_count: u32,
    /// The next block index this side expects to handle: the next block to
    ///  transmit (outgoing) resp. to accept (incoming). Doubles as the number
    ///  of confirmed blocks, which keeps the "no blocks yet" initial state
    ///  representable without a sentinel.
    pub block_number: u32,
    /// `block_number` as of the most recently sent acknowledgement (receive
    ///  side only)
    pub acknowledgement_number: u32,
    /// current window in blocks
    pub window_size: u32,
    /// the blob: source (outgoing) resp. accumulating reassembly buffer
    ///  (incoming)
    pub data: Vec<u8>,
    /// acknowledgement re-sends since the last forward progress
    pub attempt: u32,
    /// time of the last forward progress
    pub updated: Instant,
    pub released: bool,

    /// integer percentage up to which progress was already reported
    progress_floor: u32,
}

impl Transfer {
    pub fn new_outgoing(
        peer_id: PeerId,
        id: String,
        info: Vec<u8>,
        nonce: u64,
        data: Vec<u8>,
        block_count: u32,
        window_size: u32,
        now: Instant,
    ) -> Transfer {
        let data_size = data.len();
        Transfer {
            direction: TransferDirection::Outgoing,
            peer_id,
            id,
            info,
            nonce,
            data_size,
            block_count,
            block_number: 0,
            acknowledgement_number: 0,
            window_size,
            data,
            attempt: 0,
            updated: now,
            released: false,
            progress_floor: 0,
        }
    }

    pub fn new_incoming(
        peer_id: PeerId,
        id: String,
        info: Vec<u8>,
        nonce: u64,
        data_size: usize,
        block_count: u32,
        window_size: u32,
        now: Instant,
    ) -> Transfer {
        Transfer {
            direction: TransferDirection::Incoming,
            peer_id,
            id,
            info,
            nonce,
            data_size,
            block_count,
            block_number: 0,
            acknowledgement_number: 0,
            window_size,
            data: Vec::with_capacity(data_size),
            attempt: 0,
            updated: now,
            released: false,
            progress_floor: 0,
        }
    }

    /// The bytes of one block of the blob. The final block may be short.
    pub fn block_payload(&self, block: u32, block_size: usize) -> &[u8] {
        let start = min(block as usize * block_size, self.data.len());
        let end = min(start + block_size, self.data.len());
        &self.data[start..end]
    }

    /// percentage of confirmed blocks, in `[0, 100]`
    pub fn progress_percent(&self) -> f64 {
        100.0 * self.block_number as f64 / self.block_count as f64
    }

    /// True when the integer percentage of confirmed blocks has grown past
    ///  the value stored by the previous call. Integer arithmetic, so repeated
    ///  calls at the same position never re-fire.
    pub fn crossed_progress_marker(&mut self) -> bool {
        let floor = (100 * self.block_number as u64 / self.block_count as u64) as u32;
        if floor > self.progress_floor {
            self.progress_floor = floor;
            true
        }
        else {
            false
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.updated = now;
    }

    /// Terminal: drops the buffer and blocks all further mutation. Idempotent.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.released = true;
    }
}
