use crate::config::TransferConfig;
use crate::endpoint::OverlayEndpoint;
use crate::error::TransferError;
use crate::listener::{TransferListener, TransferProgress, TransferState};
use crate::payloads::{
    AcknowledgementPayload, DataPayload, ErrorPayload, TransferPayload, WriteRequestPayload,
};
use crate::peer::PeerId;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::scheduler::{ScheduledTransfer, Scheduler};
use crate::task_queue::{TaskAction, TaskQueue};
use crate::transfer::{Transfer, TransferDirection};
use rustc_hash::FxHashMap;
use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, trace, warn};

/// Lower clamp bound for window sizes advertised by acknowledgements. The
///  clamp neutralizes a zero (or garbage) window that would stall the flow.
pub const MIN_WINDOW_SIZE: u32 = 1;

/// TransferProtocol is the place where all parts of the transfer core come
///  together: the public `send_binary` entry, the handlers for the four
///  payload kinds, the scheduler that serializes transfers per peer, and the
///  timer poll that drives timeouts and acknowledgement retransmission.
///
/// All state lives in a single `Inner` behind one lock; handlers run to
///  completion under it, so per-peer maps never see interleaved mutation.
pub struct TransferProtocol {
    inner: Arc<RwLock<ProtocolInner>>,
    active_handle: Option<JoinHandle<()>>,
}

impl TransferProtocol {
    pub fn new(
        self_peer: PeerId,
        endpoint: Arc<dyn OverlayEndpoint>,
        listener: Arc<dyn TransferListener>,
        config: Arc<TransferConfig>,
    ) -> anyhow::Result<TransferProtocol> {
        config.validate()?;

        let mut tasks = TaskQueue::new();
        tasks.schedule(
            Instant::now() + config.scheduled_send_interval,
            TaskAction::PumpScheduled,
        );

        let inner = ProtocolInner {
            config,
            self_peer,
            endpoint,
            listener,
            outgoing: FxHashMap::default(),
            incoming: FxHashMap::default(),
            scheduler: Scheduler::new(),
            tasks,
        };

        Ok(TransferProtocol {
            inner: Arc::new(RwLock::new(inner)),
            active_handle: None,
        })
    }

    /// Spawns the 1 Hz poll of the task heap. Without it, no timeouts fire,
    ///  no acknowledgements are retransmitted and queued transfers are only
    ///  promoted when an active transfer completes.
    pub fn spawn_active_loop(&mut self) {
        if self.active_handle.is_some() {
            warn!("active loop already spawned");
            return;
        }
        self.active_handle = Some(tokio::spawn(Self::do_loop(self.inner.clone())));
    }

    /// Stops the periodic work. In-flight transfers are abandoned in memory -
    ///  callers treat shutdown as transfer loss.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.active_handle.take() {
            handle.abort();
        }
    }

    async fn do_loop(inner: Arc<RwLock<ProtocolInner>>) {
        let mut poll_interval = interval(Duration::from_secs(1));
        loop {
            poll_interval.tick().await;
            inner.write().await.run_due_tasks(Instant::now()).await;
        }
    }

    /// Ships `data` to `peer` under the name `id`. Duplicate requests (same
    ///  `id` scheduled, active or already completed towards that peer) and
    ///  degenerate arguments are dropped silently; a request towards a busy
    ///  or unreachable peer is queued and started later in admission order.
    ///
    /// `nonce` distinguishes concurrent attempts of the same `id`; passing
    ///  None picks a random one, which is what regular callers want.
    pub async fn send_binary(
        &self,
        peer: PeerId,
        info: Vec<u8>,
        id: String,
        data: Vec<u8>,
        nonce: Option<u64>,
    ) {
        self.inner.write().await.send_binary(peer, info, id, data, nonce).await;
    }

    /// Entry point for the overlay's packet dispatch: routes a decoded
    ///  payload to its handler.
    pub async fn on_payload(&self, peer: &PeerId, payload: TransferPayload) {
        match payload {
            TransferPayload::WriteRequest(p) => self.on_write_request(peer, p).await,
            TransferPayload::Acknowledgement(p) => self.on_acknowledgement(peer, p).await,
            TransferPayload::Data(p) => self.on_data(peer, p).await,
            TransferPayload::Error(p) => self.on_error(peer, p).await,
        }
    }

    pub async fn on_write_request(&self, peer: &PeerId, payload: WriteRequestPayload) {
        self.inner.write().await.on_write_request(peer, payload).await;
    }

    pub async fn on_acknowledgement(&self, peer: &PeerId, payload: AcknowledgementPayload) {
        self.inner.write().await.on_acknowledgement(peer, payload).await;
    }

    pub async fn on_data(&self, peer: &PeerId, payload: DataPayload) {
        self.inner.write().await.on_data(peer, payload).await;
    }

    pub async fn on_error(&self, peer: &PeerId, payload: ErrorPayload) {
        self.inner.write().await.on_error(peer, payload).await;
    }
}

impl Drop for TransferProtocol {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ProtocolInner {
    config: Arc<TransferConfig>,
    self_peer: PeerId,
    endpoint: Arc<dyn OverlayEndpoint>,
    listener: Arc<dyn TransferListener>,

    /// at most one active transfer per peer and direction
    outgoing: FxHashMap<PeerId, Transfer>,
    incoming: FxHashMap<PeerId, Transfer>,

    scheduler: Scheduler,
    tasks: TaskQueue,
}

impl ProtocolInner {
    async fn send_binary(
        &mut self,
        peer: PeerId,
        info: Vec<u8>,
        id: String,
        data: Vec<u8>,
        nonce: Option<u64>,
    ) {
        if info.is_empty() || id.is_empty() || data.is_empty() {
            debug!("ignoring send request with empty info, id or data");
            return;
        }
        if peer == self.self_peer {
            debug!("ignoring send request '{}' addressed to ourselves", id);
            return;
        }
        if self.scheduler.is_scheduled(&peer, &id)
            || self.outgoing.get(&peer).map(|t| t.id == id).unwrap_or(false)
            || self.scheduler.is_finished_outgoing(&peer, &id)
        {
            debug!("ignoring duplicate send request '{}' for {}", id, peer);
            return;
        }

        let scheduled = ScheduledTransfer {
            block_count: block_count_for(data.len(), self.config.block_size),
            nonce: nonce.unwrap_or_else(rand::random),
            info,
            data,
            id,
        };

        if self.is_busy(&peer) || !self.is_connected(&peer).await {
            self.enqueue_scheduled(peer, scheduled).await;
            return;
        }
        self.start_outgoing_transfer(&peer, scheduled).await;
    }

    /// Installs an outgoing transfer and opens the flow with a write request.
    ///  Admission may have changed since the request was accepted (another
    ///  transfer started, the peer dropped off), so it is re-verified here; an
    ///  inadmissible request goes (back) to the queue.
    async fn start_outgoing_transfer(&mut self, peer: &PeerId, scheduled: ScheduledTransfer) {
        if self.is_busy(peer) || !self.is_connected(peer).await {
            self.enqueue_scheduled(peer.clone(), scheduled).await;
            return;
        }

        if scheduled.data.len() > self.config.binary_size_limit {
            warn!(
                "rejecting outgoing transfer '{}' to {}: {} bytes exceed the limit",
                scheduled.id, peer, scheduled.data.len()
            );
            let error = TransferError::SizeExceeded {
                id: scheduled.id,
                size: scheduled.data.len(),
                limit: self.config.binary_size_limit,
            };
            // no flow exists on the remote side yet, so no error packet
            self.listener.on_error(peer, error).await;
            return;
        }

        let now = Instant::now();
        let write_request = WriteRequestPayload {
            data_size: scheduled.data.len().prechecked_cast(),
            block_count: scheduled.block_count,
            nonce: scheduled.nonce,
            id: scheduled.id.clone(),
            info: scheduled.info.clone(),
        };
        let transfer = Transfer::new_outgoing(
            peer.clone(),
            scheduled.id,
            scheduled.info,
            scheduled.nonce,
            scheduled.data,
            scheduled.block_count,
            self.config.window_size_in_blocks,
            now,
        );
        debug!(
            "starting outgoing transfer '{}' to {}: {} bytes in {} blocks",
            transfer.id, peer, transfer.data_size, transfer.block_count
        );

        self.outgoing.insert(peer.clone(), transfer);
        self.tasks.schedule(
            now + self.config.timeout_interval,
            TaskAction::TerminateByTimeout {
                peer: peer.clone(),
                direction: TransferDirection::Outgoing,
                nonce: write_request.nonce,
            },
        );
        self.endpoint
            .send_payload(peer, TransferPayload::WriteRequest(write_request))
            .await;
    }

    async fn enqueue_scheduled(&mut self, peer: PeerId, scheduled: ScheduledTransfer) {
        debug!("peer {} is busy or unreachable - queueing transfer '{}'", peer, scheduled.id);

        let progress = TransferProgress {
            id: scheduled.id.clone(),
            state: TransferState::Scheduled,
            progress: 0.0,
        };
        let info = scheduled.info.clone();
        self.scheduler.enqueue(peer.clone(), scheduled);
        self.listener.on_receive_progress(&peer, &info, progress).await;
    }

    async fn on_acknowledgement(&mut self, peer: &PeerId, payload: AcknowledgementPayload) {
        let window_clamp: u32 = self.config.binary_size_limit.prechecked_cast();
        let block_size = self.config.block_size;

        let Some(transfer) = self.outgoing.get_mut(peer) else {
            trace!("acknowledgement from {} without an outgoing transfer - dropping", peer);
            return;
        };
        if payload.nonce != transfer.nonce {
            trace!("acknowledgement from {} for a different flow - dropping", peer);
            return;
        }
        if payload.number < transfer.block_number {
            trace!(
                "stale acknowledgement #{} from {} (at #{}) - dropping",
                payload.number, peer, transfer.block_number
            );
            return;
        }

        transfer.block_number = payload.number;
        if transfer.block_number >= transfer.block_count {
            self.finish_outgoing_transfer(peer).await;
            return;
        }

        transfer.window_size = payload.window_size.clamp(MIN_WINDOW_SIZE, window_clamp);
        transfer.touch(Instant::now());

        let first = transfer.block_number;
        let last = min(first.saturating_add(transfer.window_size), transfer.block_count);
        let nonce = transfer.nonce;
        trace!("sending blocks [{}, {}) of '{}' to {}", first, last, transfer.id, peer);

        let packets = (first..last)
            .map(|block| {
                TransferPayload::Data(DataPayload {
                    block_number: block,
                    nonce,
                    data: transfer.block_payload(block, block_size).to_vec(),
                })
            })
            .collect::<Vec<_>>();

        for packet in packets {
            self.endpoint.send_payload(peer, packet).await;
        }
    }

    async fn finish_outgoing_transfer(&mut self, peer: &PeerId) {
        let Some(mut transfer) = self.outgoing.remove(peer) else {
            return;
        };
        let data = std::mem::take(&mut transfer.data);
        transfer.release();
        self.scheduler.mark_finished_outgoing(peer.clone(), transfer.id.clone());
        debug!("outgoing transfer '{}' to {} finished ({} bytes)", transfer.id, peer, data.len());

        self.listener
            .on_send_complete(peer, &transfer.info, &data, transfer.nonce)
            .await;
        self.send_scheduled().await;
    }

    async fn on_write_request(&mut self, peer: &PeerId, payload: WriteRequestPayload) {
        if let Some(existing) = self.incoming.get(peer) {
            if existing.id == payload.id {
                trace!("write request from {} for running transfer '{}' - dropping", peer, payload.id);
                return;
            }
        }
        if self.scheduler.is_finished_incoming(peer, &payload.id) {
            trace!("write request from {} for finished transfer '{}' - dropping", peer, payload.id);
            return;
        }

        let data_size: usize = payload.data_size.safe_cast();
        let rejection = if payload.data_size == 0 {
            Some(TransferError::InvalidDataSize { id: payload.id.clone() })
        }
        else if data_size > self.config.binary_size_limit {
            Some(TransferError::SizeExceeded {
                id: payload.id.clone(),
                size: data_size,
                limit: self.config.binary_size_limit,
            })
        }
        else if self.is_busy(peer) {
            Some(TransferError::PeerBusy { id: payload.id.clone() })
        }
        else {
            None
        };
        if let Some(error) = rejection {
            warn!("rejecting write request '{}' from {}: {}", payload.id, peer, error);
            self.send_error_packet(peer, &error, &payload.info).await;
            self.listener.on_error(peer, error).await;
            return;
        }

        let now = Instant::now();
        let nonce = payload.nonce;
        let transfer = Transfer::new_incoming(
            peer.clone(),
            payload.id,
            payload.info,
            nonce,
            data_size,
            payload.block_count,
            self.config.window_size_in_blocks,
            now,
        );
        debug!(
            "starting incoming transfer '{}' from {}: {} bytes in {} blocks",
            transfer.id, peer, data_size, transfer.block_count
        );
        self.incoming.insert(peer.clone(), transfer);

        self.send_acknowledgement(peer).await;
        self.tasks.schedule(
            now + self.config.timeout_interval,
            TaskAction::TerminateByTimeout {
                peer: peer.clone(),
                direction: TransferDirection::Incoming,
                nonce,
            },
        );
        self.tasks.schedule(
            now + self.config.retransmit_interval,
            TaskAction::ResendAcknowledgement { peer: peer.clone(), nonce },
        );
    }

    async fn on_data(&mut self, peer: &PeerId, payload: DataPayload) {
        let limit = self.config.binary_size_limit;

        let Some(transfer) = self.incoming.get_mut(peer) else {
            trace!("data packet from {} without an incoming transfer - dropping", peer);
            return;
        };
        if payload.nonce != transfer.nonce {
            trace!("data packet from {} for a different flow - dropping", peer);
            return;
        }
        if payload.block_number != transfer.block_number {
            // strict in-order: reordered and lost blocks are not buffered,
            //  recovery is the acknowledgement retransmit loop
            trace!(
                "out-of-order block #{} from {} (expecting #{}) - dropping",
                payload.block_number, peer, transfer.block_number
            );
            return;
        }

        transfer.block_number += 1;

        let crossed_marker = transfer.crossed_progress_marker();
        let progress_event = if payload.block_number == 0 {
            Some((
                transfer.info.clone(),
                TransferProgress {
                    id: transfer.id.clone(),
                    state: TransferState::Initializing,
                    progress: 0.0,
                },
            ))
        }
        else if crossed_marker {
            Some((
                transfer.info.clone(),
                TransferProgress {
                    id: transfer.id.clone(),
                    state: TransferState::Downloading,
                    progress: transfer.progress_percent(),
                },
            ))
        }
        else {
            None
        };

        transfer.data.extend_from_slice(&payload.data);
        if transfer.data.len() > limit {
            let error = TransferError::SizeExceeded {
                id: transfer.id.clone(),
                size: transfer.data.len(),
                limit,
            };
            let info = transfer.info.clone();
            warn!("aborting incoming transfer from {}: {}", peer, error);
            self.send_error_packet(peer, &error, &info).await;
            self.listener.on_error(peer, error).await;
            self.terminate_incoming(peer);
            return;
        }

        transfer.attempt = 0;
        transfer.touch(Instant::now());

        let is_final = transfer.block_number >= transfer.block_count;
        let window_exhausted =
            transfer.acknowledgement_number.saturating_add(transfer.window_size) <= transfer.block_number;

        if let Some((info, progress)) = progress_event {
            self.listener.on_receive_progress(peer, &info, progress).await;
        }

        if is_final {
            self.send_acknowledgement(peer).await;
            self.finish_incoming_transfer(peer).await;
        }
        else if window_exhausted {
            self.send_acknowledgement(peer).await;
        }
    }

    /// Acknowledges the current position: the next block index this side
    ///  expects, plus the window the sender may emit beyond it.
    async fn send_acknowledgement(&mut self, peer: &PeerId) {
        let Some(transfer) = self.incoming.get_mut(peer) else {
            return;
        };
        transfer.acknowledgement_number = transfer.block_number;
        let payload = AcknowledgementPayload {
            number: transfer.acknowledgement_number,
            window_size: transfer.window_size,
            nonce: transfer.nonce,
        };
        trace!("acknowledging #{} of '{}' to {}", payload.number, transfer.id, peer);

        self.endpoint
            .send_payload(peer, TransferPayload::Acknowledgement(payload))
            .await;
    }

    async fn finish_incoming_transfer(&mut self, peer: &PeerId) {
        let Some(mut transfer) = self.incoming.remove(peer) else {
            return;
        };
        let data = std::mem::take(&mut transfer.data);
        transfer.release();
        self.scheduler.mark_finished_incoming(peer.clone(), transfer.id.clone());
        debug!("incoming transfer '{}' from {} finished ({} bytes)", transfer.id, peer, data.len());

        let progress = TransferProgress {
            id: transfer.id.clone(),
            state: TransferState::Finished,
            progress: 100.0,
        };
        self.listener.on_receive_progress(peer, &transfer.info, progress).await;
        self.listener
            .on_receive_complete(peer, &transfer.info, &transfer.id, &data)
            .await;
    }

    async fn on_error(&mut self, peer: &PeerId, payload: ErrorPayload) {
        let Some(mut transfer) = self.outgoing.remove(peer) else {
            trace!("error payload from {} without an outgoing transfer - dropping", peer);
            return;
        };
        transfer.release();
        warn!("peer {} aborted transfer '{}': {}", peer, transfer.id, payload.message);

        let error = TransferError::Remote {
            message: payload.message,
            info: payload.info,
        };
        self.listener.on_error(peer, error).await;
        self.send_scheduled().await;
    }

    async fn send_error_packet(&self, peer: &PeerId, error: &TransferError, info: &[u8]) {
        let payload = ErrorPayload {
            message: error.to_string(),
            info: String::from_utf8_lossy(info).into_owned(),
        };
        self.endpoint
            .send_payload(peer, TransferPayload::Error(payload))
            .await;
    }

    /// Promotes at most one queued transfer per peer that has become idle and
    ///  reachable. Invoked by the periodic pump and whenever an outgoing
    ///  transfer completes or errors.
    async fn send_scheduled(&mut self) {
        let connected = self.endpoint.connected_peers().await;
        for peer in self.scheduler.peers_with_pending() {
            if self.outgoing.contains_key(&peer) {
                continue;
            }
            if !connected.contains(&peer) {
                continue;
            }
            if let Some(next) = self.scheduler.pop_next(&peer) {
                self.start_outgoing_transfer(&peer, next).await;
            }
        }
    }

    async fn run_due_tasks(&mut self, now: Instant) {
        while let Some(action) = self.tasks.pop_due(now) {
            trace!("running due task {:?}", action);
            match action {
                TaskAction::PumpScheduled => {
                    self.tasks
                        .schedule(now + self.config.scheduled_send_interval, TaskAction::PumpScheduled);
                    self.send_scheduled().await;
                }
                TaskAction::TerminateByTimeout { peer, direction, nonce } => {
                    self.terminate_by_timeout(&peer, direction, nonce, now).await;
                }
                TaskAction::ResendAcknowledgement { peer, nonce } => {
                    self.resend_acknowledgement(&peer, nonce, now).await;
                }
            }
        }
    }

    async fn terminate_by_timeout(
        &mut self,
        peer: &PeerId,
        direction: TransferDirection,
        nonce: u64,
        now: Instant,
    ) {
        if !self.config.terminate_by_timeout_enabled {
            return;
        }
        let transfer = match direction {
            TransferDirection::Outgoing => self.outgoing.get(peer),
            TransferDirection::Incoming => self.incoming.get(peer),
        };
        let Some(transfer) = transfer else {
            return;
        };
        if transfer.nonce != nonce || transfer.released {
            return;
        }

        let idle = now.saturating_duration_since(transfer.updated);
        if idle < self.config.timeout_interval {
            // forward progress happened since this task was scheduled
            self.tasks.schedule(
                transfer.updated + self.config.timeout_interval,
                TaskAction::TerminateByTimeout { peer: peer.clone(), direction, nonce },
            );
            return;
        }

        let id = transfer.id.clone();
        warn!("terminating {:?} transfer '{}' with {}: no progress for {:?}", direction, id, peer, idle);
        match direction {
            TransferDirection::Outgoing => {
                self.terminate_outgoing(peer);
            }
            TransferDirection::Incoming => {
                self.terminate_incoming(peer);
            }
        }
        let error = TransferError::Timeout {
            id,
            interval: self.config.timeout_interval,
        };
        self.listener.on_error(peer, error).await;

        if direction == TransferDirection::Outgoing {
            self.send_scheduled().await;
        }
    }

    async fn resend_acknowledgement(&mut self, peer: &PeerId, nonce: u64, now: Instant) {
        let attempt_limit = self.config.retransmit_attempt_count;
        if attempt_limit == 0 {
            return;
        }
        let Some(transfer) = self.incoming.get_mut(peer) else {
            return;
        };
        if transfer.nonce != nonce || transfer.released {
            return;
        }
        if transfer.attempt + 1 >= attempt_limit {
            debug!(
                "giving up on re-acknowledging '{}' from {} after {} attempts",
                transfer.id, peer, transfer.attempt
            );
            return;
        }

        if now.saturating_duration_since(transfer.updated) >= self.config.retransmit_interval {
            transfer.attempt += 1;
            debug!(
                "re-acknowledging #{} of '{}' from {} (attempt {})",
                transfer.block_number, transfer.id, peer, transfer.attempt
            );
            self.send_acknowledgement(peer).await;
        }
        self.tasks.schedule(
            now + self.config.retransmit_interval,
            TaskAction::ResendAcknowledgement { peer: peer.clone(), nonce },
        );
    }

    fn terminate_outgoing(&mut self, peer: &PeerId) -> Option<Transfer> {
        let mut transfer = self.outgoing.remove(peer)?;
        transfer.release();
        Some(transfer)
    }

    fn terminate_incoming(&mut self, peer: &PeerId) -> Option<Transfer> {
        let mut transfer = self.incoming.remove(peer)?;
        transfer.release();
        Some(transfer)
    }

    fn is_busy(&self, peer: &PeerId) -> bool {
        self.outgoing.contains_key(peer) || self.incoming.contains_key(peer)
    }

    async fn is_connected(&self, peer: &PeerId) -> bool {
        self.endpoint.connected_peers().await.contains(peer)
    }
}

/// Saturates for blobs beyond the wire range - those are rejected against the
///  size limit before the count is ever used.
fn block_count_for(data_size: usize, block_size: usize) -> u32 {
    let data_size: u64 = data_size.safe_cast();
    let block_size: u64 = block_size.safe_cast();
    min(data_size.div_ceil(block_size), u32::MAX as u64) as u32
}
