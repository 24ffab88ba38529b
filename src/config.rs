use anyhow::bail;
use std::time::Duration;

/// Tuning knobs of the transfer core. All values are fixed at construction
///  time; `validate()` is called by the protocol's constructor.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// Number of payload bytes per data packet. Together with the overlay's
    ///  envelope this must stay below the overlay's datagram size - the core
    ///  does not fragment blocks.
    pub block_size: usize,

    /// The window a receiver advertises in its acknowledgements: the number
    ///  of consecutive blocks the sender may emit before it has to wait for
    ///  the next acknowledgement.
    pub window_size_in_blocks: u32,

    /// How long a receiver waits without forward progress before re-sending
    ///  its current acknowledgement. This is the only recovery mechanism for
    ///  lost or reordered blocks, so it should comfortably exceed the RTT.
    pub retransmit_interval: Duration,

    /// Upper bound on acknowledgement re-sends for a stalled transfer. Zero
    ///  disables retransmission entirely.
    pub retransmit_attempt_count: u32,

    /// Period of the scheduler pump that promotes queued transfers to peers
    ///  that have become idle or reachable.
    pub scheduled_send_interval: Duration,

    /// A transfer with no forward progress for this long is terminated with a
    ///  timeout error, in both directions.
    pub timeout_interval: Duration,

    /// Hard upper bound on blob size, enforced on both sides. Both directions
    ///  hold the full blob in memory, so this bounds per-peer memory as well.
    pub binary_size_limit: usize,

    /// Disables the timeout termination (the timers still fire but take no
    ///  action). Meant for debugging, not for production use.
    pub terminate_by_timeout_enabled: bool,
}

impl Default for TransferConfig {
    fn default() -> TransferConfig {
        TransferConfig {
            block_size: 1000,
            window_size_in_blocks: 64,
            retransmit_interval: Duration::from_secs(3),
            retransmit_attempt_count: 3,
            scheduled_send_interval: Duration::from_secs(5),
            timeout_interval: Duration::from_secs(20),
            binary_size_limit: 1024 * 1024 * 1024,
            terminate_by_timeout_enabled: true,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.block_size == 0 {
            bail!("block size must not be zero");
        }
        if self.window_size_in_blocks == 0 {
            bail!("window size must not be zero");
        }
        if self.binary_size_limit == 0 {
            bail!("binary size limit must not be zero");
        }
        if self.binary_size_limit > u32::MAX as usize {
            // data_size travels as a u32 on the wire
            bail!("binary size limit must fit the wire range (max {})", u32::MAX);
        }
        if self.timeout_interval.is_zero() {
            bail!("timeout interval must not be zero");
        }
        if self.retransmit_interval.is_zero() {
            bail!("retransmit interval must not be zero");
        }
        if self.scheduled_send_interval.is_zero() {
            bail!("scheduled send interval must not be zero");
        }
        Ok(())
    }
}
