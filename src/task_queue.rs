use crate::peer::PeerId;
use crate::transfer::TransferDirection;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;

/// A delayed protocol action. Tasks carry the nonce of the flow they belong
///  to so a stale task firing after its transfer terminated (or was replaced
///  by a new flow for the same peer) is recognizable and drops out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskAction {
    /// periodic scheduler pump, re-enqueues itself
    PumpScheduled,
    /// terminate a transfer that made no progress for the timeout interval
    TerminateByTimeout {
        peer: PeerId,
        direction: TransferDirection,
        nonce: u64,
    },
    /// re-send the current acknowledgement of a stalled incoming transfer
    ResendAcknowledgement { peer: PeerId, nonce: u64 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScheduledTask {
    pub at: Instant,
    pub action: TaskAction,
}

//NB: ordering is by time only, and reversed, turning std's max-heap into the
//     min-heap the poll loop wants
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at)
    }
}
impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The timer subsystem's data structure: a min-heap of delayed actions,
///  drained by the protocol's 1 Hz poll loop.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<ScheduledTask>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub fn schedule(&mut self, at: Instant, action: TaskAction) {
        self.heap.push(ScheduledTask { at, action });
    }

    /// The next action whose time has come, earliest first; None when nothing
    ///  is due yet.
    pub fn pop_due(&mut self, now: Instant) -> Option<TaskAction> {
        if self.heap.peek()?.at > now {
            return None;
        }
        self.heap.pop().map(|task| task.action)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
