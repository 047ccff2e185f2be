use crate::profile::ParticipantId;
use std::collections::{HashSet, VecDeque};

/// FIFO queue of participants looking for a partner. A participant appears
/// at most once; removal by id works from any position so a concurrent
/// search cancellation cannot leave a stale entry.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<ParticipantId>,
    members: HashSet<ParticipantId>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back. Returns false if the participant was already
    /// queued, which callers report as `AlreadySearching`.
    pub fn enqueue(&mut self, id: ParticipantId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Remove from any position. Idempotent.
    pub fn remove(&mut self, id: ParticipantId) -> bool {
        if !self.members.remove(&id) {
            return false;
        }
        self.order.retain(|entry| *entry != id);
        true
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Arrival order, front first.
    pub fn iter(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.order.iter().copied()
    }
}
