//! Single-consumer event mailbox
//!
//! Store callbacks and the vote aggregator never invoke coordinator
//! logic directly; they deposit into this mailbox and the next `tick()`
//! consumes it. The shared state is deliberately tiny: one pending
//! snapshot slot and one session-lost flag, behind one lock.

use super::aggregator::VoteSnapshot;
use std::sync::Mutex;

#[derive(Default)]
struct Slots {
    pending_snapshot: Option<VoteSnapshot>,
    session_lost: bool,
}

#[derive(Default)]
pub struct EventMailbox {
    slots: Mutex<Slots>,
}

impl EventMailbox {
    /// Queue a snapshot, replacing any not-yet-consumed one.
    pub fn push_snapshot(&self, snapshot: VoteSnapshot) {
        self.slots.lock().unwrap().pending_snapshot = Some(snapshot);
    }

    pub fn take_snapshot(&self) -> Option<VoteSnapshot> {
        self.slots.lock().unwrap().pending_snapshot.take()
    }

    /// Drop a queued snapshot without consuming the session-lost flag.
    pub fn clear_snapshot(&self) {
        self.slots.lock().unwrap().pending_snapshot = None;
    }

    pub fn mark_session_lost(&self) {
        self.slots.lock().unwrap().session_lost = true;
    }

    pub fn take_session_lost(&self) -> bool {
        let mut slots = self.slots.lock().unwrap();
        std::mem::take(&mut slots.session_lost)
    }
}
