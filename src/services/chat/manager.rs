use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Slot {
    send_id: u64,
    send: Option<CancellationToken>,
    generation: u64,
    attempt: Option<CancellationToken>,
}

/// Handle for one send, minted by [`InFlight::start_send`].
#[derive(Debug, Clone)]
pub struct SendTicket {
    pub id: u64,
    pub token: CancellationToken,
}

/// Handle for one attempt of a send, minted by [`InFlight::begin`].
#[derive(Debug, Clone)]
pub struct AttemptTicket {
    pub generation: u64,
    pub token: CancellationToken,
}

/// Single-flight registry: at most one send, and one attempt of it, is live.
///
/// Attempt tokens are children of the send token, so aborting the send also
/// stops whichever attempt is running. Stale attempts detect they were
/// superseded through their generation.
#[derive(Clone, Default)]
pub struct InFlight {
    // NOTE: Using std::sync::Mutex since lock is never held across .await.
    slot: Arc<Mutex<Slot>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    // The slot has no invariant a panicking holder could break.
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for a new send, cancelling the previous one.
    pub fn start_send(&self) -> SendTicket {
        let mut slot = self.slot();
        if let Some(previous) = slot.send.take() {
            previous.cancel();
        }
        slot.attempt = None;
        slot.send_id += 1;
        let token = CancellationToken::new();
        slot.send = Some(token.clone());

        SendTicket {
            id: slot.send_id,
            token,
        }
    }

    /// Mint a fresh token for the next attempt of `send`, cancelling the last one.
    ///
    /// A superseded send gets an already-cancelled ticket and leaves the live
    /// send's attempt alone.
    pub fn begin(&self, send: &SendTicket) -> AttemptTicket {
        let mut slot = self.slot();
        let token = send.token.child_token();
        if slot.send_id != send.id {
            token.cancel();
            return AttemptTicket {
                generation: 0,
                token,
            };
        }

        if let Some(previous) = slot.attempt.take() {
            previous.cancel();
        }
        slot.generation += 1;
        slot.attempt = Some(token.clone());

        AttemptTicket {
            generation: slot.generation,
            token,
        }
    }

    /// Whether no newer send has replaced `send`. An aborted send still owns
    /// the slot until it finishes.
    pub fn owns(&self, send: &SendTicket) -> bool {
        self.slot().send_id == send.id
    }

    pub fn is_current(&self, generation: u64) -> bool {
        let slot = self.slot();
        slot.generation == generation && slot.attempt.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.slot().send.is_some()
    }

    /// Cancel the live send. Returns whether there was one.
    pub fn abort(&self) -> bool {
        let mut slot = self.slot();
        slot.attempt = None;
        match slot.send.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Release the slot if `send` still owns it. Returns whether it did.
    pub fn finish(&self, send: &SendTicket) -> bool {
        let mut slot = self.slot();
        if slot.send_id != send.id {
            return false;
        }
        slot.send = None;
        slot.attempt = None;
        true
    }
}
