use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Completion signal between a frame's schedule and its consumers.
///
/// A frame holds a [`FrameTicket`] while its stages run; the gate is busy
/// until the ticket drops. Anything that would mutate batch storage checks
/// the gate first and skips (or defers) its work while a frame is in flight.
#[derive(Clone, Debug, Default)]
pub struct FrameGate {
    busy: Arc<AtomicBool>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for one frame, or `None` if the previous frame has
    /// not completed yet.
    pub fn try_begin(&self) -> Option<FrameTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FrameTicket {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that a frame is in flight. Dropping it completes the frame.
#[derive(Debug)]
#[must_use = "the frame completes as soon as the ticket is dropped"]
pub struct FrameTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for FrameTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
