use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for everything the bridge does with a frame.
///
/// Dropping is expected under load, so it shows up here instead of as
/// an error.
#[derive(Debug, Default)]
pub struct RouterStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped_overflow: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) dropped_no_position: AtomicU64,
    pub(crate) dropped_no_group: AtomicU64,
    pub(crate) forwarded: AtomicU64,
    pub(crate) skipped_closed: AtomicU64,
    pub(crate) skipped_backpressure: AtomicU64,
    pub(crate) send_failures: AtomicU64,
}

/// A point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    /// Frames that made it into the queue.
    pub accepted: u64,
    /// Frames refused because the queue was full.
    pub dropped_overflow: u64,
    /// Frames the worker has finished with, delivered or not.
    pub processed: u64,
    pub dropped_no_position: u64,
    pub dropped_no_group: u64,
    /// Individual deliveries (one frame to three peers counts three).
    pub forwarded: u64,
    pub skipped_closed: u64,
    pub skipped_backpressure: u64,
    pub send_failures: u64,
}

impl RouterStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RouterStatsSnapshot {
            accepted: load(&self.accepted),
            dropped_overflow: load(&self.dropped_overflow),
            processed: load(&self.processed),
            dropped_no_position: load(&self.dropped_no_position),
            dropped_no_group: load(&self.dropped_no_group),
            forwarded: load(&self.forwarded),
            skipped_closed: load(&self.skipped_closed),
            skipped_backpressure: load(&self.skipped_backpressure),
            send_failures: load(&self.send_failures),
        }
    }
}
