use crate::runtime::records::percent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Queued/completed counters shared by the engine and every worker.
///
/// Both counters only ever grow. `total_queued` stops moving once input is
/// closed, which is what makes the reported percentage monotonic.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total_queued: AtomicU64,
    total_completed: AtomicU64,
    input_closed: AtomicBool,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new queued total.
    pub fn record_queued(&self) -> u64 {
        self.total_queued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the new completed total.
    pub fn record_completed(&self, count: u64) -> u64 {
        self.total_completed.fetch_add(count, Ordering::SeqCst) + count
    }

    pub fn close_input(&self) {
        self.input_closed.store(true, Ordering::SeqCst);
    }

    pub fn is_input_closed(&self) -> bool {
        self.input_closed.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> u64 {
        self.total_queued.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.total_completed.load(Ordering::SeqCst)
    }

    pub fn percent_complete(&self) -> u8 {
        percent(self.completed(), self.queued())
    }
}
