use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every firing of one activation.
///
/// All operations are single atomic instructions or CAS loops: they never
/// block, never allocate and are safe from any execution context.
#[derive(Debug, Default)]
pub struct InjectionState {
    events: AtomicU64,
    injections: AtomicU64,
}

impl InjectionState {
    pub const fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            injections: AtomicU64::new(0),
        }
    }

    pub fn read_injection_count(&self) -> u64 {
        self.injections.load(Ordering::Acquire)
    }

    /// Compare-and-increment: bumps the injection counter only while it is
    /// below `max`. Returns whether this caller won an increment.
    pub fn try_increment_if_below(&self, max: u64) -> bool {
        self.injections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then(|| n + 1)
            })
            .is_ok()
    }

    /// Unique, monotonically increasing event id.
    pub fn next_event_id(&self) -> u64 {
        self.events.fetch_add(1, Ordering::Relaxed)
    }

    pub fn events_issued(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.events.store(0, Ordering::SeqCst);
        self.injections.store(0, Ordering::SeqCst);
    }
}
