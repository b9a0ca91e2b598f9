use std::sync::atomic::{AtomicU64, Ordering};

/// A hybrid-logical clock value, as carried on table server responses.
/// Servers propagate these so that clients observe a time at or after
/// every commit they have seen.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HybridTime(pub u64);

impl HybridTime {
    pub const MIN: HybridTime = HybridTime(0);
}

impl std::fmt::Display for HybridTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ht{{{}}}", self.0)
    }
}

/// ReadPoint tracks the highest hybrid time observed from successful
/// responses. Reads issued at or after this point see every write the
/// client has been told about.
#[derive(Debug, Default)]
pub struct ReadPoint(AtomicU64);

impl ReadPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the read point. Observations are monotonic: a stale
    /// value leaves the point unchanged.
    pub fn observe(&self, ht: HybridTime) {
        self.0.fetch_max(ht.0, Ordering::AcqRel);
    }

    pub fn get(&self) -> HybridTime {
        HybridTime(self.0.load(Ordering::Acquire))
    }
}
