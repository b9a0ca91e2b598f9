use crate::op::TableOp;
use crate::tablet::Tablet;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum OpState {
    LookingUpTablet,
    ReadyToDispatch,
    Dispatched,
    Completed,
    Failed,
}

/// One admitted operation, tracked from admission until its flush
/// settles or the batch aborts.
pub(crate) struct InFlightOp {
    pub op: Arc<TableOp>,
    pub partition_key: Bytes,
    /// Assigned densely at admission; the stable tiebreaker ordering
    /// operations within one (tablet, group).
    pub sequence_number: u64,
    // Guards lookup-callback / dispatch interleavings of the mutable
    // fields. Lock order: the batcher lock is always taken first.
    inner: Mutex<Inner>,
}

struct Inner {
    state: OpState,
    tablet: Option<Arc<Tablet>>,
}

impl InFlightOp {
    pub fn new(op: Arc<TableOp>, partition_key: Bytes, sequence_number: u64) -> Arc<Self> {
        Arc::new(Self {
            op,
            partition_key,
            sequence_number,
            inner: Mutex::new(Inner {
                state: OpState::LookingUpTablet,
                tablet: None,
            }),
        })
    }

    pub fn tablet(&self) -> Option<Arc<Tablet>> {
        self.inner.lock().unwrap().tablet.clone()
    }

    /// Attach the resolved tablet and make the op eligible for dispatch.
    pub fn set_ready(&self, tablet: Arc<Tablet>) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.state, OpState::LookingUpTablet);
        inner.tablet = Some(tablet);
        inner.state = OpState::ReadyToDispatch;
    }

    pub fn mark_dispatched(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.state, OpState::ReadyToDispatch);
        inner.state = OpState::Dispatched;
    }

    pub fn finish(&self, failed: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = if failed {
            OpState::Failed
        } else {
            OpState::Completed
        };
    }
}

impl std::fmt::Debug for InFlightOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("InFlightOp")
            .field("sequence_number", &self.sequence_number)
            .field("state", &inner.state)
            .field("tablet", &inner.tablet.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}
