use super::in_flight::InFlightOp;
use super::{Batcher, BatcherState};
use crate::tablet::Tablet;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::Instant;

impl Batcher {
    /// Start resolving the tablet owning `op`. The task holds a strong
    /// reference to the batcher, so a batch cannot be dropped with
    /// lookups outstanding.
    pub(crate) fn spawn_lookup(self: &Arc<Self>, op: Arc<InFlightOp>, deadline: Instant) {
        let batcher = self.clone();
        self.handle.spawn(async move {
            let result = batcher
                .locator
                .locate(op.op.table(), &op.partition_key, deadline)
                .await;
            batcher.lookup_done(&op, result);
        });
    }

    /// A tablet lookup settled, in whatever order the locator resolved
    /// it.
    pub(crate) fn lookup_done(self: &Arc<Self>, op: &Arc<InFlightOp>, result: Result<Arc<Tablet>>) {
        let mut errors = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.outstanding_lookups -= 1;

            match (inner.state, result) {
                // The batch no longer wants the result: the op is failed
                // here, however the lookup went.
                (BatcherState::Aborted, _) => {
                    let removed = inner.remove(op);
                    debug_assert!(removed);
                    op.finish(true);
                    inner.record_error(op, Error::Aborted, &mut errors);
                }
                (_, Ok(tablet)) => {
                    tracing::trace!(
                        batcher = self.id,
                        seq = op.sequence_number,
                        tablet = %tablet,
                        "lookup settled"
                    );
                    op.set_ready(tablet);
                    inner.ready.push(op.clone());
                }
                (_, Err(error)) => {
                    let removed = inner.remove(op);
                    debug_assert!(removed);
                    op.finish(true);
                    inner.record_error(op, error, &mut errors);
                }
            }
        }

        // A failed op may have been the last thing holding the flush
        // open.
        let failed = !errors.is_empty();
        self.deliver_errors(errors);
        if failed {
            self.check_complete();
        }
        // The rendezvous: this is a no-op until the batch is flushing
        // and the final lookup has settled, which is what batches RPCs
        // instead of trickling ops out one at a time.
        self.try_dispatch();
    }
}
