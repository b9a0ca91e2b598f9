use super::in_flight::InFlightOp;
use super::plan::{plan_runs, PlannedOp, Run};
use super::txn_gate::Gate;
use super::{Batcher, BatcherState};
use crate::op::OpGroup;
use crate::tablet::Tablet;
use crate::transport::{ReadConsistency, ReadRequest, WriteRequest};
use crate::txn::TxnMetadata;
use std::sync::Arc;
use tokio::time::Instant;

impl Batcher {
    /// Attempt to dispatch the batch.
    ///
    /// A no-op unless the batch is flushing and every admitted lookup
    /// has settled: the rendezvous guaranteeing ops travel in batched
    /// RPCs rather than one at a time. Re-entered by lookup settlement
    /// and by transaction readiness.
    pub(crate) fn try_dispatch(self: &Arc<Self>) {
        let max_sidecars = self.transport.max_sidecar_slices();

        let (planned, deadline, txn, txn_may_have_metadata, force_consistent) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != BatcherState::Flushing || inner.outstanding_lookups > 0 {
                return;
            }
            if inner.ready.is_empty() {
                return;
            }

            let force_consistent = match self.prepare_transaction(&mut inner) {
                Gate::Ready { force_consistent } => force_consistent,
                // The transaction re-enters once it is ready.
                Gate::Deferred => return,
            };

            let planned: Vec<PlannedOp> = std::mem::take(&mut inner.ready)
                .into_iter()
                .map(|op| {
                    let tablet = op.tablet().expect("ready op has a resolved tablet");
                    let group = OpGroup::of(&op.op, self.config.allow_reads_from_followers);
                    PlannedOp { op, tablet, group }
                })
                .collect();

            let deadline = inner.deadline.expect("deadline is set when a flush begins");
            (
                planned,
                deadline,
                inner.txn_metadata.clone(),
                inner.txn_may_have_metadata,
                force_consistent,
            )
        };

        // Planning is pure; it runs with no locks held.
        let runs = plan_runs(planned, max_sidecars);

        // Consistent read is required unless the whole batch fit in a
        // single run and no transaction forced it.
        let need_consistent = force_consistent || runs.len() > 1;

        // Custody transfer: every op is marked dispatched before any
        // RPC is sent, so a fast completion cannot observe a
        // half-dispatched batch.
        {
            let _guard = self.inner.lock().unwrap();
            for run in &runs {
                for op in &run.ops {
                    op.mark_dispatched();
                }
            }
        }

        tracing::debug!(
            batcher = self.id,
            runs = runs.len(),
            need_consistent,
            "dispatching batch"
        );

        let last = runs.len() - 1;
        for (index, run) in runs.into_iter().enumerate() {
            // Only the final run may execute on the calling thread.
            self.flush_buffer(
                run,
                index == last,
                need_consistent,
                deadline,
                txn.clone(),
                txn_may_have_metadata,
            );
        }
    }

    /// Turn one run into its RPC and send it.
    fn flush_buffer(
        self: &Arc<Self>,
        run: Run,
        allow_local: bool,
        need_consistent: bool,
        deadline: Instant,
        txn: Option<TxnMetadata>,
        txn_may_have_metadata: bool,
    ) {
        tracing::debug!(
            batcher = self.id,
            tablet = %run.tablet,
            group = ?run.group,
            ops = run.ops.len(),
            allow_local,
            "dispatching run"
        );

        match run.group {
            OpGroup::Write => WriteRpc {
                batcher: self.clone(),
                tablet: run.tablet,
                ops: run.ops,
                need_consistent,
                allow_local,
                deadline,
                txn,
                txn_may_have_metadata,
            }
            .send(),
            OpGroup::LeaderRead | OpGroup::ConsistentPrefixRead => ReadRpc {
                batcher: self.clone(),
                tablet: run.tablet,
                ops: run.ops,
                consistency: match run.group {
                    OpGroup::ConsistentPrefixRead => ReadConsistency::ConsistentPrefix,
                    _ => ReadConsistency::Leader,
                },
                need_consistent,
                allow_local,
                deadline,
                txn,
                txn_may_have_metadata,
            }
            .send(),
        }
    }
}

/// One write RPC in flight. Owns its ops for the duration of the call
/// and holds the batcher alive until the response is processed.
pub(crate) struct WriteRpc {
    pub batcher: Arc<Batcher>,
    pub tablet: Arc<Tablet>,
    pub ops: Vec<Arc<InFlightOp>>,
    pub need_consistent: bool,
    pub allow_local: bool,
    pub deadline: Instant,
    pub txn: Option<TxnMetadata>,
    pub txn_may_have_metadata: bool,
}

impl WriteRpc {
    pub(crate) fn send(self) {
        let batcher = self.batcher.clone();
        let handle = batcher.handle.clone();
        handle.spawn(async move {
            let request = WriteRequest {
                ops: self.ops.iter().map(|op| op.op.clone()).collect(),
                need_consistent: self.need_consistent,
                allow_local: self.allow_local,
                deadline: self.deadline,
                txn: self.txn.clone(),
                txn_may_have_metadata: self.txn_may_have_metadata,
            };
            let result = batcher.transport.write(&self.tablet, request).await;
            batcher.write_rpc_done(self, result);
        });
    }
}

/// One read RPC in flight.
pub(crate) struct ReadRpc {
    pub batcher: Arc<Batcher>,
    pub tablet: Arc<Tablet>,
    pub ops: Vec<Arc<InFlightOp>>,
    pub consistency: ReadConsistency,
    pub need_consistent: bool,
    pub allow_local: bool,
    pub deadline: Instant,
    pub txn: Option<TxnMetadata>,
    pub txn_may_have_metadata: bool,
}

impl ReadRpc {
    pub(crate) fn send(self) {
        let batcher = self.batcher.clone();
        let handle = batcher.handle.clone();
        handle.spawn(async move {
            let request = ReadRequest {
                ops: self.ops.iter().map(|op| op.op.clone()).collect(),
                consistency: self.consistency,
                need_consistent: self.need_consistent,
                allow_local: self.allow_local,
                deadline: self.deadline,
                txn: self.txn.clone(),
                txn_may_have_metadata: self.txn_may_have_metadata,
            };
            let result = batcher.transport.read(&self.tablet, request).await;
            batcher.read_rpc_done(self, result);
        });
    }
}
