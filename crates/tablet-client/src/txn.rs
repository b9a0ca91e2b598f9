use crate::clock::HybridTime;
use crate::op::TableOp;
use crate::Result;
use std::sync::Arc;

/// Metadata attached to RPCs which carry transactional operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnMetadata {
    pub txn_id: uuid::Uuid,
}

/// Outcome of asking a transaction to prepare a set of operations.
pub enum Prepare {
    /// The transaction is ready now; dispatch may proceed.
    Ready {
        metadata: TxnMetadata,
        /// Whether individual operations may carry their own metadata
        /// overrides.
        may_have_metadata: bool,
    },
    /// The transaction will invoke the readiness callback later. Until
    /// then the flush stays parked.
    Deferred,
}

pub type ReadyCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// The batch-facing surface of a distributed transaction.
///
/// `prepare` runs under the batcher's internal lock, so implementations
/// must not invoke `ready` re-entrantly from within the call; deferral
/// means the callback fires from some other thread once the transaction
/// has a status tablet and metadata. A readiness error aborts the whole
/// batch with that error.
pub trait TransactionContext: Send + Sync + 'static {
    fn prepare(
        &self,
        ops: &[Arc<TableOp>],
        force_consistent_read: bool,
        ready: ReadyCallback,
    ) -> Prepare;

    /// Notification that `ops` finished flushing (successfully or not),
    /// with the read time their RPC used, if any.
    fn flushed(&self, ops: &[Arc<TableOp>], used_read_time: Option<HybridTime>, status: &Result<()>);
}
