use crate::clock::HybridTime;
use crate::op::TableOp;
use crate::tablet::Tablet;
use crate::txn::TxnMetadata;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Which replicas may serve a read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadConsistency {
    /// The read must be served by the tablet leader.
    Leader,
    /// Any replica may serve the read at consistent-prefix level.
    ConsistentPrefix,
}

/// One batched write RPC against a single tablet.
///
/// Operations are listed in dispatch order and remain in the batcher's
/// custody; the transport must not retain them past the call.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub ops: Vec<Arc<TableOp>>,
    /// Whether the batch spanned multiple RPCs (or a transaction forced
    /// consistency), so the server must apply a consistent read time.
    pub need_consistent: bool,
    /// The final run of a flush may execute synchronously on the serving
    /// side when the tablet is local to the caller.
    pub allow_local: bool,
    pub deadline: Instant,
    pub txn: Option<TxnMetadata>,
    /// Whether individual operations may carry transaction-metadata
    /// overrides the server must look for.
    pub txn_may_have_metadata: bool,
}

/// A row-level rejection inside an otherwise successful write RPC.
#[derive(Debug, Clone)]
pub struct RowError {
    /// Index of the offending row within the request's `ops`.
    pub row_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct WriteResponse {
    /// Server clock value carried back to keep the client's read point
    /// ahead of observed commits.
    pub propagated_hybrid_time: Option<HybridTime>,
    pub row_errors: Vec<RowError>,
}

/// One batched read RPC against a single tablet.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub ops: Vec<Arc<TableOp>>,
    pub consistency: ReadConsistency,
    pub need_consistent: bool,
    pub allow_local: bool,
    pub deadline: Instant,
    pub txn: Option<TxnMetadata>,
    pub txn_may_have_metadata: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReadResponse {
    pub propagated_hybrid_time: Option<HybridTime>,
    /// The read time the server actually used, reported back to an
    /// attached transaction.
    pub used_read_time: Option<HybridTime>,
}

/// Submits batched RPCs to tablet servers.
///
/// The wire protocol, per-RPC retry policy, and replica failover all
/// live behind this seam. An RPC-level failure is returned as an error
/// and is accounted against every operation in the request.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Maximum number of sidecar-returning operations a single RPC may
    /// carry.
    fn max_sidecar_slices(&self) -> usize;

    async fn write(&self, tablet: &Tablet, req: WriteRequest) -> Result<WriteResponse>;

    async fn read(&self, tablet: &Tablet, req: ReadRequest) -> Result<ReadResponse>;
}
