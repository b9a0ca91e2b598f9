use crate::op::TableOp;
use crate::Error;
use std::sync::Arc;

/// Per-operation error accumulator, queried by the caller after a flush
/// settles.
///
/// The batcher only ever adds errors; it never reads them back. Sinks
/// are invoked without any batcher lock held, so an implementation may
/// freely call back into the batcher.
pub trait ErrorSink: Send + Sync + 'static {
    fn add_error(&self, op: Arc<TableOp>, error: Error);
}
