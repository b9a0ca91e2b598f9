pub mod batcher;
pub mod clock;
pub mod config;
pub mod executor;
pub mod op;
pub mod sink;
pub mod tablet;
pub mod transport;
pub mod txn;

pub use batcher::{Batcher, BatcherBuilder, BatcherState, FlushCallback};
pub use clock::{HybridTime, ReadPoint};
pub use config::BatcherConfig;
pub use executor::{CallbackExecutor, TokioCallbackExecutor, Work};
pub use op::{OpGroup, OpKind, Partitioning, TableOp, TableRef};
pub use sink::ErrorSink;
pub use tablet::{Tablet, TabletLocator};
pub use transport::{
    ReadConsistency, ReadRequest, ReadResponse, RowError, Transport, WriteRequest, WriteResponse,
};
pub use txn::{Prepare, ReadyCallback, TransactionContext, TxnMetadata};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("operation has no usable partition key: {0}")]
    BadKey(String),

    #[error("batcher is {0}")]
    InvalidState(&'static str),

    #[error("tablet lookup failed: {0}")]
    LookupFailed(String),

    #[error("batch was aborted")]
    Aborted,

    #[error("rpc to tablet {tablet} failed: {message}")]
    RpcFailed { tablet: String, message: String },

    #[error("row {row_index} was rejected: {message}")]
    RowError { row_index: usize, message: String },

    #[error("transaction was not ready: {0}")]
    TransactionNotReady(String),

    #[error("errors occurred while flushing operations")]
    FlushFailed,

    #[error("multiple failures")]
    Combined,
}
