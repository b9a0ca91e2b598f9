//! Mock collaborators for driving a batcher end to end.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tablet_client::{
    CallbackExecutor, Error, ErrorSink, FlushCallback, HybridTime, Partitioning, Prepare,
    ReadConsistency, ReadRequest, ReadResponse, ReadyCallback, Result, RowError, TableOp, TableRef,
    Tablet, TabletLocator, TransactionContext, Transport, TxnMetadata, Work, WriteRequest,
    WriteResponse,
};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Routes partition keys to tablets by their first byte. In gated mode
/// every lookup parks until the test releases it, which is how tests
/// race lookups against flushes and aborts.
pub struct MockLocator {
    routes: Mutex<HashMap<u8, Route>>,
    gated: bool,
    held: Mutex<Vec<oneshot::Sender<()>>>,
    lookups: AtomicUsize,
}

enum Route {
    Tablet(Arc<Tablet>),
    Fail(String),
}

impl MockLocator {
    pub fn immediate() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            gated: false,
            held: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            gated: true,
            held: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn route(self: &Arc<Self>, prefix: u8, tablet: &Arc<Tablet>) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .insert(prefix, Route::Tablet(tablet.clone()));
        self.clone()
    }

    pub fn fail_route(self: &Arc<Self>, prefix: u8, message: &str) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .insert(prefix, Route::Fail(message.to_string()));
        self.clone()
    }

    /// Release the oldest parked lookup, waiting for one to park if
    /// necessary.
    pub async fn release_one(&self) {
        loop {
            let sender = {
                let mut held = self.held.lock().unwrap();
                if held.is_empty() {
                    None
                } else {
                    Some(held.remove(0))
                }
            };
            match sender {
                Some(sender) => {
                    let _ = sender.send(());
                    return;
                }
                None => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabletLocator for MockLocator {
    async fn locate(
        &self,
        _table: &TableRef,
        partition_key: &[u8],
        _deadline: Instant,
    ) -> Result<Arc<Tablet>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            let (tx, rx) = oneshot::channel();
            self.held.lock().unwrap().push(tx);
            let _ = rx.await;
        }
        let prefix = partition_key.first().copied().unwrap_or(0);
        match self.routes.lock().unwrap().get(&prefix) {
            Some(Route::Tablet(tablet)) => Ok(tablet.clone()),
            Some(Route::Fail(message)) => Err(Error::LookupFailed(message.clone())),
            None => Err(Error::LookupFailed(format!("no tablet owns prefix {prefix}"))),
        }
    }
}

/// What a mock RPC observed, in the order RPCs started executing.
#[derive(Debug, Clone)]
pub struct RpcRecord {
    pub kind: RpcKind,
    pub tablet: String,
    pub keys: Vec<Bytes>,
    pub need_consistent: bool,
    pub allow_local: bool,
    pub txn: Option<TxnMetadata>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RpcKind {
    Write,
    Read(ReadConsistency),
}

pub struct MockTransport {
    max_sidecars: usize,
    gated: bool,
    held: Mutex<Vec<oneshot::Sender<()>>>,
    records: Mutex<Vec<RpcRecord>>,
    row_errors: Mutex<HashMap<String, Vec<RowError>>>,
    failures: Mutex<HashMap<String, String>>,
    propagated: Mutex<Option<HybridTime>>,
}

impl MockTransport {
    pub fn new(max_sidecars: usize) -> Arc<Self> {
        Self::build(max_sidecars, false)
    }

    pub fn gated(max_sidecars: usize) -> Arc<Self> {
        Self::build(max_sidecars, true)
    }

    fn build(max_sidecars: usize, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            max_sidecars,
            gated,
            held: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            row_errors: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            propagated: Mutex::new(None),
        })
    }

    /// Per-row errors returned by the next write RPC against `tablet`.
    pub fn inject_row_errors(self: &Arc<Self>, tablet: &Arc<Tablet>, errors: Vec<RowError>) {
        self.row_errors
            .lock()
            .unwrap()
            .insert(tablet.id().to_string(), errors);
    }

    /// Fail every RPC against `tablet` outright.
    pub fn fail_tablet(self: &Arc<Self>, tablet: &Arc<Tablet>, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(tablet.id().to_string(), message.to_string());
    }

    pub fn propagate_hybrid_time(self: &Arc<Self>, ht: HybridTime) {
        *self.propagated.lock().unwrap() = Some(ht);
    }

    pub fn records(&self) -> Vec<RpcRecord> {
        self.records.lock().unwrap().clone()
    }

    pub async fn release_one(&self) {
        loop {
            let sender = {
                let mut held = self.held.lock().unwrap();
                if held.is_empty() {
                    None
                } else {
                    Some(held.remove(0))
                }
            };
            match sender {
                Some(sender) => {
                    let _ = sender.send(());
                    return;
                }
                None => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    async fn enter(&self, record: RpcRecord) {
        self.records.lock().unwrap().push(record);
        if self.gated {
            let (tx, rx) = oneshot::channel();
            self.held.lock().unwrap().push(tx);
            let _ = rx.await;
        }
    }

    fn check_failure(&self, tablet: &Tablet) -> Result<()> {
        match self.failures.lock().unwrap().get(tablet.id()) {
            Some(message) => Err(Error::RpcFailed {
                tablet: tablet.id().to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn max_sidecar_slices(&self) -> usize {
        self.max_sidecars
    }

    async fn write(&self, tablet: &Tablet, req: WriteRequest) -> Result<WriteResponse> {
        self.enter(RpcRecord {
            kind: RpcKind::Write,
            tablet: tablet.id().to_string(),
            keys: req.ops.iter().map(|op| op.key().clone()).collect(),
            need_consistent: req.need_consistent,
            allow_local: req.allow_local,
            txn: req.txn.clone(),
        })
        .await;
        self.check_failure(tablet)?;

        Ok(WriteResponse {
            propagated_hybrid_time: *self.propagated.lock().unwrap(),
            row_errors: self
                .row_errors
                .lock()
                .unwrap()
                .remove(tablet.id())
                .unwrap_or_default(),
        })
    }

    async fn read(&self, tablet: &Tablet, req: ReadRequest) -> Result<ReadResponse> {
        self.enter(RpcRecord {
            kind: RpcKind::Read(req.consistency),
            tablet: tablet.id().to_string(),
            keys: req.ops.iter().map(|op| op.key().clone()).collect(),
            need_consistent: req.need_consistent,
            allow_local: req.allow_local,
            txn: req.txn.clone(),
        })
        .await;
        self.check_failure(tablet)?;

        Ok(ReadResponse {
            propagated_hybrid_time: *self.propagated.lock().unwrap(),
            used_read_time: *self.propagated.lock().unwrap(),
        })
    }
}

/// Collects per-op errors the way a session would, for post-flush
/// inspection.
#[derive(Default)]
pub struct CollectingSink {
    errors: Mutex<Vec<(Arc<TableOp>, Error)>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errors(&self) -> Vec<(Arc<TableOp>, Error)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn error_for(&self, op: &Arc<TableOp>) -> Option<Error> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .find(|(failed, _)| Arc::ptr_eq(failed, op))
            .map(|(_, error)| error.clone())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ErrorSink for CollectingSink {
    fn add_error(&self, op: Arc<TableOp>, error: Error) {
        self.errors.lock().unwrap().push((op, error));
    }
}

/// A transaction which may defer its first prepare until the test fires
/// the readiness callback.
pub struct MockTxn {
    pub txn_id: uuid::Uuid,
    defer_first: bool,
    prepares: AtomicUsize,
    ready: Mutex<Option<ReadyCallback>>,
    flushed: Mutex<Vec<(usize, Option<HybridTime>, bool)>>,
}

impl MockTxn {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            txn_id: uuid::Uuid::new_v4(),
            defer_first: false,
            prepares: AtomicUsize::new(0),
            ready: Mutex::new(None),
            flushed: Mutex::new(Vec::new()),
        })
    }

    pub fn deferring() -> Arc<Self> {
        Arc::new(Self {
            txn_id: uuid::Uuid::new_v4(),
            defer_first: true,
            prepares: AtomicUsize::new(0),
            ready: Mutex::new(None),
            flushed: Mutex::new(Vec::new()),
        })
    }

    pub fn fire_ready(&self, status: Result<()>) {
        let ready = self
            .ready
            .lock()
            .unwrap()
            .take()
            .expect("no deferred prepare to release");
        ready(status);
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn flushed_calls(&self) -> Vec<(usize, Option<HybridTime>, bool)> {
        self.flushed.lock().unwrap().clone()
    }
}

impl TransactionContext for MockTxn {
    fn prepare(
        &self,
        _ops: &[Arc<TableOp>],
        force_consistent_read: bool,
        ready: ReadyCallback,
    ) -> Prepare {
        assert!(force_consistent_read);
        let attempt = self.prepares.fetch_add(1, Ordering::SeqCst);
        if self.defer_first && attempt == 0 {
            *self.ready.lock().unwrap() = Some(ready);
            return Prepare::Deferred;
        }
        Prepare::Ready {
            metadata: TxnMetadata {
                txn_id: self.txn_id,
            },
            may_have_metadata: false,
        }
    }

    fn flushed(
        &self,
        ops: &[Arc<TableOp>],
        used_read_time: Option<HybridTime>,
        status: &Result<()>,
    ) {
        self.flushed
            .lock()
            .unwrap()
            .push((ops.len(), used_read_time, status.is_ok()));
    }
}

/// Runs callbacks inline on the completing thread, which is how tests
/// prove no internal lock is held at callback time.
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn submit(&self, work: Work) -> Result<(), Work> {
        work();
        Ok(())
    }
}

/// Wire a flush callback to a oneshot the test can await.
pub fn flush_probe() -> (FlushCallback, oneshot::Receiver<Result<()>>) {
    let (tx, rx) = oneshot::channel();
    let callback: FlushCallback = Box::new(move |status| {
        let _ = tx.send(status);
    });
    (callback, rx)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn range_table(name: &str) -> Arc<TableRef> {
    Arc::new(TableRef {
        name: name.to_string(),
        partitioning: Partitioning::Range,
    })
}
