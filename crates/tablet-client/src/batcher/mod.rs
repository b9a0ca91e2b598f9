//! The client-side write/read batcher.
//!
//! A [`Batcher`] gathers single-row operations, resolves the tablet
//! owning each one, and once every lookup has settled slices the
//! batch into per-tablet RPCs. Callers learn about per-operation
//! failures through their [`ErrorSink`] and about the batch as a whole
//! through the terminal flush callback, which fires exactly once.
//!
//! Lock discipline: one batcher mutex guards the batch; each op carries
//! its own mutex, taken only while the batcher mutex is held. No user
//! callback (terminal callback, sink, transaction readiness) ever runs
//! under either lock; work for them is drained into locals under the
//! lock and performed after release.

mod aggregator;
mod dispatch;
mod in_flight;
mod lookup;
mod plan;
mod response;
mod txn_gate;

use self::aggregator::ErrorAggregator;
use self::in_flight::InFlightOp;
use crate::clock::ReadPoint;
use crate::config::{BatcherConfig, DEFAULT_FLUSH_TIMEOUT};
use crate::executor::{CallbackExecutor, TokioCallbackExecutor, Work};
use crate::op::{self, Partitioning, TableOp};
use crate::sink::ErrorSink;
use crate::tablet::TabletLocator;
use crate::transport::Transport;
use crate::txn::{TransactionContext, TxnMetadata};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Batch lifecycle. States only ever advance; `Flushed` and `Aborted`
/// are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatcherState {
    Gathering,
    Flushing,
    Flushed,
    Aborted,
}

pub type FlushCallback = Box<dyn FnOnce(Result<()>) + Send>;

static NEXT_BATCHER_ID: AtomicU64 = AtomicU64::new(1);

pub struct Batcher {
    id: u64,
    config: BatcherConfig,
    locator: Arc<dyn TabletLocator>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    executor: Arc<dyn CallbackExecutor>,
    txn: Option<Arc<dyn TransactionContext>>,
    read_point: Option<Arc<ReadPoint>>,
    handle: tokio::runtime::Handle,
    inner: Mutex<Inner>,
}

struct Inner {
    state: BatcherState,
    /// Every admitted op not yet settled, keyed by sequence number.
    ops: HashMap<u64, Arc<InFlightOp>>,
    /// Ops whose lookup settled and which await dispatch.
    ready: Vec<Arc<InFlightOp>>,
    outstanding_lookups: usize,
    next_sequence_number: u64,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    flush_callback: Option<FlushCallback>,
    buffer_bytes_used: usize,
    aggregator: ErrorAggregator,
    txn_metadata: Option<TxnMetadata>,
    txn_may_have_metadata: bool,
}

impl Inner {
    /// Caller holds the batcher lock.
    fn remove(&mut self, op: &InFlightOp) -> bool {
        match self.ops.remove(&op.sequence_number) {
            Some(_) => {
                self.buffer_bytes_used = self
                    .buffer_bytes_used
                    .saturating_sub(op.op.buffer_size());
                true
            }
            None => false,
        }
    }

    /// Fold `error` into the batch status and queue it for sink
    /// delivery once the lock is released.
    fn record_error(
        &mut self,
        op: &Arc<InFlightOp>,
        error: Error,
        pending: &mut Vec<(Arc<InFlightOp>, Error)>,
    ) {
        self.aggregator.record(&error);
        pending.push((op.clone(), error));
    }
}

pub struct BatcherBuilder {
    locator: Arc<dyn TabletLocator>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    config: BatcherConfig,
    executor: Option<Arc<dyn CallbackExecutor>>,
    txn: Option<Arc<dyn TransactionContext>>,
    read_point: Option<Arc<ReadPoint>>,
}

impl BatcherBuilder {
    pub fn new(
        locator: Arc<dyn TabletLocator>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            locator,
            transport,
            sink,
            config: BatcherConfig::default(),
            executor: None,
            txn: None,
            read_point: None,
        }
    }

    pub fn config(mut self, config: BatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a transaction. It is asked to prepare the batch before
    /// dispatch and notified as each RPC's operations settle.
    pub fn transaction(mut self, txn: Arc<dyn TransactionContext>) -> Self {
        self.txn = Some(txn);
        self
    }

    pub fn read_point(mut self, read_point: Arc<ReadPoint>) -> Self {
        self.read_point = Some(read_point);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the batcher. Must be called within a tokio runtime, which
    /// services lookups and RPC completions.
    pub fn build(self) -> Arc<Batcher> {
        Arc::new(Batcher {
            id: NEXT_BATCHER_ID.fetch_add(1, Ordering::Relaxed),
            config: self.config.clone(),
            locator: self.locator,
            transport: self.transport,
            sink: self.sink,
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(TokioCallbackExecutor::current())),
            txn: self.txn,
            read_point: self.read_point,
            handle: tokio::runtime::Handle::current(),
            inner: Mutex::new(Inner {
                state: BatcherState::Gathering,
                ops: HashMap::new(),
                ready: Vec::new(),
                outstanding_lookups: 0,
                next_sequence_number: 0,
                timeout: self.config.flush_timeout,
                deadline: None,
                flush_callback: None,
                buffer_bytes_used: 0,
                aggregator: ErrorAggregator::new(self.config.combine_errors),
                txn_metadata: None,
                txn_may_have_metadata: false,
            }),
        })
    }
}

impl Batcher {
    pub fn builder(
        locator: Arc<dyn TabletLocator>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ErrorSink>,
    ) -> BatcherBuilder {
        BatcherBuilder::new(locator, transport, sink)
    }

    /// Admit one operation into the batch and start resolving its
    /// tablet.
    ///
    /// Fails with [`Error::BadKey`] when no partition key can be
    /// derived, and with [`Error::InvalidState`] once a flush has begun.
    pub fn add(self: &Arc<Self>, op: Arc<TableOp>) -> Result<()> {
        let partition_key = op.partition_key()?;

        let (in_flight, pinned, deadline) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != BatcherState::Gathering {
                return Err(Error::InvalidState("no longer gathering operations"));
            }

            if op.table().partitioning == Partitioning::Hash {
                if let Some(code) = op::decode_hash_bucket(&partition_key) {
                    op.set_hash_code(code);
                }
            }

            let sequence = inner.next_sequence_number;
            inner.next_sequence_number += 1;
            let in_flight = InFlightOp::new(op.clone(), partition_key, sequence);
            inner.ops.insert(sequence, in_flight.clone());
            inner.outstanding_lookups += 1;
            inner.buffer_bytes_used += op.buffer_size();

            // Lookups racing ahead of flush_async run against an ad-hoc
            // deadline derived from the current timeout.
            let deadline = inner
                .deadline
                .unwrap_or_else(|| Instant::now() + inner.timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT));

            (in_flight, op.pinned_tablet().cloned(), deadline)
        };

        match pinned {
            // An already-resolved tablet shortcuts the locator entirely.
            Some(tablet) => self.lookup_done(&in_flight, Ok(tablet)),
            None => self.spawn_lookup(in_flight, deadline),
        }
        Ok(())
    }

    /// Set the time allotted to the flush. Applies to the deadline
    /// computed when `flush_async` begins.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.lock().unwrap().timeout = Some(timeout);
    }

    /// Begin flushing. Returns immediately; `callback` fires exactly
    /// once when every dispatched RPC settles or the batch aborts.
    pub fn flush_async(self: &Arc<Self>, callback: FlushCallback) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != BatcherState::Gathering {
                return Err(Error::InvalidState("already flushing"));
            }
            inner.state = BatcherState::Flushing;
            inner.flush_callback = Some(callback);

            let timeout = inner.timeout.unwrap_or_else(|| {
                static WARNED: std::sync::Once = std::sync::Once::new();
                WARNED.call_once(|| {
                    tracing::warn!(
                        default = ?DEFAULT_FLUSH_TIMEOUT,
                        "flush requested with no timeout set; applying default"
                    );
                });
                DEFAULT_FLUSH_TIMEOUT
            });
            inner.deadline = Some(Instant::now() + timeout);

            tracing::debug!(
                batcher = self.id,
                ops = inner.ops.len(),
                lookups = inner.outstanding_lookups,
                "flush started"
            );
        }

        // A batch with zero operations settles immediately.
        self.check_complete();
        self.try_dispatch();
        Ok(())
    }

    /// Abort the batch. Ops whose lookup settled but which were never
    /// handed to an RPC fail with `status`; ops still looking up settle
    /// through the lookup path; ops already dispatched complete through
    /// their RPC and are accounted normally.
    pub fn abort(self: &Arc<Self>, status: Error) {
        let (errors, callback) = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.state, BatcherState::Flushed | BatcherState::Aborted) {
                return;
            }
            inner.state = BatcherState::Aborted;
            tracing::debug!(batcher = self.id, %status, "batch aborted");

            let mut errors = Vec::new();
            for op in std::mem::take(&mut inner.ready) {
                let removed = inner.remove(&op);
                debug_assert!(removed);
                op.finish(true);
                inner.record_error(&op, status.clone(), &mut errors);
            }
            (errors, inner.flush_callback.take())
        };

        self.deliver_errors(errors);
        if let Some(callback) = callback {
            self.run_terminal(callback, Err(status));
        }
    }

    /// Whether any admitted operation has not yet settled.
    pub fn has_pending_operations(&self) -> bool {
        !self.inner.lock().unwrap().ops.is_empty()
    }

    /// Operations buffered and still awaiting a flush. Zero once
    /// flushing has begun.
    pub fn count_buffered_operations(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            BatcherState::Gathering => inner.ops.len(),
            _ => 0,
        }
    }

    /// Bytes of buffered operations charged against
    /// [`BatcherConfig::max_buffer_size`].
    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().unwrap().buffer_bytes_used
    }

    /// Whether admitting `op` would exceed the buffer budget. Admission
    /// policy belongs to the owning session; this is only the check.
    pub fn would_overflow(&self, op: &TableOp) -> bool {
        self.buffered_bytes() + op.buffer_size() > self.config.max_buffer_size
    }

    pub fn state(&self) -> BatcherState {
        self.inner.lock().unwrap().state
    }

    /// Settle the batch if it is flushing and every op is accounted for.
    /// Safe to call repeatedly; the terminal callback still fires once.
    pub(crate) fn check_complete(self: &Arc<Self>) {
        let (callback, status) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != BatcherState::Flushing || !inner.ops.is_empty() {
                return;
            }
            inner.state = BatcherState::Flushed;
            (inner.flush_callback.take(), inner.aggregator.terminal_status())
        };

        tracing::debug!(batcher = self.id, ok = status.is_ok(), "flush settled");
        if let Some(callback) = callback {
            self.run_terminal(callback, status);
        }
    }

    /// Deliver queued per-op errors to the sink. Never called with the
    /// batcher lock held.
    fn deliver_errors(&self, errors: Vec<(Arc<InFlightOp>, Error)>) {
        for (op, error) in errors {
            tracing::debug!(
                batcher = self.id,
                seq = op.sequence_number,
                %error,
                "operation failed"
            );
            self.sink.add_error(op.op.clone(), error);
        }
    }

    /// Hand the terminal callback to the executor; degrade to running
    /// it inline on the completing thread when handoff fails.
    fn run_terminal(&self, callback: FlushCallback, status: Result<()>) {
        let work: Work = Box::new(move || callback(status));
        if let Err(work) = self.executor.submit(work) {
            work();
        }
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Batcher")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("ops", &inner.ops.len())
            .field("outstanding_lookups", &inner.outstanding_lookups)
            .finish()
    }
}
