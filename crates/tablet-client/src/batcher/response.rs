use super::dispatch::{ReadRpc, WriteRpc};
use super::in_flight::InFlightOp;
use super::Batcher;
use crate::clock::HybridTime;
use crate::transport::{ReadResponse, WriteResponse};
use crate::{Error, Result};
use std::sync::Arc;

impl Batcher {
    pub(crate) fn write_rpc_done(self: &Arc<Self>, rpc: WriteRpc, result: Result<WriteResponse>) {
        let mut errors = Vec::new();
        let status = match result {
            Err(error) => {
                // An RPC-level failure counts against every op in the
                // call.
                let mut inner = self.inner.lock().unwrap();
                for op in &rpc.ops {
                    inner.record_error(op, error.clone(), &mut errors);
                }
                Err(error)
            }
            Ok(response) => {
                // Server clocks propagate through write responses too,
                // keeping subsequent reads ahead of these commits.
                self.observe_hybrid_time(response.propagated_hybrid_time);

                let mut inner = self.inner.lock().unwrap();
                for row_error in response.row_errors {
                    match rpc.ops.get(row_error.row_index) {
                        Some(op) => {
                            let error = Error::RowError {
                                row_index: row_error.row_index,
                                message: row_error.message,
                            };
                            inner.record_error(op, error, &mut errors);
                        }
                        None => tracing::error!(
                            batcher = self.id,
                            row_index = row_error.row_index,
                            ops = rpc.ops.len(),
                            "row error index out of range; skipping"
                        ),
                    }
                }
                Ok(())
            }
        };

        self.finish_rpc(&rpc.ops, None, status, errors);
    }

    pub(crate) fn read_rpc_done(self: &Arc<Self>, rpc: ReadRpc, result: Result<ReadResponse>) {
        let mut errors = Vec::new();
        let (status, used_read_time) = match result {
            Err(error) => {
                let mut inner = self.inner.lock().unwrap();
                for op in &rpc.ops {
                    inner.record_error(op, error.clone(), &mut errors);
                }
                (Err(error), None)
            }
            // Reads carry no row-level errors at this layer.
            Ok(response) => {
                self.observe_hybrid_time(response.propagated_hybrid_time);
                (Ok(()), response.used_read_time)
            }
        };

        self.finish_rpc(&rpc.ops, used_read_time, status, errors);
    }

    fn observe_hybrid_time(&self, ht: Option<HybridTime>) {
        if let (Some(ht), Some(read_point)) = (ht, &self.read_point) {
            read_point.observe(ht);
        }
    }

    /// Common settlement tail of every RPC: account its ops, notify the
    /// transaction, and maybe settle the batch.
    fn finish_rpc(
        self: &Arc<Self>,
        ops: &[Arc<InFlightOp>],
        used_read_time: Option<HybridTime>,
        status: Result<()>,
        errors: Vec<(Arc<InFlightOp>, Error)>,
    ) {
        {
            let mut inner = self.inner.lock().unwrap();
            for op in ops {
                // Every op handed to an RPC must still be tracked; a
                // miss means it settled twice or was never admitted.
                let removed = inner.remove(op);
                assert!(
                    removed,
                    "op {} is not in the in-flight set",
                    op.sequence_number
                );
                let failed =
                    status.is_err() || errors.iter().any(|(failed_op, _)| Arc::ptr_eq(failed_op, op));
                op.finish(failed);
            }
        }

        self.deliver_errors(errors);

        if let Some(txn) = &self.txn {
            let payloads: Vec<_> = ops.iter().map(|op| op.op.clone()).collect();
            txn.flushed(&payloads, used_read_time, &status);
        }

        self.check_complete();
    }
}
