use super::{Batcher, Inner};
use crate::txn::{Prepare, ReadyCallback};
use std::sync::Arc;

pub(crate) enum Gate {
    Ready { force_consistent: bool },
    Deferred,
}

impl Batcher {
    /// Interpose the transaction, if any, before dispatch. Runs under
    /// the batcher lock as part of a dispatch attempt; the readiness
    /// callback the transaction may hold fires later, off-lock, and
    /// re-enters the attempt.
    pub(crate) fn prepare_transaction(self: &Arc<Self>, inner: &mut Inner) -> Gate {
        let Some(txn) = &self.txn else {
            return Gate::Ready {
                force_consistent: false,
            };
        };

        let payloads: Vec<_> = inner.ready.iter().map(|op| op.op.clone()).collect();

        let batcher = self.clone();
        let ready: ReadyCallback = Box::new(move |status| match status {
            Ok(()) => batcher.try_dispatch(),
            // A readiness error takes the whole batch down with it.
            Err(error) => batcher.abort(error),
        });

        match txn.prepare(&payloads, true, ready) {
            Prepare::Ready {
                metadata,
                may_have_metadata,
            } => {
                inner.txn_metadata = Some(metadata);
                inner.txn_may_have_metadata = may_have_metadata;
                Gate::Ready {
                    force_consistent: true,
                }
            }
            Prepare::Deferred => {
                tracing::debug!(
                    batcher = self.id,
                    "flush deferred until transaction is ready"
                );
                Gate::Deferred
            }
        }
    }
}
