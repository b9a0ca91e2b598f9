use super::in_flight::InFlightOp;
use crate::op::OpGroup;
use crate::tablet::Tablet;
use std::sync::Arc;

/// A settled operation paired with the routing snapshot taken under the
/// batcher lock, so planning itself needs no locks.
pub(crate) struct PlannedOp {
    pub op: Arc<InFlightOp>,
    pub tablet: Arc<Tablet>,
    pub group: OpGroup,
}

/// A maximal slice of operations sharing one tablet and group,
/// dispatched together as a single RPC.
pub(crate) struct Run {
    pub tablet: Arc<Tablet>,
    pub group: OpGroup,
    pub ops: Vec<Arc<InFlightOp>>,
}

/// Order settled operations and slice them into dispatch runs.
///
/// Operations sort by (tablet identity, group, sequence number): tablets
/// define dispatch units, the group selects endpoint and consistency,
/// and the sequence number keeps writes in admission order. A new run
/// starts whenever tablet or group change, or when appending a
/// sidecar-returning op to a run already holding `max_sidecar_slices`
/// of them.
pub(crate) fn plan_runs(mut ops: Vec<PlannedOp>, max_sidecar_slices: usize) -> Vec<Run> {
    let max_sidecar_slices = max_sidecar_slices.max(1);

    // Tablet handles are shared per tablet, so identity is the grouping key.
    ops.sort_by_key(|p| {
        (
            Arc::as_ptr(&p.tablet) as usize,
            p.group,
            p.op.sequence_number,
        )
    });

    let mut runs: Vec<Run> = Vec::new();
    let mut sidecars = 0;

    for planned in ops {
        let returns_sidecar = planned.op.op.returns_sidecar();
        let cut = match runs.last() {
            None => true,
            Some(run) => {
                !Arc::ptr_eq(&run.tablet, &planned.tablet)
                    || run.group != planned.group
                    || (returns_sidecar && sidecars >= max_sidecar_slices)
            }
        };
        if cut {
            runs.push(Run {
                tablet: planned.tablet.clone(),
                group: planned.group,
                ops: Vec::new(),
            });
            sidecars = 0;
        }
        if returns_sidecar {
            sidecars += 1;
        }
        runs.last_mut().unwrap().ops.push(planned.op);
    }

    runs
}
