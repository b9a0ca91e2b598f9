use crate::tablet::Tablet;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::{Arc, OnceLock};

/// A logical table served by the store.
#[derive(Debug)]
pub struct TableRef {
    pub name: String,
    pub partitioning: Partitioning,
}

/// How a table splits its keyspace across tablets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Partitioning {
    /// Keys are hashed into a 16-bit bucket space; tablets own
    /// contiguous bucket ranges. The partition key is the big-endian
    /// encoding of the bucket.
    Hash,
    /// Tablets own contiguous ranges of raw key bytes.
    Range,
}

/// The read/write discriminator of an operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpKind {
    Write,
    /// `follower_ok` marks reads which tolerate slightly stale data and
    /// may be served by any replica, such as cache-style point reads.
    Read { follower_ok: bool },
}

/// The dispatch group of an operation. Groups select both the RPC kind
/// and its consistency, and partition runs within a tablet: a write and
/// a read against the same tablet always travel in separate RPCs.
///
/// The derived ordering is the dispatch ordering of groups within one
/// tablet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpGroup {
    Write,
    LeaderRead,
    ConsistentPrefixRead,
}

impl OpGroup {
    /// Derive the group of `op`. Reads marked follower-ok are grouped
    /// for consistent-prefix dispatch only when the configuration
    /// allows replica reads at all.
    pub fn of(op: &TableOp, allow_reads_from_followers: bool) -> OpGroup {
        match op.kind {
            OpKind::Write => OpGroup::Write,
            OpKind::Read { follower_ok } if follower_ok && allow_reads_from_followers => {
                OpGroup::ConsistentPrefixRead
            }
            OpKind::Read { .. } => OpGroup::LeaderRead,
        }
    }
}

/// A single-row operation against a table.
///
/// The row payload is opaque to the batching layer; only the key takes
/// part in routing. Operations are shared between the caller and the
/// batcher, so per-operation results reported through an
/// [`crate::ErrorSink`] can be correlated by identity.
#[derive(Debug)]
pub struct TableOp {
    table: Arc<TableRef>,
    kind: OpKind,
    key: Bytes,
    payload: Bytes,
    returns_sidecar: bool,
    hash_code: OnceLock<u16>,
    tablet: Option<Arc<Tablet>>,
}

impl TableOp {
    pub fn write(table: Arc<TableRef>, key: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            table,
            kind: OpKind::Write,
            key: key.into(),
            payload: payload.into(),
            returns_sidecar: false,
            hash_code: OnceLock::new(),
            tablet: None,
        }
    }

    pub fn read(table: Arc<TableRef>, key: impl Into<Bytes>) -> Self {
        Self {
            table,
            kind: OpKind::Read { follower_ok: false },
            key: key.into(),
            payload: Bytes::new(),
            returns_sidecar: true,
            hash_code: OnceLock::new(),
            tablet: None,
        }
    }

    /// Mark a read as tolerating service by a non-leader replica.
    pub fn from_followers(mut self) -> Self {
        if let OpKind::Read { ref mut follower_ok } = self.kind {
            *follower_ok = true;
        }
        self
    }

    /// Override whether this operation returns a response sidecar.
    pub fn returning_sidecar(mut self, returns: bool) -> Self {
        self.returns_sidecar = returns;
        self
    }

    /// Pin the operation to an already-resolved tablet, bypassing lookup.
    pub fn with_tablet(mut self, tablet: Arc<Tablet>) -> Self {
        self.tablet = Some(tablet);
        self
    }

    pub fn table(&self) -> &Arc<TableRef> {
        &self.table
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, OpKind::Read { .. })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn returns_sidecar(&self) -> bool {
        self.returns_sidecar
    }

    pub fn pinned_tablet(&self) -> Option<&Arc<Tablet>> {
        self.tablet.as_ref()
    }

    /// The hash bucket recorded at admission, for hash-partitioned tables.
    pub fn hash_code(&self) -> Option<u16> {
        self.hash_code.get().copied()
    }

    pub(crate) fn set_hash_code(&self, code: u16) {
        // Re-admission of the same op computes the same code.
        let _ = self.hash_code.set(code);
    }

    /// Bytes of buffer this operation accounts for while in flight.
    pub fn buffer_size(&self) -> usize {
        self.key.len() + self.payload.len()
    }

    /// Derive the routing bytes for this operation.
    ///
    /// Hash-partitioned tables route by the big-endian encoding of the
    /// key's 16-bit hash bucket; range-partitioned tables route by the
    /// key itself.
    pub fn partition_key(&self) -> Result<Bytes> {
        match self.table.partitioning {
            Partitioning::Hash => {
                if self.key.is_empty() {
                    return Err(Error::BadKey(format!(
                        "empty key for hash-partitioned table {:?}",
                        self.table.name
                    )));
                }
                let code = hash_bucket(&self.key);
                Ok(Bytes::copy_from_slice(&code.to_be_bytes()))
            }
            Partitioning::Range => Ok(self.key.clone()),
        }
    }
}

/// Map key bytes onto the 16-bit hash bucket space.
pub fn hash_bucket(key: &[u8]) -> u16 {
    (fxhash::hash64(key) & 0xffff) as u16
}

/// Decode the bucket back out of a hash partition key.
pub(crate) fn decode_hash_bucket(partition_key: &[u8]) -> Option<u16> {
    let prefix: [u8; 2] = partition_key.get(..2)?.try_into().ok()?;
    Some(u16::from_be_bytes(prefix))
}
