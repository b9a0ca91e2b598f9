use crate::op::TableRef;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// A handle to one tablet: a contiguous partition of a table's keyspace
/// served by a replicated group.
///
/// Handles for the same tablet are shared, so the batcher groups
/// operations by handle identity rather than by id string comparison.
#[derive(Debug, PartialEq, Eq)]
pub struct Tablet {
    id: String,
}

impl Tablet {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: id.into() })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Resolves which tablet currently owns a partition key.
///
/// Lookups are asynchronous and may settle in any order relative to
/// their issue order. The locator is not asked to cancel late lookups;
/// a batch that no longer wants a result absorbs it on completion.
#[async_trait]
pub trait TabletLocator: Send + Sync + 'static {
    async fn locate(
        &self,
        table: &TableRef,
        partition_key: &[u8],
        deadline: Instant,
    ) -> Result<Arc<Tablet>>;
}
