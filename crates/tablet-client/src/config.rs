use std::time::Duration;

/// Buffered operations may hold up to 7 MiB before the owning session
/// should apply back-pressure.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 7 * 1024 * 1024;

/// Applied when a flush begins and no timeout was ever set.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning knobs of a [`crate::Batcher`].
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct BatcherConfig {
    /// When set, reads marked follower-ok are grouped for
    /// consistent-prefix dispatch to any replica instead of the leader.
    pub allow_reads_from_followers: bool,
    /// When set, the terminal flush status combines individual failures
    /// rather than reporting a generic flush failure.
    pub combine_errors: bool,
    /// Byte budget for buffered operations, used by the owning session
    /// for admission back-pressure.
    pub max_buffer_size: usize,
    /// Time allotted to an entire flush: lookups, transaction
    /// preparation, and every dispatched RPC.
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Option<Duration>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            allow_reads_from_followers: false,
            combine_errors: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            flush_timeout: None,
        }
    }
}
