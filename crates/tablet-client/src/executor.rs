pub type Work = Box<dyn FnOnce() + Send>;

/// Executor onto which terminal flush callbacks are handed off, keeping
/// them away from the threads that service lookups and RPC completions.
pub trait CallbackExecutor: Send + Sync + 'static {
    /// Submit `work` for execution. On failure the work is handed back
    /// so the caller can run it inline.
    fn submit(&self, work: Work) -> Result<(), Work>;
}

/// Hands callbacks to a tokio runtime.
#[derive(Clone)]
pub struct TokioCallbackExecutor {
    handle: Option<tokio::runtime::Handle>,
}

impl TokioCallbackExecutor {
    /// Capture the ambient runtime, if any. Without one, every submit
    /// is handed back for inline execution.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl CallbackExecutor for TokioCallbackExecutor {
    fn submit(&self, work: Work) -> Result<(), Work> {
        match &self.handle {
            Some(handle) => {
                handle.spawn(async move { work() });
                Ok(())
            }
            None => Err(work),
        }
    }
}
