use crate::{Error, Result};

/// Folds per-operation failures into the batch-level flush status.
///
/// Individual `(op, error)` pairs always go to the external
/// [`crate::ErrorSink`]; this type only decides what the terminal
/// callback sees. It mutates under the batcher lock, so it never calls
/// the sink itself.
pub(crate) struct ErrorAggregator {
    combine: bool,
    had_errors: bool,
    combined: Option<Error>,
}

impl ErrorAggregator {
    pub fn new(combine: bool) -> Self {
        Self {
            combine,
            had_errors: false,
            combined: None,
        }
    }

    pub fn record(&mut self, error: &Error) {
        self.had_errors = true;
        if !self.combine {
            return;
        }
        match &self.combined {
            None => self.combined = Some(error.clone()),
            // The first error wins; a second error of a different kind
            // collapses the batch status to the combined sentinel.
            Some(prev) if same_kind(prev, error) => {}
            Some(_) => self.combined = Some(Error::Combined),
        }
    }

    pub fn had_errors(&self) -> bool {
        self.had_errors
    }

    pub fn terminal_status(&self) -> Result<()> {
        if !self.had_errors {
            return Ok(());
        }
        if self.combine {
            Err(self.combined.clone().unwrap_or(Error::FlushFailed))
        } else {
            Err(Error::FlushFailed)
        }
    }
}

fn same_kind(a: &Error, b: &Error) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}
