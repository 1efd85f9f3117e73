//! Cooperative cancellation and progress reporting for detection runs.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress of a run, reported once per finished channel.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub run: &'a str,
    pub channel: &'a str,
    pub completed: usize,
    pub total: usize,
}

/// Progress hook; returning `ControlFlow::Break(())` cancels the run.
pub type ProgressFn = dyn Fn(&Progress<'_>) -> ControlFlow<()> + Send + Sync;

/// Cancellation handle passed explicitly into every run.
///
/// Cloning shares the token, so a clone kept by a signal handler cancels the run
/// it was taken from.
#[derive(Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    progress: Option<Arc<ProgressFn>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an externally owned token, e.g. one shared with a Ctrl-C handler.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, progress: None }
    }

    pub fn with_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Progress<'_>) -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(hook));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Invokes the progress hook, if any.
    pub fn report(&self, progress: &Progress<'_>) -> ControlFlow<()> {
        match &self.progress {
            Some(hook) => hook(progress),
            None => ControlFlow::Continue(()),
        }
    }
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
