use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::BatchPipeline;
use crate::{ProgressEvent, RunError, RunOutcome, RunRequest, RunState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("a batch run is already in progress")]
    Busy,
}

/// Owns a pipeline and allows at most one run of it at a time.
pub struct BatchRunner {
    pipeline: Arc<BatchPipeline>,
    active: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(pipeline: BatchPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a worker has not yet reached a terminal state.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Spawn a worker task for `request`.
    ///
    /// Fails with [`StartError::Busy`] while another run is active. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, StartError> {
        let guard = RunGuard::acquire(&self.active).ok_or(StartError::Busy)?;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let cancel = CancellationToken::new();

        let pipeline = Arc::clone(&self.pipeline);
        let worker_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            pipeline
                .run(request, progress_tx, state_tx, worker_cancel)
                .await
        });

        Ok(RunHandle {
            progress: progress_rx,
            state: state_rx,
            cancel,
            join,
        })
    }
}

/// Marks a runner busy until dropped. Travels with the worker task, so it is
/// released on completion, failure, cancellation and panic alike.
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Caller's side of an active run.
pub struct RunHandle {
    progress: mpsc::UnboundedReceiver<ProgressEvent>,
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Next progress event; `None` once the worker has stopped reporting.
    pub async fn next_progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Wait for the terminal event.
    pub async fn wait(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(RunError::Worker(e.to_string())),
        }
    }
}
