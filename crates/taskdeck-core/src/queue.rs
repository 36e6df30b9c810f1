//! Single-consumer FIFO of deferred remote work.
//!
//! Actions run strictly one at a time, in enqueue order, on a background tokio task. Each
//! attempt is bounded by a timeout and retried with exponential backoff while the failure
//! looks transient. When an action gives up it compensates for itself through
//! [`SyncAction::abandon`]; the queue keeps draining either way.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::remote::RemoteError;

/// What a successful attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Committed,
    /// Nothing left to send, e.g. the entity's create never reached the service.
    Skipped,
}

#[async_trait]
pub trait SyncAction: Send + 'static {
    fn label(&self) -> String;

    /// One try against the remote. On `Ok` the action has reconciled the local store.
    async fn attempt(&mut self) -> Result<Applied, RemoteError>;

    /// Final failure: roll back and tell the user.
    fn abandon(self: Box<Self>, error: &RemoteError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn single_attempt(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `n` (1-based): `base * 2^(n-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded { attempts: u32 },
    Skipped,
    GaveUp { attempts: u32, error: RemoteError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub label: String,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining { pending: usize },
}

impl QueueState {
    pub fn pending(self) -> usize {
        match self {
            QueueState::Idle => 0,
            QueueState::Draining { pending } => pending,
        }
    }

    fn with_pending(pending: usize) -> Self {
        if pending == 0 {
            QueueState::Idle
        } else {
            QueueState::Draining { pending }
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Idle => f.write_str("idle"),
            QueueState::Draining { pending } => write!(f, "draining ({pending} pending)"),
        }
    }
}

type BoxedAction = Box<dyn SyncAction>;

/// Cloneable handle to the queue worker. Every clone feeds the same FIFO.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::UnboundedSender<BoxedAction>,
    state: Arc<watch::Sender<QueueState>>,
    reports: broadcast::Sender<SyncReport>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncQueue {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(QueueState::Idle);
        let state = Arc::new(state);
        let (reports, _) = broadcast::channel(128);

        let worker = tokio::spawn(run_worker(rx, policy, state.clone(), reports.clone()));
        info!(?policy, "sync queue started");

        Self {
            tx,
            state,
            reports,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    pub fn enqueue(&self, action: BoxedAction) {
        let label = action.label();
        self.state
            .send_modify(|state| *state = QueueState::with_pending(state.pending() + 1));

        if self.tx.send(action).is_err() {
            warn!(action = %label, "sync queue is closed; dropping action");
            self.state
                .send_modify(|state| *state = QueueState::with_pending(state.pending().saturating_sub(1)));
            return;
        }
        debug!(action = %label, "enqueued sync action");
    }

    pub fn state(&self) -> QueueState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<QueueState> {
        self.state.subscribe()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<SyncReport> {
        self.reports.subscribe()
    }

    /// Resolves once every enqueued action has settled.
    pub async fn wait_idle(&self) {
        let mut state = self.state.subscribe();
        if state.wait_for(|state| *state == QueueState::Idle).await.is_err() {
            debug!("queue state channel closed while waiting for idle");
        }
    }

    /// Stops the worker. Actions still queued are dropped without reconciling.
    pub fn close(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let dropped = self.state().pending();
            if dropped > 0 {
                warn!(dropped, "closing sync queue with unsettled actions");
            }
            worker.abort();
            self.state.send_replace(QueueState::Idle);
            info!("sync queue closed");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<BoxedAction>,
    policy: RetryPolicy,
    state: Arc<watch::Sender<QueueState>>,
    reports: broadcast::Sender<SyncReport>,
) {
    while let Some(action) = rx.recv().await {
        let report = run_action(action, &policy).await;
        match &report.outcome {
            SyncOutcome::Succeeded { attempts } => {
                debug!(action = %report.label, attempts, "sync action succeeded")
            }
            SyncOutcome::Skipped => debug!(action = %report.label, "sync action skipped"),
            SyncOutcome::GaveUp { attempts, error } => {
                warn!(action = %report.label, attempts, error = %error, "sync action gave up")
            }
        }
        let _ = reports.send(report);
        state.send_modify(|state| *state = QueueState::with_pending(state.pending().saturating_sub(1)));
    }
    debug!("sync queue worker exiting");
}

async fn run_action(mut action: BoxedAction, policy: &RetryPolicy) -> SyncReport {
    let label = action.label();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.attempt_timeout, action.attempt()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(policy.attempt_timeout)),
        };

        let outcome = match result {
            Ok(Applied::Committed) => SyncOutcome::Succeeded { attempts },
            Ok(Applied::Skipped) => SyncOutcome::Skipped,
            Err(error) if error.is_retryable() && attempts < policy.max_attempts => {
                let delay = policy.backoff(attempts);
                debug!(action = %label, attempts, ?delay, error = %error, "retrying sync action");
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(error) => {
                action.abandon(&error);
                SyncOutcome::GaveUp { attempts, error }
            }
        };

        return SyncReport { label, outcome };
    }
}
