//! A signed-in session: the local store, its sync queue, the notice center and the
//! background timers, built from injected collaborators.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::cache::DurableCache;
use crate::config::Config;
use crate::notify::Notifications;
use crate::queue::{QueueState, RetryPolicy, SyncQueue};
use crate::refresh;
use crate::remote::RemoteClient;
use crate::store::{LocalStore, SharedStore, StoreEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// `None` disables the periodic refresh; the initial one still runs.
    pub refresh_interval: Option<Duration>,
    pub retry: RetryPolicy,
    pub notice_lifetime: Duration,
    pub count_debounce: Duration,
    pub exit_wait: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            notice_lifetime: Duration::from_millis(3000),
            count_debounce: Duration::from_millis(1000),
            exit_wait: Duration::from_secs(20),
        }
    }
}

impl SyncSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| -> anyhow::Result<Duration> {
            Ok(cfg
                .get_u64(key)?
                .map(Duration::from_millis)
                .unwrap_or(fallback))
        };
        let secs = |key: &str, fallback: Duration| -> anyhow::Result<Duration> {
            Ok(cfg
                .get_u64(key)?
                .map(Duration::from_secs)
                .unwrap_or(fallback))
        };

        let refresh = secs(
            "sync.refresh_secs",
            defaults.refresh_interval.unwrap_or(Duration::from_secs(30)),
        )?;
        let attempts = cfg
            .get_u64("sync.retry.attempts")?
            .map(|n| u32::try_from(n.max(1)))
            .transpose()
            .context("sync.retry.attempts is too large")?
            .unwrap_or(defaults.retry.max_attempts);

        Ok(Self {
            refresh_interval: (!refresh.is_zero()).then_some(refresh),
            retry: RetryPolicy {
                max_attempts: attempts,
                base_delay: millis("sync.retry.base_ms", defaults.retry.base_delay)?,
                max_delay: millis("sync.retry.max_ms", defaults.retry.max_delay)?,
                attempt_timeout: secs("sync.timeout_secs", defaults.retry.attempt_timeout)?,
            },
            notice_lifetime: millis("notice.lifetime_ms", defaults.notice_lifetime)?,
            count_debounce: millis("counts.debounce_ms", defaults.count_debounce)?,
            exit_wait: secs("sync.exit_wait_secs", defaults.exit_wait)?,
        })
    }
}

/// Everything a sync action needs to reach back into the session.
#[derive(Clone)]
pub(crate) struct SyncContext {
    pub store: SharedStore,
    pub remote: Arc<dyn RemoteClient>,
    pub notices: Notifications,
}

pub struct Session {
    pub(crate) ctx: SyncContext,
    pub(crate) queue: SyncQueue,
    pub(crate) refresh_queued: Arc<AtomicBool>,
    settings: SyncSettings,
    background: Vec<JoinHandle<()>>,
}

impl Session {
    /// Hydrates the store, starts the queue worker, the count debouncer and the refresh
    /// timer. Must be called inside a tokio runtime.
    #[instrument(skip_all)]
    pub fn start(
        remote: Arc<dyn RemoteClient>,
        cache: Arc<dyn DurableCache>,
        settings: SyncSettings,
    ) -> Self {
        let store = LocalStore::shared(cache);
        let ctx = SyncContext {
            store: store.clone(),
            remote,
            notices: Notifications::new(settings.notice_lifetime),
        };
        let queue = SyncQueue::start(settings.retry);

        let mut session = Self {
            ctx,
            queue,
            refresh_queued: Arc::new(AtomicBool::new(false)),
            settings,
            background: Vec::new(),
        };

        let debouncer = spawn_count_debouncer(store, settings.count_debounce);
        session.background.push(debouncer);

        session.request_refresh();
        if let Some(period) = settings.refresh_interval {
            let timer = refresh::spawn_refresh_timer(
                session.ctx.clone(),
                session.queue.clone(),
                session.refresh_queued.clone(),
                period,
            );
            session.background.push(timer);
        }

        info!(?settings, "session started");
        session
    }

    pub fn store(&self) -> &SharedStore {
        &self.ctx.store
    }

    pub fn notices(&self) -> &Notifications {
        &self.ctx.notices
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Waits for the queue to drain, giving up after `limit`. Returns whether it drained.
    pub async fn wait_idle_for(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.queue.wait_idle())
            .await
            .is_ok()
    }

    /// Queues a refresh behind all pending writes and waits for the queue to drain.
    pub async fn refresh_now(&self) {
        self.request_refresh();
        self.wait_idle().await;
    }

    /// Stops background work. The cache keeps the last optimistic state.
    #[instrument(skip(self))]
    pub fn close(mut self) {
        self.shutdown();
    }

    /// Stops background work and forgets all local data.
    #[instrument(skip(self))]
    pub fn sign_out(mut self) {
        self.shutdown();
        self.ctx.store.lock().clear();
        self.ctx.notices.clear();
        info!("signed out");
    }

    fn shutdown(&mut self) {
        for handle in self.background.drain(..) {
            handle.abort();
        }
        self.queue.close();
        self.ctx.store.lock().settle_category_counts();
        debug!("session background work stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
        self.queue.close();
    }
}

/// Trailing debounce over task changes: once edits pause for `delay`, counts are
/// re-derived and the categories collection is written.
fn spawn_count_debouncer(store: SharedStore, delay: Duration) -> JoinHandle<()> {
    let mut events = store.lock().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::Tasks) | Err(RecvError::Lagged(_)) => {}
                Ok(_) => continue,
                Err(RecvError::Closed) => return,
            }

            loop {
                match tokio::time::timeout(delay, events.recv()).await {
                    Err(_) => break,
                    Ok(Err(RecvError::Closed)) => return,
                    Ok(_) => continue,
                }
            }

            store.lock().settle_category_counts();
        }
    })
}
