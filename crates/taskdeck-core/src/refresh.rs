//! Periodic pull of both collections from the service.
//!
//! A refresh is an ordinary queued action, so it only runs after every write issued
//! before it. At most one refresh waits in the queue at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::queue::{Applied, SyncAction, SyncQueue};
use crate::remote::RemoteError;
use crate::session::{Session, SyncContext};

pub const REFRESH_LABEL: &str = "refresh";

struct RefreshSync {
    ctx: SyncContext,
    queued: Arc<AtomicBool>,
}

#[async_trait]
impl SyncAction for RefreshSync {
    fn label(&self) -> String {
        REFRESH_LABEL.to_string()
    }

    async fn attempt(&mut self) -> Result<Applied, RemoteError> {
        // A refresh requested from here on must queue behind this one.
        self.queued.store(false, Ordering::SeqCst);

        let remote = self.ctx.remote.clone();
        let (tasks, categories) = tokio::try_join!(remote.list_tasks(), remote.list_categories())?;
        info!(
            tasks = tasks.len(),
            categories = categories.len(),
            "refreshed from service"
        );

        self.ctx.store.lock().replace_from_remote(tasks, categories);
        Ok(Applied::Committed)
    }

    fn abandon(self: Box<Self>, error: &RemoteError) {
        self.queued.store(false, Ordering::SeqCst);
        warn!(error = %error, "refresh failed; keeping local state");
    }
}

fn enqueue_refresh(ctx: &SyncContext, queue: &SyncQueue, queued: &Arc<AtomicBool>) -> bool {
    if queued.swap(true, Ordering::SeqCst) {
        debug!("refresh already queued");
        return false;
    }
    queue.enqueue(Box::new(RefreshSync {
        ctx: ctx.clone(),
        queued: queued.clone(),
    }));
    true
}

/// Ticks every `period`, first tick one period after start (the session queues the
/// initial refresh itself).
pub(crate) fn spawn_refresh_timer(
    ctx: SyncContext,
    queue: SyncQueue,
    queued: Arc<AtomicBool>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            enqueue_refresh(&ctx, &queue, &queued);
        }
    })
}

impl Session {
    /// Queues a refresh unless one is already waiting. Returns whether one was queued.
    pub fn request_refresh(&self) -> bool {
        enqueue_refresh(&self.ctx, &self.queue, &self.refresh_queued)
    }
}
