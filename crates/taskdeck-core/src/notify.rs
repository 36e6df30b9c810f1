//! Transient success/error banners.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeKind::Success => f.write_str("ok"),
            NoticeKind::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub raised_at: Instant,
    pub expires_at: Instant,
}

impl Notice {
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared notice center. Clones observe the same banners.
#[derive(Debug, Clone)]
pub struct Notifications {
    recent: Arc<Mutex<VecDeque<Notice>>>,
    lifetime: Duration,
}

impl Notifications {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            recent: Arc::new(Mutex::new(VecDeque::new())),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        info!(message = %message, "notice");
        self.push(NoticeKind::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(message = %message, "error notice");
        self.push(NoticeKind::Error, message);
    }

    /// Banners that have not yet been auto-dismissed.
    pub fn active(&self) -> Vec<Notice> {
        let now = Instant::now();
        self.recent
            .lock()
            .iter()
            .filter(|notice| notice.is_active(now))
            .cloned()
            .collect()
    }

    /// Everything raised recently, dismissed or not, oldest first.
    pub fn history(&self) -> Vec<Notice> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn has_active_error(&self) -> bool {
        self.active()
            .iter()
            .any(|notice| notice.kind == NoticeKind::Error)
    }

    pub fn clear(&self) {
        self.recent.lock().clear();
    }

    fn push(&self, kind: NoticeKind, message: String) {
        let raised_at = Instant::now();
        let mut recent = self.recent.lock();
        if recent.len() == HISTORY_LIMIT {
            recent.pop_front();
        }
        recent.push_back(Notice {
            kind,
            message,
            raised_at,
            expires_at: raised_at + self.lifetime,
        });
    }
}
