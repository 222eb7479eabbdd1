//! User-facing notifications.
//!
//! Sinks are pure consumers: they never fail and never feed back into the
//! component that reported the event.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub detail: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, detail)
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, detail)
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, detail)
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error => error!(
                title = %notification.title,
                detail = %notification.detail,
                "notification"
            ),
            kind => info!(
                kind = kind.as_str(),
                title = %notification.title,
                detail = %notification.detail,
                "notification"
            ),
        }
    }
}

/// Longest time a toast stays on screen.
pub const MAX_TOAST_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub notification: Notification,
    pub shown_at: Instant,
    pub expires_at: Instant,
}

/// Bounded queue of transient toasts for a presentation layer to poll.
///
/// The oldest toast is dropped when capacity is exceeded; every toast is
/// visible for the configured duration, capped at [`MAX_TOAST_DURATION`].
#[derive(Debug)]
pub struct ToastQueue {
    toasts: Mutex<VecDeque<Toast>>,
    capacity: usize,
    duration: Duration,
}

impl ToastQueue {
    pub fn new(capacity: usize, duration: Duration) -> Self {
        Self {
            toasts: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            duration: duration.min(MAX_TOAST_DURATION),
        }
    }

    pub fn push_at(&self, notification: Notification, now: Instant) {
        let expires_at = now.checked_add(self.duration).unwrap_or(now);
        let mut toasts = self.toasts.lock().unwrap_or_else(|p| p.into_inner());
        toasts.push_back(Toast {
            notification,
            shown_at: now,
            expires_at,
        });
        while toasts.len() > self.capacity {
            toasts.pop_front();
        }
    }

    /// Toasts still on screen at `now`; expired ones are pruned.
    pub fn visible_at(&self, now: Instant) -> Vec<Toast> {
        let mut toasts = self.toasts.lock().unwrap_or_else(|p| p.into_inner());
        toasts.retain(|toast| toast.expires_at > now);
        toasts.iter().cloned().collect()
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.visible_at(Instant::now())
    }

    pub fn dismiss_all(&self) {
        self.toasts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl NotificationSink for ToastQueue {
    fn notify(&self, notification: Notification) {
        self.push_at(notification, Instant::now());
    }
}

/// Delivers every notification to each wrapped sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}
