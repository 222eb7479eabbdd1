//! Catalog of backend-persisted chat sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{ApiError, Backend};
use crate::core::conversation::Conversation;
use crate::core::notifications::{Notification, NotificationSink};

/// Summary of a saved session as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u64,
    pub last_message_preview: Option<String>,
}

/// Identifies one refresh request. Only the most recently issued ticket may
/// apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<ChatSession>,
    issued: u64,
    applied: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions in the order the backend listed them.
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket(self.issued)
    }

    /// Replace the catalog wholesale with the result of `ticket`'s fetch.
    ///
    /// Results from a ticket older than the newest issued one are dropped.
    /// A failed fetch keeps the current list and is reported to `sink`.
    /// Returns whether the list was replaced.
    pub fn apply_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<ChatSession>, ApiError>,
        sink: &dyn NotificationSink,
    ) -> bool {
        if ticket.0 < self.issued || ticket.0 <= self.applied {
            debug!(ticket = ticket.0, latest = self.issued, "Dropping superseded session refresh");
            return false;
        }

        match result {
            Ok(sessions) => {
                debug!(count = sessions.len(), "Session list refreshed");
                self.sessions = sessions;
                self.applied = ticket.0;
                true
            }
            Err(err) => {
                warn!(error = %err, "Session list refresh failed");
                sink.notify(Notification::error("Could not load chats", err.detail()));
                false
            }
        }
    }

    pub async fn refresh(&mut self, backend: &dyn Backend, sink: &dyn NotificationSink) -> bool {
        let ticket = self.begin_refresh();
        let result = backend.list_sessions().await;
        self.apply_refresh(ticket, result, sink)
    }

    /// Start a blank conversation. The backend assigns an id on the first
    /// exchange.
    pub fn create(&self, conversation: &mut Conversation) {
        debug!("Starting new chat");
        conversation.reset();
    }

    /// Load `id`'s history into `conversation`. On failure the conversation is
    /// left untouched.
    pub async fn select(
        &self,
        id: &str,
        backend: &dyn Backend,
        conversation: &mut Conversation,
        sink: &dyn NotificationSink,
    ) -> bool {
        match backend.session_messages(id).await {
            Ok(messages) => {
                debug!(session_id = id, count = messages.len(), "Session history loaded");
                conversation.replace_history(id.to_string(), messages);
                true
            }
            Err(err) => {
                warn!(session_id = id, error = %err, "Loading session history failed");
                sink.notify(Notification::error("Could not open chat", err.detail()));
                false
            }
        }
    }

    /// Delete `id` on the backend, reset the conversation if it was active,
    /// then refresh the catalog whatever the outcome.
    pub async fn delete(
        &mut self,
        id: &str,
        backend: &dyn Backend,
        conversation: &mut Conversation,
        sink: &dyn NotificationSink,
    ) -> bool {
        let deleted = match backend.delete_session(id).await {
            Ok(()) => {
                debug!(session_id = id, "Session deleted");
                if conversation.active_session_id() == Some(id) {
                    self.create(conversation);
                }
                true
            }
            Err(err) => {
                warn!(session_id = id, error = %err, "Deleting session failed");
                sink.notify(Notification::error("Could not delete chat", err.detail()));
                false
            }
        };

        self.refresh(backend, sink).await;
        deleted
    }
}
