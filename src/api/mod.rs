//! Wire payloads exchanged with the chat backend.
//!
//! Field names here are contractual. Response payloads are deliberately
//! lenient: backends in the wild disagree on ids (string vs integer), on
//! timestamp formats, and on whether lists come bare or wrapped in an object.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::core::message::{Message, Role, UsageStats};
use crate::core::providers::{normalize_provider, CapabilityMap, ProviderCapability};
use crate::core::sessions::ChatSession;

pub mod client;
pub mod error;

pub use client::{Backend, HttpBackend};
pub use error::ApiError;

const UNTITLED_SESSION: &str = "Untitled chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /chat`.
///
/// Carries both `messages` (full history) and `message` (newest user turn) so
/// backends speaking either dialect can serve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub messages: Vec<ChatMessage>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub api_keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageStats>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub session_id: Option<String>,
}

impl ChatResponse {
    /// Reply text: `content` when non-empty, `response` otherwise.
    pub fn text(&self) -> &str {
        self.content
            .as_deref()
            .filter(|content| !content.is_empty())
            .or(self.response.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummaryPayload {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub message_count: Option<u64>,
    #[serde(default, alias = "last_message")]
    pub last_message_preview: Option<String>,
}

impl SessionSummaryPayload {
    pub fn into_session(self, received_at: DateTime<Utc>) -> ChatSession {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(created_at);
        let title = self
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| UNTITLED_SESSION.to_string());

        ChatSession {
            id: self.id,
            title,
            created_at,
            updated_at,
            message_count: self.message_count.unwrap_or(0),
            last_message_preview: self.last_message_preview.filter(|p| !p.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SessionListPayload {
    List(Vec<SessionSummaryPayload>),
    Wrapped { sessions: Vec<SessionSummaryPayload> },
}

impl SessionListPayload {
    pub fn into_sessions(self, received_at: DateTime<Utc>) -> Vec<ChatSession> {
        let items = match self {
            SessionListPayload::List(items) | SessionListPayload::Wrapped { sessions: items } => {
                items
            }
        };
        items
            .into_iter()
            .map(|item| item.into_session(received_at))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecordPayload {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageStats>,
}

impl MessageRecordPayload {
    /// Convert into a transcript message, or `None` when the role is not one
    /// the transcript knows how to hold.
    pub fn into_message(self, received_at: DateTime<Utc>) -> Option<Message> {
        let role = match Role::try_from(self.role.as_str()) {
            Ok(role) => role,
            Err(err) => {
                debug!(error = %err, "Skipping history record");
                return None;
            }
        };

        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);
        let mut message = Message::new(role, self.content).with_timestamp(timestamp);
        if let Some(id) = self.id {
            message = message.with_id(id);
        }
        message.provider = self.provider;
        message.model = self.model;
        message.usage = self.usage;
        Some(message)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageListPayload {
    List(Vec<MessageRecordPayload>),
    Wrapped { messages: Vec<MessageRecordPayload> },
}

impl MessageListPayload {
    pub fn into_messages(self, received_at: DateTime<Utc>) -> Vec<Message> {
        let items = match self {
            MessageListPayload::List(items) | MessageListPayload::Wrapped { messages: items } => {
                items
            }
        };
        items
            .into_iter()
            .filter_map(|item| item.into_message(received_at))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl CapabilityPayload {
    fn provider_name(&self) -> Option<String> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .map(normalize_provider)
            .filter(|name| !name.is_empty())
    }
}

impl From<CapabilityPayload> for ProviderCapability {
    fn from(payload: CapabilityPayload) -> Self {
        ProviderCapability {
            available: payload.available.or(payload.enabled).unwrap_or(false),
            models: payload.models,
            default_model: payload.default_model.filter(|m| !m.trim().is_empty()),
        }
    }
}

/// Capability responses come as a bare list, a list wrapped under
/// `providers`/`agents`, or a map keyed by provider name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CapabilityListPayload {
    List(Vec<CapabilityPayload>),
    Wrapped {
        #[serde(alias = "agents")]
        providers: Box<CapabilityListPayload>,
    },
    Map(BTreeMap<String, CapabilityPayload>),
}

impl CapabilityListPayload {
    pub fn into_capabilities(self) -> CapabilityMap {
        match self {
            CapabilityListPayload::List(items) => items
                .into_iter()
                .filter_map(|item| {
                    let name = item.provider_name()?;
                    Some((name, ProviderCapability::from(item)))
                })
                .collect(),
            CapabilityListPayload::Wrapped { providers } => providers.into_capabilities(),
            CapabilityListPayload::Map(entries) => entries
                .into_iter()
                .map(|(name, item)| (normalize_provider(&name), ProviderCapability::from(item)))
                .collect(),
        }
    }
}

/// Parse a backend timestamp: RFC 3339, or a naive ISO-8601 string which is
/// taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?
        .map(String::from)
        .filter(|id| !id.is_empty()))
}
