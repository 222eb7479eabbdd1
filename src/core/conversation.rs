//! The conversation state machine.
//!
//! A conversation is either `Idle` or `Pending`. `begin_send` appends the user
//! turn immediately (an optimistic update), flips to `Pending` and hands back
//! the request to dispatch; `complete` merges the backend's answer and flips
//! back to `Idle`. At most one exchange is in flight; sends made while one is
//! outstanding are rejected, not queued.
//!
//! A failed exchange leaves the user turn in place without a reply. The log is
//! append-only: nothing is retracted or edited after it has been shown.

use std::error::Error as StdError;
use std::fmt;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{parse_timestamp, ApiError, ChatRequest, ChatResponse};
use crate::core::credentials::Credentials;
use crate::core::message::Message;
use crate::core::notifications::{Notification, NotificationSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Pending,
}

/// The live view of the active session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationCursor {
    /// `None` until the backend assigns an id on the first exchange.
    pub active_session_id: Option<String>,
    pub messages: Vec<Message>,
    pub pending: bool,
}

/// Why a send was refused. Never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyInput,
    AlreadyPending,
}

impl fmt::Display for SendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendRejection::EmptyInput => write!(f, "message is empty"),
            SendRejection::AlreadyPending => write!(f, "a request is already in flight"),
        }
    }
}

impl StdError for SendRejection {}

/// Provider selection and credentials captured at send time.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub provider: String,
    pub model: Option<String>,
    pub credentials: Credentials,
}

/// A request ready to be dispatched.
#[derive(Debug)]
pub struct OutboundExchange {
    pub exchange_id: u64,
    pub request: ChatRequest,
    pub cancel_token: CancellationToken,
}

#[derive(Debug)]
pub enum ExchangeOutcome {
    Completed(ChatResponse),
    Failed(ApiError),
}

/// What `complete` did with an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An assistant message was appended. `adopted_session` is set when the
    /// response named a session and none was active before.
    Answered { adopted_session: Option<String> },
    Failed { reason: String },
    Cancelled,
    /// The outcome belonged to an exchange that is no longer current.
    Stale,
}

#[derive(Debug)]
struct InFlight {
    exchange_id: u64,
    cancel_token: CancellationToken,
    provider: String,
    model: Option<String>,
}

#[derive(Debug, Default)]
pub struct Conversation {
    cursor: ConversationCursor,
    in_flight: Option<InFlight>,
    next_exchange_id: u64,
    last_failure: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> &ConversationCursor {
        &self.cursor
    }

    pub fn messages(&self) -> &[Message] {
        &self.cursor.messages
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.cursor.active_session_id.as_deref()
    }

    pub fn state(&self) -> ConversationState {
        if self.cursor.pending {
            ConversationState::Pending
        } else {
            ConversationState::Idle
        }
    }

    pub fn is_pending(&self) -> bool {
        self.cursor.pending
    }

    pub fn in_flight_exchange(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.exchange_id)
    }

    /// Reason of the most recent failed exchange, cleared by the next send.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Blank input is rejected; anything else is stored and sent verbatim.
    pub fn begin_send(
        &mut self,
        text: &str,
        context: RequestContext,
    ) -> Result<OutboundExchange, SendRejection> {
        if text.trim().is_empty() {
            return Err(SendRejection::EmptyInput);
        }
        if self.cursor.pending {
            debug!("Send rejected: exchange already in flight");
            return Err(SendRejection::AlreadyPending);
        }

        self.cursor.messages.push(Message::user(text));
        self.cursor.pending = true;
        self.last_failure = None;
        self.next_exchange_id += 1;

        let exchange_id = self.next_exchange_id;
        let cancel_token = CancellationToken::new();
        let request = ChatRequest {
            message: text.to_string(),
            messages: self
                .cursor
                .messages
                .iter()
                .map(Message::to_api_message)
                .collect(),
            provider: context.provider.clone(),
            model: context.model.clone(),
            session_id: self.cursor.active_session_id.clone(),
            api_keys: context.credentials.into_map(),
        };

        debug!(
            exchange_id,
            provider = %request.provider,
            model = ?request.model,
            session_id = ?request.session_id,
            "Exchange started"
        );

        self.in_flight = Some(InFlight {
            exchange_id,
            cancel_token: cancel_token.clone(),
            provider: context.provider,
            model: context.model,
        });

        Ok(OutboundExchange {
            exchange_id,
            request,
            cancel_token,
        })
    }

    /// Merge the outcome of exchange `exchange_id` and return to `Idle`.
    /// Failures are reported to `sink`; outcomes of superseded exchanges are
    /// dropped.
    pub fn complete(
        &mut self,
        exchange_id: u64,
        outcome: ExchangeOutcome,
        sink: &dyn NotificationSink,
    ) -> Resolution {
        let Some(in_flight) = self
            .in_flight
            .take_if(|flight| flight.exchange_id == exchange_id)
        else {
            debug!(exchange_id, "Dropping outcome of superseded exchange");
            return Resolution::Stale;
        };
        self.cursor.pending = false;

        match outcome {
            ExchangeOutcome::Completed(response) => {
                let timestamp = response
                    .timestamp
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or_else(Utc::now);
                let provider = response
                    .provider
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or(in_flight.provider);
                let model = response
                    .model
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .or(in_flight.model);

                let reply = Message::assistant(response.text())
                    .with_timestamp(timestamp)
                    .with_origin(Some(provider), model)
                    .with_usage(response.usage.clone());
                self.cursor.messages.push(reply);

                let adopted_session = match (&self.cursor.active_session_id, response.session_id)
                {
                    (None, Some(session_id)) => {
                        self.cursor.active_session_id = Some(session_id.clone());
                        Some(session_id)
                    }
                    _ => None,
                };

                debug!(exchange_id, adopted = ?adopted_session, "Exchange answered");
                Resolution::Answered { adopted_session }
            }
            ExchangeOutcome::Failed(err) if err.is_cancelled() => {
                debug!(exchange_id, "Exchange cancelled");
                self.last_failure = Some(err.detail());
                sink.notify(Notification::info("Request cancelled", ""));
                Resolution::Cancelled
            }
            ExchangeOutcome::Failed(err) => {
                warn!(exchange_id, error = %err, "Exchange failed");
                let reason = err.detail();
                self.last_failure = Some(reason.clone());
                sink.notify(Notification::error("Message failed", reason.clone()));
                Resolution::Failed { reason }
            }
        }
    }

    /// Ask the in-flight exchange to stop. The conversation stays `Pending`
    /// until its (cancelled) outcome is completed.
    pub fn cancel(&self) -> bool {
        match &self.in_flight {
            Some(flight) => {
                flight.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Blank, unsaved conversation. Any in-flight exchange is abandoned.
    pub fn reset(&mut self) {
        self.abandon_in_flight();
        self.cursor = ConversationCursor::default();
        self.last_failure = None;
    }

    /// Replace the log wholesale with a loaded session's history.
    pub fn replace_history(&mut self, session_id: String, messages: Vec<Message>) {
        self.abandon_in_flight();
        self.cursor = ConversationCursor {
            active_session_id: Some(session_id),
            messages,
            pending: false,
        };
        self.last_failure = None;
    }

    fn abandon_in_flight(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            debug!(exchange_id = flight.exchange_id, "Abandoning in-flight exchange");
            flight.cancel_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{Role, UsageStats};
    use crate::core::notifications::NotificationKind;
    use crate::utils::test_utils::RecordingSink;
    use reqwest::StatusCode;

    fn context() -> RequestContext {
        RequestContext {
            provider: "openai".into(),
            model: Some("gpt-4o-mini".into()),
            credentials: Credentials::from_pairs([("openai", "sk-1"), ("anthropic", "")]),
        }
    }

    fn reply(content: &str, session_id: Option<&str>) -> ExchangeOutcome {
        ExchangeOutcome::Completed(ChatResponse {
            content: Some(content.into()),
            session_id: session_id.map(str::to_string),
            usage: Some(UsageStats {
                total_tokens: Some(12),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn send_appends_user_turn_before_dispatch() {
        let mut conversation = Conversation::new();
        let exchange = conversation
            .begin_send("hello", context())
            .expect("send accepted");

        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].role, Role::User);
        assert_eq!(conversation.messages()[0].content, "hello");
        assert_eq!(conversation.state(), ConversationState::Pending);
        assert_eq!(conversation.in_flight_exchange(), Some(exchange.exchange_id));
    }

    #[test]
    fn send_keeps_surrounding_whitespace() {
        let mut conversation = Conversation::new();
        let text = "    fn main() {}\n\n";
        let exchange = conversation.begin_send(text, context()).unwrap();

        assert_eq!(conversation.messages()[0].content, text);
        assert_eq!(exchange.request.message, text);
        assert_eq!(exchange.request.messages[0].content, text);
    }

    #[test]
    fn empty_and_pending_sends_are_noops() {
        let mut conversation = Conversation::new();
        assert_eq!(
            conversation.begin_send(" \n\t ", context()).unwrap_err(),
            SendRejection::EmptyInput
        );
        assert_eq!(conversation.cursor(), &ConversationCursor::default());

        conversation.begin_send("hello", context()).unwrap();
        let before = conversation.cursor().clone();
        assert_eq!(
            conversation.begin_send("hello", context()).unwrap_err(),
            SendRejection::AlreadyPending
        );
        assert_eq!(conversation.cursor(), &before);
    }

    #[test]
    fn request_carries_history_selection_and_full_credential_map() {
        let mut conversation = Conversation::new();
        conversation.replace_history(
            "s-1".into(),
            vec![Message::user("earlier"), Message::assistant("answer")],
        );
        let exchange = conversation.begin_send("next", context()).unwrap();
        let request = exchange.request;

        assert_eq!(request.message, "next");
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(request.provider, "openai");
        assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(request.session_id.as_deref(), Some("s-1"));
        assert_eq!(request.api_keys.get("openai").map(String::as_str), Some("sk-1"));
        assert_eq!(request.api_keys.get("anthropic").map(String::as_str), Some(""));
    }

    #[test]
    fn success_appends_reply_and_adopts_session() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        let exchange = conversation.begin_send("hello", context()).unwrap();

        let resolution =
            conversation.complete(exchange.exchange_id, reply("hi there", Some("s-9")), &sink);

        assert_eq!(
            resolution,
            Resolution::Answered {
                adopted_session: Some("s-9".into())
            }
        );
        assert_eq!(conversation.messages().len(), 2);
        let answer = &conversation.messages()[1];
        assert_eq!(answer.role, Role::Assistant);
        assert_eq!(answer.content, "hi there");
        assert_eq!(answer.provider.as_deref(), Some("openai"));
        assert_eq!(answer.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(answer.usage.as_ref().and_then(|u| u.total_tokens), Some(12));
        assert_eq!(conversation.active_session_id(), Some("s-9"));
        assert_eq!(conversation.state(), ConversationState::Idle);
        assert!(sink.is_empty());
    }

    #[test]
    fn existing_session_is_not_replaced_by_response_id() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        conversation.replace_history("s-1".into(), Vec::new());
        let exchange = conversation.begin_send("hello", context()).unwrap();

        let resolution =
            conversation.complete(exchange.exchange_id, reply("ok", Some("s-2")), &sink);

        assert_eq!(
            resolution,
            Resolution::Answered {
                adopted_session: None
            }
        );
        assert_eq!(conversation.active_session_id(), Some("s-1"));
    }

    #[test]
    fn failure_keeps_user_turn_and_reports_reason() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        let exchange = conversation.begin_send("hello", context()).unwrap();

        let resolution = conversation.complete(
            exchange.exchange_id,
            ExchangeOutcome::Failed(ApiError::status(
                StatusCode::UNAUTHORIZED,
                r#"{"detail":"Invalid API key"}"#,
            )),
            &sink,
        );

        assert_eq!(
            resolution,
            Resolution::Failed {
                reason: "Invalid API key".into()
            }
        );
        assert_eq!(conversation.messages().len(), 1);
        assert!(conversation.messages()[0].is_user());
        assert_eq!(conversation.state(), ConversationState::Idle);
        assert_eq!(conversation.last_failure(), Some("Invalid API key"));
        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Error);
        assert_eq!(notifications[0].detail, "Invalid API key");

        conversation.begin_send("again", context()).unwrap();
        assert_eq!(conversation.last_failure(), None);
    }

    #[test]
    fn cancelled_outcome_is_reported_as_info() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        let exchange = conversation.begin_send("hello", context()).unwrap();

        assert!(conversation.cancel());
        assert!(exchange.cancel_token.is_cancelled());
        assert!(conversation.is_pending());

        let resolution = conversation.complete(
            exchange.exchange_id,
            ExchangeOutcome::Failed(ApiError::Cancelled),
            &sink,
        );
        assert_eq!(resolution, Resolution::Cancelled);
        assert!(!conversation.is_pending());
        assert_eq!(sink.count(NotificationKind::Info), 1);
        assert_eq!(sink.count(NotificationKind::Error), 0);
        assert!(!conversation.cancel());
    }

    #[test]
    fn reset_abandons_in_flight_exchange() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        let exchange = conversation.begin_send("hello", context()).unwrap();

        conversation.reset();
        assert!(exchange.cancel_token.is_cancelled());
        assert_eq!(conversation.cursor(), &ConversationCursor::default());

        let resolution = conversation.complete(exchange.exchange_id, reply("late", None), &sink);
        assert_eq!(resolution, Resolution::Stale);
        assert!(conversation.messages().is_empty());
    }

    #[test]
    fn reply_timestamp_comes_from_backend_when_parseable() {
        let sink = RecordingSink::default();
        let mut conversation = Conversation::new();
        let exchange = conversation.begin_send("hello", context()).unwrap();
        let outcome = ExchangeOutcome::Completed(ChatResponse {
            response: Some("hi".into()),
            timestamp: Some("2026-05-05T05:05:05Z".into()),
            provider: Some("anthropic".into()),
            ..Default::default()
        });

        conversation.complete(exchange.exchange_id, outcome, &sink);
        let answer = &conversation.messages()[1];
        assert_eq!(answer.timestamp, parse_timestamp("2026-05-05T05:05:05Z").unwrap());
        assert_eq!(answer.provider.as_deref(), Some("anthropic"));
        assert_eq!(answer.content, "hi");
    }
}
