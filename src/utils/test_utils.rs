use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;

use crate::api::{ApiError, Backend, ChatRequest, ChatResponse};
use crate::core::app::App;
use crate::core::config::ClientConfig;
use crate::core::message::Message;
use crate::core::notifications::{Notification, NotificationKind, NotificationSink};
use crate::core::providers::{CapabilityMap, ProviderCapability};
use crate::core::sessions::ChatSession;
use crate::core::storage::MemoryStore;

/// Scripted answer for the next `send_chat` call.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(ChatResponse),
    Status(u16, String),
    Hang,
}

#[derive(Default)]
struct FakeState {
    script: VecDeque<Script>,
    sessions: Vec<ChatSession>,
    histories: HashMap<String, Vec<Message>>,
    capabilities: CapabilityMap,
    fail_sessions: bool,
    fail_capabilities: bool,
    fail_deletes: bool,
    chat_requests: Vec<ChatRequest>,
    list_calls: usize,
    capability_calls: usize,
    created_sessions: u64,
}

/// In-process [`Backend`].
///
/// Unscripted chat calls echo the message back and, like a real backend,
/// create a session when the request names none.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(self, sessions: Vec<ChatSession>) -> Self {
        self.lock().sessions = sessions;
        self
    }

    pub fn with_history(self, session_id: &str, messages: Vec<Message>) -> Self {
        self.lock().histories.insert(session_id.to_string(), messages);
        self
    }

    pub fn with_capability(self, provider: &str, capability: ProviderCapability) -> Self {
        self.lock()
            .capabilities
            .insert(provider.to_string(), capability);
        self
    }

    pub fn script(&self, script: Script) {
        self.lock().script.push_back(script);
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.lock().fail_sessions = fail;
    }

    pub fn fail_capabilities(&self, fail: bool) {
        self.lock().fail_capabilities = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.lock().chat_requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn capability_calls(&self) -> usize {
        self.lock().capability_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn server_error() -> ApiError {
    ApiError::status(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"detail":"backend unavailable"}"#,
    )
}

#[async_trait]
impl Backend for FakeBackend {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let script = {
            let mut state = self.lock();
            state.chat_requests.push(request.clone());
            match state.script.pop_front() {
                Some(script) => script,
                None => {
                    let session_id = match &request.session_id {
                        Some(id) => id.clone(),
                        None => {
                            state.created_sessions += 1;
                            let id = format!("s-new-{}", state.created_sessions);
                            let minutes = 100 + state.created_sessions as i64;
                            state.sessions.push(session(&id, minutes));
                            id
                        }
                    };
                    Script::Reply(ChatResponse {
                        content: Some(format!("echo: {}", request.message)),
                        provider: Some(request.provider.clone()),
                        model: request.model.clone(),
                        session_id: Some(session_id),
                        ..Default::default()
                    })
                }
            }
        };

        match script {
            Script::Reply(response) => Ok(response),
            Script::Status(code, body) => Err(ApiError::status(
                StatusCode::from_u16(code).unwrap(),
                body,
            )),
            Script::Hang => std::future::pending().await,
        }
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>, ApiError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.fail_sessions {
            return Err(server_error());
        }
        Ok(state.sessions.clone())
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>, ApiError> {
        self.lock()
            .histories
            .get(session_id)
            .cloned()
            .ok_or_else(|| ApiError::status(StatusCode::NOT_FOUND, r#"{"detail":"Not Found"}"#))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let mut state = self.lock();
        if state.fail_deletes {
            return Err(server_error());
        }
        state.sessions.retain(|session| session.id != session_id);
        state.histories.remove(session_id);
        Ok(())
    }

    async fn provider_capabilities(&self) -> Result<CapabilityMap, ApiError> {
        let mut state = self.lock();
        state.capability_calls += 1;
        if state.fail_capabilities {
            return Err(server_error());
        }
        Ok(state.capabilities.clone())
    }
}

/// Sink that keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().unwrap().is_empty()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.received.lock().unwrap().push(notification);
    }
}

/// Session summary updated `minutes` after a fixed epoch.
pub fn session(id: &str, minutes: i64) -> ChatSession {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    ChatSession {
        id: id.to_string(),
        title: format!("Chat {id}"),
        created_at: base,
        updated_at: base + chrono::Duration::minutes(minutes),
        message_count: 0,
        last_message_preview: None,
    }
}

pub fn capability(available: bool, models: &[&str], default_model: Option<&str>) -> ProviderCapability {
    ProviderCapability {
        available,
        models: models.iter().map(|m| m.to_string()).collect(),
        default_model: default_model.map(str::to_string),
    }
}

pub struct TestApp {
    pub app: App,
    pub backend: Arc<FakeBackend>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryStore>,
}

pub fn create_test_app(backend: FakeBackend) -> TestApp {
    create_test_app_with(backend, MemoryStore::new(), Duration::from_secs(5))
}

pub fn create_test_app_with(
    backend: FakeBackend,
    store: MemoryStore,
    deadline: Duration,
) -> TestApp {
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(store);
    let app = App::new(
        backend.clone(),
        store.clone(),
        sink.clone(),
        &ClientConfig::default(),
    )
    .with_deadline(deadline);

    TestApp {
        app,
        backend,
        sink,
        store,
    }
}
