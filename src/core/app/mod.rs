//! Composition root: owns every component and routes backend outcomes.
//!
//! Components never reference each other; `App` passes what one needs from
//! another through accessor calls at each step.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Backend, HttpBackend};
use crate::core::config::ClientConfig;
use crate::core::conversation::{
    Conversation, ConversationState, RequestContext, Resolution, SendRejection,
};
use crate::core::credentials::{
    CredentialStore, CredentialUpdate, Credentials, CREDENTIALS_STORAGE_KEY,
};
use crate::core::exchange::{ExchangeEvent, ExchangeService};
use crate::core::message::Message;
use crate::core::notifications::{
    FanoutSink, Notification, NotificationSink, ToastQueue, TracingSink,
};
use crate::core::providers::{CapabilityMap, ProviderResolver, DEFAULT_PROVIDER};
use crate::core::sessions::SessionRegistry;
use crate::core::storage::{platform_store, KeyValueStore};

pub struct App {
    credentials: CredentialStore,
    providers: ProviderResolver,
    sessions: SessionRegistry,
    conversation: Conversation,
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn NotificationSink>,
    exchanges: ExchangeService,
    outcomes: mpsc::UnboundedReceiver<ExchangeEvent>,
}

impl App {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn NotificationSink>,
        config: &ClientConfig,
    ) -> Self {
        let (exchanges, outcomes) =
            ExchangeService::new(Arc::clone(&backend), config.request_timeout());
        let initial_provider = config
            .default_provider
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER);

        Self {
            credentials: CredentialStore::new(store),
            providers: ProviderResolver::new(initial_provider, config.model_overrides()),
            sessions: SessionRegistry::new(),
            conversation: Conversation::new(),
            backend,
            notifier,
            exchanges,
            outcomes,
        }
    }

    /// Wire an app to the HTTP backend at `config.base_url`. Notifications go
    /// to the returned toast queue and to `tracing`.
    pub fn connect(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(Self, Arc<ToastQueue>), ApiError> {
        let backend = HttpBackend::new(&config.base_url, config.request_timeout())?;
        let toasts = Arc::new(ToastQueue::new(
            config.toast_capacity,
            config.toast_duration(),
        ));
        let notifier = FanoutSink::default()
            .with(toasts.clone())
            .with(Arc::new(TracingSink));

        info!(base_url = %backend.base_url(), "Chat backend configured");
        let app = Self::new(Arc::new(backend), store, Arc::new(notifier), config);
        Ok((app, toasts))
    }

    /// [`App::connect`] with keys kept in the OS keyring, or in the data
    /// directory when no keyring is reachable.
    pub fn connect_default(config: &ClientConfig) -> Result<(Self, Arc<ToastQueue>), ApiError> {
        Self::connect(config, platform_store(CREDENTIALS_STORAGE_KEY))
    }

    /// Deadline applied to each chat exchange.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.exchanges = self.exchanges.with_deadline(deadline);
        self
    }

    /// Load credentials, then fetch sessions and provider capabilities
    /// concurrently.
    pub async fn bootstrap(&mut self) {
        self.credentials.load();

        let ticket = self.sessions.begin_refresh();
        let (sessions, capabilities) = tokio::join!(
            self.backend.list_sessions(),
            self.backend.provider_capabilities()
        );

        self.sessions
            .apply_refresh(ticket, sessions, self.notifier.as_ref());
        self.apply_capabilities(capabilities);
        debug!(
            sessions = self.sessions.sessions().len(),
            provider = %self.providers.active_provider(),
            model = ?self.providers.active_model(),
            "Bootstrap finished"
        );
    }

    /// Start an exchange. Returns its id; the outcome arrives through
    /// [`App::next_outcome`].
    pub fn send(&mut self, text: &str) -> Result<u64, SendRejection> {
        let context = RequestContext {
            provider: self.providers.active_provider().to_string(),
            model: self.providers.active_model().map(str::to_string),
            credentials: self.credentials.snapshot(),
        };
        let exchange = self.conversation.begin_send(text, context)?;
        let exchange_id = exchange.exchange_id;
        self.exchanges.spawn_exchange(exchange);
        Ok(exchange_id)
    }

    pub async fn next_outcome(&mut self) -> Option<ExchangeEvent> {
        self.outcomes.recv().await
    }

    /// Merge an outcome into the conversation. Adopting a new session id
    /// refreshes the session list.
    pub async fn apply_outcome(&mut self, event: ExchangeEvent) -> Resolution {
        let resolution = self.conversation.complete(
            event.exchange_id,
            event.outcome,
            self.notifier.as_ref(),
        );
        if let Resolution::Answered {
            adopted_session: Some(session_id),
        } = &resolution
        {
            debug!(session_id = %session_id, "Adopted new session");
            self.refresh_sessions().await;
        }
        resolution
    }

    /// Wait until the in-flight exchange resolves. Returns `None` when
    /// nothing is pending.
    pub async fn settle(&mut self) -> Option<Resolution> {
        while self.conversation.is_pending() {
            let event = self.outcomes.recv().await?;
            match self.apply_outcome(event).await {
                Resolution::Stale => continue,
                resolution => return Some(resolution),
            }
        }
        None
    }

    pub fn cancel(&self) -> bool {
        self.conversation.cancel()
    }

    pub fn create_session(&mut self) {
        self.sessions.create(&mut self.conversation);
    }

    pub async fn select_session(&mut self, id: &str) -> bool {
        self.sessions
            .select(
                id,
                self.backend.as_ref(),
                &mut self.conversation,
                self.notifier.as_ref(),
            )
            .await
    }

    pub async fn delete_session(&mut self, id: &str) -> bool {
        self.sessions
            .delete(
                id,
                self.backend.as_ref(),
                &mut self.conversation,
                self.notifier.as_ref(),
            )
            .await
    }

    pub async fn refresh_sessions(&mut self) -> bool {
        self.sessions
            .refresh(self.backend.as_ref(), self.notifier.as_ref())
            .await
    }

    pub async fn refresh_capabilities(&mut self) -> bool {
        let result = self.backend.provider_capabilities().await;
        self.apply_capabilities(result)
    }

    /// Merge `partial` into the stored keys, then re-fetch capabilities since
    /// availability depends on them.
    pub async fn update_credentials(&mut self, partial: &Credentials) -> CredentialUpdate {
        let update = self.credentials.update(partial, self.notifier.as_ref());
        self.refresh_capabilities().await;
        update
    }

    pub fn set_provider(&mut self, name: &str) -> bool {
        self.providers.set_provider(name)
    }

    pub fn set_model(&mut self, model: &str) -> bool {
        self.providers.set_model(model)
    }

    /// Provider availability derived from the latest capability snapshot and
    /// the current credentials.
    pub fn availability(&self) -> CapabilityMap {
        self.providers.availability(self.credentials.credentials())
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn state(&self) -> ConversationState {
        self.conversation.state()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.conversation.last_failure()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn providers(&self) -> &ProviderResolver {
        &self.providers
    }

    pub fn credentials(&self) -> &Credentials {
        self.credentials.credentials()
    }

    pub fn credentials_memory_only(&self) -> bool {
        self.credentials.is_memory_only()
    }

    fn apply_capabilities(&mut self, result: Result<CapabilityMap, ApiError>) -> bool {
        match result {
            Ok(capabilities) => {
                debug!(providers = capabilities.len(), "Provider capabilities refreshed");
                self.providers.replace_capabilities(capabilities);
                true
            }
            Err(err) => {
                warn!(error = %err, "Fetching provider capabilities failed");
                self.notifier.notify(Notification::error(
                    "Could not load providers",
                    err.detail(),
                ));
                false
            }
        }
    }
}
