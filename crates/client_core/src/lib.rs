use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use shared::domain::{AuthMode, MessageId};
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub mod anonymizer;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod reconciler;
pub mod resolver;
pub mod routes;
pub mod scheduler;
pub mod session;
pub mod timeline;

pub use anonymizer::anonymize;
pub use config::SyncConfig;
pub use context::ConversationContext;
pub use directory::{Directory, RosterEntry};
pub use error::{RouteFailure, SyncError};
pub use reconciler::{Reconciler, RefreshOutcome};
pub use resolver::Resolver;
pub use routes::{Operation, RouteArgs};
pub use scheduler::Scheduler;
pub use session::{MemoryTokenStore, Session, SessionManager, TokenStore};
pub use timeline::{MergePolicy, Message, Timeline};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionChanged(Session),
    TimelineUpdated {
        context: ConversationContext,
        messages: Vec<Message>,
    },
    RosterUpdated(Vec<RosterEntry>),
    Error(String),
}

/// One signed-in view of the backend: session, roster, active conversation and its poller.
pub struct SyncClient {
    session: Arc<SessionManager>,
    reconciler: Arc<Reconciler>,
    directory: Arc<Directory>,
    scheduler: Scheduler,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncClient {
    pub fn new(server_url: &str, config: &SyncConfig) -> Result<Arc<Self>> {
        Self::new_with_token_store(server_url, config, Arc::new(MemoryTokenStore::new()))
    }

    pub fn new_with_token_store(
        server_url: &str,
        config: &SyncConfig,
        store: Arc<dyn TokenStore>,
    ) -> Result<Arc<Self>> {
        let server_url = server_url.trim();
        Url::parse(server_url).with_context(|| format!("invalid server url '{server_url}'"))?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let resolver = Resolver::new(http, server_url);
        let session = Arc::new(SessionManager::new(resolver, store, events.clone()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&session),
            config.merge_policy(),
            events.clone(),
        ));
        let directory = Arc::new(Directory::new(Arc::clone(&session), events.clone()));
        let scheduler = Scheduler::new(
            Arc::clone(&reconciler),
            Arc::clone(&directory),
            config.poll_interval,
            events.clone(),
        );

        Ok(Arc::new(Self {
            session,
            reconciler,
            directory,
            scheduler,
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn session(&self) -> Session {
        self.session.current_session().await
    }

    /// Restores a stored session and, when it is still valid, starts polling the shared channel.
    pub async fn bootstrap(&self) -> Session {
        let session = self.session.restore().await;
        if session.is_authenticated() {
            self.enter_shared_channel().await;
        }
        session
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, SyncError> {
        self.authenticate(username, password, AuthMode::Login).await
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<Session, SyncError> {
        self.authenticate(username, password, AuthMode::Signup).await
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        mode: AuthMode,
    ) -> Result<Session, SyncError> {
        let session = self.session.authenticate(username, password, mode).await?;
        self.enter_shared_channel().await;
        Ok(session)
    }

    async fn enter_shared_channel(&self) {
        if let Err(err) = self.directory.refresh().await {
            debug!("initial roster fetch failed: {err}");
        }
        self.scheduler.start(ConversationContext::Shared).await;
    }

    pub async fn sign_out(&self) {
        self.scheduler.stop().await;
        self.reconciler.clear_context().await;
        self.directory.clear().await;
        self.session.sign_out().await;
    }

    /// Switches the conversation the poller follows and fetches it once right away.
    pub async fn open(&self, context: ConversationContext) -> Result<RefreshOutcome, SyncError> {
        if !self.session.current_session().await.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        info!(%context, "opening conversation");
        self.scheduler.stop().await;
        let outcome = self.reconciler.switch_context(context).await;
        self.scheduler.resume().await;
        outcome
    }

    pub async fn active_context(&self) -> Option<ConversationContext> {
        self.reconciler.active_context().await
    }

    pub async fn timeline(&self) -> Vec<Message> {
        self.reconciler.timeline().await
    }

    pub async fn send(&self, body: &str) -> Result<Uuid, SyncError> {
        let context = self
            .reconciler
            .active_context()
            .await
            .ok_or_else(|| SyncError::InactiveContext("none".to_string()))?;
        self.reconciler.send(&context, body).await
    }

    pub async fn delete(&self, id: &MessageId) -> Result<(), SyncError> {
        let context = self
            .reconciler
            .active_context()
            .await
            .ok_or_else(|| SyncError::InactiveContext("none".to_string()))?;
        let message = self
            .reconciler
            .find(id)
            .await
            .ok_or_else(|| SyncError::validation(format!("message {id} is not in the timeline")))?;
        self.reconciler.delete(&context, &message).await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
