use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::AuthMode,
    protocol::{
        identity_from_value, AuthResponse, LoginRequest, RefreshTokenRequest, SignupRequest,
    },
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    error::SyncError,
    resolver::Resolver,
    routes::{Operation, RouteArgs},
    ClientEvent,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub identity: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

/// Where the bearer token survives restarts.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().await = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock().await = None;
        Ok(())
    }
}

pub struct SessionManager {
    resolver: Resolver,
    store: Arc<dyn TokenStore>,
    session: RwLock<Session>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionManager {
    pub fn new(
        resolver: Resolver,
        store: Arc<dyn TokenStore>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            resolver,
            store,
            session: RwLock::new(Session::default()),
            events,
        }
    }

    pub async fn current_session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .token
            .clone()
            .filter(|token| !token.is_empty())
    }

    pub async fn identity(&self) -> Option<String> {
        self.session.read().await.identity.clone()
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        mode: AuthMode,
    ) -> Result<Session, SyncError> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SyncError::validation("username and password are required"));
        }

        let (operation, args) = match mode {
            AuthMode::Login => (
                Operation::Login,
                RouteArgs::json(&LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                })?,
            ),
            AuthMode::Signup => (
                Operation::Signup,
                RouteArgs::json(&SignupRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                    display_name: username.to_string(),
                })?,
            ),
        };

        let value = match self.resolver.resolve(operation, &args, None).await {
            Ok(value) => value,
            Err(SyncError::NoRouteAvailable { last, .. }) => {
                warn!(operation = operation.name(), "authentication rejected");
                return Err(SyncError::AuthRejected {
                    message: last.message(),
                });
            }
            Err(err) => return Err(err),
        };
        let auth = AuthResponse::from_value(&value).map_err(|err| SyncError::AuthRejected {
            message: err.to_string(),
        })?;

        let session = Session {
            token: Some(auth.token.clone()),
            identity: Some(auth.username.unwrap_or_else(|| username.to_string())),
        };
        *self.session.write().await = session.clone();
        if let Err(err) = self.store.save(&auth.token).await {
            warn!("failed to persist session token: {err:#}");
        }
        info!(
            identity = session.identity.as_deref().unwrap_or_default(),
            "signed in"
        );
        let _ = self.events.send(ClientEvent::SessionChanged(session));

        if let Err(err) = self.refresh_identity().await {
            debug!("identity refresh after sign-in failed: {err}");
        }
        Ok(self.current_session().await)
    }

    /// Startup rule: a stored token is only kept if the backend still accepts it.
    pub async fn restore(&self) -> Session {
        let token = match self.store.load().await {
            Ok(Some(token)) if !token.trim().is_empty() => token.trim().to_string(),
            Ok(_) => return self.current_session().await,
            Err(err) => {
                warn!("failed to load stored token: {err:#}");
                return self.current_session().await;
            }
        };

        let session = match self
            .resolver
            .resolve(Operation::CurrentIdentity, &RouteArgs::none(), Some(&token))
            .await
        {
            Ok(value) => {
                let identity = identity_from_value(&value);
                info!(
                    identity = identity.as_deref().unwrap_or_default(),
                    "restored session"
                );
                Session {
                    token: Some(token),
                    identity,
                }
            }
            Err(err) => {
                warn!("stored token rejected, discarding it: {err}");
                if let Err(err) = self.store.clear().await {
                    warn!("failed to clear stored token: {err:#}");
                }
                Session::default()
            }
        };

        *self.session.write().await = session.clone();
        let _ = self.events.send(ClientEvent::SessionChanged(session.clone()));
        session
    }

    pub async fn sign_out(&self) {
        if let Some(token) = self.token().await {
            if let Err(err) = self
                .resolver
                .resolve(Operation::SignOut, &RouteArgs::none(), Some(&token))
                .await
            {
                debug!("logout request failed, clearing locally anyway: {err}");
            }
        }

        *self.session.write().await = Session::default();
        if let Err(err) = self.store.clear().await {
            warn!("failed to clear stored token: {err:#}");
        }
        info!("signed out");
        let _ = self.events.send(ClientEvent::SessionChanged(Session::default()));
    }

    /// Re-reads the identity; the previous identity stays on failure.
    pub async fn refresh_identity(&self) -> Result<Option<String>, SyncError> {
        let token = self.token().await.ok_or(SyncError::NotAuthenticated)?;
        let value = self
            .resolver
            .resolve(Operation::CurrentIdentity, &RouteArgs::none(), Some(&token))
            .await?;
        let Some(identity) = identity_from_value(&value) else {
            return Ok(self.identity().await);
        };

        let session = {
            let mut session = self.session.write().await;
            if session.token.as_deref() != Some(token.as_str()) {
                return Ok(session.identity.clone());
            }
            if session.identity.as_deref() == Some(identity.as_str()) {
                return Ok(Some(identity));
            }
            session.identity = Some(identity.clone());
            session.clone()
        };
        let _ = self.events.send(ClientEvent::SessionChanged(session));
        Ok(Some(identity))
    }

    pub async fn refresh_token(&self) -> Result<Session, SyncError> {
        let token = self.token().await.ok_or(SyncError::NotAuthenticated)?;
        let args = RouteArgs::json(&RefreshTokenRequest {
            token: token.clone(),
        })?;
        let value = self
            .resolver
            .resolve(Operation::RefreshToken, &args, None)
            .await?;
        let auth = AuthResponse::from_value(&value).map_err(|err| SyncError::AuthRejected {
            message: err.to_string(),
        })?;

        let session = {
            let mut session = self.session.write().await;
            if session.token.as_deref() != Some(token.as_str()) {
                debug!("session changed during token refresh, dropping new token");
                return Ok(session.clone());
            }
            session.token = Some(auth.token.clone());
            session.clone()
        };
        if let Err(err) = self.store.save(&auth.token).await {
            warn!("failed to persist refreshed token: {err:#}");
        }
        debug!("session token refreshed");
        let _ = self.events.send(ClientEvent::SessionChanged(session.clone()));
        Ok(session)
    }

    /// Runs an operation with the session's credentials where the operation takes them.
    pub async fn resolve(&self, operation: Operation, args: &RouteArgs) -> Result<Value, SyncError> {
        let token = if operation.requires_auth() {
            self.token().await
        } else {
            None
        };
        self.resolver.resolve(operation, args, token.as_deref()).await
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
