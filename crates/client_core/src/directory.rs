use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::UserId,
    protocol::{SignupRequest, WireUser},
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::{
    error::SyncError,
    routes::{Operation, RouteArgs},
    session::SessionManager,
    ClientEvent,
};

const UNNAMED_USER: &str = "—";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: UserId,
    pub display_name: String,
    pub subtitle: String,
}

impl RosterEntry {
    pub fn from_wire(user: WireUser) -> Self {
        let display_name = user.handle.unwrap_or_else(|| UNNAMED_USER.to_string());
        let id = user.id.unwrap_or_else(|| display_name.clone());
        let subtitle = user.display_name.or(user.email).unwrap_or_default();
        Self {
            id: UserId::from(id),
            display_name,
            subtitle,
        }
    }

    /// Up to two upper-cased initials, `?` for a blank name.
    pub fn initials(&self) -> String {
        let mut words = self.display_name.split_whitespace();
        let mut initials = String::new();
        match words.next().and_then(|word| word.chars().next()) {
            Some(first) => initials.extend(first.to_uppercase()),
            None => return "?".to_string(),
        }
        if let Some(second) = words.next().and_then(|word| word.chars().next()) {
            initials.extend(second.to_uppercase());
        }
        initials
    }
}

fn entries_from_list(value: &Value) -> Vec<RosterEntry> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| RosterEntry::from_wire(WireUser::from_value(item)))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Default)]
struct RosterState {
    entries: Vec<RosterEntry>,
    /// Bumped by `clear`; a fetch started under an older epoch is not applied.
    epoch: u64,
}

/// The user list shown next to the conversations.
pub struct Directory {
    session: Arc<SessionManager>,
    roster: RwLock<RosterState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Directory {
    pub fn new(session: Arc<SessionManager>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            session,
            roster: RwLock::new(RosterState::default()),
            events,
        }
    }

    /// Replaces the roster on success; a failed fetch leaves the previous roster in place.
    pub async fn refresh(&self) -> Result<Vec<RosterEntry>, SyncError> {
        let epoch = self.roster.read().await.epoch;
        let value = self
            .session
            .resolve(Operation::ListUsers, &RouteArgs::none())
            .await?;
        let entries = entries_from_list(&value);

        let mut roster = self.roster.write().await;
        if roster.epoch != epoch {
            debug!("discarding roster fetched before it was cleared");
            return Ok(roster.entries.clone());
        }
        debug!(count = entries.len(), "roster refreshed");
        roster.entries = entries.clone();
        drop(roster);
        let _ = self.events.send(ClientEvent::RosterUpdated(entries.clone()));
        Ok(entries)
    }

    /// Forgets the roster, including any fetch still in flight.
    pub async fn clear(&self) {
        let mut roster = self.roster.write().await;
        roster.epoch += 1;
        if roster.entries.is_empty() {
            return;
        }
        roster.entries.clear();
        drop(roster);
        let _ = self.events.send(ClientEvent::RosterUpdated(Vec::new()));
    }

    pub async fn entries(&self) -> Vec<RosterEntry> {
        self.roster.read().await.entries.clone()
    }

    pub async fn filter(&self, query: &str) -> Vec<RosterEntry> {
        let query = query.trim().to_lowercase();
        let roster = self.roster.read().await;
        if query.is_empty() {
            return roster.entries.clone();
        }
        roster
            .entries
            .iter()
            .filter(|entry| entry.display_name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    pub async fn find(&self, id: &UserId) -> Option<RosterEntry> {
        self.roster
            .read()
            .await
            .entries
            .iter()
            .find(|entry| &entry.id == id)
            .cloned()
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), SyncError> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SyncError::validation("username and password are required"));
        }

        let args = RouteArgs::json(&SignupRequest {
            username: username.to_string(),
            password: password.to_string(),
            display_name: username.to_string(),
        })?;
        self.session.resolve(Operation::CreateUser, &args).await?;
        info!(username, "user created");

        if let Err(err) = self.refresh().await {
            debug!("roster refresh after user creation failed: {err}");
        }
        Ok(())
    }

    /// Server-side lookup; the cached roster is left untouched.
    pub async fn search(&self, query: &str) -> Result<Vec<RosterEntry>, SyncError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let value = self
            .session
            .resolve(Operation::SearchUsers, &RouteArgs::param(query))
            .await?;
        Ok(entries_from_list(&value))
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
