use std::fmt;

use shared::{
    domain::UserId,
    protocol::{SendDirectRequest, SendSharedRequest},
};
use uuid::Uuid;

use crate::{
    anonymizer::{anonymize, UNKNOWN_SENDER},
    directory::RosterEntry,
    error::SyncError,
    routes::{Operation, RouteArgs},
    timeline::Message,
};

pub const SHARED_CHANNEL_NAME: &str = "Global";

/// Label for an own message whose sender the backend left out of a direct thread.
const SELF_LABEL: &str = "you";

/// The conversation every fetch, send and delete is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationContext {
    Shared,
    Direct { peer_id: UserId, display_name: String },
}

impl ConversationContext {
    pub fn direct(entry: &RosterEntry) -> Self {
        Self::Direct {
            peer_id: entry.id.clone(),
            display_name: entry.display_name.clone(),
        }
    }

    /// Direct thread for a peer that is not (yet) in the roster.
    pub fn direct_to(peer_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self::Direct {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ConversationContext::Shared => SHARED_CHANNEL_NAME,
            ConversationContext::Direct { display_name, .. } => display_name.as_str(),
        }
    }

    pub fn fetch_operation(&self) -> Operation {
        match self {
            ConversationContext::Shared => Operation::FetchSharedMessages,
            ConversationContext::Direct { .. } => Operation::FetchDirectMessages,
        }
    }

    pub fn send_operation(&self) -> Operation {
        match self {
            ConversationContext::Shared => Operation::SendSharedMessage,
            ConversationContext::Direct { .. } => Operation::SendDirectMessage,
        }
    }

    /// Arguments for the fetch operation: the peer id for direct threads.
    pub fn route_args(&self) -> RouteArgs {
        match self {
            ConversationContext::Shared => RouteArgs::none(),
            ConversationContext::Direct { peer_id, .. } => RouteArgs::param(peer_id.as_str()),
        }
    }

    pub fn send_payload(&self, body: &str, client_id: Uuid) -> Result<RouteArgs, SyncError> {
        let client_id = client_id.to_string();
        match self {
            ConversationContext::Shared => RouteArgs::json(&SendSharedRequest {
                text: body.to_string(),
                client_id,
            }),
            ConversationContext::Direct { peer_id, .. } => RouteArgs::json(&SendDirectRequest {
                to: peer_id.to_string(),
                text: body.to_string(),
                client_id,
            }),
        }
    }

    /// Name shown next to a message: pseudonymous in the shared channel.
    pub fn sender_label(&self, message: &Message) -> String {
        match self {
            ConversationContext::Shared if message.sender.is_empty() => anonymize(UNKNOWN_SENDER),
            ConversationContext::Shared => anonymize(&message.sender),
            ConversationContext::Direct { .. } if !message.sender.is_empty() => {
                message.sender.clone()
            }
            ConversationContext::Direct { .. } if message.is_mine => SELF_LABEL.to_string(),
            ConversationContext::Direct { display_name, .. } => display_name.clone(),
        }
    }
}

impl fmt::Display for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationContext::Shared => f.write_str("shared"),
            ConversationContext::Direct { peer_id, .. } => write!(f, "direct:{peer_id}"),
        }
    }
}
