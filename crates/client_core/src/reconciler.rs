//! Keeps the active conversation's timeline in step with the server.
//!
//! Every context change bumps a generation counter. A fetch remembers the
//! generation it started under and its result is dropped if the counter has
//! moved by the time the response arrives, so a slow poll for one
//! conversation can never paint messages into another.

use std::sync::Arc;

use shared::{domain::MessageId, protocol::WireMessage};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    context::ConversationContext,
    error::SyncError,
    routes::{Operation, RouteArgs},
    session::SessionManager,
    timeline::{MergePolicy, Message, Timeline},
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Applied(Vec<Message>),
    /// The context changed (or a newer fetch landed) while this one was in flight.
    Discarded,
}

#[derive(Debug, Default)]
struct ReconcilerState {
    context: Option<ConversationContext>,
    generation: u64,
    /// Sequence number handed to each fetch, and the newest one merged so far.
    next_fetch: u64,
    applied_fetch: u64,
    timeline: Timeline,
}

impl ReconcilerState {
    fn reset(&mut self, context: Option<ConversationContext>) -> u64 {
        self.context = context;
        self.generation += 1;
        self.timeline.clear();
        self.generation
    }

    fn is_active(&self, context: &ConversationContext) -> bool {
        self.context.as_ref() == Some(context)
    }
}

pub struct Reconciler {
    session: Arc<SessionManager>,
    policy: MergePolicy,
    state: Mutex<ReconcilerState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Reconciler {
    pub fn new(
        session: Arc<SessionManager>,
        policy: MergePolicy,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            session,
            policy,
            state: Mutex::new(ReconcilerState::default()),
            events,
        }
    }

    pub async fn active_context(&self) -> Option<ConversationContext> {
        self.state.lock().await.context.clone()
    }

    pub async fn timeline(&self) -> Vec<Message> {
        self.state.lock().await.timeline.entries()
    }

    /// Makes `context` active with an empty timeline, without fetching.
    pub async fn set_context(&self, context: ConversationContext) {
        let generation = self.state.lock().await.reset(Some(context.clone()));
        info!(%context, generation, "conversation context changed");
        self.emit_timeline(context, Vec::new());
    }

    pub async fn clear_context(&self) {
        let generation = self.state.lock().await.reset(None);
        debug!(generation, "conversation context cleared");
    }

    pub async fn switch_context(
        &self,
        context: ConversationContext,
    ) -> Result<RefreshOutcome, SyncError> {
        self.set_context(context.clone()).await;
        self.refresh(&context).await
    }

    pub async fn refresh(
        &self,
        context: &ConversationContext,
    ) -> Result<RefreshOutcome, SyncError> {
        let (generation, fetch) = {
            let mut state = self.state.lock().await;
            if !state.is_active(context) {
                debug!(%context, "refresh skipped for inactive context");
                return Ok(RefreshOutcome::Discarded);
            }
            state.next_fetch += 1;
            (state.generation, state.next_fetch)
        };

        let value = self
            .session
            .resolve(context.fetch_operation(), &context.route_args())
            .await?;
        let identity = self.session.identity().await;
        let batch: Vec<Message> = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| Message::confirmed(WireMessage::from_value(item), identity.as_deref()))
                    .collect()
            })
            .unwrap_or_default();

        let messages = {
            let mut state = self.state.lock().await;
            if state.generation != generation || fetch < state.applied_fetch {
                debug!(
                    %context,
                    generation,
                    current_generation = state.generation,
                    "discarding stale timeline response"
                );
                return Ok(RefreshOutcome::Discarded);
            }
            state.applied_fetch = fetch;
            let report = state.timeline.reconcile(batch, &self.policy);
            debug!(
                %context,
                generation,
                confirmed = report.confirmed,
                dropped = report.dropped,
                superseded = report.superseded,
                newly_failed = report.newly_failed,
                "timeline merged"
            );
            state.timeline.entries()
        };

        self.emit_timeline(context.clone(), messages.clone());
        Ok(RefreshOutcome::Applied(messages))
    }

    /// Appends an optimistic entry right away, then posts it. Returns the entry's local id.
    pub async fn send(&self, context: &ConversationContext, body: &str) -> Result<Uuid, SyncError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::validation("message body is empty"));
        }
        let session = self.session.current_session().await;
        if !session.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }

        let local_id = Uuid::new_v4();
        let args = context.send_payload(body, local_id)?;
        let messages = {
            let mut state = self.state.lock().await;
            if !state.is_active(context) {
                return Err(SyncError::InactiveContext(context.to_string()));
            }
            state.timeline.push_optimistic(Message::optimistic(
                local_id,
                session.identity.unwrap_or_default(),
                body,
            ));
            state.timeline.entries()
        };
        self.emit_timeline(context.clone(), messages);

        match self.session.resolve(context.send_operation(), &args).await {
            Ok(_) => {
                debug!(%context, %local_id, "message accepted by server");
                Ok(local_id)
            }
            Err(err) => {
                warn!(%context, %local_id, "message send failed: {err}");
                Err(err)
            }
        }
    }

    /// Deletes one of the caller's own confirmed messages.
    pub async fn delete(
        &self,
        context: &ConversationContext,
        message: &Message,
    ) -> Result<(), SyncError> {
        let Some(id) = message.id.clone() else {
            return Err(SyncError::validation("message has no server id yet"));
        };
        let generation = {
            let state = self.state.lock().await;
            if !state.is_active(context) {
                return Err(SyncError::InactiveContext(context.to_string()));
            }
            match state.timeline.find(&id) {
                None => {
                    return Err(SyncError::validation(format!(
                        "message {id} is not in the timeline"
                    )))
                }
                Some(found) if !found.is_mine => {
                    return Err(SyncError::validation("only your own messages can be deleted"))
                }
                Some(_) => state.generation,
            }
        };
        if self.session.token().await.is_none() {
            return Err(SyncError::NotAuthenticated);
        }

        self.session
            .resolve(Operation::DeleteMessage, &RouteArgs::param(id.as_str()))
            .await?;

        let messages = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return Ok(());
            }
            state.timeline.remove_confirmed(&id);
            state.timeline.entries()
        };
        info!(%context, message_id = %id, "message deleted");
        self.emit_timeline(context.clone(), messages);
        Ok(())
    }

    /// Looks a confirmed message up by id in the active timeline.
    pub async fn find(&self, id: &MessageId) -> Option<Message> {
        self.state.lock().await.timeline.find(id).cloned()
    }

    fn emit_timeline(&self, context: ConversationContext, messages: Vec<Message>) {
        let _ = self
            .events
            .send(ClientEvent::TimelineUpdated { context, messages });
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
