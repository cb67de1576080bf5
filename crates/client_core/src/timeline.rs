//! Per-conversation message list and the rule that folds a polled batch into it.
//!
//! Merging the same batch again leaves the visible entries unchanged, with
//! one exception: every merge that fails to confirm a pending message counts
//! as a missed cycle, and after `pending_confirm_cycles` misses the message
//! turns `Failed`. That rule takes precedence over idempotence.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{DeliveryState, MessageId},
    protocol::WireMessage,
};
use uuid::Uuid;

use crate::config::{DEFAULT_CONFIRM_SKEW, DEFAULT_PENDING_CONFIRM_CYCLES};

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server id. Absent on optimistic entries and on server rows without one.
    pub id: Option<MessageId>,
    /// Client correlation id sent along with an optimistic message.
    pub local_id: Option<Uuid>,
    pub sender: String,
    pub body: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub is_mine: bool,
    pub delivery: DeliveryState,
}

impl Message {
    pub fn confirmed(wire: WireMessage, identity: Option<&str>) -> Self {
        let sender = wire.sender.unwrap_or_default();
        let is_mine = wire.mine
            || identity.is_some_and(|identity| !sender.is_empty() && sender == identity);
        Self {
            id: wire.id.map(MessageId::from),
            local_id: wire
                .client_id
                .as_deref()
                .and_then(|raw| Uuid::parse_str(raw).ok()),
            sender,
            body: wire.text,
            sent_at: wire.sent_at,
            is_mine,
            delivery: DeliveryState::Confirmed,
        }
    }

    pub fn optimistic(local_id: Uuid, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: None,
            local_id: Some(local_id),
            sender: sender.into(),
            body: body.into(),
            sent_at: Some(Utc::now()),
            is_mine: true,
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.delivery == DeliveryState::Failed
    }

    fn fingerprint(&self) -> Fingerprint {
        match &self.id {
            Some(id) => Fingerprint::Id(id.clone()),
            None => Fingerprint::Content {
                sender: self.sender.clone(),
                body: self.body.clone(),
                sent_at: self.sent_at.map(|at| at.timestamp_millis()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Fingerprint {
    Id(MessageId),
    Content {
        sender: String,
        body: String,
        sent_at: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub pending_confirm_cycles: u32,
    pub confirm_skew: Duration,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            pending_confirm_cycles: DEFAULT_PENDING_CONFIRM_CYCLES,
            confirm_skew: Duration::seconds(DEFAULT_CONFIRM_SKEW.as_secs() as i64),
        }
    }
}

/// Counters describing one merge, used for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub confirmed: usize,
    pub dropped: usize,
    pub superseded: usize,
    pub newly_failed: usize,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    message: Message,
    misses: u32,
}

#[derive(Debug, Default)]
pub struct Timeline {
    confirmed: Vec<Message>,
    optimistic: Vec<PendingEntry>,
    tombstones: HashSet<MessageId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server order first, then unresolved optimistic entries in local order.
    pub fn entries(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .cloned()
            .chain(self.optimistic.iter().map(|entry| entry.message.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.optimistic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push_optimistic(&mut self, message: Message) {
        self.optimistic.push(PendingEntry { message, misses: 0 });
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.confirmed
            .iter()
            .find(|message| message.id.as_ref() == Some(id))
    }

    /// Drops a confirmed entry and remembers its id so later polls cannot bring it back.
    pub fn remove_confirmed(&mut self, id: &MessageId) -> bool {
        self.tombstones.insert(id.clone());
        let before = self.confirmed.len();
        self.confirmed
            .retain(|message| message.id.as_ref() != Some(id));
        before != self.confirmed.len()
    }

    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.optimistic.clear();
        self.tombstones.clear();
    }

    pub fn reconcile(&mut self, batch: Vec<Message>, policy: &MergePolicy) -> MergeReport {
        let mut report = MergeReport::default();

        let mut seen = HashSet::new();
        let mut incoming = Vec::with_capacity(batch.len());
        for message in batch {
            if let Some(id) = &message.id {
                if self.tombstones.contains(id) || !seen.insert(id.clone()) {
                    report.dropped += 1;
                    continue;
                }
            }
            incoming.push(message);
        }

        let previous: HashSet<Fingerprint> =
            self.confirmed.iter().map(Message::fingerprint).collect();
        let fresh: Vec<bool> = incoming
            .iter()
            .map(|message| !previous.contains(&message.fingerprint()))
            .collect();
        let mut claimed = vec![false; incoming.len()];

        let mut remaining = Vec::with_capacity(self.optimistic.len());
        for mut entry in std::mem::take(&mut self.optimistic) {
            if let Some(index) = claim(&entry.message, &incoming, &fresh, &claimed, policy) {
                claimed[index] = true;
                report.superseded += 1;
                continue;
            }
            if entry.message.is_pending() {
                entry.misses += 1;
                if entry.misses >= policy.pending_confirm_cycles {
                    entry.message.delivery = DeliveryState::Failed;
                    report.newly_failed += 1;
                }
            }
            remaining.push(entry);
        }

        report.confirmed = incoming.len();
        self.confirmed = incoming;
        self.optimistic = remaining;
        report
    }
}

/// Index of the batch entry that confirms `optimistic`, if any.
fn claim(
    optimistic: &Message,
    incoming: &[Message],
    fresh: &[bool],
    claimed: &[bool],
    policy: &MergePolicy,
) -> Option<usize> {
    if let Some(local_id) = optimistic.local_id {
        let by_correlation = (0..incoming.len())
            .find(|&index| !claimed[index] && incoming[index].local_id == Some(local_id));
        if by_correlation.is_some() {
            return by_correlation;
        }
    }

    let body = optimistic.body.trim();
    (0..incoming.len()).find(|&index| {
        let message = &incoming[index];
        fresh[index]
            && !claimed[index]
            && message.local_id.is_none()
            && message.is_mine
            && message.body.trim() == body
            && match (message.sent_at, optimistic.sent_at) {
                (Some(server), Some(local)) => server >= local - policy.confirm_skew,
                _ => true,
            }
    })
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
