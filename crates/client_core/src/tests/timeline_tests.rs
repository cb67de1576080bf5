use chrono::TimeZone;

use super::*;

fn server(id: &str, sender: &str, body: &str, is_mine: bool) -> Message {
    Message {
        id: Some(MessageId::from(id)),
        local_id: None,
        sender: sender.to_string(),
        body: body.to_string(),
        sent_at: Some(Utc::now()),
        is_mine,
        delivery: DeliveryState::Confirmed,
    }
}

fn policy(cycles: u32) -> MergePolicy {
    MergePolicy {
        pending_confirm_cycles: cycles,
        ..MergePolicy::default()
    }
}

fn ids(timeline: &Timeline) -> Vec<Option<String>> {
    timeline
        .entries()
        .into_iter()
        .map(|message| message.id.map(|id| id.0))
        .collect()
}

#[test]
fn batch_is_deduplicated_by_id_first_occurrence_wins() {
    let mut timeline = Timeline::new();
    let report = timeline.reconcile(
        vec![
            server("1", "bob", "first", false),
            server("2", "carol", "second", false),
            server("1", "bob", "duplicate", false),
        ],
        &MergePolicy::default(),
    );

    assert_eq!(report.dropped, 1);
    let entries = timeline.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].body, "first");
}

#[test]
fn reconciling_same_batch_twice_is_idempotent() {
    let batch = vec![
        server("1", "bob", "hey", false),
        server("2", "alice", "hi", true),
    ];
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "pending one"));

    timeline.reconcile(batch.clone(), &MergePolicy::default());
    let first = timeline.entries();
    timeline.reconcile(batch, &MergePolicy::default());
    let second = timeline.entries();

    assert_eq!(first, second);
    assert_eq!(second.len(), 3);
    assert!(second[2].is_pending());
}

#[test]
fn optimistic_entry_is_superseded_by_round_tripped_client_id() {
    let local_id = Uuid::new_v4();
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(local_id, "alice", "hi"));

    let mut confirmed = server("10", "alice", "hi", true);
    confirmed.local_id = Some(local_id);
    let report = timeline.reconcile(vec![confirmed], &MergePolicy::default());

    assert_eq!(report.superseded, 1);
    let entries = timeline.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delivery, DeliveryState::Confirmed);
    assert_eq!(entries[0].id, Some(MessageId::from("10")));
}

#[test]
fn optimistic_entry_is_superseded_by_fresh_matching_content() {
    let mut timeline = Timeline::new();
    timeline.reconcile(vec![server("1", "alice", "hi", true)], &MergePolicy::default());
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "hi"));

    // The old "hi" is not fresh, so it cannot confirm the new send.
    timeline.reconcile(vec![server("1", "alice", "hi", true)], &MergePolicy::default());
    assert_eq!(timeline.len(), 2);
    assert!(timeline.entries()[1].is_pending());

    timeline.reconcile(
        vec![server("1", "alice", "hi", true), server("2", "alice", "hi", true)],
        &MergePolicy::default(),
    );
    assert_eq!(
        ids(&timeline),
        vec![Some("1".to_string()), Some("2".to_string())]
    );
}

#[test]
fn other_senders_never_confirm_an_optimistic_message() {
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "hi"));

    timeline.reconcile(vec![server("5", "bob", "hi", false)], &MergePolicy::default());

    let entries = timeline.entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].is_pending());
}

#[test]
fn server_time_far_before_send_does_not_confirm() {
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "hi"));

    let mut old = server("3", "alice", "hi", true);
    old.sent_at = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    timeline.reconcile(vec![old], &MergePolicy::default());

    assert_eq!(timeline.len(), 2);
}

#[test]
fn each_batch_entry_confirms_at_most_one_optimistic_message() {
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "ok"));
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "ok"));

    timeline.reconcile(vec![server("7", "alice", "ok", true)], &MergePolicy::default());

    let entries = timeline.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, Some(MessageId::from("7")));
    assert!(entries[1].is_pending());
}

#[test]
fn unconfirmed_message_fails_after_configured_cycles_and_can_still_confirm() {
    let mut timeline = Timeline::new();
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "lost?"));

    let report = timeline.reconcile(Vec::new(), &policy(2));
    assert_eq!(report.newly_failed, 0);
    assert!(timeline.entries()[0].is_pending());

    let report = timeline.reconcile(Vec::new(), &policy(2));
    assert_eq!(report.newly_failed, 1);
    assert!(timeline.entries()[0].is_failed());

    timeline.reconcile(vec![server("9", "alice", "lost?", true)], &policy(2));
    let entries = timeline.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delivery, DeliveryState::Confirmed);
}

#[test]
fn tombstoned_ids_are_not_resurrected_by_late_polls() {
    let mut timeline = Timeline::new();
    timeline.reconcile(
        vec![server("1", "alice", "a", true), server("2", "bob", "b", false)],
        &MergePolicy::default(),
    );

    assert!(timeline.remove_confirmed(&MessageId::from("1")));
    let report = timeline.reconcile(
        vec![server("1", "alice", "a", true), server("2", "bob", "b", false)],
        &MergePolicy::default(),
    );

    assert_eq!(report.dropped, 1);
    assert_eq!(ids(&timeline), vec![Some("2".to_string())]);
    assert!(timeline.find(&MessageId::from("1")).is_none());
}

#[test]
fn id_less_server_messages_are_kept() {
    let mut timeline = Timeline::new();
    let mut anonymous = server("x", "bob", "no id", false);
    anonymous.id = None;

    timeline.reconcile(vec![anonymous.clone(), anonymous], &MergePolicy::default());

    assert_eq!(timeline.len(), 2);
}

#[test]
fn clear_discards_everything() {
    let mut timeline = Timeline::new();
    timeline.reconcile(vec![server("1", "bob", "b", false)], &MergePolicy::default());
    timeline.push_optimistic(Message::optimistic(Uuid::new_v4(), "alice", "a"));
    timeline.remove_confirmed(&MessageId::from("1"));

    timeline.clear();
    assert!(timeline.is_empty());

    timeline.reconcile(vec![server("1", "bob", "b", false)], &MergePolicy::default());
    assert_eq!(timeline.len(), 1);
}

#[test]
fn confirmed_message_marks_own_sender_as_mine() {
    let wire = WireMessage {
        id: Some("4".to_string()),
        sender: Some("alice".to_string()),
        text: "hi".to_string(),
        client_id: Some("not-a-uuid".to_string()),
        ..WireMessage::default()
    };

    let mine = Message::confirmed(wire.clone(), Some("alice"));
    assert!(mine.is_mine);
    assert_eq!(mine.local_id, None);

    let theirs = Message::confirmed(wire, Some("bob"));
    assert!(!theirs.is_mine);
}
