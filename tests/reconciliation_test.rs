//! End-to-end reconciliation scenarios
//!
//! Each test drives the store the way the app does: optimistic command,
//! then a network response or a fetched payload, asserting the snapshot
//! lands in the state a user would expect to see

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use tidepool::clock::ManualClock;
use tidepool::entities::EntityId;
use tidepool::push;
use tidepool::store::Store;
use tidepool::transport::{ConflictBody, FetchPayload, MutationResponse, TransportError};
use tidepool::ActionError;

fn signed_in_store() -> (Store, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    let mut store = Store::with_clock(Arc::new(clock.clone()));
    store.sign_in(EntityId::new("u1"));
    store.apply_fetch(&FetchPayload {
        users: vec![json!({ "id": "u1", "username": "alice" })],
        ..FetchPayload::default()
    });
    (store, clock)
}

#[test]
fn test_offline_post_rolls_back_to_identical_snapshot() {
    let (mut store, _clock) = signed_in_store();
    let before = store.snapshot().clone();

    let accepted = store.create_post("hello tide", None).unwrap();
    assert!(store
        .snapshot()
        .posts
        .contains_key(accepted.entity_id.as_ref().unwrap()));

    let err = store
        .resolve(
            accepted.correlation,
            MutationResponse::Failed(TransportError::Unreachable),
        )
        .unwrap_err();
    assert!(matches!(err, ActionError::Transport { .. }));
    assert_eq!(store.snapshot(), &before);
    assert_eq!(store.pending_count(), 0);
}

#[test]
fn test_concurrent_likes_union_instead_of_clobbering() {
    let (mut store, _clock) = signed_in_store();
    store.apply_fetch(&FetchPayload {
        posts: vec![json!({ "id": "p1", "author_id": "u2", "text": "root" })],
        ..FetchPayload::default()
    });

    let accepted = store.toggle_like_post(&EntityId::new("p1")).unwrap();

    // while the like is in flight, a poll arrives where someone else
    // liked the same post and does not know about ours yet
    store.apply_fetch(&FetchPayload {
        posts: vec![json!({ "id": "p1", "author_id": "u2", "text": "root", "liked_by": ["u3"] })],
        ..FetchPayload::default()
    });

    let post = &store.snapshot().posts[&EntityId::new("p1")];
    assert!(post.liked_by.contains(&EntityId::new("u1")));
    assert!(post.liked_by.contains(&EntityId::new("u3")));

    store
        .resolve(
            accepted.correlation,
            MutationResponse::Confirmed {
                entity: json!({ "id": "p1", "author_id": "u2", "text": "root", "liked_by": ["u1"] }),
                extra: FetchPayload::default(),
            },
        )
        .unwrap();

    let post = &store.snapshot().posts[&EntityId::new("p1")];
    assert!(post.liked_by.contains(&EntityId::new("u1")));
    assert!(post.liked_by.contains(&EntityId::new("u3")));
}

#[test]
fn test_out_of_order_profile_fetches_keep_newest_fields() {
    let (mut store, _clock) = signed_in_store();

    store.apply_fetch(&FetchPayload {
        users: vec![json!({
            "id": "u2",
            "username": "bob",
            "display_name": "Bob v2",
            "updated_at": "2024-06-01T11:00:00Z",
        })],
        ..FetchPayload::default()
    });

    // a delayed response from before the rename arrives afterwards
    store.apply_fetch(&FetchPayload {
        users: vec![json!({
            "id": "u2",
            "username": "bob",
            "display_name": "Bob v1",
            "bio": "hello",
            "updated_at": "2024-06-01T10:00:00Z",
        })],
        ..FetchPayload::default()
    });

    let user = &store.snapshot().users[&EntityId::new("u2")];
    assert_eq!(user.display_name, "Bob v2");
    // the stale response still backfills the field the newer one lacked
    assert_eq!(user.bio, "hello");
}

#[test]
fn test_partial_author_snapshot_keeps_moderation_state() {
    let (mut store, _clock) = signed_in_store();

    store.apply_fetch(&FetchPayload {
        users: vec![json!({
            "id": "u2",
            "username": "bob",
            "banned": true,
            "verified": true,
            "role": "moderator",
            "updated_at": "2024-06-01T10:00:00Z",
        })],
        ..FetchPayload::default()
    });

    // an embedded author stub with no timestamps normalizes against the
    // wall clock and wins the directional merge
    store.apply_fetch(&FetchPayload {
        users: vec![json!({ "id": "u2", "username": "bob" })],
        ..FetchPayload::default()
    });

    let user = &store.snapshot().users[&EntityId::new("u2")];
    assert!(user.is_banned());
    assert!(user.is_verified());
    assert_eq!(user.effective_role(), tidepool::entities::Role::Moderator);
}

#[test]
fn test_conflict_unwinds_and_adopts_server_state() {
    let (mut store, _clock) = signed_in_store();
    store.apply_fetch(&FetchPayload {
        comments: vec![
            json!({ "id": "c1", "post_id": "p1", "author_id": "u1", "text": "mine" }),
        ],
        ..FetchPayload::default()
    });

    let accepted = store
        .edit_comment(&EntityId::new("c1"), "my edit")
        .unwrap();
    assert_eq!(store.snapshot().comments[&EntityId::new("c1")].text, "my edit");

    let err = store
        .resolve(
            accepted.correlation,
            MutationResponse::Conflict(ConflictBody {
                revision: 7,
                current: FetchPayload {
                    comments: vec![json!({
                        "id": "c1",
                        "post_id": "p1",
                        "author_id": "u1",
                        "text": "moderator edit",
                        "updated_at": "2024-06-01T12:30:00Z",
                    })],
                    ..FetchPayload::default()
                },
            }),
        )
        .unwrap_err();

    assert!(matches!(err, ActionError::Conflict { revision: 7 }));
    assert_eq!(
        store.snapshot().comments[&EntityId::new("c1")].text,
        "moderator edit"
    );
    assert_eq!(store.pending_count(), 0);
}

#[test]
fn test_push_frames_are_idempotent() {
    let (mut store, _clock) = signed_in_store();

    let frame = json!({
        "type": "message:new",
        "id": "m1",
        "from_id": "u2",
        "to_id": "u1",
        "text": "ping",
    })
    .to_string();

    push::apply_frame(&mut store, &frame);
    let once = store.snapshot().clone();
    push::apply_frame(&mut store, &frame);
    assert_eq!(store.snapshot(), &once);
    assert_eq!(store.snapshot().messages.len(), 1);
}

#[test]
fn test_expired_messages_prune_on_next_merge() {
    let (mut store, clock) = signed_in_store();
    store.apply_fetch(&FetchPayload {
        messages: vec![json!({
            "id": "m1",
            "from_id": "u2",
            "to_id": "u1",
            "text": "voice note",
            "expires_at": "2024-06-01T13:00:00Z",
        })],
        ..FetchPayload::default()
    });
    assert_eq!(store.snapshot().messages.len(), 1);

    clock.advance_secs(2 * 3600);
    store.apply_fetch(&FetchPayload::default());
    assert!(store.snapshot().messages.is_empty());
}

#[test]
fn test_stale_confirmation_cannot_resurrect_rolled_back_state() {
    let (mut store, _clock) = signed_in_store();

    let accepted = store.create_post("flaky", None).unwrap();
    store
        .resolve(
            accepted.correlation,
            MutationResponse::Failed(TransportError::Unreachable),
        )
        .unwrap_err();
    let rolled_back = store.snapshot().clone();

    // the retry path already gave up; a late duplicate response arrives
    store
        .resolve(
            accepted.correlation,
            MutationResponse::Confirmed {
                entity: json!({ "id": "zombie", "author_id": "u1", "text": "flaky" }),
                extra: FetchPayload::default(),
            },
        )
        .unwrap();
    assert_eq!(store.snapshot(), &rolled_back);
}
