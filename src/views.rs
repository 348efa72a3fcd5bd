//! Derived-View Projector
//!
//! Pure read-only computations over the snapshot, recomputed by the UI on
//! every snapshot change. Nothing in this module writes back into the
//! store.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::entities::{EntityId, GroupMember, GroupPost, Message, Post, PostComment, Story};
use crate::snapshot::Snapshot;

/// Number of unread notifications for the local user
pub fn unread_notification_count(snapshot: &Snapshot) -> usize {
    let Some(me) = snapshot.current_user() else {
        return 0;
    };
    snapshot
        .notifications
        .values()
        .filter(|n| &n.user_id == me && !n.read)
        .count()
}

/// Unread direct-message counts per peer, for the local user
pub fn unread_message_counts(snapshot: &Snapshot) -> BTreeMap<EntityId, usize> {
    let Some(me) = snapshot.current_user() else {
        return BTreeMap::new();
    };
    let mut counts = BTreeMap::new();
    for message in snapshot.messages.values() {
        if &message.to_id == me && !message.is_read_by(me) {
            *counts.entry(message.from_id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Messages between the local user and a peer, oldest first.
///
/// Expiry is re-checked against `now` because time passes between merges.
pub fn chat_messages<'a>(
    snapshot: &'a Snapshot,
    peer: &EntityId,
    now: DateTime<Utc>,
) -> Vec<&'a Message> {
    let Some(me) = snapshot.current_user() else {
        return Vec::new();
    };
    let mut messages: Vec<&Message> = snapshot
        .messages
        .values()
        .filter(|m| m.is_between(me, peer) && !m.is_expired(now))
        .collect();
    messages.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    messages
}

/// The feed, newest first
pub fn feed(snapshot: &Snapshot) -> Vec<&Post> {
    let mut posts: Vec<&Post> = snapshot.posts.values().collect();
    posts.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
    posts
}

/// One top-level comment and the replies attributed to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    /// The top-level comment
    pub root: PostComment,
    /// Replies, oldest first
    pub replies: Vec<PostComment>,
}

/// Thread structure for a post's comments.
///
/// Threading is a convention, not a stored relationship: a comment opening
/// with `@username` attaches to that user's most recent earlier comment on
/// the same post (or to the thread that comment already belongs to). When
/// the mentioned user has no earlier comment here, the comment falls back
/// to top-level.
pub fn comment_threads(snapshot: &Snapshot, post_id: &EntityId) -> Vec<CommentThread> {
    let mut comments: Vec<&PostComment> = snapshot
        .comments
        .values()
        .filter(|c| &c.post_id == post_id)
        .collect();
    comments.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

    let mut threads: Vec<CommentThread> = Vec::new();
    // comment id -> thread index, for attaching replies-to-replies
    let mut thread_of: BTreeMap<EntityId, usize> = BTreeMap::new();

    for comment in comments {
        let target = comment
            .reply_mention()
            .and_then(|username| snapshot.user_by_username(username))
            .and_then(|user| {
                threads
                    .iter()
                    .flat_map(|t| std::iter::once(&t.root).chain(t.replies.iter()))
                    .filter(|c| c.author_id == user.id)
                    .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
                    .map(|c| c.id.clone())
            })
            .and_then(|id| thread_of.get(&id).copied());

        match target {
            Some(index) => {
                thread_of.insert(comment.id.clone(), index);
                threads[index].replies.push(comment.clone());
            }
            None => {
                thread_of.insert(comment.id.clone(), threads.len());
                threads.push(CommentThread {
                    root: comment.clone(),
                    replies: Vec::new(),
                });
            }
        }
    }
    threads
}

/// Members of a group, admins first then by join time
pub fn group_members<'a>(snapshot: &'a Snapshot, group_id: &EntityId) -> Vec<&'a GroupMember> {
    let mut members: Vec<&GroupMember> = snapshot
        .group_members
        .values()
        .filter(|m| &m.group_id == group_id)
        .collect();
    members.sort_by(|a, b| {
        (b.role as u8, std::cmp::Reverse(b.joined_at))
            .cmp(&(a.role as u8, std::cmp::Reverse(a.joined_at)))
    });
    members
}

/// Posts in a group, newest first
pub fn group_posts<'a>(snapshot: &'a Snapshot, group_id: &EntityId) -> Vec<&'a GroupPost> {
    let mut posts: Vec<&GroupPost> = snapshot
        .group_posts
        .values()
        .filter(|p| &p.group_id == group_id)
        .collect();
    posts.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
    posts
}

/// Unexpired stories grouped by author, each author's stories oldest first
pub fn story_shelf(snapshot: &Snapshot, now: DateTime<Utc>) -> BTreeMap<EntityId, Vec<&Story>> {
    let mut shelf: BTreeMap<EntityId, Vec<&Story>> = BTreeMap::new();
    for story in snapshot.stories.values() {
        if !story.is_expired(now) {
            shelf.entry(story.author_id.clone()).or_default().push(story);
        }
    }
    for stories in shelf.values_mut() {
        stories.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    }
    shelf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::Store;
    use crate::transport::FetchPayload;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> Store {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let mut store = Store::with_clock(Arc::new(clock));
        store.sign_in(EntityId::new("u1"));
        store
    }

    #[test]
    fn test_unread_counts() {
        let mut store = store();
        store.apply_fetch(&FetchPayload {
            messages: vec![
                json!({ "id": "m1", "from_id": "u2", "to_id": "u1", "text": "a" }),
                json!({ "id": "m2", "from_id": "u2", "to_id": "u1", "text": "b" }),
                json!({ "id": "m3", "from_id": "u3", "to_id": "u1", "text": "c", "read_by": ["u3", "u1"] }),
            ],
            notifications: vec![
                json!({ "id": "n1", "user_id": "u1", "actor_id": "u2", "text": "hi" }),
                json!({ "id": "n2", "user_id": "u1", "actor_id": "u2", "text": "hi", "read": true }),
            ],
            ..FetchPayload::default()
        });

        assert_eq!(unread_notification_count(store.snapshot()), 1);
        let counts = unread_message_counts(store.snapshot());
        assert_eq!(counts.get(&EntityId::new("u2")), Some(&2));
        assert_eq!(counts.get(&EntityId::new("u3")), None);
    }

    #[test]
    fn test_feed_is_newest_first() {
        let mut store = store();
        store.apply_fetch(&FetchPayload {
            posts: vec![
                json!({ "id": "old", "author_id": "u1", "created_at": "2024-06-01T09:00:00Z" }),
                json!({ "id": "new", "author_id": "u1", "created_at": "2024-06-01T11:00:00Z" }),
            ],
            ..FetchPayload::default()
        });
        let ids: Vec<_> = feed(store.snapshot()).iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![EntityId::new("new"), EntityId::new("old")]);
    }

    #[test]
    fn test_comment_threading_heuristic() {
        let mut store = store();
        store.apply_fetch(&FetchPayload {
            users: vec![
                json!({ "id": "u2", "username": "bob" }),
                json!({ "id": "u3", "username": "cara" }),
            ],
            posts: vec![json!({ "id": "p1", "author_id": "u2" })],
            comments: vec![
                json!({ "id": "c1", "post_id": "p1", "author_id": "u2", "text": "first", "created_at": "2024-06-01T09:00:00Z" }),
                json!({ "id": "c2", "post_id": "p1", "author_id": "u3", "text": "@bob agreed", "created_at": "2024-06-01T09:05:00Z" }),
                json!({ "id": "c3", "post_id": "p1", "author_id": "u2", "text": "@cara thanks", "created_at": "2024-06-01T09:10:00Z" }),
                json!({ "id": "c4", "post_id": "p1", "author_id": "u3", "text": "@nobody hm", "created_at": "2024-06-01T09:15:00Z" }),
            ],
            ..FetchPayload::default()
        });

        let threads = comment_threads(store.snapshot(), &EntityId::new("p1"));
        // c2 replies to bob's c1; c3 replies to cara's c2, landing in the
        // same thread; c4 mentions an unknown user and falls back to
        // top-level.
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].root.id, EntityId::new("c1"));
        assert_eq!(threads[0].replies.len(), 2);
        assert_eq!(threads[1].root.id, EntityId::new("c4"));
    }

    #[test]
    fn test_chat_messages_filter_expired() {
        let mut store = store();
        store.apply_fetch(&FetchPayload {
            messages: vec![
                json!({ "id": "m1", "from_id": "u2", "to_id": "u1", "text": "keep" }),
                json!({
                    "id": "m2", "from_id": "u2", "to_id": "u1", "text": "voice",
                    "expires_at": "2024-06-01T12:30:00Z",
                }),
            ],
            ..FetchPayload::default()
        });

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap();
        let visible = chat_messages(store.snapshot(), &EntityId::new("u2"), now);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, EntityId::new("m1"));
    }

    #[test]
    fn test_story_shelf_groups_by_author() {
        let mut store = store();
        store.apply_fetch(&FetchPayload {
            stories: vec![
                json!({ "id": "s1", "author_id": "u2", "media": { "kind": "image", "url": "http://s/1" } }),
                json!({ "id": "s2", "author_id": "u2", "media": { "kind": "image", "url": "http://s/2" } }),
                json!({ "id": "s3", "author_id": "u3", "media": { "kind": "image", "url": "http://s/3" } }),
            ],
            ..FetchPayload::default()
        });

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap();
        let shelf = story_shelf(store.snapshot(), now);
        assert_eq!(shelf.len(), 2);
        assert_eq!(shelf[&EntityId::new("u2")].len(), 2);
    }
}
