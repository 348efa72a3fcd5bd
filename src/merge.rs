//! Merge Engine
//!
//! Folds an incoming batch of normalized entities into the existing
//! snapshot, producing the new authoritative snapshot. This is a pure data
//! transformation: it cannot fail, and malformed input has already been
//! degraded to defaults by the normalizer.
//!
//! # Conflict Rules
//!
//! - **Users** resolve by `updated_at`: the newer record wins field-by-field,
//!   the older record only backfills fields the winner lacks. A stale
//!   partial payload (e.g. an author snapshot embedded in a feed response)
//!   can therefore never overwrite fresher full-profile data.
//! - **Set-membership fields** (`liked_by`, `read_by`, `viewed_by`, follow
//!   edges) merge by union — monotonic growth, never last-write-wins.
//! - **`reposted_by`** is never taken from any single payload: it is
//!   recomputed from the full set of sibling posts after every merge, with
//!   at most one repost per (author, root) pair surviving.
//! - **Ephemeral entities** (stories, expiring voice messages) whose expiry
//!   has passed are dropped from the merged collection entirely.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::entities::{
    EntityId, Follow, Group, GroupMember, GroupPost, GroupPostComment, Message, Notification,
    Post, PostComment, Story, User,
};
use crate::snapshot::Snapshot;

/// A batch of normalized entities from a fetch response or push event.
///
/// Responses often carry more than one collection (a feed page embeds author
/// snapshots, a group page embeds members); the merge engine folds them all
/// in one step.
#[derive(Debug, Clone, Default)]
pub struct EntityBatch {
    /// Users to fold into the user collection
    pub users: Vec<User>,
    /// Feed posts
    pub posts: Vec<Post>,
    /// Post comments
    pub comments: Vec<PostComment>,
    /// Direct messages
    pub messages: Vec<Message>,
    /// Follow edges
    pub follows: Vec<Follow>,
    /// Groups
    pub groups: Vec<Group>,
    /// Group memberships
    pub group_members: Vec<GroupMember>,
    /// Group posts
    pub group_posts: Vec<GroupPost>,
    /// Group post comments
    pub group_comments: Vec<GroupPostComment>,
    /// Stories
    pub stories: Vec<Story>,
    /// Notifications
    pub notifications: Vec<Notification>,
}

impl EntityBatch {
    /// Whether the batch carries nothing at all
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.posts.is_empty()
            && self.comments.is_empty()
            && self.messages.is_empty()
            && self.follows.is_empty()
            && self.groups.is_empty()
            && self.group_members.is_empty()
            && self.group_posts.is_empty()
            && self.group_comments.is_empty()
            && self.stories.is_empty()
            && self.notifications.is_empty()
    }
}

/// Merge a batch into a snapshot, returning the new snapshot.
///
/// `now` is the instant used for expiry pruning; pass the store clock's
/// current time.
pub fn merge(snapshot: &Snapshot, batch: &EntityBatch, now: DateTime<Utc>) -> Snapshot {
    let mut next = snapshot.clone();

    for incoming in &batch.users {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.users.remove(&incoming.id) {
            Some(existing) => merge_user(&existing, incoming),
            None => incoming.clone(),
        };
        next.users.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.posts {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.posts.remove(&incoming.id) {
            Some(existing) => merge_post(&existing, incoming),
            None => incoming.clone(),
        };
        next.posts.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.comments {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.comments.remove(&incoming.id) {
            Some(existing) => merge_comment(&existing, incoming),
            None => incoming.clone(),
        };
        next.comments.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.messages {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.messages.remove(&incoming.id) {
            Some(existing) => merge_message(&existing, incoming),
            None => incoming.clone(),
        };
        next.messages.insert(merged.id.clone(), merged);
    }

    for edge in &batch.follows {
        next.follows.insert(edge.clone());
    }

    for incoming in &batch.groups {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.groups.remove(&incoming.id) {
            Some(existing) => merge_group(&existing, incoming),
            None => incoming.clone(),
        };
        next.groups.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.group_members {
        next.group_members.insert(incoming.key(), incoming.clone());
    }

    for incoming in &batch.group_posts {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.group_posts.remove(&incoming.id) {
            Some(existing) => merge_group_post(&existing, incoming),
            None => incoming.clone(),
        };
        next.group_posts.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.group_comments {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.group_comments.remove(&incoming.id) {
            Some(existing) => merge_group_comment(&existing, incoming),
            None => incoming.clone(),
        };
        next.group_comments.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.stories {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.stories.remove(&incoming.id) {
            Some(existing) => merge_story(&existing, incoming),
            None => incoming.clone(),
        };
        next.stories.insert(merged.id.clone(), merged);
    }

    for incoming in &batch.notifications {
        if incoming.id.is_empty() {
            continue;
        }
        let merged = match next.notifications.remove(&incoming.id) {
            Some(existing) => merge_notification(&existing, incoming),
            None => incoming.clone(),
        };
        next.notifications.insert(merged.id.clone(), merged);
    }

    finalize(&mut next, now);

    debug!(
        users = next.users.len(),
        posts = next.posts.len(),
        messages = next.messages.len(),
        "merged entity batch"
    );
    next
}

/// Apply the global passes that keep the snapshot consistent regardless of
/// which batch arrived: repost bookkeeping and expiry pruning.
pub fn finalize(snapshot: &mut Snapshot, now: DateTime<Utc>) {
    recompute_feed_reposts(&mut snapshot.posts);
    recompute_group_reposts(&mut snapshot.group_posts);
    snapshot.messages.retain(|_, m| !m.is_expired(now));
    snapshot.stories.retain(|_, s| !s.is_expired(now));
}

/// Directional last-writer-wins merge for user records.
///
/// The record with the greater `updated_at` wins every field it carries a
/// value for; the loser backfills string fields the winner left empty and
/// moderation flags/role the winner's payload never carried. A partial
/// record can therefore never clear a ban or demote a role it knows
/// nothing about. Timestamps are monotone: `updated_at` and
/// `last_seen_at` take the max, `created_at` the min.
pub fn merge_user(existing: &User, incoming: &User) -> User {
    let (winner, loser) = if incoming.updated_at >= existing.updated_at {
        (incoming, existing)
    } else {
        (existing, incoming)
    };
    let pick = |w: &str, l: &str| {
        if w.is_empty() { l.to_string() } else { w.to_string() }
    };
    User {
        id: existing.id.clone(),
        username: pick(&winner.username, &loser.username),
        display_name: pick(&winner.display_name, &loser.display_name),
        bio: pick(&winner.bio, &loser.bio),
        status: pick(&winner.status, &loser.status),
        avatar_url: pick(&winner.avatar_url, &loser.avatar_url),
        cover_url: pick(&winner.cover_url, &loser.cover_url),
        banned: winner.banned.or(loser.banned),
        restricted: winner.restricted.or(loser.restricted),
        verified: winner.verified.or(loser.verified),
        role: winner.role.or(loser.role),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
        last_seen_at: existing.last_seen_at.max(incoming.last_seen_at),
    }
}

fn merge_post(existing: &Post, incoming: &Post) -> Post {
    let newer = if incoming.updated_at >= existing.updated_at {
        incoming
    } else {
        existing
    };
    Post {
        id: existing.id.clone(),
        author_id: newer.author_id.clone(),
        text: newer.text.clone(),
        media: newer.media.clone().or_else(|| existing.media.clone()),
        liked_by: union(&existing.liked_by, &incoming.liked_by),
        // recomputed in finalize()
        reposted_by: BTreeSet::new(),
        repost_of: incoming.repost_of.clone().or_else(|| existing.repost_of.clone()),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
        provenance: existing.provenance,
    }
}

fn merge_comment(existing: &PostComment, incoming: &PostComment) -> PostComment {
    let newer = if incoming.updated_at >= existing.updated_at {
        incoming
    } else {
        existing
    };
    PostComment {
        id: existing.id.clone(),
        post_id: existing.post_id.clone(),
        author_id: newer.author_id.clone(),
        text: newer.text.clone(),
        liked_by: union(&existing.liked_by, &incoming.liked_by),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
        provenance: existing.provenance,
    }
}

/// Read receipts only grow under merge; text follows the newer edit.
fn merge_message(existing: &Message, incoming: &Message) -> Message {
    let newer_edit = incoming.edited_at.unwrap_or(incoming.created_at)
        >= existing.edited_at.unwrap_or(existing.created_at);
    let newer = if newer_edit { incoming } else { existing };
    Message {
        id: existing.id.clone(),
        from_id: existing.from_id.clone(),
        to_id: existing.to_id.clone(),
        text: newer.text.clone(),
        media: newer.media.clone().or_else(|| existing.media.clone()),
        expires_at: incoming.expires_at.or(existing.expires_at),
        edited_at: match (existing.edited_at, incoming.edited_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        },
        read_by: union(&existing.read_by, &incoming.read_by),
        created_at: existing.created_at.min(incoming.created_at),
        provenance: existing.provenance,
    }
}

fn merge_group(existing: &Group, incoming: &Group) -> Group {
    let (winner, loser) = if incoming.updated_at >= existing.updated_at {
        (incoming, existing)
    } else {
        (existing, incoming)
    };
    let pick = |w: &str, l: &str| {
        if w.is_empty() { l.to_string() } else { w.to_string() }
    };
    Group {
        id: existing.id.clone(),
        name: pick(&winner.name, &loser.name),
        description: pick(&winner.description, &loser.description),
        cover_url: pick(&winner.cover_url, &loser.cover_url),
        creator_id: if winner.creator_id.is_empty() {
            loser.creator_id.clone()
        } else {
            winner.creator_id.clone()
        },
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
    }
}

fn merge_group_post(existing: &GroupPost, incoming: &GroupPost) -> GroupPost {
    let newer = if incoming.updated_at >= existing.updated_at {
        incoming
    } else {
        existing
    };
    GroupPost {
        id: existing.id.clone(),
        group_id: existing.group_id.clone(),
        author_id: newer.author_id.clone(),
        text: newer.text.clone(),
        media: newer.media.clone().or_else(|| existing.media.clone()),
        liked_by: union(&existing.liked_by, &incoming.liked_by),
        reposted_by: BTreeSet::new(),
        repost_of: incoming.repost_of.clone().or_else(|| existing.repost_of.clone()),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
        provenance: existing.provenance,
    }
}

fn merge_group_comment(existing: &GroupPostComment, incoming: &GroupPostComment) -> GroupPostComment {
    let newer = if incoming.updated_at >= existing.updated_at {
        incoming
    } else {
        existing
    };
    GroupPostComment {
        id: existing.id.clone(),
        group_id: existing.group_id.clone(),
        post_id: existing.post_id.clone(),
        author_id: newer.author_id.clone(),
        text: newer.text.clone(),
        liked_by: union(&existing.liked_by, &incoming.liked_by),
        created_at: existing.created_at.min(incoming.created_at),
        updated_at: existing.updated_at.max(incoming.updated_at),
        provenance: existing.provenance,
    }
}

fn merge_story(existing: &Story, incoming: &Story) -> Story {
    Story {
        id: existing.id.clone(),
        author_id: existing.author_id.clone(),
        media: incoming.media.clone().or_else(|| existing.media.clone()),
        text: if incoming.text.is_empty() {
            existing.text.clone()
        } else {
            incoming.text.clone()
        },
        viewed_by: union(&existing.viewed_by, &incoming.viewed_by),
        created_at: existing.created_at.min(incoming.created_at),
        expires_at: existing.expires_at.max(incoming.expires_at),
        provenance: existing.provenance,
    }
}

/// The read flag only grows; a notification once read stays read even if a
/// stale payload says otherwise.
fn merge_notification(existing: &Notification, incoming: &Notification) -> Notification {
    Notification {
        read: existing.read || incoming.read,
        ..incoming.clone()
    }
}

/// Rebuild `reposted_by` for the feed from the full set of sibling posts.
///
/// Every post with a `repost_of` records its author as having reposted the
/// root; repost posts themselves always carry an empty set. At most one
/// repost per (author, root) pair survives — duplicates keep the most
/// recently created one (id as tie break).
fn recompute_feed_reposts(posts: &mut BTreeMap<EntityId, Post>) {
    let keep = dedup_reposts(
        posts
            .values()
            .filter_map(|p| p.repost_of.as_ref().map(|root| (p.id.clone(), p.author_id.clone(), root.clone(), p.created_at))),
    );
    posts.retain(|id, p| !p.is_repost() || keep.contains_key(id));

    let mut reposted: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
    for (author, root) in keep.values() {
        reposted.entry(root.clone()).or_default().insert(author.clone());
    }
    for post in posts.values_mut() {
        post.reposted_by = if post.is_repost() {
            BTreeSet::new()
        } else {
            reposted.remove(&post.id).unwrap_or_default()
        };
    }
}

fn recompute_group_reposts(posts: &mut BTreeMap<EntityId, GroupPost>) {
    let keep = dedup_reposts(
        posts
            .values()
            .filter_map(|p| p.repost_of.as_ref().map(|root| (p.id.clone(), p.author_id.clone(), root.clone(), p.created_at))),
    );
    posts.retain(|id, p| !p.is_repost() || keep.contains_key(id));

    let mut reposted: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
    for (author, root) in keep.values() {
        reposted.entry(root.clone()).or_default().insert(author.clone());
    }
    for post in posts.values_mut() {
        post.reposted_by = if post.is_repost() {
            BTreeSet::new()
        } else {
            reposted.remove(&post.id).unwrap_or_default()
        };
    }
}

/// Pick the surviving repost post per (author, root) pair.
///
/// Returns surviving post id → (author, root).
fn dedup_reposts(
    reposts: impl Iterator<Item = (EntityId, EntityId, EntityId, DateTime<Utc>)>,
) -> BTreeMap<EntityId, (EntityId, EntityId)> {
    let mut best: BTreeMap<(EntityId, EntityId), (DateTime<Utc>, EntityId)> = BTreeMap::new();
    for (id, author, root, created_at) in reposts {
        let key = (author, root);
        match best.get(&key) {
            Some((at, existing_id)) if (*at, existing_id.clone()) >= (created_at, id.clone()) => {}
            _ => {
                best.insert(key, (created_at, id));
            }
        }
    }
    best.into_iter()
        .map(|((author, root), (_, id))| (id, (author, root)))
        .collect()
}

fn union(a: &BTreeSet<EntityId>, b: &BTreeSet<EntityId>) -> BTreeSet<EntityId> {
    a.union(b).cloned().collect()
}
