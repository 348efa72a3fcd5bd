//! Entity Normalizer
//!
//! Converts heterogeneous raw server payloads into canonical entities.
//! Endpoints disagree on field casing (snake_case vs camelCase) and on how
//! much of an entity they send, so every normalizer here:
//!
//! - accepts both key spellings for every field,
//! - accepts ids as JSON strings or numbers,
//! - accepts timestamps as RFC3339 strings or epoch milliseconds,
//! - defaults every missing field deterministically (string → `""`,
//!   bool → `false`, set → empty, timestamp → the payload's best fallback
//!   timestamp or the current time),
//! - never fails: malformed input yields a best-effort default entity.
//!
//! Normalizers are pure per entity; the only ambient input is the [`Clock`]
//! used for fallback timestamps.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::clock::Clock;
use crate::entities::{
    EntityId, Follow, Group, GroupMember, GroupPost, GroupPostComment, GroupRole, Media, MediaKind,
    Message, Notification, Post, PostComment, Provenance, Role, Story, User,
};

/// Lenient view over a raw JSON object.
///
/// Getter methods take the field's snake_case name and derive the camelCase
/// spelling, so call sites name each field once.
pub struct RawObject<'a> {
    value: &'a Value,
}

impl<'a> RawObject<'a> {
    /// Wrap a raw payload value. Non-objects behave as an empty object.
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn get(&self, snake: &str) -> Option<&'a Value> {
        let obj = self.value.as_object()?;
        if let Some(v) = obj.get(snake) {
            return Some(v);
        }
        obj.get(camel_case(snake).as_str())
    }

    /// String field, defaulting to `""`
    pub fn string(&self, key: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Boolean field, defaulting to `false`
    pub fn boolean(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Optional boolean field; `None` when the payload lacks the key.
    ///
    /// Used for moderation flags, where absence must stay distinguishable
    /// from `false` so a partial record cannot clear a known flag on merge.
    pub fn boolean_opt(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Optional role field with lenient parsing; `None` when absent
    pub fn role_opt(&self, key: &str) -> Option<Role> {
        self.get(key).and_then(Value::as_str).map(Role::parse)
    }

    /// Entity id field; numbers are stringified, anything else is empty
    pub fn id(&self, key: &str) -> EntityId {
        EntityId::new(self.string(key))
    }

    /// Optional entity id field; absent, null or empty yields `None`
    pub fn id_opt(&self, key: &str) -> Option<EntityId> {
        let id = self.id(key);
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// Timestamp field, falling back to the given instant
    pub fn timestamp_or(&self, key: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp_opt(key).unwrap_or(fallback)
    }

    /// Optional timestamp field (RFC3339 string or epoch milliseconds)
    pub fn timestamp_opt(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key)? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            _ => None,
        }
    }

    /// Set-membership field: an array of ids, defaulting to empty
    pub fn id_set(&self, key: &str) -> BTreeSet<EntityId> {
        let mut set = BTreeSet::new();
        if let Some(Value::Array(items)) = self.get(key) {
            for item in items {
                let id = match item {
                    Value::String(s) => EntityId::new(s.clone()),
                    Value::Number(n) => EntityId::new(n.to_string()),
                    _ => continue,
                };
                if !id.is_empty() {
                    set.insert(id);
                }
            }
        }
        set
    }

    /// Optional media attachment (`media_type` + `media_url` pair or a
    /// nested `media` object)
    pub fn media(&self) -> Option<Media> {
        let (kind_raw, url) = if let Some(nested) = self.get("media") {
            let nested = RawObject::new(nested);
            (nested.string("kind"), nested.string("url"))
        } else {
            (self.string("media_type"), self.string("media_url"))
        };
        if url.is_empty() {
            return None;
        }
        let kind = match kind_raw.as_str() {
            "video" => MediaKind::Video,
            "audio" | "voice" => MediaKind::Audio,
            _ => MediaKind::Image,
        };
        Some(Media { kind, url })
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for c in snake.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Normalize a raw user payload
pub fn user(raw: &Value, clock: &dyn Clock) -> User {
    let raw = RawObject::new(raw);
    let now = clock.now();
    let created_at = raw.timestamp_or("created_at", now);
    User {
        id: raw.id("id"),
        username: raw.string("username"),
        display_name: raw.string("display_name"),
        bio: raw.string("bio"),
        status: raw.string("status"),
        avatar_url: raw.string("avatar_url"),
        cover_url: raw.string("cover_url"),
        banned: raw.boolean_opt("banned"),
        restricted: raw.boolean_opt("restricted"),
        verified: raw.boolean_opt("verified"),
        role: raw.role_opt("role"),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
        last_seen_at: raw.timestamp_or("last_seen_at", created_at),
    }
}

/// Normalize a raw post payload
pub fn post(raw: &Value, clock: &dyn Clock) -> Post {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    Post {
        id: raw.id("id"),
        author_id: raw.id("author_id"),
        text: raw.string("text"),
        media: raw.media(),
        liked_by: raw.id_set("liked_by"),
        reposted_by: raw.id_set("reposted_by"),
        repost_of: raw.id_opt("repost_of_post_id").or_else(|| raw.id_opt("repost_of")),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw post comment payload
pub fn post_comment(raw: &Value, clock: &dyn Clock) -> PostComment {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    PostComment {
        id: raw.id("id"),
        post_id: raw.id("post_id"),
        author_id: raw.id("author_id"),
        text: raw.string("text"),
        liked_by: raw.id_set("liked_by"),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw direct message payload.
///
/// The sender is always a member of `read_by`, whatever the payload says.
pub fn message(raw: &Value, clock: &dyn Clock) -> Message {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    let from_id = raw.id("from_id");
    let mut read_by = raw.id_set("read_by");
    if !from_id.is_empty() {
        read_by.insert(from_id.clone());
    }
    Message {
        id: raw.id("id"),
        from_id,
        to_id: raw.id("to_id"),
        text: raw.string("text"),
        media: raw.media(),
        expires_at: raw.timestamp_opt("expires_at"),
        edited_at: raw.timestamp_opt("edited_at"),
        read_by,
        created_at,
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw follow edge payload; self-loops yield `None`
pub fn follow(raw: &Value) -> Option<Follow> {
    let raw = RawObject::new(raw);
    let follower = raw
        .id_opt("follower_id")
        .or_else(|| raw.id_opt("follower"))?;
    let following = raw
        .id_opt("following_id")
        .or_else(|| raw.id_opt("following"))?;
    Follow::new(follower, following)
}

/// Normalize a raw group payload
pub fn group(raw: &Value, clock: &dyn Clock) -> Group {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    Group {
        id: raw.id("id"),
        name: raw.string("name"),
        description: raw.string("description"),
        cover_url: raw.string("cover_url"),
        creator_id: raw.id("creator_id"),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
    }
}

/// Normalize a raw group membership payload
pub fn group_member(raw: &Value, clock: &dyn Clock) -> GroupMember {
    let raw = RawObject::new(raw);
    GroupMember {
        group_id: raw.id("group_id"),
        user_id: raw.id("user_id"),
        role: GroupRole::parse(&raw.string("role")),
        joined_at: raw.timestamp_or("joined_at", clock.now()),
    }
}

/// Normalize a raw group post payload
pub fn group_post(raw: &Value, clock: &dyn Clock) -> GroupPost {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    GroupPost {
        id: raw.id("id"),
        group_id: raw.id("group_id"),
        author_id: raw.id("author_id"),
        text: raw.string("text"),
        media: raw.media(),
        liked_by: raw.id_set("liked_by"),
        reposted_by: raw.id_set("reposted_by"),
        repost_of: raw.id_opt("repost_of_post_id").or_else(|| raw.id_opt("repost_of")),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw group post comment payload
pub fn group_post_comment(raw: &Value, clock: &dyn Clock) -> GroupPostComment {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    GroupPostComment {
        id: raw.id("id"),
        group_id: raw.id("group_id"),
        post_id: raw.id("post_id"),
        author_id: raw.id("author_id"),
        text: raw.string("text"),
        liked_by: raw.id_set("liked_by"),
        created_at,
        updated_at: raw.timestamp_or("updated_at", created_at),
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw story payload.
///
/// A story without an expiry gets the standard 24-hour window from its
/// creation time.
pub fn story(raw: &Value, clock: &dyn Clock) -> Story {
    let raw = RawObject::new(raw);
    let created_at = raw.timestamp_or("created_at", clock.now());
    Story {
        id: raw.id("id"),
        author_id: raw.id("author_id"),
        media: raw.media(),
        text: raw.string("text"),
        viewed_by: raw.id_set("viewed_by"),
        created_at,
        expires_at: raw.timestamp_or("expires_at", created_at + chrono::Duration::hours(24)),
        provenance: Provenance::Confirmed,
    }
}

/// Normalize a raw notification payload
pub fn notification(raw: &Value, clock: &dyn Clock) -> Notification {
    let raw = RawObject::new(raw);
    Notification {
        id: raw.id("id"),
        user_id: raw.id("user_id"),
        actor_id: raw.id("actor_id"),
        text: raw.string("text"),
        read: raw.boolean("read"),
        post_id: raw.id_opt("post_id"),
        comment_id: raw.id_opt("comment_id"),
        group_id: raw.id_opt("group_id"),
        created_at: raw.timestamp_or("created_at", clock.now()),
        provenance: Provenance::Confirmed,
    }
}
