//! Transport Boundary Shapes
//!
//! The reconciliation core does not own HTTP or WebSocket mechanics; it
//! consumes and produces the shapes below. The host application's transport
//! layer fills a [`FetchPayload`] from whatever endpoints it calls and hands
//! it to the store; mutation confirmations arrive as [`MutationResponse`].
//!
//! Collections arrive as raw `serde_json::Value`s because endpoints disagree
//! on field casing and completeness; [`FetchPayload::normalize`] runs
//! everything through the entity normalizer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::merge::EntityBatch;
use crate::normalize;

/// One or more raw entity collections from a fetch response.
///
/// A single response often carries several: a feed page embeds author
/// snapshots under `users`, a group page embeds `group_members`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FetchPayload {
    /// Raw user objects
    #[serde(default)]
    pub users: Vec<Value>,
    /// Raw feed posts
    #[serde(default)]
    pub posts: Vec<Value>,
    /// Raw post comments
    #[serde(default)]
    pub comments: Vec<Value>,
    /// Raw direct messages
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Raw follow edges
    #[serde(default)]
    pub follows: Vec<Value>,
    /// Raw groups
    #[serde(default)]
    pub groups: Vec<Value>,
    /// Raw group memberships
    #[serde(default)]
    pub group_members: Vec<Value>,
    /// Raw group posts
    #[serde(default)]
    pub group_posts: Vec<Value>,
    /// Raw group post comments
    #[serde(default)]
    pub group_comments: Vec<Value>,
    /// Raw stories
    #[serde(default)]
    pub stories: Vec<Value>,
    /// Raw notifications
    #[serde(default)]
    pub notifications: Vec<Value>,
}

impl FetchPayload {
    /// Run every collection through the entity normalizer
    pub fn normalize(&self, clock: &dyn Clock) -> EntityBatch {
        EntityBatch {
            users: self.users.iter().map(|v| normalize::user(v, clock)).collect(),
            posts: self.posts.iter().map(|v| normalize::post(v, clock)).collect(),
            comments: self
                .comments
                .iter()
                .map(|v| normalize::post_comment(v, clock))
                .collect(),
            messages: self
                .messages
                .iter()
                .map(|v| normalize::message(v, clock))
                .collect(),
            follows: self.follows.iter().filter_map(normalize::follow).collect(),
            groups: self.groups.iter().map(|v| normalize::group(v, clock)).collect(),
            group_members: self
                .group_members
                .iter()
                .map(|v| normalize::group_member(v, clock))
                .collect(),
            group_posts: self
                .group_posts
                .iter()
                .map(|v| normalize::group_post(v, clock))
                .collect(),
            group_comments: self
                .group_comments
                .iter()
                .map(|v| normalize::group_post_comment(v, clock))
                .collect(),
            stories: self.stories.iter().map(|v| normalize::story(v, clock)).collect(),
            notifications: self
                .notifications
                .iter()
                .map(|v| normalize::notification(v, clock))
                .collect(),
        }
    }
}

/// Authoritative state carried by an HTTP 409 on a revision-guarded write.
///
/// Not an error: the core treats it as a forced merge and surfaces a
/// distinguishable result so the caller can decide whether to retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictBody {
    /// Server-side revision of the authoritative state
    pub revision: u64,
    /// The authoritative current state of the contested entity, plus any
    /// related entities the server chose to include
    #[serde(default)]
    pub current: FetchPayload,
}

/// Outcome of a dispatched mutation request.
#[derive(Debug, Clone)]
pub enum MutationResponse {
    /// The server confirmed the write. `entity` is the single authoritative
    /// entity created or modified; `extra` carries any additional entities
    /// the response embedded (e.g. newly visible users).
    Confirmed {
        /// Raw authoritative entity
        entity: Value,
        /// Additional embedded collections
        extra: FetchPayload,
    },
    /// Revision-guarded write lost the race; body carries the current state
    Conflict(ConflictBody),
    /// Transport-level failure; the optimistic state must be rolled back
    Failed(TransportError),
}

/// Transport-level failure, reduced to what the rollback path needs.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// The server rejected the request
    #[error("Request rejected: {0}")]
    Rejected(String),
    /// The request timed out or the connection dropped
    #[error("Network unavailable")]
    Unreachable,
    /// The response body could not be interpreted
    #[error("Malformed response")]
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use serde_json::json;

    #[test]
    fn test_payload_deserializes_with_missing_collections() {
        let payload: FetchPayload =
            serde_json::from_value(json!({ "posts": [{ "id": "p1" }] })).unwrap();
        assert_eq!(payload.posts.len(), 1);
        assert!(payload.users.is_empty());
    }

    #[test]
    fn test_normalize_embedded_authors() {
        let payload: FetchPayload = serde_json::from_value(json!({
            "posts": [{ "id": "p1", "authorId": "u1" }],
            "users": [{ "id": "u1", "username": "ana" }],
        }))
        .unwrap();
        let batch = payload.normalize(&SystemClock);
        assert_eq!(batch.posts.len(), 1);
        assert_eq!(batch.users.len(), 1);
        assert_eq!(batch.users[0].username, "ana");
    }
}
