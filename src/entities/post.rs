//! Post Data Structure
//!
//! Represents a feed post. Likes and reposts are stored as membership sets,
//! not counts; repost posts reference their root via `repost_of`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{EntityId, Provenance};

/// Kind of attached media
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Audio clip (voice note)
    Audio,
}

/// A media attachment on a post, story or message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    /// Kind of media
    pub kind: MediaKind,
    /// Public URL of the media object
    pub url: String,
}

/// Represents a feed post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Unique post ID
    pub id: EntityId,
    /// Author of the post
    pub author_id: EntityId,
    /// Post text
    pub text: String,
    /// Optional media attachment
    pub media: Option<Media>,
    /// Users who liked this post (membership, not a count)
    pub liked_by: BTreeSet<EntityId>,
    /// Authors who reposted this post; always empty on repost posts and
    /// recomputed from sibling posts at merge time
    pub reposted_by: BTreeSet<EntityId>,
    /// Root post this post reposts, if any (reference, not ownership)
    pub repost_of: Option<EntityId>,
    /// When the post was created
    pub created_at: DateTime<Utc>,
    /// When the post was last edited
    pub updated_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}

impl Post {
    /// Whether this post is a repost of another post
    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }
}
