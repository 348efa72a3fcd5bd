//! Group Data Structures
//!
//! Groups mirror the feed shapes scoped to a group id: a `Group` owns
//! `GroupMember` records, `GroupPost`s and `GroupPostComment`s. A member's
//! role gates posting and moderation inside the group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::post::Media;
use super::{EntityId, Provenance};

/// Role of a member within a group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    /// Regular member
    #[default]
    Member,
    /// Group administrator
    Admin,
}

impl GroupRole {
    /// Lenient parse from a raw payload string
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => GroupRole::Admin,
            _ => GroupRole::Member,
        }
    }
}

/// Represents a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    /// Unique group ID
    pub id: EntityId,
    /// Group name
    pub name: String,
    /// Group description
    pub description: String,
    /// Cover image URL
    pub cover_url: String,
    /// User who created the group
    pub creator_id: EntityId,
    /// When the group was created
    pub created_at: DateTime<Utc>,
    /// Conflict-resolution timestamp for group metadata
    pub updated_at: DateTime<Utc>,
}

/// Membership of a user in a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    /// Group the membership belongs to
    pub group_id: EntityId,
    /// Member user
    pub user_id: EntityId,
    /// Role inside the group
    pub role: GroupRole,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    /// Composite key for the membership edge
    pub fn key(&self) -> (EntityId, EntityId) {
        (self.group_id.clone(), self.user_id.clone())
    }
}

/// A post inside a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupPost {
    /// Unique post ID
    pub id: EntityId,
    /// Group the post belongs to
    pub group_id: EntityId,
    /// Author of the post
    pub author_id: EntityId,
    /// Post text
    pub text: String,
    /// Optional media attachment
    pub media: Option<Media>,
    /// Users who liked this post
    pub liked_by: BTreeSet<EntityId>,
    /// Authors who reposted this post inside the group
    pub reposted_by: BTreeSet<EntityId>,
    /// Root group post this post reposts, if any
    pub repost_of: Option<EntityId>,
    /// When the post was created
    pub created_at: DateTime<Utc>,
    /// When the post was last edited
    pub updated_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}

impl GroupPost {
    /// Whether this post is a repost of another group post
    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }
}

/// A comment on a group post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupPostComment {
    /// Unique comment ID
    pub id: EntityId,
    /// Group the comment belongs to
    pub group_id: EntityId,
    /// Group post this comment belongs to
    pub post_id: EntityId,
    /// Author of the comment
    pub author_id: EntityId,
    /// Comment text
    pub text: String,
    /// Users who liked this comment
    pub liked_by: BTreeSet<EntityId>,
    /// When the comment was created
    pub created_at: DateTime<Utc>,
    /// When the comment was last edited
    pub updated_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}
