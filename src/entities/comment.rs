//! Post Comment Data Structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{EntityId, Provenance};

/// Represents a comment on a feed post.
///
/// Threading is not stored: a comment whose text begins with `@username` is
/// treated as a reply to that user's most recent earlier comment on the same
/// post, resolved in the view projector at render time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostComment {
    /// Unique comment ID
    pub id: EntityId,
    /// Post this comment belongs to
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

impl PostComment {
    /// The `@username` a reply-style comment opens with, if any
    pub fn reply_mention(&self) -> Option<&str> {
        let rest = self.text.strip_prefix('@')?;
        let mention: &str = rest
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default();
        if mention.is_empty() {
            None
        } else {
            Some(mention)
        }
    }
}
