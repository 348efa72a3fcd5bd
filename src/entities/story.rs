//! Story Data Structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::post::Media;
use super::{EntityId, Provenance};

/// Represents an ephemeral story.
///
/// Stories carry a rolling expiry window; once `expires_at` passes they are
/// dropped from the snapshot entirely at merge time, not soft-flagged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    /// Unique story ID
    pub id: EntityId,
    /// Author of the story
    pub author_id: EntityId,
    /// Media attachment
    pub media: Option<Media>,
    /// Optional caption text
    pub text: String,
    /// Users who have viewed the story
    pub viewed_by: BTreeSet<EntityId>,
    /// When the story was posted
    pub created_at: DateTime<Utc>,
    /// When the story leaves the shelf
    pub expires_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}

impl Story {
    /// Whether the story has expired relative to `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
