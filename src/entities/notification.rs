//! Notification Data Structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityId, Provenance};

/// Represents a user-facing notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    /// Unique notification ID
    pub id: EntityId,
    /// Recipient
    pub user_id: EntityId,
    /// User whose action triggered the notification
    pub actor_id: EntityId,
    /// Notification text
    pub text: String,
    /// Whether the recipient has read it
    pub read: bool,
    /// Optional post to navigate to
    pub post_id: Option<EntityId>,
    /// Optional comment to navigate to
    pub comment_id: Option<EntityId>,
    /// Optional group to navigate to
    pub group_id: Option<EntityId>,
    /// When the notification was created
    pub created_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}
