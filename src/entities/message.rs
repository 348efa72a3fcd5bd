//! Direct Message Data Structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::post::Media;
use super::{EntityId, Provenance};

/// Represents a direct message between two users.
///
/// There is no conversation entity; a chat is the directed pair
/// (`from_id`, `to_id`) in either direction. `read_by` is a membership set
/// that only grows under merge (the sender is a member by construction).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message ID
    pub id: EntityId,
    /// Sender
    pub from_id: EntityId,
    /// Recipient
    pub to_id: EntityId,
    /// Message text
    pub text: String,
    /// Optional media attachment (image or voice note)
    pub media: Option<Media>,
    /// Expiry instant for ephemeral voice notes; expired messages are
    /// dropped from the snapshot entirely at merge time
    pub expires_at: Option<DateTime<Utc>>,
    /// When the message was last edited, if ever
    pub edited_at: Option<DateTime<Utc>>,
    /// Users who have seen the message, sender included
    pub read_by: BTreeSet<EntityId>,
    /// When the message was sent
    pub created_at: DateTime<Utc>,
    /// Confirmed or pending local synthesis
    #[serde(default)]
    pub provenance: Provenance,
}

impl Message {
    /// Whether the message involves the given peer pair, in either direction
    pub fn is_between(&self, a: &EntityId, b: &EntityId) -> bool {
        (&self.from_id == a && &self.to_id == b) || (&self.from_id == b && &self.to_id == a)
    }

    /// Whether the message has expired relative to `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the given user has seen the message
    pub fn is_read_by(&self, user: &EntityId) -> bool {
        self.read_by.contains(user)
    }
}
